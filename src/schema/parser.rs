//! ERD text → typed schema.
//!
//! The input format is zero or more entity blocks of the form
//! `Name { fieldName fieldType ... }`. Lines inside a block that do not
//! look like `field type` contribute nothing — generated ERD text is LLM
//! output and a partial schema beats a hard failure here.

use std::sync::LazyLock;

use regex::Regex;

use super::{Entity, Field, FieldType, Schema};

static ENTITY_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\w+)\s*\{([^}]+)\}").expect("entity regex"));
static FIELD_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\w+)\s+(\w+)").expect("field regex"));

/// Compile ERD text into a [`Schema`].
///
/// A field literally named `id` is dropped: the emitter synthesizes the
/// primary key. A `<entity>_id` field becomes a foreign key when an entity
/// with that name (case-insensitive) exists in the same schema.
pub fn parse_erd(erd_code: &str) -> Schema {
    let mut entities = Vec::new();

    for captures in ENTITY_RE.captures_iter(erd_code) {
        let name = captures[1].trim().to_string();
        let mut fields = Vec::new();

        for line in captures[2].lines() {
            let line = line.trim().trim_end_matches(',');
            if line.is_empty() {
                continue;
            }
            let Some(field_captures) = FIELD_RE.captures(line) else {
                continue;
            };
            let field_name = field_captures[1].to_string();
            if field_name.eq_ignore_ascii_case("id") {
                continue;
            }
            fields.push(Field {
                name: field_name,
                ty: FieldType::from_keyword(&field_captures[2]),
                references: None,
            });
        }

        entities.push(Entity { name, fields });
    }

    resolve_references(&mut entities);
    Schema { entities }
}

/// Link `<entity>_id` fields to their target entities where possible.
fn resolve_references(entities: &mut [Entity]) {
    let names: Vec<String> = entities.iter().map(|e| e.name.clone()).collect();

    for entity in entities.iter_mut() {
        for field in entity.fields.iter_mut() {
            let Some(prefix) = field.name.strip_suffix("_id") else {
                continue;
            };
            if let Some(target) = names.iter().find(|n| n.eq_ignore_ascii_case(prefix)) {
                field.references = Some(target.clone());
            }
        }
    }
}
