//! Schema compiler.
//!
//! Two halves, deliberately separated: `parser` compiles the lightweight
//! ERD text format into a typed [`Schema`] model, and `emit` renders that
//! model (plus the generated API spec) into source text through pure
//! functions. Parsing never touches formatting and vice versa, so each is
//! testable on its own.

pub mod emit;
pub mod parser;

use serde::{Deserialize, Serialize};

/// Column types the ERD format maps onto.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    Text,
    Integer,
    Boolean,
    /// Auto-populated on row creation.
    Timestamp,
}

impl FieldType {
    /// Case-sensitive keyword mapping; anything unrecognized is text.
    pub fn from_keyword(keyword: &str) -> Self {
        match keyword {
            "int" => FieldType::Integer,
            "bool" => FieldType::Boolean,
            "timestamp" | "datetime" => FieldType::Timestamp,
            _ => FieldType::Text,
        }
    }
}

/// One column of an entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Field {
    pub name: String,
    pub ty: FieldType,
    /// Entity this field references, when the `_id` naming convention
    /// resolved against another entity in the same schema.
    pub references: Option<String>,
}

/// One entity block from the ERD text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entity {
    pub name: String,
    pub fields: Vec<Field>,
}

/// A compiled schema: the typed form of the ERD artifact.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schema {
    pub entities: Vec<Entity>,
}

impl Schema {
    pub fn entity(&self, name: &str) -> Option<&Entity> {
        self.entities.iter().find(|e| e.name == name)
    }
}
