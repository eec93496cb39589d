//! Source emitters.
//!
//! Pure functions from the typed schema / generated API spec to source
//! text. The backend templates the catalog ships are Django projects, so
//! the data-model and endpoint emitters target that layout; the swagger
//! envelope is framework-neutral.

use serde_json::Value;
use std::sync::LazyLock;

use regex::Regex;

use super::{FieldType, Schema};
use crate::errors::SchemaError;
use crate::generate::strip_code_fences;

/// Render the data-model source for a schema.
///
/// Every entity gets a synthesized string primary key; columns follow the
/// compiled field types, and resolved foreign keys become references.
pub fn render_models(schema: &Schema) -> String {
    let mut out = String::from("from django.db import models\n\n");

    for entity in &schema.entities {
        out.push_str(&format!("\nclass {}(models.Model):\n", entity.name));
        out.push_str("    id = models.CharField(max_length=255, primary_key=True)\n");

        for field in &entity.fields {
            let line = match &field.references {
                Some(target) => format!(
                    "    {} = models.ForeignKey({}, on_delete=models.CASCADE)\n",
                    field.name.trim_end_matches("_id"),
                    target
                ),
                None => match field.ty {
                    FieldType::Text => {
                        format!("    {} = models.CharField(max_length=255)\n", field.name)
                    }
                    FieldType::Integer => {
                        format!("    {} = models.IntegerField()\n", field.name)
                    }
                    FieldType::Boolean => {
                        format!("    {} = models.BooleanField(default=False)\n", field.name)
                    }
                    FieldType::Timestamp => format!(
                        "    {} = models.DateTimeField(auto_now_add=True)\n",
                        field.name
                    ),
                },
            };
            out.push_str(&line);
        }
        out.push('\n');
    }

    out
}

/// Render endpoint view classes from the generated API spec.
///
/// The spec is the swagger-style JSON the completion service produced;
/// each path becomes one view class whose handler echoes the declared 200
/// response schema. Code fences are stripped before parsing.
pub fn render_views(api_code: &str) -> Result<String, SchemaError> {
    let cleaned = strip_code_fences(api_code);
    if cleaned.is_empty() {
        return Err(SchemaError::EmptyApiSpec);
    }
    let spec: Value = serde_json::from_str(cleaned)?;
    let empty = serde_json::Map::new();
    let paths = spec
        .get("paths")
        .and_then(|p| p.as_object())
        .unwrap_or(&empty);

    let mut out = String::from(
        "from rest_framework.views import APIView\n\
         from rest_framework.response import Response\n\
         from rest_framework import status\n\n",
    );

    for (endpoint, methods) in paths {
        let Some(methods) = methods.as_object() else {
            continue;
        };
        // First declared method wins; the map keeps declaration order.
        let Some((method, method_spec)) = methods.iter().next() else {
            continue;
        };
        let response_schema = method_spec
            .pointer("/responses/200/schema")
            .cloned()
            .unwrap_or(Value::Object(serde_json::Map::new()));

        out.push_str(&format!(
            "\nclass {}(APIView):\n    def {}(self, request, *args, **kwargs):\n        \
             try:\n            data = request.data\n            \
             return Response({}, status=status.HTTP_200_OK)\n        \
             except Exception as e:\n            \
             return Response({{\"error\": str(e)}}, status=status.HTTP_400_BAD_REQUEST)\n",
            view_class_name(endpoint),
            method,
            python_literal(&response_schema),
        ));
    }

    Ok(out.trim_end().to_string() + "\n")
}

static VIEW_CLASS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"class\s+(\w+)\(APIView\):").expect("view class regex"));

/// Render the route table from previously rendered view source.
pub fn render_urls(views_source: &str) -> String {
    let mut out = String::from("from django.urls import path\nfrom . import views\n\nurlpatterns = [\n");

    for captures in VIEW_CLASS_RE.captures_iter(views_source) {
        let class_name = &captures[1];
        let endpoint = class_name.replace("View", "").to_lowercase();
        out.push_str(&format!(
            "    path('{endpoint}', views.{class_name}.as_view(), name='{endpoint}'),\n"
        ));
    }

    out.push(']');
    out
}

/// Wrap the generated API paths in a Swagger 2.0 envelope.
pub fn render_swagger(api_code: &str) -> Result<String, SchemaError> {
    let cleaned = strip_code_fences(api_code);
    if cleaned.is_empty() {
        return Err(SchemaError::EmptyApiSpec);
    }
    let spec: Value = serde_json::from_str(cleaned)?;
    // Accept either a bare paths map or a full spec that already has one.
    let paths = spec.get("paths").cloned().unwrap_or(spec);

    let envelope = serde_json::json!({
        "swagger": "2.0",
        "info": {
            "title": "API Documentation",
            "version": "1.0.0",
        },
        "paths": paths,
    });

    Ok(serde_json::to_string_pretty(&envelope).expect("swagger envelope serializes"))
}

/// The envelope with no paths, for workspaces without a usable API artifact.
pub fn empty_swagger() -> String {
    render_swagger(r#"{"paths": {}}"#).expect("empty paths map parses")
}

/// Class name for an endpoint path: segments capitalized and joined with
/// underscores, path parameters unwrapped (`/users/{userid}` → `Users_Userid`).
fn view_class_name(endpoint: &str) -> String {
    endpoint
        .trim_matches('/')
        .split('/')
        .filter(|s| !s.is_empty())
        .map(|segment| {
            let bare: String = segment
                .chars()
                .filter(|c| c.is_alphanumeric())
                .collect();
            let mut chars = bare.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
                None => String::new(),
            }
        })
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("_")
}

/// Render a JSON value as a Python literal (dict/list/bool/None spelling).
fn python_literal(value: &Value) -> String {
    match value {
        Value::Null => "None".to_string(),
        Value::Bool(true) => "True".to_string(),
        Value::Bool(false) => "False".to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => format!("\"{}\"", s.replace('\\', "\\\\").replace('"', "\\\"")),
        Value::Array(items) => {
            let inner: Vec<String> = items.iter().map(python_literal).collect();
            format!("[{}]", inner.join(", "))
        }
        Value::Object(map) => {
            let inner: Vec<String> = map
                .iter()
                .map(|(k, v)| format!("\"{}\": {}", k, python_literal(v)))
                .collect();
            format!("{{{}}}", inner.join(", "))
        }
    }
}
