//! JSON Schema generation and entity reconstruction
//!
//! - [`EntityDef::json_schema`](crate::entity::EntityDef::json_schema) turns a definition
//!   into a JSON Schema, skipping (and logging) fields it cannot describe
//! - [`SchemaRegistry`] turns schemas back into definitions, keyed by title
//! - [`create_entities`] validates raw data against a schema and builds entities

mod generate;
mod reconstruct;
mod registry;

pub use reconstruct::{create_entities, create_entities_with, create_entity, validate};
pub use registry::SchemaRegistry;

use serde_json::{Map, Value};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SchemaError {
    #[error("Nested list fields are not supported: {0}")]
    NestedList(String),

    #[error("Enum {0} has no members")]
    EmptyEnum(String),

    #[error("Default for {field} must be a JSON object to derive a schema, got {found}")]
    InvalidDefault { field: String, found: String },

    #[error("Unresolved reference: {0}")]
    UnresolvedRef(String),

    #[error("Unsupported JSON type '{ty}' for field {field}")]
    UnsupportedType { field: String, ty: String },

    #[error("Schema failed to compile: {0}")]
    Compile(String),
}

/// Whether the schema describes a list of entities
pub fn is_list(schema: &Value) -> bool {
    schema.get("type").and_then(Value::as_str) == Some("array")
}

/// Title of the schema or of its item schema, `"Entity"` when neither has one
pub fn title_of(schema: &Value) -> String {
    schema
        .get("title")
        .or_else(|| schema.get("items").and_then(|i| i.get("title")))
        .and_then(Value::as_str)
        .unwrap_or("Entity")
        .to_string()
}

/// Object schema describing a single entity: the schema itself or its `items`
pub fn object_schema(schema: &Value) -> &Value {
    if is_list(schema) {
        schema.get("items").unwrap_or(schema)
    } else {
        schema
    }
}

/// `properties` of the (item) schema
pub fn properties_of(schema: &Value) -> Map<String, Value> {
    object_schema(schema)
        .get("properties")
        .and_then(Value::as_object)
        .cloned()
        .unwrap_or_default()
}

/// Definitions reachable from the schema, from both `$defs` and `definitions`,
/// at the top level and on the item schema
pub fn definitions_of(schema: &Value) -> Map<String, Value> {
    let mut defs = Map::new();
    for scope in [schema, object_schema(schema)] {
        for key in ["definitions", "$defs"] {
            if let Some(map) = scope.get(key).and_then(Value::as_object) {
                for (name, def) in map {
                    defs.entry(name.clone()).or_insert_with(|| def.clone());
                }
            }
        }
    }
    defs
}

/// Names of the required fields of the (item) schema
pub fn required_of(schema: &Value) -> Vec<String> {
    object_schema(schema)
        .get("required")
        .and_then(Value::as_array)
        .map(|r| {
            r.iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_title_falls_back_to_items() {
        let schema = json!({"type": "array", "items": {"title": "Person"}});
        assert!(is_list(&schema));
        assert_eq!(title_of(&schema), "Person");
        assert_eq!(title_of(&json!({})), "Entity");
    }

    #[test]
    fn test_definitions_merge_both_keys() {
        let schema = json!({
            "definitions": {"A": {"enum": ["x"]}},
            "$defs": {"B": {"type": "object"}}
        });
        let defs = definitions_of(&schema);
        assert!(defs.contains_key("A"));
        assert!(defs.contains_key("B"));
    }

    #[test]
    fn test_required_of_list_schema() {
        let schema = json!({
            "type": "array",
            "items": {"properties": {"name": {"type": "string"}}, "required": ["name"]}
        });
        assert_eq!(required_of(&schema), vec!["name"]);
        assert!(properties_of(&schema).contains_key("name"));
    }
}
