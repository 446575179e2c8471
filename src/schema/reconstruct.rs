//! Raw data + JSON Schema → entities

use super::{is_list, title_of, SchemaError, SchemaRegistry};
use crate::entity::{new_id, Entity, EntityDef};
use crate::error::{PxError, Result};
use jsonschema::{Draft, JSONSchema};
use serde_json::{Map, Value};
use std::sync::Arc;

/// Validate an instance against a JSON Schema, collecting every violation
pub fn validate(schema: &Value, instance: &Value) -> Result<()> {
    let compiled = JSONSchema::options()
        .with_draft(Draft::Draft7)
        .compile(schema)
        .map_err(|e| SchemaError::Compile(e.to_string()))?;

    if let Err(errors) = compiled.validate(instance) {
        let errors: Vec<String> = errors
            .map(|e| {
                let path = e.instance_path.to_string();
                if path.is_empty() {
                    e.to_string()
                } else {
                    format!("{} (at {})", e, path)
                }
            })
            .collect();
        return Err(PxError::Validation { errors });
    }
    Ok(())
}

/// Build a single entity from an object schema and raw data
pub fn create_entity(schema: &Value, data: Value) -> Result<Entity> {
    let mut entities = create_entities(schema, data)?;
    match entities.len() {
        1 => Ok(entities.remove(0)),
        n => Err(PxError::Validation {
            errors: vec![format!("Expected a single entity, got {}", n)],
        }),
    }
}

/// Build entities from an object or array-of-object schema and raw data
pub fn create_entities(schema: &Value, data: Value) -> Result<Vec<Entity>> {
    let mut registry = SchemaRegistry::new();
    create_entities_with(&mut registry, schema, data)
}

/// [`create_entities`] resolving definitions through an existing registry.
///
/// Missing ids are generated, enum values are mapped to their lowercase member names,
/// the data is validated against the schema, and `type` defaults to the schema title.
pub fn create_entities_with(
    registry: &mut SchemaRegistry,
    schema: &Value,
    data: Value,
) -> Result<Vec<Entity>> {
    let list = is_list(schema);
    let items = match (list, data) {
        (true, Value::Array(items)) => items,
        (false, Value::Array(_)) => {
            return Err(PxError::Validation {
                errors: vec!["Expected an object, got an array".to_string()],
            })
        }
        (true, other) => vec![other],
        (false, other) => vec![other],
    };

    let definition = registry.resolve(schema)?;

    let items = items
        .into_iter()
        .map(|item| prepare(item, &definition))
        .collect::<Result<Vec<_>>>()?;

    let instance = if list {
        Value::Array(items.iter().cloned().map(Value::Object).collect())
    } else {
        Value::Object(items[0].clone())
    };
    validate(schema, &instance)?;

    let title = title_of(schema);
    items
        .into_iter()
        .map(|item| Entity::from_value(Value::Object(item), &title, Some(definition.clone())))
        .collect()
}

/// Assign an id, drop nulls of optional fields and normalize enum values
fn prepare(item: Value, definition: &Arc<EntityDef>) -> Result<Map<String, Value>> {
    let mut map = match item {
        Value::Object(map) => map,
        other => {
            return Err(PxError::Validation {
                errors: vec![format!("Entity data must be a JSON object, got {}", other)],
            })
        }
    };

    if map.get("id").map(Value::is_null).unwrap_or(true) {
        map.insert("id".to_string(), Value::String(new_id()));
    }

    map.retain(|name, value| {
        !value.is_null()
            || definition
                .get(name)
                .map(|f| f.required)
                .unwrap_or(false)
    });

    for field in &definition.fields {
        let Some(enum_def) = field.ty.enum_def() else {
            continue;
        };
        if let Some(value) = map.get_mut(&field.name) {
            *value = match &*value {
                Value::Array(values) => {
                    Value::Array(values.iter().map(|v| enum_def.normalize(v)).collect())
                }
                single => enum_def.normalize(single),
            };
        }
    }

    Ok(map)
}
