//! Entity → store records
//!
//! Every entity becomes one document record holding all of its fields, plus one field
//! record per non-scalar field so that queries can match on individual values.

use crate::entity::Entity;
use crate::error::{PxError, Result};
use crate::store::Metadata;
use serde_json::{json, Map, Value};

/// Metadata `item` value of document records
pub const DOCUMENT_ITEM: i64 = 1;
/// Metadata `item` value of field records
pub const FIELD_ITEM: i64 = 0;

/// A record ready to be upserted
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    pub id: String,
    pub document: String,
    pub metadata: Metadata,
}

impl Record {
    pub fn is_document(&self) -> bool {
        is_document(&self.metadata)
    }
}

pub(crate) fn is_document(metadata: &Metadata) -> bool {
    metadata.get("item").and_then(Value::as_i64) == Some(DOCUMENT_ITEM)
}

/// Id of the entity a stored record belongs to
pub(crate) fn owner_id<'a>(record_id: &'a str, metadata: &'a Metadata) -> &'a str {
    if is_document(metadata) {
        return record_id;
    }
    metadata
        .get("item_id")
        .and_then(Value::as_str)
        .unwrap_or(record_id)
}

/// Null, booleans, numbers and strings never get a field record
fn is_scalar(value: &Value) -> bool {
    matches!(
        value,
        Value::Null | Value::Bool(_) | Value::Number(_) | Value::String(_)
    )
}

/// An entity that only carries identity, as left behind by reconstructing a reference
fn is_bare_reference(entity: &Entity) -> bool {
    entity.fields().is_empty() && entity.related_entities().next().is_none()
}

/// Decompose entities into records for the named collection.
///
/// Related entities are decomposed too and their records precede the document record
/// of the entity that references them.
pub fn create_records(collection: &str, items: &[Entity]) -> Result<Vec<Record>> {
    let mut records = Vec::new();
    for item in items {
        let now = chrono::Utc::now().to_rfc3339();
        push_records(collection, item, &now, &mut records)?;
    }
    Ok(records)
}

fn push_records(collection: &str, item: &Entity, now: &str, records: &mut Vec<Record>) -> Result<()> {
    let embeds = |name: &str| item.field_def(name).map(|f| f.embed).unwrap_or(true);

    for (name, value) in item.fields() {
        if name == "id" || name == "type" || is_scalar(value) || !embeds(name) {
            continue;
        }
        records.push(field_record(collection, item, name, value.clone(), now)?);
    }

    for (name, child) in item.related_entities() {
        if embeds(name) {
            records.push(field_record(collection, item, name, child.reference(), now)?);
        }
        if is_bare_reference(child) {
            tracing::debug!("Skipping bare reference {} in field {}", child.id, name);
        } else {
            push_records(collection, child, now, records)?;
        }
    }

    let schema = serde_json::to_string(&item.effective_definition().json_schema())
        .map_err(|e| PxError::json(e, format!("Failed to serialize schema of {}", item.id)))?;
    let document = serde_json::to_string(&Value::Object(item.document()))
        .map_err(|e| PxError::json(e, format!("Failed to serialize entity {}", item.id)))?;

    records.push(Record {
        id: item.id.clone(),
        document,
        metadata: metadata(json!({
            "collection": collection,
            "type": item.entity_type,
            "item": DOCUMENT_ITEM,
            "schema": schema,
            "created_at": now,
        })),
    });
    Ok(())
}

fn field_record(
    collection: &str,
    item: &Entity,
    name: &str,
    value: Value,
    now: &str,
) -> Result<Record> {
    let mut document = Map::new();
    document.insert(name.to_string(), value);
    let document = serde_json::to_string(&Value::Object(document))
        .map_err(|e| PxError::json(e, format!("Failed to serialize field {}", name)))?;

    Ok(Record {
        id: format!("{}_{}", item.id, name),
        document,
        metadata: metadata(json!({
            "field": name,
            "collection": collection,
            "item": FIELD_ITEM,
            "item_id": item.id,
            "created_at": now,
        })),
    })
}

fn metadata(value: Value) -> Metadata {
    match value {
        Value::Object(map) => map,
        _ => Metadata::new(),
    }
}
