//! Identity-bearing domain records
//!
//! An [`Entity`] carries an `id`, a `type` tag and arbitrary fields. Fields that hold
//! other entities are kept as related entities so the collection layer can store them
//! separately and collapse them to `{id, type}` references.

mod definition;

pub use definition::{EntityDef, EnumDef, FieldDef, FieldType};

use crate::error::{PxError, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{json, Map, Value};
use std::sync::Arc;
use uuid::Uuid;

/// Rust types that can be stored as entities
///
/// Implementors serialize to a JSON object whose keys match the definition's fields.
pub trait Model: Serialize + DeserializeOwned {
    fn definition() -> EntityDef;
}

/// Generate a fresh entity id
pub fn new_id() -> String {
    Uuid::new_v4().to_string()
}

/// A typed, identity-bearing record
#[derive(Debug, Clone, PartialEq)]
pub struct Entity {
    pub id: String,
    pub entity_type: String,
    fields: Map<String, Value>,
    related: Vec<(String, Entity)>,
    definition: Option<Arc<EntityDef>>,
}

impl Entity {
    /// Create an empty entity of the given type with a generated id
    pub fn new(entity_type: impl Into<String>) -> Self {
        Self::with_id(new_id(), entity_type)
    }

    pub fn with_id(id: impl Into<String>, entity_type: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            entity_type: entity_type.into(),
            fields: Map::new(),
            related: Vec::new(),
            definition: None,
        }
    }

    /// Create an entity for a definition, with declared defaults filled in
    pub fn of(definition: Arc<EntityDef>) -> Self {
        let mut entity = Self::new(definition.type_name());
        for field in &definition.fields {
            if let Some(default) = &field.default {
                entity.fields.insert(field.name.clone(), default.clone());
            }
        }
        entity.definition = Some(definition);
        entity
    }

    /// Build an entity from a JSON object.
    ///
    /// `id` is generated when missing or null and `type` falls back to `default_type`.
    /// Object values of entity-typed fields (per `definition`) become related entities.
    pub fn from_value(
        value: Value,
        default_type: &str,
        definition: Option<Arc<EntityDef>>,
    ) -> Result<Self> {
        let mut map = match value {
            Value::Object(map) => map,
            other => {
                return Err(PxError::Validation {
                    errors: vec![format!("Entity data must be a JSON object, got {}", other)],
                })
            }
        };

        let id = match map.remove("id") {
            Some(Value::String(id)) if !id.is_empty() => id,
            Some(Value::Number(n)) => n.to_string(),
            _ => new_id(),
        };
        let entity_type = match map.remove("type") {
            Some(Value::String(t)) => t,
            _ => default_type.to_string(),
        };

        let mut entity = Self::with_id(id, entity_type);
        for (name, value) in map {
            let is_entity_field = definition
                .as_ref()
                .and_then(|d| d.get(&name))
                .map(|f| f.ty.is_entity())
                .unwrap_or(false);

            if is_entity_field && value.is_object() {
                let type_name = match definition.as_ref().and_then(|d| d.get(&name)) {
                    Some(FieldDef {
                        ty: FieldType::Entity { type_name },
                        ..
                    }) => type_name.clone(),
                    _ => "entity".to_string(),
                };
                let child = Self::from_value(value, &type_name, None)?;
                entity.related.push((name, child));
            } else {
                entity.fields.insert(name, value);
            }
        }
        entity.definition = definition;
        Ok(entity)
    }

    /// Convert a [`Model`] into an entity carrying its definition
    pub fn from_model<T: Model>(model: &T) -> Result<Self> {
        let definition = Arc::new(T::definition());
        let value = serde_json::to_value(model)
            .map_err(|e| PxError::json(e, "Failed to serialize model"))?;
        let type_name = definition.type_name();
        Self::from_value(value, &type_name, Some(definition))
    }

    /// Convert this entity back into a [`Model`]
    pub fn into_model<T: Model>(&self) -> Result<T> {
        serde_json::from_value(self.to_value())
            .map_err(|e| PxError::json(e, format!("Failed to convert entity {}", self.id)))
    }

    /// Set a plain field value
    pub fn set(&mut self, name: impl Into<String>, value: Value) -> &mut Self {
        let name = name.into();
        self.related.retain(|(n, _)| *n != name);
        self.fields.insert(name, value);
        self
    }

    /// Builder form of [`Entity::set`]
    pub fn with(mut self, name: impl Into<String>, value: Value) -> Self {
        self.set(name, value);
        self
    }

    /// Set an entity-valued field
    pub fn relate(&mut self, name: impl Into<String>, entity: Entity) -> &mut Self {
        let name = name.into();
        self.fields.remove(&name);
        if let Some(slot) = self.related.iter_mut().find(|(n, _)| *n == name) {
            slot.1 = entity;
        } else {
            self.related.push((name, entity));
        }
        self
    }

    /// Builder form of [`Entity::relate`]
    pub fn with_related(mut self, name: impl Into<String>, entity: Entity) -> Self {
        self.relate(name, entity);
        self
    }

    pub fn with_definition(mut self, definition: Arc<EntityDef>) -> Self {
        self.definition = Some(definition);
        self
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    pub fn get_str(&self, name: &str) -> Option<&str> {
        self.fields.get(name).and_then(Value::as_str)
    }

    pub fn related(&self, name: &str) -> Option<&Entity> {
        self.related
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, e)| e)
    }

    /// Plain (non-entity) fields in insertion order
    pub fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }

    /// Entity-valued fields in insertion order
    pub fn related_entities(&self) -> impl Iterator<Item = (&str, &Entity)> {
        self.related.iter().map(|(n, e)| (n.as_str(), e))
    }

    pub fn definition(&self) -> Option<&EntityDef> {
        self.definition.as_deref()
    }

    pub fn field_def(&self, name: &str) -> Option<&FieldDef> {
        self.definition.as_ref().and_then(|d| d.get(name))
    }

    /// `{id, type}` reference used wherever this entity is nested in another
    pub fn reference(&self) -> Value {
        json!({ "id": self.id, "type": self.entity_type })
    }

    /// Definition to describe this entity with: the attached one, or one inferred from
    /// the current values.
    pub fn effective_definition(&self) -> EntityDef {
        if let Some(def) = &self.definition {
            return def.as_ref().clone();
        }
        let mut def = EntityDef::new(title_case(&self.entity_type));
        for (name, value) in &self.fields {
            def.push(FieldDef::new(name.clone(), FieldType::infer(value)));
        }
        for (name, child) in &self.related {
            def.push(FieldDef::new(
                name.clone(),
                FieldType::entity(child.entity_type.clone()),
            ));
        }
        def
    }

    /// All fields except `id`, with related entities collapsed to references
    pub fn document(&self) -> Map<String, Value> {
        let mut doc = Map::new();
        doc.insert("type".to_string(), Value::String(self.entity_type.clone()));
        for (name, value) in &self.fields {
            doc.insert(name.clone(), value.clone());
        }
        for (name, child) in &self.related {
            doc.insert(name.clone(), child.reference());
        }
        doc
    }

    /// Full JSON form, with related entities expanded
    pub fn to_value(&self) -> Value {
        let mut map = Map::new();
        map.insert("id".to_string(), Value::String(self.id.clone()));
        map.insert("type".to_string(), Value::String(self.entity_type.clone()));
        for (name, value) in &self.fields {
            map.insert(name.clone(), value.clone());
        }
        for (name, child) in &self.related {
            map.insert(name.clone(), child.to_value());
        }
        Value::Object(map)
    }
}

fn title_case(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => "Entity".to_string(),
    }
}

impl Serialize for Entity {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.to_value().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Entity {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        Entity::from_value(value, "entity", None).map_err(serde::de::Error::custom)
    }
}

impl std::fmt::Display for Entity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_value())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct User {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<String>,
        name: String,
        age: i64,
    }

    impl Model for User {
        fn definition() -> EntityDef {
            EntityDef::new("User")
                .required("name", FieldType::String)
                .required("age", FieldType::Integer)
        }
    }

    #[test]
    fn test_new_entity_has_id_and_type() {
        let entity = Entity::new("note");
        assert!(!entity.id.is_empty());
        assert_eq!(entity.entity_type, "note");
    }

    #[test]
    fn test_model_round_trip() {
        let user = User {
            id: Some("u1".to_string()),
            name: "test".to_string(),
            age: 20,
        };
        let entity = Entity::from_model(&user).unwrap();
        assert_eq!(entity.id, "u1");
        assert_eq!(entity.entity_type, "user");
        assert_eq!(entity.get_str("name"), Some("test"));

        let back: User = entity.into_model().unwrap();
        assert_eq!(back, user);
    }

    #[test]
    fn test_model_without_id_gets_one() {
        let user = User {
            id: None,
            name: "anon".to_string(),
            age: 1,
        };
        let entity = Entity::from_model(&user).unwrap();
        assert_eq!(entity.id.len(), 36);
    }

    #[test]
    fn test_document_collapses_related_entities() {
        let author = Entity::with_id("a1", "user").with("name", json!("ann"));
        let post = Entity::with_id("p1", "post")
            .with("title", json!("hello"))
            .with_related("author", author);

        let doc = post.document();
        assert!(!doc.contains_key("id"));
        assert_eq!(doc["type"], json!("post"));
        assert_eq!(doc["author"], json!({"id": "a1", "type": "user"}));

        let full = post.to_value();
        assert_eq!(full["author"]["name"], json!("ann"));
    }

    #[test]
    fn test_from_value_uses_definition_for_related() {
        let def = Arc::new(
            EntityDef::new("Post")
                .field("title", FieldType::String)
                .field("author", FieldType::entity("user")),
        );
        let entity = Entity::from_value(
            json!({"title": "t", "author": {"id": "a1", "name": "ann"}}),
            "post",
            Some(def),
        )
        .unwrap();

        let author = entity.related("author").unwrap();
        assert_eq!(author.id, "a1");
        assert_eq!(author.entity_type, "user");
        assert!(entity.get("author").is_none());
    }

    #[test]
    fn test_set_replaces_related() {
        let mut entity = Entity::new("post").with_related("author", Entity::new("user"));
        entity.set("author", Value::Null);
        assert!(entity.related("author").is_none());
        assert_eq!(entity.get("author"), Some(&Value::Null));
    }

    #[test]
    fn test_effective_definition_is_inferred() {
        let entity = Entity::new("user")
            .with("name", json!("x"))
            .with("age", json!(3));
        let def = entity.effective_definition();
        assert_eq!(def.title, "User");
        assert_eq!(def.get("age").unwrap().ty, FieldType::Integer);
    }

    #[test]
    fn test_of_fills_defaults() {
        let def = Arc::new(
            EntityDef::new("Template")
                .with_field(FieldDef::new("num_examples", FieldType::Integer).default_value(json!(1))),
        );
        let entity = Entity::of(def);
        assert_eq!(entity.entity_type, "template");
        assert_eq!(entity.get("num_examples"), Some(&json!(1)));
    }
}
