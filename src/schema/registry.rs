//! JSON Schema → definition, through an explicit registry keyed by schema title

use super::{definitions_of, properties_of, required_of, title_of, SchemaError};
use crate::entity::{EntityDef, EnumDef, FieldDef, FieldType};
use ahash::{AHashMap, AHashSet};
use serde_json::{Map, Value};
use std::sync::Arc;

/// Registry of entity and enum definitions keyed by title
///
/// Every schema resolved through the registry registers its title, and every `$defs`
/// entry it references registers under the definition name, so later lookups reuse
/// the same definitions instead of rebuilding them.
#[derive(Debug, Default, Clone)]
pub struct SchemaRegistry {
    entities: AHashMap<String, Arc<EntityDef>>,
    enums: AHashMap<String, EnumDef>,
    /// Definition names currently being built; a reference back to one of them is a cycle
    resolving: AHashSet<String>,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a definition under its title, replacing any previous one
    pub fn register(&mut self, def: EntityDef) -> Arc<EntityDef> {
        let def = Arc::new(def);
        self.entities.insert(def.title.clone(), def.clone());
        def
    }

    pub fn register_enum(&mut self, def: EnumDef) {
        self.enums.insert(def.name.clone(), def);
    }

    pub fn entity(&self, title: &str) -> Option<Arc<EntityDef>> {
        self.entities.get(title).cloned()
    }

    pub fn enum_def(&self, name: &str) -> Option<&EnumDef> {
        self.enums.get(name)
    }

    pub fn len(&self) -> usize {
        self.entities.len() + self.enums.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Reconstruct the definition described by an object or array-of-object schema
    /// and register it under the schema's title.
    pub fn resolve(&mut self, schema: &Value) -> Result<Arc<EntityDef>, SchemaError> {
        let definitions = definitions_of(schema);
        let def = self.build(schema, &definitions)?;
        Ok(self.register(def))
    }

    fn build(&mut self, schema: &Value, definitions: &Map<String, Value>) -> Result<EntityDef, SchemaError> {
        let required = required_of(schema);
        let mut def = EntityDef::new(title_of(schema));

        for (name, info) in properties_of(schema) {
            if name == "id" || name == "type" {
                continue;
            }
            let ty = self.field_type(&name, &info, definitions)?;
            let mut field = FieldDef::new(name.clone(), ty);
            field.required = required.contains(&name);
            field.default = info.get("default").filter(|d| !d.is_null()).cloned();
            field.description = info
                .get("description")
                .and_then(Value::as_str)
                .map(str::to_string);
            field.embed = info.get("embed").and_then(Value::as_bool).unwrap_or(true);
            def.push(field);
        }

        Ok(def)
    }

    fn field_type(
        &mut self,
        name: &str,
        info: &Value,
        definitions: &Map<String, Value>,
    ) -> Result<FieldType, SchemaError> {
        let Some(json_type) = info.get("type").and_then(Value::as_str) else {
            let reference = info
                .get("$ref")
                .or_else(|| info.get("allOf").and_then(|a| a.get(0)).and_then(|r| r.get("$ref")))
                .and_then(Value::as_str);
            return match reference {
                Some(reference) => self.resolve_ref(reference, definitions),
                None if info.get("enum").is_some() => Ok(FieldType::Enum(enum_from(name, info))),
                None => Ok(FieldType::String),
            };
        };

        match json_type {
            "string" if info.get("enum").is_some() => {
                let def = enum_from(name, info);
                self.register_enum(def.clone());
                Ok(FieldType::Enum(def))
            }
            "string" => Ok(FieldType::String),
            "integer" => Ok(FieldType::Integer),
            "number" => Ok(FieldType::Number),
            "boolean" => Ok(FieldType::Boolean),
            "array" => {
                let items = info.get("items").cloned().unwrap_or(Value::Null);
                let inner = if items.is_object() {
                    self.field_type(name, &items, definitions)?
                } else {
                    FieldType::Any
                };
                Ok(FieldType::list(inner))
            }
            "object" if is_reference(info) => Ok(FieldType::entity(
                info.get("title")
                    .and_then(Value::as_str)
                    .map(str::to_lowercase)
                    .unwrap_or_else(|| "entity".to_string()),
            )),
            "object" | "null" => Ok(FieldType::Any),
            other => Err(SchemaError::UnsupportedType {
                field: name.to_string(),
                ty: other.to_string(),
            }),
        }
    }

    fn resolve_ref(
        &mut self,
        reference: &str,
        definitions: &Map<String, Value>,
    ) -> Result<FieldType, SchemaError> {
        let ref_name = reference.rsplit('/').next().unwrap_or(reference);

        let Some(definition) = definitions.get(ref_name) else {
            if let Some(def) = self.enums.get(ref_name) {
                return Ok(FieldType::Enum(def.clone()));
            }
            if self.entities.contains_key(ref_name) {
                return Ok(FieldType::object(ref_name, None));
            }
            return Err(SchemaError::UnresolvedRef(reference.to_string()));
        };

        if definition.get("enum").is_some() {
            let def = enum_from(ref_name, definition);
            self.register_enum(def.clone());
            return Ok(FieldType::Enum(def));
        }

        if !self.resolving.insert(ref_name.to_string()) {
            tracing::debug!("Recursive reference to {}", ref_name);
            return Ok(FieldType::object(ref_name, None));
        }
        let built = self.build(definition, definitions);
        self.resolving.remove(ref_name);

        let mut nested = built?;
        if nested.title == "Entity" {
            nested.title = ref_name.to_string();
        }
        self.entities
            .insert(ref_name.to_string(), Arc::new(nested));
        Ok(FieldType::object(ref_name, None))
    }
}

impl EntityDef {
    /// Reconstruct a definition from a JSON Schema
    pub fn from_json_schema(schema: &Value) -> Result<Self, SchemaError> {
        let mut registry = SchemaRegistry::new();
        let def = registry.resolve(schema)?;
        Ok(def.as_ref().clone())
    }
}

/// An object schema whose only properties are `id` and `type`
fn is_reference(info: &Value) -> bool {
    info.get("properties")
        .and_then(Value::as_object)
        .map(|p| p.len() == 2 && p.contains_key("id") && p.contains_key("type"))
        .unwrap_or(false)
}

fn enum_from(name: &str, info: &Value) -> EnumDef {
    let title = info
        .get("title")
        .and_then(Value::as_str)
        .unwrap_or(name)
        .to_string();
    let members: Vec<String> = info
        .get("enum")
        .and_then(Value::as_array)
        .map(|m| {
            m.iter()
                .map(|v| match v {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                })
                .collect()
        })
        .unwrap_or_default();
    EnumDef::new(title, members)
}
