//! Typed entity definitions
//!
//! An [`EntityDef`] is the statically known shape of an entity type: a title and an
//! ordered list of fields. JSON Schemas are generated from it and reconstructed into it.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Enumeration with lowercase member names
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnumDef {
    pub name: String,
    pub members: Vec<String>,
}

impl EnumDef {
    pub fn new<I, S>(name: impl Into<String>, members: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            name: name.into(),
            members: members
                .into_iter()
                .map(|m| m.as_ref().to_lowercase())
                .collect(),
        }
    }

    /// Map a raw value onto the lowercase member name it refers to.
    ///
    /// Matching is case-insensitive; values that name no member are returned unchanged
    /// so that schema validation reports them.
    pub fn normalize(&self, value: &Value) -> Value {
        match value {
            Value::String(s) => {
                let lower = s.to_lowercase();
                if self.members.contains(&lower) {
                    Value::String(lower)
                } else {
                    value.clone()
                }
            }
            _ => value.clone(),
        }
    }
}

/// Declared type of an entity field
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FieldType {
    String,
    Integer,
    Number,
    Boolean,
    Enum(EnumDef),
    /// Reference to another entity type, stored as `{id, type}`
    Entity { type_name: String },
    List { items: Box<FieldType> },
    /// Structured value described by a named definition
    Object {
        name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        default: Option<Value>,
    },
    /// Unconstrained value
    Any,
}

impl FieldType {
    pub fn entity(type_name: impl Into<String>) -> Self {
        Self::Entity {
            type_name: type_name.into(),
        }
    }

    pub fn list(items: FieldType) -> Self {
        Self::List {
            items: Box::new(items),
        }
    }

    pub fn object(name: impl Into<String>, default: Option<Value>) -> Self {
        Self::Object {
            name: name.into(),
            default,
        }
    }

    /// Whether values of this type reference another entity
    pub fn is_entity(&self) -> bool {
        matches!(self, Self::Entity { .. })
    }

    /// The enum definition, either direct or as the element of a list
    pub fn enum_def(&self) -> Option<&EnumDef> {
        match self {
            Self::Enum(def) => Some(def),
            Self::List { items } => match items.as_ref() {
                Self::Enum(def) => Some(def),
                _ => None,
            },
            _ => None,
        }
    }

    /// Infer a field type from an observed value
    pub fn infer(value: &Value) -> Self {
        match value {
            Value::String(_) => Self::String,
            Value::Bool(_) => Self::Boolean,
            Value::Number(n) if n.is_i64() || n.is_u64() => Self::Integer,
            Value::Number(_) => Self::Number,
            Value::Array(items) => {
                let mut kinds = items.iter().map(Self::infer);
                let first = kinds.next().unwrap_or(Self::Any);
                // nested lists are not representable and mixed lists stay unconstrained
                if matches!(first, Self::List { .. }) || kinds.any(|k| k != first) {
                    Self::list(Self::Any)
                } else {
                    Self::list(first)
                }
            }
            Value::Object(_) | Value::Null => Self::Any,
        }
    }

    /// Short human readable name, used in format instructions
    pub fn display_name(&self) -> String {
        match self {
            Self::String | Self::Enum(_) => "string".to_string(),
            Self::Integer => "integer".to_string(),
            Self::Number => "number".to_string(),
            Self::Boolean => "boolean".to_string(),
            Self::Entity { type_name } => type_name.clone(),
            Self::List { items } => format!("{}[]", items.display_name()),
            Self::Object { name, .. } => name.clone(),
            Self::Any => "any".to_string(),
        }
    }
}

/// A single field of an entity definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldDef {
    pub name: String,
    pub ty: FieldType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    #[serde(default)]
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Field records are only produced for fields with `embed` set
    #[serde(default = "default_embed")]
    pub embed: bool,
}

fn default_embed() -> bool {
    true
}

impl FieldDef {
    pub fn new(name: impl Into<String>, ty: FieldType) -> Self {
        Self {
            name: name.into(),
            ty,
            default: None,
            required: false,
            description: None,
            embed: true,
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn default_value(mut self, value: Value) -> Self {
        self.default = Some(value);
        self
    }

    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn no_embed(mut self) -> Self {
        self.embed = false;
        self
    }
}

/// Definition of an entity type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityDef {
    pub title: String,
    pub fields: Vec<FieldDef>,
}

impl EntityDef {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            fields: Vec::new(),
        }
    }

    /// Add an optional field
    pub fn field(self, name: impl Into<String>, ty: FieldType) -> Self {
        self.with_field(FieldDef::new(name, ty))
    }

    /// Add a required field
    pub fn required(self, name: impl Into<String>, ty: FieldType) -> Self {
        self.with_field(FieldDef::new(name, ty).required())
    }

    /// Add a fully specified field, replacing any field of the same name
    pub fn with_field(mut self, field: FieldDef) -> Self {
        self.push(field);
        self
    }

    pub fn push(&mut self, field: FieldDef) {
        if let Some(existing) = self.fields.iter_mut().find(|f| f.name == field.name) {
            *existing = field;
        } else {
            self.fields.push(field);
        }
    }

    /// Default `type` tag for entities of this definition
    pub fn type_name(&self) -> String {
        self.title.to_lowercase()
    }

    pub fn get(&self, name: &str) -> Option<&FieldDef> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn required_fields(&self) -> impl Iterator<Item = &FieldDef> {
        self.fields.iter().filter(|f| f.required)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_enum_members_are_lowercased() {
        let color = EnumDef::new("Color", ["RED", "Green"]);
        assert_eq!(color.members, vec!["red", "green"]);
        assert_eq!(color.normalize(&json!("GREEN")), json!("green"));
        assert_eq!(color.normalize(&json!("purple")), json!("purple"));
    }

    #[test]
    fn test_builder_replaces_duplicate_fields() {
        let def = EntityDef::new("User")
            .field("name", FieldType::String)
            .required("name", FieldType::String)
            .field("age", FieldType::Integer);

        assert_eq!(def.fields.len(), 2);
        assert!(def.get("name").unwrap().required);
        assert_eq!(def.type_name(), "user");
    }

    #[test]
    fn test_infer_types() {
        assert_eq!(FieldType::infer(&json!(3)), FieldType::Integer);
        assert_eq!(FieldType::infer(&json!(3.5)), FieldType::Number);
        assert_eq!(
            FieldType::infer(&json!(["a", "b"])),
            FieldType::list(FieldType::String)
        );
        assert_eq!(FieldType::infer(&json!({"a": 1})), FieldType::Any);
    }

    #[test]
    fn test_display_name() {
        let ty = FieldType::list(FieldType::Enum(EnumDef::new("Tag", ["a"])));
        assert_eq!(ty.display_name(), "string[]");
        assert_eq!(FieldType::entity("user").display_name(), "user");
    }
}
