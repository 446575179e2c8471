//! Definition → JSON Schema

use super::SchemaError;
use crate::entity::{EntityDef, FieldDef, FieldType};
use serde_json::{json, Map, Value};

impl EntityDef {
    /// Generate the JSON Schema for this definition.
    ///
    /// Fields whose schema cannot be generated are logged and left out; the rest of the
    /// schema is still produced.
    pub fn json_schema(&self) -> Value {
        let mut properties = Map::new();
        let mut definitions = Map::new();
        let mut required = Vec::new();

        properties.insert("id".to_string(), json!({"type": "string"}));
        properties.insert("type".to_string(), json!({"type": "string"}));

        for field in &self.fields {
            match field_schema(field) {
                Ok((schema, defs)) => {
                    properties.insert(field.name.clone(), schema);
                    for (name, def) in defs {
                        definitions.entry(name).or_insert(def);
                    }
                }
                Err(e) => {
                    tracing::error!(
                        "Schema generation failed for {}.{}: {}",
                        self.title,
                        field.name,
                        e
                    );
                    continue;
                }
            }

            if field.required {
                required.push(Value::String(field.name.clone()));
            }
        }

        json!({
            "title": self.title,
            "type": "object",
            "properties": properties,
            "$defs": definitions,
            "required": required,
        })
    }
}

/// Schema for one field, plus any definitions it references
pub(crate) fn field_schema(field: &FieldDef) -> Result<(Value, Map<String, Value>), SchemaError> {
    let mut definitions = Map::new();

    let mut schema = match &field.ty {
        FieldType::List { items } => {
            if matches!(items.as_ref(), FieldType::List { .. }) {
                return Err(SchemaError::NestedList(field.name.clone()));
            }
            let inner = type_schema(&field.name, items, &mut definitions)?;
            json!({"type": "array", "items": inner})
        }
        other => type_schema(&field.name, other, &mut definitions)?,
    };

    if let Value::Object(map) = &mut schema {
        if let Some(default) = field.default.as_ref().filter(|d| !d.is_null()) {
            map.insert("default".to_string(), default.clone());
        }
        if let Some(description) = &field.description {
            map.insert("description".to_string(), json!(description));
        }
        if !field.embed {
            map.insert("embed".to_string(), json!(false));
        }
    }

    Ok((schema, definitions))
}

fn type_schema(
    field: &str,
    ty: &FieldType,
    definitions: &mut Map<String, Value>,
) -> Result<Value, SchemaError> {
    let schema = match ty {
        FieldType::String => json!({"type": "string"}),
        FieldType::Integer => json!({"type": "integer"}),
        FieldType::Number => json!({"type": "number"}),
        FieldType::Boolean => json!({"type": "boolean"}),
        FieldType::Enum(def) => {
            if def.members.is_empty() {
                return Err(SchemaError::EmptyEnum(def.name.clone()));
            }
            json!({"type": "string", "enum": def.members})
        }
        FieldType::Entity { .. } => json!({
            "type": "object",
            "properties": {
                "id": {"type": "string"},
                "type": {"type": "string"},
            },
        }),
        FieldType::Object { name, default } => {
            if !definitions.contains_key(name) {
                let properties = match default {
                    Some(Value::Object(values)) => default_properties(values)?,
                    None | Some(Value::Null) => Map::new(),
                    Some(other) => {
                        return Err(SchemaError::InvalidDefault {
                            field: field.to_string(),
                            found: other.to_string(),
                        })
                    }
                };
                definitions.insert(
                    name.clone(),
                    json!({"type": "object", "title": name, "properties": properties}),
                );
            }
            json!({"$ref": format!("#/$defs/{}", name)})
        }
        FieldType::Any => json!({}),
        FieldType::List { .. } => return Err(SchemaError::NestedList(field.to_string())),
    };
    Ok(schema)
}

/// Property schemas inferred from the values of an object default
fn default_properties(values: &Map<String, Value>) -> Result<Map<String, Value>, SchemaError> {
    let mut properties = Map::new();
    let mut unused = Map::new();
    for (name, value) in values {
        let schema = match FieldType::infer(value) {
            FieldType::List { items } if matches!(*items, FieldType::List { .. }) => {
                json!({"type": "array"})
            }
            FieldType::List { items } => {
                json!({"type": "array", "items": type_schema(name, &items, &mut unused)?})
            }
            inferred => type_schema(name, &inferred, &mut unused)?,
        };
        properties.insert(name.clone(), schema);
    }
    Ok(properties)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::EnumDef;

    fn user_def() -> EntityDef {
        EntityDef::new("User")
            .required("name", FieldType::String)
            .required("age", FieldType::Integer)
    }

    #[test]
    fn test_primitive_schema() {
        let schema = user_def().json_schema();
        assert_eq!(schema["title"], "User");
        assert_eq!(schema["type"], "object");
        assert_eq!(schema["properties"]["name"], json!({"type": "string"}));
        assert_eq!(schema["properties"]["age"], json!({"type": "integer"}));
        assert_eq!(schema["properties"]["id"], json!({"type": "string"}));
        assert_eq!(schema["required"], json!(["name", "age"]));
    }

    #[test]
    fn test_enum_and_list_schema() {
        let tag = EnumDef::new("Tag", ["Work", "HOME"]);
        let def = EntityDef::new("Note")
            .field("tag", FieldType::Enum(tag.clone()))
            .field("tags", FieldType::list(FieldType::Enum(tag)));
        let schema = def.json_schema();

        assert_eq!(
            schema["properties"]["tag"],
            json!({"type": "string", "enum": ["work", "home"]})
        );
        assert_eq!(schema["properties"]["tags"]["type"], "array");
        assert_eq!(schema["properties"]["tags"]["items"]["enum"], json!(["work", "home"]));
    }

    #[test]
    fn test_entity_reference_is_collapsed() {
        let def = EntityDef::new("Post").field("author", FieldType::entity("user"));
        let schema = def.json_schema();
        let author = &schema["properties"]["author"];
        assert_eq!(author["type"], "object");
        assert_eq!(author["properties"]["id"]["type"], "string");
        assert_eq!(author["properties"]["type"]["type"], "string");
        assert!(author["properties"].get("name").is_none());
    }

    #[test]
    fn test_object_falls_back_to_definition() {
        let def = EntityDef::new("Order").field(
            "address",
            FieldType::object("Address", Some(json!({"street": "", "number": 1}))),
        );
        let schema = def.json_schema();

        assert_eq!(schema["properties"]["address"], json!({"$ref": "#/$defs/Address"}));
        let address = &schema["$defs"]["Address"];
        assert_eq!(address["properties"]["street"], json!({"type": "string"}));
        assert_eq!(address["properties"]["number"], json!({"type": "integer"}));
    }

    #[test]
    fn test_default_and_description_are_carried() {
        let def = EntityDef::new("Template").with_field(
            FieldDef::new("num_examples", FieldType::Integer)
                .default_value(json!(1))
                .describe("how many examples"),
        );
        let schema = def.json_schema();
        assert_eq!(schema["properties"]["num_examples"]["default"], 1);
        assert_eq!(
            schema["properties"]["num_examples"]["description"],
            "how many examples"
        );
    }

    #[test]
    fn test_bad_fields_are_skipped() {
        let def = EntityDef::new("Broken")
            .required("nested", FieldType::list(FieldType::list(FieldType::String)))
            .field("empty", FieldType::Enum(EnumDef::new("Nothing", Vec::<String>::new())))
            .field("blob", FieldType::object("Blob", Some(json!(3))))
            .required("ok", FieldType::Boolean);
        let schema = def.json_schema();

        let props = schema["properties"].as_object().unwrap();
        assert!(!props.contains_key("nested"));
        assert!(!props.contains_key("empty"));
        assert!(!props.contains_key("blob"));
        assert!(props.contains_key("ok"));
        assert_eq!(schema["required"], json!(["ok"]));
    }

    #[test]
    fn test_no_embed_annotation() {
        let def = EntityDef::new("Secret")
            .with_field(FieldDef::new("token", FieldType::String).no_embed());
        let schema = def.json_schema();
        assert_eq!(schema["properties"]["token"]["embed"], false);
    }
}
