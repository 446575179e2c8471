//! Generation backends

use serde_json::{Map, Value};
use std::collections::VecDeque;
use std::sync::Mutex;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum LlmError {
    /// The backend asked us to slow down; the call may be retried
    #[error("Rate limited: {0}")]
    RateLimited(String),

    #[error("Backend failure: {0}")]
    Backend(String),
}

/// Text generation backend
pub trait Llm: Send + Sync {
    /// Complete a prompt, returning the raw generated text
    fn generate(&self, prompt: &str) -> Result<String, LlmError>;
}

/// Offline backend that replays scripted responses and otherwise fabricates output
/// satisfying its schema
#[derive(Debug, Default)]
pub struct MockLlm {
    responses: Mutex<VecDeque<Result<String, LlmError>>>,
    schema: Option<Value>,
}

impl MockLlm {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fabricate JSON matching an output schema
    pub fn for_schema(schema: Value) -> Self {
        Self {
            responses: Mutex::default(),
            schema: Some(schema),
        }
    }

    /// Replay the given responses in order before falling back to fabrication
    pub fn scripted<I>(responses: I) -> Self
    where
        I: IntoIterator<Item = Result<String, LlmError>>,
    {
        Self {
            responses: Mutex::new(responses.into_iter().collect()),
            schema: None,
        }
    }

    pub fn with_schema(mut self, schema: Value) -> Self {
        self.schema = Some(schema);
        self
    }
}

impl Llm for MockLlm {
    fn generate(&self, prompt: &str) -> Result<String, LlmError> {
        let scripted = self
            .responses
            .lock()
            .map_err(|_| LlmError::Backend("mock response queue poisoned".to_string()))?
            .pop_front();
        if let Some(response) = scripted {
            return response;
        }

        match &self.schema {
            Some(schema) => {
                let definitions = crate::schema::definitions_of(schema);
                Ok(fabricate(schema, "value", &definitions).to_string())
            }
            None => Ok(format!("mock response to {} characters", prompt.len())),
        }
    }
}

/// A value that validates against `schema`
fn fabricate(schema: &Value, name: &str, definitions: &Map<String, Value>) -> Value {
    fabricate_in(schema, name, definitions, &mut Vec::new()).unwrap_or(Value::Null)
}

/// `None` when `schema` refers back to a definition already being fabricated
fn fabricate_in(
    schema: &Value,
    name: &str,
    definitions: &Map<String, Value>,
    active: &mut Vec<String>,
) -> Option<Value> {
    if let Some(reference) = schema
        .get("$ref")
        .or_else(|| schema.get("allOf").and_then(|a| a.get(0)).and_then(|r| r.get("$ref")))
        .and_then(Value::as_str)
    {
        let ref_name = reference.rsplit('/').next().unwrap_or(reference);
        if active.iter().any(|a| a == ref_name) {
            return None;
        }
        let def = definitions.get(ref_name)?;
        active.push(ref_name.to_string());
        let value = fabricate_in(def, name, definitions, active);
        active.pop();
        return value;
    }

    if let Some(first) = schema
        .get("enum")
        .and_then(Value::as_array)
        .and_then(|m| m.first())
    {
        return Some(first.clone());
    }
    if let Some(default) = schema.get("default") {
        return Some(default.clone());
    }

    let value = match schema.get("type").and_then(Value::as_str) {
        Some("string") => Value::String(format!("{} text", name)),
        Some("integer") => Value::from(0),
        Some("number") => Value::from(0.5),
        Some("boolean") => Value::Bool(false),
        Some("array") => {
            let items = schema.get("items").cloned().unwrap_or(Value::Null);
            Value::Array(fabricate_in(&items, name, definitions, active).into_iter().collect())
        }
        Some("object") => {
            let mut object = Map::new();
            if let Some(properties) = schema.get("properties").and_then(Value::as_object) {
                for (key, property) in properties {
                    if key == "id" || key == "type" {
                        continue;
                    }
                    if let Some(value) = fabricate_in(property, key, definitions, active) {
                        object.insert(key.clone(), value);
                    }
                }
            }
            Value::Object(object)
        }
        _ => Value::Null,
    };
    Some(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::{EntityDef, EnumDef, FieldType};
    use crate::schema::validate;
    use serde_json::json;

    #[test]
    fn test_scripted_responses_come_first() {
        let llm = MockLlm::scripted([
            Err(LlmError::RateLimited("slow down".to_string())),
            Ok("{}".to_string()),
        ]);
        assert!(matches!(llm.generate("p"), Err(LlmError::RateLimited(_))));
        assert_eq!(llm.generate("p").unwrap(), "{}");
        assert!(llm.generate("p").unwrap().starts_with("mock response"));
    }

    #[test]
    fn test_fabricated_output_validates() {
        let def = EntityDef::new("Task")
            .required("title", FieldType::String)
            .required("priority", FieldType::Integer)
            .required("status", FieldType::Enum(EnumDef::new("Status", ["open", "done"])))
            .field("tags", FieldType::list(FieldType::String))
            .field("owner", FieldType::entity("user"));
        let schema = def.json_schema();

        let llm = MockLlm::for_schema(schema.clone());
        let output: Value = serde_json::from_str(&llm.generate("prompt").unwrap()).unwrap();

        assert!(validate(&schema, &output).is_ok());
        assert_eq!(output["status"], json!("open"));
        assert_eq!(output["tags"], json!(["tags text"]));
    }

    #[test]
    fn test_fabricating_recursive_schema_stops_at_the_cycle() {
        let schema = json!({
            "title": "Node",
            "type": "object",
            "properties": {
                "name": {"type": "string"},
                "child": {"$ref": "#/$defs/Tree"}
            },
            "$defs": {
                "Tree": {
                    "type": "object",
                    "properties": {
                        "label": {"type": "string"},
                        "next": {"$ref": "#/$defs/Tree"}
                    }
                }
            }
        });
        let output: Value =
            serde_json::from_str(&MockLlm::for_schema(schema.clone()).generate("").unwrap())
                .unwrap();
        assert_eq!(
            output,
            json!({"name": "name text", "child": {"label": "label text"}})
        );
        assert!(validate(&schema, &output).is_ok());
    }

    #[test]
    fn test_fabricated_list_output() {
        let schema = json!({
            "type": "array",
            "items": {"type": "object", "properties": {"name": {"type": "string"}}}
        });
        let output: Value =
            serde_json::from_str(&MockLlm::for_schema(schema).generate("").unwrap()).unwrap();
        assert_eq!(output, json!([{"name": "name text"}]));
    }
}
