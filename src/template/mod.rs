//! Prompt templates and validated generation
//!
//! A [`Template`] describes a task: instructions, worked examples and the schemas of
//! its input and output. [`TemplateRunner`] renders it into a prompt, asks an [`Llm`]
//! for a completion and turns the JSON answer into entities, retrying when the answer
//! does not parse or validate.

mod llm;
mod runner;

pub use llm::{Llm, LlmError, MockLlm};
pub use runner::{FormatField, Metrics, Response, TemplateRunner};

use crate::entity::{new_id, EntityDef, FieldDef, FieldType, Model};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

pub const DEFAULT_TEMPLATE: &str = "INSTRUCTIONS
---
{{ instructions }}
{{ format }}
{{ examples }}
{{ input }}
{{ output }}";

pub const CHAT_INSTRUCTIONS: &str = "You are a helpful assistant.";

pub const CHAT_TEMPLATE: &str = "{{ instructions }}
{{ input }}
{{ output }}";

pub const DEFAULT_INPUT_TEMPLATE: &str = "INPUT
---
{{ input }}
END_INPUT";

pub const DEFAULT_OUTPUT_TEMPLATE: &str = "OUTPUT
---
{{ output }}";

pub const DEFAULT_EXAMPLE_TEMPLATE: &str = "EXAMPLES
---
INPUT
---
{{ input }}
END_INPUT
OUTPUT
---
{{ output }}
END_EXAMPLES";

pub const DEFAULT_FORMAT_TEMPLATE: &str = "FORMAT INSTRUCTIONS
---
{% if list_output -%}
Return a list of valid JSON objects with the fields described below.
{%- else -%}
Return the output as a valid JSON object with the fields described below.
{%- endif %}
{% for field in fields -%}
- {{ field.name }} (type: {{ field.type_name }}, required: {% if field.required %}True{% else %}False{% endif %}){% if field.description %}: {{ field.description }}{% endif %}
{% endfor %}
Make sure to use double quotes and avoid trailing commas!
Ensure any required fields are set, but you can use the default value
if it's defined and you are unsure what to use.
If you are unsure about any optional fields use `null` or the default value,
but try your best to fill them out.
END_FORMAT_INSTRUCTIONS";

/// Shape of a template's output
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "Value", into = "Value")]
pub enum OutputSchema {
    /// A single entity
    Object(EntityDef),
    /// A list of entities of one definition
    List(EntityDef),
    /// Any JSON Schema
    Raw(Value),
}

impl OutputSchema {
    /// JSON Schema of the output
    pub fn schema(&self) -> Value {
        match self {
            Self::Object(def) => def.json_schema(),
            Self::List(def) => {
                let mut items = def.json_schema();
                // references inside the items resolve against the root
                let defs = items
                    .as_object_mut()
                    .and_then(|m| m.remove("$defs"))
                    .unwrap_or_else(|| json!({}));
                json!({
                    "title": def.title,
                    "type": "array",
                    "items": items,
                    "$defs": defs,
                })
            }
            Self::Raw(schema) => schema.clone(),
        }
    }
}

impl From<Value> for OutputSchema {
    fn from(schema: Value) -> Self {
        Self::Raw(schema)
    }
}

impl From<OutputSchema> for Value {
    fn from(schema: OutputSchema) -> Self {
        schema.schema()
    }
}

/// Input/output pair shown to the model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Example {
    pub input: Value,
    pub output: Value,
}

impl Example {
    pub fn new(input: Value, output: Value) -> Self {
        Self { input, output }
    }
}

fn template_type() -> String {
    "template".to_string()
}

fn default_num_examples() -> usize {
    1
}

fn default_template() -> String {
    DEFAULT_TEMPLATE.to_string()
}

fn default_input_template() -> String {
    DEFAULT_INPUT_TEMPLATE.to_string()
}

fn default_output_template() -> String {
    DEFAULT_OUTPUT_TEMPLATE.to_string()
}

fn default_example_template() -> String {
    DEFAULT_EXAMPLE_TEMPLATE.to_string()
}

fn default_format_template() -> String {
    DEFAULT_FORMAT_TEMPLATE.to_string()
}

/// A prompt template; stored as an entity of type `template`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Template {
    #[serde(default = "new_id")]
    pub id: String,
    #[serde(rename = "type", default = "template_type")]
    pub entity_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default)]
    pub instructions: String,
    #[serde(default = "default_num_examples")]
    pub num_examples: usize,
    #[serde(default)]
    pub examples: Vec<Example>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<OutputSchema>,
    #[serde(default = "default_template")]
    pub template: String,
    #[serde(default = "default_input_template")]
    pub input_template: String,
    #[serde(default = "default_output_template")]
    pub output_template: String,
    #[serde(default = "default_example_template")]
    pub example_template: String,
    #[serde(default = "default_format_template")]
    pub format_template: String,
}

impl Default for Template {
    fn default() -> Self {
        Self {
            id: new_id(),
            entity_type: template_type(),
            name: None,
            instructions: String::new(),
            num_examples: default_num_examples(),
            examples: Vec::new(),
            input: None,
            output: None,
            template: default_template(),
            input_template: default_input_template(),
            output_template: default_output_template(),
            example_template: default_example_template(),
            format_template: default_format_template(),
        }
    }
}

impl Template {
    /// Create a template; the instructions are dedented
    pub fn new(instructions: &str) -> Self {
        Self {
            instructions: dedent(instructions),
            ..Self::default()
        }
    }

    /// Chat preset: instructions, input and output blocks without format or examples
    pub fn chat() -> Self {
        Self {
            template: CHAT_TEMPLATE.to_string(),
            ..Self::new(CHAT_INSTRUCTIONS)
        }
        .named("chat")
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_output(mut self, output: OutputSchema) -> Self {
        self.output = Some(output);
        self
    }

    pub fn with_input(mut self, schema: Value) -> Self {
        self.input = Some(schema);
        self
    }

    pub fn with_example(mut self, input: Value, output: Value) -> Self {
        self.examples.push(Example::new(input, output));
        self
    }

    pub fn with_num_examples(mut self, num_examples: usize) -> Self {
        self.num_examples = num_examples;
        self
    }

    /// Name used in logs and errors
    pub fn label(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.id)
    }
}

impl Model for Template {
    fn definition() -> EntityDef {
        let text = |name: &str| FieldDef::new(name, FieldType::String).no_embed();
        EntityDef::new("Template")
            .field("name", FieldType::String)
            .required("instructions", FieldType::String)
            .with_field(
                FieldDef::new("num_examples", FieldType::Integer).default_value(json!(1)),
            )
            .with_field(FieldDef::new("examples", FieldType::list(FieldType::Any)).no_embed())
            .field("input", FieldType::Any)
            .field("output", FieldType::Any)
            .with_field(text("template"))
            .with_field(text("input_template"))
            .with_field(text("output_template"))
            .with_field(text("example_template"))
            .with_field(text("format_template"))
    }
}

/// Remove the indentation common to all non-blank lines, and surrounding blank lines
pub fn dedent(text: &str) -> String {
    let indent = text
        .lines()
        .filter(|l| !l.trim().is_empty())
        .map(|l| l.len() - l.trim_start().len())
        .min()
        .unwrap_or(0);

    let lines: Vec<&str> = text
        .lines()
        .map(|l| l.get(indent..).unwrap_or_else(|| l.trim_start()))
        .collect();
    lines.join("\n").trim_matches('\n').trim_end().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::Entity;

    #[test]
    fn test_dedent() {
        let text = "
            Summarize the text.
              Keep it short.
        ";
        assert_eq!(dedent(text), "Summarize the text.\n  Keep it short.");
        assert_eq!(dedent("plain"), "plain");
    }

    #[test]
    fn test_list_output_schema_hoists_definitions() {
        let def = EntityDef::new("Item").field("extra", FieldType::object("Extra", None));
        let schema = OutputSchema::List(def).schema();
        assert_eq!(schema["type"], json!("array"));
        assert_eq!(schema["items"]["title"], json!("Item"));
        assert!(schema["$defs"].get("Extra").is_some());
        assert!(schema["items"].get("$defs").is_none());
    }

    #[test]
    fn test_template_round_trips_through_entity() {
        let template = Template::new("  Write a poem")
            .named("poet")
            .with_output(OutputSchema::Object(
                EntityDef::new("Poem").required("text", FieldType::String),
            ))
            .with_example(json!("sea"), json!({"text": "waves"}));

        let entity = Entity::from_model(&template).unwrap();
        assert_eq!(entity.entity_type, "template");
        assert_eq!(entity.id, template.id);

        let back: Template = entity.into_model().unwrap();
        assert_eq!(back.name.as_deref(), Some("poet"));
        assert_eq!(back.instructions, "Write a poem");
        assert_eq!(back.examples.len(), 1);
        let schema = back.output.unwrap().schema();
        assert_eq!(schema["title"], json!("Poem"));
    }
}
