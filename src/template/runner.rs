use super::{Llm, LlmError, MockLlm, Template};
use crate::entity::Entity;
use crate::error::{PxError, Result};
use crate::schema::{self, create_entities};
use minijinja::{context, Environment};
use rand::seq::IndexedRandom;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Instant;

/// Default retry budget of a run
pub const DEFAULT_RETRIES: u32 = 3;

/// Measurements of one run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Metrics {
    /// Generation attempts, including the successful one
    pub attempts: u32,
    pub prompt_chars: usize,
    pub response_chars: usize,
    pub elapsed_ms: u64,
}

/// Result of a successful run
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    /// Text returned by the model
    pub raw: String,
    /// Parsed output; the raw text as a JSON string when the template has no output schema
    pub content: Value,
    /// Entities built from the output schema
    pub entities: Vec<Entity>,
    pub metrics: Metrics,
}

/// One line of the format instructions
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FormatField {
    pub name: String,
    pub type_name: String,
    pub required: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
}

/// Renders templates and runs them against a model
pub struct TemplateRunner {
    llm: Arc<dyn Llm>,
    retries: u32,
    env: Environment<'static>,
}

impl TemplateRunner {
    pub fn new(llm: Arc<dyn Llm>) -> Self {
        Self {
            llm,
            retries: DEFAULT_RETRIES,
            env: Environment::new(),
        }
    }

    /// Runner backed by [`MockLlm`]
    pub fn mock() -> Self {
        Self::new(Arc::new(MockLlm::new()))
    }

    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    pub fn retries(&self) -> u32 {
        self.retries
    }

    /// Input form of an entity: its JSON without `id` and `type`
    pub fn entity_input(entity: &Entity) -> Value {
        match entity.to_value() {
            Value::Object(mut map) => {
                map.remove("id");
                map.remove("type");
                Value::Object(map)
            }
            other => other,
        }
    }

    /// Input form of a list of entities
    pub fn entities_input(entities: &[Entity]) -> Value {
        Value::Array(entities.iter().map(Self::entity_input).collect())
    }

    /// The full prompt for an input
    pub fn render(&self, template: &Template, input: &Value) -> Result<String> {
        let input_block = self
            .env
            .render_str(&template.input_template, context! { input => prompt_text(input) })?;
        let output_block = self
            .env
            .render_str(&template.output_template, context! { output => "" })?;

        Ok(self.env.render_str(
            &template.template,
            context! {
                instructions => template.instructions,
                format => self.render_format(template)?,
                examples => self.render_examples(template)?,
                input => input_block,
                output => output_block,
            },
        )?)
    }

    /// Format instructions describing the output schema; empty without one
    pub fn render_format(&self, template: &Template) -> Result<String> {
        let Some(output) = &template.output else {
            return Ok(String::new());
        };
        let schema = output.schema();
        Ok(self.env.render_str(
            &template.format_template,
            context! {
                list_output => schema::is_list(&schema),
                fields => format_fields(&schema),
            },
        )?)
    }

    /// A random sample of `num_examples` examples; empty without examples
    pub fn render_examples(&self, template: &Template) -> Result<String> {
        if template.examples.is_empty() || template.num_examples == 0 {
            return Ok(String::new());
        }

        let sample = template
            .examples
            .choose_multiple(&mut rand::rng(), template.num_examples);
        let mut rendered = Vec::with_capacity(template.num_examples);
        for example in sample {
            rendered.push(self.env.render_str(
                &template.example_template,
                context! {
                    input => prompt_text(&example.input),
                    output => prompt_text(&example.output),
                },
            )?);
        }
        Ok(rendered.join("\n"))
    }

    /// Interpret raw model output through the template's output schema
    pub fn process(template: &Template, raw: &str) -> Result<(Value, Vec<Entity>)> {
        let Some(output) = &template.output else {
            return Ok((Value::String(raw.to_string()), Vec::new()));
        };
        let content: Value = serde_json::from_str(raw.trim())
            .map_err(|e| PxError::json(e, "Model output is not valid JSON"))?;
        let entities = create_entities(&output.schema(), content.clone())?;
        Ok((content, entities))
    }

    /// Run the template with the configured model
    pub fn forward(&self, template: &Template, input: &Value) -> Result<Response> {
        self.run(self.llm.as_ref(), template, input)
    }

    /// Run the template against a mock model that fabricates schema-conforming output
    pub fn dry_run(&self, template: &Template, input: &Value) -> Result<Response> {
        let llm = match &template.output {
            Some(output) => MockLlm::for_schema(output.schema()),
            None => MockLlm::new(),
        };
        tracing::debug!("Dry run of {}", template.label());
        self.run(&llm, template, input)
    }

    fn run(&self, llm: &dyn Llm, template: &Template, input: &Value) -> Result<Response> {
        let started = Instant::now();
        let prompt = self.render(template, input)?;
        tracing::debug!("Prompt for {}:\n{}", template.label(), prompt);

        for attempt in 1..=self.retries {
            let raw = match llm.generate(&prompt) {
                Ok(raw) => raw,
                Err(LlmError::RateLimited(message)) => {
                    tracing::warn!(
                        "Hit rate limit for {} (attempt {}/{}): {}",
                        template.label(),
                        attempt,
                        self.retries,
                        message
                    );
                    continue;
                }
                Err(e) => return Err(e.into()),
            };
            tracing::debug!("Output of {}: {}", template.label(), raw);

            match Self::process(template, &raw) {
                Ok((content, entities)) => {
                    let metrics = Metrics {
                        attempts: attempt,
                        prompt_chars: prompt.chars().count(),
                        response_chars: raw.chars().count(),
                        elapsed_ms: started.elapsed().as_millis() as u64,
                    };
                    tracing::info!(
                        "{} succeeded after {} attempt(s) in {}ms",
                        template.label(),
                        metrics.attempts,
                        metrics.elapsed_ms
                    );
                    return Ok(Response {
                        raw,
                        content,
                        entities,
                        metrics,
                    });
                }
                Err(e @ (PxError::Json { .. } | PxError::Validation { .. })) => {
                    tracing::warn!(
                        "Output of {} rejected (attempt {}/{}): {}",
                        template.label(),
                        attempt,
                        self.retries,
                        e
                    );
                }
                Err(e) => return Err(e),
            }
        }

        let error = PxError::MaxRetriesExceeded(format!(
            "{} failed to forward {} after {} attempts",
            template.label(),
            prompt_text(input),
            self.retries
        ));
        tracing::error!("{}", error);
        Err(error)
    }
}

/// Text of a value inside a prompt: strings verbatim, anything else as JSON
fn prompt_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => "{}".to_string(),
        other => other.to_string(),
    }
}

/// Describe the fields of an (array of) object schema for the format instructions
pub fn format_fields(schema: &Value) -> Vec<FormatField> {
    let definitions = schema::definitions_of(schema);
    let required = schema::required_of(schema);

    schema::properties_of(schema)
        .iter()
        .filter(|(name, _)| name.as_str() != "id" && name.as_str() != "type")
        .map(|(name, property)| format_field(name, property, &definitions, &required))
        .collect()
}

fn format_field(
    name: &str,
    property: &Value,
    definitions: &Map<String, Value>,
    required: &[String],
) -> FormatField {
    let resolved = resolve(property, definitions);
    let mut options = None;

    let type_name = match resolved.get("type").and_then(Value::as_str) {
        Some("array") => {
            let items = resolve(property.get("items").unwrap_or(&Value::Null), definitions);
            if let Some(members) = enum_members(items) {
                options = Some(format!("Select any relevant options from: {}", members));
            }
            match items.get("type").and_then(Value::as_str) {
                Some(item_type) => format!("{}[]", item_type),
                None => format!("{}[]", title(items).unwrap_or("any")),
            }
        }
        Some(ty) => {
            if let Some(members) = enum_members(resolved) {
                options = Some(format!("Select only one option: {}", members));
            }
            ty.to_string()
        }
        None => match enum_members(resolved) {
            Some(members) => {
                options = Some(format!("Select only one option: {}", members));
                "string".to_string()
            }
            None => title(resolved).unwrap_or("any").to_string(),
        },
    };

    let description = [
        property.get("description").and_then(Value::as_str),
        options.as_deref(),
    ]
    .into_iter()
    .flatten()
    .collect::<Vec<_>>()
    .join(" ");

    FormatField {
        name: name.to_string(),
        type_name,
        required: required.iter().any(|r| r == name),
        description: (!description.is_empty()).then_some(description),
        default: property.get("default").cloned(),
    }
}

/// Follow `$ref` / `allOf[0].$ref` into the definitions
fn resolve<'a>(property: &'a Value, definitions: &'a Map<String, Value>) -> &'a Value {
    property
        .get("$ref")
        .or_else(|| property.get("allOf").and_then(|a| a.get(0)).and_then(|r| r.get("$ref")))
        .and_then(Value::as_str)
        .and_then(|r| definitions.get(r.rsplit('/').next().unwrap_or(r)))
        .unwrap_or(property)
}

fn enum_members(schema: &Value) -> Option<String> {
    let members = schema.get("enum")?.as_array()?;
    Some(
        members
            .iter()
            .map(|m| m.as_str().map(str::to_string).unwrap_or_else(|| m.to_string()))
            .collect::<Vec<_>>()
            .join(", "),
    )
}

fn title(schema: &Value) -> Option<&str> {
    schema.get("title").and_then(Value::as_str)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::{EntityDef, EnumDef, FieldDef, FieldType};
    use crate::template::OutputSchema;
    use serde_json::json;

    fn task_def() -> EntityDef {
        EntityDef::new("Task")
            .with_field(FieldDef::new("title", FieldType::String).required().describe("Short title"))
            .required("status", FieldType::Enum(EnumDef::new("Status", ["open", "done"])))
            .field("labels", FieldType::list(FieldType::Enum(EnumDef::new("Label", ["bug", "feature"]))))
    }

    fn task_template() -> Template {
        Template::new("Extract the task.")
            .named("tasks")
            .with_output(OutputSchema::Object(task_def()))
    }

    #[test]
    fn test_format_fields() {
        let fields = format_fields(&task_def().json_schema());
        assert_eq!(fields.len(), 3);

        assert_eq!(fields[0].name, "title");
        assert_eq!(fields[0].type_name, "string");
        assert!(fields[0].required);
        assert_eq!(fields[0].description.as_deref(), Some("Short title"));

        assert_eq!(
            fields[1].description.as_deref(),
            Some("Select only one option: open, done")
        );
        assert_eq!(fields[2].type_name, "string[]");
        assert!(!fields[2].required);
        assert_eq!(
            fields[2].description.as_deref(),
            Some("Select any relevant options from: bug, feature")
        );
    }

    #[test]
    fn test_render_includes_every_block() {
        let runner = TemplateRunner::mock();
        let template = task_template().with_example(json!("fix login"), json!({"title": "Fix login", "status": "open"}));
        let prompt = runner.render(&template, &json!("ship the release")).unwrap();

        assert!(prompt.starts_with("INSTRUCTIONS\n---\nExtract the task."));
        assert!(prompt.contains("FORMAT INSTRUCTIONS"));
        assert!(prompt.contains("Return the output as a valid JSON object"));
        assert!(prompt.contains("- title (type: string, required: True): Short title"));
        assert!(prompt.contains("- labels (type: string[], required: False)"));
        assert!(prompt.contains("EXAMPLES"));
        assert!(prompt.contains("fix login"));
        assert!(prompt.contains("INPUT\n---\nship the release\nEND_INPUT"));
        assert!(prompt.contains("OUTPUT\n---"));
    }

    #[test]
    fn test_chat_preset_skips_format_and_examples() {
        let runner = TemplateRunner::mock();
        let prompt = runner.render(&Template::chat(), &json!("hello")).unwrap();
        assert_eq!(
            prompt,
            "You are a helpful assistant.\nINPUT\n---\nhello\nEND_INPUT\nOUTPUT\n---\n"
        );
        assert!(!prompt.contains("FORMAT INSTRUCTIONS"));
        assert!(!prompt.contains("EXAMPLES"));
    }

    #[test]
    fn test_list_output_format() {
        let runner = TemplateRunner::mock();
        let template = Template::new("List tasks.").with_output(OutputSchema::List(task_def()));
        let format = runner.render_format(&template).unwrap();
        assert!(format.contains("Return a list of valid JSON objects"));
    }

    #[test]
    fn test_no_output_schema_returns_raw_text() {
        let llm = MockLlm::scripted([Ok("just words".to_string())]);
        let runner = TemplateRunner::new(Arc::new(llm));
        let response = runner.forward(&Template::new("Chat."), &json!("hi")).unwrap();
        assert_eq!(response.content, json!("just words"));
        assert!(response.entities.is_empty());
    }

    #[test]
    fn test_retries_then_succeeds() {
        let llm = MockLlm::scripted([
            Ok("not json".to_string()),
            Err(LlmError::RateLimited("429".to_string())),
            Ok(r#"{"title": "Ship", "status": "DONE"}"#.to_string()),
        ]);
        let runner = TemplateRunner::new(Arc::new(llm));
        let response = runner.forward(&task_template(), &json!("ship it")).unwrap();

        assert_eq!(response.metrics.attempts, 3);
        assert_eq!(response.entities.len(), 1);
        assert_eq!(response.entities[0].get("status"), Some(&json!("done")));
        assert_eq!(response.entities[0].entity_type, "Task");
    }

    #[test]
    fn test_max_retries_exceeded() {
        let llm = MockLlm::scripted([
            Ok(r#"{"status": "open"}"#.to_string()),
            Ok("{".to_string()),
            Err(LlmError::RateLimited("429".to_string())),
            Ok(r#"{"title": "late", "status": "open"}"#.to_string()),
        ]);
        let runner = TemplateRunner::new(Arc::new(llm));
        let result = runner.forward(&task_template(), &json!("x"));
        assert!(matches!(result, Err(PxError::MaxRetriesExceeded(_))));
    }

    #[test]
    fn test_backend_errors_are_fatal() {
        let llm = MockLlm::scripted([Err(LlmError::Backend("boom".to_string()))]);
        let runner = TemplateRunner::new(Arc::new(llm));
        let result = runner.forward(&task_template(), &json!("x"));
        assert!(matches!(result, Err(PxError::Llm(LlmError::Backend(_)))));
    }

    #[test]
    fn test_dry_run_produces_valid_entities() {
        let runner = TemplateRunner::mock().with_retries(1);
        let response = runner
            .dry_run(&Template::new("List.").with_output(OutputSchema::List(task_def())), &Value::Null)
            .unwrap();
        assert_eq!(response.entities.len(), 1);
        assert_eq!(response.entities[0].get("status"), Some(&json!("open")));
    }

    #[test]
    fn test_entity_input_strips_identity() {
        let entity = Entity::with_id("e1", "note").with("text", json!("hello"));
        assert_eq!(TemplateRunner::entity_input(&entity), json!({"text": "hello"}));
    }
}
