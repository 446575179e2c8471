//! Application facade
//!
//! Opens the store of a project directory and hands out collections, including the
//! auxiliary `templates`, `history`, `logs` and `inbox` collections.

use crate::collection::{Collection, Query, QueryOptions, Subscription};
use crate::config::Config;
use crate::embedding::provider_from_config;
use crate::entity::Entity;
use crate::error::{PxError, Result};
use crate::store::{SqliteStore, VectorStore};
use crate::template::{Llm, MockLlm, Response, Template, TemplateRunner};
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub const TEMPLATES: &str = "templates";
pub const HISTORY: &str = "history";
pub const LOGS: &str = "logs";
pub const INBOX: &str = "inbox";
pub const SUBSCRIPTIONS: &str = "subscriptions";

/// File name of the store inside the database directory
pub const STORE_FILE: &str = "store.sqlite";

pub struct App {
    root: PathBuf,
    config: Config,
    store: Arc<dyn VectorStore>,
    runner: TemplateRunner,
}

impl App {
    /// Open the project at `root`, creating `<root>/.px/db` when needed
    pub fn open(root: &Path, config: Config) -> Result<Self> {
        let embedder = provider_from_config(&config.embedding)?;
        let db_path = Config::db_dir(root).join(STORE_FILE);
        let store = SqliteStore::open(
            &db_path,
            embedder,
            config.storage.pool_size,
            config.embedding.batch_size,
        )?;
        tracing::info!("Opened project at {:?}", root);
        Ok(Self::with_store(root, config, Arc::new(store)))
    }

    /// Build an app over an existing store
    pub fn with_store(root: &Path, config: Config, store: Arc<dyn VectorStore>) -> Self {
        let runner =
            TemplateRunner::new(Arc::new(MockLlm::new())).with_retries(config.template.retries);
        Self {
            root: root.to_path_buf(),
            config,
            store,
            runner,
        }
    }

    /// Use a generation backend for template runs
    pub fn with_llm(mut self, llm: Arc<dyn Llm>) -> Self {
        self.runner = TemplateRunner::new(llm).with_retries(self.config.template.retries);
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn VectorStore> {
        &self.store
    }

    /// The named collection, created when missing
    pub fn collection(&self, name: &str) -> Result<Collection> {
        Collection::load(self.store.get_or_create_collection(name)?)
    }

    /// The named collection; [`PxError::NotFound`] when missing
    pub fn find_collection(&self, name: &str) -> Result<Collection> {
        match self.store.get_collection(name)? {
            Some(store) => Collection::load(store),
            None => Err(PxError::not_found("Collection", name)),
        }
    }

    pub fn collection_names(&self) -> Result<Vec<String>> {
        self.store.collections()
    }

    pub fn drop_collection(&self, name: &str) -> Result<()> {
        self.store.delete_collection(name)
    }

    pub fn templates(&self) -> Result<Collection> {
        self.collection(TEMPLATES)
    }

    pub fn history(&self) -> Result<Collection> {
        self.collection(HISTORY)
    }

    pub fn logs(&self) -> Result<Collection> {
        self.collection(LOGS)
    }

    pub fn inbox(&self) -> Result<Collection> {
        self.collection(INBOX)
    }

    pub fn subscriptions(&self) -> Result<Collection> {
        self.collection(SUBSCRIPTIONS)
    }

    /// Store a standing query in the `subscriptions` collection
    pub fn subscribe(&self, query: Query) -> Result<Subscription> {
        if query.collection.is_none() {
            return Err(PxError::InvalidQuery("query names no collection".to_string()));
        }
        let subscription = Subscription::new(query);
        self.subscriptions()?
            .embed(&[Entity::from_model(&subscription)?])?;
        tracing::info!("Stored subscription {}", subscription.id);
        Ok(subscription)
    }

    /// Answer a query against the collection it names
    pub fn query(&self, query: &Query) -> Result<Option<Collection>> {
        let name = query
            .collection
            .as_deref()
            .ok_or_else(|| PxError::InvalidQuery("query names no collection".to_string()))?;
        let collection = self.find_collection(name)?;

        let mut options = QueryOptions::new()
            .threshold(self.config.retrieval.threshold)
            .n_results(self.config.retrieval.n_results);
        if let Some(text) = &query.query {
            options = options.text(text.clone());
        }
        if let Some(filter) = &query.filter {
            options = options.filter(filter.clone());
        }
        if let Some(limit) = self.config.retrieval.limit {
            options = options.limit(limit);
        }
        collection.embedding_query(&options)
    }

    /// A new template using the configured number of examples
    pub fn new_template(&self, instructions: &str) -> Template {
        Template::new(instructions).with_num_examples(self.config.template.num_examples)
    }

    /// Store a template in the `templates` collection
    pub fn create_template(&self, template: &Template) -> Result<()> {
        let entity = Entity::from_model(template)?;
        self.templates()?.embed(&[entity])?;
        tracing::info!("Stored template {}", template.label());
        Ok(())
    }

    /// Look a stored template up by id or by name
    pub fn template(&self, id: &str) -> Result<Template> {
        let templates = self.templates()?;
        let row = templates.row(id).or_else(|| {
            templates
                .rows()
                .iter()
                .find(|row| row.get("name").and_then(Value::as_str) == Some(id))
        });
        match row {
            Some(row) => serde_json::from_value(Value::Object(row.clone()))
                .map_err(|e| PxError::json(e, format!("Corrupt template {}", id))),
            None => Err(PxError::not_found("Template", id)),
        }
    }

    /// Run a template and record the run in the `history` collection
    pub fn run_template(&self, template: &Template, input: &Value, dry_run: bool) -> Result<Response> {
        let response = if dry_run {
            self.runner.dry_run(template, input)?
        } else {
            self.runner.forward(template, input)?
        };

        let metrics = serde_json::to_value(&response.metrics)
            .map_err(|e| PxError::json(e, "Failed to serialize metrics"))?;
        let record = Entity::new("history")
            .with("template", json!(template.id))
            .with("name", json!(template.label()))
            .with("input", input.clone())
            .with("output", response.content.clone())
            .with("metrics", metrics);
        self.history()?.embed(&[record])?;

        Ok(response)
    }
}
