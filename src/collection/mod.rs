//! Entity collections over a vector store
//!
//! A [`Collection`] keeps the document records of one store collection as local rows
//! (JSON objects that always carry `id`). Embedding fans entities out into records;
//! querying scores the matching records, folds the scores onto the entities they
//! belong to and returns the winning rows in score order.

mod query;
mod record;

pub use query::{Query, QueryOptions, Subscription, DEFAULT_N_RESULTS, DEFAULT_THRESHOLD};
pub use record::{create_records, Record, DOCUMENT_ITEM, FIELD_ITEM};

use crate::entity::Entity;
use crate::error::{PxError, Result};
use crate::schema;
use crate::store::{Metadata, StoreCollection, Where};
use ahash::AHashMap;
use serde_json::{json, Map, Value};
use std::sync::Arc;

/// One local row: the document of an entity plus its `id`
pub type Row = Map<String, Value>;

/// Local table of entities backed by a store collection
#[derive(Clone)]
pub struct Collection {
    store: Arc<dyn StoreCollection>,
    rows: Vec<Row>,
    index: AHashMap<String, usize>,
    scores: Vec<f32>,
}

impl std::fmt::Debug for Collection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collection")
            .field("name", &self.store.name())
            .field("rows", &self.rows.len())
            .finish()
    }
}

impl Collection {
    /// Load the document records of a store collection as rows
    pub fn load(store: Arc<dyn StoreCollection>) -> Result<Self> {
        let records = store.get(None, Some(&Where::eq("item", DOCUMENT_ITEM)))?;
        let mut rows = Vec::with_capacity(records.len());
        for (id, document) in records.ids.into_iter().zip(records.documents) {
            rows.push(row_from_document(id, &document)?);
        }
        tracing::debug!("Loaded {} rows from {}", rows.len(), store.name());
        Ok(Self::from_rows(store, rows))
    }

    /// Build a collection from rows; rows without a string `id` are dropped
    pub fn from_rows(store: Arc<dyn StoreCollection>, rows: Vec<Row>) -> Self {
        let mut collection = Self {
            store,
            rows: Vec::with_capacity(rows.len()),
            index: AHashMap::with_capacity(rows.len()),
            scores: Vec::new(),
        };
        for row in rows {
            collection.push_row(row);
        }
        collection
    }

    fn push_row(&mut self, row: Row) -> bool {
        let Some(id) = row.get("id").and_then(Value::as_str).map(str::to_string) else {
            tracing::warn!("Dropping row without id in {}", self.name());
            return false;
        };
        if self.index.contains_key(&id) {
            return false;
        }
        self.index.insert(id, self.rows.len());
        self.rows.push(row);
        true
    }

    pub fn name(&self) -> &str {
        self.store.name()
    }

    pub fn store(&self) -> &Arc<dyn StoreCollection> {
        &self.store
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    pub fn row(&self, id: &str) -> Option<&Row> {
        self.index.get(id).map(|&i| &self.rows[i])
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.rows
            .iter()
            .filter_map(|row| row.get("id").and_then(Value::as_str))
    }

    /// Aggregate scores of a query result, parallel to [`Collection::rows`].
    /// Empty for collections that did not come from a query.
    pub fn scores(&self) -> &[f32] {
        &self.scores
    }

    /// Store entities and add the ones not seen before to the local rows.
    ///
    /// Records are upserted by id. Rows of entities that were already present are left
    /// as they were. Returns the number of new rows.
    pub fn embed(&mut self, items: &[Entity]) -> Result<usize> {
        let records = create_records(self.name(), items)?;
        if records.is_empty() {
            return Err(PxError::NothingToEmbed);
        }

        let mut ids = Vec::with_capacity(records.len());
        let mut documents = Vec::with_capacity(records.len());
        let mut metadatas = Vec::with_capacity(records.len());
        for record in &records {
            ids.push(record.id.clone());
            documents.push(record.document.clone());
            metadatas.push(record.metadata.clone());
        }
        self.store.upsert(&ids, &documents, &metadatas)?;

        let mut added = 0;
        for record in records.into_iter().filter(Record::is_document) {
            if self.index.contains_key(&record.id) {
                continue;
            }
            if self.push_row(row_from_document(record.id, &record.document)?) {
                added += 1;
            }
        }

        tracing::info!("Embedded {} items into {}", added, self.name());
        Ok(added)
    }

    /// Embed raw strings as `string` entities holding a `value` field
    pub fn embed_text<S: AsRef<str>>(&mut self, texts: &[S]) -> Result<Vec<Entity>> {
        let items: Vec<Entity> = texts
            .iter()
            .map(|t| Entity::new("string").with("value", json!(t.as_ref())))
            .collect();
        self.embed(&items)?;
        Ok(items)
    }

    /// Find entities through their records.
    ///
    /// Without texts every record matching the ids and filter scores 1 for its entity;
    /// with texts every returned record scores `1 - distance`. Scores add up per entity,
    /// entities under the threshold are discarded and the rest are returned in
    /// descending score order. Returns `Ok(None)` when scores exist but the local table
    /// is empty, since they cannot be resolved to rows.
    pub fn embedding_query(&self, options: &QueryOptions) -> Result<Option<Collection>> {
        let texts: Vec<String> = options
            .texts
            .iter()
            .filter(|t| !t.is_empty())
            .cloned()
            .collect();
        let ids = options.ids.as_deref();
        let filter = options.filter.as_ref();

        let mut scores = Scores::default();
        if texts.is_empty() {
            let results = self.store.get(ids, filter)?;
            for (id, metadata) in results.ids.iter().zip(&results.metadatas) {
                scores.add(record::owner_id(id, metadata), 1.0);
            }
        } else {
            let results = self.store.query(&texts, options.n_results, filter, ids)?;
            for ((ids, distances), metadatas) in results
                .ids
                .iter()
                .zip(&results.distances)
                .zip(&results.metadatas)
            {
                for ((id, distance), metadata) in ids.iter().zip(distances).zip(metadatas) {
                    scores.add(record::owner_id(id, metadata), 1.0 - distance);
                }
            }
        }

        if !scores.is_empty() && self.rows.is_empty() {
            tracing::error!(
                "Failed to resolve {} scored entities: {} has no local rows",
                scores.len(),
                self.name()
            );
            return Ok(None);
        }

        let mut result = Self::from_rows(self.store.clone(), Vec::new());
        for (id, score) in scores.ranked(options.threshold) {
            if options.limit.is_some_and(|limit| result.len() >= limit) {
                break;
            }
            match self.row(&id) {
                Some(row) => {
                    result.push_row(row.clone());
                    result.scores.push(score);
                }
                None => tracing::debug!("Scored id {} has no local row in {}", id, self.name()),
            }
        }

        tracing::info!(
            "Found {} results in {} for query: {:?}",
            result.len(),
            self.name(),
            texts
        );
        Ok(Some(result))
    }

    /// [`Collection::embedding_query`] over the given texts with default options
    pub fn call<S: AsRef<str>>(&self, texts: &[S]) -> Result<Option<Collection>> {
        let options = QueryOptions::new().texts(texts.iter().map(|t| t.as_ref().to_string()));
        self.embedding_query(&options)
    }

    /// Rebuild typed entities from the rows through the schemas stored with them
    pub fn objects(&self) -> Result<Vec<Entity>> {
        if self.rows.is_empty() {
            return Ok(Vec::new());
        }

        let ids: Vec<String> = self.ids().map(str::to_string).collect();
        let stored = self.store.get(Some(&ids), None)?;
        let schemas: AHashMap<&str, &Metadata> = stored
            .ids
            .iter()
            .map(String::as_str)
            .zip(&stored.metadatas)
            .collect();

        let mut registry = schema::SchemaRegistry::new();
        let mut entities = Vec::with_capacity(self.rows.len());
        for row in &self.rows {
            let id = row.get("id").and_then(Value::as_str).unwrap_or_default();
            let schema = match schemas
                .get(id)
                .and_then(|m| m.get("schema"))
                .and_then(Value::as_str)
            {
                Some(raw) => serde_json::from_str(raw)
                    .map_err(|e| PxError::json(e, format!("Corrupt schema stored for {}", id)))?,
                None => json!({}),
            };

            let data: Row = row
                .iter()
                .filter(|(_, v)| !v.is_null())
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect();
            let mut built =
                schema::create_entities_with(&mut registry, &schema, Value::Object(data))?;
            entities.append(&mut built);
        }
        Ok(entities)
    }

    /// The first entity of [`Collection::objects`]
    pub fn first(&self) -> Result<Option<Entity>> {
        Ok(self.objects()?.into_iter().next())
    }

    /// Remove entities, their field records and their local rows
    pub fn delete(&mut self, items: &[Entity]) -> Result<()> {
        if items.is_empty() {
            return Ok(());
        }

        let ids: Vec<String> = items.iter().map(|i| i.id.replace(' ', "")).collect();
        self.store.delete(Some(&ids), None)?;
        for item in items {
            self.store
                .delete(None, Some(&Where::eq("item_id", item.id.as_str())))?;
        }

        let doomed: Vec<&str> = items.iter().map(|i| i.id.as_str()).collect();
        let rows = std::mem::take(&mut self.rows);
        self.index.clear();
        self.scores.clear();
        for row in rows {
            let keep = row
                .get("id")
                .and_then(Value::as_str)
                .map(|id| !doomed.contains(&id))
                .unwrap_or(false);
            if keep {
                self.push_row(row);
            }
        }

        tracing::info!("Deleted {} items from {}", items.len(), self.name());
        Ok(())
    }
}

fn row_from_document(id: String, document: &str) -> Result<Row> {
    let parsed: Value = serde_json::from_str(document)
        .map_err(|e| PxError::json(e, format!("Corrupt document for {}", id)))?;
    let mut row = Row::new();
    row.insert("id".to_string(), Value::String(id));
    if let Value::Object(fields) = parsed {
        for (k, v) in fields {
            if k != "id" {
                row.insert(k, v);
            }
        }
    }
    Ok(row)
}

/// Per-entity score accumulator that remembers first-seen order
#[derive(Debug, Default)]
struct Scores {
    order: Vec<(String, f32)>,
    index: AHashMap<String, usize>,
}

impl Scores {
    fn add(&mut self, id: &str, score: f32) {
        match self.index.get(id) {
            Some(&i) => self.order[i].1 += score,
            None => {
                self.index.insert(id.to_string(), self.order.len());
                self.order.push((id.to_string(), score));
            }
        }
    }

    fn len(&self) -> usize {
        self.order.len()
    }

    fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Scores at or above the threshold, highest first; ties keep first-seen order
    fn ranked(self, threshold: f32) -> Vec<(String, f32)> {
        let mut results: Vec<(String, f32)> = self
            .order
            .into_iter()
            .filter(|(_, score)| *score >= threshold)
            .collect();
        results.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        results
    }
}
