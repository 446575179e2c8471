//! Vector store abstraction
//!
//! A [`VectorStore`] is a client over named [`StoreCollection`]s. Each collection holds
//! records of `(id, document, metadata)` and answers metadata lookups and nearest-text
//! queries. [`SqliteStore`] is the bundled persistent implementation.

mod database;
mod filter;
mod sqlite;

pub use database::{Database, DbPool, DbStats};
pub use filter::Where;
pub use sqlite::{SqliteCollection, SqliteStore};

use crate::error::{PxError, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::{Arc, OnceLock};

/// Flat metadata attached to a record
pub type Metadata = Map<String, Value>;

/// Records returned by [`StoreCollection::get`], as parallel lists
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GetResult {
    pub ids: Vec<String>,
    pub documents: Vec<String>,
    pub metadatas: Vec<Metadata>,
}

impl GetResult {
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

/// Nearest records per query text, as one inner list per text
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryResult {
    pub ids: Vec<Vec<String>>,
    pub distances: Vec<Vec<f32>>,
    pub documents: Vec<Vec<String>>,
    pub metadatas: Vec<Vec<Metadata>>,
}

/// A named namespace of records inside a vector store
pub trait StoreCollection: Send + Sync {
    fn name(&self) -> &str;

    /// Records matching the ids and the filter; `None` means unrestricted
    fn get(&self, ids: Option<&[String]>, filter: Option<&Where>) -> Result<GetResult>;

    /// The `n_results` nearest records for every text, among those passing the filter
    /// and id restriction
    fn query(
        &self,
        texts: &[String],
        n_results: usize,
        filter: Option<&Where>,
        ids: Option<&[String]>,
    ) -> Result<QueryResult>;

    /// Insert or replace records by id
    fn upsert(&self, ids: &[String], documents: &[String], metadatas: &[Metadata]) -> Result<()>;

    /// Remove records matching the ids or the filter; at least one must be given
    fn delete(&self, ids: Option<&[String]>, filter: Option<&Where>) -> Result<()>;

    fn count(&self) -> Result<usize>;
}

/// Client over named collections
pub trait VectorStore: Send + Sync {
    fn get_or_create_collection(&self, name: &str) -> Result<Arc<dyn StoreCollection>>;

    /// Fails with [`PxError::CollectionExists`] when the name is taken
    fn create_collection(&self, name: &str) -> Result<Arc<dyn StoreCollection>>;

    /// `Ok(None)` when no collection has that name
    fn get_collection(&self, name: &str) -> Result<Option<Arc<dyn StoreCollection>>>;

    fn delete_collection(&self, name: &str) -> Result<()>;

    /// Collection names in creation order
    fn collections(&self) -> Result<Vec<String>>;
}

fn name_pattern() -> Result<&'static Regex> {
    static PATTERN: OnceLock<std::result::Result<Regex, regex::Error>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"^[A-Za-z0-9](?:[A-Za-z0-9._-]*[A-Za-z0-9])?$"))
        .as_ref()
        .map_err(|e| PxError::Other(anyhow::anyhow!("Invalid collection name pattern: {}", e)))
}

/// Check a collection name: 3 to 63 characters of `[A-Za-z0-9._-]`, starting and
/// ending with an alphanumeric character.
pub fn validate_collection_name(name: &str) -> Result<()> {
    let reason = if !(3..=63).contains(&name.len()) {
        Some("must be between 3 and 63 characters long")
    } else if !name_pattern()?.is_match(name) {
        Some("must contain only [a-zA-Z0-9._-] and start and end with an alphanumeric character")
    } else if name.contains("..") {
        Some("must not contain two consecutive periods")
    } else {
        None
    };

    match reason {
        Some(reason) => Err(PxError::InvalidCollectionName {
            name: name.to_string(),
            reason: reason.to_string(),
        }),
        None => Ok(()),
    }
}
