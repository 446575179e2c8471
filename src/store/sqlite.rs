//! Persistent vector store on SQLite
//!
//! Records keep their embedding next to the document. Nearest-neighbour search is
//! exhaustive cosine distance over the records that pass the filter, which keeps
//! upsert-by-id and delete exact.

use super::{
    validate_collection_name, Database, GetResult, Metadata, QueryResult, StoreCollection,
    VectorStore, Where,
};
use crate::embedding::{cosine_distance, EmbeddingProvider};
use crate::error::{PxError, Result};
use ahash::AHashSet;
use rusqlite::{params, OptionalExtension};
use std::path::Path;
use std::sync::Arc;

/// Store client over a SQLite database file
#[derive(Clone)]
pub struct SqliteStore {
    db: Arc<Database>,
    embedder: Arc<dyn EmbeddingProvider>,
    batch_size: usize,
}

impl SqliteStore {
    pub fn open(
        db_path: &Path,
        embedder: Arc<dyn EmbeddingProvider>,
        pool_size: u32,
        batch_size: usize,
    ) -> Result<Self> {
        let db = Database::new(db_path, pool_size)?;
        tracing::debug!(
            "Opened store at {:?} (embedder {}, {}D)",
            db_path,
            embedder.model_name(),
            embedder.dimension()
        );
        Ok(Self {
            db: Arc::new(db),
            embedder,
            batch_size: batch_size.max(1),
        })
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    fn handle(&self, name: &str) -> Arc<dyn StoreCollection> {
        Arc::new(SqliteCollection {
            name: name.to_string(),
            db: self.db.clone(),
            embedder: self.embedder.clone(),
            batch_size: self.batch_size,
        })
    }

    fn exists(&self, name: &str) -> Result<bool> {
        let conn = self.db.get_conn()?;
        let found = conn
            .query_row(
                "SELECT 1 FROM collections WHERE name = ?1",
                params![name],
                |_| Ok(()),
            )
            .optional()?;
        Ok(found.is_some())
    }
}

impl VectorStore for SqliteStore {
    fn get_or_create_collection(&self, name: &str) -> Result<Arc<dyn StoreCollection>> {
        validate_collection_name(name)?;
        let conn = self.db.get_conn()?;
        let created = conn.execute(
            "INSERT OR IGNORE INTO collections (name, created_at) VALUES (?1, ?2)",
            params![name, chrono::Utc::now().to_rfc3339()],
        )?;
        if created > 0 {
            tracing::info!("Created collection {}", name);
        }
        Ok(self.handle(name))
    }

    fn create_collection(&self, name: &str) -> Result<Arc<dyn StoreCollection>> {
        validate_collection_name(name)?;
        if self.exists(name)? {
            return Err(PxError::CollectionExists(name.to_string()));
        }
        self.get_or_create_collection(name)
    }

    fn get_collection(&self, name: &str) -> Result<Option<Arc<dyn StoreCollection>>> {
        if self.exists(name)? {
            Ok(Some(self.handle(name)))
        } else {
            Ok(None)
        }
    }

    fn delete_collection(&self, name: &str) -> Result<()> {
        let conn = self.db.get_conn()?;
        let removed = conn.execute("DELETE FROM collections WHERE name = ?1", params![name])?;
        if removed == 0 {
            return Err(PxError::not_found("Collection", name));
        }
        tracing::info!("Deleted collection {}", name);
        Ok(())
    }

    fn collections(&self) -> Result<Vec<String>> {
        let conn = self.db.get_conn()?;
        let mut stmt = conn.prepare("SELECT name FROM collections ORDER BY rowid")?;
        let names = stmt
            .query_map([], |row| row.get(0))?
            .collect::<std::result::Result<Vec<String>, _>>()?;
        Ok(names)
    }
}

/// One stored record
struct Row {
    id: String,
    document: String,
    metadata: Metadata,
    embedding: Vec<f32>,
}

/// Handle on one collection of a [`SqliteStore`]
pub struct SqliteCollection {
    name: String,
    db: Arc<Database>,
    embedder: Arc<dyn EmbeddingProvider>,
    batch_size: usize,
}

impl SqliteCollection {
    /// Records passing the id restriction and filter, in insertion order
    fn load(
        &self,
        ids: Option<&[String]>,
        filter: Option<&Where>,
        with_embeddings: bool,
    ) -> Result<Vec<Row>> {
        let conn = self.db.get_conn()?;
        let sql = if with_embeddings {
            "SELECT id, document, metadata, embedding FROM records WHERE collection = ?1 ORDER BY rowid"
        } else {
            "SELECT id, document, metadata, x'' FROM records WHERE collection = ?1 ORDER BY rowid"
        };
        let mut stmt = conn.prepare(sql)?;
        let raw = stmt
            .query_map(params![self.name], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, Vec<u8>>(3)?,
                ))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let wanted: Option<AHashSet<&str>> =
            ids.map(|ids| ids.iter().map(String::as_str).collect());

        let mut rows = Vec::with_capacity(raw.len());
        for (id, document, metadata, embedding) in raw {
            if let Some(wanted) = &wanted {
                if !wanted.contains(id.as_str()) {
                    continue;
                }
            }
            let metadata: Metadata = serde_json::from_str(&metadata)
                .map_err(|e| PxError::json(e, format!("Corrupt metadata for record {}", id)))?;
            if let Some(filter) = filter {
                if !filter.matches(&metadata) {
                    continue;
                }
            }
            rows.push(Row {
                id,
                document,
                metadata,
                embedding: decode_embedding(&embedding),
            });
        }
        Ok(rows)
    }
}

impl StoreCollection for SqliteCollection {
    fn name(&self) -> &str {
        &self.name
    }

    fn get(&self, ids: Option<&[String]>, filter: Option<&Where>) -> Result<GetResult> {
        let mut result = GetResult::default();
        for row in self.load(ids, filter, false)? {
            result.ids.push(row.id);
            result.documents.push(row.document);
            result.metadatas.push(row.metadata);
        }
        tracing::debug!("get on {} matched {} records", self.name, result.len());
        Ok(result)
    }

    fn query(
        &self,
        texts: &[String],
        n_results: usize,
        filter: Option<&Where>,
        ids: Option<&[String]>,
    ) -> Result<QueryResult> {
        let mut result = QueryResult::default();
        if texts.is_empty() {
            return Ok(result);
        }

        let candidates = self.load(ids, filter, true)?;
        let queries = self.embedder.embed_batch(texts)?;

        for query in &queries {
            let mut scored: Vec<(usize, f32)> = candidates
                .iter()
                .enumerate()
                .map(|(i, row)| (i, cosine_distance(query, &row.embedding)))
                .collect();
            scored.sort_by(|a, b| a.1.total_cmp(&b.1));
            scored.truncate(n_results);

            let mut ids = Vec::with_capacity(scored.len());
            let mut distances = Vec::with_capacity(scored.len());
            let mut documents = Vec::with_capacity(scored.len());
            let mut metadatas = Vec::with_capacity(scored.len());
            for (i, distance) in scored {
                let row = &candidates[i];
                ids.push(row.id.clone());
                distances.push(distance);
                documents.push(row.document.clone());
                metadatas.push(row.metadata.clone());
            }
            result.ids.push(ids);
            result.distances.push(distances);
            result.documents.push(documents);
            result.metadatas.push(metadatas);
        }

        tracing::debug!(
            "query on {}: {} texts over {} candidates",
            self.name,
            texts.len(),
            candidates.len()
        );
        Ok(result)
    }

    fn upsert(&self, ids: &[String], documents: &[String], metadatas: &[Metadata]) -> Result<()> {
        if ids.len() != documents.len() || ids.len() != metadatas.len() {
            return Err(PxError::InvalidQuery(format!(
                "upsert needs one document and metadata per id ({} ids, {} documents, {} metadatas)",
                ids.len(),
                documents.len(),
                metadatas.len()
            )));
        }

        let mut conn = self.db.get_conn()?;
        let now = chrono::Utc::now().to_rfc3339();

        for (start, chunk) in (0..ids.len())
            .step_by(self.batch_size)
            .map(|start| (start, start..(start + self.batch_size).min(ids.len())))
        {
            let embeddings = self.embedder.embed_batch(&documents[chunk.clone()])?;
            if embeddings.len() != chunk.len() {
                return Err(crate::embedding::EmbeddingError::GenerationError(format!(
                    "Expected {} embeddings, got {}",
                    chunk.len(),
                    embeddings.len()
                ))
                .into());
            }

            let tx = conn.transaction()?;
            {
                let mut stmt = tx.prepare(
                    "INSERT INTO records (collection, id, document, metadata, embedding, updated_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                     ON CONFLICT (collection, id) DO UPDATE SET
                        document = excluded.document,
                        metadata = excluded.metadata,
                        embedding = excluded.embedding,
                        updated_at = excluded.updated_at",
                )?;
                for (offset, embedding) in embeddings.iter().enumerate() {
                    let i = start + offset;
                    let metadata = serde_json::to_string(&metadatas[i])
                        .map_err(|e| PxError::json(e, "Failed to serialize metadata"))?;
                    stmt.execute(params![
                        self.name,
                        ids[i],
                        documents[i],
                        metadata,
                        encode_embedding(embedding),
                        now
                    ])?;
                }
            }
            tx.commit()?;
        }

        tracing::debug!("Upserted {} records into {}", ids.len(), self.name);
        Ok(())
    }

    fn delete(&self, ids: Option<&[String]>, filter: Option<&Where>) -> Result<()> {
        if ids.is_none() && filter.is_none() {
            return Err(PxError::InvalidQuery(
                "delete needs ids or a filter".to_string(),
            ));
        }

        let doomed: Vec<String> = self
            .load(ids, filter, false)?
            .into_iter()
            .map(|row| row.id)
            .collect();

        let mut conn = self.db.get_conn()?;
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare("DELETE FROM records WHERE collection = ?1 AND id = ?2")?;
            for id in &doomed {
                stmt.execute(params![self.name, id])?;
            }
        }
        tx.commit()?;

        tracing::debug!("Deleted {} records from {}", doomed.len(), self.name);
        Ok(())
    }

    fn count(&self) -> Result<usize> {
        let conn = self.db.get_conn()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM records WHERE collection = ?1",
            params![self.name],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }
}

fn encode_embedding(embedding: &[f32]) -> Vec<u8> {
    embedding.iter().flat_map(|x| x.to_le_bytes()).collect()
}

fn decode_embedding(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect()
}
