use std::path::PathBuf;
use thiserror::Error;

use crate::embedding::EmbeddingError;
use crate::schema::SchemaError;
use crate::template::LlmError;

/// Main error type for promptx
#[derive(Error, Debug)]
pub enum PxError {
    /// Configuration related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Configuration validation errors
    #[error("Configuration validation failed: {errors:?}")]
    ConfigValidation { errors: Vec<ValidationError> },

    /// Configuration file not found
    #[error("Configuration file not found: {path}")]
    ConfigNotFound { path: PathBuf },

    /// Invalid configuration value
    #[error("Invalid configuration value at {path}: {message}")]
    InvalidConfigValue { path: String, message: String },

    /// IO errors
    #[error("IO error: {context}: {source}")]
    Io {
        source: std::io::Error,
        context: String,
    },

    /// TOML deserialization errors
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    /// TOML serialization errors
    #[error("TOML serialization error: {0}")]
    TomlSerialization(#[from] toml::ser::Error),

    /// JSON errors
    #[error("JSON error: {context}: {source}")]
    Json {
        source: serde_json::Error,
        context: String,
    },

    /// Database errors
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Connection pool errors
    #[error("Connection pool error: {0}")]
    Pool(#[from] r2d2::Error),

    /// Embedding provider errors
    #[error("Embedding error: {0}")]
    Embedding(#[from] EmbeddingError),

    /// A schema could not be generated or interpreted
    #[error("Schema error: {0}")]
    Schema(#[from] SchemaError),

    /// Data did not satisfy its JSON Schema
    #[error("Validation failed: {}", errors.join("; "))]
    Validation { errors: Vec<String> },

    /// Prompt rendering errors
    #[error("Template error: {0}")]
    Template(#[from] minijinja::Error),

    /// Generation backend errors that are not retried
    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    /// The retry budget of a template run ran out
    #[error("Max retries exceeded: {0}")]
    MaxRetriesExceeded(String),

    /// `embed` was called without any items
    #[error("No items to embed")]
    NothingToEmbed,

    /// Collection name rejected by the store
    #[error("Invalid collection name '{name}': {reason}")]
    InvalidCollectionName { name: String, reason: String },

    /// Collection already exists
    #[error("Collection already exists: {0}")]
    CollectionExists(String),

    /// A named resource (template, collection, entity) does not exist
    #[error("{kind} not found: {name}")]
    NotFound { kind: &'static str, name: String },

    /// Query could not be executed as given
    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    /// Generic errors
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl PxError {
    pub fn not_found(kind: &'static str, name: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            name: name.into(),
        }
    }

    pub fn json(source: serde_json::Error, context: impl Into<String>) -> Self {
        Self::Json {
            source,
            context: context.into(),
        }
    }
}

/// Configuration validation error
#[derive(Debug, Clone)]
pub struct ValidationError {
    /// Path to the configuration key that failed validation
    pub path: String,
    /// Error message describing the validation failure
    pub message: String,
}

impl ValidationError {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

/// Result type for promptx operations
pub type Result<T> = std::result::Result<T, PxError>;
