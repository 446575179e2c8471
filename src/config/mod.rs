//! Configuration management for promptx
//!
//! Configuration is a TOML file with one section per subsystem. Named profiles hold
//! overrides that are applied on load when selected through `PX_ENV`, and individual
//! keys can be overridden with `PX_SECTION__KEY` environment variables.

use crate::error::{PxError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

mod validator;

pub use validator::ConfigValidator;

/// Prefix of environment variable overrides
pub const ENV_PREFIX: &str = "PX_";

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(rename = "_meta")]
    pub meta: MetaConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub template: TemplateConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub profiles: HashMap<String, ProfileOverrides>,
}

/// Metadata about the configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetaConfig {
    pub schema_version: String,
    #[serde(default = "current_timestamp")]
    pub created_at: String,
    #[serde(default = "current_timestamp")]
    pub last_modified: String,
}

fn current_timestamp() -> String {
    chrono::Utc::now().to_rfc3339()
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Project root; the store lives under `<root>/.px/db`
    pub root: PathBuf,
    pub pool_size: u32,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("."),
            pool_size: 4,
        }
    }
}

/// Embedding configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    /// "fastembed" or "hash"
    pub provider: String,
    pub model: String,
    /// Vector size of the hash provider
    pub dimension: usize,
    pub batch_size: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: "fastembed".to_string(),
            model: "all-MiniLM-L6-v2".to_string(),
            dimension: 384,
            batch_size: 32,
        }
    }
}

/// Retrieval configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    /// Minimum aggregate score an entity needs to be returned
    pub threshold: f32,
    /// Nearest records fetched per query text
    pub n_results: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            threshold: 0.1,
            n_results: 10,
            limit: None,
        }
    }
}

/// Template runner configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TemplateConfig {
    pub retries: u32,
    pub num_examples: usize,
}

impl Default for TemplateConfig {
    fn default() -> Self {
        Self {
            retries: 3,
            num_examples: 1,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    /// Append log output to this file instead of stderr
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: None,
        }
    }
}

/// Profile-specific configuration overrides
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProfileOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embedding_provider: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embedding_model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub threshold: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_level: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_file: Option<PathBuf>,
}

impl Config {
    /// Load configuration from a file
    ///
    /// The profile named by `PX_ENV` is applied first, then `PX_SECTION__KEY` overrides.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(PxError::ConfigNotFound {
                path: path.to_path_buf(),
            });
        }

        let content = std::fs::read_to_string(path).map_err(|e| PxError::Io {
            source: e,
            context: format!("Failed to read config file: {:?}", path),
        })?;
        let mut config: Config = toml::from_str(&content)?;
        config.finish()?;
        Ok(config)
    }

    /// Load the file when it exists, otherwise start from defaults
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            return Self::load(path);
        }
        tracing::debug!("No config at {:?}, using defaults", path);
        let mut config = Self::default();
        config.finish()?;
        Ok(config)
    }

    fn finish(&mut self) -> Result<()> {
        if let Ok(profile) = std::env::var("PX_ENV") {
            self.apply_profile(&profile)?;
        }
        self.apply_env_overrides();
        ConfigValidator::validate(self)
    }

    /// Save configuration to a file
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| PxError::Io {
                source: e,
                context: format!("Failed to create config directory: {:?}", parent),
            })?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content).map_err(|e| PxError::Io {
            source: e,
            context: format!("Failed to write config file: {:?}", path),
        })?;
        Ok(())
    }

    /// Load configuration with a specific profile applied
    pub fn load_with_profile(path: &Path, profile: &str) -> Result<Self> {
        let mut config = Self::load(path)?;
        config.apply_profile(profile)?;
        ConfigValidator::validate(&config)?;
        Ok(config)
    }

    /// Apply a profile's overrides to the configuration
    pub fn apply_profile(&mut self, profile: &str) -> Result<()> {
        let Some(overrides) = self.profiles.get(profile).cloned() else {
            return Err(PxError::InvalidConfigValue {
                path: format!("profiles.{}", profile),
                message: "Unknown profile".to_string(),
            });
        };

        if let Some(provider) = overrides.embedding_provider {
            self.embedding.provider = provider;
        }
        if let Some(model) = overrides.embedding_model {
            self.embedding.model = model;
        }
        if let Some(threshold) = overrides.threshold {
            self.retrieval.threshold = threshold;
        }
        if let Some(level) = overrides.log_level {
            self.logging.level = level;
        }
        if overrides.log_file.is_some() {
            self.logging.file = overrides.log_file;
        }
        Ok(())
    }

    /// Apply environment variable overrides
    /// Environment variables in format: PX_SECTION__KEY=value
    pub fn apply_env_overrides(&mut self) {
        for (key, value) in std::env::vars() {
            if let Some(config_key) = key.strip_prefix(ENV_PREFIX) {
                if let Err(e) = self.set_value_from_env(config_key, &value) {
                    tracing::warn!("Failed to apply env override {}: {}", key, e);
                }
            }
        }
    }

    fn set_value_from_env(&mut self, path: &str, value: &str) -> Result<()> {
        match path {
            "ENV" => {}
            "LOG_LEVEL" | "LOGGING__LEVEL" => self.logging.level = value.to_string(),
            "LOGGING__FILE" => self.logging.file = Some(PathBuf::from(value)),
            "STORAGE__ROOT" => self.storage.root = PathBuf::from(value),
            "STORAGE__POOL_SIZE" => self.storage.pool_size = parse_env(path, value)?,
            "EMBEDDING__PROVIDER" => self.embedding.provider = value.to_string(),
            "EMBEDDING__MODEL" => self.embedding.model = value.to_string(),
            "EMBEDDING__DIMENSION" => self.embedding.dimension = parse_env(path, value)?,
            "EMBEDDING__BATCH_SIZE" => self.embedding.batch_size = parse_env(path, value)?,
            "RETRIEVAL__THRESHOLD" => self.retrieval.threshold = parse_env(path, value)?,
            "RETRIEVAL__N_RESULTS" => self.retrieval.n_results = parse_env(path, value)?,
            "RETRIEVAL__LIMIT" => self.retrieval.limit = Some(parse_env(path, value)?),
            "TEMPLATE__RETRIES" => self.template.retries = parse_env(path, value)?,
            "TEMPLATE__NUM_EXAMPLES" => self.template.num_examples = parse_env(path, value)?,
            _ => {
                tracing::debug!("Unknown env config key: {}", path);
            }
        }
        Ok(())
    }

    /// Get the default configuration file path
    pub fn default_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| PxError::Config("Cannot determine config directory".to_string()))?;

        Ok(config_dir.join("promptx").join("config.toml"))
    }

    /// Directory holding the store of a project root
    pub fn db_dir(root: &Path) -> PathBuf {
        root.join(".px").join("db")
    }
}

fn parse_env<T: std::str::FromStr>(path: &str, value: &str) -> Result<T> {
    value.parse().map_err(|_| PxError::InvalidConfigValue {
        path: path.to_string(),
        message: format!("Cannot parse '{}'", value),
    })
}

impl Default for Config {
    fn default() -> Self {
        Self {
            meta: MetaConfig {
                schema_version: "1.0.0".to_string(),
                created_at: current_timestamp(),
                last_modified: current_timestamp(),
            },
            storage: StorageConfig::default(),
            embedding: EmbeddingConfig::default(),
            retrieval: RetrievalConfig::default(),
            template: TemplateConfig::default(),
            logging: LoggingConfig::default(),
            profiles: HashMap::from([
                (
                    "test".to_string(),
                    ProfileOverrides {
                        embedding_provider: Some("hash".to_string()),
                        log_level: Some("debug".to_string()),
                        log_file: Some(PathBuf::from("log/test.log")),
                        ..ProfileOverrides::default()
                    },
                ),
                (
                    "prod".to_string(),
                    ProfileOverrides {
                        log_level: Some("warn".to_string()),
                        log_file: Some(PathBuf::from("log/prod.log")),
                        ..ProfileOverrides::default()
                    },
                ),
            ]),
        }
    }
}
