use crate::config::Config;
use crate::error::{PxError, Result, ValidationError};

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];
const PROVIDERS: [&str; 2] = ["fastembed", "hash"];

/// Configuration validator
pub struct ConfigValidator;

impl ConfigValidator {
    /// Validate the configuration, collecting every problem
    pub fn validate(config: &Config) -> Result<()> {
        let mut errors = Vec::new();

        Self::validate_schema_version(config, &mut errors);
        Self::validate_storage(config, &mut errors);
        Self::validate_embedding(config, &mut errors);
        Self::validate_retrieval(config, &mut errors);
        Self::validate_template(config, &mut errors);
        Self::validate_logging(config, &mut errors);

        if errors.is_empty() {
            Ok(())
        } else {
            Err(PxError::ConfigValidation { errors })
        }
    }

    fn validate_schema_version(config: &Config, errors: &mut Vec<ValidationError>) {
        let version = &config.meta.schema_version;
        if version != "1.0.0" {
            errors.push(ValidationError::new(
                "_meta.schema_version",
                format!("Unsupported schema version: {}", version),
            ));
        }
    }

    fn validate_storage(config: &Config, errors: &mut Vec<ValidationError>) {
        if config.storage.root.as_os_str().is_empty() {
            errors.push(ValidationError::new(
                "storage.root",
                "Storage root cannot be empty",
            ));
        }

        if config.storage.pool_size == 0 {
            errors.push(ValidationError::new(
                "storage.pool_size",
                "Pool size must be greater than 0",
            ));
        }
    }

    fn validate_embedding(config: &Config, errors: &mut Vec<ValidationError>) {
        let provider = &config.embedding.provider;
        if !PROVIDERS.contains(&provider.as_str()) {
            errors.push(ValidationError::new(
                "embedding.provider",
                format!("Provider must be one of {:?}, got '{}'", PROVIDERS, provider),
            ));
        }

        if config.embedding.batch_size == 0 {
            errors.push(ValidationError::new(
                "embedding.batch_size",
                "Batch size must be greater than 0",
            ));
        }

        if config.embedding.dimension == 0 {
            errors.push(ValidationError::new(
                "embedding.dimension",
                "Dimension must be greater than 0",
            ));
        }

        if config.embedding.model.is_empty() {
            errors.push(ValidationError::new(
                "embedding.model",
                "Model name cannot be empty",
            ));
        }
    }

    fn validate_retrieval(config: &Config, errors: &mut Vec<ValidationError>) {
        let threshold = config.retrieval.threshold;
        if !threshold.is_finite() || threshold < 0.0 {
            errors.push(ValidationError::new(
                "retrieval.threshold",
                format!("Threshold must be a non-negative number, got {}", threshold),
            ));
        }

        if config.retrieval.n_results == 0 {
            errors.push(ValidationError::new(
                "retrieval.n_results",
                "n_results must be greater than 0",
            ));
        }

        if config.retrieval.limit == Some(0) {
            errors.push(ValidationError::new(
                "retrieval.limit",
                "Limit must be greater than 0 when set",
            ));
        }
    }

    fn validate_template(config: &Config, errors: &mut Vec<ValidationError>) {
        if config.template.retries == 0 {
            errors.push(ValidationError::new(
                "template.retries",
                "Retries must be greater than 0",
            ));
        }
    }

    fn validate_logging(config: &Config, errors: &mut Vec<ValidationError>) {
        let level = config.logging.level.to_lowercase();
        if !LOG_LEVELS.contains(&level.as_str()) {
            errors.push(ValidationError::new(
                "logging.level",
                format!("Level must be one of {:?}, got '{}'", LOG_LEVELS, config.logging.level),
            ));
        }
    }
}
