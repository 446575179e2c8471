//! Embedding providers
//!
//! - EmbeddingProvider trait for abstraction
//! - FastEmbedProvider for local model embeddings (all-MiniLM-L6-v2, 384-dim)
//! - HashEmbedder for deterministic offline embeddings without a model download

mod hashing;
mod provider;

pub use hashing::HashEmbedder;
pub use provider::{EmbeddingError, EmbeddingProvider, FastEmbedProvider};

use crate::config::EmbeddingConfig;
use std::sync::Arc;

/// Build the provider selected by the configuration
pub fn provider_from_config(
    config: &EmbeddingConfig,
) -> Result<Arc<dyn EmbeddingProvider>, EmbeddingError> {
    match config.provider.as_str() {
        "fastembed" => Ok(Arc::new(FastEmbedProvider::new(&config.model)?)),
        "hash" => Ok(Arc::new(HashEmbedder::new(config.dimension))),
        other => Err(EmbeddingError::InitializationError(format!(
            "Unsupported embedding provider: {}. Supported: fastembed, hash",
            other
        ))),
    }
}

/// Cosine distance (`1 - cosine similarity`); zero vectors are at distance 1 from everything
pub fn cosine_distance(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let mag_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let mag_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if mag_a == 0.0 || mag_b == 0.0 {
        return 1.0;
    }
    1.0 - dot / (mag_a * mag_b)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cosine_distance() {
        assert!(cosine_distance(&[1.0, 0.0], &[1.0, 0.0]).abs() < 1e-6);
        assert!((cosine_distance(&[1.0, 0.0], &[0.0, 1.0]) - 1.0).abs() < 1e-6);
        assert!((cosine_distance(&[1.0, 0.0], &[-1.0, 0.0]) - 2.0).abs() < 1e-6);
        assert_eq!(cosine_distance(&[0.0, 0.0], &[1.0, 0.0]), 1.0);
    }

    #[test]
    fn test_unknown_provider() {
        let config = EmbeddingConfig {
            provider: "remote".to_string(),
            ..EmbeddingConfig::default()
        };
        assert!(provider_from_config(&config).is_err());
    }

    #[test]
    fn test_hash_provider_from_config() {
        let config = EmbeddingConfig {
            provider: "hash".to_string(),
            dimension: 64,
            ..EmbeddingConfig::default()
        };
        let provider = provider_from_config(&config).unwrap();
        assert_eq!(provider.dimension(), 64);
    }
}
