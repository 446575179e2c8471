//! Deterministic feature-hashing embedder

use super::{EmbeddingError, EmbeddingProvider};
use ahash::RandomState;

/// Bag-of-words embedder using signed feature hashing.
///
/// Texts sharing tokens end up close in cosine distance. No model is loaded, so it
/// works offline and gives identical vectors across runs.
pub struct HashEmbedder {
    dimension: usize,
    hasher: RandomState,
    model_name: String,
}

impl HashEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension: dimension.max(1),
            hasher: RandomState::with_seeds(0x5158, 0x2f1d, 0x77a3, 0x0c41),
            model_name: format!("hash-{}", dimension.max(1)),
        }
    }

    fn tokens(text: &str) -> impl Iterator<Item = String> + '_ {
        text.split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
            .map(str::to_lowercase)
    }
}

impl Default for HashEmbedder {
    fn default() -> Self {
        Self::new(384)
    }
}

impl EmbeddingProvider for HashEmbedder {
    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let mut vector = vec![0.0f32; self.dimension];
        for token in Self::tokens(text) {
            let hash = self.hasher.hash_one(&token);
            let bucket = (hash % self.dimension as u64) as usize;
            let sign = if (hash >> 63) == 0 { 1.0 } else { -1.0 };
            vector[bucket] += sign;
        }

        let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for x in vector.iter_mut() {
                *x /= norm;
            }
        }
        Ok(vector)
    }

    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        texts.iter().map(|t| self.embed(t)).collect()
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn model_name(&self) -> &str {
        &self.model_name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::cosine_distance;

    #[test]
    fn test_deterministic() {
        let a = HashEmbedder::new(64);
        let b = HashEmbedder::new(64);
        assert_eq!(a.embed("hello world").unwrap(), b.embed("hello world").unwrap());
    }

    #[test]
    fn test_identical_text_has_zero_distance() {
        let embedder = HashEmbedder::new(128);
        let v = embedder.embed("{\"name\": \"alice\"}").unwrap();
        assert!(cosine_distance(&v, &v).abs() < 1e-5);
        assert_eq!(v.len(), 128);
    }

    #[test]
    fn test_shared_tokens_are_closer() {
        let embedder = HashEmbedder::new(256);
        let query = embedder.embed("rust compiler").unwrap();
        let near = embedder.embed("the rust compiler book").unwrap();
        let far = embedder.embed("gardening tips for spring").unwrap();
        assert!(cosine_distance(&query, &near) < cosine_distance(&query, &far));
    }

    #[test]
    fn test_empty_text_is_zero_vector() {
        let embedder = HashEmbedder::new(8);
        let v = embedder.embed("").unwrap();
        assert!(v.iter().all(|x| *x == 0.0));
    }
}
