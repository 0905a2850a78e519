//! HashEmbedder - deterministic local stand-in for a remote embedding model
//!
//! Feature hashing over lower-cased word tokens and adjacent word pairs, L2-normalised.
//! Texts sharing vocabulary score high, identical texts score 1.0. Document and query
//! modes produce the same vector: there is no model to be asymmetric about.

use std::hash::{DefaultHasher, Hash, Hasher};

use async_trait::async_trait;

use crate::domain::Embedding;
use crate::domain::embedding::DEFAULT_DIMENSIONS;
use crate::error::EmbeddingError;
use crate::ports::EmbeddingService;

#[derive(Debug, Clone)]
pub struct HashEmbedder {
    dimensions: usize,
}

impl HashEmbedder {
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions: dimensions.max(1),
        }
    }

    pub fn embed(&self, text: &str) -> Result<Embedding, EmbeddingError> {
        let tokens: Vec<String> = text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
            .map(str::to_lowercase)
            .collect();
        if tokens.is_empty() {
            return Err(EmbeddingError::EmptyInput);
        }

        let mut values = vec![0.0f32; self.dimensions];
        for token in &tokens {
            self.add_feature(&mut values, token, 1.0);
        }
        for pair in tokens.windows(2) {
            self.add_feature(&mut values, &(pair[0].as_str(), pair[1].as_str()), 0.5);
        }

        let norm = values.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm == 0.0 {
            // Every feature cancelled out; fall back to a single bucket.
            values[0] = 1.0;
        } else {
            values.iter_mut().for_each(|v| *v /= norm);
        }
        Ok(Embedding::new(values))
    }

    fn add_feature(&self, values: &mut [f32], feature: &impl Hash, weight: f32) {
        let mut hasher = DefaultHasher::new();
        feature.hash(&mut hasher);
        let h = hasher.finish();
        let index = (h % self.dimensions as u64) as usize;
        let sign = if (h >> 63) == 0 { 1.0 } else { -1.0 };
        values[index] += sign * weight;
    }
}

impl Default for HashEmbedder {
    fn default() -> Self {
        Self::new(DEFAULT_DIMENSIONS)
    }
}

#[async_trait]
impl EmbeddingService for HashEmbedder {
    async fn embed_document(&self, text: &str) -> Result<Embedding, EmbeddingError> {
        self.embed(text)
    }

    async fn embed_query(&self, text: &str) -> Result<Embedding, EmbeddingError> {
        self.embed(text)
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }
}
