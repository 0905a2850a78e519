//! Embedding vectors and cosine similarity.

use serde::{Deserialize, Serialize};

/// Dimensionality documented by the default embedding model.
pub const DEFAULT_DIMENSIONS: usize = 768;

/// A fixed-dimension numeric vector produced by an `EmbeddingService`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Embedding(Vec<f32>);

impl Embedding {
    pub fn new(values: Vec<f32>) -> Self {
        Self(values)
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn norm(&self) -> f32 {
        self.0.iter().map(|v| v * v).sum::<f32>().sqrt()
    }

    /// Cosine similarity clamped to `0.0..=1.0`.
    ///
    /// Mismatched dimensions or a zero vector score 0.
    pub fn similarity(&self, other: &Embedding) -> f32 {
        cosine_similarity(&self.0, &other.0)
    }
}

impl From<Vec<f32>> for Embedding {
    fn from(values: Vec<f32>) -> Self {
        Self(values)
    }
}

pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let mut dot = 0.0f32;
    let mut na = 0.0f32;
    let mut nb = 0.0f32;
    for (x, y) in a.iter().zip(b) {
        dot += x * y;
        na += x * x;
        nb += y * y;
    }
    if na == 0.0 || nb == 0.0 {
        return 0.0;
    }
    (dot / (na.sqrt() * nb.sqrt())).clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_vectors_score_one() {
        let a = Embedding::new(vec![0.3, 0.4, 0.5]);
        assert!((a.similarity(&a.clone()) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn orthogonal_vectors_score_zero() {
        let a = Embedding::new(vec![1.0, 0.0]);
        let b = Embedding::new(vec![0.0, 1.0]);
        assert_eq!(a.similarity(&b), 0.0);
    }

    #[test]
    fn opposite_vectors_clamp_to_zero() {
        let a = Embedding::new(vec![1.0, 1.0]);
        let b = Embedding::new(vec![-1.0, -1.0]);
        assert_eq!(a.similarity(&b), 0.0);
    }

    #[test]
    fn mismatched_dimensions_score_zero() {
        let a = Embedding::new(vec![1.0, 0.0, 0.0]);
        let b = Embedding::new(vec![1.0, 0.0]);
        assert_eq!(a.similarity(&b), 0.0);
    }

    #[test]
    fn zero_vector_scores_zero() {
        let a = Embedding::new(vec![0.0, 0.0]);
        let b = Embedding::new(vec![1.0, 0.0]);
        assert_eq!(a.similarity(&b), 0.0);
    }
}
