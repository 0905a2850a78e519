//! EmbeddingService port.
//!
//! Two asymmetric modes: `embed_document` for things that are indexed (worker
//! capabilities, plan records) and `embed_query` for things that are looked up
//! (task requirements, a new plan). Callers must keep the pairing consistent.

use async_trait::async_trait;

use crate::domain::Embedding;
use crate::error::EmbeddingError;

#[async_trait]
pub trait EmbeddingService: Send + Sync {
    async fn embed_document(&self, text: &str) -> Result<Embedding, EmbeddingError>;

    async fn embed_query(&self, text: &str) -> Result<Embedding, EmbeddingError>;

    /// Length of every vector this service returns.
    fn dimensions(&self) -> usize;
}
