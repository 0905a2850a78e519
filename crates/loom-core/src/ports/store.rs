//! PersistentStore port: append-mostly record log with vector and metadata search.
//!
//! Three record kinds share one store:
//! - `task_status`: scheduler transitions, read back for crash recovery
//! - `match_outcome`: matcher learning history
//! - `plan_record`: optimizer history
//!
//! The store is never used as a lock and never asked for "everything": callers page
//! with `offset` + `limit`.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{Embedding, RecordId};
use crate::error::StoreError;

/// Page size used by `PersistentStore::count`'s default implementation.
pub const COUNT_PAGE_SIZE: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    TaskStatus,
    MatchOutcome,
    PlanRecord,
}

impl RecordKind {
    pub fn as_str(self) -> &'static str {
        match self {
            RecordKind::TaskStatus => "task_status",
            RecordKind::MatchOutcome => "match_outcome",
            RecordKind::PlanRecord => "plan_record",
        }
    }
}

/// Kind plus free-form string tags (`task_id`, `plan_id`, `worker_id`, `fingerprint`, ...).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordMetadata {
    pub kind: RecordKind,

    #[serde(default)]
    pub tags: BTreeMap<String, String>,
}

impl RecordMetadata {
    pub fn new(kind: RecordKind) -> Self {
        Self {
            kind,
            tags: BTreeMap::new(),
        }
    }

    pub fn with_tag(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.tags.insert(key.into(), value.to_string());
        self
    }

    pub fn tag(&self, key: &str) -> Option<&str> {
        self.tags.get(key).map(String::as_str)
    }
}

/// Record as handed to `append`.
#[derive(Debug, Clone, PartialEq)]
pub struct NewRecord {
    pub payload: serde_json::Value,

    /// Only records with an embedding can be found by vector search.
    pub embedding: Option<Embedding>,
}

impl NewRecord {
    pub fn new(payload: serde_json::Value) -> Self {
        Self {
            payload,
            embedding: None,
        }
    }

    pub fn with_embedding(mut self, embedding: Embedding) -> Self {
        self.embedding = Some(embedding);
        self
    }
}

/// Record as persisted, with the id and timestamp assigned by the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredRecord {
    pub id: RecordId,
    pub metadata: RecordMetadata,
    pub payload: serde_json::Value,

    #[serde(default)]
    pub embedding: Option<Embedding>,
    pub created_at: DateTime<Utc>,
}

/// Equality filter over metadata. An empty filter matches everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetadataFilter {
    pub kind: Option<RecordKind>,
    pub equals: BTreeMap<String, String>,
}

impl MetadataFilter {
    pub fn kind(kind: RecordKind) -> Self {
        Self {
            kind: Some(kind),
            equals: BTreeMap::new(),
        }
    }

    pub fn with_tag(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.equals.insert(key.into(), value.to_string());
        self
    }

    pub fn matches(&self, metadata: &RecordMetadata) -> bool {
        if self.kind.is_some_and(|kind| kind != metadata.kind) {
            return false;
        }
        self.equals
            .iter()
            .all(|(key, value)| metadata.tag(key) == Some(value.as_str()))
    }
}

/// A search request.
///
/// With `vector`, hits are ranked by cosine similarity (desc) and records without an
/// embedding are skipped. Without it, hits come back in insertion order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SearchQuery {
    pub vector: Option<Embedding>,
    pub filter: MetadataFilter,

    /// Vector queries only: drop hits scoring below this.
    pub min_score: Option<f32>,

    /// Number of leading hits to skip (pagination).
    pub offset: usize,
}

impl SearchQuery {
    pub fn filter(filter: MetadataFilter) -> Self {
        Self {
            filter,
            ..Self::default()
        }
    }

    pub fn similar_to(vector: Embedding, filter: MetadataFilter) -> Self {
        Self {
            vector: Some(vector),
            filter,
            ..Self::default()
        }
    }

    pub fn with_min_score(mut self, min_score: f32) -> Self {
        self.min_score = Some(min_score);
        self
    }

    pub fn with_offset(mut self, offset: usize) -> Self {
        self.offset = offset;
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScoredRecord {
    pub record: StoredRecord,

    /// Cosine similarity for vector queries, 1.0 for filter-only queries.
    pub score: f32,
}

#[async_trait]
pub trait PersistentStore: Send + Sync {
    async fn append(
        &self,
        record: NewRecord,
        metadata: RecordMetadata,
    ) -> Result<RecordId, StoreError>;

    async fn search(&self, query: SearchQuery, limit: usize)
    -> Result<Vec<ScoredRecord>, StoreError>;

    /// Number of records matching `filter`.
    ///
    /// The default implementation pages through `search`; stores that can count
    /// natively should override it.
    async fn count(&self, filter: MetadataFilter) -> Result<usize, StoreError> {
        let mut total = 0;
        loop {
            let page = self
                .search(
                    SearchQuery::filter(filter.clone()).with_offset(total),
                    COUNT_PAGE_SIZE,
                )
                .await?;
            total += page.len();
            if page.len() < COUNT_PAGE_SIZE {
                return Ok(total);
            }
        }
    }
}
