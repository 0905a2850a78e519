//! Match results and the learning record persisted for confirmed outcomes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::embedding::Embedding;
use super::ids::{TaskId, WorkerId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchSource {
    Embedding,
    RuleBased,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchResult {
    pub task_id: Option<TaskId>,
    pub worker_id: WorkerId,
    pub worker_name: String,

    /// Raw cosine similarity (embedding) or skill coverage (rule-based), 0..1.
    pub similarity_score: f32,
    pub match_source: MatchSource,
    pub confidence: f32,

    /// Query-side embedding of the task, kept so the outcome can be learned without re-embedding.
    #[serde(skip)]
    pub task_embedding: Option<Embedding>,
}

/// Payload of a `match_outcome` store record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchOutcomeRecord {
    pub task_id: Option<TaskId>,
    pub worker_id: WorkerId,
    pub worker_name: String,
    pub match_source: MatchSource,
    pub similarity_score: f32,
    pub succeeded: bool,
    pub recorded_at: DateTime<Utc>,
}
