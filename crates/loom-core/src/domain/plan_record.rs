//! PlanRecord and optimization suggestions: the append-only learning log.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::embedding::Embedding;
use super::ids::{PlanId, RecordId};
use super::plan::{ExecutionConfig, FailurePolicy, WorkerPairing};
use super::task::Priority;

/// Shape of a task graph, independent of task ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PlanStructure {
    pub task_count: usize,
    pub edge_count: usize,

    /// Number of tasks on the longest dependency chain.
    pub depth: usize,

    /// Largest number of tasks sharing one topological level.
    pub max_width: usize,
}

/// Outcome metrics of one plan execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanMetrics {
    /// Succeeded tasks / all tasks, 0..1.
    pub success_rate: f64,
    pub total_duration_ms: u64,

    /// Caller-supplied aggregate quality, 0..1.
    pub quality_score: f64,

    /// Which worker ran which kind of task.
    #[serde(default)]
    pub worker_assignments: BTreeSet<WorkerPairing>,
}

/// Persisted once on plan completion, never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanRecord {
    pub plan_id: PlanId,
    pub goal: String,
    pub structure: PlanStructure,
    pub config: ExecutionConfig,
    pub metrics: PlanMetrics,

    /// Groups executions of the same pattern (goal + structure + config).
    pub fingerprint: String,

    /// 1 for the first record of a fingerprint, previous count + 1 afterwards.
    pub occurrence: u64,
    pub embedding: Embedding,
    pub recorded_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SuggestionKind {
    /// Run with this concurrency level ("increase parallelism" when it is higher).
    AdjustConcurrency { max_concurrent: usize },

    /// Give tasks with this key a different priority.
    ReorderPriority { task_key: String, priority: Priority },

    /// Assign tasks with this key to the worker that handled them before.
    ReuseWorkerPairing { pairing: WorkerPairing },

    SwitchFailurePolicy { policy: FailurePolicy },
}

impl SuggestionKind {
    /// Apply this suggestion to a configuration.
    pub fn apply(&self, config: &mut ExecutionConfig) {
        match self {
            SuggestionKind::AdjustConcurrency { max_concurrent } => {
                config.max_concurrent = *max_concurrent;
            }
            SuggestionKind::ReorderPriority { task_key, priority } => {
                config.priorities.insert(task_key.clone(), *priority);
            }
            SuggestionKind::ReuseWorkerPairing { pairing } => {
                config.worker_pairings.insert(pairing.clone());
            }
            SuggestionKind::SwitchFailurePolicy { policy } => {
                config.failure_policy = *policy;
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizationSuggestion {
    pub kind: SuggestionKind,

    /// Records this suggestion was derived from (capped).
    pub sources: Vec<RecordId>,

    /// Number of distinct historical records proposing the same change.
    pub recurrence: usize,
    pub confidence: f64,
}
