//! Decision model: what the scheduler does after a failed attempt, and the record explaining it.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::TaskId;

/// The next action for a task whose attempt just failed.
#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    /// Sleep `delay`, then put the task back in the ready queue.
    Retry { delay: Duration, reason: String },

    /// Give up: the task becomes Failed.
    GiveUp { reason: String },
}

impl Decision {
    pub fn name(&self) -> &'static str {
        match self {
            Decision::Retry { .. } => "schedule_retry",
            Decision::GiveUp { .. } => "mark_failed",
        }
    }

    pub fn reason(&self) -> &str {
        match self {
            Decision::Retry { reason, .. } | Decision::GiveUp { reason } => reason,
        }
    }
}

/// A decision made during execution.
///
/// Records:
/// - What observation led to this decision (`trigger`)
/// - What policy was applied
/// - What action was taken (retry, give up, block dependents, abort the plan)
///
/// Returned in the run report so "why was this retried / why did this fail" can be answered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionRecord {
    pub task_id: TaskId,

    /// What was observed that triggered this decision (usually the task error).
    pub trigger: serde_json::Value,

    /// Examples: "retry_policy", "failure_policy"
    pub policy: String,

    /// Examples: "schedule_retry", "mark_failed", "block_dependents", "abort_plan"
    pub decision: String,

    pub context: Option<serde_json::Value>,

    pub decided_at: DateTime<Utc>,
}

impl DecisionRecord {
    pub fn new(
        task_id: TaskId,
        trigger: serde_json::Value,
        policy: impl Into<String>,
        decision: impl Into<String>,
        context: Option<serde_json::Value>,
    ) -> Self {
        Self {
            task_id,
            trigger,
            policy: policy.into(),
            decision: decision.into(),
            context,
            decided_at: Utc::now(),
        }
    }
}
