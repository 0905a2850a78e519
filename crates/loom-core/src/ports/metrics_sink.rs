//! MetricsSink port. Transport is up to the implementation.

use serde::Serialize;

use crate::domain::{MatchSource, PlanId, TaskId, TaskStatus, WorkerId};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum MetricEvent {
    /// A task settled (Succeeded, Failed, Cancelled or Blocked).
    TaskSettled {
        task_id: TaskId,
        status: TaskStatus,
        attempts: u32,
        execution_ms: Option<u64>,
    },

    QueueDepth { ready: usize, running: usize },

    RunCompleted {
        total: usize,
        success_rate: f64,
        avg_execution_ms: f64,
        p95_execution_ms: u64,
        wall_clock_ms: u64,
    },

    MatchDecision {
        worker_id: WorkerId,
        source: MatchSource,
        similarity: f32,
        confidence: f32,
    },

    MatchAccuracy {
        confirmed: u64,
        succeeded: u64,
        accuracy: f64,
    },

    PlanRecorded {
        plan_id: PlanId,
        occurrence: u64,
        success_rate: f64,
    },
}

pub trait MetricsSink: Send + Sync {
    fn emit(&self, event: MetricEvent);
}
