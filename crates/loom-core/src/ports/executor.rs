//! TaskExecutor port: the only component that actually performs task work.

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::domain::Task;
use crate::error::ExecutorError;

/// Per-attempt context handed to the executor.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    /// 1-based attempt number.
    pub attempt: u32,

    /// Worker name pinned for this task by the plan's worker pairings.
    pub worker: Option<String>,

    /// Triggered when the task is cancelled (or the plan aborted). Best effort:
    /// executors that ignore it simply run to completion.
    pub cancel: CancellationToken,
}

impl ExecutionContext {
    pub fn new(attempt: u32, cancel: CancellationToken) -> Self {
        Self {
            attempt,
            worker: None,
            cancel,
        }
    }
}

#[async_trait]
pub trait TaskExecutor: Send + Sync {
    async fn execute(
        &self,
        task: &Task,
        ctx: ExecutionContext,
    ) -> Result<serde_json::Value, ExecutorError>;
}
