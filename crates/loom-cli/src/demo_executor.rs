use async_trait::async_trait;
use serde::Deserialize;
use tokio::time::{Duration, sleep};

use loom_core::domain::Task;
use loom_core::error::ExecutorError;
use loom_core::ports::{ExecutionContext, TaskExecutor};

/// Payload knobs understood by the demo executor.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct DemoPayload {
    /// Simulated work.
    sleep_ms: u64,

    /// The first `fail_times` attempts fail.
    fail_times: u32,
}

/// Executor for trying plans out: sleeps, fails on request, echoes what it ran.
#[derive(Debug, Default)]
pub struct DemoExecutor {
    worker: Option<String>,
}

impl DemoExecutor {
    pub fn for_worker(name: impl Into<String>) -> Self {
        Self {
            worker: Some(name.into()),
        }
    }
}

#[async_trait]
impl TaskExecutor for DemoExecutor {
    async fn execute(
        &self,
        task: &Task,
        ctx: ExecutionContext,
    ) -> Result<serde_json::Value, ExecutorError> {
        let payload: DemoPayload = if task.payload.is_null() {
            DemoPayload::default()
        } else {
            serde_json::from_value(task.payload.clone())
                .map_err(|e| ExecutorError::failed(format!("payload decode: {e}")))?
        };

        if payload.sleep_ms > 0 {
            tokio::select! {
                _ = sleep(Duration::from_millis(payload.sleep_ms)) => {}
                _ = ctx.cancel.cancelled() => return Err(ExecutorError::Cancelled),
            }
        }

        if ctx.attempt <= payload.fail_times {
            return Err(ExecutorError::failed(format!(
                "intentional failure (attempt={}, fail_times={})",
                ctx.attempt, payload.fail_times
            )));
        }

        Ok(serde_json::json!({
            "task": task.description,
            "attempt": ctx.attempt,
            "worker": self.worker.as_deref().or(ctx.worker.as_deref()),
        }))
    }
}

#[cfg(test)]
mod tests {
    use tokio_util::sync::CancellationToken;

    use super::*;

    fn ctx(attempt: u32) -> ExecutionContext {
        ExecutionContext::new(attempt, CancellationToken::new())
    }

    #[tokio::test]
    async fn fails_the_first_attempts_then_succeeds() {
        let task = Task::new("flaky").with_payload(serde_json::json!({ "fail_times": 2 }));
        let exec = DemoExecutor::default();

        assert!(exec.execute(&task, ctx(1)).await.is_err());
        assert!(exec.execute(&task, ctx(2)).await.is_err());
        let out = exec.execute(&task, ctx(3)).await.unwrap();
        assert_eq!(out["attempt"], 3);
    }

    #[tokio::test(start_paused = true)]
    async fn sleeping_task_observes_cancellation() {
        let task = Task::new("slow").with_payload(serde_json::json!({ "sleep_ms": 60_000 }));
        let ctx = ctx(1);
        ctx.cancel.cancel();

        let err = DemoExecutor::default().execute(&task, ctx).await.unwrap_err();
        assert_eq!(err, ExecutorError::Cancelled);
    }

    #[tokio::test]
    async fn reports_the_worker_it_ran_on() {
        let out = DemoExecutor::for_worker("pdf-box")
            .execute(&Task::new("render"), ctx(1))
            .await
            .unwrap();
        assert_eq!(out["worker"], "pdf-box");
        assert_eq!(out["task"], "render");
    }

    #[tokio::test]
    async fn bad_payload_is_an_attempt_failure() {
        let task = Task::new("x").with_payload(serde_json::json!({ "sleep_ms": "soon" }));
        let err = DemoExecutor::default().execute(&task, ctx(1)).await.unwrap_err();
        assert!(matches!(err, ExecutorError::Failed(m) if m.contains("payload decode")));
    }
}
