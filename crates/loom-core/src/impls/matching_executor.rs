//! MatchingExecutor - 実行時にワーカーを割り当てる TaskExecutor
//!
//! # フロー
//! 1. Plan pairing hint (`ExecutionContext::worker`) names a pooled worker -> use it
//! 2. Otherwise ask the `WorkerMatcher` for a worker among the pool
//! 3. Run the task on that worker's executor, counting it in the worker's load
//! 4. Report the outcome back to the matcher
//!
//! Tasks without requirements and without a hint go to the default executor when one
//! is set.

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::domain::{MatchResult, Task, Worker, WorkerId, WorkerPairing};
use crate::error::ExecutorError;
use crate::matcher::{WorkerMatcher, requirements_of};
use crate::ports::{ExecutionContext, TaskExecutor};

struct PooledWorker {
    worker: Worker,
    executor: Arc<dyn TaskExecutor>,
}

/// Decrements the worker's load when the attempt ends, even if it is aborted.
struct LoadGuard<'a> {
    pool: &'a Mutex<Vec<PooledWorker>>,
    worker: WorkerId,
}

impl Drop for LoadGuard<'_> {
    fn drop(&mut self) {
        let mut pool = self.pool.lock().unwrap_or_else(|p| p.into_inner());
        if let Some(pooled) = pool.iter_mut().find(|p| p.worker.id == self.worker) {
            pooled.worker.load = pooled.worker.load.saturating_sub(1);
        }
    }
}

pub struct MatchingExecutor {
    matcher: Arc<WorkerMatcher>,
    pool: Mutex<Vec<PooledWorker>>,
    default: Option<Arc<dyn TaskExecutor>>,
    assignments: Mutex<BTreeSet<WorkerPairing>>,
}

impl MatchingExecutor {
    pub fn new(matcher: Arc<WorkerMatcher>) -> Self {
        Self {
            matcher,
            pool: Mutex::new(Vec::new()),
            default: None,
            assignments: Mutex::new(BTreeSet::new()),
        }
    }

    pub fn with_worker(self, worker: Worker, executor: Arc<dyn TaskExecutor>) -> Self {
        self.pool
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push(PooledWorker { worker, executor });
        self
    }

    /// Executor for tasks that declare no requirements.
    pub fn with_default(mut self, executor: Arc<dyn TaskExecutor>) -> Self {
        self.default = Some(executor);
        self
    }

    /// Snapshot of the pool with current loads.
    pub fn workers(&self) -> Vec<Worker> {
        self.pool
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .iter()
            .map(|p| p.worker.clone())
            .collect()
    }

    /// Task key -> worker pairs that succeeded so far.
    pub fn assignments(&self) -> BTreeSet<WorkerPairing> {
        self.assignments
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }

    /// Claim a worker: bump its load and hand back what is needed to run on it.
    fn claim(&self, id: WorkerId) -> Option<(Worker, Arc<dyn TaskExecutor>, LoadGuard<'_>)> {
        let mut pool = self.pool.lock().unwrap_or_else(|p| p.into_inner());
        let pooled = pool.iter_mut().find(|p| p.worker.id == id)?;
        pooled.worker.load += 1;
        Some((
            pooled.worker.clone(),
            Arc::clone(&pooled.executor),
            LoadGuard {
                pool: &self.pool,
                worker: id,
            },
        ))
    }

    fn find_by_name(&self, name: &str) -> Option<WorkerId> {
        self.pool
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .iter()
            .find(|p| p.worker.name == name)
            .map(|p| p.worker.id)
    }

    async fn choose(
        &self,
        task: &Task,
        ctx: &ExecutionContext,
    ) -> Result<(WorkerId, Option<MatchResult>), ExecutorError> {
        if let Some(name) = &ctx.worker {
            match self.find_by_name(name) {
                Some(id) => return Ok((id, None)),
                None => tracing::warn!(
                    task_id = %task.id,
                    worker = %name,
                    "paired worker not in pool, matching instead"
                ),
            }
        }
        let candidates = self.workers();
        let result = self
            .matcher
            .match_task(task, &candidates)
            .await
            .map_err(|err| ExecutorError::failed(format!("no worker for task: {err}")))?;
        Ok((result.worker_id, Some(result)))
    }
}

#[async_trait]
impl TaskExecutor for MatchingExecutor {
    async fn execute(
        &self,
        task: &Task,
        ctx: ExecutionContext,
    ) -> Result<serde_json::Value, ExecutorError> {
        if task.requirements.is_none()
            && ctx.worker.is_none()
            && let Some(default) = &self.default
        {
            return default.execute(task, ctx).await;
        }

        let (worker_id, matched) = self.choose(task, &ctx).await?;
        let (worker, executor, guard) = self
            .claim(worker_id)
            .ok_or_else(|| ExecutorError::failed(format!("worker {worker_id} left the pool")))?;
        tracing::debug!(task_id = %task.id, worker = %worker.name, load = worker.load, "task assigned");

        let outcome = executor.execute(task, ctx).await;
        drop(guard);

        if outcome.is_ok() {
            self.assignments
                .lock()
                .unwrap_or_else(|p| p.into_inner())
                .insert(WorkerPairing::new(task.key(), worker.name.clone()));
        }
        if let Some(result) = matched
            && outcome != Err(ExecutorError::Cancelled)
        {
            self.matcher
                .record_outcome(&requirements_of(task), &result, outcome.is_ok())
                .await;
        }
        outcome
    }
}
