//! Scheduler - 依存関係付きタスクキュー
//!
//! # Design
//! - State is coordinator-owned: `Arc<Mutex<SchedulerState>>`. Spawned worker tasks only
//!   run the executor and report back over an mpsc channel; only the coordinator loop in
//!   `process_queue` applies reports.
//! - Backoff sleeps run on their own timer tasks and never hold a worker slot.
//! - Journal writes and metric events are flushed after the lock is released. Journal
//!   appends are queued to a writer task; a run returns once they have been persisted.
//!
//! # Lifecycle
//! ```text
//! Pending -> Ready -> Running -> Succeeded
//!                        |-> Retrying -> Ready
//!                        |-> Failed -> (dependents) Blocked
//!                        '-> Cancelled
//! ```

mod graph;
pub mod journal;
mod metrics;
mod ready;
mod retry;
mod state;

use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{Mutex, Notify, mpsc};
use tokio::time::Instant;

pub use journal::TaskTransition;
pub use metrics::{QueueDepthSample, RunMetrics, RunReport, TaskReport};
pub use retry::RetryPolicy;

use self::journal::Journal;
use self::state::{Effects, Launch, PlanSettings, RetryTimer, SchedulerState};
use crate::config::SchedulerConfig;
use crate::domain::{ExecutionPlan, Task, TaskId, TaskStatus};
use crate::error::{ExecutorError, SchedulerError};
use crate::impls::NoopMetricsSink;
use crate::ports::{ExecutionContext, MetricEvent, MetricsSink, PersistentStore, TaskExecutor};

/// What a worker or a retry timer tells the coordinator.
enum Report {
    Finished {
        index: usize,
        outcome: Result<serde_json::Value, ExecutorError>,
        elapsed: Duration,
    },
    RetryDue {
        index: usize,
    },
}

/// Result of `resume_plan`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ResumeSummary {
    /// False when the journal could not be read and the plan was submitted fresh.
    pub restored_from_journal: bool,

    /// Kept as Succeeded; never run again.
    pub succeeded: usize,

    /// Kept as Failed or Cancelled.
    pub terminal: usize,

    /// Interrupted mid-run, back to Pending with attempts preserved.
    pub requeued: usize,

    /// No journal entry.
    pub fresh: usize,
}

pub struct Scheduler {
    state: Arc<Mutex<SchedulerState>>,
    executor: Arc<dyn TaskExecutor>,
    journal: Journal,
    metrics: Arc<dyn MetricsSink>,
    wake: Arc<Notify>,

    /// One coordinator loop at a time.
    run_lock: Mutex<()>,
    default_concurrency: usize,
}

impl Scheduler {
    pub fn new(executor: Arc<dyn TaskExecutor>) -> Self {
        Self::with_config(executor, &SchedulerConfig::default())
    }

    pub fn with_config(executor: Arc<dyn TaskExecutor>, config: &SchedulerConfig) -> Self {
        let state = SchedulerState::new(
            config.retry_policy(),
            config.failure_policy,
            config.default_timeout(),
            config.queue_depth_samples,
        );
        Self {
            state: Arc::new(Mutex::new(state)),
            executor,
            journal: Journal::default(),
            metrics: Arc::new(NoopMetricsSink),
            wake: Arc::new(Notify::new()),
            run_lock: Mutex::new(()),
            default_concurrency: config.max_concurrent.max(1),
        }
    }

    /// Journal every status transition to `store`.
    pub fn with_store(mut self, store: Arc<dyn PersistentStore>) -> Self {
        self.journal = Journal::new(Some(store));
        self
    }

    pub fn with_metrics(mut self, sink: Arc<dyn MetricsSink>) -> Self {
        self.metrics = sink;
        self
    }

    // ---- submission ----

    /// Submit one task, adding `dependencies` to the ones it already declares.
    pub async fn submit(
        &self,
        mut task: Task,
        dependencies: impl IntoIterator<Item = TaskId>,
    ) -> Result<TaskId, SchedulerError> {
        task.dependencies.extend(dependencies);
        let id = task.id;
        self.submit_batch(vec![task]).await?;
        Ok(id)
    }

    /// Submit tasks atomically: either all of them enter the graph or none does.
    pub async fn submit_batch(&self, tasks: Vec<Task>) -> Result<Vec<TaskId>, SchedulerError> {
        let mut fx = Effects::default();
        let ids = self.state.lock().await.admit(tasks, false, &mut fx)?;
        tracing::debug!(count = ids.len(), "tasks submitted");
        self.publish(fx);
        self.wake.notify_one();
        Ok(ids)
    }

    /// Submit a plan's tasks under its execution config: its priorities override the
    /// tasks' own, its failure policy governs its tasks and its worker pairings are
    /// passed to the executor as hints.
    pub async fn submit_plan(&self, plan: &ExecutionPlan) -> Result<Vec<TaskId>, SchedulerError> {
        let tasks = plan_tasks(plan);
        let mut fx = Effects::default();
        let ids = {
            let mut state = self.state.lock().await;
            let ids = state.admit(tasks, false, &mut fx)?;
            state.register_plan(plan.id(), plan_settings(plan));
            ids
        };
        tracing::info!(plan_id = %plan.id(), goal = plan.goal(), tasks = ids.len(), "plan submitted");
        self.publish(fx);
        self.wake.notify_one();
        Ok(ids)
    }

    /// Re-submit a plan after a crash, restoring what its journal in `store` says.
    ///
    /// Succeeded tasks stay Succeeded and are not run again; Failed and Cancelled tasks
    /// keep their outcome; anything caught mid-run goes back to Pending with its attempt
    /// count. An unreadable journal degrades to a fresh submission.
    pub async fn resume_plan(
        &self,
        plan: &ExecutionPlan,
        store: &dyn PersistentStore,
    ) -> Result<ResumeSummary, SchedulerError> {
        let mut summary = ResumeSummary::default();
        let known = match journal::last_known_states(store, plan.id()).await {
            Ok(known) => {
                summary.restored_from_journal = true;
                known
            }
            Err(err) => {
                tracing::warn!(plan_id = %plan.id(), error = %err, "task journal unavailable, resubmitting plan from scratch");
                HashMap::new()
            }
        };

        let mut tasks = plan_tasks(plan);
        for task in &mut tasks {
            let Some(last) = known.get(&task.id) else {
                summary.fresh += 1;
                continue;
            };
            task.attempts = last.attempts;
            match last.status {
                TaskStatus::Succeeded => {
                    task.status = TaskStatus::Succeeded;
                    task.result = last.result.clone();
                    summary.succeeded += 1;
                }
                TaskStatus::Failed | TaskStatus::Cancelled => {
                    task.status = last.status;
                    task.error = last.error.clone();
                    summary.terminal += 1;
                }
                _ => {
                    task.status = TaskStatus::Pending;
                    summary.requeued += 1;
                }
            }
        }

        let mut fx = Effects::default();
        {
            let mut state = self.state.lock().await;
            state.admit(tasks, true, &mut fx)?;
            state.register_plan(plan.id(), plan_settings(plan));
        }
        tracing::info!(
            plan_id = %plan.id(),
            succeeded = summary.succeeded,
            terminal = summary.terminal,
            requeued = summary.requeued,
            fresh = summary.fresh,
            "plan resumed"
        );
        self.publish(fx);
        self.wake.notify_one();
        Ok(summary)
    }

    // ---- execution ----

    /// Run until every reachable task has settled. `max_concurrent` of 0 uses the
    /// configured default.
    pub async fn process_queue(&self, max_concurrent: usize) -> RunReport {
        let _run = self.run_lock.lock().await;
        let limit = if max_concurrent == 0 {
            self.default_concurrency
        } else {
            max_concurrent
        };
        let started = Instant::now();
        let (tx, mut rx) = mpsc::unbounded_channel::<Report>();
        self.state.lock().await.begin_run(started);
        tracing::info!(max_concurrent = limit, "run started");

        loop {
            let mut fx = Effects::default();
            let (launches, idle) = {
                let mut state = self.state.lock().await;
                let launches: Vec<Launch> =
                    std::iter::from_fn(|| state.next_launch(limit, &mut fx)).collect();
                let sample = state.sample_depth(started.elapsed());
                fx.events.push(MetricEvent::QueueDepth {
                    ready: sample.ready,
                    running: sample.running,
                });
                (launches, state.is_idle())
            };
            self.flush(fx, &tx);
            for launch in launches {
                self.spawn_attempt(launch, tx.clone());
            }
            if idle {
                break;
            }

            tokio::select! {
                Some(report) = rx.recv() => {
                    let mut fx = Effects::default();
                    {
                        let mut state = self.state.lock().await;
                        match report {
                            Report::Finished { index, outcome, elapsed } => {
                                state.on_finished(index, outcome, elapsed, &mut fx)
                            }
                            Report::RetryDue { index } => state.on_retry_due(index, &mut fx),
                        }
                    }
                    self.flush(fx, &tx);
                }
                _ = self.wake.notified() => {}
            }
        }

        let report = self.state.lock().await.finish_run();
        self.journal.flushed().await;
        let m = &report.metrics;
        self.metrics.emit(MetricEvent::RunCompleted {
            total: m.total,
            success_rate: m.success_rate,
            avg_execution_ms: m.avg_execution_ms,
            p95_execution_ms: m.p95_execution_ms,
            wall_clock_ms: m.wall_clock_ms,
        });
        tracing::info!(
            total = m.total,
            succeeded = m.succeeded,
            failed = m.failed,
            blocked = m.blocked,
            cancelled = m.cancelled,
            retries = m.retries,
            wall_clock_ms = m.wall_clock_ms,
            "run finished"
        );
        report
    }

    // ---- control ----

    /// Cancel a task. Returns `Running` when only a cancellation signal could be sent.
    pub async fn cancel(&self, id: TaskId) -> Result<TaskStatus, SchedulerError> {
        let mut fx = Effects::default();
        let status = self.state.lock().await.cancel(id, &mut fx)?;
        tracing::info!(task_id = %id, status = status.as_str(), "cancel requested");
        self.publish(fx);
        self.wake.notify_one();
        Ok(status)
    }

    /// Requeue a Failed or Cancelled task with a fresh attempt budget.
    pub async fn retry_task(&self, id: TaskId) -> Result<TaskStatus, SchedulerError> {
        let mut fx = Effects::default();
        let status = self.state.lock().await.retry_task(id, &mut fx)?;
        tracing::info!(task_id = %id, status = status.as_str(), "task requeued");
        self.publish(fx);
        self.wake.notify_one();
        Ok(status)
    }

    pub async fn get_status(&self, id: TaskId) -> Result<TaskStatus, SchedulerError> {
        self.state.lock().await.status(id)
    }

    pub async fn get_task(&self, id: TaskId) -> Option<Task> {
        self.state.lock().await.task(id)
    }

    /// Live counts and timings; includes the current run if one is in progress.
    pub async fn get_metrics(&self) -> RunMetrics {
        self.state.lock().await.metrics()
    }

    // ---- internals ----

    fn publish(&self, fx: Effects) {
        self.journal.write(fx.transitions);
        for event in fx.events {
            self.metrics.emit(event);
        }
    }

    fn flush(&self, mut fx: Effects, tx: &mpsc::UnboundedSender<Report>) {
        for timer in std::mem::take(&mut fx.timers) {
            spawn_timer(timer, tx.clone());
        }
        self.publish(fx);
    }

    fn spawn_attempt(&self, launch: Launch, tx: mpsc::UnboundedSender<Report>) {
        let executor = Arc::clone(&self.executor);
        tokio::spawn(async move {
            let started = Instant::now();
            let outcome = run_attempt(executor, launch.task, launch.ctx, launch.timeout).await;
            let _ = tx.send(Report::Finished {
                index: launch.index,
                outcome,
                elapsed: started.elapsed(),
            });
        });
    }
}

fn spawn_timer(timer: RetryTimer, tx: mpsc::UnboundedSender<Report>) {
    tokio::spawn(async move {
        tokio::select! {
            _ = tokio::time::sleep(timer.delay) => {
                let _ = tx.send(Report::RetryDue { index: timer.index });
            }
            _ = timer.cancel.cancelled() => {}
        }
    });
}

/// Run one attempt on its own task so a panic or a timeout stays an attempt failure.
async fn run_attempt(
    executor: Arc<dyn TaskExecutor>,
    task: Task,
    ctx: ExecutionContext,
    timeout: Option<Duration>,
) -> Result<serde_json::Value, ExecutorError> {
    let handle = tokio::spawn(async move { executor.execute(&task, ctx).await });
    let abort = handle.abort_handle();
    let joined = match timeout {
        Some(limit) => match tokio::time::timeout(limit, handle).await {
            Ok(joined) => joined,
            Err(_) => {
                abort.abort();
                return Err(ExecutorError::TimedOut {
                    after_ms: limit.as_millis() as u64,
                });
            }
        },
        None => handle.await,
    };
    match joined {
        Ok(outcome) => outcome,
        Err(err) if err.is_panic() => Err(ExecutorError::Panicked(panic_message(err.into_panic()))),
        Err(_) => Err(ExecutorError::Cancelled),
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

fn plan_tasks(plan: &ExecutionPlan) -> Vec<Task> {
    let priorities = &plan.config().priorities;
    plan.tasks()
        .iter()
        .cloned()
        .map(|mut task| {
            if let Some(priority) = priorities.get(&task.key()) {
                task.priority = *priority;
            }
            task.plan_id = Some(plan.id());
            task
        })
        .collect()
}

fn plan_settings(plan: &ExecutionPlan) -> PlanSettings {
    PlanSettings {
        failure_policy: plan.config().failure_policy,
        pairings: plan
            .config()
            .worker_pairings
            .iter()
            .map(|p| (p.task_key.clone(), p.worker.clone()))
            .collect(),
    }
}
