//! Coordinator-owned scheduler state and every status transition.
//!
//! Design:
//! - The graph arena is the single source of truth for task state; the ready queue,
//!   running set and retry timers only hold indices.
//! - Methods are synchronous and run under the scheduler lock. Side effects that must
//!   happen outside the lock (journal writes, metric events, retry timers) are collected
//!   into `Effects`.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::graph::TaskGraph;
use super::journal::TaskTransition;
use super::metrics::{QueueDepthSample, RunMetrics, RunReport, RunStats, TaskReport};
use super::ready::ReadyQueue;
use super::retry::RetryPolicy;
use crate::domain::{
    Decision, DecisionRecord, FailurePolicy, PlanId, Task, TaskError, TaskId, TaskStatus,
};
use crate::error::{ExecutorError, SchedulerError};
use crate::ports::{ExecutionContext, MetricEvent};

/// A task handed to the worker pool.
pub(crate) struct Launch {
    pub index: usize,
    pub task: Task,
    pub ctx: ExecutionContext,
    pub timeout: Option<Duration>,
}

pub(crate) struct RetryTimer {
    pub index: usize,
    pub delay: Duration,
    pub cancel: CancellationToken,
}

#[derive(Default)]
pub(crate) struct Effects {
    pub transitions: Vec<TaskTransition>,
    pub events: Vec<MetricEvent>,
    pub timers: Vec<RetryTimer>,
}

struct RunningTask {
    cancel: CancellationToken,

    /// Set when cancellation was requested while the attempt was in flight.
    cancel_reason: Option<TaskError>,
}

/// Per-plan settings taken from its `ExecutionConfig`.
#[derive(Debug, Clone, Default)]
pub(crate) struct PlanSettings {
    pub failure_policy: FailurePolicy,

    /// Task key -> worker name.
    pub pairings: HashMap<String, String>,
}

pub(crate) struct SchedulerState {
    graph: TaskGraph,
    ready: ReadyQueue,
    running: HashMap<usize, RunningTask>,
    retrying: HashMap<usize, CancellationToken>,
    plans: HashMap<PlanId, PlanSettings>,
    decisions: Vec<DecisionRecord>,
    last_execution_ms: HashMap<usize, u64>,
    stats: RunStats,
    run_started: Option<Instant>,

    default_policy: FailurePolicy,
    retry_policy: RetryPolicy,
    default_timeout: Option<Duration>,
    depth_capacity: usize,
}

impl SchedulerState {
    pub fn new(
        retry_policy: RetryPolicy,
        default_policy: FailurePolicy,
        default_timeout: Option<Duration>,
        depth_capacity: usize,
    ) -> Self {
        Self {
            graph: TaskGraph::new(),
            ready: ReadyQueue::default(),
            running: HashMap::new(),
            retrying: HashMap::new(),
            plans: HashMap::new(),
            decisions: Vec::new(),
            last_execution_ms: HashMap::new(),
            stats: RunStats::new(depth_capacity),
            run_started: None,
            default_policy,
            retry_policy,
            default_timeout,
            depth_capacity,
        }
    }

    // ---- queries ----

    pub fn status(&self, id: TaskId) -> Result<TaskStatus, SchedulerError> {
        self.graph
            .task(id)
            .map(|t| t.status)
            .ok_or(SchedulerError::TaskNotFound(id))
    }

    pub fn task(&self, id: TaskId) -> Option<Task> {
        self.graph.task(id).cloned()
    }

    pub fn is_idle(&self) -> bool {
        self.ready.is_empty() && self.running.is_empty() && self.retrying.is_empty()
    }

    pub fn metrics(&self) -> RunMetrics {
        let mut m = RunMetrics::default();
        for node in self.graph.nodes() {
            m.total += 1;
            match node.task.status {
                TaskStatus::Pending => m.pending += 1,
                TaskStatus::Ready => m.ready += 1,
                TaskStatus::Running => m.running += 1,
                TaskStatus::Retrying => m.retrying += 1,
                TaskStatus::Succeeded => m.succeeded += 1,
                TaskStatus::Failed => m.failed += 1,
                TaskStatus::Blocked => m.blocked += 1,
                TaskStatus::Cancelled => m.cancelled += 1,
            }
        }
        if m.total > 0 {
            m.success_rate = m.succeeded as f64 / m.total as f64;
        }
        let mut stats = self.stats.clone();
        if let Some(started) = self.run_started {
            stats.wall_clock_ms = started.elapsed().as_millis() as u64;
        }
        stats.apply(&mut m);
        m
    }

    // ---- run lifecycle ----

    pub fn begin_run(&mut self, started: Instant) {
        self.stats = RunStats::new(self.depth_capacity);
        self.run_started = Some(started);
    }

    /// Close the run and build its report. Decisions are handed over to the report.
    pub fn finish_run(&mut self) -> RunReport {
        if let Some(started) = self.run_started.take() {
            self.stats.wall_clock_ms = started.elapsed().as_millis() as u64;
        }
        let metrics = self.metrics();
        let tasks = self
            .graph
            .nodes()
            .enumerate()
            .map(|(i, node)| TaskReport {
                task_id: node.task.id,
                description: node.task.description.clone(),
                status: node.task.status,
                attempts: node.task.attempts,
                result: node.task.result.clone(),
                error: node.task.error.clone(),
                execution_ms: self.last_execution_ms.get(&i).copied(),
            })
            .collect();
        RunReport {
            metrics,
            tasks,
            decisions: std::mem::take(&mut self.decisions),
        }
    }

    pub fn sample_depth(&mut self, elapsed: Duration) -> QueueDepthSample {
        let sample = QueueDepthSample {
            elapsed_ms: elapsed.as_millis() as u64,
            ready: self.ready.len(),
            running: self.running.len(),
            retrying: self.retrying.len(),
        };
        self.stats.depth.record(sample);
        sample
    }

    // ---- submission ----

    pub fn register_plan(&mut self, plan: PlanId, settings: PlanSettings) {
        self.plans.insert(plan, settings);
    }

    /// Validate and insert a submission, then settle initial statuses:
    /// - in-degree 0 -> Ready
    /// - a dependency that is Failed, Cancelled or Blocked -> Blocked
    /// - otherwise Pending
    ///
    /// With `restore`, Succeeded / Failed / Cancelled statuses carried by the tasks are
    /// kept (crash recovery); otherwise every task starts from scratch.
    pub fn admit(
        &mut self,
        mut tasks: Vec<Task>,
        restore: bool,
        fx: &mut Effects,
    ) -> Result<Vec<TaskId>, SchedulerError> {
        self.graph.validate(&tasks)?;

        for task in &mut tasks {
            let keep = restore && task.status.is_terminal();
            if !keep {
                if !restore {
                    task.attempts = 0;
                }
                task.result = None;
                task.error = None;
                task.status = TaskStatus::Pending;
            }
        }
        let ids: Vec<TaskId> = tasks.iter().map(|t| t.id).collect();
        let inserted = self.graph.insert(tasks);

        let mut roots = Vec::new();
        for &i in &inserted {
            let node = self.graph.node(i);
            let status = node.task.status;
            if status.is_terminal() {
                if status != TaskStatus::Succeeded {
                    roots.push(i);
                }
                continue;
            }
            for d in self.graph.dependencies(i) {
                let dep_status = self.graph.node(d).task.status;
                if matches!(
                    dep_status,
                    TaskStatus::Failed | TaskStatus::Cancelled | TaskStatus::Blocked
                ) && !inserted.contains(&d)
                {
                    roots.push(d);
                }
            }
            if node.unmet == 0 {
                self.make_ready(i, fx);
            } else {
                self.transition(i, TaskStatus::Pending, fx);
            }
        }
        for root in roots {
            self.block_dependents(root, fx);
        }
        Ok(ids)
    }

    // ---- dispatch ----

    /// Pop the best ready task if a worker slot is free.
    pub fn next_launch(&mut self, max_concurrent: usize, fx: &mut Effects) -> Option<Launch> {
        while self.running.len() < max_concurrent {
            let index = self.ready.pop()?;
            if self.graph.node(index).task.status != TaskStatus::Ready {
                continue;
            }
            let cancel = CancellationToken::new();
            self.graph.node_mut(index).task.attempts += 1;
            self.transition(index, TaskStatus::Running, fx);
            self.running.insert(
                index,
                RunningTask {
                    cancel: cancel.clone(),
                    cancel_reason: None,
                },
            );

            let task = self.graph.node(index).task.clone();
            let worker = task
                .plan_id
                .and_then(|p| self.plans.get(&p))
                .and_then(|s| s.pairings.get(&task.key()).cloned());
            let ctx = ExecutionContext {
                attempt: task.attempts,
                worker,
                cancel,
            };
            let timeout = task.timeout.or(self.default_timeout);
            tracing::debug!(task_id = %task.id, attempt = task.attempts, priority = ?task.priority, "dispatching task");
            return Some(Launch {
                index,
                task,
                ctx,
                timeout,
            });
        }
        None
    }

    /// Apply a worker report. Only the coordinator calls this.
    pub fn on_finished(
        &mut self,
        index: usize,
        outcome: Result<serde_json::Value, ExecutorError>,
        elapsed: Duration,
        fx: &mut Effects,
    ) {
        let Some(run) = self.running.remove(&index) else {
            return;
        };
        let ms = elapsed.as_millis() as u64;
        self.stats.execution_ms.push(ms);
        self.last_execution_ms.insert(index, ms);

        let err = match outcome {
            Ok(value) => {
                let task = &mut self.graph.node_mut(index).task;
                task.result = Some(value);
                task.error = None;
                self.transition(index, TaskStatus::Succeeded, fx);
                self.release_dependents(index, fx);
                return;
            }
            Err(err) => err,
        };

        if run.cancel_reason.is_some() || err == ExecutorError::Cancelled {
            let reason = run.cancel_reason.unwrap_or(TaskError::Cancelled);
            self.graph.node_mut(index).task.error = Some(reason);
            self.transition(index, TaskStatus::Cancelled, fx);
            self.block_dependents(index, fx);
            return;
        }

        let (task_id, attempts, max_attempts) = {
            let t = &self.graph.node(index).task;
            (t.id, t.attempts, t.max_attempts)
        };
        let trigger = serde_json::json!({
            "error": err.to_string(),
            "attempts": attempts,
            "max_attempts": max_attempts,
        });
        let decision = self.retry_policy.decide(attempts, max_attempts);
        match &decision {
            Decision::Retry { delay, .. } => {
                tracing::debug!(%task_id, attempts, delay_ms = delay.as_millis() as u64, error = %err, "scheduling retry");
                let cancel = CancellationToken::new();
                self.graph.node_mut(index).task.error = Some(task_error(&err));
                self.transition(index, TaskStatus::Retrying, fx);
                self.retrying.insert(index, cancel.clone());
                self.stats.retries += 1;
                fx.timers.push(RetryTimer {
                    index,
                    delay: *delay,
                    cancel,
                });
                self.decisions.push(DecisionRecord::new(
                    task_id,
                    trigger,
                    "retry_policy",
                    decision.name(),
                    Some(serde_json::json!({
                        "delay_ms": delay.as_millis() as u64,
                        "reason": decision.reason(),
                    })),
                ));
            }
            Decision::GiveUp { .. } => {
                tracing::info!(%task_id, attempts, error = %err, "task failed permanently");
                self.graph.node_mut(index).task.error = Some(TaskError::MaxAttemptsExceeded {
                    attempts,
                    last_error: err.to_string(),
                });
                self.transition(index, TaskStatus::Failed, fx);
                self.decisions.push(DecisionRecord::new(
                    task_id,
                    trigger,
                    "retry_policy",
                    decision.name(),
                    Some(serde_json::json!({ "reason": decision.reason() })),
                ));
                self.apply_failure_policy(index, fx);
            }
        }
    }

    /// A backoff timer fired.
    pub fn on_retry_due(&mut self, index: usize, fx: &mut Effects) {
        if self.retrying.remove(&index).is_none() {
            return;
        }
        if self.graph.node(index).task.status == TaskStatus::Retrying {
            self.make_ready(index, fx);
        }
    }

    // ---- control ----

    pub fn cancel(&mut self, id: TaskId, fx: &mut Effects) -> Result<TaskStatus, SchedulerError> {
        let index = self
            .graph
            .index_of(id)
            .ok_or(SchedulerError::TaskNotFound(id))?;
        let status = self.graph.node(index).task.status;
        // Blocked is cancellable: a later requeue of its root must not revive it.
        if status.is_terminal() {
            return Ok(status);
        }
        match status {
            TaskStatus::Running => {
                if let Some(run) = self.running.get_mut(&index) {
                    run.cancel_reason.get_or_insert(TaskError::Cancelled);
                    run.cancel.cancel();
                }
                return Ok(TaskStatus::Running);
            }
            TaskStatus::Retrying => {
                if let Some(timer) = self.retrying.remove(&index) {
                    timer.cancel();
                }
            }
            TaskStatus::Ready => self.ready.remove(index),
            _ => {}
        }
        self.graph.node_mut(index).task.error = Some(TaskError::Cancelled);
        self.transition(index, TaskStatus::Cancelled, fx);
        self.block_dependents(index, fx);
        Ok(TaskStatus::Cancelled)
    }

    /// Requeue a Failed or Cancelled task and lift the blocks it caused.
    pub fn retry_task(&mut self, id: TaskId, fx: &mut Effects) -> Result<TaskStatus, SchedulerError> {
        let index = self
            .graph
            .index_of(id)
            .ok_or(SchedulerError::TaskNotFound(id))?;
        let status = self.graph.node(index).task.status;
        if !matches!(status, TaskStatus::Failed | TaskStatus::Cancelled) {
            return Err(SchedulerError::NotRetryable {
                task: id,
                status: status.as_str(),
            });
        }
        {
            let task = &mut self.graph.node_mut(index).task;
            task.attempts = 0;
            task.error = None;
            task.result = None;
        }
        self.decisions.push(DecisionRecord::new(
            id,
            serde_json::json!({ "status": status.as_str() }),
            "manual",
            "requeue",
            None,
        ));

        if let Some(dep) = self.unresolvable_dependency(index) {
            self.graph.node_mut(index).task.error = Some(TaskError::DependencyFailed { dependency: dep });
            self.transition(index, TaskStatus::Blocked, fx);
            return Ok(TaskStatus::Blocked);
        }
        self.requeue(index, fx);
        let new_status = self.graph.node(index).task.status;

        let mut queue: VecDeque<usize> = self.graph.node(index).dependents.iter().copied().collect();
        while let Some(d) = queue.pop_front() {
            if self.graph.node(d).task.status != TaskStatus::Blocked
                || self.unresolvable_dependency(d).is_some()
            {
                continue;
            }
            self.graph.node_mut(d).task.error = None;
            self.requeue(d, fx);
            queue.extend(self.graph.node(d).dependents.iter().copied());
        }
        Ok(new_status)
    }

    // ---- internals ----

    fn transition(&mut self, index: usize, status: TaskStatus, fx: &mut Effects) {
        let task = &mut self.graph.node_mut(index).task;
        task.set_status(status);
        fx.transitions.push(TaskTransition::of(task));
        if status.is_settled() {
            fx.events.push(MetricEvent::TaskSettled {
                task_id: task.id,
                status,
                attempts: task.attempts,
                execution_ms: self.last_execution_ms.get(&index).copied(),
            });
        }
    }

    fn make_ready(&mut self, index: usize, fx: &mut Effects) {
        self.transition(index, TaskStatus::Ready, fx);
        let node = self.graph.node(index);
        self.ready.push(index, node.task.priority, node.seq);
    }

    fn requeue(&mut self, index: usize, fx: &mut Effects) {
        if self.graph.recount_unmet(index) == 0 {
            self.make_ready(index, fx);
        } else {
            self.transition(index, TaskStatus::Pending, fx);
        }
    }

    fn release_dependents(&mut self, index: usize, fx: &mut Effects) {
        let dependents = self.graph.node(index).dependents.clone();
        for d in dependents {
            let node = self.graph.node_mut(d);
            node.unmet = node.unmet.saturating_sub(1);
            if node.unmet == 0 && node.task.status == TaskStatus::Pending {
                self.make_ready(d, fx);
            }
        }
    }

    /// A dependency that will not succeed in this run without a manual requeue.
    fn unresolvable_dependency(&self, index: usize) -> Option<TaskId> {
        self.graph
            .dependencies(index)
            .into_iter()
            .map(|d| &self.graph.node(d).task)
            .find(|t| {
                matches!(
                    t.status,
                    TaskStatus::Failed | TaskStatus::Cancelled | TaskStatus::Blocked
                )
            })
            .map(|t| t.id)
    }

    /// Mark every unsettled transitive dependent of `root` Blocked.
    fn block_dependents(&mut self, root: usize, fx: &mut Effects) -> usize {
        let cause = self.graph.node(root).task.id;
        let mut blocked = 0;
        for d in self.graph.transitive_dependents(root) {
            let status = self.graph.node(d).task.status;
            if status.is_settled() || status == TaskStatus::Running {
                continue;
            }
            if status == TaskStatus::Ready {
                self.ready.remove(d);
            }
            if let Some(timer) = self.retrying.remove(&d) {
                timer.cancel();
            }
            self.graph.node_mut(d).task.error = Some(TaskError::DependencyFailed { dependency: cause });
            self.transition(d, TaskStatus::Blocked, fx);
            blocked += 1;
        }
        blocked
    }

    fn policy_for(&self, index: usize) -> FailurePolicy {
        self.graph
            .node(index)
            .task
            .plan_id
            .and_then(|p| self.plans.get(&p))
            .map(|s| s.failure_policy)
            .unwrap_or(self.default_policy)
    }

    fn apply_failure_policy(&mut self, index: usize, fx: &mut Effects) {
        let task_id = self.graph.node(index).task.id;
        let blocked = self.block_dependents(index, fx);
        if blocked > 0 {
            self.decisions.push(DecisionRecord::new(
                task_id,
                serde_json::json!({ "status": "failed" }),
                "failure_policy",
                "block_dependents",
                Some(serde_json::json!({ "blocked": blocked })),
            ));
        }
        if self.policy_for(index) == FailurePolicy::FailFast {
            let aborted = self.abort_plan(index, fx);
            self.decisions.push(DecisionRecord::new(
                task_id,
                serde_json::json!({ "status": "failed" }),
                "failure_policy",
                "abort_plan",
                Some(serde_json::json!({ "aborted": aborted })),
            ));
        }
    }

    /// Fail-fast: cancel every unsettled task of the failed task's plan and signal running ones.
    fn abort_plan(&mut self, cause_index: usize, fx: &mut Effects) -> usize {
        let (cause, plan) = {
            let t = &self.graph.node(cause_index).task;
            (t.id, t.plan_id)
        };
        let targets: Vec<usize> = self
            .graph
            .nodes()
            .enumerate()
            .filter(|(_, n)| n.task.plan_id == plan && !n.task.status.is_settled())
            .map(|(i, _)| i)
            .collect();

        let reason = TaskError::Aborted { cause };
        let mut aborted = 0;
        for i in targets {
            match self.graph.node(i).task.status {
                TaskStatus::Running => {
                    if let Some(run) = self.running.get_mut(&i) {
                        run.cancel_reason.get_or_insert_with(|| reason.clone());
                        run.cancel.cancel();
                    }
                    aborted += 1;
                    continue;
                }
                TaskStatus::Ready => self.ready.remove(i),
                TaskStatus::Retrying => {
                    if let Some(timer) = self.retrying.remove(&i) {
                        timer.cancel();
                    }
                }
                _ => {}
            }
            self.graph.node_mut(i).task.error = Some(reason.clone());
            self.transition(i, TaskStatus::Cancelled, fx);
            aborted += 1;
        }
        aborted
    }
}

fn task_error(err: &ExecutorError) -> TaskError {
    match err {
        ExecutorError::Failed(message) => TaskError::Executor {
            message: message.clone(),
        },
        ExecutorError::TimedOut { after_ms } => TaskError::TimedOut {
            after_ms: *after_ms,
        },
        ExecutorError::Panicked(message) => TaskError::Executor {
            message: format!("panicked: {message}"),
        },
        ExecutorError::Cancelled => TaskError::Cancelled,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Priority;

    fn state() -> SchedulerState {
        SchedulerState::new(RetryPolicy::default(), FailurePolicy::BestEffort, None, 64)
    }

    fn launch_all(state: &mut SchedulerState, fx: &mut Effects) -> Vec<Launch> {
        std::iter::from_fn(|| state.next_launch(usize::MAX, fx)).collect()
    }

    #[test]
    fn admit_marks_roots_ready_and_others_pending() {
        let mut s = state();
        let mut fx = Effects::default();
        let a = Task::new("a");
        let b = Task::new("b").depends_on(a.id);
        s.admit(vec![a.clone(), b.clone()], false, &mut fx).unwrap();

        assert_eq!(s.status(a.id).unwrap(), TaskStatus::Ready);
        assert_eq!(s.status(b.id).unwrap(), TaskStatus::Pending);
        assert_eq!(fx.transitions.len(), 2);
    }

    #[test]
    fn rejected_submission_leaves_no_trace() {
        let mut s = state();
        let mut fx = Effects::default();
        let mut a = Task::new("a");
        let b = Task::new("b").depends_on(a.id);
        a.dependencies.insert(b.id);

        let err = s.admit(vec![a.clone(), b], false, &mut fx).unwrap_err();
        assert!(matches!(err, SchedulerError::CycleDetected { .. }));
        assert!(s.task(a.id).is_none());
        assert!(fx.transitions.is_empty());
        assert!(s.is_idle());
    }

    #[test]
    fn success_releases_dependents() {
        let mut s = state();
        let mut fx = Effects::default();
        let a = Task::new("a");
        let b = Task::new("b").depends_on(a.id);
        s.admit(vec![a.clone(), b.clone()], false, &mut fx).unwrap();

        let launches = launch_all(&mut s, &mut fx);
        assert_eq!(launches.len(), 1);
        s.on_finished(launches[0].index, Ok(serde_json::json!(1)), Duration::from_millis(5), &mut fx);

        assert_eq!(s.status(a.id).unwrap(), TaskStatus::Succeeded);
        assert_eq!(s.status(b.id).unwrap(), TaskStatus::Ready);
    }

    #[test]
    fn failure_schedules_retry_then_gives_up() {
        let mut s = state();
        let mut fx = Effects::default();
        let a = Task::new("a").with_max_attempts(2);
        let b = Task::new("b").depends_on(a.id);
        s.admit(vec![a.clone(), b.clone()], false, &mut fx).unwrap();

        let l = launch_all(&mut s, &mut fx).remove(0);
        s.on_finished(l.index, Err(ExecutorError::failed("boom")), Duration::ZERO, &mut fx);
        assert_eq!(s.status(a.id).unwrap(), TaskStatus::Retrying);
        assert_eq!(fx.timers.len(), 1);
        assert_eq!(fx.timers[0].delay, Duration::from_secs(2));

        s.on_retry_due(l.index, &mut fx);
        assert_eq!(s.status(a.id).unwrap(), TaskStatus::Ready);

        let l = launch_all(&mut s, &mut fx).remove(0);
        assert_eq!(l.ctx.attempt, 2);
        s.on_finished(l.index, Err(ExecutorError::failed("boom")), Duration::ZERO, &mut fx);

        let task = s.task(a.id).unwrap();
        assert_eq!(task.status, TaskStatus::Failed);
        assert_eq!(
            task.error,
            Some(TaskError::MaxAttemptsExceeded {
                attempts: 2,
                last_error: "boom".into()
            })
        );
        assert_eq!(s.status(b.id).unwrap(), TaskStatus::Blocked);
        assert!(s.is_idle());

        let report = s.finish_run();
        let names: Vec<_> = report.decisions.iter().map(|d| d.decision.as_str()).collect();
        assert_eq!(names, vec!["schedule_retry", "mark_failed", "block_dependents"]);
    }

    #[test]
    fn fail_fast_aborts_the_rest_of_the_plan() {
        let mut s = state();
        let mut fx = Effects::default();
        let plan = PlanId::generate();
        let mut a = Task::new("a").with_max_attempts(1);
        let mut b = Task::new("b");
        let mut c = Task::new("c").depends_on(b.id);
        for t in [&mut a, &mut b, &mut c] {
            t.plan_id = Some(plan);
        }
        s.register_plan(
            plan,
            PlanSettings {
                failure_policy: FailurePolicy::FailFast,
                pairings: HashMap::new(),
            },
        );
        s.admit(vec![a.clone(), b.clone(), c.clone()], false, &mut fx).unwrap();

        let launches: Vec<_> = launch_all(&mut s, &mut fx);
        assert_eq!(launches.len(), 2);
        let a_launch = launches.iter().find(|l| l.task.id == a.id).unwrap();
        let b_launch = launches.iter().find(|l| l.task.id == b.id).unwrap();

        s.on_finished(a_launch.index, Err(ExecutorError::failed("x")), Duration::ZERO, &mut fx);
        assert!(b_launch.ctx.cancel.is_cancelled());
        assert_eq!(s.status(c.id).unwrap(), TaskStatus::Cancelled);

        // The in-flight task failing after the abort signal ends Cancelled, not retried.
        s.on_finished(b_launch.index, Err(ExecutorError::Cancelled), Duration::ZERO, &mut fx);
        let b_task = s.task(b.id).unwrap();
        assert_eq!(b_task.status, TaskStatus::Cancelled);
        assert_eq!(b_task.error, Some(TaskError::Aborted { cause: a.id }));
        assert!(s.is_idle());
    }

    #[test]
    fn cancelled_running_task_that_succeeds_is_succeeded() {
        let mut s = state();
        let mut fx = Effects::default();
        let a = Task::new("a");
        s.admit(vec![a.clone()], false, &mut fx).unwrap();
        let l = launch_all(&mut s, &mut fx).remove(0);

        assert_eq!(s.cancel(a.id, &mut fx).unwrap(), TaskStatus::Running);
        assert!(l.ctx.cancel.is_cancelled());
        s.on_finished(l.index, Ok(serde_json::json!("done")), Duration::ZERO, &mut fx);
        assert_eq!(s.status(a.id).unwrap(), TaskStatus::Succeeded);
    }

    #[test]
    fn cancelled_blocked_task_stays_cancelled_after_root_is_requeued() {
        let mut s = state();
        let mut fx = Effects::default();
        let root = Task::new("root").with_max_attempts(1);
        let child = Task::new("child").depends_on(root.id);
        s.admit(vec![root.clone(), child.clone()], false, &mut fx).unwrap();

        let l = launch_all(&mut s, &mut fx).remove(0);
        s.on_finished(l.index, Err(ExecutorError::failed("boom")), Duration::ZERO, &mut fx);
        assert_eq!(s.status(child.id).unwrap(), TaskStatus::Blocked);

        assert_eq!(s.cancel(child.id, &mut fx).unwrap(), TaskStatus::Cancelled);
        assert_eq!(s.task(child.id).unwrap().error, Some(TaskError::Cancelled));

        assert_eq!(s.retry_task(root.id, &mut fx).unwrap(), TaskStatus::Ready);
        let l = launch_all(&mut s, &mut fx).remove(0);
        assert_eq!(l.task.id, root.id);
        s.on_finished(l.index, Ok(serde_json::json!(1)), Duration::ZERO, &mut fx);

        assert!(launch_all(&mut s, &mut fx).is_empty());
        assert_eq!(s.status(child.id).unwrap(), TaskStatus::Cancelled);
        assert!(s.is_idle());
    }

    #[test]
    fn retry_task_unblocks_dependents() {
        let mut s = state();
        let mut fx = Effects::default();
        let a = Task::new("a");
        let b = Task::new("b").depends_on(a.id);
        let c = Task::new("c").depends_on(b.id);
        s.admit(vec![a.clone(), b.clone(), c.clone()], false, &mut fx).unwrap();

        assert_eq!(s.cancel(a.id, &mut fx).unwrap(), TaskStatus::Cancelled);
        assert_eq!(s.status(b.id).unwrap(), TaskStatus::Blocked);
        assert_eq!(s.status(c.id).unwrap(), TaskStatus::Blocked);

        assert_eq!(s.retry_task(a.id, &mut fx).unwrap(), TaskStatus::Ready);
        assert_eq!(s.status(b.id).unwrap(), TaskStatus::Pending);
        assert_eq!(s.status(c.id).unwrap(), TaskStatus::Pending);

        assert!(matches!(
            s.retry_task(b.id, &mut fx),
            Err(SchedulerError::NotRetryable { status: "pending", .. })
        ));
    }

    #[test]
    fn priorities_order_dispatch() {
        let mut s = state();
        let mut fx = Effects::default();
        let low = Task::new("low").with_priority(Priority::Low);
        let high = Task::new("high").with_priority(Priority::High);
        s.admit(vec![low.clone(), high.clone()], false, &mut fx).unwrap();

        let first = s.next_launch(1, &mut fx).unwrap();
        assert_eq!(first.task.id, high.id);
        assert!(s.next_launch(1, &mut fx).is_none());
    }
}
