//! ExecutionPlan: a task graph submitted together toward one goal.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::PlanId;
use super::task::{Priority, Task, normalize_key};

/// What happens to the rest of a plan when a task fails permanently.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Abort everything that has not settled yet.
    FailFast,

    /// Block only the failed task's dependents; independent branches keep running.
    #[default]
    BestEffort,
}

/// "Tasks of this kind ran on this worker."
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct WorkerPairing {
    /// Normalized task key (see `Task::key`).
    pub task_key: String,
    pub worker: String,
}

impl WorkerPairing {
    pub fn new(task_key: impl AsRef<str>, worker: impl Into<String>) -> Self {
        Self {
            task_key: normalize_key(task_key.as_ref()),
            worker: worker.into(),
        }
    }
}

/// Execution configuration a plan is run with. Optimization suggestions are diffs of this.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionConfig {
    pub max_concurrent: usize,

    #[serde(default)]
    pub failure_policy: FailurePolicy,

    #[serde(default)]
    pub worker_pairings: BTreeSet<WorkerPairing>,

    /// Task key -> priority.
    #[serde(default)]
    pub priorities: BTreeMap<String, Priority>,
}

impl ExecutionConfig {
    pub fn new(max_concurrent: usize) -> Self {
        Self {
            max_concurrent,
            failure_policy: FailurePolicy::default(),
            worker_pairings: BTreeSet::new(),
            priorities: BTreeMap::new(),
        }
    }
}

/// Immutable once built: changing anything produces a new plan with a new id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionPlan {
    id: PlanId,
    goal: String,
    tasks: Vec<Task>,
    config: ExecutionConfig,
    created_at: DateTime<Utc>,
}

impl ExecutionPlan {
    /// Build a plan. Every task is stamped with the plan id; the config's priority map is
    /// filled from the tasks where it has no entry yet.
    pub fn new(goal: impl Into<String>, tasks: Vec<Task>, config: ExecutionConfig) -> Self {
        Self::assemble(PlanId::generate(), goal.into(), tasks, config)
    }

    fn assemble(id: PlanId, goal: String, mut tasks: Vec<Task>, mut config: ExecutionConfig) -> Self {
        for task in &mut tasks {
            task.plan_id = Some(id);
            config.priorities.entry(task.key()).or_insert(task.priority);
        }
        Self {
            id,
            goal,
            tasks,
            config,
            created_at: Utc::now(),
        }
    }

    pub fn id(&self) -> PlanId {
        self.id
    }

    pub fn goal(&self) -> &str {
        &self.goal
    }

    pub fn tasks(&self) -> &[Task] {
        &self.tasks
    }

    pub fn config(&self) -> &ExecutionConfig {
        &self.config
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Same goal and tasks under a different configuration, as a new plan.
    pub fn with_config(&self, config: ExecutionConfig) -> Self {
        Self::assemble(
            PlanId::generate(),
            self.goal.clone(),
            self.tasks.clone(),
            config,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tasks_are_stamped_with_plan_id() {
        let plan = ExecutionPlan::new(
            "build report",
            vec![Task::new("fetch"), Task::new("render")],
            ExecutionConfig::new(2),
        );
        assert!(plan.tasks().iter().all(|t| t.plan_id == Some(plan.id())));
    }

    #[test]
    fn priorities_are_collected_by_task_key() {
        let plan = ExecutionPlan::new(
            "g",
            vec![Task::new("Fetch Data").with_priority(Priority::High)],
            ExecutionConfig::new(1),
        );
        assert_eq!(
            plan.config().priorities.get("fetch data"),
            Some(&Priority::High)
        );
    }

    #[test]
    fn with_config_creates_a_new_plan() {
        let plan = ExecutionPlan::new("g", vec![Task::new("a")], ExecutionConfig::new(1));
        let changed = plan.with_config(ExecutionConfig::new(4));

        assert_ne!(plan.id(), changed.id());
        assert_eq!(plan.config().max_concurrent, 1);
        assert_eq!(changed.config().max_concurrent, 4);
        assert!(changed.tasks().iter().all(|t| t.plan_id == Some(changed.id())));
    }
}
