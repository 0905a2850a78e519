//! Plan files: JSON description of a goal, its tasks (dependencies by name) and workers.
//!
//! ```json
//! {
//!   "goal": "nightly report",
//!   "config": { "max_concurrent": 2, "failure_policy": "fail_fast" },
//!   "tasks": [
//!     { "name": "fetch", "payload": { "sleep_ms": 200 } },
//!     { "name": "render", "deps": ["fetch"], "priority": "high",
//!       "requirements": { "description": "render pdf documents", "skills": ["pdf"] } }
//!   ],
//!   "workers": [
//!     { "name": "pdf-box", "description": "render pdf documents", "skills": ["pdf"] }
//!   ]
//! }
//! ```

use std::collections::{BTreeSet, HashMap};
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, bail};
use serde::Deserialize;

use loom_core::config::SchedulerConfig;
use loom_core::domain::{
    CapabilityDescriptor, ExecutionConfig, ExecutionPlan, FailurePolicy, Priority, Task,
    TaskRequirements, Worker, WorkerPairing,
};

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PlanFile {
    pub goal: String,
    pub tasks: Vec<TaskSpec>,

    #[serde(default)]
    pub config: ConfigSpec,

    #[serde(default)]
    pub workers: Vec<WorkerSpec>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TaskSpec {
    /// Referenced by `deps`; also the description when none is given.
    pub name: String,
    pub description: Option<String>,

    #[serde(default)]
    pub deps: Vec<String>,
    pub priority: Option<Priority>,

    #[serde(default)]
    pub payload: serde_json::Value,
    pub requirements: Option<TaskRequirements>,
    pub timeout_ms: Option<u64>,
    pub max_attempts: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigSpec {
    pub max_concurrent: Option<usize>,
    pub failure_policy: Option<FailurePolicy>,

    #[serde(default)]
    pub worker_pairings: BTreeSet<WorkerPairing>,
}

#[derive(Debug, Deserialize)]
pub struct WorkerSpec {
    pub name: String,

    #[serde(flatten)]
    pub capabilities: CapabilityDescriptor,
}

impl PlanFile {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("cannot read plan file {}", path.display()))?;
        serde_json::from_str(&raw).with_context(|| format!("invalid plan file {}", path.display()))
    }

    /// Build the plan; `defaults` fills in whatever the file leaves out.
    pub fn into_plan(self, defaults: &SchedulerConfig) -> anyhow::Result<(ExecutionPlan, Vec<Worker>)> {
        let mut ids = HashMap::with_capacity(self.tasks.len());
        let mut tasks = Vec::with_capacity(self.tasks.len());
        for spec in &self.tasks {
            let task = Task::new(spec.description.clone().unwrap_or_else(|| spec.name.clone()));
            if ids.insert(spec.name.clone(), task.id).is_some() {
                bail!("duplicate task name {:?}", spec.name);
            }
            tasks.push(task);
        }

        let tasks = self
            .tasks
            .into_iter()
            .zip(tasks)
            .map(|(spec, mut task)| {
                for dep in &spec.deps {
                    let Some(&id) = ids.get(dep) else {
                        bail!("task {:?} depends on unknown task {:?}", spec.name, dep);
                    };
                    task = task.depends_on(id);
                }
                task = task
                    .with_priority(spec.priority.unwrap_or_default())
                    .with_max_attempts(spec.max_attempts.unwrap_or(defaults.max_attempts))
                    .with_payload(spec.payload);
                if let Some(ms) = spec.timeout_ms {
                    task = task.with_timeout(Duration::from_millis(ms));
                }
                if let Some(requirements) = spec.requirements {
                    task = task.with_requirements(requirements);
                }
                Ok(task)
            })
            .collect::<anyhow::Result<Vec<_>>>()?;

        let mut config = ExecutionConfig::new(self.config.max_concurrent.unwrap_or(defaults.max_concurrent));
        config.failure_policy = self.config.failure_policy.unwrap_or(defaults.failure_policy);
        config.worker_pairings = self.config.worker_pairings;

        let workers = self
            .workers
            .into_iter()
            .map(|w| Worker::new(w.name, w.capabilities))
            .collect();
        Ok((ExecutionPlan::new(self.goal, tasks, config), workers))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(json: &str) -> PlanFile {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn builds_the_plan_with_defaults_filled_in() {
        let file = parse(
            r#"{
                "goal": "nightly report",
                "config": { "failure_policy": "fail_fast" },
                "tasks": [
                    { "name": "fetch", "payload": { "sleep_ms": 5 } },
                    { "name": "render", "description": "Render PDF", "deps": ["fetch"],
                      "priority": "high", "timeout_ms": 1500, "max_attempts": 1,
                      "requirements": { "description": "render pdf", "skills": ["pdf"] } }
                ],
                "workers": [{ "name": "pdf-box", "description": "render pdf", "skills": ["pdf"] }]
            }"#,
        );
        let defaults = SchedulerConfig::default();
        let (plan, workers) = file.into_plan(&defaults).unwrap();

        assert_eq!(plan.goal(), "nightly report");
        assert_eq!(plan.config().max_concurrent, defaults.max_concurrent);
        assert_eq!(plan.config().failure_policy, FailurePolicy::FailFast);

        let [fetch, render] = plan.tasks() else {
            panic!("expected two tasks");
        };
        assert_eq!(fetch.max_attempts, defaults.max_attempts);
        assert_eq!(fetch.payload["sleep_ms"], 5);
        assert_eq!(render.description, "Render PDF");
        assert!(render.dependencies.contains(&fetch.id));
        assert_eq!(render.priority, Priority::High);
        assert_eq!(render.timeout, Some(Duration::from_millis(1500)));
        assert_eq!(render.max_attempts, 1);
        assert!(render.requirements.as_ref().is_some_and(|r| r.skills.contains("pdf")));

        assert_eq!(workers.len(), 1);
        assert!(workers[0].capabilities.skills.contains("pdf"));
    }

    #[test]
    fn rejects_unknown_and_duplicate_names() {
        let unknown = parse(r#"{ "goal": "g", "tasks": [{ "name": "a", "deps": ["b"] }] }"#);
        let err = unknown.into_plan(&SchedulerConfig::default()).unwrap_err();
        assert!(err.to_string().contains("unknown task"));

        let duplicate = parse(r#"{ "goal": "g", "tasks": [{ "name": "a" }, { "name": "a" }] }"#);
        let err = duplicate.into_plan(&SchedulerConfig::default()).unwrap_err();
        assert!(err.to_string().contains("duplicate"));
    }

    #[test]
    fn demo_plan_parses() {
        let file = parse(include_str!("../../../demos/nightly_report.json"));
        let (plan, workers) = file.into_plan(&SchedulerConfig::default()).unwrap();
        assert_eq!(plan.tasks().len(), 4);
        assert_eq!(plan.config().max_concurrent, 2);
        assert_eq!(workers.len(), 2);
    }
}
