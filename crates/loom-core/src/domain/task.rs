//! Task model: priority, status state machine, structured per-task errors.

use std::collections::BTreeSet;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::{PlanId, TaskId};

/// Default attempt budget for a task (first run + retries).
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Dispatch priority. `Ord` puts `Critical` highest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    #[default]
    Medium,
    High,
    Critical,
}

/// Task status.
///
/// State transitions:
/// - Pending -> Ready -> Running -> Succeeded
/// - Running -> Retrying -> Ready -> Running (until max_attempts)
/// - Running -> Failed (max_attempts exceeded)
/// - Pending -> Blocked (a dependency failed or was cancelled)
/// - Blocked -> Pending -> Ready (the dependency was requeued and then succeeded)
/// - any non-terminal state -> Cancelled (Running only via its cancellation token)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Waiting for dependencies.
    Pending,

    /// All dependencies succeeded; waiting for a worker slot.
    Ready,

    /// Currently being executed.
    Running,

    /// Failed at least once; sleeping in backoff before the next attempt.
    Retrying,

    Succeeded,

    /// Failed permanently (max_attempts exceeded).
    Failed,

    /// A dependency failed or was cancelled; cannot run in this run.
    Blocked,

    Cancelled,
}

impl TaskStatus {
    /// Is this a terminal state (no further transitions without a manual requeue)?
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskStatus::Succeeded | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }

    /// Terminal, or blocked by a terminal dependency: nothing more happens in the current run.
    pub fn is_settled(self) -> bool {
        self.is_terminal() || self == TaskStatus::Blocked
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Ready => "ready",
            TaskStatus::Running => "running",
            TaskStatus::Retrying => "retrying",
            TaskStatus::Succeeded => "succeeded",
            TaskStatus::Failed => "failed",
            TaskStatus::Blocked => "blocked",
            TaskStatus::Cancelled => "cancelled",
        }
    }
}

/// Why a task did not succeed. Serializable so it can be journaled and reported.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TaskError {
    #[error("executor failed: {message}")]
    Executor { message: String },

    #[error("timed out after {after_ms}ms")]
    TimedOut { after_ms: u64 },

    #[error("max attempts exceeded ({attempts}): {last_error}")]
    MaxAttemptsExceeded { attempts: u32, last_error: String },

    #[error("dependency {dependency} did not succeed")]
    DependencyFailed { dependency: TaskId },

    #[error("cancelled")]
    Cancelled,

    #[error("aborted: {cause} failed under fail-fast policy")]
    Aborted { cause: TaskId },
}

/// What a task needs from a worker when it is assigned dynamically.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskRequirements {
    /// Free text used for the query-side embedding.
    pub description: String,

    /// Skill tags used by the rule-based fallback.
    #[serde(default)]
    pub skills: BTreeSet<String>,
}

impl TaskRequirements {
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            skills: BTreeSet::new(),
        }
    }

    pub fn with_skill(mut self, skill: impl Into<String>) -> Self {
        self.skills.insert(skill.into());
        self
    }

    /// Text sent to the embedding service.
    pub fn embedding_text(&self) -> String {
        if self.skills.is_empty() {
            return self.description.clone();
        }
        let skills: Vec<&str> = self.skills.iter().map(String::as_str).collect();
        format!("{}\nskills: {}", self.description, skills.join(", "))
    }
}

/// A unit of work with declared dependencies.
///
/// Single source of truth for task state inside the scheduler; the ready queue and
/// the graph arena only hold indices.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub description: String,
    pub dependencies: BTreeSet<TaskId>,
    pub priority: Priority,
    pub status: TaskStatus,

    /// Number of times this task has been started (including the current attempt if Running).
    pub attempts: u32,
    pub max_attempts: u32,

    /// Per-task timeout; `None` falls back to the scheduler default.
    #[serde(default, with = "duration_ms")]
    pub timeout: Option<Duration>,

    /// Present when the task is assigned to a worker at dispatch time.
    #[serde(default)]
    pub requirements: Option<TaskRequirements>,

    /// Opaque input for the executor.
    #[serde(default)]
    pub payload: serde_json::Value,

    pub result: Option<serde_json::Value>,
    pub error: Option<TaskError>,

    pub plan_id: Option<PlanId>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Task {
    pub fn new(description: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: TaskId::generate(),
            description: description.into(),
            dependencies: BTreeSet::new(),
            priority: Priority::default(),
            status: TaskStatus::Pending,
            attempts: 0,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            timeout: None,
            requirements: None,
            payload: serde_json::Value::Null,
            result: None,
            error: None,
            plan_id: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn depends_on(mut self, dependency: TaskId) -> Self {
        self.dependencies.insert(dependency);
        self
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_requirements(mut self, requirements: TaskRequirements) -> Self {
        self.requirements = Some(requirements);
        self
    }

    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }

    /// Key used to compare "the same task" across plans: lower-cased, whitespace-collapsed description.
    pub fn key(&self) -> String {
        normalize_key(&self.description)
    }

    pub(crate) fn set_status(&mut self, status: TaskStatus) {
        self.status = status;
        self.updated_at = Utc::now();
    }
}

pub(crate) fn normalize_key(text: &str) -> String {
    text.split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(" ")
}

mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(d) => s.serialize_some(&(d.as_millis() as u64)),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
        Ok(Option::<u64>::deserialize(d)?.map(Duration::from_millis))
    }
}
