//! Error types.
//!
//! One enum per component. `LoomError` wraps them all for callers that drive the
//! whole pipeline (the CLI, integration code).

use thiserror::Error;

use crate::domain::TaskId;

/// Rejections from `Scheduler::submit*` and the task control operations.
///
/// Submission errors reject the whole submission: nothing from it enters the graph.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchedulerError {
    #[error("dependency cycle detected among {} task(s): {}", .cycle.len(), display_ids(.cycle))]
    CycleDetected { cycle: Vec<TaskId> },

    #[error("task {0} depends on itself")]
    SelfDependency(TaskId),

    #[error("task {0} was already submitted")]
    DuplicateTask(TaskId),

    #[error("task {task} depends on unknown task {dependency}")]
    UnknownDependency { task: TaskId, dependency: TaskId },

    #[error("task not found: {0}")]
    TaskNotFound(TaskId),

    #[error("task {task} cannot be retried from status {status}")]
    NotRetryable { task: TaskId, status: &'static str },
}

fn display_ids(ids: &[TaskId]) -> String {
    ids.iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(" -> ")
}

/// Failure of one executor attempt. Retryable unless it is `Cancelled`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExecutorError {
    #[error("{0}")]
    Failed(String),

    #[error("timed out after {after_ms}ms")]
    TimedOut { after_ms: u64 },

    #[error("cancelled")]
    Cancelled,

    #[error("executor panicked: {0}")]
    Panicked(String),
}

impl ExecutorError {
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum MatchError {
    #[error("no candidate workers")]
    NoCandidates,

    #[error("no suitable worker (best similarity {best_similarity:.3})")]
    NoSuitableMatch { best_similarity: f32 },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("store io error: {0}")]
    Io(String),

    #[error("malformed record: {0}")]
    Malformed(String),
}

impl From<std::io::Error> for StoreError {
    fn from(err: std::io::Error) -> Self {
        StoreError::Io(err.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Malformed(err.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EmbeddingError {
    #[error("embedding service unavailable: {0}")]
    Unavailable(String),

    #[error("cannot embed empty text")]
    EmptyInput,

    #[error("embedding has {actual} dimensions, expected {expected}")]
    DimensionMismatch { expected: usize, actual: usize },
}

#[derive(Debug, Error)]
pub enum OptimizerError {
    #[error(transparent)]
    Embedding(#[from] EmbeddingError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("cannot encode plan record: {0}")]
    Encode(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid value for {key}: {value}")]
    InvalidEnv { key: String, value: String },

    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Error)]
pub enum LoomError {
    #[error(transparent)]
    Scheduler(#[from] SchedulerError),

    #[error(transparent)]
    Match(#[from] MatchError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Embedding(#[from] EmbeddingError),

    #[error(transparent)]
    Optimizer(#[from] OptimizerError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cycle_message_lists_tasks() {
        let a = TaskId::generate();
        let b = TaskId::generate();
        let err = SchedulerError::CycleDetected { cycle: vec![a, b] };
        let msg = err.to_string();
        assert!(msg.contains("2 task(s)"));
        assert!(msg.contains(&a.to_string()));
        assert!(msg.contains(&b.to_string()));
    }

    #[test]
    fn component_errors_convert_into_loom_error() {
        let err: LoomError = MatchError::NoCandidates.into();
        assert!(matches!(err, LoomError::Match(MatchError::NoCandidates)));

        let err: LoomError = OptimizerError::from(StoreError::Unavailable("down".into())).into();
        assert_eq!(err.to_string(), "store unavailable: down");
    }
}
