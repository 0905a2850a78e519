//! Domain model (IDs, tasks, plans, workers, records, ...).

pub mod decision;
pub mod embedding;
pub mod ids;
pub mod matching;
pub mod plan;
pub mod plan_record;
pub mod task;
pub mod worker;

pub use decision::{Decision, DecisionRecord};
pub use embedding::{Embedding, cosine_similarity};
pub use ids::{PlanId, RecordId, TaskId, WorkerId};
pub use matching::{MatchOutcomeRecord, MatchResult, MatchSource};
pub use plan::{ExecutionConfig, ExecutionPlan, FailurePolicy, WorkerPairing};
pub use plan_record::{OptimizationSuggestion, PlanMetrics, PlanRecord, PlanStructure, SuggestionKind};
pub use task::{Priority, Task, TaskError, TaskRequirements, TaskStatus};
pub use worker::{CapabilityDescriptor, Worker};
