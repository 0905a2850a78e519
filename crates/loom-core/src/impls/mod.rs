//! Impls - ports の実装
//!
//! # 含まれる実装
//! - **InMemoryStore**: テスト・単発実行用のストア
//! - **JsonlStore**: 追記専用 JSON Lines ファイルのストア
//! - **HashEmbedder**: 外部サービス不要の決定的な embedding
//! - **NoopMetricsSink / TracingMetricsSink / RecordingMetricsSink**
//! - **MatchingExecutor**: WorkerMatcher でワーカーを選んで委譲する TaskExecutor
//!
//! 本番用の embedding model やベクトルストアは利用側で ports を実装します。

mod hits;

pub mod hash_embedder;
pub mod jsonl_store;
pub mod matching_executor;
pub mod memory_store;
pub mod metrics;

pub use self::hash_embedder::HashEmbedder;
pub use self::jsonl_store::JsonlStore;
pub use self::matching_executor::MatchingExecutor;
pub use self::memory_store::InMemoryStore;
pub use self::metrics::{NoopMetricsSink, RecordingMetricsSink, TracingMetricsSink};
