//! Ports - 抽象化レイヤー
//!
//! 外部コンポーネント（embedding model, 永続化ストア, タスク実行系, メトリクス送信先）への
//! インターフェースを定義します。実装は `impls`（開発・テスト用）か利用側が提供します。

pub mod clock;
pub mod embedding;
pub mod executor;
pub mod id_generator;
pub mod metrics_sink;
pub mod store;

pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::embedding::EmbeddingService;
pub use self::executor::{ExecutionContext, TaskExecutor};
pub use self::id_generator::{IdGenerator, UlidGenerator};
pub use self::metrics_sink::{MetricEvent, MetricsSink};
pub use self::store::{
    MetadataFilter, NewRecord, PersistentStore, RecordKind, RecordMetadata, ScoredRecord,
    SearchQuery, StoredRecord,
};
