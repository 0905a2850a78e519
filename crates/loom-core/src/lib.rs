//! loom-core
//!
//! Task orchestration building blocks: a dependency-aware scheduler, embedding-based
//! worker matching and a plan optimizer that learns from past executions.
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（ids, task, plan, worker, embedding, records, decisions）
//! - **ports**: 抽象化レイヤー（EmbeddingService, PersistentStore, TaskExecutor, MetricsSink, Clock）
//! - **scheduler**: TaskQueue（依存グラフ・優先度キュー・リトライ・ジャーナル）
//! - **matcher**: WorkerMatcher（embedding 類似度 + ルールベースのフォールバック）
//! - **optimizer**: PlanOptimizer（類似プランの検出と設定の提案）
//! - **impls**: ports の実装（InMemoryStore, JsonlStore, HashEmbedder, ...）
//! - **config**: `loom.toml` と環境変数
//! - **error**: エラー型

pub mod config;
pub mod domain;
pub mod error;
pub mod impls;
pub mod matcher;
pub mod optimizer;
pub mod ports;
pub mod scheduler;

pub use config::LoomConfig;
pub use error::LoomError;
pub use matcher::WorkerMatcher;
pub use optimizer::PlanOptimizer;
pub use scheduler::Scheduler;
