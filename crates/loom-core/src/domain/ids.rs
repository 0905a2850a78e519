//! Domain identifiers (strongly-typed IDs).
//!
//! # ULID ベースの ID + Phantom type
//! すべての ID は ULID を内部に持ち、`Id<T>` の `T`（マーカー型）で種類を区別します。
//! - 時刻でソート可能（生成順 = 辞書順）
//! - 調整なしで生成可能
//! - `TaskId` と `PlanId` はコンパイル時に混同できない
//!
//! Display は `"task-01J..."` のようにプレフィックス付き。`FromStr` で同じ形式から復元できます
//! （store のメタデータから ID を読み戻すため）。

use serde::{Deserialize, Serialize};
use std::fmt;
use std::marker::PhantomData;
use std::str::FromStr;
use ulid::Ulid;

/// IdMarker は各 ID 型のマーカー trait
pub trait IdMarker: Send + Sync + 'static {
    /// Display で使うプレフィックス（例: "task-", "plan-"）
    fn prefix() -> &'static str;
}

/// ジェネリック ID 型
///
/// ```ignore
/// let task_id = TaskId::generate();
/// let plan_id = PlanId::generate();
/// // let _: PlanId = task_id; // <- does not compile
/// ```
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Id<T: IdMarker> {
    ulid: Ulid,
    #[serde(skip)]
    _marker: PhantomData<T>,
}

impl<T: IdMarker> Id<T> {
    /// ULID から Id を作成
    pub fn from_ulid(ulid: Ulid) -> Self {
        Self {
            ulid,
            _marker: PhantomData,
        }
    }

    /// Fresh id from the current wall clock.
    ///
    /// Components that need deterministic timestamps go through `IdGenerator` instead.
    pub fn generate() -> Self {
        Self::from_ulid(Ulid::new())
    }

    /// 内部の ULID を取得
    pub fn as_ulid(&self) -> Ulid {
        self.ulid
    }
}

impl<T: IdMarker> From<Ulid> for Id<T> {
    fn from(ulid: Ulid) -> Self {
        Self::from_ulid(ulid)
    }
}

impl<T: IdMarker> fmt::Display for Id<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", T::prefix(), self.ulid)
    }
}

/// Error returned when parsing an id from its display form.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid id '{input}': expected prefix '{expected_prefix}' followed by a ULID")]
pub struct ParseIdError {
    pub input: String,
    pub expected_prefix: &'static str,
}

impl<T: IdMarker> FromStr for Id<T> {
    type Err = ParseIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || ParseIdError {
            input: s.to_string(),
            expected_prefix: T::prefix(),
        };
        let raw = s.strip_prefix(T::prefix()).ok_or_else(err)?;
        let ulid = Ulid::from_string(raw).map_err(|_| err())?;
        Ok(Self::from_ulid(ulid))
    }
}

// ========================================
// マーカー型の定義
// ========================================

pub mod marker {
    use super::IdMarker;

    /// Task のマーカー型
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
    pub enum Task {}

    impl IdMarker for Task {
        fn prefix() -> &'static str {
            "task-"
        }
    }

    /// Plan のマーカー型
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
    pub enum Plan {}

    impl IdMarker for Plan {
        fn prefix() -> &'static str {
            "plan-"
        }
    }

    /// Worker のマーカー型
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
    pub enum Worker {}

    impl IdMarker for Worker {
        fn prefix() -> &'static str {
            "worker-"
        }
    }

    /// Store record のマーカー型
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
    pub enum Record {}

    impl IdMarker for Record {
        fn prefix() -> &'static str {
            "record-"
        }
    }
}

/// Identifier of a Task (schedulable unit).
pub type TaskId = Id<marker::Task>;

/// Identifier of an ExecutionPlan (submission unit).
pub type PlanId = Id<marker::Plan>;

/// Identifier of a Worker (execution backend).
pub type WorkerId = Id<marker::Worker>;

/// Identifier of a record appended to the persistent store.
pub type RecordId = Id<marker::Record>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_display_with_prefix() {
        let task = TaskId::generate();
        let plan = PlanId::generate();
        let worker = WorkerId::generate();
        let record = RecordId::generate();

        assert!(task.to_string().starts_with("task-"));
        assert!(plan.to_string().starts_with("plan-"));
        assert!(worker.to_string().starts_with("worker-"));
        assert!(record.to_string().starts_with("record-"));
    }

    #[test]
    fn ulid_ids_are_sortable() {
        let id1 = TaskId::generate();
        std::thread::sleep(std::time::Duration::from_millis(2));
        let id2 = TaskId::generate();

        assert!(id1 < id2);
    }

    #[test]
    fn display_form_parses_back() {
        let id = TaskId::generate();
        let parsed: TaskId = id.to_string().parse().unwrap();
        assert_eq!(parsed, id);
    }

    #[test]
    fn parse_rejects_wrong_prefix() {
        let plan = PlanId::generate();
        let err = plan.to_string().parse::<TaskId>().unwrap_err();
        assert_eq!(err.expected_prefix, "task-");
    }

    #[test]
    fn serializes_as_bare_ulid() {
        let ulid = Ulid::new();
        let id = TaskId::from_ulid(ulid);
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"{ulid}\""));

        let back: TaskId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }

    #[test]
    fn phantom_data_does_not_consume_memory() {
        use std::mem::size_of;
        assert_eq!(size_of::<TaskId>(), size_of::<Ulid>());
        assert_eq!(size_of::<RecordId>(), 16);
    }
}
