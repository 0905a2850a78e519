//! IdGenerator port - ID 生成の抽象化
//!
//! store が record id を払い出すときに使います。テストでは FixedClock と組み合わせて
//! タイムスタンプ部分を固定できます。
//!
//! # 実装
//! - **UlidGenerator**: ULID ベース（本番用）

use ulid::Ulid;

use crate::domain::ids::RecordId;
use crate::ports::Clock;

/// IdGenerator は時刻順にソート可能な ID を生成
///
/// # Thread Safety
/// - `Send + Sync` を要求（複数タスクから共有される）
pub trait IdGenerator: Send + Sync {
    fn generate_record_id(&self) -> RecordId;
}

/// UlidGenerator は ULID ベースの ID 生成器
///
/// Clock の時刻をタイムスタンプ部分に、乱数をランダム部分に使います。
pub struct UlidGenerator<C> {
    clock: C,
}

impl<C: Clock> UlidGenerator<C> {
    pub fn new(clock: C) -> Self {
        Self { clock }
    }
}

impl<C: Clock> IdGenerator for UlidGenerator<C> {
    fn generate_record_id(&self) -> RecordId {
        let timestamp_ms = self.clock.now().timestamp_millis().max(0) as u64;
        RecordId::from(Ulid::from_parts(timestamp_ms, rand::random()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::{FixedClock, SystemClock};
    use chrono::{TimeZone, Utc};

    #[test]
    fn ulid_generator_generates_unique_ids() {
        let id_gen = UlidGenerator::new(SystemClock);

        let id1 = id_gen.generate_record_id();
        let id2 = id_gen.generate_record_id();
        let id3 = id_gen.generate_record_id();

        assert_ne!(id1, id2);
        assert_ne!(id2, id3);
        assert_ne!(id1, id3);
    }

    #[test]
    fn ulid_generator_with_fixed_clock_is_deterministic() {
        let fixed_time = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
        let id_gen = UlidGenerator::new(FixedClock::new(fixed_time));

        let id1 = id_gen.generate_record_id();
        let id2 = id_gen.generate_record_id();

        // ランダム部分があるので ID は異なるが、timestamp 部分は同じ
        assert_ne!(id1, id2);
        assert_eq!(id1.as_ulid().timestamp_ms(), id2.as_ulid().timestamp_ms());
        assert_eq!(
            id1.as_ulid().timestamp_ms(),
            fixed_time.timestamp_millis() as u64
        );
    }
}
