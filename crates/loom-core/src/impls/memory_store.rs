//! InMemoryStore - 開発・テスト用の PersistentStore
//!
//! # 実装詳細
//! - `RwLock<Vec<StoredRecord>>` に挿入順で保持（await をまたいでロックしない）
//! - vector 検索は全件 cosine、上位 `offset + limit` だけ保持
//! - `set_available(false)` で障害をシミュレート（degraded パスのテスト用）

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;

use super::hits::{HitCollector, score};
use crate::domain::RecordId;
use crate::error::StoreError;
use crate::ports::{
    Clock, IdGenerator, MetadataFilter, NewRecord, PersistentStore, RecordMetadata,
    ScoredRecord, SearchQuery, StoredRecord, SystemClock, UlidGenerator,
};

pub struct InMemoryStore {
    records: RwLock<Vec<StoredRecord>>,
    available: AtomicBool,
    clock: Arc<dyn Clock>,
    ids: Arc<dyn IdGenerator>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            records: RwLock::new(Vec::new()),
            available: AtomicBool::new(true),
            ids: Arc::new(UlidGenerator::new(clock.clone())),
            clock,
        }
    }

    /// Simulate an outage: every call fails with `StoreError::Unavailable` until re-enabled.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of every record, in insertion order.
    pub fn records(&self) -> Vec<StoredRecord> {
        self.read().clone()
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Vec<StoredRecord>> {
        self.records.read().unwrap_or_else(|p| p.into_inner())
    }

    fn ensure_available(&self) -> Result<(), StoreError> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StoreError::Unavailable("in-memory store disabled".into()))
        }
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PersistentStore for InMemoryStore {
    async fn append(
        &self,
        record: NewRecord,
        metadata: RecordMetadata,
    ) -> Result<RecordId, StoreError> {
        self.ensure_available()?;
        let id = self.ids.generate_record_id();
        let stored = StoredRecord {
            id,
            metadata,
            payload: record.payload,
            embedding: record.embedding,
            created_at: self.clock.now(),
        };
        self.records
            .write()
            .unwrap_or_else(|p| p.into_inner())
            .push(stored);
        Ok(id)
    }

    async fn search(
        &self,
        query: SearchQuery,
        limit: usize,
    ) -> Result<Vec<ScoredRecord>, StoreError> {
        self.ensure_available()?;
        let records = self.read();
        let mut hits = HitCollector::new(&query, limit);
        for record in records.iter() {
            if hits.is_full() {
                break;
            }
            if let Some(s) = score(&query, record) {
                hits.offer(record.clone(), s);
            }
        }
        Ok(hits.finish())
    }

    async fn count(&self, filter: MetadataFilter) -> Result<usize, StoreError> {
        self.ensure_available()?;
        Ok(self
            .read()
            .iter()
            .filter(|r| filter.matches(&r.metadata))
            .count())
    }
}
