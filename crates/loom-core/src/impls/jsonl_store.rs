//! JsonlStore - append-only JSON Lines file store
//!
//! One `StoredRecord` per line. Appends are serialized through a mutex; searches stream
//! the file line by line and only keep the best `offset + limit` hits, so history size
//! is bounded by disk, not memory.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::Mutex;

use super::hits::{HitCollector, score};
use crate::domain::RecordId;
use crate::error::StoreError;
use crate::ports::{
    Clock, IdGenerator, MetadataFilter, NewRecord, PersistentStore, RecordMetadata,
    ScoredRecord, SearchQuery, StoredRecord, SystemClock, UlidGenerator,
};

pub struct JsonlStore {
    path: PathBuf,
    write_lock: Mutex<()>,
    clock: Arc<dyn Clock>,
    ids: Arc<dyn IdGenerator>,
}

impl JsonlStore {
    /// The file is created on first append; a missing file reads as empty.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self::with_clock(path, Arc::new(SystemClock))
    }

    pub fn with_clock(path: impl Into<PathBuf>, clock: Arc<dyn Clock>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
            ids: Arc::new(UlidGenerator::new(clock.clone())),
            clock,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Stream every well-formed record through `visit` until it returns `false`.
    async fn scan(
        &self,
        mut visit: impl FnMut(StoredRecord) -> bool + Send,
    ) -> Result<(), StoreError> {
        let file = match File::open(&self.path).await {
            Ok(file) => file,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(err) => return Err(err.into()),
        };
        let mut lines = BufReader::new(file).lines();
        let mut line_no = 0usize;
        while let Some(line) = lines.next_line().await? {
            line_no += 1;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<StoredRecord>(&line) {
                Ok(record) => {
                    if !visit(record) {
                        break;
                    }
                }
                Err(err) => {
                    tracing::warn!(
                        path = %self.path.display(),
                        line = line_no,
                        error = %err,
                        "skipping malformed store record"
                    );
                }
            }
        }
        Ok(())
    }
}

#[async_trait]
impl PersistentStore for JsonlStore {
    async fn append(
        &self,
        record: NewRecord,
        metadata: RecordMetadata,
    ) -> Result<RecordId, StoreError> {
        let id = self.ids.generate_record_id();
        let stored = StoredRecord {
            id,
            metadata,
            payload: record.payload,
            embedding: record.embedding,
            created_at: self.clock.now(),
        };
        let mut line = serde_json::to_string(&stored)?;
        line.push('\n');

        let _guard = self.write_lock.lock().await;
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        Ok(id)
    }

    async fn search(
        &self,
        query: SearchQuery,
        limit: usize,
    ) -> Result<Vec<ScoredRecord>, StoreError> {
        let mut hits = HitCollector::new(&query, limit);
        self.scan(|record| {
            if let Some(s) = score(&query, &record) {
                hits.offer(record, s);
            }
            !hits.is_full()
        })
        .await?;
        Ok(hits.finish())
    }

    async fn count(&self, filter: MetadataFilter) -> Result<usize, StoreError> {
        let mut total = 0;
        self.scan(|record| {
            if filter.matches(&record.metadata) {
                total += 1;
            }
            true
        })
        .await?;
        Ok(total)
    }
}
