//! Worker capability embedding cache.
//!
//! Keyed by worker id; an entry is only valid for the descriptor fingerprint it was
//! computed from. Expiry is checked lazily on read against the `Clock` port.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::domain::{Embedding, WorkerId};
use crate::ports::Clock;

#[derive(Debug, Clone)]
struct Entry {
    fingerprint: u64,
    embedding: Embedding,
    expires_at: DateTime<Utc>,
}

pub(crate) struct EmbeddingCache {
    entries: RwLock<HashMap<WorkerId, Entry>>,
    ttl: chrono::Duration,
    clock: Arc<dyn Clock>,
}

impl EmbeddingCache {
    pub fn new(ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            ttl: chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::weeks(5200)),
            clock,
        }
    }

    /// Fresh embedding for `worker` computed from the descriptor with `fingerprint`.
    pub fn get(&self, worker: WorkerId, fingerprint: u64) -> Option<Embedding> {
        let now = self.clock.now();
        let entries = self.entries.read().unwrap_or_else(|p| p.into_inner());
        entries
            .get(&worker)
            .filter(|e| e.fingerprint == fingerprint && e.expires_at > now)
            .map(|e| e.embedding.clone())
    }

    pub fn put(&self, worker: WorkerId, fingerprint: u64, embedding: Embedding) {
        let entry = Entry {
            fingerprint,
            embedding,
            expires_at: self.clock.now() + self.ttl,
        };
        self.entries
            .write()
            .unwrap_or_else(|p| p.into_inner())
            .insert(worker, entry);
    }

    pub fn invalidate(&self, worker: WorkerId) -> bool {
        self.entries
            .write()
            .unwrap_or_else(|p| p.into_inner())
            .remove(&worker)
            .is_some()
    }

    /// Workers with an unexpired entry, in id order.
    pub fn workers(&self) -> Vec<WorkerId> {
        let now = self.clock.now();
        let entries = self.entries.read().unwrap_or_else(|p| p.into_inner());
        let mut ids: Vec<WorkerId> = entries
            .iter()
            .filter(|(_, e)| e.expires_at > now)
            .map(|(id, _)| *id)
            .collect();
        ids.sort();
        ids
    }
}
