//! Bounded hit collection shared by the store implementations.
//!
//! Keeps at most `offset + limit` hits while records stream past, so a search never
//! holds the whole history in memory.

use crate::ports::{ScoredRecord, SearchQuery, StoredRecord};

/// Score `record` against `query`, or `None` if it does not qualify.
pub(crate) fn score(query: &SearchQuery, record: &StoredRecord) -> Option<f32> {
    if !query.filter.matches(&record.metadata) {
        return None;
    }
    let Some(vector) = &query.vector else {
        return Some(1.0);
    };
    let similarity = vector.similarity(record.embedding.as_ref()?);
    match query.min_score {
        Some(min) if similarity < min => None,
        _ => Some(similarity),
    }
}

pub(crate) struct HitCollector {
    keep: usize,
    offset: usize,
    ranked: bool,
    hits: Vec<ScoredRecord>,
}

impl HitCollector {
    pub(crate) fn new(query: &SearchQuery, limit: usize) -> Self {
        let keep = query.offset.saturating_add(limit);
        Self {
            keep,
            offset: query.offset,
            ranked: query.vector.is_some(),
            hits: Vec::with_capacity(keep.min(256)),
        }
    }

    /// Insertion-order queries stop needing input once `keep` hits are collected.
    pub(crate) fn is_full(&self) -> bool {
        !self.ranked && self.hits.len() >= self.keep
    }

    pub(crate) fn offer(&mut self, record: StoredRecord, score: f32) {
        if self.keep == 0 {
            return;
        }
        if !self.ranked {
            if self.hits.len() < self.keep {
                self.hits.push(ScoredRecord { record, score });
            }
            return;
        }
        // Stable: an equal score never displaces an earlier record.
        let pos = self.hits.partition_point(|h| h.score >= score);
        if pos >= self.keep {
            return;
        }
        self.hits.insert(pos, ScoredRecord { record, score });
        self.hits.truncate(self.keep);
    }

    pub(crate) fn finish(self) -> Vec<ScoredRecord> {
        self.hits.into_iter().skip(self.offset).collect()
    }
}
