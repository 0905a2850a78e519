//! Past match outcomes near a task, aggregated per worker.

use std::collections::HashMap;

use crate::domain::{Embedding, MatchOutcomeRecord, WorkerId};
use crate::error::StoreError;
use crate::ports::{MetadataFilter, PersistentStore, RecordKind, SearchQuery};

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub(crate) struct Tally {
    pub succeeded: u32,
    pub total: u32,
}

impl Tally {
    pub fn success_ratio(&self) -> f32 {
        if self.total == 0 {
            0.0
        } else {
            self.succeeded as f32 / self.total as f32
        }
    }
}

/// Outcomes of the `limit` most similar past tasks scoring at least `min_similarity`.
pub(crate) async fn outcomes_near(
    store: &dyn PersistentStore,
    task: &Embedding,
    min_similarity: f32,
    limit: usize,
) -> Result<HashMap<WorkerId, Tally>, StoreError> {
    let query = SearchQuery::similar_to(task.clone(), MetadataFilter::kind(RecordKind::MatchOutcome))
        .with_min_score(min_similarity);
    let hits = store.search(query, limit).await?;

    let mut tallies: HashMap<WorkerId, Tally> = HashMap::new();
    for hit in hits {
        let outcome: MatchOutcomeRecord = match serde_json::from_value(hit.record.payload) {
            Ok(outcome) => outcome,
            Err(err) => {
                tracing::warn!(record = %hit.record.id, error = %err, "skipping unreadable match outcome");
                continue;
            }
        };
        let tally = tallies.entry(outcome.worker_id).or_default();
        tally.total += 1;
        if outcome.succeeded {
            tally.succeeded += 1;
        }
    }
    Ok(tallies)
}
