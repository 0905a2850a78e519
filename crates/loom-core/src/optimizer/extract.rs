//! Suggestion extraction: configuration diffs against historical records, tallied per key.

use std::collections::{BTreeMap, BTreeSet};

use crate::domain::{
    ExecutionConfig, OptimizationSuggestion, PlanRecord, Priority, RecordId, SuggestionKind,
};

/// Source ids kept per suggestion.
const MAX_SOURCES: usize = 10;

/// Changes that would turn `current` into the configuration `record` ran with.
///
/// `tasks` maps each task key of the current plan to the priority it would run with.
/// Pairings and priorities only count for those keys.
pub(crate) fn diff(
    record: &PlanRecord,
    current: &ExecutionConfig,
    tasks: &BTreeMap<String, Priority>,
) -> BTreeSet<SuggestionKind> {
    let past = &record.config;
    let mut out = BTreeSet::new();

    if past.max_concurrent != current.max_concurrent {
        out.insert(SuggestionKind::AdjustConcurrency {
            max_concurrent: past.max_concurrent,
        });
    }
    if past.failure_policy != current.failure_policy {
        out.insert(SuggestionKind::SwitchFailurePolicy {
            policy: past.failure_policy,
        });
    }
    for pairing in past.worker_pairings.iter().chain(&record.metrics.worker_assignments) {
        if tasks.contains_key(&pairing.task_key) && !current.worker_pairings.contains(pairing) {
            out.insert(SuggestionKind::ReuseWorkerPairing {
                pairing: pairing.clone(),
            });
        }
    }
    for (key, priority) in &past.priorities {
        if tasks.get(key).is_some_and(|p| p != priority) {
            out.insert(SuggestionKind::ReorderPriority {
                task_key: key.clone(),
                priority: *priority,
            });
        }
    }
    out
}

#[derive(Debug, Default)]
struct Support {
    sources: Vec<RecordId>,
    count: usize,

    /// Sum of similarity x success rate over supporting records.
    weight: f64,
}

/// Running per-key tallies; one entry per distinct suggestion.
#[derive(Debug, Default)]
pub(crate) struct SuggestionTally {
    entries: BTreeMap<SuggestionKind, Support>,
}

impl SuggestionTally {
    pub fn add(&mut self, kind: SuggestionKind, source: RecordId, similarity: f32, success_rate: f64) {
        let support = self.entries.entry(kind).or_default();
        support.count += 1;
        support.weight += f64::from(similarity) * success_rate;
        if support.sources.len() < MAX_SOURCES {
            support.sources.push(source);
        }
    }

    /// Suggestions supported by at least `min_recurrence` records, most confident first.
    ///
    /// confidence = mean(similarity x success rate) x n / (n + 1)
    pub fn finish(self, min_recurrence: usize) -> Vec<OptimizationSuggestion> {
        let mut out: Vec<OptimizationSuggestion> = self
            .entries
            .into_iter()
            .filter(|(_, s)| s.count >= min_recurrence.max(1))
            .map(|(kind, s)| {
                let n = s.count as f64;
                OptimizationSuggestion {
                    kind,
                    sources: s.sources,
                    recurrence: s.count,
                    confidence: (s.weight / n) * (n / (n + 1.0)),
                }
            })
            .collect();
        out.sort_by(|a, b| {
            b.confidence
                .total_cmp(&a.confidence)
                .then_with(|| b.recurrence.cmp(&a.recurrence))
                .then_with(|| a.kind.cmp(&b.kind))
        });
        out
    }
}
