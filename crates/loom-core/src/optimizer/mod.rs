//! PlanOptimizer - 過去の実行計画から学習する
//!
//! Every finished plan is appended to the store as an immutable `plan_record`. Before a
//! new plan runs, `detect_similar_plans` finds past executions of similar plans and turns
//! the configuration differences of the successful ones into suggestions.
//!
//! History is consumed page by page; only the top matches and per-suggestion tallies
//! stay in memory.

mod extract;
mod summary;

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::Mutex;

pub use summary::{embedding_text, fingerprint, structure_of};

use self::extract::SuggestionTally;
use crate::config::OptimizerConfig;
use crate::domain::{
    ExecutionPlan, OptimizationSuggestion, PlanId, PlanMetrics, PlanRecord, Priority, RecordId,
};
use crate::error::OptimizerError;
use crate::impls::NoopMetricsSink;
use crate::ports::{
    Clock, EmbeddingService, MetadataFilter, MetricEvent, MetricsSink, NewRecord,
    PersistentStore, RecordKind, RecordMetadata, SearchQuery, SystemClock,
};

/// A past execution similar to the plan being examined.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SimilarPlan {
    pub record_id: RecordId,
    pub plan_id: PlanId,
    pub goal: String,
    pub similarity: f32,
    pub success_rate: f64,
    pub occurrence: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SimilarityReport {
    /// Most similar first, at most `max_matches`.
    pub matches: Vec<SimilarPlan>,
    pub suggestions: Vec<OptimizationSuggestion>,

    /// Records examined.
    pub scanned: usize,

    /// Set when the embedding service or the store failed; the report is then empty.
    pub degraded: Option<String>,
}

impl SimilarityReport {
    fn degraded(reason: String) -> Self {
        Self {
            degraded: Some(reason),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct HistorySummary {
    pub plans: usize,

    /// Distinct fingerprints.
    pub patterns: usize,
    pub average_success_rate: f64,
}

pub struct PlanOptimizer {
    embedder: Arc<dyn EmbeddingService>,
    store: Arc<dyn PersistentStore>,
    metrics: Arc<dyn MetricsSink>,
    clock: Arc<dyn Clock>,
    config: OptimizerConfig,

    /// Held across count + append so concurrent recordings get distinct occurrences.
    write_lock: Mutex<()>,
}

impl PlanOptimizer {
    pub fn new(
        embedder: Arc<dyn EmbeddingService>,
        store: Arc<dyn PersistentStore>,
        config: OptimizerConfig,
    ) -> Self {
        Self {
            embedder,
            store,
            metrics: Arc::new(NoopMetricsSink),
            clock: Arc::new(SystemClock),
            config,
            write_lock: Mutex::new(()),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_metrics(mut self, sink: Arc<dyn MetricsSink>) -> Self {
        self.metrics = sink;
        self
    }

    /// Find past executions similar to `plan` and the changes the successful ones suggest.
    pub async fn detect_similar_plans(&self, plan: &ExecutionPlan) -> SimilarityReport {
        let structure = structure_of(plan.tasks());
        let text = embedding_text(plan.goal(), &structure, plan.tasks());
        let query = match self.embedder.embed_query(&text).await {
            Ok(query) => query,
            Err(err) => {
                tracing::warn!(plan_id = %plan.id(), error = %err, "plan embedding failed, no suggestions");
                return SimilarityReport::degraded(format!("embedding: {err}"));
            }
        };

        let tasks: BTreeMap<String, Priority> = plan
            .tasks()
            .iter()
            .map(|task| {
                let key = task.key();
                let priority = plan.config().priorities.get(&key).copied().unwrap_or(task.priority);
                (key, priority)
            })
            .collect();
        let page_size = self.config.page_size.max(1);
        let mut report = SimilarityReport::default();
        let mut tally = SuggestionTally::default();

        while report.scanned < self.config.max_scan {
            let limit = page_size.min(self.config.max_scan - report.scanned);
            let query = SearchQuery::similar_to(query.clone(), MetadataFilter::kind(RecordKind::PlanRecord))
                .with_min_score(self.config.similarity_threshold)
                .with_offset(report.scanned);
            let page = match self.store.search(query, limit).await {
                Ok(page) => page,
                Err(err) => {
                    tracing::warn!(plan_id = %plan.id(), error = %err, "plan history unavailable, no suggestions");
                    return SimilarityReport::degraded(format!("store: {err}"));
                }
            };
            report.scanned += page.len();

            for hit in &page {
                let record: PlanRecord = match serde_json::from_value(hit.record.payload.clone()) {
                    Ok(record) => record,
                    Err(err) => {
                        tracing::warn!(record = %hit.record.id, error = %err, "skipping unreadable plan record");
                        continue;
                    }
                };
                if record.metrics.success_rate >= self.config.success_rate_threshold {
                    for kind in extract::diff(&record, plan.config(), &tasks) {
                        tally.add(kind, hit.record.id, hit.score, record.metrics.success_rate);
                    }
                }
                // Hits arrive most similar first.
                if report.matches.len() < self.config.max_matches {
                    report.matches.push(SimilarPlan {
                        record_id: hit.record.id,
                        plan_id: record.plan_id,
                        goal: record.goal,
                        similarity: hit.score,
                        success_rate: record.metrics.success_rate,
                        occurrence: record.occurrence,
                    });
                }
            }
            if page.len() < limit {
                break;
            }
        }

        report.suggestions = tally.finish(self.config.min_recurrence);
        tracing::info!(
            plan_id = %plan.id(),
            scanned = report.scanned,
            matches = report.matches.len(),
            suggestions = report.suggestions.len(),
            "similar plans detected"
        );
        report
    }

    /// Append the execution of `plan` to the history. Earlier records are never touched.
    pub async fn store_plan_execution(
        &self,
        plan: &ExecutionPlan,
        metrics: PlanMetrics,
    ) -> Result<PlanRecord, OptimizerError> {
        let structure = structure_of(plan.tasks());
        let fingerprint = fingerprint(plan.goal(), &structure, plan.tasks());
        let embedding = self
            .embedder
            .embed_document(&embedding_text(plan.goal(), &structure, plan.tasks()))
            .await?;
        let _guard = self.write_lock.lock().await;
        let earlier = self
            .store
            .count(MetadataFilter::kind(RecordKind::PlanRecord).with_tag("fingerprint", &fingerprint))
            .await?;

        let record = PlanRecord {
            plan_id: plan.id(),
            goal: plan.goal().to_string(),
            structure,
            config: plan.config().clone(),
            metrics,
            fingerprint,
            occurrence: earlier as u64 + 1,
            embedding: embedding.clone(),
            recorded_at: self.clock.now(),
        };
        let metadata = RecordMetadata::new(RecordKind::PlanRecord)
            .with_tag("plan_id", record.plan_id)
            .with_tag("fingerprint", &record.fingerprint)
            .with_tag("occurrence", record.occurrence);
        self.store
            .append(
                NewRecord::new(serde_json::to_value(&record)?).with_embedding(embedding),
                metadata,
            )
            .await?;

        self.metrics.emit(MetricEvent::PlanRecorded {
            plan_id: record.plan_id,
            occurrence: record.occurrence,
            success_rate: record.metrics.success_rate,
        });
        tracing::info!(
            plan_id = %record.plan_id,
            fingerprint = %record.fingerprint,
            occurrence = record.occurrence,
            success_rate = record.metrics.success_rate,
            "plan execution recorded"
        );
        Ok(record)
    }

    /// Totals over every stored plan record.
    pub async fn history_summary(&self) -> Result<HistorySummary, OptimizerError> {
        let page_size = self.config.page_size.max(1);
        let filter = MetadataFilter::kind(RecordKind::PlanRecord);
        let mut summary = HistorySummary::default();
        let mut patterns = HashSet::new();
        let mut success_sum = 0.0;
        let mut offset = 0;
        loop {
            let page = self
                .store
                .search(SearchQuery::filter(filter.clone()).with_offset(offset), page_size)
                .await?;
            offset += page.len();
            for hit in &page {
                let Ok(record) = serde_json::from_value::<PlanRecord>(hit.record.payload.clone()) else {
                    continue;
                };
                summary.plans += 1;
                success_sum += record.metrics.success_rate;
                patterns.insert(record.fingerprint);
            }
            if page.len() < page_size {
                break;
            }
        }
        summary.patterns = patterns.len();
        if summary.plans > 0 {
            summary.average_success_rate = success_sum / summary.plans as f64;
        }
        Ok(summary)
    }
}
