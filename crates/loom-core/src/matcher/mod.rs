//! WorkerMatcher - embedding によるタスクとワーカーのマッチング
//!
//! # Algorithm
//! 1. Task text -> `embed_query`; each worker's capability text -> `embed_document`
//!    (cached per worker id + descriptor fingerprint, TTL via the `Clock` port).
//! 2. Cosine similarity. Candidates at or above the threshold are ranked by similarity
//!    plus a small history bonus, then lowest load, then name.
//! 3. Nothing qualifies -> rule-based skill coverage; nothing covered -> `NoSuitableMatch`.
//!
//! Embedding failures degrade: a failed query embedding goes straight to the rules, a
//! failed document embedding only leaves that worker out of similarity scoring.

mod cache;
mod history;
mod rules;

use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde::Serialize;

use self::cache::EmbeddingCache;
use crate::config::MatcherConfig;
use crate::domain::{
    Embedding, MatchOutcomeRecord, MatchResult, MatchSource, Task, TaskRequirements, Worker,
    WorkerId,
};
use crate::error::MatchError;
use crate::impls::NoopMetricsSink;
use crate::ports::{
    Clock, EmbeddingService, MetricEvent, MetricsSink, NewRecord, PersistentStore, RecordKind,
    RecordMetadata, SystemClock,
};

/// Similarity gap to the runner-up at which an embedding match gets full confidence.
const FULL_CONFIDENCE_MARGIN: f32 = 0.1;

/// Rule-based matches never claim more than this.
const RULE_CONFIDENCE: f32 = 0.8;

/// Matcher counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MatchStats {
    pub embedding_matches: u64,
    pub rule_based_matches: u64,
    pub no_match: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,

    /// Outcomes reported through `record_outcome`.
    pub confirmed: u64,
    pub succeeded: u64,
}

impl MatchStats {
    /// Confirmed successes / confirmed outcomes; 0 before any outcome.
    pub fn accuracy(&self) -> f64 {
        if self.confirmed == 0 {
            0.0
        } else {
            self.succeeded as f64 / self.confirmed as f64
        }
    }
}

struct Scored<'a> {
    worker: &'a Worker,
    similarity: f32,
    rank: f32,
}

pub struct WorkerMatcher {
    embedder: Arc<dyn EmbeddingService>,
    cache: EmbeddingCache,
    clock: Arc<dyn Clock>,
    store: Option<Arc<dyn PersistentStore>>,
    metrics: Arc<dyn MetricsSink>,
    config: MatcherConfig,
    stats: Mutex<MatchStats>,
}

impl WorkerMatcher {
    pub fn new(embedder: Arc<dyn EmbeddingService>, config: MatcherConfig) -> Self {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        Self {
            embedder,
            cache: EmbeddingCache::new(config.cache_ttl(), clock.clone()),
            clock,
            store: None,
            metrics: Arc::new(NoopMetricsSink),
            config,
            stats: Mutex::new(MatchStats::default()),
        }
    }

    /// Read time (cache expiry, record timestamps) from `clock`. Resets the cache.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.cache = EmbeddingCache::new(self.config.cache_ttl(), clock.clone());
        self.clock = clock;
        self
    }

    /// Learn from, and bias towards, outcomes persisted in `store`.
    pub fn with_store(mut self, store: Arc<dyn PersistentStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_metrics(mut self, sink: Arc<dyn MetricsSink>) -> Self {
        self.metrics = sink;
        self
    }

    /// Pick a worker for a task. Tasks without explicit requirements are matched on
    /// their description.
    pub async fn match_task(&self, task: &Task, candidates: &[Worker]) -> Result<MatchResult, MatchError> {
        let requirements = requirements_of(task);
        let mut result = self.match_task_to_worker(&requirements, candidates).await?;
        result.task_id = Some(task.id);
        Ok(result)
    }

    pub async fn match_task_to_worker(
        &self,
        requirements: &TaskRequirements,
        candidates: &[Worker],
    ) -> Result<MatchResult, MatchError> {
        if candidates.is_empty() {
            return Err(MatchError::NoCandidates);
        }

        let query = match self.embedder.embed_query(&requirements.embedding_text()).await {
            Ok(query) => Some(query),
            Err(err) => {
                tracing::warn!(error = %err, "task embedding failed, falling back to rule-based matching");
                None
            }
        };

        let mut scored = Vec::with_capacity(candidates.len());
        if let Some(query) = &query {
            for worker in candidates {
                if let Some(doc) = self.worker_embedding(worker).await {
                    let similarity = query.similarity(&doc);
                    scored.push(Scored {
                        worker,
                        similarity,
                        rank: similarity,
                    });
                }
            }
        }
        let best_similarity = scored.iter().map(|s| s.similarity).fold(0.0, f32::max);

        let result = match (&query, self.pick_by_embedding(&query, scored).await) {
            (Some(query), Some(result)) => Ok(MatchResult {
                task_embedding: Some(query.clone()),
                ..result
            }),
            _ => self.pick_by_rules(requirements, candidates, best_similarity),
        };

        let mut stats = self.stats.lock().unwrap_or_else(|p| p.into_inner());
        match &result {
            Ok(m) => {
                match m.match_source {
                    MatchSource::Embedding => stats.embedding_matches += 1,
                    MatchSource::RuleBased => stats.rule_based_matches += 1,
                }
                tracing::debug!(
                    worker = %m.worker_name,
                    source = ?m.match_source,
                    similarity = m.similarity_score,
                    confidence = m.confidence,
                    "worker matched"
                );
                self.metrics.emit(MetricEvent::MatchDecision {
                    worker_id: m.worker_id,
                    source: m.match_source,
                    similarity: m.similarity_score,
                    confidence: m.confidence,
                });
            }
            Err(err) => {
                stats.no_match += 1;
                tracing::debug!(error = %err, "no worker matched");
            }
        }
        result
    }

    /// Report how a matched assignment went. Persists a `match_outcome` record when a
    /// store is attached; failures are logged and otherwise ignored.
    pub async fn record_outcome(
        &self,
        requirements: &TaskRequirements,
        result: &MatchResult,
        succeeded: bool,
    ) {
        let event = {
            let mut stats = self.stats.lock().unwrap_or_else(|p| p.into_inner());
            stats.confirmed += 1;
            if succeeded {
                stats.succeeded += 1;
            }
            MetricEvent::MatchAccuracy {
                confirmed: stats.confirmed,
                succeeded: stats.succeeded,
                accuracy: stats.accuracy(),
            }
        };
        self.metrics.emit(event);

        let Some(store) = &self.store else {
            return;
        };
        let embedding = match &result.task_embedding {
            Some(embedding) => embedding.clone(),
            None => match self.embedder.embed_query(&requirements.embedding_text()).await {
                Ok(embedding) => embedding,
                Err(err) => {
                    tracing::warn!(worker = %result.worker_name, error = %err, "match outcome not recorded: task embedding failed");
                    return;
                }
            },
        };

        let record = MatchOutcomeRecord {
            task_id: result.task_id,
            worker_id: result.worker_id,
            worker_name: result.worker_name.clone(),
            match_source: result.match_source,
            similarity_score: result.similarity_score,
            succeeded,
            recorded_at: self.clock.now(),
        };
        let payload = match serde_json::to_value(&record) {
            Ok(payload) => payload,
            Err(err) => {
                tracing::warn!(error = %err, "cannot encode match outcome");
                return;
            }
        };
        let mut metadata = RecordMetadata::new(RecordKind::MatchOutcome)
            .with_tag("worker_id", result.worker_id)
            .with_tag("succeeded", succeeded);
        if let Some(task_id) = result.task_id {
            metadata = metadata.with_tag("task_id", task_id);
        }
        if let Err(err) = store
            .append(NewRecord::new(payload).with_embedding(embedding), metadata)
            .await
        {
            tracing::warn!(worker = %result.worker_name, error = %err, "match outcome not persisted");
        }
    }

    /// Drop a worker's cached embedding. Returns whether one was cached.
    pub fn invalidate(&self, worker: WorkerId) -> bool {
        self.cache.invalidate(worker)
    }

    pub fn cached_workers(&self) -> Vec<WorkerId> {
        self.cache.workers()
    }

    pub fn stats(&self) -> MatchStats {
        self.stats.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }

    async fn worker_embedding(&self, worker: &Worker) -> Option<Embedding> {
        let fingerprint = worker.capabilities.fingerprint();
        if let Some(cached) = self.cache.get(worker.id, fingerprint) {
            self.bump(|s| s.cache_hits += 1);
            return Some(cached);
        }
        self.bump(|s| s.cache_misses += 1);
        match self
            .embedder
            .embed_document(&worker.capabilities.embedding_text())
            .await
        {
            Ok(embedding) => {
                self.cache.put(worker.id, fingerprint, embedding.clone());
                Some(embedding)
            }
            Err(err) => {
                tracing::warn!(worker = %worker.name, error = %err, "capability embedding failed, worker not scored by similarity");
                None
            }
        }
    }

    async fn pick_by_embedding(
        &self,
        query: &Option<Embedding>,
        mut scored: Vec<Scored<'_>>,
    ) -> Option<MatchResult> {
        let threshold = self.config.similarity_threshold;
        if !scored.iter().any(|s| s.similarity >= threshold) {
            return None;
        }

        if let Some(query) = query {
            let bias = self.history_bias(query).await;
            for s in &mut scored {
                if let Some(ratio) = bias.get(&s.worker.id) {
                    s.rank = (s.similarity + self.config.history_weight * ratio).min(1.0);
                }
            }
        }

        let winner = scored
            .iter()
            .filter(|s| s.similarity >= threshold)
            .min_by(|a, b| {
                b.rank
                    .total_cmp(&a.rank)
                    .then_with(|| by_load_then_name(a.worker, b.worker))
            })?;
        let runner_up = scored
            .iter()
            .filter(|s| s.worker.id != winner.worker.id)
            .map(|s| s.similarity)
            .fold(None, |best: Option<f32>, s| Some(best.map_or(s, |b| b.max(s))));
        let margin = match runner_up {
            Some(other) => (winner.similarity - other).max(0.0),
            None => FULL_CONFIDENCE_MARGIN,
        };
        let confidence =
            winner.similarity * (0.5 + 0.5 * (margin / FULL_CONFIDENCE_MARGIN).min(1.0));

        Some(MatchResult {
            task_id: None,
            worker_id: winner.worker.id,
            worker_name: winner.worker.name.clone(),
            similarity_score: winner.similarity,
            match_source: MatchSource::Embedding,
            confidence,
            task_embedding: None,
        })
    }

    fn pick_by_rules(
        &self,
        requirements: &TaskRequirements,
        candidates: &[Worker],
        best_similarity: f32,
    ) -> Result<MatchResult, MatchError> {
        let best = candidates
            .iter()
            .map(|w| (w, rules::skill_coverage(&requirements.skills, &w.capabilities.skills)))
            .filter(|(_, coverage)| *coverage > 0.0)
            .min_by(|(a, ca), (b, cb)| cb.total_cmp(ca).then_with(|| by_load_then_name(a, b)));

        let Some((worker, coverage)) = best else {
            return Err(MatchError::NoSuitableMatch { best_similarity });
        };
        Ok(MatchResult {
            task_id: None,
            worker_id: worker.id,
            worker_name: worker.name.clone(),
            similarity_score: coverage,
            match_source: MatchSource::RuleBased,
            confidence: RULE_CONFIDENCE * coverage,
            task_embedding: None,
        })
    }

    /// Success ratio per worker over similar past tasks. Empty when disabled or unavailable.
    async fn history_bias(&self, query: &Embedding) -> HashMap<WorkerId, f32> {
        let Some(store) = &self.store else {
            return HashMap::new();
        };
        if self.config.history_weight <= 0.0 || self.config.history_limit == 0 {
            return HashMap::new();
        }
        match history::outcomes_near(
            store.as_ref(),
            query,
            self.config.history_min_similarity,
            self.config.history_limit,
        )
        .await
        {
            Ok(tallies) => tallies
                .into_iter()
                .map(|(worker, tally)| (worker, tally.success_ratio()))
                .collect(),
            Err(err) => {
                tracing::warn!(error = %err, "match history unavailable, ranking by similarity only");
                HashMap::new()
            }
        }
    }

    fn bump(&self, f: impl FnOnce(&mut MatchStats)) {
        f(&mut self.stats.lock().unwrap_or_else(|p| p.into_inner()));
    }
}

fn by_load_then_name(a: &Worker, b: &Worker) -> Ordering {
    a.load.cmp(&b.load).then_with(|| a.name.cmp(&b.name))
}

/// Requirements used to match `task`: its own, or its description.
pub(crate) fn requirements_of(task: &Task) -> TaskRequirements {
    task.requirements
        .clone()
        .unwrap_or_else(|| TaskRequirements::new(task.description.clone()))
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};

    use async_trait::async_trait;
    use chrono::Utc;

    use super::*;
    use crate::domain::CapabilityDescriptor;
    use crate::error::EmbeddingError;
    use crate::impls::{HashEmbedder, InMemoryStore, RecordingMetricsSink};
    use crate::ports::{FixedClock, MetadataFilter};

    /// Fixed vectors per text; unknown text fails.
    #[derive(Default)]
    struct StubEmbedder {
        vectors: HashMap<String, Vec<f32>>,
        documents: AtomicUsize,
    }

    impl StubEmbedder {
        fn with(mut self, text: &str, vector: &[f32]) -> Self {
            self.vectors.insert(text.into(), vector.to_vec());
            self
        }

        fn lookup(&self, text: &str) -> Result<Embedding, EmbeddingError> {
            self.vectors
                .get(text)
                .map(|v| Embedding::new(v.clone()))
                .ok_or_else(|| EmbeddingError::Unavailable(format!("no vector for '{text}'")))
        }
    }

    #[async_trait]
    impl EmbeddingService for StubEmbedder {
        async fn embed_document(&self, text: &str) -> Result<Embedding, EmbeddingError> {
            self.documents.fetch_add(1, AtomicOrdering::SeqCst);
            self.lookup(text)
        }

        async fn embed_query(&self, text: &str) -> Result<Embedding, EmbeddingError> {
            self.lookup(text)
        }

        fn dimensions(&self) -> usize {
            3
        }
    }

    fn worker(name: &str) -> Worker {
        Worker::new(name, CapabilityDescriptor::new(name))
    }

    /// query = x axis; workers at the given cosine similarity to it.
    fn stub(workers: &[(&str, f32)]) -> StubEmbedder {
        workers.iter().fold(
            StubEmbedder::default().with("task", &[1.0, 0.0, 0.0]),
            |e, (name, sim)| e.with(name, &[*sim, (1.0 - sim * sim).sqrt(), 0.0]),
        )
    }

    fn matcher(embedder: StubEmbedder) -> WorkerMatcher {
        WorkerMatcher::new(Arc::new(embedder), MatcherConfig::default())
    }

    fn task() -> TaskRequirements {
        TaskRequirements::new("task")
    }

    #[tokio::test]
    async fn identical_capability_text_wins() {
        let m = WorkerMatcher::new(Arc::new(HashEmbedder::default()), MatcherConfig::default());
        let csv = Worker::new("csv", CapabilityDescriptor::new("parse csv files into tables"));
        let pdf = Worker::new("pdf", CapabilityDescriptor::new("render pdf reports"));

        let result = m
            .match_task_to_worker(
                &TaskRequirements::new("parse csv files into tables"),
                &[pdf, csv.clone()],
            )
            .await
            .unwrap();
        assert_eq!(result.worker_id, csv.id);
        assert_eq!(result.match_source, MatchSource::Embedding);
        assert!(result.similarity_score > 0.99);
        assert!(result.task_embedding.is_some());
    }

    #[tokio::test]
    async fn empty_candidate_set_is_an_error() {
        let m = matcher(stub(&[]));
        assert_eq!(
            m.match_task_to_worker(&task(), &[]).await,
            Err(MatchError::NoCandidates)
        );
    }

    #[tokio::test]
    async fn below_threshold_without_skills_is_no_suitable_match() {
        let m = matcher(stub(&[("a", 0.6), ("b", 0.5)]));
        let err = m
            .match_task_to_worker(&task(), &[worker("a"), worker("b")])
            .await
            .unwrap_err();
        let MatchError::NoSuitableMatch { best_similarity } = err else {
            panic!("unexpected {err:?}");
        };
        assert!((best_similarity - 0.6).abs() < 1e-4);
        assert_eq!(m.stats().no_match, 1);
    }

    #[tokio::test]
    async fn confidence_reflects_margin_to_runner_up() {
        let m = matcher(stub(&[("a", 0.8), ("b", 0.78), ("c", 0.2)]));
        let result = m
            .match_task_to_worker(&task(), &[worker("a"), worker("b"), worker("c")])
            .await
            .unwrap();
        assert_eq!(result.worker_name, "a");
        // 0.8 * (0.5 + 0.5 * 0.02 / 0.1)
        assert!((result.confidence - 0.48).abs() < 1e-3);

        let m = matcher(stub(&[("a", 0.9), ("b", 0.3)]));
        let result = m
            .match_task_to_worker(&task(), &[worker("a"), worker("b")])
            .await
            .unwrap();
        assert!((result.confidence - 0.9).abs() < 1e-3);
    }

    #[tokio::test]
    async fn ties_go_to_the_least_loaded_then_by_name() {
        let m = matcher(stub(&[("zeta", 0.9), ("alpha", 0.9), ("mid", 0.9)]));
        let result = m
            .match_task_to_worker(
                &task(),
                &[worker("zeta"), worker("alpha").with_load(3), worker("mid")],
            )
            .await
            .unwrap();
        assert_eq!(result.worker_name, "mid");

        let result = m
            .match_task_to_worker(&task(), &[worker("zeta"), worker("alpha"), worker("mid")])
            .await
            .unwrap();
        assert_eq!(result.worker_name, "alpha");
    }

    #[tokio::test]
    async fn failed_embeddings_fall_back_to_skill_coverage() {
        // "task" has no vector: the query embedding fails.
        let m = matcher(StubEmbedder::default());
        let sql = Worker::new("sql", CapabilityDescriptor::new("db").with_skill("SQL").with_skill("csv"));
        let half = Worker::new("half", CapabilityDescriptor::new("db").with_skill("sql"));
        let none = Worker::new("none", CapabilityDescriptor::new("gfx").with_skill("opengl"));
        let requirements = TaskRequirements::new("load data").with_skill("sql").with_skill("CSV");

        let result = m
            .match_task_to_worker(&requirements, &[none, half, sql.clone()])
            .await
            .unwrap();
        assert_eq!(result.worker_id, sql.id);
        assert_eq!(result.match_source, MatchSource::RuleBased);
        assert_eq!(result.similarity_score, 1.0);
        assert!((result.confidence - 0.8).abs() < 1e-6);
        assert!(result.task_embedding.is_none());
    }

    #[tokio::test]
    async fn worker_without_document_embedding_is_skipped() {
        // "b" has no vector; "a" still matches by similarity.
        let m = matcher(stub(&[("a", 0.75)]));
        let result = m
            .match_task_to_worker(&task(), &[worker("a"), worker("b")])
            .await
            .unwrap();
        assert_eq!(result.worker_name, "a");
        assert_eq!(result.match_source, MatchSource::Embedding);
    }

    #[tokio::test]
    async fn capability_embeddings_are_cached_until_ttl_or_descriptor_change() {
        let clock = Arc::new(FixedClock::new(Utc::now()));
        let embedder = Arc::new(stub(&[("a", 0.9)]).with("a-v2", &[0.95, 0.312, 0.0]));
        let m = WorkerMatcher::new(embedder.clone(), MatcherConfig::default()).with_clock(clock.clone());
        let mut a = worker("a");

        m.match_task_to_worker(&task(), std::slice::from_ref(&a)).await.unwrap();
        m.match_task_to_worker(&task(), std::slice::from_ref(&a)).await.unwrap();
        assert_eq!(embedder.documents.load(AtomicOrdering::SeqCst), 1);
        assert_eq!(m.cached_workers(), vec![a.id]);

        clock.advance(chrono::Duration::seconds(301));
        assert!(m.cached_workers().is_empty());
        m.match_task_to_worker(&task(), std::slice::from_ref(&a)).await.unwrap();
        assert_eq!(embedder.documents.load(AtomicOrdering::SeqCst), 2);

        a.capabilities.description = "a-v2".into();
        m.match_task_to_worker(&task(), std::slice::from_ref(&a)).await.unwrap();
        assert_eq!(embedder.documents.load(AtomicOrdering::SeqCst), 3);

        assert!(m.invalidate(a.id));
        m.match_task_to_worker(&task(), std::slice::from_ref(&a)).await.unwrap();
        assert_eq!(embedder.documents.load(AtomicOrdering::SeqCst), 4);
        assert_eq!(m.stats().cache_hits, 1);
    }

    #[tokio::test]
    async fn history_reorders_qualified_candidates_only() {
        let store = Arc::new(InMemoryStore::new());
        let m = matcher(stub(&[("a", 0.80), ("b", 0.78), ("c", 0.68)])).with_store(store.clone());
        let (a, b, c) = (worker("a"), worker("b"), worker("c"));
        let candidates = [a.clone(), b.clone(), c.clone()];

        let first = m.match_task_to_worker(&task(), &candidates).await.unwrap();
        assert_eq!(first.worker_id, a.id);

        // b and c have a perfect record on this kind of task, a has failed it.
        for (w, ok) in [(&b, true), (&b, true), (&c, true), (&a, false)] {
            let result = MatchResult {
                worker_id: w.id,
                worker_name: w.name.clone(),
                ..first.clone()
            };
            m.record_outcome(&task(), &result, ok).await;
        }

        let second = m.match_task_to_worker(&task(), &candidates).await.unwrap();
        assert_eq!(second.worker_id, b.id);
        assert!((second.similarity_score - 0.78).abs() < 1e-4);

        let only_c = m.match_task_to_worker(&task(), &[c]).await;
        assert!(matches!(only_c, Err(MatchError::NoSuitableMatch { .. })));
    }

    #[tokio::test]
    async fn outcomes_are_persisted_and_counted() {
        let store = Arc::new(InMemoryStore::new());
        let sink = Arc::new(RecordingMetricsSink::new());
        let m = matcher(stub(&[("a", 0.9)]))
            .with_store(store.clone())
            .with_metrics(sink.clone());
        let a = worker("a");
        let t = Task::new("task");

        let result = m.match_task(&t, std::slice::from_ref(&a)).await.unwrap();
        assert_eq!(result.task_id, Some(t.id));
        m.record_outcome(&task(), &result, true).await;
        m.record_outcome(&task(), &result, false).await;

        let stats = m.stats();
        assert_eq!((stats.confirmed, stats.succeeded), (2, 1));
        assert_eq!(stats.accuracy(), 0.5);
        let records = store
            .count(
                MetadataFilter::kind(RecordKind::MatchOutcome)
                    .with_tag("worker_id", a.id)
                    .with_tag("task_id", t.id),
            )
            .await
            .unwrap();
        assert_eq!(records, 2);
        assert!(matches!(
            sink.events().last(),
            Some(MetricEvent::MatchAccuracy { confirmed: 2, succeeded: 1, .. })
        ));
    }

    #[tokio::test]
    async fn store_outage_does_not_break_matching_or_learning() {
        let store = Arc::new(InMemoryStore::new());
        store.set_available(false);
        let m = matcher(stub(&[("a", 0.9)])).with_store(store.clone());

        let result = m.match_task_to_worker(&task(), &[worker("a")]).await.unwrap();
        m.record_outcome(&task(), &result, true).await;
        assert_eq!(m.stats().confirmed, 1);
        assert!(store.is_empty());
    }
}
