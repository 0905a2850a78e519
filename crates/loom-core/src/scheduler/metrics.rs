//! Run report and aggregate metrics.

use serde::{Deserialize, Serialize};

use crate::domain::{DecisionRecord, TaskError, TaskId, TaskStatus};

/// Queue depth at one point of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueDepthSample {
    /// Milliseconds since the run started.
    pub elapsed_ms: u64,
    pub ready: usize,
    pub running: usize,
    pub retrying: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunMetrics {
    pub total: usize,
    pub pending: usize,
    pub ready: usize,
    pub running: usize,
    pub retrying: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub blocked: usize,
    pub cancelled: usize,

    /// succeeded / total; 0 for an empty graph.
    pub success_rate: f64,

    /// Over every finished attempt of the run.
    pub avg_execution_ms: f64,
    pub p50_execution_ms: u64,
    pub p95_execution_ms: u64,

    pub retries: u64,
    pub queue_depth: Vec<QueueDepthSample>,
    pub wall_clock_ms: u64,
}

/// Final (or current) state of one task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskReport {
    pub task_id: TaskId,
    pub description: String,
    pub status: TaskStatus,
    pub attempts: u32,
    pub result: Option<serde_json::Value>,
    pub error: Option<TaskError>,

    /// Duration of the last finished attempt.
    pub execution_ms: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    pub metrics: RunMetrics,

    /// In submission order.
    pub tasks: Vec<TaskReport>,

    /// Retry / give-up / blocking decisions made during the run.
    pub decisions: Vec<DecisionRecord>,
}

impl RunReport {
    pub fn task(&self, id: TaskId) -> Option<&TaskReport> {
        self.tasks.iter().find(|t| t.task_id == id)
    }
}

/// Nearest-rank percentile over an ascending slice.
pub(crate) fn percentile(sorted: &[u64], p: f64) -> u64 {
    if sorted.is_empty() {
        return 0;
    }
    let rank = ((p / 100.0) * sorted.len() as f64).ceil() as usize;
    sorted[rank.clamp(1, sorted.len()) - 1]
}

/// Keeps at most `capacity` samples spread over the whole run: when full, every other
/// sample is dropped and only every `stride`-th new sample is kept from then on.
#[derive(Debug, Clone)]
pub(crate) struct DepthSampler {
    capacity: usize,
    stride: u64,
    seen: u64,
    samples: Vec<QueueDepthSample>,
}

impl DepthSampler {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(2),
            stride: 1,
            seen: 0,
            samples: Vec::new(),
        }
    }

    pub fn record(&mut self, sample: QueueDepthSample) {
        self.seen += 1;
        if self.seen % self.stride != 0 {
            return;
        }
        self.samples.push(sample);
        if self.samples.len() > self.capacity {
            let mut keep = false;
            self.samples.retain(|_| {
                keep = !keep;
                keep
            });
            self.stride *= 2;
        }
    }

    pub fn samples(&self) -> &[QueueDepthSample] {
        &self.samples
    }
}

/// Accumulated over one `process_queue` call.
#[derive(Debug, Clone)]
pub(crate) struct RunStats {
    pub execution_ms: Vec<u64>,
    pub retries: u64,
    pub depth: DepthSampler,
    pub wall_clock_ms: u64,
}

impl RunStats {
    pub fn new(depth_capacity: usize) -> Self {
        Self {
            execution_ms: Vec::new(),
            retries: 0,
            depth: DepthSampler::new(depth_capacity),
            wall_clock_ms: 0,
        }
    }

    /// Fill the timing fields of `metrics`.
    pub fn apply(&self, metrics: &mut RunMetrics) {
        let mut sorted = self.execution_ms.clone();
        sorted.sort_unstable();
        metrics.avg_execution_ms = if sorted.is_empty() {
            0.0
        } else {
            sorted.iter().sum::<u64>() as f64 / sorted.len() as f64
        };
        metrics.p50_execution_ms = percentile(&sorted, 50.0);
        metrics.p95_execution_ms = percentile(&sorted, 95.0);
        metrics.retries = self.retries;
        metrics.queue_depth = self.depth.samples().to_vec();
        metrics.wall_clock_ms = self.wall_clock_ms;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(n: u64) -> QueueDepthSample {
        QueueDepthSample {
            elapsed_ms: n,
            ready: 0,
            running: 0,
            retrying: 0,
        }
    }

    #[test]
    fn percentile_nearest_rank() {
        let data: Vec<u64> = (1..=20).collect();
        assert_eq!(percentile(&data, 50.0), 10);
        assert_eq!(percentile(&data, 95.0), 19);
        assert_eq!(percentile(&data, 100.0), 20);
        assert_eq!(percentile(&[], 95.0), 0);
        assert_eq!(percentile(&[7], 50.0), 7);
    }

    #[test]
    fn sampler_stays_bounded_and_spans_the_run() {
        let mut sampler = DepthSampler::new(8);
        for n in 0..1000 {
            sampler.record(sample(n));
        }
        let samples = sampler.samples();
        assert!(samples.len() <= 8);
        assert_eq!(samples[0].elapsed_ms, 0);
        assert!(samples.last().unwrap().elapsed_ms > 500);
        assert!(samples.windows(2).all(|w| w[0].elapsed_ms < w[1].elapsed_ms));
    }

    #[test]
    fn stats_fill_timing_fields() {
        let mut stats = RunStats::new(16);
        stats.execution_ms = vec![30, 10, 20];
        stats.retries = 2;
        stats.wall_clock_ms = 99;

        let mut metrics = RunMetrics::default();
        stats.apply(&mut metrics);
        assert_eq!(metrics.avg_execution_ms, 20.0);
        assert_eq!(metrics.p50_execution_ms, 20);
        assert_eq!(metrics.p95_execution_ms, 30);
        assert_eq!(metrics.retries, 2);
        assert_eq!(metrics.wall_clock_ms, 99);
    }
}
