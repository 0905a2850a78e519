//! MetricsSink implementations.

use std::sync::Mutex;

use crate::ports::{MetricEvent, MetricsSink};

#[derive(Debug, Clone, Copy, Default)]
pub struct NoopMetricsSink;

impl MetricsSink for NoopMetricsSink {
    fn emit(&self, _event: MetricEvent) {}
}

/// Logs every event at `info` under the `loom::metrics` target.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingMetricsSink;

impl MetricsSink for TracingMetricsSink {
    fn emit(&self, event: MetricEvent) {
        match serde_json::to_string(&event) {
            Ok(json) => tracing::info!(target: "loom::metrics", metric = %json),
            Err(_) => tracing::info!(target: "loom::metrics", metric = ?event),
        }
    }
}

/// Keeps every event in memory (tests, the CLI report).
#[derive(Debug, Default)]
pub struct RecordingMetricsSink {
    events: Mutex<Vec<MetricEvent>>,
}

impl RecordingMetricsSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<MetricEvent> {
        self.events
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }
}

impl MetricsSink for RecordingMetricsSink {
    fn emit(&self, event: MetricEvent) {
        self.events
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recording_sink_keeps_events_in_order() {
        let sink = RecordingMetricsSink::new();
        sink.emit(MetricEvent::QueueDepth { ready: 2, running: 1 });
        sink.emit(MetricEvent::QueueDepth { ready: 0, running: 0 });

        assert_eq!(
            sink.events(),
            vec![
                MetricEvent::QueueDepth { ready: 2, running: 1 },
                MetricEvent::QueueDepth { ready: 0, running: 0 },
            ]
        );
    }
}
