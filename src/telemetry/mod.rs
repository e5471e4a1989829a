//! Retrieval telemetry and rolling analytics (§4.10, C11).
//!
//! Every retrieval call emits one [`TelemetryEvent`] after truncation. The
//! sink is a narrow, swappable collaborator: the reference implementation
//! here is a newline-delimited-JSON file sink capped at 5000 lines, but
//! tests typically swap in an in-memory ring buffer.

mod file_sink;
mod summary;

pub use file_sink::JsonlTelemetrySink;
pub use summary::{build_summary, StrategySummary};

use serde::{Deserialize, Serialize};

/// Reference cap on the number of events a sink retains (§3).
pub const REFERENCE_EVENT_CAP: usize = 5000;

/// One retrieval call's outcome, recorded for later analytics (§3).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TelemetryEvent {
    /// Epoch-millisecond time the retrieval completed.
    pub timestamp_ms: i64,
    /// Identifier of the agent/session issuing the retrieval.
    pub ai_id: String,
    /// Strategy tag (e.g. `"SEMANTIC"`, `"HYBRID"`).
    pub strategy: String,
    /// Wall-clock latency of the retrieval call, in milliseconds.
    pub latency_ms: u64,
    /// Number of results returned after truncation.
    pub result_count: usize,
    /// The `topK` requested by the caller.
    pub top_k: usize,
    /// Highest score among the returned results (`0.0` if empty).
    pub top_score: f64,
    /// Mean score among the returned results (`0.0` if empty).
    pub avg_score: f64,
}

/// Append-only sink for [`TelemetryEvent`]s (§4.10).
pub trait TelemetrySink: Send + Sync {
    /// Append `event` to the sink.
    fn record(&self, event: TelemetryEvent);

    /// Return the most recent `limit` events, oldest first.
    fn read_recent(&self, limit: usize) -> Vec<TelemetryEvent>;
}

/// In-memory ring-buffered sink, useful for tests and for the optimiser's
/// unit tests that need deterministic telemetry without touching disk.
#[derive(Debug, Default)]
pub struct InMemoryTelemetrySink {
    events: std::sync::RwLock<std::collections::VecDeque<TelemetryEvent>>,
    cap: usize,
}

impl InMemoryTelemetrySink {
    /// Construct a sink capped at `cap` events (FIFO eviction).
    #[must_use]
    pub fn new(cap: usize) -> Self {
        Self {
            events: std::sync::RwLock::new(std::collections::VecDeque::new()),
            cap,
        }
    }
}

impl TelemetrySink for InMemoryTelemetrySink {
    fn record(&self, event: TelemetryEvent) {
        let mut events = self.events.write().unwrap();
        events.push_back(event);
        while events.len() > self.cap.max(1) {
            events.pop_front();
        }
    }

    fn read_recent(&self, limit: usize) -> Vec<TelemetryEvent> {
        let events = self.events.read().unwrap();
        let start = events.len().saturating_sub(limit);
        events.iter().skip(start).cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_event(strategy: &str, top_score: f64) -> TelemetryEvent {
        TelemetryEvent {
            timestamp_ms: 1_000,
            ai_id: "agent-1".to_string(),
            strategy: strategy.to_string(),
            latency_ms: 5,
            result_count: 3,
            top_k: 5,
            top_score,
            avg_score: top_score / 2.0,
        }
    }

    #[test]
    fn read_recent_returns_most_recent_in_order() {
        let sink = InMemoryTelemetrySink::new(100);
        for i in 0..5 {
            sink.record(sample_event("SEMANTIC", i as f64));
        }
        let recent = sink.read_recent(3);
        assert_eq!(recent.len(), 3);
        assert_eq!(recent[0].top_score, 2.0);
        assert_eq!(recent[2].top_score, 4.0);
    }

    #[test]
    fn sink_evicts_oldest_beyond_cap() {
        let sink = InMemoryTelemetrySink::new(3);
        for i in 0..10 {
            sink.record(sample_event("KEYWORD", i as f64));
        }
        let recent = sink.read_recent(10);
        assert_eq!(recent.len(), 3);
        assert_eq!(recent[0].top_score, 7.0);
    }
}
