//! Per-strategy retrieval analytics (§4.10).

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use super::TelemetryEvent;

/// Rolling analytics for one retrieval strategy, derived from a window of
/// [`TelemetryEvent`]s.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StrategySummary {
    /// Strategy tag this summary covers.
    pub strategy: String,
    /// Number of events observed.
    pub sample_count: usize,
    /// Median latency in milliseconds.
    pub p50_latency_ms: f64,
    /// 95th-percentile latency in milliseconds.
    pub p95_latency_ms: f64,
    /// Fraction of calls that returned zero results.
    pub empty_hit_rate: f64,
    /// Mean of `topScore` across events, used as a coarse relevance proxy.
    pub top_k_relevance_proxy: f64,
    /// Mean result count across events.
    pub avg_result_count: f64,
}

/// `index = ceil(n * p) - 1`, clamped to `[0, n - 1]` (§4.10).
fn percentile(sorted: &[f64], p: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let n = sorted.len();
    let idx = ((n as f64) * p).ceil() as isize - 1;
    let idx = idx.clamp(0, n as isize - 1) as usize;
    sorted[idx]
}

/// Group the last `limit` events by strategy and compute each strategy's
/// [`StrategySummary`] (§4.10).
#[must_use]
pub fn build_summary(events: &[TelemetryEvent], limit: usize) -> Vec<StrategySummary> {
    let start = events.len().saturating_sub(limit);
    let window = &events[start..];

    let mut by_strategy: HashMap<&str, Vec<&TelemetryEvent>> = HashMap::new();
    for event in window {
        by_strategy.entry(event.strategy.as_str()).or_default().push(event);
    }

    let mut summaries: Vec<StrategySummary> = by_strategy
        .into_iter()
        .map(|(strategy, events)| {
            let n = events.len();
            let mut latencies: Vec<f64> = events.iter().map(|e| e.latency_ms as f64).collect();
            latencies.sort_by(|a, b| a.partial_cmp(b).unwrap());

            let empty = events.iter().filter(|e| e.result_count == 0).count();
            let top_score_sum: f64 = events.iter().map(|e| e.top_score).sum();
            let result_count_sum: f64 = events.iter().map(|e| e.result_count as f64).sum();

            StrategySummary {
                strategy: strategy.to_string(),
                sample_count: n,
                p50_latency_ms: percentile(&latencies, 0.50),
                p95_latency_ms: percentile(&latencies, 0.95),
                empty_hit_rate: empty as f64 / n as f64,
                top_k_relevance_proxy: top_score_sum / n as f64,
                avg_result_count: result_count_sum / n as f64,
            }
        })
        .collect();

    summaries.sort_by(|a, b| a.strategy.cmp(&b.strategy));
    summaries
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(strategy: &str, latency_ms: u64, result_count: usize, top_score: f64) -> TelemetryEvent {
        TelemetryEvent {
            timestamp_ms: 0,
            ai_id: "agent".to_string(),
            strategy: strategy.to_string(),
            latency_ms,
            result_count,
            top_k: 5,
            top_score,
            avg_score: top_score,
        }
    }

    #[test]
    fn groups_by_strategy_and_computes_empty_hit_rate() {
        let events = vec![
            event("SEMANTIC", 10, 3, 0.9),
            event("SEMANTIC", 20, 0, 0.0),
            event("KEYWORD", 5, 2, 0.5),
        ];
        let summary = build_summary(&events, 100);
        let semantic = summary.iter().find(|s| s.strategy == "SEMANTIC").unwrap();
        assert_eq!(semantic.sample_count, 2);
        assert!((semantic.empty_hit_rate - 0.5).abs() < 1e-9);
    }

    #[test]
    fn percentile_matches_ceil_formula() {
        let sorted = vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0, 9.0, 10.0];
        // p50: ceil(10*0.5)-1 = 4 -> sorted[4] = 5.0
        assert_eq!(percentile(&sorted, 0.50), 5.0);
        // p95: ceil(10*0.95)-1 = 9 -> sorted[9] = 10.0
        assert_eq!(percentile(&sorted, 0.95), 10.0);
    }

    #[test]
    fn empty_window_yields_no_summaries() {
        assert!(build_summary(&[], 100).is_empty());
    }

    #[test]
    fn limit_restricts_to_most_recent_events() {
        let events: Vec<_> = (0..20).map(|i| event("SEMANTIC", 1, 1, i as f64)).collect();
        let summary = build_summary(&events, 5);
        assert_eq!(summary[0].sample_count, 5);
    }
}
