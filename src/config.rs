//! Engine-wide tunables (§6 Configuration), following the teacher's
//! one-config-struct-per-subsystem convention collapsed into a single
//! struct since this crate has one subsystem graph, not several
//! independently deployable services.

use serde::{Deserialize, Serialize};

/// Tunable parameters shared across the chunk store, retrieval,
/// compaction, and consolidation subsystems.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EngineConfig {
    /// Hard cap on resident chunks before lowest-Q eviction kicks in.
    pub max_chunks: usize,
    /// Token budget that triggers auto-compaction.
    pub max_context_tokens: u32,
    /// Fraction of `max_context_tokens` that triggers compaction.
    pub compaction_threshold: f64,
    /// Number of most-recent chunks per source type compaction never
    /// summarises away.
    pub preserve_recent: usize,
    /// Embedding dimensionality; must match [`crate::embedding::EMBEDDING_DIM`].
    pub embedding_dim: usize,
    /// Per-strategy weight map consulted by the optimiser and by any
    /// caller blending multiple strategies client-side.
    pub strategy_weights: StrategyWeights,
    /// Rolling telemetry window size used by analytics and the optimiser.
    pub telemetry_window: usize,
    /// Minimum telemetry sample count before the optimiser will act.
    pub min_telemetry_samples: usize,
    /// `[startHour, endHour)` local-time window treated as "night" by
    /// `shouldConsolidate`.
    pub consolidation_window_hours: (u8, u8),
}

/// Per-strategy weighting, consulted by the optimiser's perturbation
/// step and exposed for callers that blend several strategies.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StrategyWeights {
    /// Weight for `SEMANTIC`.
    pub semantic: f64,
    /// Weight for `KEYWORD`.
    pub keyword: f64,
    /// Weight for `MEMRL`.
    pub memrl: f64,
    /// Weight for `GRAPH`.
    pub graph: f64,
    /// Weight for `NTS_CASCADE`.
    pub nts_cascade: f64,
}

impl Default for StrategyWeights {
    fn default() -> Self {
        Self {
            semantic: 1.0,
            keyword: 0.6,
            memrl: 0.8,
            graph: 0.7,
            nts_cascade: 0.75,
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_chunks: 10_000,
            max_context_tokens: 100_000,
            compaction_threshold: 0.75,
            preserve_recent: 20,
            embedding_dim: crate::embedding::EMBEDDING_DIM,
            strategy_weights: StrategyWeights::default(),
            telemetry_window: 500,
            min_telemetry_samples: 50,
            consolidation_window_hours: (1, 5),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec_table() {
        let cfg = EngineConfig::default();
        assert_eq!(cfg.max_chunks, 10_000);
        assert_eq!(cfg.max_context_tokens, 100_000);
        assert!((cfg.compaction_threshold - 0.75).abs() < 1e-9);
        assert_eq!(cfg.preserve_recent, 20);
        assert_eq!(cfg.embedding_dim, 128);
        assert_eq!(cfg.telemetry_window, 500);
        assert_eq!(cfg.min_telemetry_samples, 50);
        assert_eq!(cfg.consolidation_window_hours, (1, 5));
    }
}
