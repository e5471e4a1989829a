//! Sleep-cycle memory consolidation (§4.7, C8).
//!
//! One cycle runs six phases in order over the store's chunk set and
//! knowledge graph. This module is deliberately data-in/data-out — it
//! never reaches into [`crate::store::RagStore`] directly, so `RagStore`
//! stays the only place holding the lock over `chunks`/`graph` while a
//! cycle runs.

use std::time::Instant;

use crate::chunk::{metadata_keys, Chunk, MetadataValue};
use crate::extraction;
use crate::graph::KnowledgeGraph;
use crate::optimizer::TunableParams;
use crate::retrieval::{retrieve, RetrievalContext, StrategyKind};

/// Minimum `retrievalCount` before a chunk is eligible for the forget
/// phase (§4.7).
pub const MIN_RETRIEVALS_FOR_FORGET: u64 = 3;

/// `topK` for the connect phase's SEMANTIC lookup, plus one for self
/// (§4.7): `CONNECTION_CANDIDATES + 1`.
pub const CONNECTION_CANDIDATES: usize = 3;

/// Maximum neighbours recorded per chunk by the connect phase (§4.7).
pub const MAX_CONNECTIONS_PER_CHUNK: usize = 3;

/// Blob key the cumulative lifetime totals persist under (§4.7, §6).
pub const CONSOLIDATION_STATS_BLOB_KEY: &str = "consolidation_stats";

/// Counters produced by one consolidation cycle (§4.7).
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ConsolidationReport {
    /// Whether the cycle completed without a fatal error.
    pub success: bool,
    /// Chunks whose Q-value was strengthened.
    pub strengthened: usize,
    /// Chunks whose Q-value was weakened.
    pub weakened: usize,
    /// Chunks removed by the forget phase.
    pub forgotten: usize,
    /// Connection edges written to `connected_chunks` metadata.
    pub connections: usize,
    /// Chunks tagged by the optimise phase.
    pub optimized: usize,
    /// Relationship edges added or reinforced by graph maintenance.
    pub graph_edges_updated: usize,
    /// Wall-clock duration of the cycle, in milliseconds.
    pub duration_ms: u64,
}

/// Lifetime totals accumulated across every consolidation cycle this
/// process has run, persisted under [`CONSOLIDATION_STATS_BLOB_KEY`].
#[derive(Debug, Clone, Copy, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsolidationTotals {
    /// Number of cycles run.
    pub cycles: u64,
    /// Lifetime strengthened count.
    pub strengthened: u64,
    /// Lifetime weakened count.
    pub weakened: u64,
    /// Lifetime forgotten count.
    pub forgotten: u64,
    /// Lifetime connections written.
    pub connections: u64,
    /// Lifetime optimised count.
    pub optimized: u64,
    /// Lifetime graph edges updated.
    pub graph_edges_updated: u64,
}

impl ConsolidationTotals {
    /// Fold one cycle's report into the running totals.
    pub fn accumulate(&mut self, report: &ConsolidationReport) {
        self.cycles += 1;
        self.strengthened += report.strengthened as u64;
        self.weakened += report.weakened as u64;
        self.forgotten += report.forgotten as u64;
        self.connections += report.connections as u64;
        self.optimized += report.optimized as u64;
        self.graph_edges_updated += report.graph_edges_updated as u64;
    }

    /// Serialise for persistence under [`CONSOLIDATION_STATS_BLOB_KEY`].
    ///
    /// # Errors
    /// Returns [`crate::error::StoreError::Serialization`] on encoding
    /// failure.
    pub fn to_bytes(&self) -> crate::error::Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Restore from persisted bytes, replacing any in-memory totals.
    ///
    /// # Errors
    /// Returns [`crate::error::StoreError::CorruptStore`] if `bytes` does
    /// not parse.
    pub fn from_bytes(bytes: &[u8]) -> crate::error::Result<Self> {
        serde_json::from_slice(bytes).map_err(|e| {
            crate::error::StoreError::CorruptStore {
                key: CONSOLIDATION_STATS_BLOB_KEY.to_string(),
                reason: e.to_string(),
            }
            .into()
        })
    }
}

/// Host-supplied scheduling signals consulted by [`should_consolidate`]
/// (§4.7).
#[derive(Debug, Clone, Copy, Default)]
pub struct ConsolidationSignals {
    /// Wall-clock hour is in `[1, 5]`.
    pub nighttime: bool,
    /// Device is plugged in / charging.
    pub charging: bool,
    /// Screen is off or the host is otherwise non-interactive.
    pub idle: bool,
}

/// `nighttime ∧ charging`, or any two of the three signals true (§4.7).
#[must_use]
pub fn should_consolidate(signals: ConsolidationSignals) -> bool {
    if signals.nighttime && signals.charging {
        return true;
    }
    let true_count =
        [signals.nighttime, signals.charging, signals.idle].into_iter().filter(|&b| b).count();
    true_count >= 2
}

fn importance_tier(q_value: f64) -> &'static str {
    if q_value >= 0.7 {
        "high"
    } else if q_value >= 0.4 {
        "medium"
    } else {
        "low"
    }
}

/// Run one consolidation cycle over `chunks` and `graph` in place (§4.7).
/// `params` supplies the thresholds the optimiser currently recommends;
/// `now_ms` is the epoch-millisecond time stamped onto `last_consolidated`.
pub fn run_cycle(chunks: &mut Vec<Chunk>, graph: &mut KnowledgeGraph, params: &TunableParams, now_ms: i64) -> ConsolidationReport {
    let start = Instant::now();

    let mut strengthened = 0usize;
    let mut weakened = 0usize;
    for chunk in chunks.iter_mut() {
        if chunk.q_value > params.strengthen_threshold {
            chunk
                .update_q_value(true, params.learning_rate)
                .expect("TunableParams::learning_rate is clamped to [0.01, 0.5]");
            strengthened += 1;
        } else if chunk.retrieval_count > 0 && chunk.q_value < params.consolidation_threshold {
            chunk
                .update_q_value(false, params.learning_rate)
                .expect("TunableParams::learning_rate is clamped to [0.01, 0.5]");
            weakened += 1;
        }
    }

    let mut forget_candidates: Vec<usize> = chunks
        .iter()
        .enumerate()
        .filter(|(_, c)| c.retrieval_count >= MIN_RETRIEVALS_FOR_FORGET && c.q_value < params.forget_threshold)
        .map(|(i, _)| i)
        .collect();
    forget_candidates.sort_by(|&a, &b| {
        chunks[a]
            .q_value
            .partial_cmp(&chunks[b].q_value)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    forget_candidates.truncate(params.max_forget_per_cycle as usize);

    let mut forgotten_ids: Vec<String> = forget_candidates.iter().map(|&i| chunks[i].chunk_id.clone()).collect();
    forgotten_ids.sort();
    chunks.retain(|c| !forgotten_ids.binary_search(&c.chunk_id).is_ok());
    for id in &forgotten_ids {
        graph.remove_chunk_node(id);
    }
    let forgotten = forgotten_ids.len();

    let mut connections = 0usize;
    let mut connection_updates: Vec<(String, Vec<String>)> = Vec::with_capacity(chunks.len());
    for chunk in chunks.iter() {
        let ctx = RetrievalContext::new(chunk.embedding.clone(), None, now_ms);
        let (scored, _) = retrieve(chunks, StrategyKind::Semantic, "", CONNECTION_CANDIDATES + 1, &ctx);
        let neighbours: Vec<String> = scored
            .into_iter()
            .filter(|s| s.chunk_id != chunk.chunk_id && s.score >= params.connection_similarity_threshold)
            .take(MAX_CONNECTIONS_PER_CHUNK)
            .map(|s| s.chunk_id)
            .collect();
        if !neighbours.is_empty() {
            connections += neighbours.len();
            connection_updates.push((chunk.chunk_id.clone(), neighbours));
        }
    }
    for (chunk_id, neighbours) in connection_updates {
        if let Some(chunk) = chunks.iter_mut().find(|c| c.chunk_id == chunk_id) {
            chunk
                .metadata
                .insert(metadata_keys::CONNECTED_CHUNKS.to_string(), MetadataValue::Text(neighbours.join(",")));
        }
    }

    let mut optimized = 0usize;
    for chunk in chunks.iter_mut() {
        chunk
            .metadata
            .insert(metadata_keys::LAST_CONSOLIDATED.to_string(), MetadataValue::Int(now_ms));
        chunk.metadata.insert(
            metadata_keys::IMPORTANCE_TIER.to_string(),
            MetadataValue::Text(importance_tier(chunk.q_value).to_string()),
        );
        optimized += 1;
    }

    let edges_before = graph.stats().relationship_count;
    for chunk in chunks.iter() {
        let extraction = extraction::extract(&chunk.content);
        graph.add_chunk(&chunk.chunk_id, &extraction);
    }
    let graph_edges_updated = graph.stats().relationship_count.saturating_sub(edges_before);

    ConsolidationReport {
        success: true,
        strengthened,
        weakened,
        forgotten,
        connections,
        optimized,
        graph_edges_updated,
        duration_ms: start.elapsed().as_millis() as u64,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::Chunk;

    fn embedded_chunk(id: &str, q: f64, retrieval_count: u64, embedding: Vec<f32>) -> Chunk {
        let mut c = Chunk::new(id, format!("content for {id}"), "src", "memory");
        c.q_value = q;
        c.retrieval_count = retrieval_count;
        c.embedding = Some(embedding);
        c
    }

    #[test]
    fn should_consolidate_matches_combinations() {
        assert!(should_consolidate(ConsolidationSignals { nighttime: true, charging: true, idle: false }));
        assert!(should_consolidate(ConsolidationSignals { nighttime: true, charging: false, idle: true }));
        assert!(!should_consolidate(ConsolidationSignals { nighttime: true, charging: false, idle: false }));
        assert!(!should_consolidate(ConsolidationSignals::default()));
    }

    #[test]
    fn strengthen_and_weaken_phases_move_q_values() {
        let mut chunks = vec![
            embedded_chunk("strong", 0.9, 0, vec![1.0, 0.0]),
            embedded_chunk("weak", 0.1, 5, vec![0.0, 1.0]),
        ];
        let mut graph = KnowledgeGraph::new();
        let params = TunableParams::default();

        let report = run_cycle(&mut chunks, &mut graph, &params, 0);
        assert_eq!(report.strengthened, 1);
        assert_eq!(report.weakened, 1);
        assert!(chunks.iter().find(|c| c.chunk_id == "strong").unwrap().q_value > 0.9);
        assert!(chunks.iter().find(|c| c.chunk_id == "weak").unwrap().q_value < 0.1);
    }

    #[test]
    fn forget_phase_removes_low_q_chunks_with_enough_retrievals() {
        let mut chunks = vec![
            embedded_chunk("forgettable", 0.02, 4, vec![1.0, 0.0]),
            embedded_chunk("untouched", 0.02, 1, vec![0.0, 1.0]),
        ];
        let mut graph = KnowledgeGraph::new();
        let params = TunableParams::default();

        let report = run_cycle(&mut chunks, &mut graph, &params, 0);
        assert_eq!(report.forgotten, 1);
        assert!(!chunks.iter().any(|c| c.chunk_id == "forgettable"));
        assert!(chunks.iter().any(|c| c.chunk_id == "untouched"));
    }

    #[test]
    fn optimise_phase_tags_every_surviving_chunk() {
        let mut chunks = vec![embedded_chunk("a", 0.8, 0, vec![1.0, 0.0])];
        let mut graph = KnowledgeGraph::new();
        let params = TunableParams::default();

        let report = run_cycle(&mut chunks, &mut graph, &params, 12345);
        assert_eq!(report.optimized, 1);
        let chunk = &chunks[0];
        assert_eq!(
            chunk.metadata.get(metadata_keys::LAST_CONSOLIDATED),
            Some(&MetadataValue::Int(12345))
        );
        assert!(chunk.metadata.contains_key(metadata_keys::IMPORTANCE_TIER));
    }

    #[test]
    fn totals_accumulate_across_cycles() {
        let mut totals = ConsolidationTotals::default();
        let report = ConsolidationReport { success: true, strengthened: 2, weakened: 1, ..Default::default() };
        totals.accumulate(&report);
        totals.accumulate(&report);
        assert_eq!(totals.cycles, 2);
        assert_eq!(totals.strengthened, 4);
        assert_eq!(totals.weakened, 2);
    }
}
