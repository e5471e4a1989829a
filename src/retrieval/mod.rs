//! Retrieval strategies, tie-breaking, and per-call diagnostics (§4.4, C5).
//!
//! Every strategy reduces to the same shape: score each chunk, drop
//! non-finite scores, sort with a deterministic tie-break, and truncate
//! to `topK`. Diagnostics are computed over the pre-truncation score
//! distribution so callers can tell a strategy returning few results
//! from a strategy returning many low-confidence ones.

mod strategies;

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::chunk::Chunk;
use crate::graph::KnowledgeGraph;

pub use strategies::AccessibilityScorer;
use strategies::DefaultAccessibilityScorer;

/// The nine retrieval strategies (§4.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum StrategyKind {
    /// Pure embedding cosine similarity.
    Semantic,
    /// Lexical term-overlap.
    Keyword,
    /// Weighted blend of semantic and keyword scores.
    Hybrid,
    /// Pure recency decay, ignoring content.
    Recency,
    /// Semantic score decayed by chunk age.
    RelevanceDecay,
    /// Semantic score weighted by the chunk's learned Q-value.
    MemRl,
    /// Knowledge-graph topology match.
    Graph,
    /// Semantic score weighted toward under-retrieved ("frontier") chunks.
    FrontierAware,
    /// NTS-stage-durability-weighted semantic score with a per-stage TTL
    /// recency term.
    NtsCascade,
}

impl StrategyKind {
    /// Wire/telemetry tag for this strategy.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            StrategyKind::Semantic => "SEMANTIC",
            StrategyKind::Keyword => "KEYWORD",
            StrategyKind::Hybrid => "HYBRID",
            StrategyKind::Recency => "RECENCY",
            StrategyKind::RelevanceDecay => "RELEVANCE_DECAY",
            StrategyKind::MemRl => "MEMRL",
            StrategyKind::Graph => "GRAPH",
            StrategyKind::FrontierAware => "FRONTIER_AWARE",
            StrategyKind::NtsCascade => "NTS_CASCADE",
        }
    }
}

/// One chunk's score for a single retrieval call, prior to any
/// diagnostics or truncation.
#[derive(Debug, Clone)]
pub struct ScoredChunk {
    /// Matched chunk id.
    pub chunk_id: String,
    /// Raw strategy score.
    pub score: f64,
    /// Chunk timestamp, used as the primary tie-break key.
    pub timestamp: i64,
}

/// Summary statistics over one retrieval call's raw score distribution
/// (§4.4), computed before `topK` truncation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetrievalDiagnostics {
    /// Minimum raw score.
    pub min: f64,
    /// Maximum raw score.
    pub max: f64,
    /// Mean raw score.
    pub mean: f64,
    /// Population standard deviation of raw scores.
    pub std_dev: f64,
    /// Number of chunks scored (after dropping non-finite scores).
    pub sample_count: usize,
    /// For `NTS_CASCADE`, count of scored chunks per NTS stage; empty for
    /// other strategies.
    pub nts_stage_counts: HashMap<String, usize>,
}

/// Inputs shared by every strategy beyond the chunk and the raw query
/// text: the query's embedding (when an [`crate::embedding::Embedder`]
/// is available), the knowledge graph (for `GRAPH`), and the current
/// time.
pub struct RetrievalContext<'a> {
    /// Pre-computed query embedding, `None` if embedding failed.
    pub query_embedding: Option<Vec<f32>>,
    /// Knowledge graph collaborator, required for `GRAPH` and ignored by
    /// every other strategy.
    pub graph: Option<&'a KnowledgeGraph>,
    /// Epoch-millisecond "now" used by every recency-sensitive strategy.
    pub now_ms: i64,
    /// Scorer used by `FRONTIER_AWARE`'s accessibility term (§6
    /// collaborator `AccessibilityScorer`).
    pub accessibility_scorer: &'a dyn AccessibilityScorer,
}

impl<'a> RetrievalContext<'a> {
    /// Build a context with the default accessibility scorer.
    #[must_use]
    pub fn new(query_embedding: Option<Vec<f32>>, graph: Option<&'a KnowledgeGraph>, now_ms: i64) -> Self {
        Self {
            query_embedding,
            graph,
            now_ms,
            accessibility_scorer: &DefaultAccessibilityScorer,
        }
    }

    /// Build a context with a caller-supplied [`AccessibilityScorer`],
    /// e.g. the real collaborator wired in by `RagStore`.
    #[must_use]
    pub fn with_accessibility_scorer(
        query_embedding: Option<Vec<f32>>,
        graph: Option<&'a KnowledgeGraph>,
        now_ms: i64,
        accessibility_scorer: &'a dyn AccessibilityScorer,
    ) -> Self {
        Self {
            query_embedding,
            graph,
            now_ms,
            accessibility_scorer,
        }
    }
}

fn tie_break_sort(scored: &mut [ScoredChunk]) {
    scored.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| b.timestamp.cmp(&a.timestamp))
            .then_with(|| b.chunk_id.cmp(&a.chunk_id))
    });
}

fn compute_diagnostics(scored: &[ScoredChunk], chunks_by_id: &HashMap<&str, &Chunk>, kind: StrategyKind) -> RetrievalDiagnostics {
    if scored.is_empty() {
        return RetrievalDiagnostics::default();
    }
    let n = scored.len() as f64;
    let min = scored.iter().map(|s| s.score).fold(f64::INFINITY, f64::min);
    let max = scored.iter().map(|s| s.score).fold(f64::NEG_INFINITY, f64::max);
    let mean = scored.iter().map(|s| s.score).sum::<f64>() / n;
    let variance = scored.iter().map(|s| (s.score - mean).powi(2)).sum::<f64>() / n;

    let mut nts_stage_counts = HashMap::new();
    if kind == StrategyKind::NtsCascade {
        for s in scored {
            if let Some(chunk) = chunks_by_id.get(s.chunk_id.as_str()) {
                if let Some(stage) = chunk.nts_stage() {
                    *nts_stage_counts.entry(stage.as_str().to_string()).or_insert(0usize) += 1;
                }
            }
        }
    }

    RetrievalDiagnostics {
        min,
        max,
        mean,
        std_dev: variance.sqrt(),
        sample_count: scored.len(),
        nts_stage_counts,
    }
}

fn score_all(chunks: &[Chunk], kind: StrategyKind, query: &str, ctx: &RetrievalContext<'_>) -> Vec<ScoredChunk> {
    chunks
        .iter()
        .filter_map(|chunk| {
            let score = strategies::score(kind, chunk, query, ctx);
            if score.is_finite() {
                Some(ScoredChunk {
                    chunk_id: chunk.chunk_id.clone(),
                    score,
                    timestamp: chunk.timestamp,
                })
            } else {
                None
            }
        })
        .collect()
}

/// `HYBRID` (§4.4): take the top `2*topK` candidates from `SEMANTIC` and
/// the top `2*topK` from `KEYWORD`, merge by id, then score the union
/// with `0.7*SEMANTIC + 0.3*KEYWORD`.
fn hybrid_candidates(chunks: &[Chunk], query: &str, top_k: usize, ctx: &RetrievalContext<'_>) -> Vec<&Chunk> {
    let window = (2 * top_k).max(1);

    let mut by_semantic = score_all(chunks, StrategyKind::Semantic, query, ctx);
    tie_break_sort(&mut by_semantic);
    by_semantic.truncate(window);

    let mut by_keyword = score_all(chunks, StrategyKind::Keyword, query, ctx);
    tie_break_sort(&mut by_keyword);
    by_keyword.truncate(window);

    let chunks_by_id: HashMap<&str, &Chunk> = chunks.iter().map(|c| (c.chunk_id.as_str(), c)).collect();
    let mut seen = std::collections::HashSet::new();
    let mut merged = Vec::new();
    for sc in by_semantic.into_iter().chain(by_keyword) {
        if seen.insert(sc.chunk_id.clone()) {
            if let Some(chunk) = chunks_by_id.get(sc.chunk_id.as_str()) {
                merged.push(*chunk);
            }
        }
    }
    merged
}

/// `MEMRL` (§4.4): two-phase retrieval — top `3*topK` by `SEMANTIC`, then
/// re-rank the candidates by `0.7*semanticScore + 0.3*qValue`.
fn memrl_candidates(chunks: &[Chunk], query: &str, top_k: usize, ctx: &RetrievalContext<'_>) -> Vec<&Chunk> {
    let window = (3 * top_k).max(1);
    let mut by_semantic = score_all(chunks, StrategyKind::Semantic, query, ctx);
    tie_break_sort(&mut by_semantic);
    by_semantic.truncate(window);

    let chunks_by_id: HashMap<&str, &Chunk> = chunks.iter().map(|c| (c.chunk_id.as_str(), c)).collect();
    by_semantic
        .into_iter()
        .filter_map(|sc| chunks_by_id.get(sc.chunk_id.as_str()).copied())
        .collect()
}

/// Score `candidates` (a subset of `chunks`) with `kind`, dropping
/// non-finite scores.
fn score_subset(candidates: &[&Chunk], kind: StrategyKind, query: &str, ctx: &RetrievalContext<'_>) -> Vec<ScoredChunk> {
    candidates
        .iter()
        .filter_map(|chunk| {
            let score = strategies::score(kind, chunk, query, ctx);
            if score.is_finite() {
                Some(ScoredChunk {
                    chunk_id: chunk.chunk_id.clone(),
                    score,
                    timestamp: chunk.timestamp,
                })
            } else {
                None
            }
        })
        .collect()
}

/// `GRAPH` (§4.4, §4.5): extract entities from the query, score direct
/// and 2-hop chunks via the knowledge graph, blend 50/50 with
/// `SEMANTIC`. Falls back to `HYBRID` when the graph has no matches for
/// the query (empty graph or no recognised query entities).
fn graph_scored(chunks: &[Chunk], query: &str, top_k: usize, ctx: &RetrievalContext<'_>) -> Vec<ScoredChunk> {
    let graph_matches = ctx.graph.map(|g| g.query(query)).unwrap_or_default();
    if graph_matches.is_empty() {
        let candidates = hybrid_candidates(chunks, query, top_k, ctx);
        return score_subset(&candidates, StrategyKind::Hybrid, query, ctx);
    }

    let graph_scores: HashMap<&str, f64> = graph_matches.iter().map(|m| (m.chunk_id.as_str(), m.score)).collect();
    chunks
        .iter()
        .filter_map(|chunk| {
            let g = *graph_scores.get(chunk.chunk_id.as_str())?;
            let s = strategies::semantic_score(chunk, ctx);
            let blended = 0.5 * g + 0.5 * s;
            if blended.is_finite() {
                Some(ScoredChunk {
                    chunk_id: chunk.chunk_id.clone(),
                    score: blended,
                    timestamp: chunk.timestamp,
                })
            } else {
                None
            }
        })
        .collect()
}

/// Score every chunk with `kind`, drop non-finite scores, tie-break sort,
/// and return both the full (pre-truncation) diagnostics and the
/// `topK`-truncated result list.
///
/// An empty `chunks` slice returns empty results with zeroed
/// diagnostics; this is not an error (§7).
#[must_use]
pub fn retrieve(
    chunks: &[Chunk],
    kind: StrategyKind,
    query: &str,
    top_k: usize,
    ctx: &RetrievalContext<'_>,
) -> (Vec<ScoredChunk>, RetrievalDiagnostics) {
    let chunks_by_id: HashMap<&str, &Chunk> = chunks.iter().map(|c| (c.chunk_id.as_str(), c)).collect();

    let mut scored: Vec<ScoredChunk> = match kind {
        StrategyKind::Hybrid => {
            let candidates = hybrid_candidates(chunks, query, top_k, ctx);
            score_subset(&candidates, StrategyKind::Hybrid, query, ctx)
        }
        StrategyKind::MemRl => {
            let candidates = memrl_candidates(chunks, query, top_k, ctx);
            score_subset(&candidates, StrategyKind::MemRl, query, ctx)
        }
        StrategyKind::Graph => graph_scored(chunks, query, top_k, ctx),
        _ => score_all(chunks, kind, query, ctx),
    };

    tie_break_sort(&mut scored);
    let diagnostics = compute_diagnostics(&scored, &chunks_by_id, kind);
    scored.truncate(top_k);
    (scored, diagnostics)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::Chunk;

    fn chunk_with(id: &str, timestamp: i64, content: &str) -> Chunk {
        let mut c = Chunk::new(id, content, "test", "memory");
        c.timestamp = timestamp;
        c
    }

    #[test]
    fn ties_broken_by_timestamp_then_chunk_id() {
        let ctx = RetrievalContext::new(None, None, 1_000_000);
        let chunks = vec![
            chunk_with("a", 100, "same score text"),
            chunk_with("b", 200, "same score text"),
            chunk_with("c", 200, "same score text"),
        ];
        let (scored, _) = retrieve(&chunks, StrategyKind::Recency, "query", 10, &ctx);
        // b and c share the highest timestamp; "c" > "b" lexicographically.
        assert_eq!(scored[0].chunk_id, "c");
        assert_eq!(scored[1].chunk_id, "b");
        assert_eq!(scored[2].chunk_id, "a");
    }

    #[test]
    fn empty_store_returns_empty_results_and_zeroed_diagnostics() {
        let ctx = RetrievalContext::new(None, None, 0);
        let (scored, diag) = retrieve(&[], StrategyKind::Keyword, "query", 10, &ctx);
        assert!(scored.is_empty());
        assert_eq!(diag.sample_count, 0);
        assert_eq!(diag.min, 0.0);
    }

    #[test]
    fn top_k_truncates_after_diagnostics_computed_over_full_set() {
        let ctx = RetrievalContext::new(None, None, 1_000_000);
        let chunks: Vec<Chunk> = (0..20)
            .map(|i| chunk_with(&format!("c{i}"), i as i64 * 1000, "rust programming language"))
            .collect();
        let (scored, diag) = retrieve(&chunks, StrategyKind::Keyword, "rust", 5, &ctx);
        assert_eq!(scored.len(), 5);
        assert_eq!(diag.sample_count, 20);
    }
}
