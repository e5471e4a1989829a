//! The nine strategy scoring functions (§4.4).

use crate::chunk::Chunk;
use crate::embedding::cosine_similarity;

use super::{RetrievalContext, StrategyKind};

/// External accessibility scorer consulted by `FRONTIER_AWARE` (§6,
/// collaborator `AccessibilityScorer`). When unavailable (`is_ready() ==
/// false`), `FRONTIER_AWARE` falls back to `HYBRID` (§4.4).
pub trait AccessibilityScorer: Send + Sync {
    /// Whether this scorer currently has enough data to score embeddings.
    fn is_ready(&self) -> bool;

    /// Accessibility `mu_x` in `[0, 1]` for `embedding`.
    fn score_embedding(&self, embedding: &[f32]) -> f64;
}

/// Reference [`AccessibilityScorer`] used when no external scorer is
/// wired in. Always ready; scores `1 / (1 + ||embedding||_1 / len)` as a
/// cheap proxy so `FRONTIER_AWARE` has deterministic behaviour in tests
/// without a real accessibility model.
pub struct DefaultAccessibilityScorer;

impl AccessibilityScorer for DefaultAccessibilityScorer {
    fn is_ready(&self) -> bool {
        true
    }

    fn score_embedding(&self, embedding: &[f32]) -> f64 {
        if embedding.is_empty() {
            return 0.0;
        }
        let mean_abs =
            embedding.iter().map(|v| f64::from(v.abs())).sum::<f64>() / embedding.len() as f64;
        (1.0 / (1.0 + mean_abs)).clamp(0.0, 1.0)
    }
}

fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
        .collect()
}

pub(super) fn semantic_score(chunk: &Chunk, ctx: &RetrievalContext<'_>) -> f64 {
    match (&chunk.embedding, &ctx.query_embedding) {
        (Some(embedding), Some(query_embedding)) => cosine_similarity(embedding, query_embedding),
        _ => 0.0,
    }
}

pub(super) fn keyword_score(chunk: &Chunk, query: &str) -> f64 {
    let query_tokens = tokenize(query);
    if query_tokens.is_empty() {
        return 0.0;
    }
    let content_tokens: std::collections::HashSet<String> = tokenize(&chunk.content).into_iter().collect();
    let matched = query_tokens.iter().filter(|t| content_tokens.contains(*t)).count();
    matched as f64 / query_tokens.len() as f64
}

/// `1 / (1 + ageDays)` (§4.4).
fn recency_score(chunk: &Chunk, now_ms: i64) -> f64 {
    1.0 / (1.0 + chunk.age_days(now_ms))
}

/// `0.6*SEMANTIC + 0.4*(0.5 ^ (ageDays/30))` (§4.4).
fn relevance_decay_score(chunk: &Chunk, now_ms: i64, ctx: &RetrievalContext<'_>) -> f64 {
    let age_days = chunk.age_days(now_ms);
    0.6 * semantic_score(chunk, ctx) + 0.4 * 0.5f64.powf(age_days / 30.0)
}

fn frontier_aware_score(chunk: &Chunk, ctx: &RetrievalContext<'_>) -> f64 {
    let mu_x = chunk
        .embedding
        .as_deref()
        .map(|e| ctx.accessibility_scorer.score_embedding(e))
        .unwrap_or(0.0);
    0.6 * semantic_score(chunk, ctx) + 0.4 * mu_x
}

/// `0.40*semantic + 0.22*q + 0.15*recencyInStage + 0.13*stageDurability +
/// 0.10*max(emotional, novelty)` (§4.4).
fn nts_cascade_score(chunk: &Chunk, ctx: &RetrievalContext<'_>) -> f64 {
    use crate::chunk::metadata_keys;

    let stage = chunk.nts_stage().unwrap_or(crate::chunk::NtsStage::Sensory);
    let age_ms = (ctx.now_ms - chunk.timestamp).max(0) as f64;
    let recency_in_stage = (1.0 - age_ms / (stage.ttl_minutes() * 60_000.0)).max(0.0);

    let emotional = chunk
        .metadata
        .get(metadata_keys::EMOTIONAL_SALIENCE)
        .and_then(crate::chunk::MetadataValue::as_f64)
        .unwrap_or(0.0);
    let novelty = chunk
        .metadata
        .get(metadata_keys::NOVELTY)
        .and_then(crate::chunk::MetadataValue::as_f64)
        .unwrap_or(0.0);

    0.40 * semantic_score(chunk, ctx)
        + 0.22 * chunk.q_value
        + 0.15 * recency_in_stage
        + 0.13 * stage.durability_weight()
        + 0.10 * emotional.max(novelty)
}

/// Dispatch `chunk`/`query` scoring for `kind`. `HYBRID`, `MEMRL`, and
/// `GRAPH` have two-phase or blended semantics that need the full chunk
/// set, so they are handled by [`super::retrieve`] rather than here;
/// calling [`score`] with those kinds computes only their single-chunk
/// building-block score (used internally by the two-phase dispatch).
pub(super) fn score(kind: StrategyKind, chunk: &Chunk, query: &str, ctx: &RetrievalContext<'_>) -> f64 {
    match kind {
        StrategyKind::Semantic => semantic_score(chunk, ctx),
        StrategyKind::Keyword => keyword_score(chunk, query),
        StrategyKind::Hybrid => {
            0.7 * semantic_score(chunk, ctx) + 0.3 * keyword_score(chunk, query)
        }
        StrategyKind::Recency => recency_score(chunk, ctx.now_ms),
        StrategyKind::RelevanceDecay => relevance_decay_score(chunk, ctx.now_ms, ctx),
        StrategyKind::MemRl => 0.7 * semantic_score(chunk, ctx) + 0.3 * chunk.q_value,
        StrategyKind::Graph => 0.0,
        StrategyKind::FrontierAware => {
            if ctx.accessibility_scorer.is_ready() {
                frontier_aware_score(chunk, ctx)
            } else {
                0.7 * semantic_score(chunk, ctx) + 0.3 * keyword_score(chunk, query)
            }
        }
        StrategyKind::NtsCascade => nts_cascade_score(chunk, ctx),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::Chunk;

    #[test]
    fn keyword_score_is_fraction_of_query_tokens_matched() {
        let chunk = Chunk::new("c1", "the quick brown fox", "src", "memory");
        assert!((keyword_score(&chunk, "quick fox") - 1.0).abs() < 1e-9);
        assert!((keyword_score(&chunk, "quick dog") - 0.5).abs() < 1e-9);
    }

    #[test]
    fn recency_score_matches_spec_formula() {
        let mut chunk = Chunk::new("c1", "x", "src", "memory");
        let now = chunk.timestamp + 7 * 24 * 60 * 60 * 1000;
        chunk.timestamp = chunk.timestamp; // age = 7 days from `now`
        let expected = 1.0 / (1.0 + 7.0);
        assert!((recency_score(&chunk, now) - expected).abs() < 1e-9);
    }

    #[test]
    fn recency_score_decreases_with_age() {
        let fresh = Chunk::new("c1", "x", "src", "memory");
        let mut stale = Chunk::new("c2", "x", "src", "memory");
        stale.timestamp -= 30 * 24 * 60 * 60 * 1000;
        let now = fresh.timestamp;
        assert!(recency_score(&fresh, now) > recency_score(&stale, now));
    }

    #[test]
    fn default_accessibility_scorer_is_always_ready() {
        assert!(DefaultAccessibilityScorer.is_ready());
    }

    #[test]
    fn memrl_building_block_favors_higher_q_value_at_equal_semantic() {
        let ctx = RetrievalContext::new(None, None, 0);
        let mut a = Chunk::new("a", "x", "src", "memory");
        a.q_value = 0.9;
        let mut b = Chunk::new("b", "x", "src", "memory");
        b.q_value = 0.1;
        let sa = score(StrategyKind::MemRl, &a, "x", &ctx);
        let sb = score(StrategyKind::MemRl, &b, "x", &ctx);
        assert!(sa > sb);
    }
}
