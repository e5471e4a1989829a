//! Token-budget-driven auto-compaction (§4.8, C9).
//!
//! Compaction is extractive, not generative: it scores sentences already
//! present in the chunks being merged and keeps the best five, rather
//! than calling out to a summarisation model.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use crate::chunk::{metadata_keys, Chunk, MetadataValue};
use crate::error::CompactionError;
use crate::retrieval::{retrieve, RetrievalContext, StrategyKind};

/// Per-batch token budget for the compaction grouping pass (§4.8).
pub const MAX_SUMMARY_BATCH_TOKENS: u32 = 2_000;

/// Sentences kept in each extractive summary (§4.8).
const SUMMARY_SENTENCE_COUNT: usize = 5;

/// Minimum sentence length considered for scoring (§4.8).
const MIN_SENTENCE_CHARS: usize = 10;

/// Length threshold for the length-bucket scoring term (§4.8).
const LONG_SENTENCE_CHARS: usize = 30;

/// Unconditional drop threshold within the to-compact set (§4.8).
const UNCONDITIONAL_DROP_Q: f64 = 0.15;

/// Unconditional drop retrieval-count floor (§4.8).
const UNCONDITIONAL_DROP_MIN_RETRIEVALS: u64 = 3;

/// Result of one `compactIfNeeded` run (§4.8).
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CompactionReport {
    /// Whether compaction actually ran (the usage ratio may be below
    /// the trigger, in which case this is `false` and every other field
    /// is zero).
    pub ran: bool,
    /// Chunks summarised away.
    pub chunks_compacted: usize,
    /// Summary chunks produced.
    pub summaries_created: usize,
    /// Chunks unconditionally dropped for being low-value and over-retrieved.
    pub chunks_dropped: usize,
    /// Wall-clock duration of the run, in milliseconds.
    pub duration_ms: u64,
}

/// Non-reentrant guard around one compaction run (§4.8, §7:
/// `ConcurrentInProgress` error if called twice).
#[derive(Debug, Default)]
pub struct CompactionGuard {
    in_progress: AtomicBool,
}

impl CompactionGuard {
    /// Construct an idle guard.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn enter(&self) -> Result<CompactionLease<'_>, CompactionError> {
        if self.in_progress.swap(true, Ordering::AcqRel) {
            return Err(CompactionError::ConcurrentInProgress);
        }
        Ok(CompactionLease { guard: self })
    }
}

struct CompactionLease<'a> {
    guard: &'a CompactionGuard,
}

impl Drop for CompactionLease<'_> {
    fn drop(&mut self) {
        self.guard.in_progress.store(false, Ordering::Release);
    }
}

fn split_sentences(text: &str) -> Vec<&str> {
    text.split(['.', '!', '?'])
        .map(str::trim)
        .filter(|s| s.len() >= MIN_SENTENCE_CHARS)
        .collect()
}

fn position_score(index: usize) -> f64 {
    1.0 / (1.0 + 0.3 * index as f64)
}

fn length_bucket(sentence: &str) -> f64 {
    if sentence.len() >= LONG_SENTENCE_CHARS {
        1.0
    } else {
        0.5
    }
}

/// Build an extractive summary from `batch`: score every sentence of
/// every chunk, keep the top [`SUMMARY_SENTENCE_COUNT`], and prefix with
/// the `[Compacted from N memories, T tokens]` marker (§4.8).
fn summarize_batch(batch: &[&Chunk]) -> String {
    let mut scored: Vec<(f64, &str)> = Vec::new();
    for chunk in batch {
        for (index, sentence) in split_sentences(&chunk.content).into_iter().enumerate() {
            let score = 0.3 * position_score(index) + 0.5 * chunk.q_value + 0.2 * length_bucket(sentence);
            scored.push((score, sentence));
        }
    }
    scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
    scored.truncate(SUMMARY_SENTENCE_COUNT);

    let total_tokens: u32 = batch.iter().map(|c| c.token_count).sum();
    let body = scored.into_iter().map(|(_, s)| s).collect::<Vec<_>>().join(". ");
    format!("[Compacted from {} memories, {total_tokens} tokens] {body}", batch.len())
}

fn group_into_batches<'a>(chunks: &[&'a Chunk]) -> Vec<Vec<&'a Chunk>> {
    let mut by_source_type: HashMap<&str, Vec<&Chunk>> = HashMap::new();
    for chunk in chunks {
        by_source_type.entry(chunk.source_type.as_str()).or_default().push(chunk);
    }

    let mut batches = Vec::new();
    for (_, mut group) in by_source_type {
        group.sort_by_key(|c| c.timestamp);
        let mut current: Vec<&Chunk> = Vec::new();
        let mut current_tokens = 0u32;
        for chunk in group {
            if current_tokens + chunk.token_count > MAX_SUMMARY_BATCH_TOKENS && !current.is_empty() {
                batches.push(std::mem::take(&mut current));
                current_tokens = 0;
            }
            current_tokens += chunk.token_count;
            current.push(chunk);
        }
        if !current.is_empty() {
            batches.push(current);
        }
    }
    batches
}

/// Run one compaction pass over `chunks` in place if `usage_ratio >=
/// threshold` (§4.8). `preserve_recent` chunks by descending timestamp
/// are never touched. Returns `ran = false` and leaves `chunks` untouched
/// if the guard is already held or the trigger is not met.
///
/// # Errors
/// Returns [`CompactionError::ConcurrentInProgress`] if another
/// compaction is already running on `guard`.
pub fn compact_if_needed(
    chunks: &mut Vec<Chunk>,
    guard: &CompactionGuard,
    max_context_tokens: u32,
    compaction_threshold: f64,
    preserve_recent: usize,
    now_ms: i64,
) -> Result<CompactionReport, CompactionError> {
    let lease = guard.enter()?;

    let total_tokens: u64 = chunks.iter().map(|c| u64::from(c.token_count)).sum();
    let usage_ratio = total_tokens as f64 / f64::from(max_context_tokens).max(1.0);
    if usage_ratio < compaction_threshold {
        drop(lease);
        return Ok(CompactionReport::default());
    }

    let start = Instant::now();

    let mut ordered: Vec<usize> = (0..chunks.len()).collect();
    ordered.sort_by_key(|&i| chunks[i].timestamp);
    let protected: std::collections::HashSet<usize> =
        ordered.iter().rev().take(preserve_recent).copied().collect();

    let to_compact_refs: Vec<&Chunk> = chunks
        .iter()
        .enumerate()
        .filter(|(i, _)| !protected.contains(i))
        .map(|(_, c)| c)
        .collect();

    let unconditional_drop_ids: std::collections::HashSet<String> = to_compact_refs
        .iter()
        .filter(|c| c.q_value < UNCONDITIONAL_DROP_Q && c.retrieval_count > UNCONDITIONAL_DROP_MIN_RETRIEVALS)
        .map(|c| c.chunk_id.clone())
        .collect();

    let survivors: Vec<&Chunk> = to_compact_refs
        .into_iter()
        .filter(|c| !unconditional_drop_ids.contains(&c.chunk_id))
        .collect();

    let batches = group_into_batches(&survivors);

    let mut summaries: Vec<Chunk> = Vec::new();
    let mut compacted_ids: std::collections::HashSet<String> = std::collections::HashSet::new();
    for batch in batches {
        if batch.len() < 2 {
            continue;
        }
        let source_type = batch[0].source_type.clone();
        let original_tokens: u32 = batch.iter().map(|c| c.token_count).sum();
        let avg_q_value = batch.iter().map(|c| c.q_value).sum::<f64>() / batch.len() as f64;
        let compacted_from = batch.len();
        let ids: Vec<String> = batch.iter().map(|c| c.chunk_id.clone()).collect();
        let summary_text = summarize_batch(&batch);

        let mut summary = Chunk::new(uuid::Uuid::new_v4().to_string(), summary_text, "compaction_summary", source_type);
        summary.token_count = (summary.content.chars().count() / 4) as u32;
        summary.q_value = avg_q_value;
        summary
            .metadata
            .insert(metadata_keys::COMPACTED_FROM.to_string(), MetadataValue::Int(compacted_from as i64));
        summary
            .metadata
            .insert(metadata_keys::ORIGINAL_TOKENS.to_string(), MetadataValue::Int(i64::from(original_tokens)));
        summary
            .metadata
            .insert(metadata_keys::AVG_Q_VALUE.to_string(), MetadataValue::Float(avg_q_value));
        summary
            .metadata
            .insert(metadata_keys::COMPACTION_TIME.to_string(), MetadataValue::Int(now_ms));
        if avg_q_value > 0.5 {
            summary.update_q_value(true, 0.1).expect("0.1 is a positive literal learning rate");
        }

        compacted_ids.extend(ids);
        summaries.push(summary);
    }

    let chunks_compacted = compacted_ids.len();
    let summaries_created = summaries.len();
    let chunks_dropped = unconditional_drop_ids.len();

    chunks.retain(|c| !compacted_ids.contains(&c.chunk_id) && !unconditional_drop_ids.contains(&c.chunk_id));
    chunks.extend(summaries);

    drop(lease);
    Ok(CompactionReport {
        ran: true,
        chunks_compacted,
        summaries_created,
        chunks_dropped,
        duration_ms: start.elapsed().as_millis() as u64,
    })
}

/// Run compaction, then an `MEMRL` top-5 retrieval, and concatenate the
/// results with `query` into one prompt (§4.8).
///
/// # Errors
/// Returns [`CompactionError::ConcurrentInProgress`] if another
/// compaction is already running on `guard`.
pub fn build_compacted_prompt(
    chunks: &mut Vec<Chunk>,
    guard: &CompactionGuard,
    max_context_tokens: u32,
    compaction_threshold: f64,
    preserve_recent: usize,
    now_ms: i64,
    query: &str,
    query_embedding: Option<Vec<f32>>,
) -> Result<String, CompactionError> {
    compact_if_needed(chunks, guard, max_context_tokens, compaction_threshold, preserve_recent, now_ms)?;

    let ctx = RetrievalContext::new(query_embedding, None, now_ms);
    let (scored, _) = retrieve(chunks, StrategyKind::MemRl, query, 5, &ctx);
    let by_id: HashMap<&str, &Chunk> = chunks.iter().map(|c| (c.chunk_id.as_str(), c)).collect();

    let joined = scored
        .iter()
        .filter_map(|s| by_id.get(s.chunk_id.as_str()))
        .map(|c| {
            let truncated: String = c.content.chars().take(200).collect();
            truncated
        })
        .collect::<Vec<_>>()
        .join("\n");

    Ok(format!("[Compacted Context]\n{joined}\n\n[Query]\n{query}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk_with(id: &str, q: f64, retrieval_count: u64, timestamp: i64, content: &str) -> Chunk {
        let mut c = Chunk::new(id, content, "src", "memory");
        c.q_value = q;
        c.retrieval_count = retrieval_count;
        c.timestamp = timestamp;
        c.token_count = (content.chars().count() / 4).max(1) as u32;
        c
    }

    #[test]
    fn below_threshold_is_a_no_op() {
        let mut chunks = vec![chunk_with("a", 0.5, 0, 0, "short")];
        let guard = CompactionGuard::new();
        let report = compact_if_needed(&mut chunks, &guard, 100_000, 0.75, 20, 0).unwrap();
        assert!(!report.ran);
        assert_eq!(chunks.len(), 1);
    }

    #[test]
    fn reentrant_call_is_rejected() {
        let guard = CompactionGuard::new();
        let _lease = guard.enter().unwrap();
        let mut chunks = Vec::new();
        let err = compact_if_needed(&mut chunks, &guard, 1, 0.0, 0, 0).unwrap_err();
        assert!(matches!(err, CompactionError::ConcurrentInProgress));
    }

    #[test]
    fn compacts_over_threshold_and_preserves_recent() {
        let long_text = "This is a reasonably long sentence about rust programming and memory systems. \
                          Another sentence describing the same topic in different words for variety.";
        let mut chunks: Vec<Chunk> = (0..10)
            .map(|i| chunk_with(&format!("c{i}"), 0.6, 1, i as i64 * 1000, long_text))
            .collect();
        for c in &mut chunks {
            c.token_count = 50;
        }
        let guard = CompactionGuard::new();
        let report = compact_if_needed(&mut chunks, &guard, 100, 0.5, 2, 0).unwrap();
        assert!(report.ran);
        assert!(report.summaries_created >= 1);
        assert!(chunks.iter().any(|c| c.source == "compaction_summary"));
    }

    #[test]
    fn unconditional_drop_removes_low_q_over_retrieved_chunks() {
        let mut chunks = vec![
            chunk_with("drop-me", 0.05, 10, 0, "a throwaway low value chunk that nobody needs anymore"),
            chunk_with("keep-me", 0.9, 0, 1000, "a durable high value chunk worth preserving for later"),
        ];
        for c in &mut chunks {
            c.token_count = 5000;
        }
        let guard = CompactionGuard::new();
        let report = compact_if_needed(&mut chunks, &guard, 1000, 0.1, 0, 0).unwrap();
        assert!(report.ran);
        assert!(!chunks.iter().any(|c| c.chunk_id == "drop-me"));
    }
}
