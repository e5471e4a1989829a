//! Chunk & Q-learning state (§3, §4.1).
//!
//! A [`Chunk`] is the engine's atom of storage and retrieval: a piece of
//! text plus a learned utility score that is nudged up or down every time
//! a caller reports whether retrieving it was actually useful.

use std::collections::HashMap;

use chrono::Utc;
use serde::{Deserialize, Serialize};

/// A tagged-union metadata value (§9: "model as a tagged-union value").
///
/// Unknown keys round-trip through persistence untouched; this type only
/// constrains the *value* shape, not which keys exist.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetadataValue {
    /// UTF-8 text value.
    Text(String),
    /// Integer value (e.g. `entity_count`).
    Int(i64),
    /// Floating-point value (e.g. `novelty`, `importance`).
    Float(f64),
    /// Boolean flag.
    Bool(bool),
}

impl MetadataValue {
    /// Best-effort conversion to `f64`, used by scoring code that reads
    /// numeric metadata such as `importance` or `novelty` without caring
    /// whether the caller stored it as an int or a float.
    #[must_use]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            MetadataValue::Float(v) => Some(*v),
            MetadataValue::Int(v) => Some(*v as f64),
            MetadataValue::Bool(v) => Some(if *v { 1.0 } else { 0.0 }),
            MetadataValue::Text(_) => None,
        }
    }

    /// Best-effort conversion to a string slice.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            MetadataValue::Text(v) => Some(v.as_str()),
            _ => None,
        }
    }
}

/// Metadata map recognised keys (§3). Any key may be present; these are
/// just the ones the engine itself reads or writes.
pub mod metadata_keys {
    /// Caller-supplied importance in `[0, 1]`, default `0.5`.
    pub const IMPORTANCE: &str = "importance";
    /// Free-form category tag.
    pub const CATEGORY: &str = "category";
    /// NTS stage (`SENSORY`, `WORKING`, `EPISODIC`, `SEMANTIC`).
    pub const NTS_STAGE: &str = "nts_stage";
    /// Novelty heuristic in `[0, 1]`.
    pub const NOVELTY: &str = "novelty";
    /// Emotional salience heuristic in `[0, 1]`.
    pub const EMOTIONAL_SALIENCE: &str = "emotional_salience";
    /// Comma-joined ids of chunks this one was consolidated next to.
    pub const CONNECTED_CHUNKS: &str = "connected_chunks";
    /// Epoch-millisecond timestamp of the last consolidation cycle.
    pub const LAST_CONSOLIDATED: &str = "last_consolidated";
    /// `high` / `medium` / `low` Q-value band.
    pub const IMPORTANCE_TIER: &str = "importance_tier";
    /// Number of entities extracted from this chunk.
    pub const ENTITY_COUNT: &str = "entity_count";
    /// Set by auto-compaction on a summary chunk: source chunk count.
    pub const COMPACTED_FROM: &str = "compacted_from";
    /// Set by auto-compaction: total tokens across summarised chunks.
    pub const ORIGINAL_TOKENS: &str = "original_tokens";
    /// Set by auto-compaction: mean Q-value of summarised chunks.
    pub const AVG_Q_VALUE: &str = "avg_q_value";
    /// Set by auto-compaction: epoch-millisecond time of the compaction run.
    pub const COMPACTION_TIME: &str = "compaction_time";
}

/// NTS (neocortical/temporal-stage) label assigned to a chunk on ingest
/// and consumed by the `NTS_CASCADE` retrieval strategy (§4.3, §4.4).
///
/// | Stage    | Durability weight |
/// |----------|--------------------|
/// | Sensory  | 0.30               |
/// | Working  | 0.55               |
/// | Episodic | 0.80               |
/// | Semantic | 1.00               |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum NtsStage {
    /// Freshly ingested, low-importance working content.
    Sensory,
    /// Actively relevant but not yet durable.
    Working,
    /// Durable episodic memory.
    Episodic,
    /// Durable, knowledge-like content (always assigned to `knowledge`/
    /// `document` source types).
    Semantic,
}

impl NtsStage {
    /// Durability weight used by `NTS_CASCADE` (§4.4).
    #[must_use]
    pub fn durability_weight(self) -> f64 {
        match self {
            NtsStage::Sensory => 0.30,
            NtsStage::Working => 0.55,
            NtsStage::Episodic => 0.80,
            NtsStage::Semantic => 1.00,
        }
    }

    /// Stage time-to-live in minutes, used by `NTS_CASCADE`'s recency
    /// term. Values are heuristic and deliberately generous for
    /// `Semantic`, which never meaningfully "expires" within a stage.
    #[must_use]
    pub fn ttl_minutes(self) -> f64 {
        match self {
            NtsStage::Sensory => 30.0,
            NtsStage::Working => 12.0 * 60.0,
            NtsStage::Episodic => 7.0 * 24.0 * 60.0,
            NtsStage::Semantic => 365.0 * 24.0 * 60.0,
        }
    }

    pub(crate) fn as_str(self) -> &'static str {
        match self {
            NtsStage::Sensory => "SENSORY",
            NtsStage::Working => "WORKING",
            NtsStage::Episodic => "EPISODIC",
            NtsStage::Semantic => "SEMANTIC",
        }
    }

    pub(crate) fn parse(s: &str) -> Option<Self> {
        match s {
            "SENSORY" => Some(NtsStage::Sensory),
            "WORKING" => Some(NtsStage::Working),
            "EPISODIC" => Some(NtsStage::Episodic),
            "SEMANTIC" => Some(NtsStage::Semantic),
            _ => None,
        }
    }
}

/// A single memory unit: the engine's atom of storage and retrieval.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Chunk {
    /// Stable opaque identifier. Never parsed; compared for byte equality.
    pub chunk_id: String,
    /// UTF-8 text content.
    pub content: String,
    /// Free-form provenance tag (e.g. a file path or conversation id).
    pub source: String,
    /// Free-form category: `memory`, `knowledge`, `document`,
    /// `conversation`, `compaction_summary`, ...
    pub source_type: String,
    /// Monotonic wall-clock milliseconds at insertion.
    pub timestamp: i64,
    /// Character-count / 4 estimate of token count.
    pub token_count: u32,
    /// Tagged-union metadata map; unknown keys are preserved verbatim.
    pub metadata: HashMap<String, MetadataValue>,
    /// Dense embedding, L2-normalised to within `1e-4`. `None` until an
    /// `Embedder` has produced one, or if embedding failed non-fatally.
    pub embedding: Option<Vec<f32>>,
    /// Learned utility in `[0, 1]`, initially `0.5`.
    pub q_value: f64,
    /// Total number of times this chunk has been retrieved.
    pub retrieval_count: u64,
    /// Number of those retrievals later reported as successful.
    pub success_count: u64,
}

impl Chunk {
    /// Build a new chunk with the invariant defaults from §3: `q_value =
    /// 0.5`, zeroed counters, and an empty metadata map the caller can
    /// then populate.
    pub fn new(
        chunk_id: impl Into<String>,
        content: impl Into<String>,
        source: impl Into<String>,
        source_type: impl Into<String>,
    ) -> Self {
        Self {
            chunk_id: chunk_id.into(),
            content: content.into(),
            source: source.into(),
            source_type: source_type.into(),
            timestamp: Utc::now().timestamp_millis(),
            token_count: 0,
            metadata: HashMap::new(),
            embedding: None,
            q_value: 0.5,
            retrieval_count: 0,
            success_count: 0,
        }
    }

    /// Apply one TD step to the Q-value (§4.1): `q <- clamp(q + lr * (r -
    /// q), 0, 1)` with `r = 1` on success, `0` otherwise, then increment
    /// the retrieval/success counters.
    ///
    /// `lr == 0.0` is rejected outright: the engine reserves a bare `lr =
    /// 0` call as meaningless arithmetic rather than the teacher's "pass
    /// `learningRate = 0` to trigger a save" convention (§9 open
    /// question) — `RagStore::provide_feedback` with an empty id list is
    /// the save trigger here instead.
    ///
    /// # Errors
    /// Returns [`crate::error::StoreError::InvalidInput`] if
    /// `learning_rate <= 0.0`; the chunk is left unmodified in that case.
    pub fn update_q_value(&mut self, success: bool, learning_rate: f64) -> crate::error::Result<()> {
        if learning_rate <= 0.0 {
            return Err(crate::error::StoreError::InvalidInput(format!(
                "learning_rate must be positive, got {learning_rate}"
            )));
        }
        let reward = if success { 1.0 } else { 0.0 };
        self.q_value = (self.q_value + learning_rate * (reward - self.q_value)).clamp(0.0, 1.0);
        self.retrieval_count += 1;
        if success {
            self.success_count += 1;
        }
        Ok(())
    }

    /// Fraction of retrievals that were reported successful, `0` if the
    /// chunk has never been retrieved.
    #[must_use]
    pub fn success_rate(&self) -> f64 {
        if self.retrieval_count == 0 {
            0.0
        } else {
            self.success_count as f64 / self.retrieval_count as f64
        }
    }

    /// Parsed NTS stage, if the `nts_stage` metadata key is present and
    /// recognised.
    #[must_use]
    pub fn nts_stage(&self) -> Option<NtsStage> {
        self.metadata
            .get(metadata_keys::NTS_STAGE)
            .and_then(MetadataValue::as_str)
            .and_then(NtsStage::parse)
    }

    /// Set the `nts_stage` metadata key.
    pub fn set_nts_stage(&mut self, stage: NtsStage) {
        self.metadata.insert(
            metadata_keys::NTS_STAGE.to_string(),
            MetadataValue::Text(stage.as_str().to_string()),
        );
    }

    /// Age of this chunk in days, relative to `now_ms` (epoch
    /// milliseconds). Used by the recency-sensitive retrieval strategies.
    #[must_use]
    pub fn age_days(&self, now_ms: i64) -> f64 {
        ((now_ms - self.timestamp).max(0) as f64) / (1000.0 * 60.0 * 60.0 * 24.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn q_value_converges_toward_one_on_repeated_success() {
        // S2: ten successes at lr=0.1 should land at 1 - 0.9^10.
        let mut chunk = Chunk::new("c1", "content", "src", "memory");
        for _ in 0..10 {
            chunk.update_q_value(true, 0.1).unwrap();
        }
        let expected = 1.0 - 0.9f64.powi(10);
        assert!((chunk.q_value - expected).abs() < 1e-9);
        assert_eq!(chunk.retrieval_count, 10);
        assert_eq!(chunk.success_count, 10);
        assert!((chunk.success_rate() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn q_value_stays_within_bounds_on_failure_runs() {
        let mut chunk = Chunk::new("c2", "content", "src", "memory");
        for _ in 0..50 {
            chunk.update_q_value(false, 0.3).unwrap();
        }
        assert!((0.0..=1.0).contains(&chunk.q_value));
        assert!(chunk.q_value < 0.01);
        assert_eq!(chunk.success_count, 0);
        assert_eq!(chunk.retrieval_count, 50);
        assert_eq!(chunk.success_rate(), 0.0);
    }

    #[test]
    fn success_count_never_exceeds_retrieval_count() {
        let mut chunk = Chunk::new("c3", "content", "src", "memory");
        chunk.update_q_value(true, 0.2).unwrap();
        chunk.update_q_value(false, 0.2).unwrap();
        chunk.update_q_value(true, 0.2).unwrap();
        assert!(chunk.success_count <= chunk.retrieval_count);
    }

    #[test]
    fn nts_stage_roundtrips_through_metadata() {
        let mut chunk = Chunk::new("c4", "content", "src", "memory");
        chunk.set_nts_stage(NtsStage::Episodic);
        assert_eq!(chunk.nts_stage(), Some(NtsStage::Episodic));
    }

    #[test]
    fn nts_stage_durability_weights_are_ordered() {
        assert!(NtsStage::Sensory.durability_weight() < NtsStage::Working.durability_weight());
        assert!(NtsStage::Working.durability_weight() < NtsStage::Episodic.durability_weight());
        assert!(NtsStage::Episodic.durability_weight() < NtsStage::Semantic.durability_weight());
    }

    #[test]
    fn update_q_value_rejects_zero_learning_rate_and_leaves_chunk_unchanged() {
        let mut chunk = Chunk::new("c5", "content", "src", "memory");
        let before = (chunk.q_value, chunk.retrieval_count, chunk.success_count);
        let err = chunk.update_q_value(true, 0.0).unwrap_err();
        assert!(matches!(err, crate::error::StoreError::InvalidInput(_)));
        assert_eq!((chunk.q_value, chunk.retrieval_count, chunk.success_count), before);
    }
}
