//! The `RagStore` orchestrator (§4.2, C4).
//!
//! `RagStore` is the crate's public facade: it owns the resident chunk
//! set and knowledge graph, wires in the caller's [`BlobStore`],
//! [`Embedder`], and [`TelemetrySink`] collaborators, and drives
//! ingestion, retrieval, feedback, consolidation, compaction, and the
//! sleep-cycle optimiser while honouring the concurrency model in §5:
//! every mutation happens under one write lock, held only for the
//! duration of the in-memory update, with persistence done outside it
//! where the call shape allows.

use std::sync::{Arc, RwLock};
use std::time::Instant;

use chrono::Utc;
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::blob_store::BlobStore;
use crate::chunk::{metadata_keys, Chunk, MetadataValue, NtsStage};
use crate::compaction::{self, CompactionGuard, CompactionReport};
use crate::config::EngineConfig;
use crate::consolidation::{self, ConsolidationReport, ConsolidationSignals, ConsolidationTotals};
use crate::embedding::Embedder;
use crate::error::{Result, StoreError};
use crate::extraction;
use crate::graph::KnowledgeGraph;
use crate::mnx::{self, GenericSection, IdentitySection, MnxFile};
use crate::optimizer::{OptimizationResult, SleepCycleOptimizer, StoreHealthSnapshot, TunableParams};
use crate::retrieval::{self, AccessibilityScorer, RetrievalContext, RetrievalDiagnostics, ScoredChunk, StrategyKind};
use crate::telemetry::{TelemetryEvent, TelemetrySink};

/// Blob key a store's resident chunks persist under (§6): `rag_chunks_<aiId>`.
fn chunks_blob_key(ai_id: &str) -> String {
    format!("rag_chunks_{ai_id}")
}

/// Blob key a store's knowledge graph persists under (§6):
/// `knowledge_graph_<aiId>`.
fn graph_blob_key(ai_id: &str) -> String {
    format!("{}{ai_id}", crate::graph::GRAPH_BLOB_PREFIX)
}

/// Blob key namespace for store-level metadata (§6): `rag_store_meta_<aiId>_<k>`.
fn meta_blob_key(ai_id: &str, k: &str) -> String {
    format!("rag_store_meta_{ai_id}_{k}")
}

/// Outcome of one `add_chunk` call.
#[derive(Debug, Clone, PartialEq)]
pub struct IngestResult {
    /// Id assigned to the new chunk.
    pub chunk_id: String,
    /// NTS stage assigned on ingest.
    pub nts_stage: NtsStage,
    /// Entities extracted from the content (best-effort; always present
    /// even when extraction finds nothing).
    pub entity_count: usize,
    /// Chunks evicted to respect `maxChunks`, if eviction ran.
    pub evicted: usize,
}

/// Result of one `retrieve` call: the truncated, scored chunks plus the
/// strategy's pre-truncation diagnostics.
#[derive(Debug, Clone)]
pub struct RetrieveResult {
    /// Scored, tie-broken, `topK`-truncated matches.
    pub results: Vec<ScoredChunk>,
    /// Pre-truncation diagnostics for the strategy run.
    pub diagnostics: RetrievalDiagnostics,
}

struct StoreState {
    chunks: Vec<Chunk>,
    graph: KnowledgeGraph,
    optimizer: SleepCycleOptimizer,
    consolidation_totals: ConsolidationTotals,
}

/// The engine's public facade (§4.2): one `RagStore` per `aiId`, backed
/// by a caller-supplied [`BlobStore`], [`Embedder`], and [`TelemetrySink`].
pub struct RagStore {
    ai_id: String,
    config: EngineConfig,
    blob: Arc<dyn BlobStore>,
    embedder: Arc<dyn Embedder>,
    telemetry: Arc<dyn TelemetrySink>,
    accessibility_scorer: Arc<dyn AccessibilityScorer>,
    state: RwLock<StoreState>,
    compaction_guard: CompactionGuard,
}

impl RagStore {
    /// Construct a store for `ai_id` with the default
    /// [`crate::retrieval::DefaultAccessibilityScorer`]. Call [`RagStore::load`]
    /// afterward to restore any previously persisted state.
    #[must_use]
    pub fn new(
        ai_id: impl Into<String>,
        config: EngineConfig,
        blob: Arc<dyn BlobStore>,
        embedder: Arc<dyn Embedder>,
        telemetry: Arc<dyn TelemetrySink>,
    ) -> Self {
        Self::with_accessibility_scorer(ai_id, config, blob, embedder, telemetry, Arc::new(retrieval::DefaultAccessibilityScorer))
    }

    /// Construct a store with a caller-supplied [`AccessibilityScorer`]
    /// (§6 collaborator, used by `FRONTIER_AWARE`).
    #[must_use]
    pub fn with_accessibility_scorer(
        ai_id: impl Into<String>,
        config: EngineConfig,
        blob: Arc<dyn BlobStore>,
        embedder: Arc<dyn Embedder>,
        telemetry: Arc<dyn TelemetrySink>,
        accessibility_scorer: Arc<dyn AccessibilityScorer>,
    ) -> Self {
        Self {
            ai_id: ai_id.into(),
            config,
            blob,
            embedder,
            telemetry,
            accessibility_scorer,
            state: RwLock::new(StoreState {
                chunks: Vec::new(),
                graph: KnowledgeGraph::new(),
                optimizer: SleepCycleOptimizer::new(),
                consolidation_totals: ConsolidationTotals::default(),
            }),
            compaction_guard: CompactionGuard::new(),
        }
    }

    /// Agent id this store was constructed for.
    #[must_use]
    pub fn ai_id(&self) -> &str {
        &self.ai_id
    }

    /// Current engine configuration.
    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Load chunks, the knowledge graph, the optimiser's state, and
    /// cumulative consolidation totals from the blob store, replacing any
    /// in-memory state (§9: loaders replace, not append). Missing keys are
    /// treated as empty, not an error.
    ///
    /// # Errors
    /// Returns [`StoreError::StoreBackend`] on a blob I/O failure, or
    /// [`StoreError::CorruptStore`]/[`StoreError::Graph`] if a persisted
    /// blob fails to parse.
    pub fn load(&self) -> Result<()> {
        let mut state = self.state.write().unwrap();

        if let Some(bytes) = self.blob.get(&chunks_blob_key(&self.ai_id)).map_err(StoreError::StoreBackend)? {
            state.chunks = serde_json::from_slice(&bytes).map_err(|e| StoreError::CorruptStore {
                key: chunks_blob_key(&self.ai_id),
                reason: e.to_string(),
            })?;
        }

        if let Some(bytes) = self.blob.get(&graph_blob_key(&self.ai_id)).map_err(StoreError::StoreBackend)? {
            state.graph = KnowledgeGraph::from_bytes(&bytes)?;
        }

        if let Some(bytes) = self
            .blob
            .get(crate::optimizer::OPTIMIZER_STATE_BLOB_KEY)
            .map_err(StoreError::StoreBackend)?
        {
            state.optimizer = SleepCycleOptimizer::from_bytes(&bytes)?;
        }

        if let Some(bytes) = self
            .blob
            .get(crate::consolidation::CONSOLIDATION_STATS_BLOB_KEY)
            .map_err(StoreError::StoreBackend)?
        {
            state.consolidation_totals = ConsolidationTotals::from_bytes(&bytes)?;
        }

        Ok(())
    }

    /// Persist the resident chunk set and knowledge graph. Called after
    /// every mutating operation (§5: persistence happens outside the
    /// write lock where the call shape allows, so this takes a snapshot
    /// first).
    ///
    /// # Errors
    /// Returns [`StoreError::StoreBackend`] on a blob I/O failure.
    fn save(&self, chunks_bytes: Vec<u8>, graph_bytes: Vec<u8>) -> Result<()> {
        self.blob.put(&chunks_blob_key(&self.ai_id), chunks_bytes).map_err(StoreError::StoreBackend)?;
        self.blob.put(&graph_blob_key(&self.ai_id), graph_bytes).map_err(StoreError::StoreBackend)?;
        Ok(())
    }

    fn persist_snapshot(&self) -> Result<()> {
        let (chunks_bytes, graph_bytes) = {
            let state = self.state.read().unwrap();
            (
                serde_json::to_vec(&state.chunks).map_err(StoreError::Serialization)?,
                state.graph.to_bytes()?,
            )
        };
        self.save(chunks_bytes, graph_bytes)
    }

    fn novelty_score(chunks: &[Chunk], embedding: Option<&[f32]>) -> f64 {
        let Some(embedding) = embedding else { return 0.5 };
        if chunks.is_empty() {
            return 1.0;
        }
        let max_similarity = chunks
            .iter()
            .filter_map(|c| c.embedding.as_deref())
            .map(|existing| crate::embedding::cosine_similarity(embedding, existing))
            .fold(0.0_f64, f64::max);
        (1.0 - max_similarity).clamp(0.0, 1.0)
    }

    fn emotional_salience(content: &str) -> f64 {
        const MARKERS: &[&str] = &["!", "urgent", "important", "critical", "love", "hate", "afraid", "excited"];
        let lower = content.to_lowercase();
        let hits = MARKERS.iter().filter(|m| lower.contains(**m)).count();
        (0.3 + 0.15 * hits as f64).clamp(0.0, 1.0)
    }

    fn assign_nts_stage(source_type: &str, importance: f64, novelty: f64, emotional_salience: f64) -> NtsStage {
        if source_type == "knowledge" || source_type == "document" {
            return NtsStage::Semantic;
        }
        let aggregate = 0.45 * importance + 0.30 * emotional_salience + 0.25 * novelty;
        if aggregate >= 0.75 {
            NtsStage::Episodic
        } else if aggregate >= 0.55 {
            NtsStage::Working
        } else {
            NtsStage::Sensory
        }
    }

    fn deterministic_chunk_id(content: &str, source: &str, now_ms: i64) -> String {
        let head: String = content.chars().take(100).collect();
        let mut hasher = Sha256::new();
        hasher.update(head.as_bytes());
        hasher.update(source.as_bytes());
        hasher.update(now_ms.to_be_bytes());
        let digest = hasher.finalize();
        hex_prefix(&digest, 8)
    }

    /// Ingest one chunk (§4.2, §4.3): assigns a deterministic id,
    /// timestamp, token estimate, embedding, novelty/emotional-salience
    /// heuristics, and NTS stage; runs best-effort entity extraction into
    /// the knowledge graph; evicts the lowest-Q chunks if `maxChunks` is
    /// now exceeded; persists the result.
    ///
    /// # Errors
    /// Returns [`StoreError::StoreBackend`] if persistence fails; the
    /// in-memory chunk set still reflects the ingest in that case (§7:
    /// callers may retry `provide_feedback` with an empty id list to
    /// force a re-save).
    #[tracing::instrument(skip(self, content, metadata), fields(ai_id = %self.ai_id, source_type))]
    pub fn add_chunk(
        &self,
        content: impl Into<String>,
        source: impl Into<String>,
        source_type: impl Into<String>,
        metadata: Vec<(String, MetadataValue)>,
    ) -> Result<IngestResult> {
        let content = content.into();
        let source = source.into();
        let source_type = source_type.into();
        tracing::Span::current().record("source_type", source_type.as_str());
        let now_ms = Utc::now().timestamp_millis();
        let embedding = self.embedder.embed(&content);
        let embedding = if embedding.is_empty() { None } else { Some(embedding) };

        let importance = metadata
            .iter()
            .find(|(k, _)| k == metadata_keys::IMPORTANCE)
            .and_then(|(_, v)| v.as_f64())
            .unwrap_or(0.5);
        let emotional_salience = Self::emotional_salience(&content);

        let chunk_id = Self::deterministic_chunk_id(&content, &source, now_ms);
        let token_count = (content.chars().count() / 4).max(1) as u32;

        let mut chunk = Chunk::new(chunk_id.clone(), content.clone(), source, source_type.clone());
        chunk.timestamp = now_ms;
        chunk.token_count = token_count;
        chunk.embedding = embedding.clone();
        for (k, v) in metadata {
            chunk.metadata.insert(k, v);
        }
        chunk
            .metadata
            .entry(metadata_keys::EMOTIONAL_SALIENCE.to_string())
            .or_insert(MetadataValue::Float(emotional_salience));

        let extraction = extraction::extract(&content);
        let entity_count = extraction.entities.len();
        chunk
            .metadata
            .insert(metadata_keys::ENTITY_COUNT.to_string(), MetadataValue::Int(entity_count as i64));

        let evicted;
        {
            let mut state = self.state.write().unwrap();
            let novelty = Self::novelty_score(&state.chunks, embedding.as_deref());
            chunk.metadata.insert(metadata_keys::NOVELTY.to_string(), MetadataValue::Float(novelty));
            let nts_stage = Self::assign_nts_stage(&source_type, importance, novelty, emotional_salience);
            chunk.set_nts_stage(nts_stage);

            state.graph.add_chunk(&chunk_id, &extraction);
            state.chunks.push(chunk);

            evicted = Self::evict_if_over_capacity(&mut state.chunks, &mut state.graph, self.config.max_chunks);
        }

        self.persist_snapshot()?;

        let nts_stage = {
            let state = self.state.read().unwrap();
            state
                .chunks
                .iter()
                .find(|c| c.chunk_id == chunk_id)
                .and_then(Chunk::nts_stage)
                .unwrap_or(NtsStage::Sensory)
        };

        Ok(IngestResult { chunk_id, nts_stage, entity_count, evicted })
    }

    /// Convenience wrapper over [`RagStore::add_chunk`] for
    /// `source_type = "memory"` (§4.2).
    pub fn add_memory(&self, content: impl Into<String>, importance: f64) -> Result<IngestResult> {
        self.add_chunk(
            content,
            "memory",
            "memory",
            vec![(metadata_keys::IMPORTANCE.to_string(), MetadataValue::Float(importance))],
        )
    }

    /// Convenience wrapper over [`RagStore::add_chunk`] for
    /// `source_type = "knowledge"` (§4.2), always assigned `SEMANTIC`.
    pub fn add_knowledge(&self, content: impl Into<String>, category: impl Into<String>) -> Result<IngestResult> {
        self.add_chunk(
            content,
            "knowledge",
            "knowledge",
            vec![(metadata_keys::CATEGORY.to_string(), MetadataValue::Text(category.into()))],
        )
    }

    fn evict_if_over_capacity(chunks: &mut Vec<Chunk>, graph: &mut KnowledgeGraph, max_chunks: usize) -> usize {
        if chunks.len() <= max_chunks {
            return 0;
        }
        let overflow = chunks.len() - max_chunks;
        let mut order: Vec<usize> = (0..chunks.len()).collect();
        order.sort_by(|&a, &b| {
            chunks[a]
                .q_value
                .partial_cmp(&chunks[b].q_value)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        let mut evict_ids: Vec<String> = order.into_iter().take(overflow).map(|i| chunks[i].chunk_id.clone()).collect();
        evict_ids.sort();
        chunks.retain(|c| evict_ids.binary_search(&c.chunk_id).is_err());
        for id in &evict_ids {
            graph.remove_chunk_node(id);
        }
        evict_ids.len()
    }

    /// Remove one chunk by id, cascading removal from the knowledge
    /// graph. Returns whether a chunk was actually removed.
    ///
    /// # Errors
    /// Returns [`StoreError::StoreBackend`] if persistence fails.
    pub fn remove_chunk(&self, chunk_id: &str) -> Result<bool> {
        let removed;
        {
            let mut state = self.state.write().unwrap();
            let before = state.chunks.len();
            state.chunks.retain(|c| c.chunk_id != chunk_id);
            removed = state.chunks.len() != before;
            if removed {
                state.graph.remove_chunk_node(chunk_id);
            }
        }
        if removed {
            self.persist_snapshot()?;
        }
        Ok(removed)
    }

    /// Snapshot of every resident chunk, in insertion order.
    #[must_use]
    pub fn get_chunks(&self) -> Vec<Chunk> {
        self.state.read().unwrap().chunks.clone()
    }

    /// Number of resident chunks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.state.read().unwrap().chunks.len()
    }

    /// Whether the store currently holds no chunks.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.state.read().unwrap().chunks.is_empty()
    }

    /// Apply TD feedback to every chunk in `chunk_ids` (§4.1, §9 open
    /// question): an empty `chunk_ids` list is the documented no-op save
    /// trigger rather than `Chunk::update_q_value`'s rejected `lr = 0`
    /// convention — it simply flushes the current in-memory state.
    ///
    /// # Errors
    /// Returns [`StoreError::StoreBackend`] if persistence fails, or
    /// [`StoreError::InvalidInput`] if the optimiser's current learning
    /// rate is non-positive (it is clamped to `[0.01, 0.5]`, so this
    /// cannot occur in practice).
    pub fn provide_feedback(&self, chunk_ids: &[String], success: bool) -> Result<()> {
        if !chunk_ids.is_empty() {
            let learning_rate = {
                let state = self.state.read().unwrap();
                state.optimizer.current_params().learning_rate
            };
            let mut state = self.state.write().unwrap();
            for id in chunk_ids {
                if let Some(chunk) = state.chunks.iter_mut().find(|c| &c.chunk_id == id) {
                    chunk.update_q_value(success, learning_rate)?;
                }
            }
        }
        self.persist_snapshot()
    }

    /// Remove every chunk and reset the knowledge graph.
    ///
    /// # Errors
    /// Returns [`StoreError::StoreBackend`] if persistence fails.
    pub fn clear(&self) -> Result<()> {
        {
            let mut state = self.state.write().unwrap();
            state.chunks.clear();
            state.graph = KnowledgeGraph::new();
        }
        self.persist_snapshot()
    }

    /// Retrieve the `topK` best matches for `query` under `kind` (§4.4),
    /// wiring in the real embedder, knowledge graph, and accessibility
    /// scorer, and emitting one [`TelemetryEvent`] after truncation.
    #[must_use]
    #[tracing::instrument(skip(self, query), fields(ai_id = %self.ai_id, strategy = kind.as_str(), top_k))]
    pub fn retrieve(&self, kind: StrategyKind, query: &str, top_k: usize) -> RetrieveResult {
        let start = Instant::now();
        let now_ms = Utc::now().timestamp_millis();
        let query_embedding = {
            let v = self.embedder.embed(query);
            if v.is_empty() { None } else { Some(v) }
        };

        let state = self.state.read().unwrap();
        let ctx = RetrievalContext::with_accessibility_scorer(
            query_embedding,
            Some(&state.graph),
            now_ms,
            self.accessibility_scorer.as_ref(),
        );
        let (results, diagnostics) = retrieval::retrieve(&state.chunks, kind, query, top_k, &ctx);
        drop(state);

        let latency_ms = start.elapsed().as_millis() as u64;
        let top_score = results.first().map(|r| r.score).unwrap_or(0.0);
        let avg_score = if results.is_empty() {
            0.0
        } else {
            results.iter().map(|r| r.score).sum::<f64>() / results.len() as f64
        };
        self.telemetry.record(TelemetryEvent {
            timestamp_ms: now_ms,
            ai_id: self.ai_id.clone(),
            strategy: kind.as_str().to_string(),
            latency_ms,
            result_count: results.len(),
            top_k,
            top_score,
            avg_score,
        });

        RetrieveResult { results, diagnostics }
    }

    /// Run one consolidation cycle (§4.7) if the host-supplied
    /// `signals` clear [`crate::consolidation::should_consolidate`].
    /// Accumulates lifetime totals and persists both the mutated chunk
    /// set/graph and the updated totals.
    ///
    /// # Errors
    /// Returns [`StoreError::StoreBackend`] if persistence fails.
    #[tracing::instrument(skip(self, signals), fields(ai_id = %self.ai_id))]
    pub fn run_consolidation(&self, signals: ConsolidationSignals) -> Result<Option<ConsolidationReport>> {
        if !consolidation::should_consolidate(signals) {
            tracing::debug!("consolidation predicate false, skipping cycle");
            return Ok(None);
        }
        let now_ms = Utc::now().timestamp_millis();

        let (report, totals_bytes) = {
            let mut state = self.state.write().unwrap();
            let params = state.optimizer.current_params();
            let report = consolidation::run_cycle(&mut state.chunks, &mut state.graph, &params, now_ms);
            state.consolidation_totals.accumulate(&report);
            let totals_bytes = state.consolidation_totals.to_bytes()?;
            (report, totals_bytes)
        };

        self.persist_snapshot()?;
        self.blob
            .put(crate::consolidation::CONSOLIDATION_STATS_BLOB_KEY, totals_bytes)
            .map_err(StoreError::StoreBackend)?;

        tracing::info!(
            strengthened = report.strengthened,
            weakened = report.weakened,
            forgotten = report.forgotten,
            duration_ms = report.duration_ms,
            "consolidation cycle complete"
        );
        Ok(Some(report))
    }

    /// Run one auto-compaction pass (§4.8) if the token-budget trigger
    /// fires. Non-reentrant: concurrent calls return
    /// [`crate::error::CompactionError::ConcurrentInProgress`].
    ///
    /// # Errors
    /// Returns [`StoreError::Serialization`]-wrapping errors converted
    /// from [`crate::error::CompactionError`], or that error's
    /// reentrancy variant directly via `From`.
    #[tracing::instrument(skip(self), fields(ai_id = %self.ai_id))]
    pub fn compact_if_needed(&self) -> std::result::Result<CompactionReport, crate::error::CompactionError> {
        let now_ms = Utc::now().timestamp_millis();
        let report = {
            let mut state = self.state.write().unwrap();
            compaction::compact_if_needed(
                &mut state.chunks,
                &self.compaction_guard,
                self.config.max_context_tokens,
                self.config.compaction_threshold,
                self.config.preserve_recent,
                now_ms,
            )?
        };
        if report.ran {
            self.persist_snapshot()?;
            tracing::info!(
                chunks_compacted = report.chunks_compacted,
                summaries_created = report.summaries_created,
                chunks_dropped = report.chunks_dropped,
                "auto-compaction pass complete"
            );
        }
        Ok(report)
    }

    /// Run auto-compaction, then an `MEMRL` retrieval, and concatenate
    /// the result with `query` into one prompt (§4.8).
    ///
    /// # Errors
    /// Returns [`crate::error::CompactionError::ConcurrentInProgress`] if
    /// another compaction is already running.
    pub fn build_compacted_prompt(&self, query: &str) -> std::result::Result<String, crate::error::CompactionError> {
        let now_ms = Utc::now().timestamp_millis();
        let query_embedding = {
            let v = self.embedder.embed(query);
            if v.is_empty() { None } else { Some(v) }
        };
        let prompt = {
            let mut state = self.state.write().unwrap();
            compaction::build_compacted_prompt(
                &mut state.chunks,
                &self.compaction_guard,
                self.config.max_context_tokens,
                self.config.compaction_threshold,
                self.config.preserve_recent,
                now_ms,
                query,
                query_embedding,
            )?
        };
        self.persist_snapshot()?;
        Ok(prompt)
    }

    /// Run one sleep-cycle optimiser step (§4.9) using the telemetry
    /// sink's most recent window and the store's current health
    /// snapshot, then persist the optimiser's state.
    ///
    /// # Errors
    /// Returns [`StoreError::StoreBackend`] if persistence fails.
    #[tracing::instrument(skip(self), fields(ai_id = %self.ai_id))]
    pub fn run_optimizer_step(&self) -> Result<OptimizationResult> {
        let events = self.telemetry.read_recent(self.config.telemetry_window);
        let health = {
            let state = self.state.read().unwrap();
            if state.chunks.is_empty() {
                StoreHealthSnapshot::default()
            } else {
                let avg_q_value = state.chunks.iter().map(|c| c.q_value).sum::<f64>() / state.chunks.len() as f64;
                let success_rate =
                    state.chunks.iter().map(Chunk::success_rate).sum::<f64>() / state.chunks.len() as f64;
                StoreHealthSnapshot { avg_q_value, success_rate }
            }
        };

        let (result, state_bytes) = {
            let mut state = self.state.write().unwrap();
            let result = state.optimizer.step(&events, health);
            let state_bytes = state.optimizer.to_bytes()?;
            (result, state_bytes)
        };

        self.blob
            .put(crate::optimizer::OPTIMIZER_STATE_BLOB_KEY, state_bytes)
            .map_err(StoreError::StoreBackend)?;
        tracing::info!(applied = result.applied, fitness = ?result.fitness, reason = ?result.reason, "optimiser step complete");
        Ok(result)
    }

    /// Current optimiser-recommended parameters.
    #[must_use]
    pub fn current_params(&self) -> TunableParams {
        self.state.read().unwrap().optimizer.current_params()
    }

    /// Cumulative consolidation totals across this process's lifetime.
    #[must_use]
    pub fn consolidation_totals(&self) -> ConsolidationTotals {
        self.state.read().unwrap().consolidation_totals
    }

    /// Export the full mind-state (chunks, knowledge graph, and an
    /// identity/meta header) as an MNX container (§4.12, §6).
    ///
    /// # Errors
    /// Returns [`StoreError::Mnx`] if encoding fails.
    pub fn export_mnx(&self, identity_name: impl Into<String>) -> Result<Vec<u8>> {
        let state = self.state.read().unwrap();
        let mut file = MnxFile::new();
        file.identity = Some(IdentitySection { name: identity_name.into(), created_at: mnx::now_ms() });
        file.memory_store = Some(state.chunks.clone());
        file.knowledge_graph = Some(state.graph.clone());
        let mut meta_fields = std::collections::HashMap::new();
        meta_fields.insert("exportedBy".to_string(), self.ai_id.clone());
        meta_fields.insert("chunkCount".to_string(), state.chunks.len().to_string());
        file.meta = Some(GenericSection { fields: meta_fields });
        drop(state);
        mnx::encode(&file)
    }

    /// Import a previously exported MNX container, replacing the
    /// resident chunks and knowledge graph (§9: loaders replace rather
    /// than append), then persist.
    ///
    /// # Errors
    /// Returns [`StoreError::Mnx`] if decoding fails, or
    /// [`StoreError::StoreBackend`] if persistence fails.
    pub fn import_mnx(&self, bytes: &[u8]) -> Result<()> {
        let file = mnx::decode(bytes)?;
        {
            let mut state = self.state.write().unwrap();
            if let Some(chunks) = file.memory_store {
                state.chunks = chunks;
            }
            if let Some(graph) = file.knowledge_graph {
                state.graph = graph;
            }
        }
        self.persist_snapshot()
    }

    /// Read or write a single opaque value under the `rag_store_meta_<aiId>_<k>`
    /// namespace (§6), for host-level bookkeeping this crate does not
    /// otherwise model (e.g. a last-consolidation-run timestamp).
    ///
    /// # Errors
    /// Returns [`StoreError::StoreBackend`] on a blob I/O failure.
    pub fn get_meta(&self, k: &str) -> Result<Option<Vec<u8>>> {
        self.blob.get(&meta_blob_key(&self.ai_id, k)).map_err(StoreError::StoreBackend)
    }

    /// Write a value under the `rag_store_meta_<aiId>_<k>` namespace (§6).
    ///
    /// # Errors
    /// Returns [`StoreError::StoreBackend`] on a blob I/O failure.
    pub fn put_meta(&self, k: &str, bytes: Vec<u8>) -> Result<()> {
        self.blob.put(&meta_blob_key(&self.ai_id, k), bytes).map_err(StoreError::StoreBackend)
    }
}

fn hex_prefix(bytes: &[u8], n: usize) -> String {
    bytes.iter().take(n).map(|b| format!("{b:02x}")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blob_store::InMemoryBlobStore;
    use crate::embedding::HashEmbedder;
    use crate::telemetry::InMemoryTelemetrySink;

    fn test_store() -> RagStore {
        RagStore::new(
            "agent-1",
            EngineConfig::default(),
            Arc::new(InMemoryBlobStore::new()),
            Arc::new(HashEmbedder::new()),
            Arc::new(InMemoryTelemetrySink::new(500)),
        )
    }

    #[test]
    fn add_chunk_assigns_id_embedding_and_stage() {
        let store = test_store();
        let result = store.add_memory("Rust is a systems programming language built by Mozilla.", 0.6).unwrap();
        assert!(!result.chunk_id.is_empty());
        assert_eq!(store.len(), 1);
        let chunk = &store.get_chunks()[0];
        assert!(chunk.embedding.is_some());
        assert!(chunk.nts_stage().is_some());
    }

    #[test]
    fn knowledge_chunks_are_always_semantic() {
        let store = test_store();
        let result = store.add_knowledge("Paris is the capital of France.", "geography").unwrap();
        assert_eq!(result.nts_stage, NtsStage::Semantic);
    }

    #[test]
    fn remove_chunk_cascades_from_graph() {
        let store = test_store();
        let result = store.add_memory("Mozilla builds Firefox and Rust.", 0.5).unwrap();
        assert!(store.remove_chunk(&result.chunk_id).unwrap());
        assert_eq!(store.len(), 0);
    }

    #[test]
    fn eviction_keeps_store_at_max_chunks() {
        let mut config = EngineConfig::default();
        config.max_chunks = 3;
        let store = RagStore::new(
            "agent-1",
            config,
            Arc::new(InMemoryBlobStore::new()),
            Arc::new(HashEmbedder::new()),
            Arc::new(InMemoryTelemetrySink::new(500)),
        );
        for i in 0..5 {
            store.add_memory(format!("memory number {i} about rust programming"), 0.1).unwrap();
        }
        assert_eq!(store.len(), 3);
    }

    #[test]
    fn retrieve_emits_telemetry() {
        let store = test_store();
        store.add_memory("Rust has a strong type system.", 0.5).unwrap();
        let result = store.retrieve(StrategyKind::Semantic, "rust type system", 5);
        assert!(!result.results.is_empty());
    }

    #[test]
    fn provide_feedback_with_empty_ids_still_persists() {
        let store = test_store();
        store.add_memory("a durable memory", 0.5).unwrap();
        assert!(store.provide_feedback(&[], true).is_ok());
    }

    #[test]
    fn mnx_export_then_import_roundtrips_chunk_count() {
        let store = test_store();
        store.add_memory("Rust is used by Mozilla for systems programming.", 0.7).unwrap();
        let bytes = store.export_mnx("TestAI").unwrap();

        let other = test_store();
        other.import_mnx(&bytes).unwrap();
        assert_eq!(other.len(), store.len());
    }

    #[test]
    fn clear_removes_all_chunks_and_resets_graph() {
        let store = test_store();
        store.add_memory("Rust is used by Mozilla.", 0.5).unwrap();
        store.clear().unwrap();
        assert_eq!(store.len(), 0);
    }
}
