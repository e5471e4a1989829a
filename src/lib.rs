//! # rag-memory-core
//!
//! A self-evolving retrieval-augmented-memory engine: a persistent,
//! content-addressed chunk store with reinforcement-learned utility
//! scores, nine retrieval strategies, a heterogeneous knowledge graph
//! over the same chunks, a sleep-cycle consolidation scheduler, a
//! token-budget auto-compaction layer, a hyperparameter self-optimiser
//! driven by retrieval telemetry, and a portable binary codec (MNX)
//! for exporting and restoring the whole mind-state.
//!
//! The engine is headless: it is constructed with an `aiId` and three
//! caller-supplied collaborators — a [`BlobStore`](blob_store::BlobStore)
//! for encrypted persistence, an [`Embedder`](embedding::Embedder) for
//! turning text into vectors, and a [`TelemetrySink`](telemetry::TelemetrySink)
//! for retrieval analytics — and exposes everything else through
//! [`RagStore`](store::RagStore).
//!
//! ## Quick start
//!
//! ```
//! use std::sync::Arc;
//! use rag_memory_core::{RagStore, EngineConfig};
//! use rag_memory_core::blob_store::InMemoryBlobStore;
//! use rag_memory_core::embedding::HashEmbedder;
//! use rag_memory_core::telemetry::InMemoryTelemetrySink;
//! use rag_memory_core::retrieval::StrategyKind;
//!
//! let store = RagStore::new(
//!     "agent-1",
//!     EngineConfig::default(),
//!     Arc::new(InMemoryBlobStore::new()),
//!     Arc::new(HashEmbedder::new()),
//!     Arc::new(InMemoryTelemetrySink::new(500)),
//! );
//!
//! store.add_memory("Paris is the capital of France", 0.8).unwrap();
//! let result = store.retrieve(StrategyKind::Keyword, "capital of France", 5);
//! assert!(!result.results.is_empty());
//! ```

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod blob_store;
pub mod chunk;
pub mod compaction;
pub mod config;
pub mod consolidation;
pub mod embedding;
pub mod error;
pub mod extraction;
pub mod graph;
pub mod mnx;
pub mod optimizer;
pub mod retrieval;
pub mod session;
pub mod store;
pub mod telemetry;

// ============================================================================
// PUBLIC API RE-EXPORTS
// ============================================================================

pub use blob_store::BlobStore;
pub use chunk::{Chunk, MetadataValue, NtsStage};
pub use compaction::CompactionReport;
pub use config::{EngineConfig, StrategyWeights};
pub use consolidation::{ConsolidationReport, ConsolidationSignals, ConsolidationTotals};
pub use embedding::{Embedder, HashEmbedder};
pub use error::{CompactionError, GraphError, MnxError, Result, StoreError};
pub use graph::KnowledgeGraph;
pub use mnx::{MnxFile, SectionType};
pub use optimizer::{OptimizationResult, SleepCycleOptimizer, TunableParams};
pub use retrieval::{AccessibilityScorer, RetrievalDiagnostics, ScoredChunk, StrategyKind};
pub use session::{Channel, Scope, SessionKey, SessionManager};
pub use store::{IngestResult, RagStore, RetrieveResult};
pub use telemetry::{TelemetryEvent, TelemetrySink};

// ============================================================================
// VERSION INFO
// ============================================================================

/// Crate version, as set in `Cargo.toml`.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Embedding dimensionality the engine is configured for by default (§6).
pub const DEFAULT_EMBEDDING_DIM: usize = embedding::EMBEDDING_DIM;

// ============================================================================
// PRELUDE
// ============================================================================

/// Convenient imports for common usage.
pub mod prelude {
    pub use crate::{
        BlobStore, Chunk, EngineConfig, Embedder, IngestResult, KnowledgeGraph, MetadataValue,
        NtsStage, RagStore, Result, RetrieveResult, ScoredChunk, SessionKey, SessionManager,
        StoreError, StrategyKind, TelemetryEvent, TelemetrySink,
    };
}
