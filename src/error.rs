//! Crate-wide error taxonomy.
//!
//! Each subsystem gets its own `thiserror` enum so callers can match on the
//! failure mode that actually matters to them (a corrupt blob is handled
//! differently from a reentrant compaction call). [`StoreError`] is the
//! top-level error most public `RagStore` operations return; the others
//! convert into it via `#[from]`.

/// Result type alias used throughout the chunk store and its collaborators.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Top-level error for the memory engine.
#[non_exhaustive]
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// A `BlobStore` read or write failed. Internal state remains
    /// consistent: the operation that triggered this error is all-or-nothing.
    #[error("storage backend error: {0}")]
    StoreBackend(String),

    /// A persisted blob could not be parsed. The engine never silently
    /// drops chunks that did parse; see [`StoreError::CorruptStore`] call
    /// sites for whether a partial load or a refusal is in effect.
    #[error("corrupt store for key {key}: {reason}")]
    CorruptStore {
        /// Blob key that failed to parse.
        key: String,
        /// Human-readable parse failure.
        reason: String,
    },

    /// Caller input was rejected outright (as opposed to clamped or
    /// silently ignored, which are not errors).
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Graph-level error surfaced from the knowledge graph collaborator.
    #[error(transparent)]
    Graph(#[from] GraphError),

    /// MNX codec error surfaced while exporting or importing mind-state.
    #[error(transparent)]
    Mnx(#[from] MnxError),

    /// JSON (de)serialization failure, typically from metadata or telemetry.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StoreError {
    /// Referenced chunk id for errors that carry one, when applicable.
    #[must_use]
    pub fn chunk_id(&self) -> Option<&str> {
        match self {
            StoreError::CorruptStore { key, .. } => Some(key.as_str()),
            _ => None,
        }
    }
}

/// Errors raised by the knowledge graph (§4.5).
#[non_exhaustive]
#[derive(Debug, thiserror::Error)]
pub enum GraphError {
    /// The backing blob for the graph failed to parse.
    #[error("corrupt knowledge graph blob: {0}")]
    Corrupt(String),

    /// An entity referenced by a chunk node does not exist in the graph.
    /// Extraction is best-effort (§7), so this is logged and swallowed by
    /// callers rather than propagated as a hard failure in most code paths.
    #[error("unknown entity id: {0}")]
    UnknownEntity(String),
}

/// Errors raised by the MNX binary codec (§4.12/§6).
#[non_exhaustive]
#[derive(Debug, thiserror::Error)]
pub enum MnxError {
    /// Header magic did not match `"MNX!"`.
    #[error("magic mismatch: expected MNX! container")]
    MagicMismatch,

    /// The container's version is newer than this codec understands.
    #[error("container version {0}.{1}.{2} is newer than supported")]
    VersionTooNew(u8, u8, u8),

    /// The byte buffer ended before a declared field could be read.
    #[error("truncated input: expected at least {expected} more bytes, found {found}")]
    TruncatedInput {
        /// Bytes the decoder still needed.
        expected: usize,
        /// Bytes actually remaining.
        found: usize,
    },

    /// The trailing SHA-256 checksum did not match the computed one.
    #[error("checksum mismatch")]
    ChecksumMismatch,

    /// An unrecognised section type id was encountered while strict-mode
    /// decoding was requested.
    #[error("unknown section type id {0} in strict mode")]
    UnknownSectionTypeInStrictMode(i16),

    /// A section's payload could not be decoded as its declared schema.
    #[error("corrupt payload for section {section}: {reason}")]
    SectionPayloadCorrupt {
        /// Section type id (or raw id) whose payload failed to decode.
        section: i16,
        /// Human-readable decode failure.
        reason: String,
    },

    /// Footer magic did not match `"!XNM"`.
    #[error("footer magic mismatch")]
    FooterMagicMismatch,
}

/// Errors raised by auto-compaction (§4.8), distinct from [`StoreError`]
/// because `compactIfNeeded` has its own reentrancy contract.
#[non_exhaustive]
#[derive(Debug, thiserror::Error)]
pub enum CompactionError {
    /// Another compaction run is already in progress (§5, §7).
    #[error("auto-compaction already in progress")]
    ConcurrentInProgress,

    /// The underlying store operation failed.
    #[error(transparent)]
    Store(#[from] StoreError),
}
