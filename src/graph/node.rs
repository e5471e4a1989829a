//! Graph node and edge types (§4.5).

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::extraction::EntityType;

/// A named entity surfaced by extraction and tracked across every chunk
/// that mentions it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityNode {
    /// Stable opaque identifier, distinct from the entity's display name.
    pub id: String,
    /// Canonical display name (first surface form seen).
    pub name: String,
    /// Classified entity type.
    pub entity_type: EntityType,
    /// Short description carried from the extraction candidate that
    /// introduced this entity.
    pub description: String,
    /// Number of chunks this entity has been mentioned in.
    pub mention_count: u32,
    /// Chunk ids that mention this entity.
    pub chunk_ids: Vec<String>,
    /// Epoch-millisecond time this entity was first observed.
    pub created_at: i64,
    /// Epoch-millisecond time this entity was last mentioned.
    pub updated_at: i64,
}

impl EntityNode {
    /// Construct a new entity node from its first observed mention.
    pub fn new(id: impl Into<String>, name: impl Into<String>, entity_type: EntityType, description: impl Into<String>) -> Self {
        let now = Utc::now().timestamp_millis();
        Self {
            id: id.into(),
            name: name.into(),
            entity_type,
            description: description.into(),
            mention_count: 0,
            chunk_ids: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Record a new mention of this entity in `chunk_id`, if not already
    /// recorded.
    pub fn record_mention(&mut self, chunk_id: &str) {
        self.mention_count += 1;
        self.updated_at = Utc::now().timestamp_millis();
        if !self.chunk_ids.iter().any(|c| c == chunk_id) {
            self.chunk_ids.push(chunk_id.to_string());
        }
    }
}

/// A node tracking which entities one chunk mentions. Kept as the inverse
/// index of [`EntityNode::chunk_ids`] so lookups are O(1) in either
/// direction.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ChunkNode {
    /// Chunk this node describes.
    pub chunk_id: String,
    /// Entity ids mentioned in this chunk.
    pub entity_ids: Vec<String>,
}

/// A directed, typed edge between two entities (§4.5).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Relationship {
    /// Stable opaque identifier.
    pub id: String,
    /// Source entity id.
    pub source_entity_id: String,
    /// Target entity id.
    pub target_entity_id: String,
    /// Relationship type tag (e.g. `uses`, `is_a`, `related_to`).
    pub relationship_type: String,
    /// Strength in `[0, 1]`, averaged across reinforcing observations.
    pub strength: f64,
    /// Number of times this exact (source, target, type) edge has been
    /// observed, used to weight the running average.
    pub evidence_count: u32,
}

impl Relationship {
    /// Fold in another observation of the same edge: running mean of
    /// strength, weighted by `evidence_count`.
    pub fn reinforce(&mut self, strength: f64) {
        let total = self.evidence_count as f64;
        self.strength = (self.strength * total + strength) / (total + 1.0);
        self.evidence_count += 1;
    }
}
