//! Heterogeneous knowledge graph over entities and chunks (§4.5, C6).
//!
//! The graph is a thin collaborator alongside the chunk index: entity and
//! relationship identity lives here, chunk content lives in
//! [`crate::store`]. The two are kept consistent by
//! [`KnowledgeGraph::remove_chunk_node`], which cascades entity/edge
//! cleanup whenever a chunk disappears from the store.

pub mod node;

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{GraphError, Result};
use crate::extraction::{EntityType, ExtractionResult};

pub use node::{ChunkNode, EntityNode, Relationship};

/// Blob key prefix for a persisted graph (§6): `knowledge_graph_<aiId>`.
pub const GRAPH_BLOB_PREFIX: &str = "knowledge_graph_";

/// Aggregate counts over the graph, mirroring the engine's habit of a
/// small `*Stats` struct per subsystem.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct GraphStats {
    /// Number of entity nodes.
    pub entity_count: usize,
    /// Number of chunk nodes (chunks with at least one extracted entity).
    pub chunk_node_count: usize,
    /// Number of relationship edges.
    pub relationship_count: usize,
}

/// One chunk surfaced by a graph-backed retrieval pass, with the entities
/// that justified the match.
#[derive(Debug, Clone)]
pub struct GraphChunkMatch {
    /// Matched chunk id.
    pub chunk_id: String,
    /// Match score in `[0, 1]`.
    pub score: f64,
    /// Entity names that contributed to this match.
    pub matched_entities: Vec<String>,
}

/// On-disk representation of a [`KnowledgeGraph`] (§6).
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct GraphBlob {
    entities: Vec<EntityNode>,
    chunk_nodes: Vec<ChunkNode>,
    relationships: Vec<Relationship>,
}

/// Heterogeneous knowledge graph: entity nodes, per-chunk entity indices,
/// and typed relationship edges between entities.
#[derive(Debug, Clone, Default)]
pub struct KnowledgeGraph {
    entities: HashMap<String, EntityNode>,
    chunk_nodes: HashMap<String, ChunkNode>,
    relationships: HashMap<String, Relationship>,
    name_index: HashMap<String, String>,
}

impl KnowledgeGraph {
    /// Construct an empty graph.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Current aggregate counts.
    #[must_use]
    pub fn stats(&self) -> GraphStats {
        GraphStats {
            entity_count: self.entities.len(),
            chunk_node_count: self.chunk_nodes.len(),
            relationship_count: self.relationships.len(),
        }
    }

    fn find_entity_id_by_name(&self, name: &str) -> Option<String> {
        self.name_index.get(&name.trim().to_lowercase()).cloned()
    }

    fn get_or_create_entity(&mut self, name: &str, entity_type: EntityType, description: &str) -> String {
        if let Some(id) = self.find_entity_id_by_name(name) {
            return id;
        }
        let id = Uuid::new_v4().to_string();
        self.name_index.insert(name.trim().to_lowercase(), id.clone());
        self.entities
            .insert(id.clone(), EntityNode::new(id.clone(), name, entity_type, description));
        id
    }

    /// Ingest one chunk's extraction result (§4.5): entities are
    /// deduplicated by lowercased-trimmed name, relationships are folded
    /// into any existing (source, target, type) edge via
    /// [`Relationship::reinforce`].
    pub fn add_chunk(&mut self, chunk_id: &str, extraction: &ExtractionResult) {
        if extraction.entities.is_empty() {
            return;
        }

        let mut entity_ids = Vec::with_capacity(extraction.entities.len());
        for candidate in &extraction.entities {
            let id = self.get_or_create_entity(&candidate.name, candidate.entity_type, &candidate.description);
            if let Some(node) = self.entities.get_mut(&id) {
                node.record_mention(chunk_id);
            }
            entity_ids.push(id);
        }

        self.chunk_nodes.insert(
            chunk_id.to_string(),
            ChunkNode {
                chunk_id: chunk_id.to_string(),
                entity_ids: entity_ids.clone(),
            },
        );

        for rel in &extraction.relationships {
            let Some(source_id) = self.find_entity_id_by_name(&rel.source_name) else {
                continue;
            };
            let Some(target_id) = self.find_entity_id_by_name(&rel.target_name) else {
                continue;
            };
            if source_id == target_id {
                continue;
            }
            let key = format!("{source_id}|{target_id}|{}", rel.relationship_type);
            self.relationships
                .entry(key)
                .and_modify(|existing| existing.reinforce(rel.strength))
                .or_insert_with(|| Relationship {
                    id: Uuid::new_v4().to_string(),
                    source_entity_id: source_id,
                    target_entity_id: target_id,
                    relationship_type: rel.relationship_type.clone(),
                    strength: rel.strength,
                    evidence_count: 1,
                });
        }
    }

    /// Remove a chunk node and cascade: drop the chunk from every entity
    /// it mentioned, and drop any entity (and its edges) left with no
    /// remaining chunk mentions.
    pub fn remove_chunk_node(&mut self, chunk_id: &str) {
        let Some(node) = self.chunk_nodes.remove(chunk_id) else {
            return;
        };

        let mut orphaned = Vec::new();
        for entity_id in &node.entity_ids {
            if let Some(entity) = self.entities.get_mut(entity_id) {
                entity.chunk_ids.retain(|c| c != chunk_id);
                if entity.chunk_ids.is_empty() {
                    orphaned.push(entity_id.clone());
                }
            }
        }

        for entity_id in orphaned {
            if let Some(entity) = self.entities.remove(&entity_id) {
                self.name_index.remove(&entity.name.to_lowercase());
            }
            self.relationships
                .retain(|_, rel| rel.source_entity_id != entity_id && rel.target_entity_id != entity_id);
        }
    }

    fn neighbors(&self, entity_id: &str) -> Vec<(&Relationship, &str)> {
        self.relationships
            .values()
            .filter_map(|rel| {
                if rel.source_entity_id == entity_id {
                    Some((rel, rel.target_entity_id.as_str()))
                } else if rel.target_entity_id == entity_id {
                    Some((rel, rel.source_entity_id.as_str()))
                } else {
                    None
                }
            })
            .collect()
    }

    /// Topology-based retrieval (§4.5): match the query text against
    /// entity names (exact match scores `1.0`, substring match scores
    /// `0.7`), score directly-mentioned chunks at `matchScore * (1 + 0.1
    /// * degree)`, then extend through one more relationship hop at
    /// `matchScore * relationship.strength * 0.5`. Scores for a chunk
    /// reached through multiple paths take the maximum.
    #[must_use]
    pub fn query(&self, text: &str) -> Vec<GraphChunkMatch> {
        let lower_query = text.trim().to_lowercase();
        if lower_query.is_empty() {
            return Vec::new();
        }

        let mut matched: Vec<(&EntityNode, f64)> = Vec::new();
        for entity in self.entities.values() {
            let lower_name = entity.name.to_lowercase();
            let score = if lower_name == lower_query {
                1.0
            } else if lower_name.contains(&lower_query) || lower_query.contains(&lower_name) {
                0.7
            } else {
                continue;
            };
            matched.push((entity, score));
        }

        let mut chunk_scores: HashMap<String, (f64, Vec<String>)> = HashMap::new();
        for (entity, score) in &matched {
            let degree = self.neighbors(&entity.id).len();
            let direct_score = score * (1.0 + 0.1 * degree as f64);
            for chunk_id in &entity.chunk_ids {
                let entry = chunk_scores.entry(chunk_id.clone()).or_insert((0.0, Vec::new()));
                entry.0 = entry.0.max(direct_score);
                if !entry.1.contains(&entity.name) {
                    entry.1.push(entity.name.clone());
                }
            }

            for (rel, neighbor_id) in self.neighbors(&entity.id) {
                let Some(neighbor) = self.entities.get(neighbor_id) else {
                    continue;
                };
                let hop_score = score * rel.strength * 0.5;
                for chunk_id in &neighbor.chunk_ids {
                    let entry = chunk_scores.entry(chunk_id.clone()).or_insert((0.0, Vec::new()));
                    entry.0 = entry.0.max(hop_score);
                    if !entry.1.contains(&neighbor.name) {
                        entry.1.push(neighbor.name.clone());
                    }
                }
            }
        }

        let mut results: Vec<GraphChunkMatch> = chunk_scores
            .into_iter()
            .map(|(chunk_id, (score, matched_entities))| GraphChunkMatch {
                chunk_id,
                score,
                matched_entities,
            })
            .collect();
        results.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        results
    }

    /// Edge-voting retrieval (§4.5): given a set of seed chunk ids,
    /// distribute one vote per seed to every other chunk that shares an
    /// entity with it, normalise by the maximum vote count, and keep
    /// results scoring `>= 0.3`.
    #[must_use]
    pub fn vote_from_seeds(&self, seed_chunk_ids: &[String]) -> Vec<GraphChunkMatch> {
        let mut votes: HashMap<String, f64> = HashMap::new();
        for seed in seed_chunk_ids {
            let Some(seed_node) = self.chunk_nodes.get(seed) else {
                continue;
            };
            for entity_id in &seed_node.entity_ids {
                let Some(entity) = self.entities.get(entity_id) else {
                    continue;
                };
                for chunk_id in &entity.chunk_ids {
                    if seed_chunk_ids.iter().any(|s| s == chunk_id) {
                        continue;
                    }
                    *votes.entry(chunk_id.clone()).or_insert(0.0) += 1.0;
                }
            }
        }

        let max_vote = votes.values().cloned().fold(0.0_f64, f64::max);
        if max_vote <= 0.0 {
            return Vec::new();
        }

        let mut results: Vec<GraphChunkMatch> = votes
            .into_iter()
            .map(|(chunk_id, vote)| GraphChunkMatch {
                chunk_id,
                score: vote / max_vote,
                matched_entities: Vec::new(),
            })
            .filter(|m| m.score >= 0.3)
            .collect();
        results.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        results
    }

    /// Snapshot of every entity node, for callers (e.g. the MNX codec)
    /// that need to serialise the graph in a format other than
    /// [`KnowledgeGraph::to_bytes`].
    #[must_use]
    pub fn entities_snapshot(&self) -> Vec<EntityNode> {
        self.entities.values().cloned().collect()
    }

    /// Snapshot of every chunk node.
    #[must_use]
    pub fn chunk_nodes_snapshot(&self) -> Vec<ChunkNode> {
        self.chunk_nodes.values().cloned().collect()
    }

    /// Snapshot of every relationship edge.
    #[must_use]
    pub fn relationships_snapshot(&self) -> Vec<Relationship> {
        self.relationships.values().cloned().collect()
    }

    /// Rebuild a graph from already-decoded parts (e.g. the MNX codec's
    /// `KnowledgeGraph` section), applying the same orphan-relationship
    /// dropping and duplicate-merging rules as [`KnowledgeGraph::from_bytes`].
    #[must_use]
    pub fn from_parts(entities: Vec<EntityNode>, chunk_nodes: Vec<ChunkNode>, relationships: Vec<Relationship>) -> Self {
        let mut graph = KnowledgeGraph::new();
        for entity in entities {
            graph.name_index.insert(entity.name.to_lowercase(), entity.id.clone());
            graph.entities.insert(entity.id.clone(), entity);
        }
        for node in chunk_nodes {
            graph.chunk_nodes.insert(node.chunk_id.clone(), node);
        }
        for rel in relationships {
            if !graph.entities.contains_key(&rel.source_entity_id) || !graph.entities.contains_key(&rel.target_entity_id) {
                continue;
            }
            let key = format!("{}|{}|{}", rel.source_entity_id, rel.target_entity_id, rel.relationship_type);
            graph
                .relationships
                .entry(key)
                .and_modify(|existing| {
                    if rel.evidence_count > existing.evidence_count {
                        *existing = rel.clone();
                    }
                })
                .or_insert(rel);
        }
        graph
    }

    /// Serialise the graph to bytes for persistence under
    /// [`GRAPH_BLOB_PREFIX`]`<aiId>`.
    ///
    /// # Errors
    /// Returns [`crate::error::StoreError::Serialization`] if encoding fails.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let blob = GraphBlob {
            entities: self.entities.values().cloned().collect(),
            chunk_nodes: self.chunk_nodes.values().cloned().collect(),
            relationships: self.relationships.values().cloned().collect(),
        };
        Ok(serde_json::to_vec(&blob)?)
    }

    /// Rebuild a graph from persisted bytes, replacing any in-memory
    /// state (§9: loaders replace rather than append). Relationships that
    /// reference an unknown entity id are dropped with a warning rather
    /// than failing the whole load (§7). Duplicate (source, target,
    /// type) relationships are merged, keeping the one with more
    /// evidence.
    ///
    /// # Errors
    /// Returns [`GraphError::Corrupt`] if `bytes` does not parse.
    pub fn from_bytes(bytes: &[u8]) -> std::result::Result<Self, GraphError> {
        let blob: GraphBlob =
            serde_json::from_slice(bytes).map_err(|e| GraphError::Corrupt(e.to_string()))?;

        let mut graph = KnowledgeGraph::new();
        for entity in blob.entities {
            graph.name_index.insert(entity.name.to_lowercase(), entity.id.clone());
            graph.entities.insert(entity.id.clone(), entity);
        }
        for node in blob.chunk_nodes {
            graph.chunk_nodes.insert(node.chunk_id.clone(), node);
        }
        for rel in blob.relationships {
            if !graph.entities.contains_key(&rel.source_entity_id) {
                tracing::warn!(entity = %rel.source_entity_id, "dropping relationship with unknown source entity");
                continue;
            }
            if !graph.entities.contains_key(&rel.target_entity_id) {
                tracing::warn!(entity = %rel.target_entity_id, "dropping relationship with unknown target entity");
                continue;
            }
            let key = format!("{}|{}|{}", rel.source_entity_id, rel.target_entity_id, rel.relationship_type);
            graph
                .relationships
                .entry(key)
                .and_modify(|existing| {
                    if rel.evidence_count > existing.evidence_count {
                        *existing = rel.clone();
                    }
                })
                .or_insert(rel);
        }
        Ok(graph)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extraction;

    #[test]
    fn add_chunk_creates_entities_and_dedupes_by_name() {
        let mut graph = KnowledgeGraph::new();
        let extraction = extraction::extract("Rust is used by Mozilla for systems programming.");
        graph.add_chunk("c1", &extraction);
        let stats = graph.stats();
        assert!(stats.entity_count >= 2);
        assert_eq!(stats.chunk_node_count, 1);

        // Re-ingesting the same entity in a different chunk should not
        // create a duplicate entity node.
        let extraction2 = extraction::extract("Rust has a strong type system.");
        graph.add_chunk("c2", &extraction2);
        let rust_entities: Vec<_> = graph
            .entities
            .values()
            .filter(|e| e.name.eq_ignore_ascii_case("rust"))
            .collect();
        assert_eq!(rust_entities.len(), 1);
        assert_eq!(rust_entities[0].mention_count, 2);
    }

    #[test]
    fn remove_chunk_node_cascades_orphaned_entities() {
        let mut graph = KnowledgeGraph::new();
        let extraction = extraction::extract("Rust is used by Mozilla.");
        graph.add_chunk("c1", &extraction);
        assert!(graph.stats().entity_count > 0);

        graph.remove_chunk_node("c1");
        assert_eq!(graph.stats().entity_count, 0);
        assert_eq!(graph.stats().chunk_node_count, 0);
        assert_eq!(graph.stats().relationship_count, 0);
    }

    #[test]
    fn query_exact_match_scores_higher_than_substring() {
        let mut graph = KnowledgeGraph::new();
        graph.add_chunk("c1", &extraction::extract("Rust is a systems language."));
        graph.add_chunk("c2", &extraction::extract("RustConf happens every year."));

        let results = graph.query("Rust");
        assert!(!results.is_empty());
        let top = &results[0];
        assert!(top.score >= 0.7);
    }

    #[test]
    fn vote_from_seeds_normalizes_and_filters_below_threshold() {
        let mut graph = KnowledgeGraph::new();
        graph.add_chunk("c1", &extraction::extract("Rust is used by Mozilla."));
        graph.add_chunk("c2", &extraction::extract("Rust has great tooling."));
        graph.add_chunk("c3", &extraction::extract("Mozilla builds Firefox."));

        let results = graph.vote_from_seeds(&["c1".to_string()]);
        for m in &results {
            assert!(m.score >= 0.3);
        }
    }

    #[test]
    fn persistence_roundtrips_and_merges_duplicate_relationships() {
        let mut graph = KnowledgeGraph::new();
        graph.add_chunk("c1", &extraction::extract("Rust is used by Mozilla."));
        let bytes = graph.to_bytes().unwrap();
        let restored = KnowledgeGraph::from_bytes(&bytes).unwrap();
        assert_eq!(restored.stats(), graph.stats());
    }

    #[test]
    fn empty_query_returns_no_matches() {
        let graph = KnowledgeGraph::new();
        assert!(graph.query("").is_empty());
    }
}
