//! MNX binary mind-state container (§4.12, §6, C13).
//!
//! Bit-exact wire format: a 64-byte header, a section table (20 bytes per
//! entry), the concatenated section payloads, and a 36-byte footer
//! carrying a SHA-256 checksum over everything that precedes it. Section
//! payloads for `MemoryStore` and `KnowledgeGraph` mirror this crate's
//! own [`crate::chunk::Chunk`] and [`crate::graph::KnowledgeGraph`];
//! every other named section is caller-supplied side-car state the
//! engine does not interpret, so it is modelled as a flat string/string
//! map. Section type ids the codec does not recognise at all pass
//! through untouched via `raw_sections`.

pub mod primitives;

use std::collections::HashMap;

use chrono::Utc;
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::chunk::{Chunk, MetadataValue};
use crate::error::{MnxError, StoreError};
use crate::extraction::EntityType;
use crate::graph::{ChunkNode, EntityNode, KnowledgeGraph, Relationship};
use primitives::{ByteReader, ByteWriter};

const HEADER_MAGIC: u32 = 0x4D4E_5821;
const FOOTER_MAGIC: u32 = 0x2158_4E4D;
const HEADER_LEN: usize = 64;
const SECTION_TABLE_ENTRY_LEN: usize = 20;
const FOOTER_LEN: usize = 36;

/// `flags` bit for a compressed container (§6). Unused by this codec's
/// encoder but preserved on decode.
pub const FLAG_COMPRESSED: u8 = 0x01;
/// `flags` bit for an encrypted container (§6).
pub const FLAG_ENCRYPTED: u8 = 0x02;
/// `flags` bit for a signed container (§6).
pub const FLAG_SIGNED: u8 = 0x04;

/// Known MNX section type ids (§6). Anything outside `1..=13` is treated
/// as a raw, uninterpreted section.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SectionType {
    /// Agent identity (name, creation time).
    Identity,
    /// Mirrors [`crate::chunk::Chunk`] (C1).
    MemoryStore,
    /// Mirrors [`crate::graph::KnowledgeGraph`] (C6).
    KnowledgeGraph,
    /// Caller-defined affect/mood state.
    AffectState,
    /// Caller-defined personality profile.
    Personality,
    /// Caller-defined belief store.
    BeliefStore,
    /// Caller-defined autobiographical timeline.
    Timeline,
    /// Caller-defined opinion map.
    OpinionMap,
    /// Caller-defined embedding index side-car.
    EmbeddingIndex,
    /// Caller-defined relationship web (distinct from the chunk
    /// knowledge graph).
    RelationshipWeb,
    /// Caller-defined preference store.
    PreferenceStore,
    /// Caller-defined value-alignment profile.
    ValueAlignment,
    /// Free-form export metadata.
    Meta,
}

impl SectionType {
    /// Wire id for this section type (§6: `0x0001`–`0x0013`).
    #[must_use]
    pub fn id(self) -> i16 {
        match self {
            SectionType::Identity => 0x0001,
            SectionType::MemoryStore => 0x0002,
            SectionType::KnowledgeGraph => 0x0003,
            SectionType::AffectState => 0x0004,
            SectionType::Personality => 0x0005,
            SectionType::BeliefStore => 0x0006,
            SectionType::Timeline => 0x0007,
            SectionType::OpinionMap => 0x0008,
            SectionType::EmbeddingIndex => 0x0009,
            SectionType::RelationshipWeb => 0x000A,
            SectionType::PreferenceStore => 0x000B,
            SectionType::ValueAlignment => 0x000C,
            SectionType::Meta => 0x000D,
        }
    }

    /// Resolve a wire id back to a known [`SectionType`], `None` if it is
    /// outside the known range (preserved via `raw_sections` instead).
    #[must_use]
    pub fn from_id(id: i16) -> Option<Self> {
        match id {
            0x0001 => Some(SectionType::Identity),
            0x0002 => Some(SectionType::MemoryStore),
            0x0003 => Some(SectionType::KnowledgeGraph),
            0x0004 => Some(SectionType::AffectState),
            0x0005 => Some(SectionType::Personality),
            0x0006 => Some(SectionType::BeliefStore),
            0x0007 => Some(SectionType::Timeline),
            0x0008 => Some(SectionType::OpinionMap),
            0x0009 => Some(SectionType::EmbeddingIndex),
            0x000A => Some(SectionType::RelationshipWeb),
            0x000B => Some(SectionType::PreferenceStore),
            0x000C => Some(SectionType::ValueAlignment),
            0x000D => Some(SectionType::Meta),
            _ => None,
        }
    }
}

/// Agent identity section (§4.12).
#[derive(Debug, Clone, PartialEq)]
pub struct IdentitySection {
    /// Display name.
    pub name: String,
    /// Epoch-millisecond creation time.
    pub created_at: i64,
}

/// A flat string/string side-car section, used for every caller-defined
/// section whose schema is opaque to this engine (`AffectState`,
/// `Personality`, `BeliefStore`, `Timeline`, `OpinionMap`,
/// `EmbeddingIndex`, `RelationshipWeb`, `PreferenceStore`,
/// `ValueAlignment`) as well as `Meta`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GenericSection {
    /// Opaque key/value fields, round-tripped verbatim.
    pub fields: HashMap<String, String>,
}

fn entity_type_to_str(t: EntityType) -> &'static str {
    match t {
        EntityType::Person => "PERSON",
        EntityType::Organization => "ORGANIZATION",
        EntityType::Place => "PLACE",
        EntityType::Technology => "TECHNOLOGY",
        EntityType::CodeIdentifier => "CODE_IDENTIFIER",
        EntityType::Concept => "CONCEPT",
        EntityType::Entity => "ENTITY",
    }
}

fn entity_type_from_str(s: &str) -> EntityType {
    match s {
        "PERSON" => EntityType::Person,
        "ORGANIZATION" => EntityType::Organization,
        "PLACE" => EntityType::Place,
        "TECHNOLOGY" => EntityType::Technology,
        "CODE_IDENTIFIER" => EntityType::CodeIdentifier,
        "CONCEPT" => EntityType::Concept,
        _ => EntityType::Entity,
    }
}

fn metadata_value_tag(v: &MetadataValue) -> i8 {
    match v {
        MetadataValue::Text(_) => 0,
        MetadataValue::Int(_) => 1,
        MetadataValue::Float(_) => 2,
        MetadataValue::Bool(_) => 3,
    }
}

fn write_chunk(w: &mut ByteWriter, chunk: &Chunk) {
    w.write_string(&chunk.chunk_id);
    w.write_string(&chunk.content);
    w.write_string(&chunk.source);
    w.write_string(&chunk.source_type);
    w.write_i64(chunk.timestamp);
    w.write_i32(chunk.token_count as i32);
    w.write_i32(chunk.metadata.len() as i32);
    for (key, value) in &chunk.metadata {
        w.write_string(key);
        w.write_i8(metadata_value_tag(value));
        match value {
            MetadataValue::Text(s) => w.write_string(s),
            MetadataValue::Int(n) => w.write_i64(*n),
            MetadataValue::Float(f) => w.write_f64(*f),
            MetadataValue::Bool(b) => w.write_bool(*b),
        }
    }
    match &chunk.embedding {
        Some(embedding) => {
            w.write_bool(true);
            w.write_list(embedding, |w, v| w.write_f32(*v));
        }
        None => w.write_bool(false),
    }
    w.write_f64(chunk.q_value);
    w.write_i64(chunk.retrieval_count as i64);
    w.write_i64(chunk.success_count as i64);
}

fn read_chunk(r: &mut ByteReader<'_>) -> Result<Chunk, MnxError> {
    let chunk_id = r.read_string()?;
    let content = r.read_string()?;
    let source = r.read_string()?;
    let source_type = r.read_string()?;
    let timestamp = r.read_i64()?;
    let token_count = r.read_i32()?;
    let metadata_entries = r.read_list(|r| {
        let key = r.read_string()?;
        let tag = r.read_i8()?;
        let value = match tag {
            0 => MetadataValue::Text(r.read_string()?),
            1 => MetadataValue::Int(r.read_i64()?),
            2 => MetadataValue::Float(r.read_f64()?),
            3 => MetadataValue::Bool(r.read_bool()?),
            other => {
                return Err(MnxError::SectionPayloadCorrupt {
                    section: SectionType::MemoryStore.id(),
                    reason: format!("unknown metadata value tag {other}"),
                })
            }
        };
        Ok((key, value))
    })?;
    let has_embedding = r.read_bool()?;
    let embedding = if has_embedding {
        Some(r.read_list(|r| r.read_f32())?)
    } else {
        None
    };
    let q_value = r.read_f64()?;
    let retrieval_count = r.read_i64()?.max(0) as u64;
    let success_count = r.read_i64()?.max(0) as u64;

    let mut chunk = Chunk::new(chunk_id, content, source, source_type);
    chunk.timestamp = timestamp;
    chunk.token_count = token_count.max(0) as u32;
    chunk.metadata = metadata_entries.into_iter().collect();
    chunk.embedding = embedding;
    chunk.q_value = q_value;
    chunk.retrieval_count = retrieval_count;
    chunk.success_count = success_count;
    Ok(chunk)
}

fn write_entity(w: &mut ByteWriter, entity: &EntityNode) {
    w.write_string(&entity.id);
    w.write_string(&entity.name);
    w.write_string(entity_type_to_str(entity.entity_type));
    w.write_string(&entity.description);
    w.write_i32(entity.mention_count as i32);
    w.write_list(&entity.chunk_ids, |w, id| w.write_string(id));
    w.write_i64(entity.created_at);
    w.write_i64(entity.updated_at);
}

fn read_entity(r: &mut ByteReader<'_>) -> Result<EntityNode, MnxError> {
    let id = r.read_string()?;
    let name = r.read_string()?;
    let entity_type = entity_type_from_str(&r.read_string()?);
    let description = r.read_string()?;
    let mention_count = r.read_i32()?.max(0) as u32;
    let chunk_ids = r.read_list(|r| r.read_string())?;
    let created_at = r.read_i64()?;
    let updated_at = r.read_i64()?;
    Ok(EntityNode {
        id,
        name,
        entity_type,
        description,
        mention_count,
        chunk_ids,
        created_at,
        updated_at,
    })
}

fn write_relationship(w: &mut ByteWriter, rel: &Relationship) {
    w.write_string(&rel.id);
    w.write_string(&rel.source_entity_id);
    w.write_string(&rel.target_entity_id);
    w.write_string(&rel.relationship_type);
    w.write_f64(rel.strength);
    w.write_i32(rel.evidence_count as i32);
}

fn read_relationship(r: &mut ByteReader<'_>) -> Result<Relationship, MnxError> {
    Ok(Relationship {
        id: r.read_string()?,
        source_entity_id: r.read_string()?,
        target_entity_id: r.read_string()?,
        relationship_type: r.read_string()?,
        strength: r.read_f64()?,
        evidence_count: r.read_i32()?.max(0) as u32,
    })
}

fn write_generic(w: &mut ByteWriter, section: &GenericSection) {
    let mut fields: Vec<(&String, &String)> = section.fields.iter().collect();
    fields.sort_by(|a, b| a.0.cmp(b.0));
    w.write_i32(fields.len() as i32);
    for (key, value) in fields {
        w.write_string(key);
        w.write_string(value);
    }
}

fn read_generic(r: &mut ByteReader<'_>) -> Result<GenericSection, MnxError> {
    let entries = r.read_list(|r| {
        let k = r.read_string()?;
        let v = r.read_string()?;
        Ok((k, v))
    })?;
    Ok(GenericSection { fields: entries.into_iter().collect() })
}

/// In-memory mind-state container (§4.12).
#[derive(Debug, Clone, Default)]
pub struct MnxFile {
    /// Container flags (`FLAG_COMPRESSED` / `FLAG_ENCRYPTED` / `FLAG_SIGNED`).
    pub flags: u8,
    /// File-level UUID, regenerated on [`MnxFile::new`].
    pub file_id: Uuid,
    /// Agent identity, if present.
    pub identity: Option<IdentitySection>,
    /// Chunk store snapshot, if present.
    pub memory_store: Option<Vec<Chunk>>,
    /// Knowledge graph snapshot, if present.
    pub knowledge_graph: Option<KnowledgeGraph>,
    /// Export metadata, if present.
    pub meta: Option<GenericSection>,
    /// Every other named, caller-opaque section that was present.
    pub generic_sections: HashMap<SectionType, GenericSection>,
    /// Section ids this codec does not recognise, preserved verbatim.
    pub raw_sections: HashMap<i16, Vec<u8>>,
}

impl MnxFile {
    /// Construct an empty container with a fresh file id.
    #[must_use]
    pub fn new() -> Self {
        Self {
            flags: 0,
            file_id: Uuid::new_v4(),
            ..Default::default()
        }
    }

    fn encode_sections(&self) -> Vec<(i16, Vec<u8>)> {
        let mut out = Vec::new();

        if let Some(identity) = &self.identity {
            let mut w = ByteWriter::new();
            w.write_string(&identity.name);
            w.write_i64(identity.created_at);
            out.push((SectionType::Identity.id(), w.into_bytes()));
        }
        if let Some(chunks) = &self.memory_store {
            let mut w = ByteWriter::new();
            w.write_list(chunks, |w, c| write_chunk(w, c));
            out.push((SectionType::MemoryStore.id(), w.into_bytes()));
        }
        if let Some(graph) = &self.knowledge_graph {
            let mut w = ByteWriter::new();
            w.write_list(&graph.entities_snapshot(), |w, e| write_entity(w, e));
            w.write_list(&graph.chunk_nodes_snapshot(), |w, n| {
                w.write_string(&n.chunk_id);
                w.write_list(&n.entity_ids, |w, id| w.write_string(id));
            });
            w.write_list(&graph.relationships_snapshot(), |w, rel| write_relationship(w, rel));
            out.push((SectionType::KnowledgeGraph.id(), w.into_bytes()));
        }
        if let Some(meta) = &self.meta {
            let mut w = ByteWriter::new();
            write_generic(&mut w, meta);
            out.push((SectionType::Meta.id(), w.into_bytes()));
        }
        for (section_type, generic) in &self.generic_sections {
            let mut w = ByteWriter::new();
            write_generic(&mut w, generic);
            out.push((section_type.id(), w.into_bytes()));
        }
        for (&id, bytes) in &self.raw_sections {
            out.push((id, bytes.clone()));
        }

        out
    }

    /// Encode this container to bit-exact MNX bytes (§6).
    ///
    /// # Errors
    /// Returns [`MnxError`] only in pathological cases (this path does
    /// not otherwise fail); kept fallible to match [`MnxFile::decode`].
    pub fn encode(&self) -> Result<Vec<u8>, MnxError> {
        let sections = self.encode_sections();
        let section_count = sections.len();

        let mut payload = Vec::new();
        let mut table_entries = Vec::with_capacity(section_count);
        let table_offset = HEADER_LEN as u64;
        let payload_start = table_offset + (section_count * SECTION_TABLE_ENTRY_LEN) as u64;
        let mut cursor = payload_start;
        for (id, bytes) in &sections {
            table_entries.push((*id, cursor, bytes.len() as u64));
            cursor += bytes.len() as u64;
            payload.extend_from_slice(bytes);
        }
        let total_payload_size: u64 = sections.iter().map(|(_, b)| b.len() as u64).sum();

        let mut body = ByteWriter::new();
        body.write_u32(HEADER_MAGIC);
        body.write_u8(1);
        body.write_u8(0);
        body.write_u8(0);
        body.write_u8(self.flags);
        body.write_raw(self.file_id.as_bytes());
        body.write_u16(section_count as u16);
        body.write_u32(table_offset as u32);
        body.write_u64(total_payload_size);
        body.write_raw(&[0u8; 26]);
        debug_assert_eq!(body.len(), HEADER_LEN);

        for (id, offset, len) in &table_entries {
            body.write_i16(*id);
            body.write_u64(*offset);
            body.write_u64(*len);
            body.write_u16(0);
        }
        debug_assert_eq!(body.len(), payload_start as usize);

        body.write_raw(&payload);

        let mut bytes = body.into_bytes();
        let checksum = Sha256::digest(&bytes);
        bytes.extend_from_slice(&checksum);
        bytes.extend_from_slice(&FOOTER_MAGIC.to_be_bytes());
        Ok(bytes)
    }

    /// Decode MNX bytes, verifying the header/footer magic and checksum.
    /// Section ids this codec does not recognise are preserved untouched
    /// in `raw_sections`.
    ///
    /// # Errors
    /// Returns [`MnxError::MagicMismatch`], [`MnxError::VersionTooNew`],
    /// [`MnxError::TruncatedInput`], [`MnxError::ChecksumMismatch`],
    /// [`MnxError::FooterMagicMismatch`], or
    /// [`MnxError::SectionPayloadCorrupt`] as appropriate.
    pub fn decode(bytes: &[u8]) -> Result<Self, MnxError> {
        if bytes.len() < HEADER_LEN + FOOTER_LEN {
            return Err(MnxError::TruncatedInput {
                expected: HEADER_LEN + FOOTER_LEN,
                found: bytes.len(),
            });
        }

        let body_len = bytes.len() - FOOTER_LEN;
        let (body, footer) = bytes.split_at(body_len);
        let checksum = &footer[0..32];
        let footer_magic = u32::from_be_bytes(footer[32..36].try_into().unwrap());
        if footer_magic != FOOTER_MAGIC {
            return Err(MnxError::FooterMagicMismatch);
        }
        let computed = Sha256::digest(body);
        if computed.as_slice() != checksum {
            return Err(MnxError::ChecksumMismatch);
        }

        let mut r = ByteReader::new(body);
        let magic = r.read_u32()?;
        if magic != HEADER_MAGIC {
            return Err(MnxError::MagicMismatch);
        }
        let major = r.read_u8()?;
        let _minor = r.read_u8()?;
        let _patch = r.read_u8()?;
        if major > 1 {
            return Err(MnxError::VersionTooNew(major, _minor, _patch));
        }
        let flags = r.read_u8()?;
        let file_id_bytes = r.read_raw(16)?;
        let file_id = Uuid::from_slice(file_id_bytes).expect("exactly 16 bytes read");
        let section_count = r.read_u16()?;
        let _table_offset = r.read_u32()?;
        let _total_payload_size = r.read_u64()?;
        let _reserved = r.read_raw(26)?;

        let mut entries = Vec::with_capacity(section_count as usize);
        for _ in 0..section_count {
            let id = r.read_i16()?;
            let offset = r.read_u64()?;
            let len = r.read_u64()?;
            let _flags = r.read_u16()?;
            entries.push((id, offset, len));
        }

        let mut file = MnxFile { flags, file_id, ..Default::default() };
        for (id, offset, len) in entries {
            let start = offset as usize;
            let end = start + len as usize;
            if end > body.len() {
                return Err(MnxError::TruncatedInput { expected: end, found: body.len() });
            }
            let payload = &body[start..end];
            let Some(section_type) = SectionType::from_id(id) else {
                file.raw_sections.insert(id, payload.to_vec());
                continue;
            };
            let mut sr = ByteReader::new(payload);
            match section_type {
                SectionType::Identity => {
                    let name = sr.read_string()?;
                    let created_at = sr.read_i64()?;
                    file.identity = Some(IdentitySection { name, created_at });
                }
                SectionType::MemoryStore => {
                    file.memory_store = Some(sr.read_list(read_chunk)?);
                }
                SectionType::KnowledgeGraph => {
                    let entities = sr.read_list(read_entity)?;
                    let chunk_nodes = sr.read_list(|r| {
                        let chunk_id = r.read_string()?;
                        let entity_ids = r.read_list(|r| r.read_string())?;
                        Ok(ChunkNode { chunk_id, entity_ids })
                    })?;
                    let relationships = sr.read_list(read_relationship)?;
                    file.knowledge_graph = Some(KnowledgeGraph::from_parts(entities, chunk_nodes, relationships));
                }
                SectionType::Meta => {
                    file.meta = Some(read_generic(&mut sr)?);
                }
                other => {
                    file.generic_sections.insert(other, read_generic(&mut sr)?);
                }
            }
        }

        Ok(file)
    }
}

/// Serialise `file` for persistence, converting encode failures into the
/// crate-wide error type.
///
/// # Errors
/// Returns [`StoreError::Mnx`] if encoding fails.
pub fn encode(file: &MnxFile) -> Result<Vec<u8>, StoreError> {
    Ok(file.encode()?)
}

/// Decode `bytes` into an [`MnxFile`], converting decode failures into
/// the crate-wide error type.
///
/// # Errors
/// Returns [`StoreError::Mnx`] if decoding fails.
pub fn decode(bytes: &[u8]) -> Result<MnxFile, StoreError> {
    Ok(MnxFile::decode(bytes)?)
}

/// Helper so [`std::time::SystemTime`]-free call sites can stamp an
/// [`IdentitySection`] with the current time.
#[must_use]
pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extraction;

    #[test]
    fn roundtrips_header_and_footer_magic() {
        let file = MnxFile::new();
        let bytes = file.encode().unwrap();
        assert_eq!(&bytes[0..4], b"MNX!");
        assert_eq!(&bytes[bytes.len() - 4..], b"!XNM");
    }

    #[test]
    fn scenario_s6_roundtrips_identity_meta_memory_and_unknown_section() {
        let mut file = MnxFile::new();
        file.identity = Some(IdentitySection { name: "TestAI".to_string(), created_at: 1000 });
        let mut meta_fields = HashMap::new();
        meta_fields.insert("format".to_string(), "test".to_string());
        file.meta = Some(GenericSection { fields: meta_fields });

        let mut chunk = Chunk::new("c1", "hello world", "src", "memory");
        chunk.q_value = 0.7;
        chunk.set_nts_stage(crate::chunk::NtsStage::Episodic);
        file.memory_store = Some(vec![chunk]);

        file.raw_sections.insert(0x7FFF, vec![0xDE, 0xAD, 0xBE, 0xEF]);

        let bytes = file.encode().unwrap();
        assert_eq!(&bytes[0..4], b"MNX!");
        assert_eq!(&bytes[bytes.len() - 4..], b"!XNM");

        let decoded = MnxFile::decode(&bytes).unwrap();
        assert_eq!(decoded.identity, file.identity);
        assert_eq!(decoded.meta, file.meta);
        assert_eq!(decoded.raw_sections.get(&0x7FFF), Some(&vec![0xDE, 0xAD, 0xBE, 0xEF]));

        let decoded_chunks = decoded.memory_store.unwrap();
        assert_eq!(decoded_chunks.len(), 1);
        assert_eq!(decoded_chunks[0].chunk_id, "c1");
        assert!((decoded_chunks[0].q_value - 0.7).abs() < 1e-9);
        assert_eq!(decoded_chunks[0].nts_stage(), Some(crate::chunk::NtsStage::Episodic));
    }

    #[test]
    fn knowledge_graph_section_roundtrips() {
        let mut graph = KnowledgeGraph::new();
        graph.add_chunk("c1", &extraction::extract("Rust is used by Mozilla."));

        let mut file = MnxFile::new();
        file.knowledge_graph = Some(graph.clone());
        let bytes = file.encode().unwrap();
        let decoded = MnxFile::decode(&bytes).unwrap();
        assert_eq!(decoded.knowledge_graph.unwrap().stats(), graph.stats());
    }

    #[test]
    fn tampered_bytes_fail_checksum() {
        let file = MnxFile::new();
        let mut bytes = file.encode().unwrap();
        let last = bytes.len() - 10;
        bytes[last] ^= 0xFF;
        assert!(matches!(MnxFile::decode(&bytes), Err(MnxError::ChecksumMismatch)));
    }

    #[test]
    fn wrong_magic_is_rejected() {
        let mut bytes = MnxFile::new().encode().unwrap();
        bytes[0] = 0;
        // Corrupting the magic also invalidates the checksum, so decode
        // surfaces whichever mismatch it detects first.
        assert!(MnxFile::decode(&bytes).is_err());
    }

    #[test]
    fn truncated_input_is_reported() {
        let bytes = MnxFile::new().encode().unwrap();
        let err = MnxFile::decode(&bytes[..10]).unwrap_err();
        assert!(matches!(err, MnxError::TruncatedInput { .. }));
    }
}
