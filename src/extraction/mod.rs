//! Heuristic entity extraction and co-occurrence relationship inference
//! (§4.6, C7).
//!
//! Extraction is deliberately heuristic (regex and word-list based, no
//! model inference) and is specified as best-effort end to end: a failure
//! anywhere in the pipeline must never block ingestion (§7).

pub mod lexicon;

use std::collections::HashMap;

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

/// Heterogeneous entity type classification (§3, §4.6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum EntityType {
    /// A named individual.
    Person,
    /// A company, institution, or other organisation.
    Organization,
    /// A geographic location.
    Place,
    /// A named technology, language, or platform.
    Technology,
    /// A code symbol such as an exception or service class name.
    CodeIdentifier,
    /// An abstract idea or concept.
    Concept,
    /// Fallback when no more specific type applies.
    Entity,
}

/// A candidate entity surfaced by one extraction technique, prior to
/// cross-document deduplication.
#[derive(Debug, Clone)]
pub struct EntityCandidate {
    /// Surface form as it appeared in the text.
    pub name: String,
    /// Classified entity type.
    pub entity_type: EntityType,
    /// Short description, when the extraction technique can supply one.
    pub description: String,
    /// Confidence in `[0, 1]`; used to resolve duplicate names.
    pub confidence: f64,
}

/// A candidate relationship between two co-occurring entities, keyed by
/// surface name rather than graph id (the caller resolves ids).
#[derive(Debug, Clone)]
pub struct RelationshipCandidate {
    /// Surface name of the source entity.
    pub source_name: String,
    /// Surface name of the target entity.
    pub target_name: String,
    /// Inferred relationship type (§4.6).
    pub relationship: String,
    /// Strength in `[0, 1]`, decaying with in-sentence distance.
    pub strength: f64,
    /// Words found between the two entities, retained for diagnostics.
    pub keywords: String,
}

/// Output of one extraction pass over a piece of text.
#[derive(Debug, Clone, Default)]
pub struct ExtractionResult {
    /// Deduplicated entity candidates.
    pub entities: Vec<EntityCandidate>,
    /// Relationship candidates between co-occurring entities.
    pub relationships: Vec<RelationshipCandidate>,
}

static CAMEL_CASE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b([A-Z][a-z0-9]+(?:[A-Z][a-zA-Z0-9]*)+)\b").expect("static regex")
});

static CONCEPT_PATTERNS: LazyLock<[(Regex, EntityType); 4]> = LazyLock::new(|| {
    [
        (
            Regex::new(r"(?i)\b(?:called|named|known as)\s+([A-Z][\w\- ]{1,40}?)\b[.,;]")
                .expect("static regex"),
            EntityType::Concept,
        ),
        (
            Regex::new(r"(?i)\b(?:using|via|through)\s+([A-Z][\w\- ]{1,40}?)\b[.,;]")
                .expect("static regex"),
            EntityType::Technology,
        ),
        (
            Regex::new(r"(?i)\b(?:created by|developed by|built by)\s+([A-Z][\w\- ]{1,40}?)\b[.,;]")
                .expect("static regex"),
            EntityType::Organization,
        ),
        (
            Regex::new(r"(?i)\b(?:located in|based in|from)\s+([A-Z][\w\- ]{1,40}?)\b[.,;]")
                .expect("static regex"),
            EntityType::Place,
        ),
    ]
});

const RELATIONSHIP_KEYWORDS: &[(&str, &str)] = &[
    ("is a", "is_a"),
    ("is an", "is_a"),
    ("uses", "uses"),
    ("has", "has"),
    ("created by", "created_by"),
    ("part of", "part_of"),
    ("depends on", "depends_on"),
    ("similar to", "similar_to"),
    ("associated with", "associated_with"),
];

fn split_sentences(text: &str) -> Vec<&str> {
    text.split(['.', '!', '?'])
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect()
}

fn classify_by_suffix_and_prefix(name: &str) -> EntityType {
    let lower = name.to_lowercase();
    if lexicon::PERSON_HONORIFICS
        .iter()
        .any(|h| lower.starts_with(h))
    {
        return EntityType::Person;
    }
    let last_word = lower.split_whitespace().last().unwrap_or(&lower);
    if lexicon::ORG_SUFFIXES.iter().any(|s| last_word.trim_end_matches('.') == s.trim_end_matches('.')) {
        return EntityType::Organization;
    }
    if lexicon::PLACE_SUFFIXES.iter().any(|s| last_word == *s) {
        return EntityType::Place;
    }
    if lexicon::CODE_IDENTIFIER_SUFFIXES
        .iter()
        .any(|s| lower.ends_with(s))
    {
        return EntityType::CodeIdentifier;
    }
    EntityType::Entity
}

fn extract_proper_noun_sequences(sentence: &str) -> Vec<EntityCandidate> {
    let words: Vec<&str> = sentence.split_whitespace().collect();
    let mut candidates = Vec::new();
    let mut i = 1; // skip the first word: capitalisation there is just sentence-case.
    while i < words.len() {
        let word = words[i].trim_matches(|c: char| !c.is_alphanumeric());
        let is_capitalised = word.chars().next().is_some_and(char::is_uppercase);
        let is_stopword = lexicon::STOP_WORDS.contains(&word);
        if is_capitalised && !word.is_empty() && !is_stopword {
            let mut run = vec![word];
            let mut j = i + 1;
            while j < words.len() {
                let next = words[j].trim_matches(|c: char| !c.is_alphanumeric());
                if next.chars().next().is_some_and(char::is_uppercase) && !lexicon::STOP_WORDS.contains(&next) {
                    run.push(next);
                    j += 1;
                } else {
                    break;
                }
            }
            let name = run.join(" ");
            let entity_type = classify_by_suffix_and_prefix(&name);
            candidates.push(EntityCandidate {
                name,
                entity_type,
                description: sentence.chars().take(100).collect(),
                confidence: 0.6,
            });
            i = j;
        } else {
            i += 1;
        }
    }
    candidates
}

fn extract_technology_terms(sentence: &str) -> Vec<EntityCandidate> {
    let lower = sentence.to_lowercase();
    lexicon::TECHNOLOGY_TERMS
        .iter()
        .filter(|term| lower.contains(*term))
        .map(|term| EntityCandidate {
            name: (*term).to_string(),
            entity_type: EntityType::Technology,
            description: sentence.chars().take(100).collect(),
            confidence: 0.9,
        })
        .collect()
}

fn extract_camel_case(sentence: &str) -> Vec<EntityCandidate> {
    CAMEL_CASE
        .find_iter(sentence)
        .map(|m| m.as_str())
        .filter(|s| s.len() >= 4 && s.len() <= 40)
        .map(|s| EntityCandidate {
            name: s.to_string(),
            entity_type: classify_by_suffix_and_prefix(s),
            description: sentence.chars().take(100).collect(),
            confidence: 0.7,
        })
        .collect()
}

fn extract_concept_patterns(sentence: &str) -> Vec<EntityCandidate> {
    let mut out = Vec::new();
    for (re, entity_type) in CONCEPT_PATTERNS.iter() {
        for cap in re.captures_iter(sentence) {
            if let Some(m) = cap.get(1) {
                out.push(EntityCandidate {
                    name: m.as_str().trim().to_string(),
                    entity_type: *entity_type,
                    description: sentence.chars().take(100).collect(),
                    confidence: 0.8,
                });
            }
        }
    }
    out
}

fn infer_relationship_keyword(between: &str) -> &'static str {
    let lower = between.to_lowercase();
    for (phrase, tag) in RELATIONSHIP_KEYWORDS {
        if lower.contains(phrase) {
            return tag;
        }
    }
    "related_to"
}

fn extract_relationships(sentence: &str, entities: &[EntityCandidate]) -> Vec<RelationshipCandidate> {
    let sentence_len = sentence.len().max(1);
    let mut positions: Vec<(usize, &EntityCandidate)> = entities
        .iter()
        .filter_map(|e| sentence.find(&e.name).map(|pos| (pos, e)))
        .collect();
    positions.sort_by_key(|(pos, _)| *pos);

    let mut out = Vec::new();
    for pair in positions.windows(2) {
        let (pos_a, a) = pair[0];
        let (pos_b, b) = pair[1];
        if a.name.eq_ignore_ascii_case(&b.name) {
            continue;
        }
        let start = pos_a + a.name.len();
        let between = if start <= pos_b {
            &sentence[start..pos_b]
        } else {
            ""
        };
        let distance = pos_b.saturating_sub(pos_a);
        let strength = (0.5 + 0.5 * (1.0 - (distance as f64 / sentence_len as f64))).clamp(0.5, 1.0);
        out.push(RelationshipCandidate {
            source_name: a.name.clone(),
            target_name: b.name.clone(),
            relationship: infer_relationship_keyword(between).to_string(),
            strength,
            keywords: between.trim().to_string(),
        });
    }
    out
}

/// Run the full extraction pipeline over `text` (§4.6): proper-noun
/// sequences, the technology lexicon, camelCase identifiers, concept
/// patterns, then co-occurrence relationship inference, then
/// deduplication by lowercased-trimmed name (keeping the highest
/// confidence candidate).
#[must_use]
pub fn extract(text: &str) -> ExtractionResult {
    let mut all_entities: Vec<EntityCandidate> = Vec::new();
    let mut all_relationships: Vec<RelationshipCandidate> = Vec::new();

    for sentence in split_sentences(text) {
        let mut sentence_entities = Vec::new();
        sentence_entities.extend(extract_proper_noun_sequences(sentence));
        sentence_entities.extend(extract_technology_terms(sentence));
        sentence_entities.extend(extract_camel_case(sentence));
        sentence_entities.extend(extract_concept_patterns(sentence));

        all_relationships.extend(extract_relationships(sentence, &sentence_entities));
        all_entities.extend(sentence_entities);
    }

    ExtractionResult {
        entities: dedupe_entities(all_entities),
        relationships: all_relationships,
    }
}

fn dedupe_entities(candidates: Vec<EntityCandidate>) -> Vec<EntityCandidate> {
    let mut best: HashMap<String, EntityCandidate> = HashMap::new();
    for candidate in candidates {
        let key = candidate.name.trim().to_lowercase();
        if key.is_empty() {
            continue;
        }
        best.entry(key)
            .and_modify(|existing| {
                if candidate.confidence > existing.confidence {
                    *existing = candidate.clone();
                }
            })
            .or_insert(candidate);
    }
    best.into_values().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_proper_noun_entity() {
        let result = extract("The Eiffel Tower is in Paris.");
        let names: Vec<_> = result.entities.iter().map(|e| e.name.as_str()).collect();
        assert!(names.iter().any(|n| n.contains("Eiffel Tower")));
        assert!(names.contains(&"Paris"));
    }

    #[test]
    fn extracts_technology_terms_case_insensitively() {
        let result = extract("We migrated the backend to Rust and PostgreSQL.");
        let techs: Vec<_> = result
            .entities
            .iter()
            .filter(|e| e.entity_type == EntityType::Technology)
            .map(|e| e.name.as_str())
            .collect();
        assert!(techs.contains(&"rust"));
        assert!(techs.contains(&"postgresql"));
    }

    #[test]
    fn extracts_camel_case_identifiers() {
        let result = extract("The request failed with NullPointerException in the handler.");
        assert!(result
            .entities
            .iter()
            .any(|e| e.name == "NullPointerException" && e.entity_type == EntityType::CodeIdentifier));
    }

    #[test]
    fn classifies_person_via_honorific() {
        let result = extract("Dr. Alice Johnson presented the findings.");
        assert!(result
            .entities
            .iter()
            .any(|e| e.entity_type == EntityType::Person));
    }

    #[test]
    fn dedupe_keeps_highest_confidence_candidate() {
        let candidates = vec![
            EntityCandidate {
                name: "Rust".to_string(),
                entity_type: EntityType::Entity,
                description: String::new(),
                confidence: 0.6,
            },
            EntityCandidate {
                name: "rust".to_string(),
                entity_type: EntityType::Technology,
                description: String::new(),
                confidence: 0.9,
            },
        ];
        let deduped = dedupe_entities(candidates);
        assert_eq!(deduped.len(), 1);
        assert_eq!(deduped[0].entity_type, EntityType::Technology);
    }

    #[test]
    fn relationship_inferred_between_cooccurring_entities() {
        let result = extract("Rust is used by Mozilla for systems programming.");
        assert!(!result.relationships.is_empty());
        for rel in &result.relationships {
            assert!((0.5..=1.0).contains(&rel.strength));
        }
    }

    #[test]
    fn empty_text_extracts_nothing() {
        let result = extract("");
        assert!(result.entities.is_empty());
        assert!(result.relationships.is_empty());
    }
}
