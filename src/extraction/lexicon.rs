//! Fixed word lists used by entity extraction (§4.6), kept as plain
//! `const` slices the way the teacher pack keeps shared constants in a
//! dedicated `constants.rs`.

/// Common words excluded from the proper-noun-sequence heuristic.
pub const STOP_WORDS: &[&str] = &[
    "The", "A", "An", "This", "That", "These", "Those", "It", "He", "She", "They", "We", "You",
    "I", "But", "And", "Or", "So", "If", "When", "While", "Because", "Although", "However",
];

/// Case-insensitive technology-term lexicon (§4.6b).
pub const TECHNOLOGY_TERMS: &[&str] = &[
    "rust", "python", "javascript", "typescript", "kubernetes", "docker", "postgresql", "mysql",
    "redis", "kafka", "tensorflow", "pytorch", "react", "angular", "vue", "graphql", "grpc",
    "webassembly", "linux", "android", "ios", "aws", "azure", "gcp", "sqlite", "mongodb",
];

/// Honorific prefixes that classify the following name as `PERSON`.
pub const PERSON_HONORIFICS: &[&str] = &["dr.", "mr.", "mrs.", "ms.", "prof.", "sir", "dame"];

/// Suffixes that classify a name as `ORGANIZATION`.
pub const ORG_SUFFIXES: &[&str] = &[
    "inc", "inc.", "corp", "corp.", "llc", "ltd", "ltd.", "foundation", "institute", "university",
    "association", "corporation", "company",
];

/// Suffixes that classify a name as `PLACE`.
pub const PLACE_SUFFIXES: &[&str] = &[
    "city", "county", "province", "island", "mountain", "river", "valley", "republic",
];

/// Suffixes that classify a name as `CODE_IDENTIFIER`.
pub const CODE_IDENTIFIER_SUFFIXES: &[&str] = &["exception", "error", "manager", "service"];
