//! Embedding provider contract and the deterministic fallback (§6).
//!
//! The engine depends on embeddings only through the [`Embedder`] trait; a
//! real semantic model is a caller concern. [`HashEmbedder`] is the
//! documented fallback and is deliberately not a good embedding function —
//! downstream retrieval quality assumes a real model is plugged in (§9).

pub mod quantize;

/// Fixed embedding dimensionality the engine assumes everywhere vectors
/// are compared (§6: `D = 128`).
pub const EMBEDDING_DIM: usize = 128;

/// Stop words given a reduced weight by the fallback embedder (§6).
const STOP_WORDS: &[&str] = &[
    "the", "a", "an", "is", "it", "in", "on", "to", "of", "and", "or", "for", "at", "by",
];

/// Produces a fixed-dimension, L2-normalised embedding for a piece of text.
pub trait Embedder: Send + Sync {
    /// Embed `text`, returning an L2-normalised vector of length
    /// [`EMBEDDING_DIM`]. Implementations must be deterministic so that
    /// equal inputs always produce equal outputs.
    fn embed(&self, text: &str) -> Vec<f32>;

    /// Human-readable name surfaced in logs so operators can tell a
    /// placeholder embedder from a real model (§9 open question).
    fn name(&self) -> &str {
        "embedder"
    }
}

/// Deterministic hash-based placeholder embedder (§6).
///
/// Tokenises on non-alphanumeric characters, weights stop words at `0.3`
/// and other tokens at `1.0`, distributes each token's weight across three
/// hash buckets (weights `1.0`, `0.5`, `0.25`) modulo [`EMBEDDING_DIM`],
/// adds bigram features at weight `0.5`, then L2-normalises.
#[derive(Debug, Clone, Copy, Default)]
pub struct HashEmbedder;

impl HashEmbedder {
    /// Construct the placeholder embedder.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    fn token_weight(token: &str) -> f64 {
        if STOP_WORDS.contains(&token) {
            0.3
        } else {
            1.0
        }
    }

    fn fnv1a(s: &str) -> u64 {
        // FNV-1a: simple, deterministic, dependency-free 64-bit hash.
        let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
        for byte in s.bytes() {
            hash ^= u64::from(byte);
            hash = hash.wrapping_mul(0x0000_0100_0000_01B3);
        }
        hash
    }

    fn distribute(vector: &mut [f64; EMBEDDING_DIM], token: &str, weight: f64) {
        let h = Self::fnv1a(token);
        let buckets = [
            (h % EMBEDDING_DIM as u64) as usize,
            (h.rotate_left(21) % EMBEDDING_DIM as u64) as usize,
            (h.rotate_left(42) % EMBEDDING_DIM as u64) as usize,
        ];
        let bucket_weights = [1.0, 0.5, 0.25];
        for (bucket, bw) in buckets.into_iter().zip(bucket_weights) {
            vector[bucket] += weight * bw;
        }
    }
}

fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
        .collect()
}

impl Embedder for HashEmbedder {
    fn embed(&self, text: &str) -> Vec<f32> {
        let tokens = tokenize(text);
        let mut vector = [0.0f64; EMBEDDING_DIM];

        for token in &tokens {
            Self::distribute(&mut vector, token, Self::token_weight(token));
        }
        for pair in tokens.windows(2) {
            let bigram = format!("{}_{}", pair[0], pair[1]);
            Self::distribute(&mut vector, &bigram, 0.5);
        }

        l2_normalize(&vector)
    }

    fn name(&self) -> &str {
        "hash-placeholder"
    }
}

fn l2_normalize(vector: &[f64; EMBEDDING_DIM]) -> Vec<f32> {
    let norm: f64 = vector.iter().map(|v| v * v).sum::<f64>().sqrt();
    if norm < f64::EPSILON {
        return vec![0.0; EMBEDDING_DIM];
    }
    vector.iter().map(|v| (v / norm) as f32).collect()
}

/// Cosine similarity between two float vectors. Returns `0.0` for
/// mismatched lengths, empty vectors, or a zero-magnitude operand.
#[must_use]
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f64 = a.iter().zip(b).map(|(x, y)| f64::from(*x) * f64::from(*y)).sum();
    let mag_a: f64 = a.iter().map(|x| f64::from(*x) * f64::from(*x)).sum::<f64>().sqrt();
    let mag_b: f64 = b.iter().map(|x| f64::from(*x) * f64::from(*x)).sum::<f64>().sqrt();
    if mag_a < f64::EPSILON || mag_b < f64::EPSILON {
        return 0.0;
    }
    dot / (mag_a * mag_b)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn embedding_is_l2_normalised() {
        let embedder = HashEmbedder::new();
        let v = embedder.embed("Paris is the capital of France");
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-4);
    }

    #[test]
    fn embedding_is_deterministic() {
        let embedder = HashEmbedder::new();
        let a = embedder.embed("the quick brown fox");
        let b = embedder.embed("the quick brown fox");
        assert_eq!(a, b);
    }

    #[test]
    fn empty_text_embeds_to_zero_vector() {
        let embedder = HashEmbedder::new();
        let v = embedder.embed("");
        assert!(v.iter().all(|x| *x == 0.0));
    }

    #[test]
    fn cosine_similarity_of_identical_vectors_is_one() {
        let embedder = HashEmbedder::new();
        let v = embedder.embed("knowledge graph retrieval");
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn cosine_similarity_mismatched_lengths_is_zero() {
        assert_eq!(cosine_similarity(&[1.0, 0.0], &[1.0, 0.0, 0.0]), 0.0);
    }

    #[test]
    fn related_texts_score_higher_than_unrelated() {
        let embedder = HashEmbedder::new();
        let a = embedder.embed("Paris is the capital of France");
        let b = embedder.embed("The capital of France is Paris");
        let c = embedder.embed("bananas are a good source of potassium");
        assert!(cosine_similarity(&a, &b) > cosine_similarity(&a, &c));
    }
}
