//! 8-bit min-max embedding quantization (§4.2).
//!
//! Quantised embeddings trade a small, bounded precision loss for a 4x
//! storage reduction — useful once the chunk index holds tens of
//! thousands of 128-dimensional float vectors.

/// A quantised embedding: one byte per dimension plus the two floats
/// needed to dequantise it.
#[derive(Debug, Clone, PartialEq)]
pub struct QuantizedEmbedding {
    /// Minimum value observed across the source vector.
    pub min: f32,
    /// Maximum value observed across the source vector.
    pub max: f32,
    /// Quantised bytes, one per source dimension.
    pub bytes: Vec<u8>,
}

impl QuantizedEmbedding {
    /// Number of quantised dimensions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Whether this embedding has zero dimensions.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// Quantise a float vector to 8 bits per dimension (§4.2).
///
/// When every element is equal (`min == max`), every byte is `128` — there
/// is no dynamic range to encode, so the midpoint avoids a division by
/// zero downstream in [`dequantize`].
#[must_use]
pub fn quantize(v: &[f32]) -> QuantizedEmbedding {
    if v.is_empty() {
        return QuantizedEmbedding {
            min: 0.0,
            max: 0.0,
            bytes: Vec::new(),
        };
    }

    let min = v.iter().cloned().fold(f32::INFINITY, f32::min);
    let max = v.iter().cloned().fold(f32::NEG_INFINITY, f32::max);

    let bytes = if (max - min).abs() < f32::EPSILON {
        vec![128u8; v.len()]
    } else {
        v.iter()
            .map(|&x| {
                let scaled = (x - min) / (max - min) * 255.0;
                scaled.round().clamp(0.0, 255.0) as u8
            })
            .collect()
    };

    QuantizedEmbedding { min, max, bytes }
}

/// Dequantise back to a float vector: `v_i' = min + (b_i / 255) * (max -
/// min)`.
#[must_use]
pub fn dequantize(q: &QuantizedEmbedding) -> Vec<f32> {
    q.bytes
        .iter()
        .map(|&b| q.min + (f32::from(b) / 255.0) * (q.max - q.min))
        .collect()
}

/// Cosine similarity computed directly on quantised bytes, treated as
/// unsigned integers. Returns `0.0` for mismatched lengths or empty
/// vectors, matching [`super::cosine_similarity`]'s edge-case contract.
#[must_use]
pub fn quantized_cosine_similarity(a: &QuantizedEmbedding, b: &QuantizedEmbedding) -> f64 {
    if a.bytes.len() != b.bytes.len() || a.bytes.is_empty() {
        return 0.0;
    }
    let dot: f64 = a
        .bytes
        .iter()
        .zip(&b.bytes)
        .map(|(&x, &y)| f64::from(x) * f64::from(y))
        .sum();
    let mag_a: f64 = a
        .bytes
        .iter()
        .map(|&x| f64::from(x) * f64::from(x))
        .sum::<f64>()
        .sqrt();
    let mag_b: f64 = b
        .bytes
        .iter()
        .map(|&y| f64::from(y) * f64::from(y))
        .sum::<f64>()
        .sqrt();
    if mag_a < f64::EPSILON || mag_b < f64::EPSILON {
        return 0.0;
    }
    dot / (mag_a * mag_b)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::cosine_similarity;

    #[test]
    fn quantize_dequantize_roundtrips_within_tolerance() {
        let v: Vec<f32> = (0..128).map(|i| (i as f32 / 64.0) - 1.0).collect();
        let q = quantize(&v);
        let back = dequantize(&q);
        for (orig, recovered) in v.iter().zip(&back) {
            assert!((orig - recovered).abs() < 0.02);
        }
    }

    #[test]
    fn constant_vector_quantizes_to_midpoint_bytes() {
        let v = vec![0.5f32; 16];
        let q = quantize(&v);
        assert!(q.bytes.iter().all(|&b| b == 128));
    }

    #[test]
    fn empty_vector_quantizes_to_empty() {
        let q = quantize(&[]);
        assert!(q.is_empty());
        assert_eq!(q.len(), 0);
    }

    #[test]
    fn quantized_similarity_matches_float_similarity_within_one_percent() {
        let a: Vec<f32> = (0..128).map(|i| ((i * 7) % 17) as f32 / 17.0).collect();
        let b: Vec<f32> = (0..128).map(|i| ((i * 5) % 13) as f32 / 13.0).collect();

        let float_sim = cosine_similarity(&a, &b);
        let qa = quantize(&a);
        let qb = quantize(&b);
        let quant_sim = quantized_cosine_similarity(&qa, &qb);

        assert!((float_sim - quant_sim).abs() < 0.01);
    }

    #[test]
    fn mismatched_lengths_return_zero() {
        let qa = quantize(&[1.0, 2.0, 3.0]);
        let qb = quantize(&[1.0, 2.0]);
        assert_eq!(quantized_cosine_similarity(&qa, &qb), 0.0);
    }
}
