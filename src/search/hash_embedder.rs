//! FNV-1a feature hashing embedder.
//!
//! A deterministic, model-free [`Embedder`] that projects text into a
//! fixed-dimension space by hashing tokens. It captures lexical overlap, not
//! meaning, which makes it the offline default for the CLI and a reproducible
//! provider for tests.
//!
//! # Algorithm
//!
//! 1. **Normalize**: Unicode NFC, lowercase
//! 2. **Tokenize**: split on non-alphanumeric, drop tokens shorter than 2 chars
//! 3. **Project**: FNV-1a hash picks the dimension and the sign (+1/-1)
//! 4. **Scale**: optionally L2 normalize to unit length
//!
//! Unnormalized output keeps raw signed token counts, so dot-product scores grow
//! with the amount of shared vocabulary. Normalized output is the right pairing for
//! dot product when cosine-like scores are wanted without the extra normalization.
//!
//! Texts with no usable tokens embed to the zero vector. Cosine similarity against
//! a zero vector is undefined; the ranker sanitizes it.

use unicode_normalization::UnicodeNormalization;

use super::embedder::{Embedder, EmbedderResult};

/// FNV-1a offset basis (64-bit).
const FNV_OFFSET_BASIS: u64 = 0xcbf29ce484222325;

/// FNV-1a prime (64-bit).
const FNV_PRIME: u64 = 0x100000001b3;

pub const DEFAULT_DIMENSION: usize = 384;

const MIN_TOKEN_LEN: usize = 2;

#[derive(Debug, Clone)]
pub struct HashEmbedder {
    dimension: usize,
    normalize: bool,
    id: String,
}

impl HashEmbedder {
    /// L2-normalized hash embedder.
    ///
    /// # Panics
    ///
    /// Panics if dimension is 0.
    pub fn new(dimension: usize) -> Self {
        Self::with_normalization(dimension, true)
    }

    /// Hash embedder emitting raw signed token counts.
    ///
    /// # Panics
    ///
    /// Panics if dimension is 0.
    pub fn raw(dimension: usize) -> Self {
        Self::with_normalization(dimension, false)
    }

    fn with_normalization(dimension: usize, normalize: bool) -> Self {
        assert!(dimension > 0, "dimension must be positive");
        let id = if normalize {
            format!("fnv1a-{dimension}")
        } else {
            format!("fnv1a-raw-{dimension}")
        };
        Self {
            dimension,
            normalize,
            id,
        }
    }

    pub fn default_dimension() -> Self {
        Self::new(DEFAULT_DIMENSION)
    }

    pub fn is_normalized(&self) -> bool {
        self.normalize
    }

    fn tokenize(text: &str) -> Vec<String> {
        let composed: String = text.nfc().collect();
        composed
            .to_lowercase()
            .split(|c: char| !c.is_alphanumeric())
            .filter(|s| s.chars().count() >= MIN_TOKEN_LEN)
            .map(String::from)
            .collect()
    }

    fn fnv1a_hash(bytes: &[u8]) -> u64 {
        let mut hash = FNV_OFFSET_BASIS;
        for byte in bytes {
            hash ^= u64::from(*byte);
            hash = hash.wrapping_mul(FNV_PRIME);
        }
        hash
    }

    fn l2_normalize(vec: &mut [f32]) {
        let norm: f32 = vec.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > f32::EPSILON {
            for x in vec.iter_mut() {
                *x /= norm;
            }
        }
    }

    fn embed_tokens(&self, tokens: &[String]) -> Vec<f32> {
        let mut embedding = vec![0.0f32; self.dimension];

        for token in tokens {
            let hash = Self::fnv1a_hash(token.as_bytes());
            let idx = (hash % self.dimension as u64) as usize;
            let sign = if (hash >> 63) == 0 { 1.0 } else { -1.0 };
            embedding[idx] += sign;
        }

        if self.normalize {
            Self::l2_normalize(&mut embedding);
        }
        embedding
    }
}

impl Default for HashEmbedder {
    fn default() -> Self {
        Self::default_dimension()
    }
}

impl Embedder for HashEmbedder {
    fn embed(&self, text: &str) -> EmbedderResult<Vec<f32>> {
        Ok(self.embed_tokens(&Self::tokenize(text)))
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn id(&self) -> &str {
        &self.id
    }

    fn is_semantic(&self) -> bool {
        false
    }
}
