//! Embedding generation.
//!
//! The repository and the vector searcher consume an [`Embedder`]; hosts
//! plug in a real model. The crate ships a deterministic hash-projection
//! embedder for model-free operation and tests, and a no-op embedder that
//! disables vector search entirely.

// Allow cast precision loss for hash-based embedding calculations.
#![allow(clippy::cast_precision_loss)]
// Allow cast possible truncation for hash index calculations on 32-bit platforms.
#![allow(clippy::cast_possible_truncation)]

use crate::Result;
use sha2::{Digest, Sha256};

/// Trait for embedding generators.
///
/// Implementations should be deterministic enough to cache: the same text
/// must yield the same vector within a process lifetime.
pub trait Embedder: Send + Sync {
    /// Returns the embedding dimensions.
    fn dimensions(&self) -> usize;

    /// Generates an embedding for the given text.
    ///
    /// # Errors
    ///
    /// Returns an error if embedding generation fails.
    fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Generates embeddings for multiple texts.
    ///
    /// # Errors
    ///
    /// Returns an error if embedding generation fails.
    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        texts.iter().map(|t| self.embed(t)).collect()
    }
}

/// Deterministic hash-projection embedder.
///
/// Projects lowercase character trigrams into a fixed-dimension vector by
/// hashing each trigram to a bucket, then L2-normalizes. Identical texts
/// always score 1.0 against each other and texts sharing surface tokens
/// score proportionally to their trigram overlap. Not a semantic model —
/// a stand-in with stable, explainable behavior.
pub struct HashEmbedder {
    dimensions: usize,
}

impl HashEmbedder {
    /// Default dimensionality of the hash projection.
    pub const DEFAULT_DIMENSIONS: usize = 256;

    /// Creates an embedder with the default dimensions.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            dimensions: Self::DEFAULT_DIMENSIONS,
        }
    }

    /// Creates an embedder with explicit dimensions (minimum 8).
    #[must_use]
    pub const fn with_dimensions(dimensions: usize) -> Self {
        Self {
            dimensions: if dimensions < 8 { 8 } else { dimensions },
        }
    }
}

impl Default for HashEmbedder {
    fn default() -> Self {
        Self::new()
    }
}

impl Embedder for HashEmbedder {
    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut vector = vec![0.0_f32; self.dimensions];
        let normalized = text.to_lowercase();
        let chars: Vec<char> = normalized.chars().collect();

        if chars.is_empty() {
            return Ok(vector);
        }

        // Hash each trigram (padded at the edges by single chars) into a
        // bucket with a sign bit so unrelated texts decorrelate.
        let grams = chars.windows(3.min(chars.len()));
        for gram in grams {
            let token: String = gram.iter().collect();
            let digest = Sha256::digest(token.as_bytes());
            let bucket = (usize::from(digest[0]) << 8) | usize::from(digest[1]);
            let index = bucket % self.dimensions;
            let sign = if digest[2] & 1 == 0 { 1.0 } else { -1.0 };
            vector[index] += sign;
        }

        let norm: f32 = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for value in &mut vector {
                *value /= norm;
            }
        }
        Ok(vector)
    }
}

/// Embedder that returns empty vectors, disabling vector search.
///
/// Useful when no model is available; similarity prefilters degrade to
/// lexical-only candidate gathering.
pub struct NoopEmbedder;

impl NoopEmbedder {
    /// Creates a no-op embedder.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl Default for NoopEmbedder {
    fn default() -> Self {
        Self::new()
    }
}

impl Embedder for NoopEmbedder {
    fn dimensions(&self) -> usize {
        0
    }

    fn embed(&self, _text: &str) -> Result<Vec<f32>> {
        Ok(Vec::new())
    }
}

/// Cosine similarity between two vectors, clamped to [0, 1].
///
/// Returns 0.0 for empty or mismatched inputs so degraded embedders never
/// fake a match.
#[must_use]
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.is_empty() || a.len() != b.len() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|v| v * v).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    (dot / (norm_a * norm_b)).clamp(0.0, 1.0)
}
