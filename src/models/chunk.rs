//! Source chunks produced by the analyzer.

use super::ChunkId;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// A windowed slice of a source sequence.
///
/// Chunk identity is `(source_id, start_index, end_index, content_hash)`;
/// the hash doubles as the deduplication key so re-rendering the same
/// window never reprocesses it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    /// Identifier of the source sequence (conversation, document).
    pub source_id: String,
    /// Inclusive start index of the window.
    pub start_index: usize,
    /// Exclusive end index of the window.
    pub end_index: usize,
    /// SHA-256 of the rendered text, hex encoded.
    pub content_hash: String,
    /// The rendered window text.
    pub text: String,
}

impl Chunk {
    /// Creates a chunk, hashing the rendered text.
    #[must_use]
    pub fn new(
        source_id: impl Into<String>,
        start_index: usize,
        end_index: usize,
        text: impl Into<String>,
    ) -> Self {
        let text = text.into();
        Self {
            source_id: source_id.into(),
            start_index,
            end_index,
            content_hash: Self::hash(&text),
            text,
        }
    }

    /// Computes the content hash of a rendered window.
    #[must_use]
    pub fn hash(text: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(text.as_bytes());
        hex::encode(hasher.finalize())
    }

    /// Returns the grounding identifier of this chunk.
    ///
    /// The short hash keeps the identifier compact while the index range
    /// keeps it readable in logs.
    #[must_use]
    pub fn id(&self) -> ChunkId {
        let short_hash = &self.content_hash[..self.content_hash.len().min(12)];
        ChunkId::new(format!(
            "{}:{}-{}:{short_hash}",
            self.source_id, self.start_index, self.end_index
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_is_deterministic() {
        let a = Chunk::new("conv-1", 0, 4, "Alice works at Google");
        let b = Chunk::new("conv-1", 0, 4, "Alice works at Google");
        assert_eq!(a.content_hash, b.content_hash);
        assert_eq!(a.id(), b.id());
    }

    #[test]
    fn test_hash_differs_on_content() {
        let a = Chunk::new("conv-1", 0, 4, "Alice works at Google");
        let b = Chunk::new("conv-1", 0, 4, "Alice works at Meta");
        assert_ne!(a.content_hash, b.content_hash);
    }

    #[test]
    fn test_id_carries_window_coordinates() {
        let chunk = Chunk::new("conv-1", 8, 20, "text");
        assert!(chunk.id().as_str().starts_with("conv-1:8-20:"));
    }
}
