//! Proposition extraction collaborator.
//!
//! Extraction is an external concern: the host supplies an implementation
//! (typically an LLM behind a structured prompt) and the pipeline calls
//! it once per chunk. Extractors must be pure with respect to the
//! repository — they see the chunk text, never the store.

use crate::Result;
use crate::models::{Chunk, ContextId, SuggestedProposition};

/// Produces suggested propositions from a chunk.
///
/// # Contract
///
/// - Pure with respect to the repository: same chunk, same suggestions,
///   no reads or writes of stored propositions.
/// - Mentions come back unresolved; the pipeline resolves them.
/// - An error (or structurally unusable output mapped to an error by the
///   implementation) drops the whole chunk and leaves the repository
///   untouched.
pub trait PropositionExtractor: Send + Sync {
    /// Extracts suggestions from the chunk.
    ///
    /// # Errors
    ///
    /// Returns an error when extraction fails; the pipeline surfaces it
    /// as [`crate::Error::Extraction`].
    fn extract(
        &self,
        chunk: &Chunk,
        context_id: &ContextId,
    ) -> Result<Vec<SuggestedProposition>>;
}
