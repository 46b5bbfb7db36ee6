//! Storage contracts.

use crate::Result;
use crate::models::{
    Chunk, EntityId, NamedEntity, Proposition, PropositionId, PropositionQuery,
};

/// Persistent set of propositions with similarity and filter queries.
///
/// # Guarantees
///
/// Every mutating call is atomic with respect to concurrent queries:
/// readers see either the pre-state or the post-state, never a mix.
/// Ordering is stable under a given snapshot. Within a context the
/// repository provides read-your-writes; cross-context visibility is
/// eventual.
pub trait PropositionRepository: Send + Sync {
    /// Inserts or replaces a proposition by ID.
    ///
    /// Implementations must enforce the source-reference invariant: every
    /// entry of `source_ids` resolves to a proposition in the same context
    /// with a strictly smaller level.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::InvalidInput`] on a source-reference
    /// violation and [`crate::Error::Persistence`] on storage failure.
    fn upsert(&self, proposition: &Proposition) -> Result<()>;

    /// Inserts or replaces a batch atomically: either all upserts commit
    /// or none do.
    ///
    /// # Errors
    ///
    /// Returns an error if validation or the write fails; no partial
    /// state is visible afterwards.
    fn upsert_all(&self, propositions: &[Proposition]) -> Result<()>;

    /// Fetches a proposition by ID.
    ///
    /// # Errors
    ///
    /// Returns an error if the read fails.
    fn find_by_id(&self, id: &PropositionId) -> Result<Option<Proposition>>;

    /// Resolves the sources of an abstraction, in `source_ids` order.
    ///
    /// Retired sources are included: an abstraction keeps citing what it
    /// was synthesized from.
    ///
    /// # Errors
    ///
    /// Returns an error if the read fails.
    fn find_sources(&self, proposition: &Proposition) -> Result<Vec<Proposition>>;

    /// Applies the query filters, ordering and limit.
    ///
    /// # Errors
    ///
    /// Returns an error if the read fails.
    fn query(&self, query: &PropositionQuery) -> Result<Vec<Proposition>>;

    /// Vector similarity prefilter intersected with the query filters.
    ///
    /// Scores are in [0, 1]; results are ordered by score descending.
    ///
    /// # Errors
    ///
    /// Returns an error if embedding or the read fails.
    fn find_similar_with_scores(
        &self,
        text: &str,
        query: &PropositionQuery,
    ) -> Result<Vec<(Proposition, f32)>>;

    /// Lexical search. The query syntax is the backend's own; the core
    /// passes the string through opaquely.
    ///
    /// # Errors
    ///
    /// Returns an error if the read fails.
    fn text_search(
        &self,
        text: &str,
        filter: Option<&PropositionQuery>,
    ) -> Result<Vec<Proposition>>;

    /// Retires a proposition by explicit administrative action.
    ///
    /// Retired propositions stay in the store and may still be cited by
    /// `source_ids`; they are only returned to queries that opt in.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    fn retire(&self, id: &PropositionId) -> Result<bool>;
}

/// Read access to the host's entity store.
///
/// Searchers in the resolver chain consume this; dice never writes
/// entities.
pub trait EntityRepository: Send + Sync {
    /// Fetches an entity by ID.
    ///
    /// # Errors
    ///
    /// Returns an error if the read fails.
    fn find_by_id(&self, id: &EntityId) -> Result<Option<NamedEntity>>;

    /// Lexical search over entity names and descriptions, optionally
    /// restricted to the given labels.
    ///
    /// # Errors
    ///
    /// Returns an error if the read fails.
    fn text_search(
        &self,
        query: &str,
        labels: Option<&[String]>,
        limit: usize,
    ) -> Result<Vec<NamedEntity>>;

    /// Embedding similarity search, optionally restricted to the given
    /// labels. Scores are in [0, 1], ordered descending.
    ///
    /// # Errors
    ///
    /// Returns an error if embedding or the read fails.
    fn vector_search(
        &self,
        query: &str,
        labels: Option<&[String]>,
        limit: usize,
    ) -> Result<Vec<(NamedEntity, f32)>>;
}

/// Record of which chunk contents have been processed per source.
///
/// The analyzer consults this before dispatching a window and records
/// both successes and failures, so a failed chunk is not retried
/// automatically.
pub trait HistoryStore: Send + Sync {
    /// Returns true if the hash was already processed for the source.
    ///
    /// # Errors
    ///
    /// Returns an error if the read fails.
    fn was_processed(&self, source_id: &str, content_hash: &str) -> Result<bool>;

    /// Records a chunk as processed for its source.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    fn record(&self, source_id: &str, chunk: &Chunk) -> Result<()>;
}
