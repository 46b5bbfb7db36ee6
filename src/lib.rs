//! # Dice
//!
//! A structured proposition memory engine for AI agents.
//!
//! Dice converts unstructured observations (chat turns, document chunks)
//! into a durable store of propositions: typed, entity-linked,
//! confidence-weighted statements. As new evidence arrives the store is
//! revised in place — duplicates merge, related facts reinforce,
//! contradictions dampen, and higher-level abstractions are synthesized
//! over their sources.
//!
//! ## Architecture
//!
//! - **Analyzer** windows a growing item sequence into content-hashed
//!   chunks and drives the pipeline ([`analyzer`]).
//! - **Pipeline** composes extract → resolve → revise → persist into one
//!   chunk-level call ([`pipeline`]).
//! - **Resolver** links entity mentions to existing entities through a
//!   cheapest-first searcher chain with an optional LLM arbiter
//!   ([`resolve`]).
//! - **Reviser** classifies each new proposition against existing ones and
//!   applies deterministic outcome transforms ([`revise`]).
//! - **Repository** persists propositions with filterable, similarity and
//!   lexical queries ([`storage`]).
//!
//! ## Example
//!
//! ```rust,ignore
//! use dice::{AnalysisContext, PropositionPipeline};
//!
//! let pipeline = PropositionPipeline::new(extractor, resolver, reviser, repository);
//! let result = pipeline.process_chunk(&chunk, &context)?;
//! for outcome in &result.revision_results {
//!     println!("{outcome:?}");
//! }
//! ```

#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![warn(missing_docs)]
#![forbid(unsafe_code)]
// multiple_crate_versions is inherently crate-level (detects duplicate transitive dependencies).
#![allow(clippy::multiple_crate_versions)]

use thiserror::Error as ThisError;

// Module declarations
pub mod analyzer;
pub mod compress;
pub mod embedding;
pub mod extract;
pub mod llm;
pub mod models;
pub mod pipeline;
pub mod projection;
pub mod resolve;
pub mod revise;
pub mod storage;

// Re-exports for convenience
pub use analyzer::{AnalyzerConfig, IncrementalAnalyzer};
pub use compress::{CompressionMode, CompressorConfig, ContextCompressor};
pub use embedding::Embedder;
pub use extract::PropositionExtractor;
pub use llm::LlmClient;
pub use models::{
    Chunk, ChunkId, ContextId, DataDictionary, EntityId, EntityResolution, Mention, MentionRole,
    NamedEntity, Proposition, PropositionId, PropositionQuery, PropositionStatus, QueryOrder,
    RevisionResult, SuggestedEntity, SuggestedProposition, TypeDescriptor,
};
pub use pipeline::{AnalysisContext, CancellationToken, ChunkResult, PropositionPipeline};
pub use resolve::{EntityResolver, EscalatingEntityResolver, ResolverConfig};
pub use revise::{ReviserConfig, ReviserService};
pub use storage::{EntityRepository, HistoryStore, PropositionRepository};

/// Error type for dice operations.
///
/// Uses `thiserror` for automatic `Display` and `Error` trait implementations.
///
/// # Error Variant Triggers
///
/// | Variant | Raised When |
/// |---------|-------------|
/// | `InvalidInput` | Malformed data reaches a service boundary (bad source references, empty batch items) |
/// | `InvalidConfig` | A threshold outside [0,1] or a zero limit is supplied at builder time |
/// | `Extraction` | The extractor raised or returned malformed data; the chunk is dropped |
/// | `Persistence` | A repository read or write failed; the chunk aborts |
/// | `Llm` | An LLM call failed after retries; absorbed by the reviser, surfaced by callers that cannot degrade |
/// | `Embedding` | Embedding generation failed |
/// | `Cancelled` | The caller cancelled chunk processing at a suspension point |
#[derive(Debug, ThisError)]
pub enum Error {
    /// Invalid input was provided.
    ///
    /// Raised when:
    /// - A proposition references a source that does not exist, crosses
    ///   contexts, or does not have a strictly smaller level
    /// - A batch item is structurally unusable (e.g. empty text)
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Invalid configuration was supplied.
    ///
    /// Raised at builder time, never at runtime:
    /// - A threshold outside [0, 1]
    /// - A limit of zero
    /// - A window trigger larger than the window size
    #[error("invalid config: {0}")]
    InvalidConfig(String),

    /// The extractor failed or returned malformed data.
    ///
    /// The containing chunk is dropped and the repository is left
    /// untouched.
    #[error("extraction failed: {cause}")]
    Extraction {
        /// The underlying cause.
        cause: String,
    },

    /// A repository operation failed.
    ///
    /// Propagated: the chunk aborts and no partial batch write is
    /// permitted.
    #[error("persistence operation '{operation}' failed: {cause}")]
    Persistence {
        /// The operation that failed.
        operation: String,
        /// The underlying cause.
        cause: String,
    },

    /// An LLM call failed.
    ///
    /// The reviser absorbs this by treating remaining items as unrelated;
    /// resolver searchers absorb it by escalating past the failed stage.
    #[error("llm call '{operation}' failed: {cause}")]
    Llm {
        /// The operation the call was serving.
        operation: String,
        /// The underlying cause.
        cause: String,
    },

    /// Embedding generation failed.
    #[error("embedding failed: {cause}")]
    Embedding {
        /// The underlying cause.
        cause: String,
    },

    /// Chunk processing was cancelled by the caller.
    ///
    /// Cancellation is cooperative: it is observed at suspension points
    /// (LLM calls, embedding calls, repository I/O), never mid-transform.
    #[error("operation cancelled")]
    Cancelled,
}

/// Result type alias for dice operations.
pub type Result<T> = std::result::Result<T, Error>;
