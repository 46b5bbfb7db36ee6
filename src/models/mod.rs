//! Data models for dice.
//!
//! This module contains all the core data structures used throughout the
//! system.

mod chunk;
mod entity;
mod proposition;
mod query;
mod revision;
mod schema;
mod suggestion;

pub use chunk::Chunk;
pub use entity::{EntityResolution, NamedEntity, SuggestedEntity};
pub use proposition::{
    ChunkId, ContextId, DECAY_RATE_PER_DAY, EntityId, Mention, MentionRole, Proposition,
    PropositionId, PropositionStatus,
};
pub use query::{PropositionQuery, PropositionQueryBuilder, QueryOrder};
pub use revision::{CandidateState, RevisionLabel, RevisionResult};
pub use schema::{DataDictionary, TypeDescriptor};
pub use suggestion::SuggestedProposition;
