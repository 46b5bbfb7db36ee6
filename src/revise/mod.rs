//! Proposition revision.
//!
//! The reviser is the consistency engine of the store: every newly
//! proposed proposition is classified against existing ones and exactly
//! one outcome transform is applied — merge, reinforce, contradict,
//! insert, or abstract. Deterministic fast paths (canonical dedup,
//! auto-merge) short-circuit the LLM; the rest goes through one batched
//! classification call per chunk.

mod candidates;
mod classify;
mod outcomes;
mod service;

pub use candidates::{CandidateGatherer, GatherOutcome, ScoredCandidate, canonical_text};
pub use classify::{CandidateRef, ClassificationRequestItem, PairClassification, classify_batch};
pub use outcomes::{
    BatchState, CONTRADICTION_CONFIDENCE_FACTOR, CONTRADICTION_DECAY_PENALTY,
    MERGE_CONFIDENCE_BOOST, MERGE_DECAY_FACTOR, REINFORCE_CONFIDENCE_FACTOR,
    REINFORCE_DECAY_FACTOR, SURPRISE_DECAY_FACTOR, abstract_over, apply_surprise, dampen,
    merge_into, reinforce,
};
pub use service::{ReviserConfig, ReviserService, RevisionBatch};
