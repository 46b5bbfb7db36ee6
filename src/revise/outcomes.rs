//! Outcome transforms and the per-batch candidate state machine.
//!
//! These are the only code paths that mutate propositions. Each transform
//! is a pure function of `(candidate, new, now)`; the state machine keeps
//! a candidate from being transformed twice within one batch.

use crate::models::{CandidateState, Proposition, PropositionId};
use chrono::{DateTime, Utc};
use std::collections::HashMap;

/// Confidence bonus applied on merge.
pub const MERGE_CONFIDENCE_BOOST: f64 = 0.05;
/// Decay multiplier applied on merge.
pub const MERGE_DECAY_FACTOR: f64 = 0.7;
/// Confidence multiplier applied on reinforcement.
pub const REINFORCE_CONFIDENCE_FACTOR: f64 = 1.05;
/// Decay multiplier applied on reinforcement.
pub const REINFORCE_DECAY_FACTOR: f64 = 0.85;
/// Confidence multiplier applied to a contradicted candidate.
pub const CONTRADICTION_CONFIDENCE_FACTOR: f64 = 0.5;
/// Decay penalty added to a contradicted candidate.
pub const CONTRADICTION_DECAY_PENALTY: f64 = 0.15;
/// Decay multiplier for a surprising unrelated insertion.
pub const SURPRISE_DECAY_FACTOR: f64 = 0.8;

/// Merges a reworded duplicate into its candidate.
///
/// The new proposition itself is discarded by the caller; its grounding
/// is unioned into the candidate so grounding never shrinks.
pub fn merge_into(candidate: &mut Proposition, new: &Proposition, now: DateTime<Utc>) {
    candidate.confidence =
        (candidate.confidence.max(new.confidence) + MERGE_CONFIDENCE_BOOST).min(1.0);
    candidate.decay *= MERGE_DECAY_FACTOR;
    candidate.grounding.extend(new.grounding.iter().cloned());
    candidate.reinforce_count += 1;
    candidate.revised = now;
}

/// Reinforces a candidate with a closely related fact.
pub fn reinforce(candidate: &mut Proposition, now: DateTime<Utc>) {
    candidate.confidence = (candidate.confidence * REINFORCE_CONFIDENCE_FACTOR).min(1.0);
    candidate.decay *= REINFORCE_DECAY_FACTOR;
    candidate.reinforce_count += 1;
    candidate.revised = now;
}

/// Dampens a contradicted candidate.
///
/// The candidate stays ACTIVE: its suppressed confidence and accelerated
/// decay let it fall below retrieval thresholds naturally. Retirement is
/// never implicit. `revised` is deliberately untouched — bumping it would
/// reset the decay clock and keep the contradicted fact alive longer.
pub fn dampen(candidate: &mut Proposition) {
    candidate.confidence *= CONTRADICTION_CONFIDENCE_FACTOR;
    candidate.decay = (candidate.decay + CONTRADICTION_DECAY_PENALTY).min(1.0);
}

/// Slows the decay of a surprising insertion.
///
/// Applied only when the context held prior knowledge and none of it
/// related: what surprises an informed context is worth keeping longer.
pub fn apply_surprise(new: &mut Proposition) {
    new.decay = (new.decay * SURPRISE_DECAY_FACTOR).max(0.0);
}

/// Turns the new proposition into an abstraction over the cited sources.
///
/// The sources themselves are retained unchanged; they only take the
/// cited state for the batch.
pub fn abstract_over(new: &mut Proposition, sources: &[&Proposition]) {
    let max_level = sources.iter().map(|s| s.level).max().unwrap_or(0);
    new.level = max_level + 1;
    new.source_ids = sources.iter().map(|s| s.id.clone()).collect();
}

/// Per-batch candidate states. Transitions away from `Untouched` are
/// one-shot; re-citing an already cited candidate is allowed because it
/// is the same state.
#[derive(Debug, Default)]
pub struct BatchState {
    states: HashMap<PropositionId, CandidateState>,
}

impl BatchState {
    /// Creates an empty state table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the current state of a candidate.
    #[must_use]
    pub fn state(&self, id: &PropositionId) -> CandidateState {
        self.states.get(id).copied().unwrap_or_default()
    }

    /// Attempts a transition; returns whether it was applied.
    pub fn try_transition(&mut self, id: &PropositionId, to: CandidateState) -> bool {
        let current = self.state(id);
        let allowed = current == CandidateState::Untouched
            || (current == CandidateState::CitedAsSource && to == CandidateState::CitedAsSource);
        if allowed {
            self.states.insert(id.clone(), to);
        }
        allowed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ChunkId, ContextId};
    use chrono::Duration;

    fn proposition(text: &str, confidence: f64, decay: f64) -> Proposition {
        let mut p = Proposition::new(ContextId::new("ctx"), text, Utc::now() - Duration::days(1));
        p.confidence = confidence;
        p.decay = decay;
        p
    }

    #[test]
    fn test_merge_transform() {
        let now = Utc::now();
        let mut candidate = proposition("Alice works at Google", 0.9, 0.4);
        candidate.grounding.insert(ChunkId::new("chunk-a"));
        let mut new = proposition("Alice works at Google.", 0.7, 0.2);
        new.grounding.insert(ChunkId::new("chunk-b"));

        merge_into(&mut candidate, &new, now);

        assert!((candidate.confidence - 0.95).abs() < 1e-9);
        assert!((candidate.decay - 0.28).abs() < 1e-9);
        assert_eq!(candidate.reinforce_count, 1);
        assert_eq!(candidate.revised, now);
        // Grounding unions, never shrinks.
        assert!(candidate.grounding.contains(&ChunkId::new("chunk-a")));
        assert!(candidate.grounding.contains(&ChunkId::new("chunk-b")));
    }

    #[test]
    fn test_merge_confidence_caps_at_one() {
        let now = Utc::now();
        let mut candidate = proposition("fact", 0.98, 0.0);
        let new = proposition("fact.", 0.5, 0.0);
        merge_into(&mut candidate, &new, now);
        assert!((candidate.confidence - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_merge_never_lowers_confidence() {
        let now = Utc::now();
        let mut candidate = proposition("fact", 0.9, 0.0);
        let new = proposition("fact.", 0.1, 0.0);
        merge_into(&mut candidate, &new, now);
        assert!(candidate.confidence >= 0.9);
    }

    #[test]
    fn test_reinforce_transform() {
        let now = Utc::now();
        let mut candidate = proposition("Alice likes hiking", 0.8, 0.4);
        reinforce(&mut candidate, now);
        assert!((candidate.confidence - 0.84).abs() < 1e-9);
        assert!((candidate.decay - 0.34).abs() < 1e-9);
        assert_eq!(candidate.reinforce_count, 1);
    }

    #[test]
    fn test_dampen_transform() {
        let mut candidate = proposition("Alice is 30", 0.8, 0.1);
        let revised_before = candidate.revised;
        dampen(&mut candidate);
        assert!((candidate.confidence - 0.4).abs() < 1e-9);
        assert!((candidate.decay - 0.25).abs() < 1e-9);
        assert_eq!(candidate.revised, revised_before);
        assert!(candidate.is_active());
    }

    #[test]
    fn test_dampen_decay_caps_at_one() {
        let mut candidate = proposition("fact", 0.5, 0.95);
        dampen(&mut candidate);
        assert!((candidate.decay - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_surprise_transform() {
        let mut new = proposition("Alice just moved to Berlin", 0.9, 0.5);
        apply_surprise(&mut new);
        assert!((new.decay - 0.4).abs() < 1e-9);
    }

    #[test]
    fn test_abstract_over_sets_level_and_sources() {
        let mut sources = vec![
            proposition("Bob checks his work twice", 0.8, 0.2),
            proposition("Bob reviews every detail", 0.7, 0.2),
        ];
        sources[1].level = 1;
        sources[1].source_ids = vec![sources[0].id.clone()];

        let mut new = proposition("Bob values thoroughness", 0.9, 0.1);
        let refs: Vec<&Proposition> = sources.iter().collect();
        abstract_over(&mut new, &refs);

        assert_eq!(new.level, 2);
        assert_eq!(new.source_ids.len(), 2);
        assert_eq!(new.source_ids[0], sources[0].id);
    }

    #[test]
    fn test_batch_state_one_shot() {
        let mut state = BatchState::new();
        let id = PropositionId::new("p1");
        assert!(state.try_transition(&id, CandidateState::Merged));
        assert!(!state.try_transition(&id, CandidateState::Dampened));
        assert_eq!(state.state(&id), CandidateState::Merged);
    }

    #[test]
    fn test_batch_state_recite_allowed() {
        let mut state = BatchState::new();
        let id = PropositionId::new("p1");
        assert!(state.try_transition(&id, CandidateState::CitedAsSource));
        assert!(state.try_transition(&id, CandidateState::CitedAsSource));
        assert!(!state.try_transition(&id, CandidateState::Merged));
    }
}
