//! Candidate gathering for revision.
//!
//! Candidates for a new proposition come from two probes — canonical-text
//! exact match and vector similarity — within the same context, then pass
//! the entity-overlap prefilter: a candidate sharing no resolved entity
//! with the new proposition never reaches the LLM. The prefilter bounds
//! classification cost; the pre-filter candidate count is kept separately
//! because surprise-prioritized retention is about whether the context
//! held *any* prior knowledge, related or not.

use crate::Result;
use crate::models::{Proposition, PropositionQuery};
use crate::storage::PropositionRepository;
use std::collections::HashMap;
use std::sync::Arc;

/// A gathered candidate with its similarity to the new proposition.
#[derive(Debug, Clone)]
pub struct ScoredCandidate {
    /// The existing proposition.
    pub proposition: Proposition,
    /// Similarity in [0, 1]; canonical-text matches score 1.0.
    pub similarity: f32,
}

/// Result of gathering for one new proposition.
#[derive(Debug, Default)]
pub struct GatherOutcome {
    /// Candidates that survived the entity-overlap prefilter, ordered by
    /// similarity descending.
    pub candidates: Vec<ScoredCandidate>,
    /// True if any candidate existed before the prefilter: the context
    /// held prior knowledge.
    pub prior_knowledge: bool,
}

/// Gathers classification candidates from the repository.
pub struct CandidateGatherer {
    repository: Arc<dyn PropositionRepository>,
    top_k: usize,
}

impl CandidateGatherer {
    /// Creates a gatherer fetching up to `top_k` candidates per probe.
    #[must_use]
    pub fn new(repository: Arc<dyn PropositionRepository>, top_k: usize) -> Self {
        Self { repository, top_k }
    }

    /// Gathers candidates for one new proposition.
    ///
    /// # Errors
    ///
    /// Returns an error if a repository read fails.
    pub fn gather(&self, proposition: &Proposition) -> Result<GatherOutcome> {
        let query = PropositionQuery::for_context(proposition.context_id.clone())
            .with_limit(self.top_k)
            .build()?;

        // Probe 1: lexical, kept only on canonical-text equality.
        let canonical = canonical_text(&proposition.text);
        let lexical = self.repository.text_search(&proposition.text, Some(&query))?;

        // Probe 2: vector similarity.
        let similar = self
            .repository
            .find_similar_with_scores(&proposition.text, &query)?;

        let mut merged: HashMap<String, ScoredCandidate> = HashMap::new();
        for candidate in lexical {
            if candidate.id == proposition.id {
                continue;
            }
            if canonical_text(&candidate.text) == canonical {
                merged.insert(
                    candidate.id.as_str().to_string(),
                    ScoredCandidate {
                        proposition: candidate,
                        similarity: 1.0,
                    },
                );
            }
        }
        for (candidate, score) in similar {
            if candidate.id == proposition.id {
                continue;
            }
            merged
                .entry(candidate.id.as_str().to_string())
                .and_modify(|existing| existing.similarity = existing.similarity.max(score))
                .or_insert(ScoredCandidate {
                    proposition: candidate,
                    similarity: score,
                });
        }

        let prior_knowledge = !merged.is_empty();

        let mut candidates: Vec<ScoredCandidate> = merged
            .into_values()
            .filter(|c| c.proposition.shares_entity_with(proposition))
            .collect();
        candidates.sort_by(|a, b| {
            b.similarity
                .partial_cmp(&a.similarity)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.proposition.id.cmp(&b.proposition.id))
        });
        candidates.truncate(self.top_k);

        Ok(GatherOutcome {
            candidates,
            prior_knowledge,
        })
    }
}

/// Canonical form for dedup comparison: lowercase, collapse whitespace,
/// strip trailing punctuation.
#[must_use]
pub fn canonical_text(text: &str) -> String {
    text.to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .trim_end_matches(['.', '!', '?', ',', ';', ':'])
        .to_string()
}
