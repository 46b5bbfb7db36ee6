//! The reviser service.
//!
//! Classifies each newly proposed proposition against existing ones and
//! applies the outcome transforms, with cost-tiered fast paths in front
//! of the LLM:
//!
//! 1. **Canonical dedup**: normalized-text equality, no LLM
//! 2. **Auto-merge**: embedding similarity at or above the threshold, no
//!    LLM
//! 3. **Batched classification**: one LLM call for everything else
//!
//! All writes are buffered and committed through a single terminal
//! `upsert_all`, so a chunk's batch is all-or-nothing.

use super::candidates::{CandidateGatherer, GatherOutcome, canonical_text};
use super::classify::{
    CandidateRef, ClassificationRequestItem, PairClassification, classify_batch,
};
use super::outcomes::{
    BatchState, abstract_over, apply_surprise, dampen, merge_into, reinforce,
};
use crate::llm::LlmClient;
use crate::models::{
    CandidateState, Proposition, PropositionId, RevisionLabel, RevisionResult,
};
use crate::storage::PropositionRepository;
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::instrument;

/// Configuration for the reviser.
///
/// # Example
///
/// ```rust
/// use dice::revise::ReviserConfig;
///
/// let config = ReviserConfig::default();
/// assert_eq!(config.top_k, 8);
/// assert!((config.auto_merge_threshold - 0.95).abs() < f32::EPSILON);
/// ```
#[derive(Debug, Clone)]
pub struct ReviserConfig {
    /// Maximum candidates gathered per new proposition.
    pub top_k: usize,
    /// Embedding similarity at or above which the top candidate is
    /// merged without classification. The boundary is inclusive: exactly
    /// the threshold triggers the merge.
    pub auto_merge_threshold: f32,
}

impl Default for ReviserConfig {
    fn default() -> Self {
        Self {
            top_k: 8,
            auto_merge_threshold: 0.95,
        }
    }
}

impl ReviserConfig {
    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] if the threshold is out of [0, 1]
    /// or `top_k` is zero.
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.auto_merge_threshold) {
            return Err(Error::InvalidConfig(format!(
                "auto_merge_threshold must be within [0, 1], got {}",
                self.auto_merge_threshold
            )));
        }
        if self.top_k == 0 {
            return Err(Error::InvalidConfig("top_k must be at least 1".to_string()));
        }
        Ok(())
    }
}

/// Result of revising one batch of new propositions.
#[derive(Debug)]
pub struct RevisionBatch {
    /// Every proposition written by the batch: inserted new propositions
    /// and transformed candidates.
    pub written: Vec<Proposition>,
    /// Per-input outcomes, in input order.
    pub results: Vec<RevisionResult>,
}

/// Per-item working state between gathering and outcome application.
struct ItemPlan {
    proposition: Proposition,
    gathered: GatherOutcome,
    /// Candidate index of a fast-path IDENTICAL, if any.
    fast_identical: Option<usize>,
    /// Validated LLM classifications for this item.
    classifications: Vec<PairClassification>,
}

/// Classifies new propositions against the repository and persists the
/// outcome transforms.
pub struct ReviserService {
    repository: Arc<dyn PropositionRepository>,
    llm: Option<Arc<dyn LlmClient>>,
    config: ReviserConfig,
}

impl std::fmt::Debug for ReviserService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReviserService").finish_non_exhaustive()
    }
}

impl ReviserService {
    /// Creates a reviser with LLM classification.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] if the configuration is invalid.
    pub fn new(
        repository: Arc<dyn PropositionRepository>,
        llm: Arc<dyn LlmClient>,
        config: ReviserConfig,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            repository,
            llm: Some(llm),
            config,
        })
    }

    /// Creates a reviser without an LLM.
    ///
    /// Fast paths still apply; everything else inserts as unrelated.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] if the configuration is invalid.
    pub fn without_llm(
        repository: Arc<dyn PropositionRepository>,
        config: ReviserConfig,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            repository,
            llm: None,
            config,
        })
    }

    /// Revises a batch of newly proposed propositions.
    ///
    /// Produces exactly one [`RevisionResult`] per input, in input order,
    /// and commits all writes through a single `upsert_all`.
    ///
    /// # Errors
    ///
    /// Returns an error on repository failure (the batch aborts with no
    /// partial writes). LLM failures never error: affected items degrade
    /// to unrelated insertions.
    #[instrument(skip_all, fields(operation = "revise", batch_size = new_propositions.len()))]
    pub fn revise(&self, new_propositions: Vec<Proposition>) -> Result<RevisionBatch> {
        if new_propositions.is_empty() {
            return Ok(RevisionBatch {
                written: Vec::new(),
                results: Vec::new(),
            });
        }

        let now = Utc::now();
        let gatherer =
            CandidateGatherer::new(Arc::clone(&self.repository), self.config.top_k);

        // Phase 1: gather candidates and short-circuit fast paths.
        let mut plans = Vec::with_capacity(new_propositions.len());
        for proposition in new_propositions {
            let gathered = gatherer.gather(&proposition)?;
            let fast_identical = self.detect_fast_path(&proposition, &gathered);
            plans.push(ItemPlan {
                proposition,
                gathered,
                fast_identical,
                classifications: Vec::new(),
            });
        }

        // Phase 2: one batched LLM call for everything that did not
        // short-circuit.
        self.classify_remaining(&mut plans);

        // Phase 3: outcome transforms under the one-shot state machine,
        // buffered into a single terminal write.
        let mut state = BatchState::new();
        let mut buffer = WriteBuffer::default();
        let mut results = Vec::with_capacity(plans.len());
        for plan in plans {
            let result = Self::apply_outcomes(plan, &mut state, &mut buffer, now);
            metrics::counter!("revision_outcomes_total", "outcome" => result.kind())
                .increment(1);
            results.push(result);
        }

        let written = buffer.into_vec();
        self.repository.upsert_all(&written)?;

        Ok(RevisionBatch { written, results })
    }

    /// Canonical dedup, then auto-merge on the top candidate.
    fn detect_fast_path(
        &self,
        proposition: &Proposition,
        gathered: &GatherOutcome,
    ) -> Option<usize> {
        let canonical = canonical_text(&proposition.text);
        if let Some(index) = gathered
            .candidates
            .iter()
            .position(|c| canonical_text(&c.proposition.text) == canonical)
        {
            tracing::debug!(
                proposition = %proposition.id,
                candidate = %gathered.candidates[index].proposition.id,
                "Canonical dedup fast path"
            );
            metrics::counter!("revision_fast_path_total", "path" => "canonical").increment(1);
            return Some(index);
        }
        match gathered.candidates.first() {
            Some(top) if top.similarity >= self.config.auto_merge_threshold => {
                tracing::debug!(
                    proposition = %proposition.id,
                    candidate = %top.proposition.id,
                    similarity = top.similarity,
                    "Auto-merge fast path"
                );
                metrics::counter!("revision_fast_path_total", "path" => "auto_merge")
                    .increment(1);
                Some(0)
            },
            _ => None,
        }
    }

    /// Sends the non-short-circuited items to the LLM and distributes the
    /// validated classifications back onto the plans. LLM failure leaves
    /// every queued item unclassified, which later degrades to an
    /// unrelated insertion.
    fn classify_remaining(&self, plans: &mut [ItemPlan]) {
        let Some(llm) = &self.llm else {
            return;
        };
        let request: Vec<ClassificationRequestItem> = plans
            .iter()
            .enumerate()
            .filter(|(_, plan)| {
                plan.fast_identical.is_none() && !plan.gathered.candidates.is_empty()
            })
            .map(|(index, plan)| ClassificationRequestItem {
                item: index,
                text: plan.proposition.text.clone(),
                candidates: plan
                    .gathered
                    .candidates
                    .iter()
                    .enumerate()
                    .map(|(candidate_index, candidate)| CandidateRef {
                        index: candidate_index,
                        text: candidate.proposition.text.clone(),
                    })
                    .collect(),
            })
            .collect();
        if request.is_empty() {
            return;
        }

        #[allow(clippy::cast_precision_loss)]
        metrics::histogram!("revision_classification_batch_size").record(request.len() as f64);

        match classify_batch(llm.as_ref(), &request) {
            Ok(pairs) => {
                for pair in pairs {
                    if let Some(plan) = plans.get_mut(pair.item) {
                        plan.classifications.push(pair);
                    }
                }
            },
            Err(e) => {
                // Recoverable: the batch continues with every remaining
                // item treated as unrelated.
                tracing::warn!(
                    error = %e,
                    items = request.len(),
                    "Classification failed; treating remaining items as unrelated"
                );
                metrics::counter!("revision_partial_total").increment(1);
            },
        }
    }

    /// Applies the outcome transforms for one item.
    ///
    /// Label precedence per item: the first appliable IDENTICAL merges;
    /// else the first appliable SIMILAR reinforces; else every
    /// CONTRADICTORY candidate is dampened and every GENERALIZES cite
    /// collected — cites make the item an abstraction, otherwise it
    /// inserts plainly. A candidate whose one-shot state is already taken
    /// blocks its transform, degrading the item toward insertion.
    fn apply_outcomes(
        plan: ItemPlan,
        state: &mut BatchState,
        buffer: &mut WriteBuffer,
        now: DateTime<Utc>,
    ) -> RevisionResult {
        let ItemPlan {
            mut proposition,
            gathered,
            fast_identical,
            classifications,
        } = plan;

        let labelled = |label: RevisionLabel| {
            classifications
                .iter()
                .filter(move |c| c.label == label)
                .filter_map(|c| c.candidate)
        };

        // IDENTICAL: merge into the first candidate still untouched.
        let identical_targets: Vec<usize> =
            fast_identical.into_iter().chain(labelled(RevisionLabel::Identical)).collect();
        for index in identical_targets {
            let candidate = &gathered.candidates[index].proposition;
            if state.try_transition(&candidate.id, CandidateState::Merged) {
                let mut merged = candidate.clone();
                merge_into(&mut merged, &proposition, now);
                let id = merged.id.clone();
                buffer.put(merged);
                return RevisionResult::MergedInto { candidate: id };
            }
        }

        // SIMILAR: reinforce; the new proposition is discarded.
        for index in labelled(RevisionLabel::Similar) {
            let candidate = &gathered.candidates[index].proposition;
            if state.try_transition(&candidate.id, CandidateState::Reinforced) {
                let mut reinforced = candidate.clone();
                reinforce(&mut reinforced, now);
                let id = reinforced.id.clone();
                buffer.put(reinforced);
                return RevisionResult::Reinforced { candidate: id };
            }
        }

        // CONTRADICTORY: dampen every contradicted candidate.
        let mut dampened: Vec<PropositionId> = Vec::new();
        for index in labelled(RevisionLabel::Contradictory) {
            let candidate = &gathered.candidates[index].proposition;
            if state.try_transition(&candidate.id, CandidateState::Dampened) {
                let mut suppressed = candidate.clone();
                dampen(&mut suppressed);
                dampened.push(suppressed.id.clone());
                buffer.put(suppressed);
            }
        }

        // GENERALIZES: collect citable sources.
        let mut sources: Vec<&Proposition> = Vec::new();
        for index in labelled(RevisionLabel::Generalizes) {
            let candidate = &gathered.candidates[index].proposition;
            if state.try_transition(&candidate.id, CandidateState::CitedAsSource) {
                sources.push(candidate);
            }
        }

        if !sources.is_empty() {
            abstract_over(&mut proposition, &sources);
            let id = proposition.id.clone();
            let cited = proposition.source_ids.clone();
            buffer.put(proposition);
            return RevisionResult::Abstracted { id, sources: cited };
        }

        if !dampened.is_empty() {
            let id = proposition.id.clone();
            buffer.put(proposition);
            return RevisionResult::Contradicted {
                dampened,
                inserted: id,
            };
        }

        // UNRELATED (explicit, degraded, or never classified): insert,
        // with surprise-prioritized retention when the context held prior
        // knowledge and none of it related.
        let surprise = gathered.prior_knowledge;
        if surprise {
            apply_surprise(&mut proposition);
        }
        let id = proposition.id.clone();
        buffer.put(proposition);
        RevisionResult::Inserted { id, surprise }
    }
}

/// Insertion-ordered write buffer keyed by proposition ID.
#[derive(Default)]
struct WriteBuffer {
    order: Vec<PropositionId>,
    rows: HashMap<PropositionId, Proposition>,
}

impl WriteBuffer {
    fn put(&mut self, proposition: Proposition) {
        if !self.rows.contains_key(&proposition.id) {
            self.order.push(proposition.id.clone());
        }
        self.rows.insert(proposition.id.clone(), proposition);
    }

    fn into_vec(mut self) -> Vec<Proposition> {
        self.order
            .into_iter()
            .filter_map(|id| self.rows.remove(&id))
            .collect()
    }
}
