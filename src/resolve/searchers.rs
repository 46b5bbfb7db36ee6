//! The escalating searcher chain.
//!
//! Each searcher is one escalation stage: cheapest first, each either
//! confident (ends the chain for that suggestion) or contributing
//! candidates for the arbiter. Searchers never veto; the orchestrator
//! applies the creation policy after the chain is exhausted.

use super::ResolverConfig;
use super::labels::labels_compatible;
use super::names::{fuzzy_name_match, normalized_equal, partial_name_match};
use crate::models::{DataDictionary, NamedEntity, SuggestedEntity};
use crate::Result;
use crate::storage::EntityRepository;
use std::sync::Arc;

/// Outcome of one searcher stage.
#[derive(Debug, Default)]
pub struct SearchOutcome {
    /// A confident match; ends the chain for this suggestion.
    pub confident: Option<NamedEntity>,
    /// Non-confident candidates, accumulated for the arbiter.
    pub candidates: Vec<NamedEntity>,
}

impl SearchOutcome {
    /// An outcome with neither a match nor candidates.
    #[must_use]
    pub fn none() -> Self {
        Self::default()
    }

    /// A confident outcome.
    #[must_use]
    pub fn confident(entity: NamedEntity) -> Self {
        Self {
            confident: Some(entity),
            candidates: Vec::new(),
        }
    }

    /// A candidates-only outcome.
    #[must_use]
    pub const fn with_candidates(candidates: Vec<NamedEntity>) -> Self {
        Self {
            confident: None,
            candidates,
        }
    }
}

/// One stage of the escalation chain.
pub trait EntitySearcher: Send + Sync {
    /// The searcher name, for logs and metrics.
    fn name(&self) -> &'static str;

    /// Searches for the suggested entity.
    ///
    /// # Errors
    ///
    /// Returns an error if the backing store fails. The orchestrator
    /// treats a failed stage as empty and escalates.
    fn search(
        &self,
        suggested: &SuggestedEntity,
        dictionary: &DataDictionary,
    ) -> Result<SearchOutcome>;
}

/// Stage 1: resolve by the ID the suggestion already carries.
pub struct ByIdSearcher {
    repository: Arc<dyn EntityRepository>,
}

impl ByIdSearcher {
    /// Creates the searcher.
    #[must_use]
    pub fn new(repository: Arc<dyn EntityRepository>) -> Self {
        Self { repository }
    }
}

impl EntitySearcher for ByIdSearcher {
    fn name(&self) -> &'static str {
        "by_id"
    }

    fn search(
        &self,
        suggested: &SuggestedEntity,
        _dictionary: &DataDictionary,
    ) -> Result<SearchOutcome> {
        let Some(id) = &suggested.id else {
            return Ok(SearchOutcome::none());
        };
        match self.repository.find_by_id(id)? {
            Some(entity) => Ok(SearchOutcome::confident(entity)),
            None => Ok(SearchOutcome::none()),
        }
    }
}

/// Shared shape of the name-based stages: fetch candidates by lexical
/// search, keep the ones the stage's predicate accepts, and be confident
/// only when exactly one label-compatible match survives.
fn search_by_name<F>(
    repository: &Arc<dyn EntityRepository>,
    suggested: &SuggestedEntity,
    dictionary: &DataDictionary,
    limit: usize,
    accepts: F,
) -> Result<SearchOutcome>
where
    F: Fn(&NamedEntity) -> bool,
{
    let found = repository.text_search(&suggested.name, None, limit)?;
    let mut matches: Vec<NamedEntity> = found.into_iter().filter(accepts).collect();
    let compatible: Vec<NamedEntity> = matches
        .iter()
        .filter(|e| labels_compatible(&suggested.labels, &e.labels, dictionary))
        .cloned()
        .collect();
    if compatible.len() == 1 {
        let mut compatible = compatible;
        return Ok(SearchOutcome::confident(compatible.remove(0)));
    }
    if !compatible.is_empty() {
        matches = compatible;
    }
    Ok(SearchOutcome::with_candidates(matches))
}

/// Stage 2: case-insensitive exact name equality.
pub struct ExactNameSearcher {
    repository: Arc<dyn EntityRepository>,
    limit: usize,
}

impl ExactNameSearcher {
    /// Creates the searcher.
    #[must_use]
    pub fn new(repository: Arc<dyn EntityRepository>, config: &ResolverConfig) -> Self {
        Self {
            repository,
            limit: config.candidate_limit,
        }
    }
}

impl EntitySearcher for ExactNameSearcher {
    fn name(&self) -> &'static str {
        "exact_name"
    }

    fn search(
        &self,
        suggested: &SuggestedEntity,
        dictionary: &DataDictionary,
    ) -> Result<SearchOutcome> {
        let name = suggested.name.clone();
        search_by_name(&self.repository, suggested, dictionary, self.limit, |e| {
            e.name.eq_ignore_ascii_case(&name)
        })
    }
}

/// Stage 3: equality on the normalized form (titles and suffixes
/// stripped).
pub struct NormalizedNameSearcher {
    repository: Arc<dyn EntityRepository>,
    limit: usize,
}

impl NormalizedNameSearcher {
    /// Creates the searcher.
    #[must_use]
    pub fn new(repository: Arc<dyn EntityRepository>, config: &ResolverConfig) -> Self {
        Self {
            repository,
            limit: config.candidate_limit,
        }
    }
}

impl EntitySearcher for NormalizedNameSearcher {
    fn name(&self) -> &'static str {
        "normalized_name"
    }

    fn search(
        &self,
        suggested: &SuggestedEntity,
        dictionary: &DataDictionary,
    ) -> Result<SearchOutcome> {
        let name = suggested.name.clone();
        search_by_name(&self.repository, suggested, dictionary, self.limit, |e| {
            normalized_equal(&e.name, &name)
        })
    }
}

/// Stage 4: single-token against multi-token partial name match.
pub struct PartialNameSearcher {
    repository: Arc<dyn EntityRepository>,
    min_part_length: usize,
    limit: usize,
}

impl PartialNameSearcher {
    /// Creates the searcher.
    #[must_use]
    pub fn new(repository: Arc<dyn EntityRepository>, config: &ResolverConfig) -> Self {
        Self {
            repository,
            min_part_length: config.min_part_length,
            limit: config.candidate_limit,
        }
    }
}

impl EntitySearcher for PartialNameSearcher {
    fn name(&self) -> &'static str {
        "partial_name"
    }

    fn search(
        &self,
        suggested: &SuggestedEntity,
        dictionary: &DataDictionary,
    ) -> Result<SearchOutcome> {
        let name = suggested.name.clone();
        let min_part_length = self.min_part_length;
        search_by_name(&self.repository, suggested, dictionary, self.limit, |e| {
            partial_name_match(&e.name, &name, min_part_length)
        })
    }
}

/// Stage 5: Levenshtein fuzzy match on normalized names.
pub struct FuzzyNameSearcher {
    repository: Arc<dyn EntityRepository>,
    max_distance_ratio: f64,
    min_length_for_fuzzy: usize,
    limit: usize,
}

impl FuzzyNameSearcher {
    /// Creates the searcher.
    #[must_use]
    pub fn new(repository: Arc<dyn EntityRepository>, config: &ResolverConfig) -> Self {
        Self {
            repository,
            max_distance_ratio: config.max_distance_ratio,
            min_length_for_fuzzy: config.min_length_for_fuzzy,
            limit: config.candidate_limit,
        }
    }
}

impl EntitySearcher for FuzzyNameSearcher {
    fn name(&self) -> &'static str {
        "fuzzy_name"
    }

    fn search(
        &self,
        suggested: &SuggestedEntity,
        dictionary: &DataDictionary,
    ) -> Result<SearchOutcome> {
        let name = suggested.name.clone();
        let ratio = self.max_distance_ratio;
        let min_length = self.min_length_for_fuzzy;
        search_by_name(&self.repository, suggested, dictionary, self.limit, |e| {
            fuzzy_name_match(&e.name, &name, ratio, min_length)
        })
    }
}

/// Stage 6: embedding similarity with an auto-accept threshold.
///
/// Auto-accepts iff the top score reaches the threshold **and** the
/// labels are compatible; everything else becomes candidates.
pub struct VectorSearcher {
    repository: Arc<dyn EntityRepository>,
    auto_accept_threshold: f32,
    limit: usize,
}

impl VectorSearcher {
    /// Creates the searcher.
    #[must_use]
    pub fn new(repository: Arc<dyn EntityRepository>, config: &ResolverConfig) -> Self {
        Self {
            repository,
            auto_accept_threshold: config.auto_accept_threshold,
            limit: config.candidate_limit,
        }
    }

    fn probe_text(suggested: &SuggestedEntity) -> String {
        match &suggested.summary {
            Some(summary) => format!("{} {summary}", suggested.name),
            None => suggested.name.clone(),
        }
    }
}

impl EntitySearcher for VectorSearcher {
    fn name(&self) -> &'static str {
        "vector"
    }

    fn search(
        &self,
        suggested: &SuggestedEntity,
        dictionary: &DataDictionary,
    ) -> Result<SearchOutcome> {
        let scored =
            self.repository
                .vector_search(&Self::probe_text(suggested), None, self.limit)?;
        if scored.is_empty() {
            return Ok(SearchOutcome::none());
        }
        let (top, top_score) = &scored[0];
        if *top_score >= self.auto_accept_threshold
            && labels_compatible(&suggested.labels, &top.labels, dictionary)
        {
            return Ok(SearchOutcome::confident(top.clone()));
        }
        Ok(SearchOutcome::with_candidates(
            scored.into_iter().map(|(e, _)| e).collect(),
        ))
    }
}
