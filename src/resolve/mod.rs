//! Escalating entity resolution.
//!
//! Maps suggested entity mentions to existing domain entities through a
//! chain of cheapest-first searchers, an optional agentic LLM searcher,
//! and a candidate bakeoff arbiter. When nothing matches, the creation
//! policy of the mention's type decides between [`EntityResolution::New`]
//! and [`EntityResolution::Vetoed`].
//!
//! Decorators compose around the core resolver:
//! [`KnownEntityResolver`] pins caller-supplied entities,
//! [`ChainedEntityResolver`] runs several resolvers in order, and
//! [`SessionEntityResolver`] deduplicates within a session from an LRU
//! cache.

mod agentic;
mod arbiter;
mod chained;
mod known;
mod labels;
mod names;
mod searchers;
mod session;

pub use agentic::AgenticSearcher;
pub use arbiter::CandidateArbiter;
pub use chained::ChainedEntityResolver;
pub use known::KnownEntityResolver;
pub use labels::labels_compatible;
pub use names::{fuzzy_name_match, name_tokens, normalize_name, normalized_equal, partial_name_match};
pub use searchers::{
    ByIdSearcher, EntitySearcher, ExactNameSearcher, FuzzyNameSearcher, NormalizedNameSearcher,
    PartialNameSearcher, SearchOutcome, VectorSearcher,
};
pub use session::SessionEntityResolver;

use crate::compress::ContextCompressor;
use crate::llm::LlmClient;
use crate::models::{DataDictionary, EntityId, EntityResolution, NamedEntity, SuggestedEntity};
use crate::storage::EntityRepository;
use crate::{Error, Result};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;
use tracing::instrument;

/// Configuration for the escalating resolver.
///
/// # Example
///
/// ```rust
/// use dice::resolve::ResolverConfig;
///
/// let config = ResolverConfig::default();
/// assert_eq!(config.min_part_length, 4);
/// assert!((config.auto_accept_threshold - 0.95).abs() < f32::EPSILON);
/// ```
#[derive(Debug, Clone)]
pub struct ResolverConfig {
    /// Minimum token length for the partial-name stage.
    pub min_part_length: usize,
    /// Levenshtein budget as a fraction of the shorter name.
    pub max_distance_ratio: f64,
    /// Names shorter than this never fuzzy-match.
    pub min_length_for_fuzzy: usize,
    /// Vector similarity at or above which a label-compatible top hit is
    /// accepted without arbitration.
    pub auto_accept_threshold: f32,
    /// Maximum candidates fetched per searcher stage.
    pub candidate_limit: usize,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            min_part_length: 4,
            max_distance_ratio: 0.2,
            min_length_for_fuzzy: 4,
            auto_accept_threshold: 0.95,
            candidate_limit: 8,
        }
    }
}

impl ResolverConfig {
    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] if a threshold is out of [0, 1]
    /// or a limit is zero.
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.auto_accept_threshold) {
            return Err(Error::InvalidConfig(format!(
                "auto_accept_threshold must be within [0, 1], got {}",
                self.auto_accept_threshold
            )));
        }
        if !(0.0..=1.0).contains(&self.max_distance_ratio) {
            return Err(Error::InvalidConfig(format!(
                "max_distance_ratio must be within [0, 1], got {}",
                self.max_distance_ratio
            )));
        }
        if self.candidate_limit == 0 {
            return Err(Error::InvalidConfig(
                "candidate_limit must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Per-call context for resolution.
#[derive(Debug, Clone, Default)]
pub struct ResolutionContext {
    /// Raw source text of the chunk the mentions came from; compressed
    /// into entity neighborhoods before it reaches the arbiter.
    pub source_text: Option<String>,
}

impl ResolutionContext {
    /// Creates a context carrying the chunk's source text.
    #[must_use]
    pub fn with_source_text(text: impl Into<String>) -> Self {
        Self {
            source_text: Some(text.into()),
        }
    }
}

/// Maps a batch of suggested entities to resolutions, preserving input
/// order.
pub trait EntityResolver: Send + Sync {
    /// Resolves the batch.
    ///
    /// # Errors
    ///
    /// Returns an error only on infrastructure failure; per-mention
    /// ambiguity is expressed through the resolution variants.
    fn resolve(
        &self,
        batch: &[SuggestedEntity],
        dictionary: &DataDictionary,
        context: &ResolutionContext,
    ) -> Result<Vec<EntityResolution>>;
}

/// The escalating resolver: cheapest-first searchers, optional agentic
/// stage, arbiter, then the creation policy.
pub struct EscalatingEntityResolver {
    searchers: Vec<Box<dyn EntitySearcher>>,
    arbiter: Option<CandidateArbiter>,
    compressor: ContextCompressor,
}

impl std::fmt::Debug for EscalatingEntityResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EscalatingEntityResolver").finish_non_exhaustive()
    }
}

impl EscalatingEntityResolver {
    /// Creates a resolver with the default searcher chain over the given
    /// entity repository.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] if the configuration is invalid.
    pub fn new(repository: Arc<dyn EntityRepository>, config: ResolverConfig) -> Result<Self> {
        config.validate()?;
        let searchers: Vec<Box<dyn EntitySearcher>> = vec![
            Box::new(ByIdSearcher::new(Arc::clone(&repository))),
            Box::new(ExactNameSearcher::new(Arc::clone(&repository), &config)),
            Box::new(NormalizedNameSearcher::new(Arc::clone(&repository), &config)),
            Box::new(PartialNameSearcher::new(Arc::clone(&repository), &config)),
            Box::new(FuzzyNameSearcher::new(Arc::clone(&repository), &config)),
            Box::new(VectorSearcher::new(repository, &config)),
        ];
        Ok(Self {
            searchers,
            arbiter: None,
            compressor: ContextCompressor::adaptive(),
        })
    }

    /// Appends the agentic LLM searcher to the chain.
    #[must_use]
    pub fn with_agentic(
        mut self,
        llm: Arc<dyn LlmClient>,
        repository: Arc<dyn EntityRepository>,
    ) -> Self {
        self.searchers.push(Box::new(AgenticSearcher::new(llm, repository)));
        self
    }

    /// Enables the candidate bakeoff arbiter.
    #[must_use]
    pub fn with_arbiter(mut self, llm: Arc<dyn LlmClient>) -> Self {
        self.arbiter = Some(CandidateArbiter::new(llm));
        self
    }

    /// Replaces the context compressor.
    #[must_use]
    pub fn with_compressor(mut self, compressor: ContextCompressor) -> Self {
        self.compressor = compressor;
        self
    }

    /// Replaces the searcher chain entirely. Intended for hosts with
    /// custom stages; order is escalation order.
    #[must_use]
    pub fn with_searchers(mut self, searchers: Vec<Box<dyn EntitySearcher>>) -> Self {
        self.searchers = searchers;
        self
    }

    /// Resolves one suggestion through the chain.
    fn resolve_one(
        &self,
        suggested: &SuggestedEntity,
        dictionary: &DataDictionary,
        context: &ResolutionContext,
    ) -> Result<EntityResolution> {
        let start = Instant::now();
        let mut candidates: Vec<NamedEntity> = Vec::new();
        let mut seen: HashSet<EntityId> = HashSet::new();

        for searcher in &self.searchers {
            let outcome = match searcher.search(suggested, dictionary) {
                Ok(outcome) => outcome,
                Err(e) => {
                    tracing::warn!(
                        searcher = searcher.name(),
                        mention = %suggested.name,
                        error = %e,
                        "Searcher failed, escalating"
                    );
                    metrics::counter!(
                        "resolver_searcher_failures_total",
                        "searcher" => searcher.name()
                    )
                    .increment(1);
                    continue;
                },
            };
            if let Some(matched) = outcome.confident {
                #[allow(clippy::cast_possible_truncation)]
                let duration_ms = start.elapsed().as_millis() as u64;
                tracing::debug!(
                    searcher = searcher.name(),
                    mention = %suggested.name,
                    entity_id = %matched.id,
                    duration_ms = duration_ms,
                    "Mention resolved"
                );
                metrics::counter!(
                    "resolver_matches_total",
                    "searcher" => searcher.name()
                )
                .increment(1);
                return Ok(EntityResolution::Existing {
                    suggested: suggested.clone(),
                    matched,
                });
            }
            for candidate in outcome.candidates {
                if seen.insert(candidate.id.clone()) {
                    candidates.push(candidate);
                }
            }
        }

        // Nothing was confident. Label-filter the accumulated candidates
        // and let the arbiter try.
        candidates.retain(|c| labels_compatible(&suggested.labels, &c.labels, dictionary));
        if let Some(arbiter) = &self.arbiter {
            if !candidates.is_empty() {
                let snippet = context
                    .source_text
                    .as_deref()
                    .map(|text| self.compressor.compress(text, &suggested.name));
                match arbiter.pick(suggested, &candidates, snippet.as_deref()) {
                    Ok(Some(index)) => {
                        metrics::counter!(
                            "resolver_matches_total",
                            "searcher" => "arbiter"
                        )
                        .increment(1);
                        return Ok(EntityResolution::Existing {
                            suggested: suggested.clone(),
                            matched: candidates.swap_remove(index),
                        });
                    },
                    Ok(None) => {},
                    Err(e) => {
                        tracing::warn!(
                            mention = %suggested.name,
                            error = %e,
                            "Arbiter failed, falling through to creation policy"
                        );
                    },
                }
            }
        }

        Ok(Self::apply_creation_policy(suggested, dictionary))
    }

    /// New or vetoed, per the mention's type labels.
    ///
    /// A mention is vetoed when any of its labels explicitly forbids
    /// creation; unlabelled and unknown types default to creatable.
    fn apply_creation_policy(
        suggested: &SuggestedEntity,
        dictionary: &DataDictionary,
    ) -> EntityResolution {
        let vetoed = suggested
            .labels
            .iter()
            .any(|label| !dictionary.creation_permitted(label));
        if vetoed {
            tracing::info!(
                mention = %suggested.name,
                labels = ?suggested.labels,
                "Mention vetoed: type forbids entity creation"
            );
            metrics::counter!("resolver_vetoes_total").increment(1);
            EntityResolution::Vetoed {
                suggested: suggested.clone(),
            }
        } else {
            EntityResolution::New {
                suggested: suggested.clone(),
            }
        }
    }
}

impl EntityResolver for EscalatingEntityResolver {
    #[instrument(skip_all, fields(operation = "resolve", batch_size = batch.len()))]
    fn resolve(
        &self,
        batch: &[SuggestedEntity],
        dictionary: &DataDictionary,
        context: &ResolutionContext,
    ) -> Result<Vec<EntityResolution>> {
        batch
            .iter()
            .map(|suggested| self.resolve_one(suggested, dictionary, context))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::HashEmbedder;
    use crate::models::TypeDescriptor;
    use crate::storage::MemoryEntityRepository;

    fn repository() -> Arc<MemoryEntityRepository> {
        let repo = MemoryEntityRepository::new(Arc::new(HashEmbedder::new()));
        repo.add(NamedEntity::new(
            "E1",
            "Johannes Brahms",
            vec!["Composer".to_string()],
        ));
        repo.add(NamedEntity::new(
            "E2",
            "Google",
            vec!["Company".to_string()],
        ));
        Arc::new(repo)
    }

    fn schema() -> DataDictionary {
        DataDictionary::from_types(vec![
            TypeDescriptor::new("Person"),
            TypeDescriptor::new("Composer").with_parents(vec!["Person".to_string()]),
            TypeDescriptor::new("Company"),
            TypeDescriptor::new("Customer").with_creation_permitted(false),
        ])
    }

    #[test]
    fn test_partial_name_resolves_without_llm() {
        let resolver =
            EscalatingEntityResolver::new(repository(), ResolverConfig::default()).unwrap();
        let batch = vec![SuggestedEntity::new("Brahms", vec!["Composer".to_string()])];
        let resolutions = resolver
            .resolve(&batch, &schema(), &ResolutionContext::default())
            .unwrap();
        assert_eq!(resolutions.len(), 1);
        assert_eq!(
            resolutions[0].entity_id(),
            Some(&EntityId::new("E1"))
        );
        assert!(matches!(resolutions[0], EntityResolution::Existing { .. }));
    }

    #[test]
    fn test_unknown_creatable_mention_is_new() {
        let resolver =
            EscalatingEntityResolver::new(repository(), ResolverConfig::default()).unwrap();
        let batch = vec![SuggestedEntity::new(
            "Clara Schumann",
            vec!["Composer".to_string()],
        )];
        let resolutions = resolver
            .resolve(&batch, &schema(), &ResolutionContext::default())
            .unwrap();
        assert!(matches!(resolutions[0], EntityResolution::New { .. }));
    }

    #[test]
    fn test_non_creatable_mention_is_vetoed() {
        let resolver =
            EscalatingEntityResolver::new(repository(), ResolverConfig::default()).unwrap();
        let batch = vec![SuggestedEntity::new(
            "Acme GmbH",
            vec!["Customer".to_string()],
        )];
        let resolutions = resolver
            .resolve(&batch, &schema(), &ResolutionContext::default())
            .unwrap();
        assert!(resolutions[0].is_vetoed());
    }

    #[test]
    fn test_order_preserved() {
        let resolver =
            EscalatingEntityResolver::new(repository(), ResolverConfig::default()).unwrap();
        let batch = vec![
            SuggestedEntity::new("Google", vec!["Company".to_string()]),
            SuggestedEntity::new("Someone New", vec!["Person".to_string()]),
            SuggestedEntity::new("Johannes Brahms", vec!["Composer".to_string()]),
        ];
        let resolutions = resolver
            .resolve(&batch, &schema(), &ResolutionContext::default())
            .unwrap();
        assert_eq!(resolutions[0].suggested().name, "Google");
        assert!(resolutions[0].is_terminal());
        assert!(matches!(resolutions[1], EntityResolution::New { .. }));
        assert!(resolutions[2].is_terminal());
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = ResolverConfig {
            auto_accept_threshold: 1.5,
            ..ResolverConfig::default()
        };
        assert!(matches!(
            EscalatingEntityResolver::new(repository(), config).unwrap_err(),
            Error::InvalidConfig(_)
        ));
    }
}
