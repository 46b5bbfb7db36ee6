//! The chunk pipeline: extract → resolve → revise → persist.
//!
//! One synchronous call per chunk. Within a context, calls are strictly
//! serialized — a context is the atomic unit of serialization and chunks
//! are processed FIFO. Different contexts may run in parallel.
//!
//! Cancellation is cooperative: the token is observed at suspension
//! points (before extraction, resolution, revision), never mid-transform,
//! and a cancelled chunk leaves the repository untouched because all
//! writes happen in the reviser's single terminal batch.

use crate::extract::PropositionExtractor;
use crate::models::{
    Chunk, ContextId, DataDictionary, EntityId, EntityResolution, Proposition, RevisionResult,
    SuggestedEntity, SuggestedProposition,
};
use crate::projection::ProjectionDispatcher;
use crate::resolve::{EntityResolver, ResolutionContext, normalize_name};
use crate::revise::ReviserService;
use crate::{Error, Result};
use chrono::Utc;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tracing::instrument;

/// Cooperative cancellation token.
///
/// Clones share the flag; any clone may cancel. Observed at suspension
/// points only.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    /// Creates a token in the not-cancelled state.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// Returns true if cancellation was requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Errors with [`Error::Cancelled`] if cancellation was requested.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Cancelled`] when the token is cancelled.
    pub fn checkpoint(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(Error::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Per-call analysis context.
#[derive(Clone)]
pub struct AnalysisContext {
    /// The scope all propositions of this call live in.
    pub context_id: ContextId,
    /// Domain type schema, read-only.
    pub dictionary: Arc<DataDictionary>,
    /// Cooperative cancellation token.
    pub cancellation: CancellationToken,
}

impl AnalysisContext {
    /// Creates a context with a fresh cancellation token.
    #[must_use]
    pub fn new(context_id: impl Into<ContextId>, dictionary: Arc<DataDictionary>) -> Self {
        Self {
            context_id: context_id.into(),
            dictionary,
            cancellation: CancellationToken::new(),
        }
    }
}

/// Result of processing one chunk.
#[derive(Debug)]
pub struct ChunkResult {
    /// The final written set: inserted propositions and transformed
    /// candidates.
    pub propositions: Vec<Proposition>,
    /// Per-proposition revision outcomes, in suggestion order after veto
    /// drops.
    pub revision_results: Vec<RevisionResult>,
}

/// Composes extract → resolve → revise → persist into one chunk-level
/// call.
pub struct PropositionPipeline {
    extractor: Arc<dyn PropositionExtractor>,
    resolver: Arc<dyn EntityResolver>,
    reviser: ReviserService,
    projections: ProjectionDispatcher,
    /// Per-context serialization gates. A context's gate is held for the
    /// whole `process_chunk` call.
    context_gates: Mutex<HashMap<ContextId, Arc<Mutex<()>>>>,
}

impl PropositionPipeline {
    /// Creates a pipeline.
    #[must_use]
    pub fn new(
        extractor: Arc<dyn PropositionExtractor>,
        resolver: Arc<dyn EntityResolver>,
        reviser: ReviserService,
    ) -> Self {
        Self {
            extractor,
            resolver,
            reviser,
            projections: ProjectionDispatcher::new(),
            context_gates: Mutex::new(HashMap::new()),
        }
    }

    /// Attaches a projection dispatcher.
    #[must_use]
    pub fn with_projections(mut self, projections: ProjectionDispatcher) -> Self {
        self.projections = projections;
        self
    }

    fn context_gate(&self, context_id: &ContextId) -> Arc<Mutex<()>> {
        let mut gates = self
            .context_gates
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        Arc::clone(gates.entry(context_id.clone()).or_default())
    }

    /// Processes one chunk: extract, resolve entities, drop vetoed
    /// propositions, revise against the store, persist, project.
    ///
    /// # Errors
    ///
    /// - [`Error::Extraction`]: the extractor failed; chunk dropped,
    ///   repository untouched.
    /// - [`Error::Persistence`]: the batch write failed; no partial
    ///   writes are visible.
    /// - [`Error::Cancelled`]: the caller cancelled at a suspension
    ///   point.
    #[instrument(
        skip_all,
        fields(
            operation = "process_chunk",
            context_id = %context.context_id,
            source_id = %chunk.source_id
        )
    )]
    pub fn process_chunk(&self, chunk: &Chunk, context: &AnalysisContext) -> Result<ChunkResult> {
        let gate = self.context_gate(&context.context_id);
        let _serialized = gate.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let start = Instant::now();

        context.cancellation.checkpoint()?;
        let suggestions = self
            .extractor
            .extract(chunk, &context.context_id)
            .map_err(|e| Error::Extraction {
                cause: e.to_string(),
            })?;
        if suggestions.is_empty() {
            tracing::debug!("Extractor produced no suggestions");
            return Ok(ChunkResult {
                propositions: Vec::new(),
                revision_results: Vec::new(),
            });
        }

        context.cancellation.checkpoint()?;
        let resolutions = self.resolve_mentions(&suggestions, chunk, context)?;
        let accepted = Self::rewrite_suggestions(suggestions, &resolutions);

        context.cancellation.checkpoint()?;
        let now = Utc::now();
        let proposed: Vec<Proposition> = accepted
            .into_iter()
            .map(|s| s.into_proposition(context.context_id.clone(), chunk, now))
            .collect();
        let batch = self.reviser.revise(proposed)?;

        self.projections.dispatch(&batch.written);

        #[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
        let duration_ms = start.elapsed().as_millis() as u64;
        tracing::info!(
            written = batch.written.len(),
            outcomes = batch.results.len(),
            duration_ms = duration_ms,
            "Chunk processed"
        );
        #[allow(clippy::cast_precision_loss)]
        metrics::histogram!("pipeline_chunk_duration_ms").record(duration_ms as f64);

        Ok(ChunkResult {
            propositions: batch.written,
            revision_results: batch.results,
        })
    }

    /// Resolves the chunk's mentions, deduplicated by normalized name,
    /// and returns the resolution per name.
    fn resolve_mentions(
        &self,
        suggestions: &[SuggestedProposition],
        chunk: &Chunk,
        context: &AnalysisContext,
    ) -> Result<HashMap<String, EntityResolution>> {
        let mut batch: Vec<SuggestedEntity> = Vec::new();
        let mut seen: HashMap<String, usize> = HashMap::new();
        for suggestion in suggestions {
            for mention in &suggestion.mentions {
                let key = normalize_name(&mention.name);
                if key.is_empty() {
                    continue;
                }
                match seen.get(&key) {
                    Some(&index) => {
                        // Same name mentioned again: union the labels.
                        for label in &mention.labels {
                            if !batch[index].labels.contains(label) {
                                batch[index].labels.push(label.clone());
                            }
                        }
                    },
                    None => {
                        seen.insert(key, batch.len());
                        let mut suggested =
                            SuggestedEntity::new(mention.name.clone(), mention.labels.clone())
                                .with_chunk_id(chunk.id());
                        if let Some(id) = &mention.entity_id {
                            suggested = suggested.with_id(id.clone());
                        }
                        batch.push(suggested);
                    },
                }
            }
        }
        if batch.is_empty() {
            return Ok(HashMap::new());
        }

        let resolution_context = ResolutionContext::with_source_text(chunk.text.clone());
        let resolutions =
            self.resolver
                .resolve(&batch, &context.dictionary, &resolution_context)?;

        Ok(resolutions
            .into_iter()
            .map(|resolution| (normalize_name(&resolution.suggested().name), resolution))
            .collect())
    }

    /// Rewrites suggestions with resolved entity IDs and drops any
    /// proposition containing a vetoed mention. New entities are given
    /// fresh IDs so propositions within the store link consistently;
    /// hosts observe them through the written mentions and own their
    /// materialization.
    fn rewrite_suggestions(
        suggestions: Vec<SuggestedProposition>,
        resolutions: &HashMap<String, EntityResolution>,
    ) -> Vec<SuggestedProposition> {
        let mut minted: HashMap<String, EntityId> = HashMap::new();
        let mut accepted = Vec::with_capacity(suggestions.len());

        'next_suggestion: for mut suggestion in suggestions {
            for mention in &suggestion.mentions {
                let key = normalize_name(&mention.name);
                if resolutions.get(&key).is_some_and(EntityResolution::is_vetoed) {
                    tracing::info!(
                        text = %suggestion.text,
                        mention = %mention.name,
                        "Dropping proposition: mention vetoed"
                    );
                    metrics::counter!("pipeline_vetoed_propositions_total").increment(1);
                    continue 'next_suggestion;
                }
            }
            for mention in &mut suggestion.mentions {
                let key = normalize_name(&mention.name);
                match resolutions.get(&key) {
                    Some(resolution) => {
                        if let Some(id) = resolution.entity_id() {
                            mention.entity_id = Some(id.clone());
                        } else {
                            let id = minted
                                .entry(key)
                                .or_insert_with(EntityId::generate)
                                .clone();
                            mention.entity_id = Some(id);
                        }
                    },
                    None => {},
                }
            }
            accepted.push(suggestion);
        }
        accepted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::HashEmbedder;
    use crate::models::{Mention, MentionRole, NamedEntity, TypeDescriptor};
    use crate::resolve::{EscalatingEntityResolver, ResolverConfig};
    use crate::revise::ReviserConfig;
    use crate::storage::{MemoryEntityRepository, MemoryPropositionRepository};

    /// Extractor returning a fixed set of suggestions.
    struct FixedExtractor {
        suggestions: Vec<SuggestedProposition>,
    }

    impl PropositionExtractor for FixedExtractor {
        fn extract(
            &self,
            _chunk: &Chunk,
            _context_id: &ContextId,
        ) -> Result<Vec<SuggestedProposition>> {
            Ok(self.suggestions.clone())
        }
    }

    /// Extractor that always fails.
    struct BrokenExtractor;

    impl PropositionExtractor for BrokenExtractor {
        fn extract(
            &self,
            _chunk: &Chunk,
            _context_id: &ContextId,
        ) -> Result<Vec<SuggestedProposition>> {
            Err(Error::Extraction {
                cause: "model unavailable".to_string(),
            })
        }
    }

    fn dictionary() -> Arc<DataDictionary> {
        Arc::new(DataDictionary::from_types(vec![
            TypeDescriptor::new("Person"),
            TypeDescriptor::new("Company"),
            TypeDescriptor::new("Customer").with_creation_permitted(false),
        ]))
    }

    fn pipeline_with(
        suggestions: Vec<SuggestedProposition>,
    ) -> (PropositionPipeline, Arc<MemoryPropositionRepository>) {
        let embedder = Arc::new(HashEmbedder::new());
        let repository = Arc::new(MemoryPropositionRepository::new(
            Arc::clone(&embedder) as _
        ));
        let entities = Arc::new(MemoryEntityRepository::new(Arc::clone(&embedder) as _));
        entities.add(NamedEntity::new(
            "E1",
            "Johannes Brahms",
            vec!["Person".to_string()],
        ));
        let resolver = Arc::new(
            EscalatingEntityResolver::new(entities as _, ResolverConfig::default()).unwrap(),
        );
        let reviser = ReviserService::without_llm(
            Arc::clone(&repository) as _,
            ReviserConfig::default(),
        )
        .unwrap();
        let pipeline =
            PropositionPipeline::new(Arc::new(FixedExtractor { suggestions }), resolver, reviser);
        (pipeline, repository)
    }

    fn suggestion(text: &str, name: &str, labels: &[&str]) -> SuggestedProposition {
        SuggestedProposition::new(text).with_mentions(vec![Mention::new(
            MentionRole::Subject,
            name,
            labels.iter().map(ToString::to_string).collect(),
        )])
    }

    #[test]
    fn test_process_chunk_resolves_and_persists() {
        let (pipeline, repository) = pipeline_with(vec![suggestion(
            "Brahms composed four symphonies",
            "Brahms",
            &["Person"],
        )]);
        let chunk = Chunk::new("conv-1", 0, 4, "…talking about Brahms…");
        let context = AnalysisContext::new("ctx", dictionary());

        let result = pipeline.process_chunk(&chunk, &context).unwrap();
        assert_eq!(result.propositions.len(), 1);
        assert_eq!(
            result.propositions[0].mentions[0].entity_id,
            Some(EntityId::new("E1"))
        );
        assert!(result.propositions[0].grounding.contains(&chunk.id()));
        assert_eq!(repository.len(), 1);
    }

    #[test]
    fn test_vetoed_mention_drops_proposition() {
        let (pipeline, repository) = pipeline_with(vec![
            suggestion("Acme owes an invoice", "Acme GmbH", &["Customer"]),
            suggestion("Brahms composed four symphonies", "Brahms", &["Person"]),
        ]);
        let chunk = Chunk::new("conv-1", 0, 4, "Acme and Brahms");
        let context = AnalysisContext::new("ctx", dictionary());

        let result = pipeline.process_chunk(&chunk, &context).unwrap();
        // The vetoed proposition is gone; no repository mutation for it.
        assert_eq!(result.propositions.len(), 1);
        assert!(result.propositions[0].text.contains("Brahms"));
        assert_eq!(repository.len(), 1);
    }

    #[test]
    fn test_new_entities_share_minted_id_within_chunk() {
        let (pipeline, _repository) = pipeline_with(vec![
            suggestion("Clara premiered the concerto", "Clara Schumann", &["Person"]),
            suggestion("Clara toured Europe", "Clara Schumann", &["Person"]),
        ]);
        let chunk = Chunk::new("conv-1", 0, 4, "Clara Schumann twice");
        let context = AnalysisContext::new("ctx", dictionary());

        let result = pipeline.process_chunk(&chunk, &context).unwrap();
        assert_eq!(result.propositions.len(), 2);
        let first = result.propositions[0].mentions[0].entity_id.clone().unwrap();
        let second = result.propositions[1].mentions[0].entity_id.clone().unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_extraction_failure_leaves_repo_untouched() {
        let embedder = Arc::new(HashEmbedder::new());
        let repository = Arc::new(MemoryPropositionRepository::new(
            Arc::clone(&embedder) as _
        ));
        let entities = Arc::new(MemoryEntityRepository::new(embedder as _));
        let resolver = Arc::new(
            EscalatingEntityResolver::new(entities as _, ResolverConfig::default()).unwrap(),
        );
        let reviser = ReviserService::without_llm(
            Arc::clone(&repository) as _,
            ReviserConfig::default(),
        )
        .unwrap();
        let pipeline = PropositionPipeline::new(Arc::new(BrokenExtractor), resolver, reviser);

        let chunk = Chunk::new("conv-1", 0, 4, "anything");
        let context = AnalysisContext::new("ctx", dictionary());
        let err = pipeline.process_chunk(&chunk, &context).unwrap_err();
        assert!(matches!(err, Error::Extraction { .. }));
        assert!(repository.is_empty());
    }

    #[test]
    fn test_cancellation_before_extraction() {
        let (pipeline, repository) = pipeline_with(vec![suggestion(
            "Brahms composed four symphonies",
            "Brahms",
            &["Person"],
        )]);
        let chunk = Chunk::new("conv-1", 0, 4, "text");
        let context = AnalysisContext::new("ctx", dictionary());
        context.cancellation.cancel();

        let err = pipeline.process_chunk(&chunk, &context).unwrap_err();
        assert!(matches!(err, Error::Cancelled));
        assert!(repository.is_empty());
    }
}
