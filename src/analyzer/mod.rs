//! Incremental windowed analysis.
//!
//! Turns a growing item sequence (a conversation, a document stream)
//! into overlapping windows, renders each window to text, deduplicates by
//! content hash and drives the pipeline for every new chunk, in order.
//! Failed chunks record their hash too, so a retry needs an explicit
//! history reset rather than happening by accident.

use crate::models::Chunk;
use crate::pipeline::{AnalysisContext, ChunkResult, PropositionPipeline};
use crate::storage::HistoryStore;
use crate::{Error, Result};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Windowing configuration.
///
/// Windows cover `[i, i + window_size)` and consecutive windows share
/// `overlap` items. The trigger fires after every `trigger_every` newly
/// appended items.
#[derive(Debug, Clone)]
pub struct AnalyzerConfig {
    /// Items per window.
    pub window_size: usize,
    /// Items shared between consecutive windows.
    pub overlap: usize,
    /// Appended items per trigger firing.
    pub trigger_every: usize,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            window_size: 12,
            overlap: 4,
            trigger_every: 1,
        }
    }
}

impl AnalyzerConfig {
    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] unless `window_size ≥ 1`,
    /// `overlap < window_size` and `1 ≤ trigger_every ≤ window_size`.
    pub fn validate(&self) -> Result<()> {
        if self.window_size == 0 {
            return Err(Error::InvalidConfig(
                "window_size must be at least 1".to_string(),
            ));
        }
        if self.overlap >= self.window_size {
            return Err(Error::InvalidConfig(format!(
                "overlap ({}) must be smaller than window_size ({})",
                self.overlap, self.window_size
            )));
        }
        if self.trigger_every == 0 || self.trigger_every > self.window_size {
            return Err(Error::InvalidConfig(format!(
                "trigger_every ({}) must be within [1, window_size]",
                self.trigger_every
            )));
        }
        Ok(())
    }

    /// Items between consecutive window starts.
    const fn stride(&self) -> usize {
        self.window_size - self.overlap
    }
}

/// Per-source windowing state.
#[derive(Debug, Default)]
struct SourceCursor {
    /// Items observed so far.
    observed: usize,
    /// Index of the next window to consider.
    next_window: usize,
    /// Items appended since the trigger last fired.
    pending: usize,
}

/// Renders one sequence item to its text representation.
type RenderFn<T> = Box<dyn Fn(&T) -> String + Send + Sync>;

/// Windows a growing sequence into chunks and drives the pipeline.
///
/// `T` is the item type; the render function turns one item into its
/// text representation (e.g. `"{speaker}: {message}"` for chat turns).
pub struct IncrementalAnalyzer<T> {
    config: AnalyzerConfig,
    pipeline: Arc<PropositionPipeline>,
    history: Arc<dyn HistoryStore>,
    render: RenderFn<T>,
    cursors: Mutex<HashMap<String, Arc<Mutex<SourceCursor>>>>,
}

impl<T> IncrementalAnalyzer<T> {
    /// Creates an analyzer.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] if the configuration is invalid.
    pub fn new(
        config: AnalyzerConfig,
        pipeline: Arc<PropositionPipeline>,
        history: Arc<dyn HistoryStore>,
        render: impl Fn(&T) -> String + Send + Sync + 'static,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            pipeline,
            history,
            render: Box::new(render),
            cursors: Mutex::new(HashMap::new()),
        })
    }

    fn cursor(&self, source_id: &str) -> Arc<Mutex<SourceCursor>> {
        let mut cursors = self
            .cursors
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        Arc::clone(cursors.entry(source_id.to_string()).or_default())
    }

    /// Observes the current state of a source sequence and processes all
    /// windows that became due.
    ///
    /// `items` is the full sequence so far; the analyzer tracks how much
    /// of it was already seen. Chunks are processed in window order;
    /// content hashes seen before (for this source) are skipped.
    ///
    /// # Errors
    ///
    /// Propagates pipeline failures. The failing chunk's hash is
    /// recorded first, so the failed window is not retried automatically
    /// on the next call.
    pub fn observe(
        &self,
        source_id: &str,
        items: &[T],
        context: &AnalysisContext,
    ) -> Result<Vec<ChunkResult>> {
        let cursor = self.cursor(source_id);
        let mut cursor = cursor
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);

        let appended = items.len().saturating_sub(cursor.observed);
        cursor.observed = items.len();
        cursor.pending += appended;
        if cursor.pending < self.config.trigger_every {
            return Ok(Vec::new());
        }
        cursor.pending = 0;

        let mut results = Vec::new();
        loop {
            let start = cursor.next_window * self.config.stride();
            let end = start + self.config.window_size;
            if end > items.len() {
                break;
            }
            cursor.next_window += 1;
            if let Some(result) = self.process_window(source_id, items, start, end, context)? {
                results.push(result);
            }
        }
        Ok(results)
    }

    /// Forces processing of the trailing partial window, if any.
    ///
    /// Useful when a source ends (conversation closed, document fully
    /// read) before its tail filled a whole window.
    ///
    /// # Errors
    ///
    /// Propagates pipeline failures like [`Self::observe`].
    pub fn flush(
        &self,
        source_id: &str,
        items: &[T],
        context: &AnalysisContext,
    ) -> Result<Option<ChunkResult>> {
        let cursor = self.cursor(source_id);
        let mut cursor = cursor
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        cursor.observed = items.len().max(cursor.observed);

        let start = cursor.next_window * self.config.stride();
        if start >= items.len() {
            return Ok(None);
        }
        self.process_window(source_id, items, start, items.len(), context)
    }

    /// Renders, dedups and processes one window. Returns `None` when the
    /// window's content was processed before.
    fn process_window(
        &self,
        source_id: &str,
        items: &[T],
        start: usize,
        end: usize,
        context: &AnalysisContext,
    ) -> Result<Option<ChunkResult>> {
        let text = items[start..end]
            .iter()
            .map(|item| (self.render)(item))
            .collect::<Vec<_>>()
            .join("\n");
        let chunk = Chunk::new(source_id, start, end, text);

        if self.history.was_processed(source_id, &chunk.content_hash)? {
            tracing::debug!(
                source_id = source_id,
                start = start,
                end = end,
                "Window content already processed, skipping"
            );
            metrics::counter!("analyzer_chunks_skipped_total").increment(1);
            return Ok(None);
        }

        match self.pipeline.process_chunk(&chunk, context) {
            Ok(result) => {
                self.history.record(source_id, &chunk)?;
                metrics::counter!("analyzer_chunks_processed_total").increment(1);
                Ok(Some(result))
            },
            Err(e) => {
                // Record the hash so the failed window is not retried
                // automatically.
                tracing::warn!(
                    source_id = source_id,
                    start = start,
                    end = end,
                    error = %e,
                    "Chunk processing failed"
                );
                metrics::counter!("analyzer_chunks_failed_total").increment(1);
                self.history.record(source_id, &chunk)?;
                Err(e)
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::HashEmbedder;
    use crate::extract::PropositionExtractor;
    use crate::models::{
        ContextId, DataDictionary, Mention, MentionRole, SuggestedProposition,
    };
    use crate::resolve::{EscalatingEntityResolver, ResolverConfig};
    use crate::revise::{ReviserConfig, ReviserService};
    use crate::storage::{
        MemoryEntityRepository, MemoryHistoryStore, MemoryPropositionRepository,
    };

    /// Extractor deriving one suggestion per chunk from its text.
    struct EchoExtractor;

    impl PropositionExtractor for EchoExtractor {
        fn extract(
            &self,
            chunk: &Chunk,
            _context_id: &ContextId,
        ) -> Result<Vec<SuggestedProposition>> {
            Ok(vec![
                SuggestedProposition::new(format!("Observed: {}", chunk.text)).with_mentions(
                    vec![Mention::new(
                        MentionRole::Subject,
                        "Narrator",
                        vec!["Person".to_string()],
                    )],
                ),
            ])
        }
    }

    fn analyzer(
        config: AnalyzerConfig,
    ) -> (
        IncrementalAnalyzer<String>,
        Arc<MemoryPropositionRepository>,
    ) {
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
        let pipeline = Arc::new(crate::pipeline::PropositionPipeline::new(
            Arc::new(EchoExtractor),
            resolver,
            reviser,
        ));
        let history = Arc::new(MemoryHistoryStore::new());
        let analyzer =
            IncrementalAnalyzer::new(config, pipeline, history, |item: &String| item.clone())
                .unwrap();
        (analyzer, repository)
    }

    fn turns(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("turn number {i}")).collect()
    }

    fn context() -> AnalysisContext {
        AnalysisContext::new("ctx", Arc::new(DataDictionary::new()))
    }

    #[test]
    fn test_no_chunk_before_first_window_fills() {
        let (analyzer, repository) = analyzer(AnalyzerConfig {
            window_size: 4,
            overlap: 1,
            trigger_every: 1,
        });
        let results = analyzer.observe("conv", &turns(3), &context()).unwrap();
        assert!(results.is_empty());
        assert!(repository.is_empty());
    }

    #[test]
    fn test_windows_advance_by_stride() {
        let (analyzer, _repository) = analyzer(AnalyzerConfig {
            window_size: 4,
            overlap: 1,
            trigger_every: 1,
        });
        // 7 items: windows [0,4) and [3,7) are complete.
        let results = analyzer.observe("conv", &turns(7), &context()).unwrap();
        assert_eq!(results.len(), 2);
    }

    #[test]
    fn test_reprocessing_same_items_is_idempotent() {
        let (analyzer, repository) = analyzer(AnalyzerConfig {
            window_size: 4,
            overlap: 1,
            trigger_every: 1,
        });
        let items = turns(4);
        let first = analyzer.observe("conv", &items, &context()).unwrap();
        assert_eq!(first.len(), 1);
        let count_after_first = repository.len();

        // A fresh analyzer over the same history store would also skip;
        // here the cursor plus the content hash both protect us.
        let second = analyzer.observe("conv", &items, &context()).unwrap();
        assert!(second.is_empty());
        assert_eq!(repository.len(), count_after_first);
    }

    #[test]
    fn test_content_hash_skips_across_cursor_reset() {
        let (analyzer, repository) = analyzer(AnalyzerConfig {
            window_size: 2,
            overlap: 0,
            trigger_every: 1,
        });
        let items = turns(2);
        analyzer.observe("conv", &items, &context()).unwrap();
        let stored = repository.len();

        // Same content under a fresh source cursor: the history store
        // still rejects it.
        let results = analyzer.observe("conv-2", &items, &context()).unwrap();
        assert_eq!(results.len(), 1); // different source id: processed
        assert!(repository.len() > stored);

        let again = analyzer.observe("conv-2", &items, &context());
        assert!(again.unwrap().is_empty());
    }

    #[test]
    fn test_trigger_batches_appends() {
        let (analyzer, _repository) = analyzer(AnalyzerConfig {
            window_size: 2,
            overlap: 0,
            trigger_every: 2,
        });
        let ctx = context();

        // One appended item: trigger has not fired yet.
        assert!(analyzer.observe("conv", &turns(2), &ctx).is_ok());
        let results = analyzer.observe("conv", &turns(3), &ctx).unwrap();
        assert!(results.is_empty());

        // Second appended item fires the trigger; both due windows run.
        let results = analyzer.observe("conv", &turns(4), &ctx).unwrap();
        assert_eq!(results.len(), 1);
    }

    #[test]
    fn test_flush_processes_partial_tail() {
        let (analyzer, _repository) = analyzer(AnalyzerConfig {
            window_size: 4,
            overlap: 0,
            trigger_every: 1,
        });
        let ctx = context();
        let items = turns(6);
        let results = analyzer.observe("conv", &items, &ctx).unwrap();
        assert_eq!(results.len(), 1); // [0,4)

        let tail = analyzer.flush("conv", &items, &ctx).unwrap();
        assert!(tail.is_some()); // [4,6)

        // Flushing again finds the same content and skips it.
        assert!(analyzer.flush("conv", &items, &ctx).unwrap().is_none());
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = AnalyzerConfig {
            window_size: 4,
            overlap: 4,
            trigger_every: 1,
        };
        assert!(config.validate().is_err());

        let config = AnalyzerConfig {
            window_size: 4,
            overlap: 0,
            trigger_every: 5,
        };
        assert!(config.validate().is_err());
    }
}
