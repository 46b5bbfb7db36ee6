//! Projection dispatch boundary.
//!
//! After a chunk's batch commits, the written propositions are handed to
//! downstream sinks (graph stores, logic engines, vector projections —
//! all external). Sink failures are data-quality, not data-loss: they are
//! logged and absorbed, never allowed to fail the chunk whose batch has
//! already committed.

use crate::Result;
use crate::models::Proposition;
use std::sync::Arc;

/// A downstream consumer of written propositions.
pub trait ProjectionSink: Send + Sync {
    /// The sink name, for logs and metrics.
    fn name(&self) -> &'static str;

    /// Projects a batch of written propositions.
    ///
    /// # Errors
    ///
    /// Returns an error if projection fails; the dispatcher absorbs it.
    fn project(&self, propositions: &[Proposition]) -> Result<()>;
}

/// Fans written propositions out to registered sinks.
#[derive(Default)]
pub struct ProjectionDispatcher {
    sinks: Vec<Arc<dyn ProjectionSink>>,
}

impl ProjectionDispatcher {
    /// Creates a dispatcher with no sinks.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a sink.
    #[must_use]
    pub fn with_sink(mut self, sink: Arc<dyn ProjectionSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    /// Returns the number of registered sinks.
    #[must_use]
    pub fn sink_count(&self) -> usize {
        self.sinks.len()
    }

    /// Dispatches to every sink, absorbing per-sink failures.
    pub fn dispatch(&self, propositions: &[Proposition]) {
        if propositions.is_empty() {
            return;
        }
        for sink in &self.sinks {
            match sink.project(propositions) {
                Ok(()) => {
                    tracing::debug!(
                        sink = sink.name(),
                        count = propositions.len(),
                        "Projected propositions"
                    );
                },
                Err(e) => {
                    tracing::warn!(
                        sink = sink.name(),
                        error = %e,
                        "Projection sink failed, continuing"
                    );
                    metrics::counter!(
                        "projection_failures_total",
                        "sink" => sink.name()
                    )
                    .increment(1);
                },
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;
    use crate::models::{ContextId, Proposition};
    use chrono::Utc;
    use std::sync::Mutex;

    struct RecordingSink {
        seen: Mutex<usize>,
        fail: bool,
    }

    impl ProjectionSink for RecordingSink {
        fn name(&self) -> &'static str {
            "recording"
        }

        fn project(&self, propositions: &[Proposition]) -> Result<()> {
            *self.seen.lock().unwrap() += propositions.len();
            if self.fail {
                Err(Error::InvalidInput("sink exploded".to_string()))
            } else {
                Ok(())
            }
        }
    }

    #[test]
    fn test_dispatch_reaches_all_sinks_despite_failure() {
        let failing = Arc::new(RecordingSink {
            seen: Mutex::new(0),
            fail: true,
        });
        let healthy = Arc::new(RecordingSink {
            seen: Mutex::new(0),
            fail: false,
        });
        let dispatcher = ProjectionDispatcher::new()
            .with_sink(Arc::clone(&failing) as Arc<dyn ProjectionSink>)
            .with_sink(Arc::clone(&healthy) as Arc<dyn ProjectionSink>);

        let propositions = vec![Proposition::new(
            ContextId::new("ctx"),
            "Alice works at Google",
            Utc::now(),
        )];
        dispatcher.dispatch(&propositions);

        assert_eq!(*failing.seen.lock().unwrap(), 1);
        assert_eq!(*healthy.seen.lock().unwrap(), 1);
    }

    #[test]
    fn test_empty_batch_skips_sinks() {
        let sink = Arc::new(RecordingSink {
            seen: Mutex::new(0),
            fail: false,
        });
        let dispatcher =
            ProjectionDispatcher::new().with_sink(Arc::clone(&sink) as Arc<dyn ProjectionSink>);
        dispatcher.dispatch(&[]);
        assert_eq!(*sink.seen.lock().unwrap(), 0);
    }
}
