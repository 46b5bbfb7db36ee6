//! LLM resilience wrapper with retries and a per-call deadline budget.
//!
//! Every LLM call in the core is a recoverable failure point: the reviser
//! degrades to insert-only and the resolver escalates past a failed
//! searcher. This wrapper keeps individual failures cheap by bounding the
//! retry budget instead of letting one slow provider stall a whole batch.

use super::LlmClient;
use crate::{Error, Result};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Resilience configuration for LLM calls.
///
/// # Environment Variables
///
/// | Variable | Type | Default | Description |
/// |----------|------|---------|-------------|
/// | `DICE_LLM_MAX_RETRIES` | u32 | `1` | Retries after the first failed attempt |
/// | `DICE_LLM_RETRY_BACKOFF_MS` | u64 | `200` | Backoff between attempts |
/// | `DICE_LLM_CALL_BUDGET_MS` | u64 | `30000` | Overall deadline across attempts |
#[derive(Debug, Clone)]
pub struct LlmResilienceConfig {
    /// Retries after the first failed attempt.
    pub max_retries: u32,
    /// Backoff between attempts in milliseconds.
    pub retry_backoff_ms: u64,
    /// Overall deadline across all attempts in milliseconds.
    ///
    /// The wrapped client is expected to bound a single call on its own;
    /// the budget stops further attempts once it is exhausted.
    pub call_budget_ms: u64,
}

impl Default for LlmResilienceConfig {
    fn default() -> Self {
        Self {
            max_retries: 1,
            retry_backoff_ms: 200,
            call_budget_ms: 30_000,
        }
    }
}

impl LlmResilienceConfig {
    /// Loads resilience configuration from environment variables,
    /// falling back to defaults for unset variables.
    #[must_use]
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(v) = std::env::var("DICE_LLM_MAX_RETRIES") {
            if let Ok(parsed) = v.parse::<u32>() {
                config.max_retries = parsed;
            }
        }
        if let Ok(v) = std::env::var("DICE_LLM_RETRY_BACKOFF_MS") {
            if let Ok(parsed) = v.parse::<u64>() {
                config.retry_backoff_ms = parsed;
            }
        }
        if let Ok(v) = std::env::var("DICE_LLM_CALL_BUDGET_MS") {
            if let Ok(parsed) = v.parse::<u64>() {
                config.call_budget_ms = parsed.max(1);
            }
        }
        config
    }
}

/// Wraps an [`LlmClient`] with retries and a deadline budget.
pub struct ResilientLlmClient {
    inner: Arc<dyn LlmClient>,
    config: LlmResilienceConfig,
}

impl ResilientLlmClient {
    /// Creates a resilient wrapper around the given client.
    #[must_use]
    pub fn new(inner: Arc<dyn LlmClient>, config: LlmResilienceConfig) -> Self {
        Self { inner, config }
    }

    /// Runs one operation with the retry/deadline policy.
    fn with_retries<F>(&self, operation: &str, mut call: F) -> Result<String>
    where
        F: FnMut() -> Result<String>,
    {
        let deadline = Instant::now() + Duration::from_millis(self.config.call_budget_ms);
        let mut last_error = None;

        for attempt in 0..=self.config.max_retries {
            if attempt > 0 {
                if Instant::now() >= deadline {
                    break;
                }
                std::thread::sleep(Duration::from_millis(self.config.retry_backoff_ms));
                tracing::debug!(
                    provider = self.inner.name(),
                    attempt = attempt,
                    "Retrying LLM call"
                );
                metrics::counter!("llm_retries_total", "provider" => self.inner.name())
                    .increment(1);
            }

            match call() {
                Ok(response) => {
                    #[allow(clippy::cast_possible_truncation)]
                    let remaining_ms =
                        deadline.saturating_duration_since(Instant::now()).as_millis() as u64;
                    tracing::trace!(
                        provider = self.inner.name(),
                        remaining_budget_ms = remaining_ms,
                        "LLM call succeeded"
                    );
                    return Ok(response);
                },
                Err(e) => {
                    tracing::warn!(
                        provider = self.inner.name(),
                        attempt = attempt,
                        error = %e,
                        "LLM call failed"
                    );
                    last_error = Some(e);
                },
            }
        }

        metrics::counter!("llm_failures_total", "provider" => self.inner.name()).increment(1);
        Err(last_error.unwrap_or_else(|| Error::Llm {
            operation: operation.to_string(),
            cause: "call budget exhausted before the first attempt".to_string(),
        }))
    }
}

impl LlmClient for ResilientLlmClient {
    fn name(&self) -> &'static str {
        "resilient"
    }

    fn complete(&self, prompt: &str) -> Result<String> {
        self.with_retries("complete", || self.inner.complete(prompt))
    }

    fn complete_with_system(&self, system: &str, user: &str) -> Result<String> {
        self.with_retries("complete_with_system", || {
            self.inner.complete_with_system(system, user)
        })
    }
}
