//! Candidate bakeoff arbiter.
//!
//! When no searcher is confident, accumulated candidates go to an LLM
//! that either picks one or declines. Candidates are numbered with
//! integer indices local to the prompt; the response index is mapped back
//! after the call, so a hallucinated identifier can never select an
//! entity that was not offered.

use crate::Result;
use crate::llm::{LlmClient, parse_json_response};
use crate::models::{NamedEntity, SuggestedEntity};
use serde::Deserialize;
use std::sync::Arc;

/// System prompt for the bakeoff.
const ARBITER_SYSTEM_PROMPT: &str = r#"<role>
You match an entity mention from a conversation against a numbered list of
known entities.
</role>

<rules>
- Pick a candidate only when the mention clearly refers to it.
- Different people or organizations that merely share a name are NOT the
  same entity.
- When unsure, decline: a wrong link is worse than no link.
</rules>

<output>
Respond with JSON only:
{"choice": <candidate index or null>, "reason": "<one short sentence>"}
</output>"#;

#[derive(Debug, Deserialize)]
struct ArbiterResponse {
    choice: Option<usize>,
    #[serde(default)]
    reason: Option<String>,
}

/// LLM-driven selection among accumulated candidates.
pub struct CandidateArbiter {
    llm: Arc<dyn LlmClient>,
}

impl CandidateArbiter {
    /// Creates an arbiter over the given client.
    #[must_use]
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self { llm }
    }

    /// Picks one candidate or none.
    ///
    /// `context_snippet` is compressed source text around the mention;
    /// see [`crate::compress::ContextCompressor`].
    ///
    /// # Errors
    ///
    /// Returns an error if the LLM call fails or returns malformed JSON.
    /// Callers treat an error as "no pick" and fall through to the
    /// creation policy.
    pub fn pick(
        &self,
        suggested: &SuggestedEntity,
        candidates: &[NamedEntity],
        context_snippet: Option<&str>,
    ) -> Result<Option<usize>> {
        if candidates.is_empty() {
            return Ok(None);
        }

        let user = Self::render_request(suggested, candidates, context_snippet);
        let response = self.llm.complete_with_system(ARBITER_SYSTEM_PROMPT, &user)?;
        let parsed: ArbiterResponse = parse_json_response("arbiter_pick", &response)?;

        match parsed.choice {
            Some(index) if index < candidates.len() => {
                tracing::debug!(
                    mention = %suggested.name,
                    chosen = %candidates[index].name,
                    reason = parsed.reason.as_deref().unwrap_or(""),
                    "Arbiter picked a candidate"
                );
                Ok(Some(index))
            },
            Some(index) => {
                // Index outside the offered set: hallucinated, dropped.
                tracing::warn!(
                    mention = %suggested.name,
                    index = index,
                    offered = candidates.len(),
                    "Arbiter returned an out-of-range index, ignoring"
                );
                metrics::counter!("resolver_arbiter_invalid_index_total").increment(1);
                Ok(None)
            },
            None => Ok(None),
        }
    }

    fn render_request(
        suggested: &SuggestedEntity,
        candidates: &[NamedEntity],
        context_snippet: Option<&str>,
    ) -> String {
        let mut out = format!("Mention: {}\n", suggested.name);
        if !suggested.labels.is_empty() {
            out.push_str(&format!("Labels: {}\n", suggested.labels.join(", ")));
        }
        if let Some(summary) = &suggested.summary {
            out.push_str(&format!("Summary: {summary}\n"));
        }
        if let Some(snippet) = context_snippet {
            out.push_str(&format!("\nSource context:\n{snippet}\n"));
        }
        out.push_str("\nCandidates:\n");
        for (index, candidate) in candidates.iter().enumerate() {
            let labels = candidate.labels.join(", ");
            match &candidate.description {
                Some(description) => out.push_str(&format!(
                    "{index}. {} [{labels}] — {description}\n",
                    candidate.name
                )),
                None => out.push_str(&format!("{index}. {} [{labels}]\n", candidate.name)),
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;
    use std::sync::Mutex;

    struct ScriptedClient {
        response: Mutex<Option<String>>,
    }

    impl ScriptedClient {
        fn with(response: &str) -> Arc<Self> {
            Arc::new(Self {
                response: Mutex::new(Some(response.to_string())),
            })
        }
    }

    impl LlmClient for ScriptedClient {
        fn name(&self) -> &'static str {
            "scripted"
        }

        fn complete(&self, _prompt: &str) -> Result<String> {
            self.response
                .lock()
                .unwrap()
                .take()
                .ok_or_else(|| Error::Llm {
                    operation: "complete".to_string(),
                    cause: "no scripted response".to_string(),
                })
        }
    }

    fn candidates() -> Vec<NamedEntity> {
        vec![
            NamedEntity::new("E1", "Johannes Brahms", vec!["Composer".to_string()]),
            NamedEntity::new("E2", "Brahms Cafe", vec!["Place".to_string()]),
        ]
    }

    #[test]
    fn test_pick_maps_index_back() {
        let arbiter = CandidateArbiter::new(ScriptedClient::with(
            r#"{"choice": 0, "reason": "the composer"}"#,
        ));
        let suggested = SuggestedEntity::new("Brahms", vec!["Composer".to_string()]);
        let pick = arbiter.pick(&suggested, &candidates(), None).unwrap();
        assert_eq!(pick, Some(0));
    }

    #[test]
    fn test_pick_declines_with_null() {
        let arbiter = CandidateArbiter::new(ScriptedClient::with(
            r#"{"choice": null, "reason": "ambiguous"}"#,
        ));
        let suggested = SuggestedEntity::new("Brahms", vec![]);
        assert_eq!(arbiter.pick(&suggested, &candidates(), None).unwrap(), None);
    }

    #[test]
    fn test_out_of_range_index_is_dropped() {
        let arbiter =
            CandidateArbiter::new(ScriptedClient::with(r#"{"choice": 42, "reason": ""}"#));
        let suggested = SuggestedEntity::new("Brahms", vec![]);
        assert_eq!(arbiter.pick(&suggested, &candidates(), None).unwrap(), None);
    }

    #[test]
    fn test_empty_candidates_skip_llm() {
        let arbiter = CandidateArbiter::new(ScriptedClient::with("never called"));
        let suggested = SuggestedEntity::new("Brahms", vec![]);
        assert_eq!(arbiter.pick(&suggested, &[], None).unwrap(), None);
    }
}
