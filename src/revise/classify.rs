//! Batched five-way classification.
//!
//! All non-short-circuited propositions of a chunk go to the LLM in a
//! single call. Items and candidates are numbered with integer indices
//! local to the prompt; the response's indices are mapped back after the
//! call. An index outside the offered set is dropped, which is the whole
//! defense against hallucinated identifiers — the model physically cannot
//! name a proposition it was not shown.

use crate::llm::{LlmClient, parse_json_response};
use crate::models::RevisionLabel;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// System prompt for the classification batch.
const CLASSIFY_SYSTEM_PROMPT: &str = r#"<role>
You maintain an agent's long-term memory. New statements are compared
against existing memory entries.
</role>

<labels>
For each (item, candidate) pair, emit exactly one label:
- IDENTICAL: the item states the same fact as the candidate, reworded.
- SIMILAR: same entity, closely related fact, not the same fact.
- CONTRADICTORY: the item directly conflicts with the candidate.
- UNRELATED: different topic.
- GENERALIZES: the item is a higher-level abstraction summarizing the
  candidate.
</labels>

<rules>
- Judge every pair you are given; skip pairs you cannot judge.
- Use only the integer indices provided. Never invent indices.
- A fact with updated specifics (new age, new employer, new location)
  CONTRADICTS the old fact rather than restating it.
</rules>

<output>
Respond with JSON only:
{"classifications": [{"item": 0, "candidate": 0, "label": "IDENTICAL"}, ...]}
</output>"#;

/// One item of the classification request: a new proposition and its
/// numbered candidates.
#[derive(Debug, Serialize)]
pub struct ClassificationRequestItem {
    /// Prompt-local item index.
    pub item: usize,
    /// The new proposition's text.
    pub text: String,
    /// Prompt-local candidate indices with texts.
    pub candidates: Vec<CandidateRef>,
}

/// A numbered candidate in the request.
#[derive(Debug, Serialize)]
pub struct CandidateRef {
    /// Prompt-local candidate index.
    pub index: usize,
    /// The candidate's text.
    pub text: String,
}

#[derive(Debug, Deserialize)]
struct ClassificationResponse {
    classifications: Vec<RawClassification>,
}

#[derive(Debug, Deserialize)]
struct RawClassification {
    item: usize,
    #[serde(default)]
    candidate: Option<usize>,
    label: String,
}

/// One validated (item, candidate) classification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PairClassification {
    /// Prompt-local item index, already validated.
    pub item: usize,
    /// Prompt-local candidate index, validated against the item's
    /// candidate list. `None` only for UNRELATED.
    pub candidate: Option<usize>,
    /// The label.
    pub label: RevisionLabel,
}

/// Runs one batched classification call and validates the response.
///
/// Validation applies the failure semantics:
/// - an unknown label is dropped;
/// - an item index outside the request is dropped;
/// - a candidate index outside the item's candidate list is dropped;
/// - duplicate classifications for the same (item, candidate) keep the
///   first.
///
/// # Errors
///
/// Returns an error when the LLM call itself fails; the caller degrades
/// the whole remainder of the batch to UNRELATED.
pub fn classify_batch(
    llm: &dyn LlmClient,
    items: &[ClassificationRequestItem],
) -> Result<Vec<PairClassification>> {
    if items.is_empty() {
        return Ok(Vec::new());
    }

    let user = serde_json::to_string_pretty(&serde_json::json!({ "items": items })).map_err(
        |e| Error::Llm {
            operation: "classify_render".to_string(),
            cause: e.to_string(),
        },
    )?;
    let response = llm.complete_with_system(CLASSIFY_SYSTEM_PROMPT, &user)?;
    let parsed: ClassificationResponse = parse_json_response("classify_batch", &response)?;

    let mut seen: HashSet<(usize, Option<usize>)> = HashSet::new();
    let mut validated = Vec::new();
    for raw in parsed.classifications {
        let Some(label) = RevisionLabel::parse(&raw.label) else {
            tracing::warn!(label = %raw.label, "Unknown classification label, dropping");
            metrics::counter!("revision_invalid_classifications_total", "reason" => "label")
                .increment(1);
            continue;
        };
        let Some(request_item) = items.iter().find(|i| i.item == raw.item) else {
            tracing::warn!(item = raw.item, "Classification for unknown item index, dropping");
            metrics::counter!("revision_invalid_classifications_total", "reason" => "item_index")
                .increment(1);
            continue;
        };
        if let Some(candidate) = raw.candidate {
            if !request_item.candidates.iter().any(|c| c.index == candidate) {
                tracing::warn!(
                    item = raw.item,
                    candidate = candidate,
                    offered = request_item.candidates.len(),
                    "Classification cites an out-of-range candidate index, dropping"
                );
                metrics::counter!(
                    "revision_invalid_classifications_total",
                    "reason" => "candidate_index"
                )
                .increment(1);
                continue;
            }
        } else if label != RevisionLabel::Unrelated {
            tracing::warn!(
                item = raw.item,
                label = %label,
                "Classification without a candidate for a candidate-bound label, dropping"
            );
            metrics::counter!(
                "revision_invalid_classifications_total",
                "reason" => "missing_candidate"
            )
            .increment(1);
            continue;
        }
        if !seen.insert((raw.item, raw.candidate)) {
            // Duplicate for the same pair: first wins.
            continue;
        }
        validated.push(PairClassification {
            item: raw.item,
            candidate: raw.candidate,
            label,
        });
    }
    Ok(validated)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct ScriptedClient {
        response: Mutex<Option<String>>,
    }

    impl ScriptedClient {
        fn with(response: &str) -> Self {
            Self {
                response: Mutex::new(Some(response.to_string())),
            }
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

    fn request() -> Vec<ClassificationRequestItem> {
        vec![ClassificationRequestItem {
            item: 0,
            text: "Alice is 35".to_string(),
            candidates: vec![
                CandidateRef {
                    index: 0,
                    text: "Alice is 30".to_string(),
                },
                CandidateRef {
                    index: 1,
                    text: "Alice lives in Berlin".to_string(),
                },
            ],
        }]
    }

    #[test]
    fn test_valid_classification_passes() {
        let llm = ScriptedClient::with(
            r#"{"classifications": [{"item": 0, "candidate": 0, "label": "CONTRADICTORY"}]}"#,
        );
        let result = classify_batch(&llm, &request()).unwrap();
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].label, RevisionLabel::Contradictory);
        assert_eq!(result[0].candidate, Some(0));
    }

    #[test]
    fn test_out_of_range_candidate_dropped() {
        let llm = ScriptedClient::with(
            r#"{"classifications": [{"item": 0, "candidate": 42, "label": "IDENTICAL"}]}"#,
        );
        let result = classify_batch(&llm, &request()).unwrap();
        assert!(result.is_empty());
    }

    #[test]
    fn test_out_of_range_item_dropped() {
        let llm = ScriptedClient::with(
            r#"{"classifications": [{"item": 9, "candidate": 0, "label": "IDENTICAL"}]}"#,
        );
        let result = classify_batch(&llm, &request()).unwrap();
        assert!(result.is_empty());
    }

    #[test]
    fn test_duplicate_pair_keeps_first() {
        let llm = ScriptedClient::with(
            r#"{"classifications": [
                {"item": 0, "candidate": 0, "label": "SIMILAR"},
                {"item": 0, "candidate": 0, "label": "CONTRADICTORY"}
            ]}"#,
        );
        let result = classify_batch(&llm, &request()).unwrap();
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].label, RevisionLabel::Similar);
    }

    #[test]
    fn test_unknown_label_dropped() {
        let llm = ScriptedClient::with(
            r#"{"classifications": [{"item": 0, "candidate": 0, "label": "SAMEISH"}]}"#,
        );
        assert!(classify_batch(&llm, &request()).unwrap().is_empty());
    }

    #[test]
    fn test_llm_failure_propagates() {
        let llm = ScriptedClient {
            response: Mutex::new(None),
        };
        assert!(classify_batch(&llm, &request()).is_err());
    }

    #[test]
    fn test_empty_request_skips_llm() {
        let llm = ScriptedClient {
            response: Mutex::new(None),
        };
        assert!(classify_batch(&llm, &[]).unwrap().is_empty());
    }
}
