//! LLM client abstraction.
//!
//! The core never talks to a model provider directly; it consumes an
//! [`LlmClient`] supplied by the host. Structured use (classification,
//! arbitration, agentic search) goes through typed prompt builders in the
//! consuming modules plus the JSON extraction helpers here.
//!
//! # Usage
//!
//! ```rust,ignore
//! use dice::llm::LlmClient;
//!
//! let response = client.complete_with_system(
//!     "You classify statements.",
//!     "Is this a duplicate?",
//! )?;
//! ```

mod resilience;

pub use resilience::{LlmResilienceConfig, ResilientLlmClient};

use crate::{Error, Result};
use serde::de::DeserializeOwned;

/// Trait for LLM clients.
///
/// Implementations are expected to bound their own call duration; the
/// [`ResilientLlmClient`] wrapper adds retries and an overall deadline on
/// top.
pub trait LlmClient: Send + Sync {
    /// The client name, for logs and metrics.
    fn name(&self) -> &'static str;

    /// Generates a completion for the given prompt.
    ///
    /// # Errors
    ///
    /// Returns an error if the completion fails.
    fn complete(&self, prompt: &str) -> Result<String>;

    /// Generates a completion with a system prompt.
    ///
    /// Default implementation concatenates system and user prompts.
    /// Clients should override this to use native system prompt support.
    ///
    /// # Errors
    ///
    /// Returns an error if the completion fails.
    fn complete_with_system(&self, system: &str, user: &str) -> Result<String> {
        let combined = format!("{system}\n\n---\n\nUser message:\n{user}");
        self.complete(&combined)
    }
}

/// Extracts JSON from an LLM response, handling markdown code blocks.
///
/// # Handling
///
/// 1. Markdown code blocks with a `json` language marker
/// 2. Markdown code blocks without a language marker
/// 3. Raw JSON objects (first `{` to last `}`)
/// 4. JSON arrays (first `[` to last `]`)
///
/// Returns the trimmed input if no JSON shape is found.
#[must_use]
pub fn extract_json_from_response(response: &str) -> &str {
    let trimmed = response.trim();

    // Handle ```json ... ``` blocks
    if let Some((json_start, end)) = trimmed.find("```json").and_then(|start| {
        let json_start = start + 7;
        trimmed[json_start..]
            .find("```")
            .map(|end| (json_start, end))
    }) {
        return trimmed[json_start..json_start + end].trim();
    }

    // Handle ``` ... ``` blocks (without json marker)
    if let Some((json_start, end)) = trimmed.find("```").and_then(|start| {
        let content_start = start + 3;
        let after_marker = &trimmed[content_start..];
        let json_start = after_marker
            .find(['{', '['])
            .map_or(content_start, |pos| content_start + pos);
        trimmed[json_start..]
            .find("```")
            .map(|end| (json_start, end))
    }) {
        return trimmed[json_start..json_start + end].trim();
    }

    // Handle raw JSON (find first { to last })
    if let (Some(start), Some(end)) = (trimmed.find('{'), trimmed.rfind('}')) {
        if start < end {
            return &trimmed[start..=end];
        }
    }

    // Handle JSON arrays
    if let (Some(start), Some(end)) = (trimmed.find('['), trimmed.rfind(']')) {
        if start < end {
            return &trimmed[start..=end];
        }
    }

    trimmed
}

/// Deserializes a typed value out of an LLM response.
///
/// # Errors
///
/// Returns [`Error::Llm`] naming the operation when the response does not
/// contain valid JSON for the target type. The raw response is truncated
/// in the error message to keep logs bounded.
pub fn parse_json_response<T: DeserializeOwned>(operation: &str, response: &str) -> Result<T> {
    let json = extract_json_from_response(response);
    serde_json::from_str(json).map_err(|e| Error::Llm {
        operation: operation.to_string(),
        cause: format!("invalid JSON: {e}; response: {}", truncate(response, 200)),
    })
}

fn truncate(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        s.to_string()
    } else {
        let cut: String = s.chars().take(max_chars).collect();
        format!("{cut}…")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Verdict {
        label: String,
    }

    #[test]
    fn test_extract_from_json_fence() {
        let response = "Here you go:\n```json\n{\"label\": \"IDENTICAL\"}\n```\nDone.";
        assert_eq!(
            extract_json_from_response(response),
            "{\"label\": \"IDENTICAL\"}"
        );
    }

    #[test]
    fn test_extract_from_bare_fence() {
        let response = "```\n{\"label\": \"SIMILAR\"}\n```";
        assert_eq!(
            extract_json_from_response(response),
            "{\"label\": \"SIMILAR\"}"
        );
    }

    #[test]
    fn test_extract_raw_object() {
        let response = "The answer is {\"label\": \"UNRELATED\"} as requested";
        assert_eq!(
            extract_json_from_response(response),
            "{\"label\": \"UNRELATED\"}"
        );
    }

    #[test]
    fn test_extract_array() {
        let response = "[1, 2, 3]";
        assert_eq!(extract_json_from_response(response), "[1, 2, 3]");
    }

    #[test]
    fn test_parse_json_response_success() {
        let verdict: Verdict =
            parse_json_response("test", "```json\n{\"label\": \"IDENTICAL\"}\n```").unwrap();
        assert_eq!(verdict.label, "IDENTICAL");
    }

    #[test]
    fn test_parse_json_response_failure_names_operation() {
        let err = parse_json_response::<Verdict>("classify", "not json at all").unwrap_err();
        match err {
            Error::Llm { operation, .. } => assert_eq!(operation, "classify"),
            other => panic!("unexpected error: {other}"),
        }
    }
}
