//! Extractor output: propositions suggested from a chunk.

use super::{Chunk, ContextId, Mention, Proposition};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A proposition proposed by the extractor, before entity resolution and
/// revision.
///
/// The serde shape matches what structured extraction prompts return, so
/// extractor implementations can deserialize LLM output directly into
/// this type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SuggestedProposition {
    /// Canonical natural-language statement.
    pub text: String,
    /// Entity mentions, unresolved.
    #[serde(default)]
    pub mentions: Vec<Mention>,
    /// Extractor confidence in [0, 1].
    #[serde(default = "default_confidence")]
    pub confidence: f64,
    /// Suggested decay in [0, 1].
    #[serde(default)]
    pub decay: f64,
    /// Optional extractor justification.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
}

const fn default_confidence() -> f64 {
    1.0
}

impl SuggestedProposition {
    /// Creates a suggestion from a statement.
    #[must_use]
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            mentions: Vec::new(),
            confidence: 1.0,
            decay: 0.0,
            reasoning: None,
        }
    }

    /// Sets the mentions.
    #[must_use]
    pub fn with_mentions(mut self, mentions: Vec<Mention>) -> Self {
        self.mentions = mentions;
        self
    }

    /// Sets the confidence.
    #[must_use]
    pub const fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = confidence;
        self
    }

    /// Sets the decay.
    #[must_use]
    pub const fn with_decay(mut self, decay: f64) -> Self {
        self.decay = decay;
        self
    }

    /// Sets the reasoning.
    #[must_use]
    pub fn with_reasoning(mut self, reasoning: impl Into<String>) -> Self {
        self.reasoning = Some(reasoning.into());
        self
    }

    /// Materializes the suggestion as a level-0 proposition grounded in
    /// the given chunk.
    ///
    /// Confidence and decay are clamped to [0, 1]; extractors are LLMs
    /// and occasionally wander out of range.
    #[must_use]
    pub fn into_proposition(
        self,
        context_id: ContextId,
        chunk: &Chunk,
        now: DateTime<Utc>,
    ) -> Proposition {
        let mut proposition = Proposition::new(context_id, self.text, now);
        proposition.mentions = self.mentions;
        proposition.confidence = self.confidence.clamp(0.0, 1.0);
        proposition.decay = self.decay.clamp(0.0, 1.0);
        proposition.grounding.insert(chunk.id());
        proposition.reasoning = self.reasoning;
        proposition
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{MentionRole, PropositionStatus};

    #[test]
    fn test_into_proposition_grounds_in_chunk() {
        let chunk = Chunk::new("conv-1", 0, 4, "Alice moved to Berlin");
        let suggestion = SuggestedProposition::new("Alice lives in Berlin")
            .with_mentions(vec![Mention::new(
                MentionRole::Subject,
                "Alice",
                vec!["Person".to_string()],
            )])
            .with_confidence(0.85)
            .with_decay(0.3);

        let proposition =
            suggestion.into_proposition(ContextId::new("ctx"), &chunk, Utc::now());

        assert_eq!(proposition.level, 0);
        assert_eq!(proposition.status, PropositionStatus::Active);
        assert!(proposition.grounding.contains(&chunk.id()));
        assert!((proposition.confidence - 0.85).abs() < f64::EPSILON);
        assert!((proposition.decay - 0.3).abs() < f64::EPSILON);
    }

    #[test]
    fn test_into_proposition_clamps_out_of_range() {
        let chunk = Chunk::new("conv-1", 0, 1, "text");
        let suggestion = SuggestedProposition::new("fact")
            .with_confidence(1.7)
            .with_decay(-0.2);
        let proposition = suggestion.into_proposition(ContextId::new("ctx"), &chunk, Utc::now());
        assert!((proposition.confidence - 1.0).abs() < f64::EPSILON);
        assert!(proposition.decay.abs() < f64::EPSILON);
    }

    #[test]
    fn test_deserializes_from_extractor_json() {
        let json = r#"{
            "text": "Alice works at Google",
            "mentions": [
                {"role": "SUBJECT", "name": "Alice", "labels": ["Person"]},
                {"role": "OBJECT", "name": "Google", "labels": ["Company"]}
            ],
            "confidence": 0.9
        }"#;
        let suggestion: SuggestedProposition = serde_json::from_str(json).unwrap();
        assert_eq!(suggestion.mentions.len(), 2);
        assert!((suggestion.decay).abs() < f64::EPSILON);
    }
}
