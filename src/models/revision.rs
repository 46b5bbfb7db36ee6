//! Revision classification labels and outcomes.

use super::PropositionId;
use std::fmt;

/// Five-way classification of a new proposition against a candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RevisionLabel {
    /// Same fact as the candidate, reworded.
    Identical,
    /// Same entity, closely related fact.
    Similar,
    /// Directly conflicts with the candidate.
    Contradictory,
    /// Different topic.
    Unrelated,
    /// The new proposition is a higher-level abstraction of the candidate.
    Generalizes,
}

impl RevisionLabel {
    /// Returns the label as a string slice.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Identical => "IDENTICAL",
            Self::Similar => "SIMILAR",
            Self::Contradictory => "CONTRADICTORY",
            Self::Unrelated => "UNRELATED",
            Self::Generalizes => "GENERALIZES",
        }
    }

    /// Parses a label from LLM output, case-insensitively.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_uppercase().as_str() {
            "IDENTICAL" => Some(Self::Identical),
            "SIMILAR" => Some(Self::Similar),
            "CONTRADICTORY" => Some(Self::Contradictory),
            "UNRELATED" => Some(Self::Unrelated),
            "GENERALIZES" => Some(Self::Generalizes),
            _ => None,
        }
    }
}

impl fmt::Display for RevisionLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Per-batch state of an existing candidate proposition.
///
/// Transitions away from `Untouched` are one-shot within a single
/// classification batch: once a candidate has been merged, reinforced,
/// dampened or cited, no second transform may touch it in the same batch.
/// Re-citing an already cited candidate is the same state and stays legal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CandidateState {
    /// No transform applied yet.
    #[default]
    Untouched,
    /// A new proposition merged into this candidate.
    Merged,
    /// This candidate was reinforced by a similar proposition.
    Reinforced,
    /// This candidate was dampened by a contradiction.
    Dampened,
    /// This candidate was cited as the source of an abstraction.
    CitedAsSource,
}

impl CandidateState {
    /// Returns the state as a string slice.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Untouched => "untouched",
            Self::Merged => "merged",
            Self::Reinforced => "reinforced",
            Self::Dampened => "dampened",
            Self::CitedAsSource => "cited_as_source",
        }
    }
}

/// Final outcome of revising one new proposition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RevisionResult {
    /// The new proposition restated an existing fact and was merged into
    /// it; the new proposition itself was discarded.
    MergedInto {
        /// The candidate that absorbed the merge.
        candidate: PropositionId,
    },
    /// The new proposition reinforced a closely related candidate and was
    /// discarded.
    Reinforced {
        /// The reinforced candidate.
        candidate: PropositionId,
    },
    /// The new proposition contradicted existing knowledge; the
    /// contradicted candidates were dampened and the new proposition was
    /// inserted alongside them.
    Contradicted {
        /// Candidates whose confidence was suppressed.
        dampened: Vec<PropositionId>,
        /// The inserted proposition.
        inserted: PropositionId,
    },
    /// The new proposition was inserted as-is.
    Inserted {
        /// The inserted proposition.
        id: PropositionId,
        /// True when prior candidates existed but none related: the
        /// proposition was surprising and its decay was slowed.
        surprise: bool,
    },
    /// The new proposition was inserted as an abstraction over existing
    /// propositions.
    Abstracted {
        /// The inserted abstraction.
        id: PropositionId,
        /// The cited source propositions, retained unchanged.
        sources: Vec<PropositionId>,
    },
}

impl RevisionResult {
    /// Returns the outcome tag as a string slice, for logs and metrics.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::MergedInto { .. } => "merged",
            Self::Reinforced { .. } => "reinforced",
            Self::Contradicted { .. } => "contradicted",
            Self::Inserted { .. } => "inserted",
            Self::Abstracted { .. } => "abstracted",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_label_parse_roundtrip() {
        for label in [
            RevisionLabel::Identical,
            RevisionLabel::Similar,
            RevisionLabel::Contradictory,
            RevisionLabel::Unrelated,
            RevisionLabel::Generalizes,
        ] {
            assert_eq!(RevisionLabel::parse(label.as_str()), Some(label));
        }
        assert_eq!(
            RevisionLabel::parse(" generalizes "),
            Some(RevisionLabel::Generalizes)
        );
        assert_eq!(RevisionLabel::parse("SAME"), None);
    }

    #[test]
    fn test_result_kind() {
        let result = RevisionResult::Inserted {
            id: PropositionId::new("p1"),
            surprise: true,
        };
        assert_eq!(result.kind(), "inserted");
    }
}
