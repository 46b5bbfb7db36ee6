//! Entity references and resolution outcomes.

use super::{ChunkId, EntityId};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A reference to an external domain entity.
///
/// Dice consumes and produces these references; entity storage itself is
/// owned by the host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamedEntity {
    /// Opaque identifier in the host's entity store.
    pub id: EntityId,
    /// Primary name.
    pub name: String,
    /// Short description, if the host carries one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Type labels.
    #[serde(default)]
    pub labels: Vec<String>,
}

impl NamedEntity {
    /// Creates an entity reference.
    #[must_use]
    pub fn new(id: impl Into<EntityId>, name: impl Into<String>, labels: Vec<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: None,
            labels,
        }
    }

    /// Attaches a description.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// An entity mention proposed by the extractor, before resolution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SuggestedEntity {
    /// Type labels attached to the mention.
    #[serde(default)]
    pub labels: Vec<String>,
    /// Surface name as extracted.
    pub name: String,
    /// Short summary of the mention's context, if available.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    /// Known entity ID, when the extractor already carries one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<EntityId>,
    /// The chunk the mention came from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chunk_id: Option<ChunkId>,
}

impl SuggestedEntity {
    /// Creates a suggestion from a name and labels.
    #[must_use]
    pub fn new(name: impl Into<String>, labels: Vec<String>) -> Self {
        Self {
            labels,
            name: name.into(),
            summary: None,
            id: None,
            chunk_id: None,
        }
    }

    /// Attaches a context summary.
    #[must_use]
    pub fn with_summary(mut self, summary: impl Into<String>) -> Self {
        self.summary = Some(summary.into());
        self
    }

    /// Attaches a pre-known entity ID.
    #[must_use]
    pub fn with_id(mut self, id: EntityId) -> Self {
        self.id = Some(id);
        self
    }

    /// Attaches the originating chunk.
    #[must_use]
    pub fn with_chunk_id(mut self, chunk_id: ChunkId) -> Self {
        self.chunk_id = Some(chunk_id);
        self
    }
}

/// Outcome of resolving a suggested entity.
///
/// The chained resolver pattern-matches on the tag: `Existing` and
/// `ReferenceOnly` are terminal, `New` and `Vetoed` are provisional and
/// may be overridden by a later resolver in a chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntityResolution {
    /// Resolved to an existing entity.
    Existing {
        /// The input suggestion.
        suggested: SuggestedEntity,
        /// The matched entity.
        matched: NamedEntity,
    },
    /// No match found; creation is permitted.
    New {
        /// The input suggestion.
        suggested: SuggestedEntity,
    },
    /// No match found and the type forbids creation. The containing
    /// proposition is dropped from the batch.
    Vetoed {
        /// The input suggestion.
        suggested: SuggestedEntity,
    },
    /// Matched a caller-pinned known entity; must not be mutated
    /// downstream.
    ReferenceOnly {
        /// The input suggestion.
        suggested: SuggestedEntity,
        /// The pinned entity.
        matched: NamedEntity,
    },
}

impl EntityResolution {
    /// Returns the input suggestion.
    #[must_use]
    pub const fn suggested(&self) -> &SuggestedEntity {
        match self {
            Self::Existing { suggested, .. }
            | Self::New { suggested }
            | Self::Vetoed { suggested }
            | Self::ReferenceOnly { suggested, .. } => suggested,
        }
    }

    /// Returns the matched entity for `Existing` and `ReferenceOnly`.
    #[must_use]
    pub const fn matched(&self) -> Option<&NamedEntity> {
        match self {
            Self::Existing { matched, .. } | Self::ReferenceOnly { matched, .. } => Some(matched),
            Self::New { .. } | Self::Vetoed { .. } => None,
        }
    }

    /// Returns the resolved entity ID, if any.
    #[must_use]
    pub fn entity_id(&self) -> Option<&EntityId> {
        self.matched().map(|e| &e.id)
    }

    /// Returns true if the resolution is terminal for a chain.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Existing { .. } | Self::ReferenceOnly { .. })
    }

    /// Returns true if the mention was vetoed.
    #[must_use]
    pub const fn is_vetoed(&self) -> bool {
        matches!(self, Self::Vetoed { .. })
    }

    /// Returns the tag as a string slice, for logs and metrics.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Existing { .. } => "existing",
            Self::New { .. } => "new",
            Self::Vetoed { .. } => "vetoed",
            Self::ReferenceOnly { .. } => "reference_only",
        }
    }
}

impl fmt::Display for EntityResolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.matched() {
            Some(matched) => write!(f, "{} -> {} ({})", self.suggested().name, matched.id, self.kind()),
            None => write!(f, "{} ({})", self.suggested().name, self.kind()),
        }
    }
}
