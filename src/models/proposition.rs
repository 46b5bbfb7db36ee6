//! Proposition types and identifiers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Process-wide decay rate constant, per day.
///
/// Effective confidence is `confidence * exp(-decay * DECAY_RATE_PER_DAY *
/// age_days)`. The value is `ln 2 / 15`, chosen so that a proposition with
/// `decay = 0.5` halves its effective confidence in about 30 days. Storage
/// and queries share this constant; it is the only process-wide tunable in
/// the confidence math.
pub const DECAY_RATE_PER_DAY: f64 = 0.046_209_812;

/// Unique identifier for a proposition.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PropositionId(String);

impl PropositionId {
    /// Creates a proposition ID from an existing value.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generates a fresh random proposition ID.
    #[must_use]
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// Returns the ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PropositionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for PropositionId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for PropositionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Opaque scope key isolating propositions (session, tenant).
///
/// Every query and every pipeline call is scoped by a context; propositions
/// never cross contexts.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContextId(String);

impl ContextId {
    /// Creates a context ID.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for ContextId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for ContextId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Opaque identifier of an external domain entity.
///
/// Dice does not own entity storage; it consumes and produces references.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(String);

impl EntityId {
    /// Creates an entity ID.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generates a fresh random entity ID.
    #[must_use]
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// Returns the ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for EntityId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for EntityId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Identifier of a source chunk, used for grounding.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChunkId(String);

impl ChunkId {
    /// Creates a chunk ID.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ChunkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for ChunkId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for ChunkId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Grammatical role of an entity mention within a proposition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MentionRole {
    /// The mention is the subject of the statement.
    Subject,
    /// The mention is the object of the statement.
    Object,
    /// Any other role.
    #[default]
    Other,
}

impl MentionRole {
    /// Returns the role as a string slice.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Subject => "subject",
            Self::Object => "object",
            Self::Other => "other",
        }
    }

    /// Parses a role from a string, case-insensitively.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "subject" => Some(Self::Subject),
            "object" => Some(Self::Object),
            "other" => Some(Self::Other),
            _ => None,
        }
    }
}

impl fmt::Display for MentionRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// An entity mention inside a proposition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mention {
    /// Role of the mention in the statement.
    pub role: MentionRole,
    /// Resolved entity ID; `None` until resolution succeeds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity_id: Option<EntityId>,
    /// Surface name as extracted.
    pub name: String,
    /// Type labels attached to the mention.
    #[serde(default)]
    pub labels: Vec<String>,
}

impl Mention {
    /// Creates an unresolved mention.
    #[must_use]
    pub fn new(role: MentionRole, name: impl Into<String>, labels: Vec<String>) -> Self {
        Self {
            role,
            entity_id: None,
            name: name.into(),
            labels,
        }
    }

    /// Returns a copy with the given resolved entity ID.
    #[must_use]
    pub fn with_entity_id(mut self, entity_id: EntityId) -> Self {
        self.entity_id = Some(entity_id);
        self
    }
}

/// Lifecycle status of a proposition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PropositionStatus {
    /// Live; returned by default queries.
    #[default]
    Active,
    /// Retired by explicit administrative action. Never returned unless a
    /// query opts in, but may still be cited by `source_ids`.
    Retired,
}

impl PropositionStatus {
    /// Returns the status as a string slice.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Retired => "retired",
        }
    }

    /// Parses a status from a string, case-insensitively.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "active" => Some(Self::Active),
            "retired" => Some(Self::Retired),
            _ => None,
        }
    }
}

impl fmt::Display for PropositionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The unit of memory: a typed, entity-linked, confidence-weighted
/// statement.
///
/// Propositions are born in the pipeline, mutated only by the reviser's
/// outcome transforms, and retired (never deleted) by explicit
/// administrative action.
///
/// # Invariants
///
/// - `reinforce_count` only ever grows for a given ID.
/// - Every entry of `source_ids` points to a proposition in the same
///   context with a strictly smaller `level` (enforced on upsert).
/// - `grounding` never shrinks on merge; sets union.
/// - `source_ids` is empty iff `level == 0`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Proposition {
    /// Stable opaque identifier, assigned on creation.
    pub id: PropositionId,
    /// Scope key; queries are always scoped by it.
    pub context_id: ContextId,
    /// Canonical natural-language statement.
    pub text: String,
    /// Ordered entity mentions.
    pub mentions: Vec<Mention>,
    /// Stored confidence in [0, 1].
    pub confidence: f64,
    /// Decay in [0, 1]; 0 = permanent, 1 = maximally transient.
    pub decay: f64,
    /// Creation timestamp.
    pub created: DateTime<Utc>,
    /// Last revision timestamp; the anchor for decay.
    pub revised: DateTime<Utc>,
    /// Source chunk identifiers that produced or reinforced this
    /// proposition. Never shrinks.
    pub grounding: BTreeSet<ChunkId>,
    /// Frequency signal incremented on merge and reinforce outcomes.
    pub reinforce_count: u32,
    /// Abstraction level; 0 = raw observation, ≥1 = synthesized.
    pub level: u32,
    /// Propositions this one abstracts; empty iff `level == 0`.
    pub source_ids: Vec<PropositionId>,
    /// Lifecycle status.
    pub status: PropositionStatus,
    /// Optional extractor justification.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
}

impl Proposition {
    /// Creates a fresh level-0 proposition in the given context.
    ///
    /// Confidence defaults to 1.0 and decay to 0.0; the pipeline overrides
    /// both from the extractor's suggestion.
    #[must_use]
    pub fn new(context_id: ContextId, text: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            id: PropositionId::generate(),
            context_id,
            text: text.into(),
            mentions: Vec::new(),
            confidence: 1.0,
            decay: 0.0,
            created: now,
            revised: now,
            grounding: BTreeSet::new(),
            reinforce_count: 0,
            level: 0,
            source_ids: Vec::new(),
            status: PropositionStatus::Active,
            reasoning: None,
        }
    }

    /// Computes the time-discounted confidence at `now`.
    ///
    /// `confidence * exp(-decay * k * age_days)` where `age_days` is the
    /// time since the last revision, floored at zero so clock skew cannot
    /// inflate confidence. Monotone non-increasing in age, monotone
    /// non-decreasing in stored confidence.
    #[must_use]
    pub fn effective_confidence(&self, now: DateTime<Utc>) -> f64 {
        let age_secs = (now - self.revised).num_seconds().max(0);
        #[allow(clippy::cast_precision_loss)]
        let age_days = age_secs as f64 / 86_400.0;
        self.confidence * (-self.decay * DECAY_RATE_PER_DAY * age_days).exp()
    }

    /// Returns true if the proposition is active.
    #[must_use]
    pub const fn is_active(&self) -> bool {
        matches!(self.status, PropositionStatus::Active)
    }

    /// Returns the resolved entity IDs of all mentions, in mention order.
    #[must_use]
    pub fn entity_ids(&self) -> Vec<EntityId> {
        self.mentions
            .iter()
            .filter_map(|m| m.entity_id.clone())
            .collect()
    }

    /// Returns true if any mention resolves to the given entity.
    #[must_use]
    pub fn mentions_entity(&self, entity_id: &EntityId) -> bool {
        self.mentions
            .iter()
            .any(|m| m.entity_id.as_ref() == Some(entity_id))
    }

    /// Returns true if this proposition shares at least one resolved
    /// entity with `other`.
    #[must_use]
    pub fn shares_entity_with(&self, other: &Self) -> bool {
        self.mentions
            .iter()
            .filter_map(|m| m.entity_id.as_ref())
            .any(|id| other.mentions_entity(id))
    }
}
