//! Proposition query types and filters.
//!
//! Filters combine conjunctively. Queries are built through
//! [`PropositionQueryBuilder`], which validates thresholds and limits at
//! build time so repositories never see an out-of-range query.

use super::{ContextId, EntityId, Proposition, PropositionStatus};
use crate::{Error, Result};
use chrono::{DateTime, Utc};

/// Result ordering for proposition queries.
///
/// Ties are broken by ascending proposition ID so ordering is stable under
/// a given snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum QueryOrder {
    /// Highest effective confidence first (computed at query time).
    #[default]
    EffectiveConfidenceDesc,
    /// Most recently created first.
    CreatedDesc,
    /// Most recently revised first.
    RevisedDesc,
    /// Most reinforced first.
    ReinforceCountDesc,
}

impl QueryOrder {
    /// Returns the ordering as a string slice.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::EffectiveConfidenceDesc => "effective_confidence_desc",
            Self::CreatedDesc => "created_desc",
            Self::RevisedDesc => "revised_desc",
            Self::ReinforceCountDesc => "reinforce_count_desc",
        }
    }
}

/// A validated, immutable proposition query.
///
/// Construct through [`PropositionQuery::for_context`]. All filters are
/// conjunctive; `context_id` is mandatory and `status` defaults to
/// [`PropositionStatus::Active`], so retired propositions are never
/// returned unless a query opts in.
#[derive(Debug, Clone)]
pub struct PropositionQuery {
    /// Mandatory scope.
    pub context_id: ContextId,
    /// Mention with exactly this entity ID.
    pub entity_id: Option<EntityId>,
    /// Mention with any of these entity IDs.
    pub any_entity_ids: Vec<EntityId>,
    /// Mentions covering all of these entity IDs.
    pub all_entity_ids: Vec<EntityId>,
    /// Lower bound on effective confidence, computed at query time.
    pub min_effective_confidence: Option<f64>,
    /// Status filter.
    pub status: PropositionStatus,
    /// Inclusive lower bound on abstraction level.
    pub min_level: Option<u32>,
    /// Inclusive upper bound on abstraction level.
    pub max_level: Option<u32>,
    /// Lower bound on reinforce count.
    pub min_reinforce_count: Option<u32>,
    /// Lower bound on creation timestamp.
    pub created_since: Option<DateTime<Utc>>,
    /// Lower bound on revision timestamp.
    pub revised_since: Option<DateTime<Utc>>,
    /// Maximum number of results.
    pub limit: Option<usize>,
    /// Result ordering.
    pub order_by: QueryOrder,
}

impl PropositionQuery {
    /// Starts a builder for the given context.
    #[must_use]
    pub fn for_context(context_id: impl Into<ContextId>) -> PropositionQueryBuilder {
        PropositionQueryBuilder::new(context_id.into())
    }

    /// Returns true if the proposition passes every filter.
    ///
    /// `now` anchors the effective-confidence computation so that a whole
    /// query evaluates against a single instant.
    #[must_use]
    pub fn matches(&self, proposition: &Proposition, now: DateTime<Utc>) -> bool {
        if proposition.context_id != self.context_id {
            return false;
        }
        if proposition.status != self.status {
            return false;
        }
        if let Some(entity_id) = &self.entity_id {
            if !proposition.mentions_entity(entity_id) {
                return false;
            }
        }
        if !self.any_entity_ids.is_empty()
            && !self
                .any_entity_ids
                .iter()
                .any(|id| proposition.mentions_entity(id))
        {
            return false;
        }
        if !self
            .all_entity_ids
            .iter()
            .all(|id| proposition.mentions_entity(id))
        {
            return false;
        }
        if let Some(min) = self.min_effective_confidence {
            if proposition.effective_confidence(now) < min {
                return false;
            }
        }
        if let Some(min) = self.min_level {
            if proposition.level < min {
                return false;
            }
        }
        if let Some(max) = self.max_level {
            if proposition.level > max {
                return false;
            }
        }
        if let Some(min) = self.min_reinforce_count {
            if proposition.reinforce_count < min {
                return false;
            }
        }
        if let Some(since) = self.created_since {
            if proposition.created < since {
                return false;
            }
        }
        if let Some(since) = self.revised_since {
            if proposition.revised < since {
                return false;
            }
        }
        true
    }

    /// Sorts matching propositions by the configured order and applies the
    /// limit. Ties break by ascending ID.
    #[must_use]
    pub fn sort_and_truncate(
        &self,
        mut propositions: Vec<Proposition>,
        now: DateTime<Utc>,
    ) -> Vec<Proposition> {
        match self.order_by {
            QueryOrder::EffectiveConfidenceDesc => {
                propositions.sort_by(|a, b| {
                    b.effective_confidence(now)
                        .partial_cmp(&a.effective_confidence(now))
                        .unwrap_or(std::cmp::Ordering::Equal)
                        .then_with(|| a.id.cmp(&b.id))
                });
            },
            QueryOrder::CreatedDesc => {
                propositions.sort_by(|a, b| b.created.cmp(&a.created).then_with(|| a.id.cmp(&b.id)));
            },
            QueryOrder::RevisedDesc => {
                propositions.sort_by(|a, b| b.revised.cmp(&a.revised).then_with(|| a.id.cmp(&b.id)));
            },
            QueryOrder::ReinforceCountDesc => {
                propositions.sort_by(|a, b| {
                    b.reinforce_count
                        .cmp(&a.reinforce_count)
                        .then_with(|| a.id.cmp(&b.id))
                });
            },
        }
        if let Some(limit) = self.limit {
            propositions.truncate(limit);
        }
        propositions
    }
}

/// Fluent builder for [`PropositionQuery`].
///
/// # Example
///
/// ```rust
/// use dice::models::{PropositionQuery, QueryOrder};
///
/// let query = PropositionQuery::for_context("session-1")
///     .with_min_effective_confidence(0.3)
///     .with_max_level(0)
///     .with_limit(20)
///     .with_order(QueryOrder::RevisedDesc)
///     .build()
///     .expect("valid query");
/// assert_eq!(query.limit, Some(20));
/// ```
#[derive(Debug, Clone)]
pub struct PropositionQueryBuilder {
    context_id: ContextId,
    entity_id: Option<EntityId>,
    any_entity_ids: Vec<EntityId>,
    all_entity_ids: Vec<EntityId>,
    min_effective_confidence: Option<f64>,
    status: PropositionStatus,
    min_level: Option<u32>,
    max_level: Option<u32>,
    min_reinforce_count: Option<u32>,
    created_since: Option<DateTime<Utc>>,
    revised_since: Option<DateTime<Utc>>,
    limit: Option<usize>,
    order_by: QueryOrder,
}

impl PropositionQueryBuilder {
    /// Creates a builder with default filters for the given context.
    #[must_use]
    pub const fn new(context_id: ContextId) -> Self {
        Self {
            context_id,
            entity_id: None,
            any_entity_ids: Vec::new(),
            all_entity_ids: Vec::new(),
            min_effective_confidence: None,
            status: PropositionStatus::Active,
            min_level: None,
            max_level: None,
            min_reinforce_count: None,
            created_since: None,
            revised_since: None,
            limit: None,
            order_by: QueryOrder::EffectiveConfidenceDesc,
        }
    }

    /// Requires a mention with exactly this entity ID.
    #[must_use]
    pub fn with_entity_id(mut self, entity_id: EntityId) -> Self {
        self.entity_id = Some(entity_id);
        self
    }

    /// Requires a mention with any of the given entity IDs.
    #[must_use]
    pub fn with_any_entity_ids(mut self, entity_ids: Vec<EntityId>) -> Self {
        self.any_entity_ids = entity_ids;
        self
    }

    /// Requires mentions covering all of the given entity IDs.
    #[must_use]
    pub fn with_all_entity_ids(mut self, entity_ids: Vec<EntityId>) -> Self {
        self.all_entity_ids = entity_ids;
        self
    }

    /// Sets the effective-confidence floor.
    #[must_use]
    pub const fn with_min_effective_confidence(mut self, min: f64) -> Self {
        self.min_effective_confidence = Some(min);
        self
    }

    /// Opts in to a non-default status.
    #[must_use]
    pub const fn with_status(mut self, status: PropositionStatus) -> Self {
        self.status = status;
        self
    }

    /// Sets the inclusive lower level bound.
    #[must_use]
    pub const fn with_min_level(mut self, level: u32) -> Self {
        self.min_level = Some(level);
        self
    }

    /// Sets the inclusive upper level bound.
    #[must_use]
    pub const fn with_max_level(mut self, level: u32) -> Self {
        self.max_level = Some(level);
        self
    }

    /// Sets the reinforce-count floor.
    #[must_use]
    pub const fn with_min_reinforce_count(mut self, count: u32) -> Self {
        self.min_reinforce_count = Some(count);
        self
    }

    /// Only propositions created at or after the given instant.
    #[must_use]
    pub const fn with_created_since(mut self, since: DateTime<Utc>) -> Self {
        self.created_since = Some(since);
        self
    }

    /// Only propositions revised at or after the given instant.
    #[must_use]
    pub const fn with_revised_since(mut self, since: DateTime<Utc>) -> Self {
        self.revised_since = Some(since);
        self
    }

    /// Caps the number of results.
    #[must_use]
    pub const fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Sets the result ordering.
    #[must_use]
    pub const fn with_order(mut self, order: QueryOrder) -> Self {
        self.order_by = order;
        self
    }

    /// Validates and finalizes the query.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] if `min_effective_confidence` is
    /// outside [0, 1] or `limit` is zero.
    pub fn build(self) -> Result<PropositionQuery> {
        if let Some(min) = self.min_effective_confidence {
            if !(0.0..=1.0).contains(&min) {
                return Err(Error::InvalidConfig(format!(
                    "min_effective_confidence must be within [0, 1], got {min}"
                )));
            }
        }
        if self.limit == Some(0) {
            return Err(Error::InvalidConfig("limit must be at least 1".to_string()));
        }
        Ok(PropositionQuery {
            context_id: self.context_id,
            entity_id: self.entity_id,
            any_entity_ids: self.any_entity_ids,
            all_entity_ids: self.all_entity_ids,
            min_effective_confidence: self.min_effective_confidence,
            status: self.status,
            min_level: self.min_level,
            max_level: self.max_level,
            min_reinforce_count: self.min_reinforce_count,
            created_since: self.created_since,
            revised_since: self.revised_since,
            limit: self.limit,
            order_by: self.order_by,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Mention, MentionRole, PropositionId};
    use chrono::Duration;

    fn proposition(id: &str, text: &str, now: DateTime<Utc>) -> Proposition {
        let mut p = Proposition::new(ContextId::new("ctx"), text, now);
        p.id = PropositionId::new(id);
        p
    }

    #[test]
    fn test_builder_rejects_bad_threshold() {
        let err = PropositionQuery::for_context("ctx")
            .with_min_effective_confidence(1.5)
            .build()
            .unwrap_err();
        assert!(matches!(err, Error::InvalidConfig(_)));
    }

    #[test]
    fn test_builder_rejects_zero_limit() {
        let err = PropositionQuery::for_context("ctx")
            .with_limit(0)
            .build()
            .unwrap_err();
        assert!(matches!(err, Error::InvalidConfig(_)));
    }

    #[test]
    fn test_status_defaults_to_active() {
        let now = Utc::now();
        let query = PropositionQuery::for_context("ctx").build().unwrap();
        let mut retired = proposition("p1", "old fact", now);
        retired.status = PropositionStatus::Retired;
        assert!(!query.matches(&retired, now));

        let opt_in = PropositionQuery::for_context("ctx")
            .with_status(PropositionStatus::Retired)
            .build()
            .unwrap();
        assert!(opt_in.matches(&retired, now));
    }

    #[test]
    fn test_entity_filters() {
        let now = Utc::now();
        let e1 = EntityId::new("E1");
        let e2 = EntityId::new("E2");

        let mut p = proposition("p1", "Alice met Bob", now);
        p.mentions = vec![
            Mention::new(MentionRole::Subject, "Alice", vec![]).with_entity_id(e1.clone()),
            Mention::new(MentionRole::Object, "Bob", vec![]).with_entity_id(e2.clone()),
        ];

        let all = PropositionQuery::for_context("ctx")
            .with_all_entity_ids(vec![e1.clone(), e2.clone()])
            .build()
            .unwrap();
        assert!(all.matches(&p, now));

        let missing = PropositionQuery::for_context("ctx")
            .with_all_entity_ids(vec![e1, EntityId::new("E9")])
            .build()
            .unwrap();
        assert!(!missing.matches(&p, now));

        let any = PropositionQuery::for_context("ctx")
            .with_any_entity_ids(vec![EntityId::new("E9"), e2])
            .build()
            .unwrap();
        assert!(any.matches(&p, now));
    }

    #[test]
    fn test_sort_ties_break_by_id() {
        let now = Utc::now();
        let a = proposition("b-second", "fact one", now);
        let b = proposition("a-first", "fact two", now);
        let query = PropositionQuery::for_context("ctx")
            .with_order(QueryOrder::CreatedDesc)
            .build()
            .unwrap();
        let sorted = query.sort_and_truncate(vec![a, b], now);
        assert_eq!(sorted[0].id.as_str(), "a-first");
        assert_eq!(sorted[1].id.as_str(), "b-second");
    }

    #[test]
    fn test_sort_by_effective_confidence() {
        let now = Utc::now();
        let mut fresh = proposition("p1", "fresh", now);
        fresh.confidence = 0.9;
        let mut stale = proposition("p2", "stale", now - Duration::days(60));
        stale.confidence = 0.9;
        stale.decay = 0.8;
        stale.created = now - Duration::days(60);

        let query = PropositionQuery::for_context("ctx").build().unwrap();
        let sorted = query.sort_and_truncate(vec![stale, fresh], now);
        assert_eq!(sorted[0].id.as_str(), "p1");
    }

    #[test]
    fn test_limit_applies_after_sort() {
        let now = Utc::now();
        let query = PropositionQuery::for_context("ctx")
            .with_limit(1)
            .with_order(QueryOrder::ReinforceCountDesc)
            .build()
            .unwrap();
        let mut a = proposition("p1", "one", now);
        a.reinforce_count = 1;
        let mut b = proposition("p2", "two", now);
        b.reinforce_count = 5;
        let sorted = query.sort_and_truncate(vec![a, b], now);
        assert_eq!(sorted.len(), 1);
        assert_eq!(sorted[0].id.as_str(), "p2");
    }
}
