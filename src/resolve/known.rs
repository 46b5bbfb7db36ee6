//! Known-entity decorator.
//!
//! A caller may pin entities that are already in scope (the current user,
//! the assistant itself). Pinned entities are matched *before* the inner
//! resolver by normalized name plus label compatibility; hits become
//! [`EntityResolution::ReferenceOnly`] and must not be mutated
//! downstream.

use super::labels::labels_compatible;
use super::names::normalized_equal;
use super::{EntityResolver, ResolutionContext};
use crate::Result;
use crate::models::{DataDictionary, EntityResolution, NamedEntity, SuggestedEntity};

/// Decorates an inner resolver with a pinned entity list.
pub struct KnownEntityResolver {
    pinned: Vec<NamedEntity>,
    inner: Box<dyn EntityResolver>,
}

impl KnownEntityResolver {
    /// Creates the decorator.
    #[must_use]
    pub fn new(pinned: Vec<NamedEntity>, inner: Box<dyn EntityResolver>) -> Self {
        Self { pinned, inner }
    }

    fn match_pinned(
        &self,
        suggested: &SuggestedEntity,
        dictionary: &DataDictionary,
    ) -> Option<&NamedEntity> {
        self.pinned.iter().find(|pinned| {
            normalized_equal(&pinned.name, &suggested.name)
                && labels_compatible(&suggested.labels, &pinned.labels, dictionary)
        })
    }
}

impl EntityResolver for KnownEntityResolver {
    fn resolve(
        &self,
        batch: &[SuggestedEntity],
        dictionary: &DataDictionary,
        context: &ResolutionContext,
    ) -> Result<Vec<EntityResolution>> {
        // Partition: pinned hits resolve immediately, the rest go to the
        // inner resolver in one sub-batch.
        let mut resolutions: Vec<Option<EntityResolution>> = vec![None; batch.len()];
        let mut remaining: Vec<(usize, SuggestedEntity)> = Vec::new();

        for (index, suggested) in batch.iter().enumerate() {
            if let Some(pinned) = self.match_pinned(suggested, dictionary) {
                tracing::debug!(
                    mention = %suggested.name,
                    entity_id = %pinned.id,
                    "Mention matched a pinned entity"
                );
                metrics::counter!(
                    "resolver_matches_total",
                    "searcher" => "known_entity"
                )
                .increment(1);
                resolutions[index] = Some(EntityResolution::ReferenceOnly {
                    suggested: suggested.clone(),
                    matched: pinned.clone(),
                });
            } else {
                remaining.push((index, suggested.clone()));
            }
        }

        if !remaining.is_empty() {
            let sub_batch: Vec<SuggestedEntity> =
                remaining.iter().map(|(_, s)| s.clone()).collect();
            let inner = self.inner.resolve(&sub_batch, dictionary, context)?;
            for ((index, _), resolution) in remaining.into_iter().zip(inner) {
                resolutions[index] = Some(resolution);
            }
        }

        Ok(resolutions.into_iter().flatten().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::EntityId;

    /// Inner resolver that declares everything new.
    struct AlwaysNew;

    impl EntityResolver for AlwaysNew {
        fn resolve(
            &self,
            batch: &[SuggestedEntity],
            _dictionary: &DataDictionary,
            _context: &ResolutionContext,
        ) -> Result<Vec<EntityResolution>> {
            Ok(batch
                .iter()
                .map(|suggested| EntityResolution::New {
                    suggested: suggested.clone(),
                })
                .collect())
        }
    }

    fn pinned_user() -> NamedEntity {
        NamedEntity::new("U1", "Ada Lovelace", vec!["Person".to_string()])
    }

    #[test]
    fn test_pinned_match_is_reference_only() {
        let resolver = KnownEntityResolver::new(vec![pinned_user()], Box::new(AlwaysNew));
        let batch = vec![
            SuggestedEntity::new("Ms. Ada Lovelace", vec!["Person".to_string()]),
            SuggestedEntity::new("Charles Babbage", vec!["Person".to_string()]),
        ];
        let resolutions = resolver
            .resolve(&batch, &DataDictionary::new(), &ResolutionContext::default())
            .unwrap();

        assert!(matches!(
            &resolutions[0],
            EntityResolution::ReferenceOnly { matched, .. } if matched.id == EntityId::new("U1")
        ));
        assert!(matches!(resolutions[1], EntityResolution::New { .. }));
    }

    #[test]
    fn test_incompatible_labels_skip_pin() {
        let resolver = KnownEntityResolver::new(vec![pinned_user()], Box::new(AlwaysNew));
        let schema = DataDictionary::from_types(vec![
            crate::models::TypeDescriptor::new("Person"),
            crate::models::TypeDescriptor::new("Ship"),
        ]);
        let batch = vec![SuggestedEntity::new(
            "Ada Lovelace",
            vec!["Ship".to_string()],
        )];
        let resolutions = resolver
            .resolve(&batch, &schema, &ResolutionContext::default())
            .unwrap();
        assert!(matches!(resolutions[0], EntityResolution::New { .. }));
    }
}
