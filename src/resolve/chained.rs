//! Chained resolver composition.
//!
//! Runs resolvers in order over the still-unresolved subset of a batch.
//! `Existing` and `ReferenceOnly` are terminal and stop further attempts
//! for that input; `New` and `Vetoed` are provisional and may be
//! overridden by a later resolver that finds a real match. Input order is
//! preserved in the output.

use super::{EntityResolver, ResolutionContext};
use crate::Result;
use crate::models::{DataDictionary, EntityResolution, SuggestedEntity};

/// Ordered composition of resolvers.
pub struct ChainedEntityResolver {
    resolvers: Vec<Box<dyn EntityResolver>>,
}

impl ChainedEntityResolver {
    /// Creates a chain; resolvers run in the given order.
    #[must_use]
    pub fn new(resolvers: Vec<Box<dyn EntityResolver>>) -> Self {
        Self { resolvers }
    }
}

impl EntityResolver for ChainedEntityResolver {
    fn resolve(
        &self,
        batch: &[SuggestedEntity],
        dictionary: &DataDictionary,
        context: &ResolutionContext,
    ) -> Result<Vec<EntityResolution>> {
        let mut resolutions: Vec<Option<EntityResolution>> = vec![None; batch.len()];

        for resolver in &self.resolvers {
            // Inputs still worth attempting: unresolved or provisional.
            let open: Vec<(usize, SuggestedEntity)> = resolutions
                .iter()
                .enumerate()
                .filter(|(_, r)| !r.as_ref().is_some_and(EntityResolution::is_terminal))
                .map(|(index, _)| (index, batch[index].clone()))
                .collect();
            if open.is_empty() {
                break;
            }

            let sub_batch: Vec<SuggestedEntity> = open.iter().map(|(_, s)| s.clone()).collect();
            let sub_resolutions = resolver.resolve(&sub_batch, dictionary, context)?;

            for ((index, _), resolution) in open.into_iter().zip(sub_resolutions) {
                let overrides = match &resolutions[index] {
                    None => true,
                    // A provisional outcome yields to a terminal one.
                    Some(previous) => !previous.is_terminal() && resolution.is_terminal(),
                };
                if overrides {
                    resolutions[index] = Some(resolution);
                }
            }
        }

        Ok(resolutions
            .into_iter()
            .enumerate()
            .map(|(index, resolution)| {
                resolution.unwrap_or_else(|| EntityResolution::New {
                    suggested: batch[index].clone(),
                })
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{EntityId, NamedEntity};

    /// Resolver that matches one configured name and declares the rest
    /// either new or vetoed.
    struct SingleMatchResolver {
        matches: &'static str,
        entity_id: &'static str,
        veto_rest: bool,
    }

    impl EntityResolver for SingleMatchResolver {
        fn resolve(
            &self,
            batch: &[SuggestedEntity],
            _dictionary: &DataDictionary,
            _context: &ResolutionContext,
        ) -> Result<Vec<EntityResolution>> {
            Ok(batch
                .iter()
                .map(|suggested| {
                    if suggested.name == self.matches {
                        EntityResolution::Existing {
                            suggested: suggested.clone(),
                            matched: NamedEntity::new(self.entity_id, self.matches, vec![]),
                        }
                    } else if self.veto_rest {
                        EntityResolution::Vetoed {
                            suggested: suggested.clone(),
                        }
                    } else {
                        EntityResolution::New {
                            suggested: suggested.clone(),
                        }
                    }
                })
                .collect())
        }
    }

    #[test]
    fn test_later_resolver_overrides_provisional() {
        let chain = ChainedEntityResolver::new(vec![
            Box::new(SingleMatchResolver {
                matches: "Alice",
                entity_id: "E1",
                veto_rest: true,
            }),
            Box::new(SingleMatchResolver {
                matches: "Bob",
                entity_id: "E2",
                veto_rest: false,
            }),
        ]);
        let batch = vec![
            SuggestedEntity::new("Alice", vec![]),
            SuggestedEntity::new("Bob", vec![]),
            SuggestedEntity::new("Carol", vec![]),
        ];
        let resolutions = chain
            .resolve(&batch, &DataDictionary::new(), &ResolutionContext::default())
            .unwrap();

        // Alice: terminal from the first resolver.
        assert_eq!(resolutions[0].entity_id(), Some(&EntityId::new("E1")));
        // Bob: the first resolver vetoed, the second overrode with a match.
        assert_eq!(resolutions[1].entity_id(), Some(&EntityId::new("E2")));
        // Carol: provisional veto survives, later New does not override it...
        // the second resolver returned New which is also provisional, so the
        // first non-terminal answer stands.
        assert!(resolutions[2].is_vetoed());
    }

    #[test]
    fn test_terminal_inputs_are_not_reattempted() {
        let chain = ChainedEntityResolver::new(vec![
            Box::new(SingleMatchResolver {
                matches: "Alice",
                entity_id: "E1",
                veto_rest: false,
            }),
            Box::new(SingleMatchResolver {
                matches: "Alice",
                entity_id: "E-wrong",
                veto_rest: false,
            }),
        ]);
        let batch = vec![SuggestedEntity::new("Alice", vec![])];
        let resolutions = chain
            .resolve(&batch, &DataDictionary::new(), &ResolutionContext::default())
            .unwrap();
        assert_eq!(resolutions[0].entity_id(), Some(&EntityId::new("E1")));
    }

    #[test]
    fn test_empty_chain_defaults_to_new() {
        let chain = ChainedEntityResolver::new(vec![]);
        let batch = vec![SuggestedEntity::new("Anyone", vec![])];
        let resolutions = chain
            .resolve(&batch, &DataDictionary::new(), &ResolutionContext::default())
            .unwrap();
        assert!(matches!(resolutions[0], EntityResolution::New { .. }));
    }
}
