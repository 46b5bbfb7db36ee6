//! Session-scoped in-memory resolver.
//!
//! Caches previously resolved entities in an LRU and applies the same
//! name and label strategies against the cache alone. Used primarily for
//! intra-conversation deduplication: once "Johannes Brahms" resolved in a
//! session, a later "Brahms" in the same session hits the cache without
//! touching the entity repository.

use super::labels::labels_compatible;
use super::names::{fuzzy_name_match, normalized_equal, partial_name_match};
use super::{EntityResolver, ResolutionContext, ResolverConfig};
use crate::Result;
use crate::models::{DataDictionary, EntityResolution, NamedEntity, SuggestedEntity};
use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::Mutex;

/// Default cache capacity per session.
const DEFAULT_CAPACITY: usize = 256;

/// Resolver over a per-session LRU cache of known entities.
///
/// The cache is not shared across sessions; each conversation gets its
/// own resolver instance.
pub struct SessionEntityResolver {
    cache: Mutex<LruCache<crate::models::EntityId, NamedEntity>>,
    config: ResolverConfig,
}

impl SessionEntityResolver {
    /// Creates a resolver with the default capacity.
    #[must_use]
    pub fn new(config: ResolverConfig) -> Self {
        Self::with_capacity(config, DEFAULT_CAPACITY)
    }

    /// Creates a resolver with an explicit cache capacity.
    #[must_use]
    pub fn with_capacity(config: ResolverConfig, capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1)).unwrap_or(NonZeroUsize::MIN);
        Self {
            cache: Mutex::new(LruCache::new(capacity)),
            config,
        }
    }

    /// Seeds the cache with an already resolved entity.
    ///
    /// # Panics
    ///
    /// Never panics; a poisoned lock is recovered.
    pub fn remember(&self, entity: NamedEntity) {
        self.cache
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .put(entity.id.clone(), entity);
    }

    /// Applies the name strategies, cheapest first, against the cached
    /// entities.
    fn find_cached(
        &self,
        suggested: &SuggestedEntity,
        dictionary: &DataDictionary,
    ) -> Option<NamedEntity> {
        let mut cache = self
            .cache
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);

        if let Some(id) = &suggested.id {
            if let Some(entity) = cache.get(id) {
                return Some(entity.clone());
            }
        }

        let compatible: Vec<&NamedEntity> = cache
            .iter()
            .map(|(_, entity)| entity)
            .filter(|entity| labels_compatible(&suggested.labels, &entity.labels, dictionary))
            .collect();

        let partial = |a: &str, b: &str| partial_name_match(a, b, self.config.min_part_length);
        let fuzzy = |a: &str, b: &str| {
            fuzzy_name_match(
                a,
                b,
                self.config.max_distance_ratio,
                self.config.min_length_for_fuzzy,
            )
        };
        let strategies: [&dyn Fn(&str, &str) -> bool; 3] = [&normalized_equal, &partial, &fuzzy];
        for strategy in strategies {
            let mut matches = compatible
                .iter()
                .filter(|entity| strategy(&entity.name, &suggested.name));
            if let Some(first) = matches.next() {
                if matches.next().is_none() {
                    return Some((*first).clone());
                }
                // Ambiguous within the cache; a later resolver in the
                // chain gets to decide.
                return None;
            }
        }
        None
    }
}

impl EntityResolver for SessionEntityResolver {
    fn resolve(
        &self,
        batch: &[SuggestedEntity],
        dictionary: &DataDictionary,
        _context: &ResolutionContext,
    ) -> Result<Vec<EntityResolution>> {
        Ok(batch
            .iter()
            .map(|suggested| {
                self.find_cached(suggested, dictionary).map_or_else(
                    || {
                        let vetoed = suggested
                            .labels
                            .iter()
                            .any(|label| !dictionary.creation_permitted(label));
                        if vetoed {
                            EntityResolution::Vetoed {
                                suggested: suggested.clone(),
                            }
                        } else {
                            EntityResolution::New {
                                suggested: suggested.clone(),
                            }
                        }
                    },
                    |matched| {
                        metrics::counter!(
                            "resolver_matches_total",
                            "searcher" => "session_cache"
                        )
                        .increment(1);
                        EntityResolution::Existing {
                            suggested: suggested.clone(),
                            matched,
                        }
                    },
                )
            })
            .collect())
    }
}
