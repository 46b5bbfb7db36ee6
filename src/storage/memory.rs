//! In-process storage backends.
//!
//! Used by tests and intra-session work. Vector similarity is brute-force
//! cosine over embeddings from the injected [`Embedder`]; lexical search
//! is token overlap. Both match the repository contract exactly, so
//! pipelines built against the in-memory store behave identically on the
//! SQLite store.

use super::traits::{EntityRepository, HistoryStore, PropositionRepository};
use super::validate_source_references;
use crate::embedding::{Embedder, cosine_similarity};
use crate::models::{
    Chunk, EntityId, NamedEntity, Proposition, PropositionId, PropositionQuery, PropositionStatus,
};
use crate::Result;
use chrono::Utc;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// In-memory proposition repository.
///
/// Mutations take the write lock for their full duration, so concurrent
/// readers observe either the pre- or post-state of a batch, never a mix.
pub struct MemoryPropositionRepository {
    rows: RwLock<HashMap<PropositionId, StoredRow>>,
    embedder: Arc<dyn Embedder>,
}

struct StoredRow {
    proposition: Proposition,
    embedding: Vec<f32>,
}

impl MemoryPropositionRepository {
    /// Creates an empty repository over the given embedder.
    #[must_use]
    pub fn new(embedder: Arc<dyn Embedder>) -> Self {
        Self {
            rows: RwLock::new(HashMap::new()),
            embedder,
        }
    }

    /// Returns the number of stored propositions (all statuses).
    ///
    /// # Panics
    ///
    /// Never panics; a poisoned lock is recovered.
    #[must_use]
    pub fn len(&self) -> usize {
        self.read_rows().len()
    }

    /// Returns true if the repository is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn read_rows(&self) -> RwLockReadGuard<'_, HashMap<PropositionId, StoredRow>> {
        self.rows.read().unwrap_or_else(|poisoned| {
            tracing::warn!("proposition store read lock was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    fn write_rows(&self) -> RwLockWriteGuard<'_, HashMap<PropositionId, StoredRow>> {
        self.rows.write().unwrap_or_else(|poisoned| {
            tracing::warn!("proposition store write lock was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    /// Validates a batch against the store and the batch itself, then
    /// embeds each text. Runs before any mutation so a failed batch
    /// leaves the store untouched.
    fn prepare_batch(
        &self,
        rows: &HashMap<PropositionId, StoredRow>,
        propositions: &[Proposition],
    ) -> Result<Vec<(Proposition, Vec<f32>)>> {
        let batch_levels: HashMap<&PropositionId, &Proposition> =
            propositions.iter().map(|p| (&p.id, p)).collect();

        let mut prepared = Vec::with_capacity(propositions.len());
        for proposition in propositions {
            validate_source_references(proposition, |id| {
                batch_levels
                    .get(id)
                    .map(|p| (p.context_id.clone(), p.level))
                    .or_else(|| {
                        rows.get(id)
                            .map(|row| (row.proposition.context_id.clone(), row.proposition.level))
                    })
            })?;
            let embedding = self.embedder.embed(&proposition.text)?;
            prepared.push((proposition.clone(), embedding));
        }
        Ok(prepared)
    }
}

impl PropositionRepository for MemoryPropositionRepository {
    fn upsert(&self, proposition: &Proposition) -> Result<()> {
        self.upsert_all(std::slice::from_ref(proposition))
    }

    fn upsert_all(&self, propositions: &[Proposition]) -> Result<()> {
        let mut rows = self.write_rows();
        let prepared = self.prepare_batch(&rows, propositions)?;
        for (proposition, embedding) in prepared {
            rows.insert(
                proposition.id.clone(),
                StoredRow {
                    proposition,
                    embedding,
                },
            );
        }
        Ok(())
    }

    fn find_by_id(&self, id: &PropositionId) -> Result<Option<Proposition>> {
        Ok(self.read_rows().get(id).map(|row| row.proposition.clone()))
    }

    fn find_sources(&self, proposition: &Proposition) -> Result<Vec<Proposition>> {
        let rows = self.read_rows();
        Ok(proposition
            .source_ids
            .iter()
            .filter_map(|id| rows.get(id).map(|row| row.proposition.clone()))
            .collect())
    }

    fn query(&self, query: &PropositionQuery) -> Result<Vec<Proposition>> {
        let now = Utc::now();
        let matching: Vec<Proposition> = self
            .read_rows()
            .values()
            .filter(|row| query.matches(&row.proposition, now))
            .map(|row| row.proposition.clone())
            .collect();
        Ok(query.sort_and_truncate(matching, now))
    }

    fn find_similar_with_scores(
        &self,
        text: &str,
        query: &PropositionQuery,
    ) -> Result<Vec<(Proposition, f32)>> {
        let probe = self.embedder.embed(text)?;
        let now = Utc::now();
        let mut scored: Vec<(Proposition, f32)> = self
            .read_rows()
            .values()
            .filter(|row| query.matches(&row.proposition, now))
            .map(|row| {
                (
                    row.proposition.clone(),
                    cosine_similarity(&probe, &row.embedding),
                )
            })
            .collect();
        scored.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.id.cmp(&b.0.id))
        });
        if let Some(limit) = query.limit {
            scored.truncate(limit);
        }
        Ok(scored)
    }

    fn text_search(
        &self,
        text: &str,
        filter: Option<&PropositionQuery>,
    ) -> Result<Vec<Proposition>> {
        let now = Utc::now();
        let probe_tokens: HashSet<String> = tokenize(text);
        if probe_tokens.is_empty() {
            return Ok(Vec::new());
        }
        let mut scored: Vec<(Proposition, usize)> = self
            .read_rows()
            .values()
            .filter(|row| {
                filter.is_none_or(|query| query.matches(&row.proposition, now))
            })
            .filter_map(|row| {
                let overlap = tokenize(&row.proposition.text)
                    .intersection(&probe_tokens)
                    .count();
                (overlap > 0).then(|| (row.proposition.clone(), overlap))
            })
            .collect();
        scored.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.id.cmp(&b.0.id)));
        let mut results: Vec<Proposition> = scored.into_iter().map(|(p, _)| p).collect();
        if let Some(limit) = filter.and_then(|q| q.limit) {
            results.truncate(limit);
        }
        Ok(results)
    }

    fn retire(&self, id: &PropositionId) -> Result<bool> {
        let mut rows = self.write_rows();
        match rows.get_mut(id) {
            Some(row) => {
                row.proposition.status = PropositionStatus::Retired;
                Ok(true)
            },
            None => Ok(false),
        }
    }
}

fn tokenize(text: &str) -> HashSet<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(ToString::to_string)
        .collect()
}

/// In-memory entity repository for tests and self-contained hosts.
pub struct MemoryEntityRepository {
    entities: RwLock<Vec<NamedEntity>>,
    embedder: Arc<dyn Embedder>,
}

impl MemoryEntityRepository {
    /// Creates an empty entity repository.
    #[must_use]
    pub fn new(embedder: Arc<dyn Embedder>) -> Self {
        Self {
            entities: RwLock::new(Vec::new()),
            embedder,
        }
    }

    /// Adds an entity.
    ///
    /// # Panics
    ///
    /// Never panics; a poisoned lock is recovered.
    pub fn add(&self, entity: NamedEntity) {
        self.entities
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push(entity);
    }

    fn snapshot(&self) -> Vec<NamedEntity> {
        self.entities
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }

    fn label_matches(entity: &NamedEntity, labels: Option<&[String]>) -> bool {
        labels.is_none_or(|wanted| {
            wanted.is_empty()
                || entity.labels.iter().any(|have| {
                    wanted
                        .iter()
                        .any(|want| want.eq_ignore_ascii_case(have))
                })
        })
    }

    fn searchable_text(entity: &NamedEntity) -> String {
        match &entity.description {
            Some(description) => format!("{} {description}", entity.name),
            None => entity.name.clone(),
        }
    }
}

impl EntityRepository for MemoryEntityRepository {
    fn find_by_id(&self, id: &EntityId) -> Result<Option<NamedEntity>> {
        Ok(self.snapshot().into_iter().find(|e| &e.id == id))
    }

    fn text_search(
        &self,
        query: &str,
        labels: Option<&[String]>,
        limit: usize,
    ) -> Result<Vec<NamedEntity>> {
        let probe_tokens = tokenize(query);
        if probe_tokens.is_empty() {
            return Ok(Vec::new());
        }
        let mut scored: Vec<(NamedEntity, usize)> = self
            .snapshot()
            .into_iter()
            .filter(|e| Self::label_matches(e, labels))
            .filter_map(|e| {
                let overlap = tokenize(&Self::searchable_text(&e))
                    .intersection(&probe_tokens)
                    .count();
                (overlap > 0).then_some((e, overlap))
            })
            .collect();
        scored.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.id.cmp(&b.0.id)));
        scored.truncate(limit);
        Ok(scored.into_iter().map(|(e, _)| e).collect())
    }

    fn vector_search(
        &self,
        query: &str,
        labels: Option<&[String]>,
        limit: usize,
    ) -> Result<Vec<(NamedEntity, f32)>> {
        let probe = self.embedder.embed(query)?;
        let mut scored: Vec<(NamedEntity, f32)> = self
            .snapshot()
            .into_iter()
            .filter(|e| Self::label_matches(e, labels))
            .map(|e| {
                let embedding = self.embedder.embed(&Self::searchable_text(&e))?;
                Ok((e, cosine_similarity(&probe, &embedding)))
            })
            .collect::<Result<_>>()?;
        scored.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.id.cmp(&b.0.id))
        });
        scored.truncate(limit);
        Ok(scored)
    }
}

/// In-memory history store for the analyzer.
#[derive(Default)]
pub struct MemoryHistoryStore {
    processed: RwLock<HashMap<String, HashSet<String>>>,
}

impl MemoryHistoryStore {
    /// Creates an empty history store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl HistoryStore for MemoryHistoryStore {
    fn was_processed(&self, source_id: &str, content_hash: &str) -> Result<bool> {
        Ok(self
            .processed
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .get(source_id)
            .is_some_and(|hashes| hashes.contains(content_hash)))
    }

    fn record(&self, source_id: &str, chunk: &Chunk) -> Result<()> {
        self.processed
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .entry(source_id.to_string())
            .or_default()
            .insert(chunk.content_hash.clone());
        Ok(())
    }
}
