//! `SQLite`-based proposition repository.
//!
//! Durable storage with the full index set: primary by ID, secondary by
//! `(context_id, status, revised)`, a mention table keyed by
//! `(context_id, entity_id)`, embedding BLOBs per context, and an FTS5
//! mirror for lexical search.
//!
//! # Concurrency Model
//!
//! Uses a `Mutex<Connection>` for thread-safe access. `SQLite`'s WAL mode
//! and `busy_timeout` pragma mitigate contention:
//!
//! - **WAL mode**: Allows concurrent readers with a single writer
//! - **`busy_timeout`**: Waits up to 5 seconds for locks instead of
//!   failing immediately
//! - **NORMAL synchronous**: Balances durability with performance
//!
//! Batch upserts run inside a single `BEGIN IMMEDIATE` transaction, so a
//! reviser batch commits entirely or not at all.

use super::traits::PropositionRepository;
use super::validate_source_references;
use crate::embedding::{Embedder, cosine_similarity};
use crate::models::{
    ChunkId, ContextId, Mention, MentionRole, Proposition, PropositionId, PropositionQuery,
    PropositionStatus,
};
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use std::collections::{BTreeSet, HashMap};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};

/// `SQLite`-based proposition repository.
pub struct SqlitePropositionRepository {
    /// Connection to the `SQLite` database.
    ///
    /// Protected by a `Mutex` because `rusqlite::Connection` is not
    /// `Sync`. WAL mode and `busy_timeout` handle concurrent access.
    conn: Mutex<Connection>,
    /// Embedder used to populate the vector column on upsert.
    embedder: Arc<dyn Embedder>,
    /// Path to the database (None for in-memory).
    db_path: Option<PathBuf>,
}

impl SqlitePropositionRepository {
    /// Opens or creates a repository at the given path.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or initialized.
    pub fn new(db_path: impl Into<PathBuf>, embedder: Arc<dyn Embedder>) -> Result<Self> {
        let db_path = db_path.into();
        let conn = Connection::open(&db_path).map_err(|e| Error::Persistence {
            operation: "open_sqlite".to_string(),
            cause: e.to_string(),
        })?;
        let repository = Self {
            conn: Mutex::new(conn),
            embedder,
            db_path: Some(db_path),
        };
        repository.initialize()?;
        Ok(repository)
    }

    /// Creates an in-memory repository (useful for testing).
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be initialized.
    pub fn in_memory(embedder: Arc<dyn Embedder>) -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(|e| Error::Persistence {
            operation: "open_sqlite_in_memory".to_string(),
            cause: e.to_string(),
        })?;
        let repository = Self {
            conn: Mutex::new(conn),
            embedder,
            db_path: None,
        };
        repository.initialize()?;
        Ok(repository)
    }

    /// Returns the database path (None for in-memory).
    #[must_use]
    pub const fn db_path(&self) -> Option<&PathBuf> {
        self.db_path.as_ref()
    }

    /// Acquires the connection lock with poison recovery.
    fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|poisoned| {
            tracing::warn!("SQLite mutex was poisoned, recovering");
            metrics::counter!("sqlite_mutex_poison_recovery_total").increment(1);
            poisoned.into_inner()
        })
    }

    /// Initializes schema, pragmas and indexes.
    fn initialize(&self) -> Result<()> {
        let conn = self.lock();

        let _ = conn.pragma_update(None, "journal_mode", "WAL");
        let _ = conn.pragma_update(None, "synchronous", "NORMAL");
        let _ = conn.pragma_update(None, "busy_timeout", 5000);

        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS propositions (
                id TEXT PRIMARY KEY,
                context_id TEXT NOT NULL,
                text TEXT NOT NULL,
                confidence REAL NOT NULL,
                decay REAL NOT NULL,
                created INTEGER NOT NULL,
                revised INTEGER NOT NULL,
                grounding TEXT NOT NULL,
                reinforce_count INTEGER NOT NULL,
                level INTEGER NOT NULL,
                source_ids TEXT NOT NULL,
                status TEXT NOT NULL,
                reasoning TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_propositions_context_status_revised
                ON propositions(context_id, status, revised DESC);
            CREATE TABLE IF NOT EXISTS proposition_mentions (
                proposition_id TEXT NOT NULL,
                context_id TEXT NOT NULL,
                position INTEGER NOT NULL,
                role TEXT NOT NULL,
                entity_id TEXT,
                name TEXT NOT NULL,
                labels TEXT NOT NULL,
                PRIMARY KEY (proposition_id, position)
            );
            CREATE INDEX IF NOT EXISTS idx_mentions_context_entity
                ON proposition_mentions(context_id, entity_id)
                WHERE entity_id IS NOT NULL;
            CREATE TABLE IF NOT EXISTS proposition_embeddings (
                proposition_id TEXT PRIMARY KEY,
                context_id TEXT NOT NULL,
                embedding BLOB NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_embeddings_context
                ON proposition_embeddings(context_id);
            CREATE VIRTUAL TABLE IF NOT EXISTS propositions_fts
                USING fts5(text, proposition_id UNINDEXED, context_id UNINDEXED);",
        )
        .map_err(|e| Error::Persistence {
            operation: "initialize_schema".to_string(),
            cause: e.to_string(),
        })?;

        Ok(())
    }

    /// Writes one proposition inside an open transaction.
    fn write_row(conn: &Connection, proposition: &Proposition, embedding: &[f32]) -> Result<()> {
        let grounding_json = serde_json::to_string(&proposition.grounding)
            .map_err(|e| persistence_error("serialize_grounding", &e))?;
        let source_ids_json = serde_json::to_string(&proposition.source_ids)
            .map_err(|e| persistence_error("serialize_source_ids", &e))?;

        conn.execute(
            "INSERT OR REPLACE INTO propositions
                (id, context_id, text, confidence, decay, created, revised,
                 grounding, reinforce_count, level, source_ids, status, reasoning)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
            params![
                proposition.id.as_str(),
                proposition.context_id.as_str(),
                proposition.text,
                proposition.confidence,
                proposition.decay,
                proposition.created.timestamp_millis(),
                proposition.revised.timestamp_millis(),
                grounding_json,
                proposition.reinforce_count,
                proposition.level,
                source_ids_json,
                proposition.status.as_str(),
                proposition.reasoning.as_deref(),
            ],
        )
        .map_err(|e| persistence_error("upsert_proposition", &e))?;

        conn.execute(
            "DELETE FROM proposition_mentions WHERE proposition_id = ?1",
            params![proposition.id.as_str()],
        )
        .map_err(|e| persistence_error("clear_mentions", &e))?;

        for (position, mention) in proposition.mentions.iter().enumerate() {
            let labels_json = serde_json::to_string(&mention.labels)
                .map_err(|e| persistence_error("serialize_labels", &e))?;
            #[allow(clippy::cast_possible_wrap)]
            conn.execute(
                "INSERT INTO proposition_mentions
                    (proposition_id, context_id, position, role, entity_id, name, labels)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    proposition.id.as_str(),
                    proposition.context_id.as_str(),
                    position as i64,
                    mention.role.as_str(),
                    mention.entity_id.as_ref().map(|id| id.as_str()),
                    mention.name,
                    labels_json,
                ],
            )
            .map_err(|e| persistence_error("insert_mention", &e))?;
        }

        conn.execute(
            "INSERT OR REPLACE INTO proposition_embeddings (proposition_id, context_id, embedding)
             VALUES (?1, ?2, ?3)",
            params![
                proposition.id.as_str(),
                proposition.context_id.as_str(),
                encode_embedding(embedding),
            ],
        )
        .map_err(|e| persistence_error("upsert_embedding", &e))?;

        conn.execute(
            "DELETE FROM propositions_fts WHERE proposition_id = ?1",
            params![proposition.id.as_str()],
        )
        .map_err(|e| persistence_error("clear_fts", &e))?;
        conn.execute(
            "INSERT INTO propositions_fts (text, proposition_id, context_id)
             VALUES (?1, ?2, ?3)",
            params![
                proposition.text,
                proposition.id.as_str(),
                proposition.context_id.as_str(),
            ],
        )
        .map_err(|e| persistence_error("insert_fts", &e))?;

        Ok(())
    }

    /// Loads one proposition with its mentions.
    fn load_by_id(conn: &Connection, id: &PropositionId) -> Result<Option<Proposition>> {
        let row = conn
            .query_row(
                "SELECT id, context_id, text, confidence, decay, created, revised,
                        grounding, reinforce_count, level, source_ids, status, reasoning
                 FROM propositions WHERE id = ?1",
                params![id.as_str()],
                row_to_proposition,
            )
            .optional()
            .map_err(|e| persistence_error("find_by_id", &e))?;

        match row {
            Some(mut proposition) => {
                proposition.mentions = Self::load_mentions(conn, id)?;
                Ok(Some(proposition))
            },
            None => Ok(None),
        }
    }

    fn load_mentions(conn: &Connection, id: &PropositionId) -> Result<Vec<Mention>> {
        let mut stmt = conn
            .prepare(
                "SELECT role, entity_id, name, labels FROM proposition_mentions
                 WHERE proposition_id = ?1 ORDER BY position",
            )
            .map_err(|e| persistence_error("prepare_mentions", &e))?;
        let mentions = stmt
            .query_map(params![id.as_str()], |row| {
                let role: String = row.get(0)?;
                let entity_id: Option<String> = row.get(1)?;
                let name: String = row.get(2)?;
                let labels_json: String = row.get(3)?;
                Ok((role, entity_id, name, labels_json))
            })
            .map_err(|e| persistence_error("query_mentions", &e))?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| persistence_error("read_mentions", &e))?;

        mentions
            .into_iter()
            .map(|(role, entity_id, name, labels_json)| {
                let labels: Vec<String> = serde_json::from_str(&labels_json)
                    .map_err(|e| persistence_error("parse_labels", &e))?;
                Ok(Mention {
                    role: MentionRole::parse(&role).unwrap_or_default(),
                    entity_id: entity_id.map(crate::models::EntityId::new),
                    name,
                    labels,
                })
            })
            .collect()
    }

    /// Loads all propositions in a context with the given status, with
    /// mentions attached.
    fn load_context(
        conn: &Connection,
        context_id: &ContextId,
        status: PropositionStatus,
    ) -> Result<Vec<Proposition>> {
        let mut stmt = conn
            .prepare(
                "SELECT id, context_id, text, confidence, decay, created, revised,
                        grounding, reinforce_count, level, source_ids, status, reasoning
                 FROM propositions WHERE context_id = ?1 AND status = ?2",
            )
            .map_err(|e| persistence_error("prepare_context_scan", &e))?;
        let mut propositions = stmt
            .query_map(params![context_id.as_str(), status.as_str()], row_to_proposition)
            .map_err(|e| persistence_error("query_context", &e))?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| persistence_error("read_context", &e))?;

        for proposition in &mut propositions {
            proposition.mentions = Self::load_mentions(conn, &proposition.id)?;
        }
        Ok(propositions)
    }

    /// Resolves `(context_id, level)` for one stored proposition.
    fn lookup_level(conn: &Connection, id: &PropositionId) -> Option<(ContextId, u32)> {
        conn.query_row(
            "SELECT context_id, level FROM propositions WHERE id = ?1",
            params![id.as_str()],
            |row| {
                let context: String = row.get(0)?;
                let level: u32 = row.get(1)?;
                Ok((ContextId::new(context), level))
            },
        )
        .optional()
        .ok()
        .flatten()
    }
}

impl PropositionRepository for SqlitePropositionRepository {
    fn upsert(&self, proposition: &Proposition) -> Result<()> {
        self.upsert_all(std::slice::from_ref(proposition))
    }

    fn upsert_all(&self, propositions: &[Proposition]) -> Result<()> {
        // Embed before taking the transaction so an embedder failure
        // leaves the store untouched.
        let mut embeddings = Vec::with_capacity(propositions.len());
        for proposition in propositions {
            embeddings.push(self.embedder.embed(&proposition.text)?);
        }

        let conn = self.lock();

        let batch_levels: HashMap<&PropositionId, (&ContextId, u32)> = propositions
            .iter()
            .map(|p| (&p.id, (&p.context_id, p.level)))
            .collect();
        for proposition in propositions {
            validate_source_references(proposition, |id| {
                batch_levels
                    .get(id)
                    .map(|(context, level)| ((*context).clone(), *level))
                    .or_else(|| Self::lookup_level(&conn, id))
            })?;
        }

        conn.execute("BEGIN IMMEDIATE", [])
            .map_err(|e| persistence_error("begin_transaction", &e))?;

        let result = (|| {
            for (proposition, embedding) in propositions.iter().zip(&embeddings) {
                Self::write_row(&conn, proposition, embedding)?;
            }
            Ok(())
        })();

        match result {
            Ok(()) => conn
                .execute("COMMIT", [])
                .map(|_| ())
                .map_err(|e| persistence_error("commit_transaction", &e)),
            Err(e) => {
                let _ = conn.execute("ROLLBACK", []);
                Err(e)
            },
        }
    }

    fn find_by_id(&self, id: &PropositionId) -> Result<Option<Proposition>> {
        let conn = self.lock();
        Self::load_by_id(&conn, id)
    }

    fn find_sources(&self, proposition: &Proposition) -> Result<Vec<Proposition>> {
        let conn = self.lock();
        let mut sources = Vec::with_capacity(proposition.source_ids.len());
        for id in &proposition.source_ids {
            if let Some(source) = Self::load_by_id(&conn, id)? {
                sources.push(source);
            }
        }
        Ok(sources)
    }

    fn query(&self, query: &PropositionQuery) -> Result<Vec<Proposition>> {
        let now = Utc::now();
        let conn = self.lock();
        let candidates = Self::load_context(&conn, &query.context_id, query.status)?;
        drop(conn);
        let matching = candidates
            .into_iter()
            .filter(|p| query.matches(p, now))
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
        let conn = self.lock();

        let mut stmt = conn
            .prepare(
                "SELECT proposition_id, embedding FROM proposition_embeddings
                 WHERE context_id = ?1",
            )
            .map_err(|e| persistence_error("prepare_embedding_scan", &e))?;
        let scores: HashMap<String, f32> = stmt
            .query_map(params![query.context_id.as_str()], |row| {
                let id: String = row.get(0)?;
                let blob: Vec<u8> = row.get(1)?;
                Ok((id, blob))
            })
            .map_err(|e| persistence_error("query_embeddings", &e))?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| persistence_error("read_embeddings", &e))?
            .into_iter()
            .map(|(id, blob)| (id, cosine_similarity(&probe, &decode_embedding(&blob))))
            .collect();
        drop(stmt);

        let candidates = Self::load_context(&conn, &query.context_id, query.status)?;
        drop(conn);

        let mut scored: Vec<(Proposition, f32)> = candidates
            .into_iter()
            .filter(|p| query.matches(p, now))
            .map(|p| {
                let score = scores.get(p.id.as_str()).copied().unwrap_or(0.0);
                (p, score)
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
        let match_query = fts_match_query(text);
        if match_query.is_empty() {
            return Ok(Vec::new());
        }
        let now = Utc::now();
        let conn = self.lock();

        let mut stmt = conn
            .prepare(
                "SELECT proposition_id FROM propositions_fts
                 WHERE propositions_fts MATCH ?1
                 ORDER BY bm25(propositions_fts)",
            )
            .map_err(|e| persistence_error("prepare_fts", &e))?;
        let ids = stmt
            .query_map(params![match_query], |row| row.get::<_, String>(0))
            .map_err(|e| persistence_error("query_fts", &e))?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| persistence_error("read_fts", &e))?;
        drop(stmt);

        let mut results = Vec::new();
        for id in ids {
            if let Some(proposition) = Self::load_by_id(&conn, &PropositionId::new(id))? {
                let keep = filter.is_none_or(|query| query.matches(&proposition, now));
                if keep {
                    results.push(proposition);
                }
            }
        }
        if let Some(limit) = filter.and_then(|q| q.limit) {
            results.truncate(limit);
        }
        Ok(results)
    }

    fn retire(&self, id: &PropositionId) -> Result<bool> {
        let conn = self.lock();
        let updated = conn
            .execute(
                "UPDATE propositions SET status = ?1 WHERE id = ?2",
                params![PropositionStatus::Retired.as_str(), id.as_str()],
            )
            .map_err(|e| persistence_error("retire", &e))?;
        Ok(updated > 0)
    }
}

fn persistence_error(operation: &str, cause: &dyn std::fmt::Display) -> Error {
    Error::Persistence {
        operation: operation.to_string(),
        cause: cause.to_string(),
    }
}

fn row_to_proposition(row: &rusqlite::Row<'_>) -> rusqlite::Result<Proposition> {
    let id: String = row.get(0)?;
    let context_id: String = row.get(1)?;
    let text: String = row.get(2)?;
    let confidence: f64 = row.get(3)?;
    let decay: f64 = row.get(4)?;
    let created_ms: i64 = row.get(5)?;
    let revised_ms: i64 = row.get(6)?;
    let grounding_json: String = row.get(7)?;
    let reinforce_count: u32 = row.get(8)?;
    let level: u32 = row.get(9)?;
    let source_ids_json: String = row.get(10)?;
    let status: String = row.get(11)?;
    let reasoning: Option<String> = row.get(12)?;

    let grounding: BTreeSet<ChunkId> = serde_json::from_str(&grounding_json).unwrap_or_default();
    let source_ids: Vec<PropositionId> =
        serde_json::from_str(&source_ids_json).unwrap_or_default();

    Ok(Proposition {
        id: PropositionId::new(id),
        context_id: ContextId::new(context_id),
        text,
        mentions: Vec::new(),
        confidence,
        decay,
        created: timestamp_from_millis(created_ms),
        revised: timestamp_from_millis(revised_ms),
        grounding,
        reinforce_count,
        level,
        source_ids,
        status: PropositionStatus::parse(&status).unwrap_or_default(),
        reasoning,
    })
}

fn timestamp_from_millis(millis: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(millis).unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
}

fn encode_embedding(embedding: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(embedding.len() * 4);
    for value in embedding {
        bytes.extend_from_slice(&value.to_le_bytes());
    }
    bytes
}

fn decode_embedding(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

/// Builds an FTS5 MATCH query from free text.
///
/// Each alphanumeric token is double-quoted and joined with OR, so
/// punctuation in the probe can never produce FTS syntax errors.
fn fts_match_query(text: &str) -> String {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| format!("\"{t}\""))
        .collect::<Vec<_>>()
        .join(" OR ")
}
