//! Storage backends and contracts.
//!
//! [`PropositionRepository`] is the only shared mutable resource in the
//! core. Two implementations ship with the crate: an in-process store for
//! tests and intra-session work ([`MemoryPropositionRepository`]) and a
//! durable SQLite store ([`SqlitePropositionRepository`]).

mod memory;
mod sqlite;
mod traits;

pub use memory::{MemoryEntityRepository, MemoryHistoryStore, MemoryPropositionRepository};
pub use sqlite::SqlitePropositionRepository;
pub use traits::{EntityRepository, HistoryStore, PropositionRepository};

use crate::models::{ContextId, Proposition, PropositionId};
use crate::{Error, Result};

/// Validates the source-reference invariant for one proposition.
///
/// `lookup` resolves an ID to `(context_id, level)` within the batch or
/// the backing store. Shared by both repository implementations so the
/// DAG rule cannot drift between them.
pub(crate) fn validate_source_references<F>(proposition: &Proposition, lookup: F) -> Result<()>
where
    F: Fn(&PropositionId) -> Option<(ContextId, u32)>,
{
    if proposition.level == 0 && !proposition.source_ids.is_empty() {
        return Err(Error::InvalidInput(format!(
            "proposition {} has level 0 but cites {} sources",
            proposition.id,
            proposition.source_ids.len()
        )));
    }
    if proposition.level > 0 && proposition.source_ids.is_empty() {
        return Err(Error::InvalidInput(format!(
            "proposition {} has level {} but cites no sources",
            proposition.id, proposition.level
        )));
    }
    for source_id in &proposition.source_ids {
        let Some((context_id, level)) = lookup(source_id) else {
            return Err(Error::InvalidInput(format!(
                "proposition {} cites unknown source {source_id}",
                proposition.id
            )));
        };
        if context_id != proposition.context_id {
            return Err(Error::InvalidInput(format!(
                "proposition {} cites source {source_id} from another context",
                proposition.id
            )));
        }
        if level >= proposition.level {
            return Err(Error::InvalidInput(format!(
                "proposition {} (level {}) cites source {source_id} at level {level}",
                proposition.id, proposition.level
            )));
        }
    }
    Ok(())
}
