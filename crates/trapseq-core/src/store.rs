//! Storage capability the engine is given.
//!
//! The engine never opens connections itself: callers pass a [`DataStore`]
//! and every write goes through one [`StoreTransaction`]. Dropping a
//! transaction without calling [`StoreTransaction::commit`] rolls it back.

use thiserror::Error;

use crate::source::RecordSelection;
use crate::types::{PartitionKey, Record, RecordId, RunId, RunKind, RunSummary};

/// Errors reported by storage backends.
#[derive(Debug, Error)]
pub enum StoreError {
    /// An error from the underlying backend (connection loss, constraint violation).
    #[error("storage backend error: {0}")]
    Backend(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// A run id is already taken by a different run.
    #[error("run id {run_id} already exists")]
    DuplicateRun { run_id: RunId },
}

impl StoreError {
    pub fn backend(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::Backend(Box::new(err))
    }
}

/// Where an assigned record sits inside its run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placement {
    Season {
        run_index: u32,
        /// 1-based rank of the record within its season.
        order_within_run: u32,
    },
    Sequence {
        part_index: u32,
    },
}

impl Placement {
    pub const fn kind(&self) -> RunKind {
        match self {
            Self::Season { .. } => RunKind::Season,
            Self::Sequence { .. } => RunKind::Sequence,
        }
    }
}

/// A run assignment to write onto one record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordAssignment {
    pub record_id: RecordId,
    pub run_id: RunId,
    pub placement: Placement,
}

/// Read access plus transactional writes.
pub trait DataStore {
    type Transaction<'a>: StoreTransaction
    where
        Self: 'a;

    /// Fetches every record of the selection's kind, sorted with
    /// [`crate::source::sort_records`].
    fn fetch_records(&self, selection: &RecordSelection) -> Result<Vec<Record>, StoreError>;

    /// Lists every stored run summary of a kind, ordered by partition then index.
    fn list_runs(&self, kind: RunKind) -> Result<Vec<RunSummary>, StoreError>;

    /// Opens a transaction. It rolls back unless committed.
    fn begin(&mut self) -> Result<Self::Transaction<'_>, StoreError>;
}

/// Operations available inside one transaction.
pub trait StoreTransaction {
    /// Same as [`DataStore::fetch_records`], seeing this transaction's writes.
    fn fetch_records(&self, selection: &RecordSelection) -> Result<Vec<Record>, StoreError>;

    /// Stored runs of one partition, ordered by start time.
    fn read_run_summary(
        &self,
        kind: RunKind,
        partition: &PartitionKey,
    ) -> Result<Vec<RunSummary>, StoreError>;

    fn run_id_exists(&self, kind: RunKind, run_id: &RunId) -> Result<bool, StoreError>;

    /// Deletes stored runs and clears the assignments that pointed at them.
    ///
    /// With `partition` set only that partition's runs are removed.
    fn clear_runs(&mut self, kind: RunKind, partition: Option<&PartitionKey>) -> Result<(), StoreError>;

    /// Writes assignments and returns how many records were updated.
    ///
    /// Sequence placements only update records that are still unassigned, so a
    /// short count means another writer got there first.
    fn write_assignments(&mut self, assignments: &[RecordAssignment]) -> Result<usize, StoreError>;

    /// Inserts or replaces run summaries, including their sub-parts.
    fn upsert_run_summary(&mut self, kind: RunKind, runs: &[RunSummary]) -> Result<(), StoreError>;

    /// Deletes runs that no longer have any member records.
    fn delete_orphan_runs(&mut self, kind: RunKind) -> Result<Vec<RunId>, StoreError>;

    fn commit(self) -> Result<(), StoreError>;
}
