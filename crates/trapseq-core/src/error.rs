//! Engine error taxonomy.

use thiserror::Error;

use crate::config::ConfigError;
use crate::store::StoreError;
use crate::types::{RecordId, RunId};

/// The planned writes contradict each other or the store.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConsistencyError {
    /// Two runs claimed the same record.
    #[error("record {record_id} claimed by runs {first} and {second}")]
    ConflictingClaim {
        record_id: RecordId,
        first: RunId,
        second: RunId,
    },

    /// The same run id was produced for two different runs.
    #[error("run id {run_id} was produced for two runs")]
    DuplicateRunId { run_id: RunId },

    /// Every minted candidate collided with an existing id.
    #[error("no unused run id found after {attempts} attempts")]
    IdentifiersExhausted { attempts: u32 },

    /// Fewer records were updated than planned.
    #[error("{expected} records planned for assignment but {written} were still unassigned")]
    ConcurrentAssignment { expected: usize, written: usize },
}

/// Errors that abort a segmentation pass (or one partition of it).
#[derive(Debug, Error)]
pub enum SegmentError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("consistency check failed: {0}")]
    Consistency(#[from] ConsistencyError),

    #[error("persistence failed: {0}")]
    Persistence(#[from] StoreError),
}
