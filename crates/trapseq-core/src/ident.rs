//! Run identifier allocation.
//!
//! Seasons are rebuilt on every pass, so their ids are derived from the
//! partition and start instant: a rebuild over unchanged photos reproduces the
//! same ids. Sequences persist, so new ones get random 128-bit ids, checked
//! against the store and re-drawn on collision.

use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet};

use chrono::{DateTime, SecondsFormat, Utc};
use uuid::Uuid;

use crate::error::ConsistencyError;
use crate::store::StoreError;
use crate::types::{PartitionKey, RecordId, RunId};

/// Mints run ids and tracks record claims for one pass.
#[derive(Debug)]
pub struct IdentifierAssigner {
    attempts: u32,
    issued: HashSet<RunId>,
    claims: HashMap<RecordId, RunId>,
}

/// Why minting stopped.
#[derive(Debug)]
pub enum MintError {
    Consistency(ConsistencyError),
    Store(StoreError),
}

impl From<MintError> for crate::error::SegmentError {
    fn from(err: MintError) -> Self {
        match err {
            MintError::Consistency(err) => Self::Consistency(err),
            MintError::Store(err) => Self::Persistence(err),
        }
    }
}

impl IdentifierAssigner {
    pub fn new(attempts: u32) -> Self {
        Self {
            attempts: attempts.max(1),
            issued: HashSet::new(),
            claims: HashMap::new(),
        }
    }

    /// Derives the id of a season from its partition and start.
    pub fn season_id(partition: &PartitionKey, start: DateTime<Utc>) -> RunId {
        let content = format!(
            "season|{}|{}",
            partition.components().join("\u{1f}"),
            start.to_rfc3339_opts(SecondsFormat::Millis, true)
        );
        let id = Uuid::new_v5(&Uuid::NAMESPACE_OID, content.as_bytes());
        RunId::new(id.simple().to_string()).expect("UUID string is never empty")
    }

    /// Records a derived id, rejecting one already issued in this pass.
    pub fn register(&mut self, run_id: &RunId) -> Result<(), ConsistencyError> {
        if self.issued.insert(run_id.clone()) {
            Ok(())
        } else {
            Err(ConsistencyError::DuplicateRunId {
                run_id: run_id.clone(),
            })
        }
    }

    /// Mints a fresh random id that `taken` reports as unused.
    pub fn mint<F>(&mut self, mut taken: F) -> Result<RunId, MintError>
    where
        F: FnMut(&RunId) -> Result<bool, StoreError>,
    {
        for _ in 0..self.attempts {
            let candidate = random_run_id();
            if self.issued.contains(&candidate) || taken(&candidate).map_err(MintError::Store)? {
                tracing::warn!(run_id = %candidate, "run id collision, drawing another");
                continue;
            }
            self.issued.insert(candidate.clone());
            return Ok(candidate);
        }
        Err(MintError::Consistency(
            ConsistencyError::IdentifiersExhausted {
                attempts: self.attempts,
            },
        ))
    }

    /// Claims a record for a run.
    ///
    /// Claiming a record twice for the same run is harmless; claiming it for a
    /// second run is a consistency failure.
    pub fn claim(&mut self, record_id: &RecordId, run_id: &RunId) -> Result<(), ConsistencyError> {
        match self.claims.entry(record_id.clone()) {
            Entry::Occupied(existing) if existing.get() != run_id => {
                Err(ConsistencyError::ConflictingClaim {
                    record_id: record_id.clone(),
                    first: existing.get().clone(),
                    second: run_id.clone(),
                })
            }
            Entry::Occupied(_) => Ok(()),
            Entry::Vacant(slot) => {
                slot.insert(run_id.clone());
                Ok(())
            }
        }
    }
}

fn random_run_id() -> RunId {
    RunId::new(Uuid::new_v4().simple().to_string()).expect("UUID string is never empty")
}
