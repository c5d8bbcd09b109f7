//! In-process [`DataStore`] backend.
//!
//! Holds photos and detections as [`Observation`]s. A transaction works on a
//! copy of the assignment state and swaps it in on commit, so dropping one
//! leaves the store untouched.

use std::collections::{BTreeMap, HashMap, HashSet};

use thiserror::Error;

use crate::source::{Observation, RecordSelection, sort_records};
use crate::store::{DataStore, Placement, RecordAssignment, StoreError, StoreTransaction};
use crate::types::{Assignment, PartitionKey, Record, RecordId, RunId, RunKind, RunSummary};

/// Errors raised by the in-memory backend.
#[derive(Debug, Error)]
pub enum MemoryError {
    #[error("no stored {kind} run with id {run_id}")]
    UnknownRun { kind: RunKind, run_id: RunId },

    #[error("writes for partition {partition} are set to fail")]
    WriteRefused { partition: PartitionKey },
}

#[derive(Debug, Clone, Default)]
struct State {
    assignments: HashMap<RunKind, HashMap<RecordId, (RunId, Placement)>>,
    runs: HashMap<RunKind, BTreeMap<RunId, RunSummary>>,
}

impl State {
    fn assignments(&self, kind: RunKind) -> Option<&HashMap<RecordId, (RunId, Placement)>> {
        self.assignments.get(&kind)
    }

    fn runs(&self, kind: RunKind) -> impl Iterator<Item = &RunSummary> {
        self.runs.get(&kind).into_iter().flat_map(BTreeMap::values)
    }
}

/// Photos, detections and their run assignments, all in memory.
#[derive(Debug, Default)]
pub struct MemoryStore {
    photos: Vec<Observation>,
    detections: Vec<Observation>,
    state: State,
    refuse_writes_for: HashSet<PartitionKey>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_photos(&mut self, photos: impl IntoIterator<Item = Observation>) {
        self.photos.extend(photos);
    }

    pub fn insert_detections(&mut self, detections: impl IntoIterator<Item = Observation>) {
        self.detections.extend(detections);
    }

    /// Removes detections, leaving their runs behind.
    pub fn remove_detections(&mut self, ids: &[RecordId]) {
        self.detections.retain(|detection| !ids.contains(&detection.id));
        if let Some(assigned) = self.state.assignments.get_mut(&RunKind::Sequence) {
            for id in ids {
                assigned.remove(id);
            }
        }
    }

    /// Makes every later summary write for `partition` fail.
    #[cfg(test)]
    pub(crate) fn refuse_writes_for(&mut self, partition: PartitionKey) {
        self.refuse_writes_for.insert(partition);
    }

    /// The stored assignment of a record, if any.
    pub fn assignment(&self, kind: RunKind, record_id: &RecordId) -> Option<(&RunId, Placement)> {
        self.state
            .assignments(kind)?
            .get(record_id)
            .map(|(run_id, placement)| (run_id, *placement))
    }

    /// Assigns a record directly, as a concurrent writer would.
    #[cfg(test)]
    pub(crate) fn force_assignment(&mut self, record_id: RecordId, run_id: RunId, placement: Placement) {
        self.state
            .assignments
            .entry(placement.kind())
            .or_default()
            .insert(record_id, (run_id, placement));
    }

    fn records(&self, state: &State, selection: &RecordSelection) -> Vec<Record> {
        let assigned = state.assignments(selection.kind);
        let mut records: Vec<Record> = self
            .observations(selection.kind)
            .iter()
            .map(|observation| {
                let assignment = assigned
                    .and_then(|map| map.get(&observation.id))
                    .map(|(run_id, placement)| Assignment {
                        run_id: run_id.clone(),
                        part_index: match placement {
                            Placement::Sequence { part_index } => Some(*part_index),
                            Placement::Season { .. } => None,
                        },
                    });
                observation.to_record(selection, assignment)
            })
            .collect();
        sort_records(&mut records);
        records
    }

    fn observations(&self, kind: RunKind) -> &[Observation] {
        match kind {
            RunKind::Season => &self.photos,
            RunKind::Sequence => &self.detections,
        }
    }
}

impl DataStore for MemoryStore {
    type Transaction<'a> = MemoryTransaction<'a>;

    fn fetch_records(&self, selection: &RecordSelection) -> Result<Vec<Record>, StoreError> {
        Ok(self.records(&self.state, selection))
    }

    fn list_runs(&self, kind: RunKind) -> Result<Vec<RunSummary>, StoreError> {
        let mut runs: Vec<RunSummary> = self.state.runs(kind).cloned().collect();
        runs.sort_by(|a, b| {
            a.partition
                .cmp(&b.partition)
                .then_with(|| a.run_index.cmp(&b.run_index))
        });
        Ok(runs)
    }

    fn begin(&mut self) -> Result<Self::Transaction<'_>, StoreError> {
        let working = self.state.clone();
        Ok(MemoryTransaction {
            store: self,
            working,
        })
    }
}

/// A copy-on-begin transaction over a [`MemoryStore`].
#[derive(Debug)]
pub struct MemoryTransaction<'a> {
    store: &'a mut MemoryStore,
    working: State,
}

impl MemoryTransaction<'_> {
    fn record_exists(&self, kind: RunKind, record_id: &RecordId) -> bool {
        self.store
            .observations(kind)
            .iter()
            .any(|observation| &observation.id == record_id)
    }
}

impl StoreTransaction for MemoryTransaction<'_> {
    fn fetch_records(&self, selection: &RecordSelection) -> Result<Vec<Record>, StoreError> {
        Ok(self.store.records(&self.working, selection))
    }

    fn read_run_summary(
        &self,
        kind: RunKind,
        partition: &PartitionKey,
    ) -> Result<Vec<RunSummary>, StoreError> {
        let mut runs: Vec<RunSummary> = self
            .working
            .runs(kind)
            .filter(|run| &run.partition == partition)
            .cloned()
            .collect();
        runs.sort_by(|a, b| a.start.cmp(&b.start).then_with(|| a.run_id.cmp(&b.run_id)));
        Ok(runs)
    }

    fn run_id_exists(&self, kind: RunKind, run_id: &RunId) -> Result<bool, StoreError> {
        Ok(self
            .working
            .runs
            .get(&kind)
            .is_some_and(|runs| runs.contains_key(run_id)))
    }

    fn clear_runs(&mut self, kind: RunKind, partition: Option<&PartitionKey>) -> Result<(), StoreError> {
        let runs = self.working.runs.entry(kind).or_default();
        let removed: HashSet<RunId> = runs
            .values()
            .filter(|run| partition.is_none_or(|key| &run.partition == key))
            .map(|run| run.run_id.clone())
            .collect();
        runs.retain(|run_id, _| !removed.contains(run_id));
        if let Some(assigned) = self.working.assignments.get_mut(&kind) {
            assigned.retain(|_, (run_id, _)| !removed.contains(run_id));
        }
        Ok(())
    }

    fn write_assignments(&mut self, assignments: &[RecordAssignment]) -> Result<usize, StoreError> {
        let mut written = 0;
        for assignment in assignments {
            let kind = assignment.placement.kind();
            if !self.run_id_exists(kind, &assignment.run_id)? {
                return Err(StoreError::backend(MemoryError::UnknownRun {
                    kind,
                    run_id: assignment.run_id.clone(),
                }));
            }
            if !self.record_exists(kind, &assignment.record_id) {
                continue;
            }
            let assigned = self.working.assignments.entry(kind).or_default();
            if kind == RunKind::Sequence && assigned.contains_key(&assignment.record_id) {
                continue;
            }
            assigned.insert(
                assignment.record_id.clone(),
                (assignment.run_id.clone(), assignment.placement),
            );
            written += 1;
        }
        Ok(written)
    }

    fn upsert_run_summary(&mut self, kind: RunKind, runs: &[RunSummary]) -> Result<(), StoreError> {
        let stored = self.working.runs.entry(kind).or_default();
        for run in runs {
            if self.store.refuse_writes_for.contains(&run.partition) {
                return Err(StoreError::backend(MemoryError::WriteRefused {
                    partition: run.partition.clone(),
                }));
            }
            if stored
                .get(&run.run_id)
                .is_some_and(|existing| existing.partition != run.partition)
            {
                return Err(StoreError::DuplicateRun {
                    run_id: run.run_id.clone(),
                });
            }
            stored.insert(run.run_id.clone(), run.clone());
        }
        Ok(())
    }

    fn delete_orphan_runs(&mut self, kind: RunKind) -> Result<Vec<RunId>, StoreError> {
        let used: HashSet<&RunId> = self
            .working
            .assignments(kind)
            .map(|assigned| assigned.values().map(|(run_id, _)| run_id).collect())
            .unwrap_or_default();
        let orphans: Vec<RunId> = self
            .working
            .runs(kind)
            .filter(|run| !used.contains(&run.run_id))
            .map(|run| run.run_id.clone())
            .collect();
        if let Some(runs) = self.working.runs.get_mut(&kind) {
            for run_id in &orphans {
                runs.remove(run_id);
            }
        }
        Ok(orphans)
    }

    fn commit(self) -> Result<(), StoreError> {
        self.store.state = self.working;
        Ok(())
    }
}
