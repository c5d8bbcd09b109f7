//! Segmentation passes: fetch, plan in parallel, then write in transactions.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use chrono::{DateTime, Utc};
use rayon::prelude::*;

use crate::chunk::rebuild_parts;
use crate::config::{Limits, SegmentationConfig, TransactionScope};
use crate::error::{ConsistencyError, SegmentError};
use crate::ident::IdentifierAssigner;
use crate::runs::renumber;
use crate::seasons::{SeasonPlan, plan_seasons};
use crate::sequences::{SequencePlan, plan_sequences};
use crate::store::{DataStore, RecordAssignment, StoreTransaction};
use crate::types::{
    Assignment, EffectiveTimestamp, PartitionKey, Record, RunId, RunKind, RunSummary, count_u32,
};

/// How a sequence pass treats detections that already have a sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SequenceMode {
    /// Only unassigned detections are placed; stored sequences keep their ids.
    #[default]
    Incremental,
    /// Every stored sequence is dropped and recomputed.
    Rebuild,
}

/// A partition whose writes were rolled back.
#[derive(Debug)]
pub struct PartitionFailure {
    pub partition: PartitionKey,
    pub error: SegmentError,
}

/// What one segmentation pass did.
#[derive(Debug)]
pub struct SegmentationReport {
    pub kind: RunKind,
    /// Partitions seen, including empty ones.
    pub partitions: usize,
    pub records_assigned: usize,
    pub runs_created: usize,
    pub runs_extended: usize,
    /// Groups of new detections that touched more than one stored sequence.
    pub bridged: usize,
    /// Partitions without a single timestamped record.
    pub empty_partitions: Vec<PartitionKey>,
    /// Only filled with [`TransactionScope::PerPartition`].
    pub failed_partitions: Vec<PartitionFailure>,
}

impl SegmentationReport {
    fn new(kind: RunKind, partitions: usize) -> Self {
        Self {
            kind,
            partitions,
            records_assigned: 0,
            runs_created: 0,
            runs_extended: 0,
            bridged: 0,
            empty_partitions: Vec::new(),
            failed_partitions: Vec::new(),
        }
    }

    /// True when every partition committed.
    pub fn is_complete(&self) -> bool {
        self.failed_partitions.is_empty()
    }

    fn absorb(&mut self, outcome: PartitionOutcome) {
        self.records_assigned += outcome.assigned;
        self.runs_created += outcome.created;
        self.runs_extended += outcome.extended;
        self.bridged += outcome.bridged;
    }

    fn log(&self) {
        tracing::info!(
            kind = %self.kind,
            partitions = self.partitions,
            records_assigned = self.records_assigned,
            runs_created = self.runs_created,
            runs_extended = self.runs_extended,
            bridged = self.bridged,
            empty = self.empty_partitions.len(),
            failed = self.failed_partitions.len(),
            "segmentation pass finished"
        );
    }
}

#[derive(Debug, Default)]
struct PartitionOutcome {
    assigned: usize,
    created: usize,
    extended: usize,
    bridged: usize,
}

/// Recomputes every season from scratch.
pub fn segment_seasons<S: DataStore>(
    store: &mut S,
    config: &SegmentationConfig,
) -> Result<SegmentationReport, SegmentError> {
    let limits = config.validate()?;
    let records = store.fetch_records(&config.selection(RunKind::Season))?;
    let partitions = group_by_partition(records);
    tracing::debug!(partitions = partitions.len(), "loaded photos for season pass");

    let mut report = SegmentationReport::new(RunKind::Season, partitions.len());
    let plans: Vec<SeasonPlan> = partitions
        .par_iter()
        .map(|(partition, records)| plan_seasons(partition, records, limits.season_gap_days))
        .collect();
    note_empty(&mut report, plans.iter().filter(|plan| plan.is_empty()).map(|plan| &plan.partition));

    let mut assigner = IdentifierAssigner::new(limits.id_attempts);
    match config.transaction_scope {
        TransactionScope::Global => {
            let mut tx = store.begin()?;
            tx.clear_runs(RunKind::Season, None)?;
            for plan in &plans {
                report.absorb(write_seasons(&mut tx, &mut assigner, plan)?);
            }
            tx.commit()?;
        }
        TransactionScope::PerPartition => {
            for plan in &plans {
                match commit_season_partition(store, &mut assigner, plan) {
                    Ok(outcome) => report.absorb(outcome),
                    Err(error) => fail(&mut report, plan.partition.clone(), error),
                }
            }
        }
    }

    report.log();
    Ok(report)
}

fn commit_season_partition<S: DataStore>(
    store: &mut S,
    assigner: &mut IdentifierAssigner,
    plan: &SeasonPlan,
) -> Result<PartitionOutcome, SegmentError> {
    let mut tx = store.begin()?;
    tx.clear_runs(RunKind::Season, Some(&plan.partition))?;
    let outcome = write_seasons(&mut tx, assigner, plan)?;
    tx.commit()?;
    Ok(outcome)
}

fn write_seasons<T: StoreTransaction>(
    tx: &mut T,
    assigner: &mut IdentifierAssigner,
    plan: &SeasonPlan,
) -> Result<PartitionOutcome, SegmentError> {
    for summary in &plan.summaries {
        assigner.register(&summary.run_id)?;
    }
    claim_all(assigner, &plan.assignments)?;

    tx.upsert_run_summary(RunKind::Season, &plan.summaries)?;
    let written = tx.write_assignments(&plan.assignments)?;
    ensure_written(plan.assignments.len(), written)?;

    tracing::debug!(
        partition = %plan.partition,
        seasons = plan.summaries.len(),
        photos = written,
        "wrote seasons"
    );
    Ok(PartitionOutcome {
        assigned: written,
        created: plan.summaries.len(),
        ..PartitionOutcome::default()
    })
}

/// Places detections into sequences.
///
/// In [`SequenceMode::Incremental`] detections that already belong to a
/// sequence keep their sequence and part.
pub fn segment_sequences<S: DataStore>(
    store: &mut S,
    config: &SegmentationConfig,
    mode: SequenceMode,
) -> Result<SegmentationReport, SegmentError> {
    let limits = config.validate()?;
    let mut records = store.fetch_records(&config.selection(RunKind::Sequence))?;
    if mode == SequenceMode::Rebuild {
        for record in &mut records {
            record.assignment = None;
        }
    }
    let partitions = group_by_partition(records);
    tracing::debug!(
        partitions = partitions.len(),
        ?mode,
        "loaded detections for sequence pass"
    );

    let mut report = SegmentationReport::new(RunKind::Sequence, partitions.len());
    note_empty(
        &mut report,
        partitions
            .iter()
            .filter(|(_, records)| records.iter().all(|record| record.effective_ts().is_none()))
            .map(|(partition, _)| partition),
    );

    let mut assigner = IdentifierAssigner::new(limits.id_attempts);
    match config.transaction_scope {
        TransactionScope::Global => {
            let mut tx = store.begin()?;
            if mode == SequenceMode::Rebuild {
                tx.clear_runs(RunKind::Sequence, None)?;
            }
            let stored = partitions
                .iter()
                .map(|(partition, _)| tx.read_run_summary(RunKind::Sequence, partition))
                .collect::<Result<Vec<_>, _>>()?;
            let plans: Vec<SequencePlan> = partitions
                .into_par_iter()
                .zip(stored)
                .map(|((partition, records), existing)| {
                    plan_sequences(&partition, &records, existing, limits.sequence_gap_minutes)
                })
                .collect();
            for plan in plans {
                report.absorb(write_sequences(&mut tx, &mut assigner, plan, limits)?);
            }
            tx.commit()?;
        }
        TransactionScope::PerPartition => {
            let mut snapshot: HashMap<PartitionKey, Vec<RunSummary>> = HashMap::new();
            if mode == SequenceMode::Incremental {
                for run in store.list_runs(RunKind::Sequence)? {
                    snapshot.entry(run.partition.clone()).or_default().push(run);
                }
            }
            let plans: Vec<(SequencePlan, Vec<Record>)> = partitions
                .into_par_iter()
                .map(|(partition, records)| {
                    let existing = snapshot.get(&partition).cloned().unwrap_or_default();
                    let plan =
                        plan_sequences(&partition, &records, existing, limits.sequence_gap_minutes);
                    (plan, records)
                })
                .collect();
            for (plan, records) in plans {
                let partition = plan.partition.clone();
                match commit_sequence_partition(store, &mut assigner, plan, &records, mode, limits) {
                    Ok(outcome) => report.absorb(outcome),
                    Err(error) => fail(&mut report, partition, error),
                }
            }
        }
    }

    report.log();
    Ok(report)
}

fn commit_sequence_partition<S: DataStore>(
    store: &mut S,
    assigner: &mut IdentifierAssigner,
    plan: SequencePlan,
    records: &[Record],
    mode: SequenceMode,
    limits: Limits,
) -> Result<PartitionOutcome, SegmentError> {
    let mut tx = store.begin()?;
    if mode == SequenceMode::Rebuild {
        tx.clear_runs(RunKind::Sequence, Some(&plan.partition))?;
    }

    let mut stored = tx.read_run_summary(RunKind::Sequence, &plan.partition)?;
    stored.sort_by(|a, b| a.start.cmp(&b.start).then_with(|| a.run_id.cmp(&b.run_id)));
    let plan = if stored == plan.existing {
        plan
    } else {
        tracing::debug!(partition = %plan.partition, "stored sequences changed since planning");
        plan_sequences(&plan.partition, records, stored, limits.sequence_gap_minutes)
    };

    let outcome = write_sequences(&mut tx, assigner, plan, limits)?;
    tx.commit()?;
    Ok(outcome)
}

fn write_sequences<T: StoreTransaction>(
    tx: &mut T,
    assigner: &mut IdentifierAssigner,
    plan: SequencePlan,
    limits: Limits,
) -> Result<PartitionOutcome, SegmentError> {
    let bridged = plan.bridged;
    let resolved = plan.resolve(limits.max_members_per_sequence, || {
        assigner.mint(|candidate| tx.run_id_exists(RunKind::Sequence, candidate))
    })?;
    claim_all(assigner, &resolved.assignments)?;

    tx.upsert_run_summary(RunKind::Sequence, &resolved.summaries)?;
    let written = tx.write_assignments(&resolved.assignments)?;
    ensure_written(resolved.assignments.len(), written)?;

    if written > 0 {
        tracing::debug!(
            partition = %resolved.partition,
            created = resolved.created,
            extended = resolved.extended,
            detections = written,
            "wrote sequences"
        );
    }
    Ok(PartitionOutcome {
        assigned: written,
        created: resolved.created,
        extended: resolved.extended,
        bridged,
    })
}

/// What a prune pass changed.
#[derive(Debug, Default)]
pub struct PruneReport {
    /// Sequences deleted because none of their detections are left.
    pub deleted: Vec<RunId>,
    /// Surviving sequences whose span, count or parts were rewritten.
    pub refreshed: usize,
}

/// Deletes sequences that no longer have member detections, brings the
/// summaries of the others back in line with their remaining members and
/// renumbers every partition that changed.
///
/// Members keep their sequence and part index; parts left empty disappear.
pub fn prune_sequences<S: DataStore>(
    store: &mut S,
    config: &SegmentationConfig,
) -> Result<PruneReport, SegmentError> {
    let selection = config.selection(RunKind::Sequence);
    let partitions: BTreeSet<PartitionKey> = store
        .list_runs(RunKind::Sequence)?
        .into_iter()
        .map(|run| run.partition)
        .collect();

    let mut tx = store.begin()?;
    let deleted = tx.delete_orphan_runs(RunKind::Sequence)?;
    let members = members_by_run(tx.fetch_records(&selection)?);

    let mut refreshed = 0;
    for partition in &partitions {
        let mut runs = tx.read_run_summary(RunKind::Sequence, partition)?;
        let mut changed: HashSet<RunId> = HashSet::new();
        for run in &mut runs {
            if members
                .get(&run.run_id)
                .is_some_and(|members| refresh_summary(run, members))
            {
                changed.insert(run.run_id.clone());
            }
        }
        refreshed += changed.len();
        changed.extend(renumber(&mut runs));
        runs.retain(|run| changed.contains(&run.run_id));
        if !runs.is_empty() {
            tracing::debug!(partition = %partition, runs = runs.len(), "rewriting sequence summaries");
            tx.upsert_run_summary(RunKind::Sequence, &runs)?;
        }
    }
    tx.commit()?;

    tracing::info!(
        deleted = deleted.len(),
        refreshed,
        "pruned sequences without detections"
    );
    Ok(PruneReport { deleted, refreshed })
}

/// Timed members of each sequence with their stored part index.
fn members_by_run(records: Vec<Record>) -> HashMap<RunId, Vec<(DateTime<Utc>, u32)>> {
    let mut members: HashMap<RunId, Vec<(DateTime<Utc>, u32)>> = HashMap::new();
    for record in records {
        let Some(at) = record.effective_ts().map(EffectiveTimestamp::instant) else {
            continue;
        };
        if let Some(Assignment {
            run_id,
            part_index: Some(part_index),
        }) = record.assignment
        {
            members.entry(run_id).or_default().push((at, part_index));
        }
    }
    members
}

/// Recomputes span, count and parts from `members`. Returns true if anything changed.
fn refresh_summary(run: &mut RunSummary, members: &[(DateTime<Utc>, u32)]) -> bool {
    let (Some(start), Some(end)) = (
        members.iter().map(|(at, _)| *at).min(),
        members.iter().map(|(at, _)| *at).max(),
    ) else {
        return false;
    };
    let refreshed = RunSummary {
        start,
        end,
        member_count: count_u32(members.len()),
        parts: rebuild_parts(members),
        ..run.clone()
    };
    if refreshed == *run {
        return false;
    }
    *run = refreshed;
    true
}

fn group_by_partition(records: Vec<Record>) -> Vec<(PartitionKey, Vec<Record>)> {
    let mut grouped: BTreeMap<PartitionKey, Vec<Record>> = BTreeMap::new();
    for record in records {
        grouped.entry(record.partition.clone()).or_default().push(record);
    }
    grouped.into_iter().collect()
}

fn note_empty<'a>(report: &mut SegmentationReport, partitions: impl Iterator<Item = &'a PartitionKey>) {
    for partition in partitions {
        tracing::warn!(
            kind = %report.kind,
            partition = %partition,
            "partition has no timestamped records"
        );
        report.empty_partitions.push(partition.clone());
    }
}

fn fail(report: &mut SegmentationReport, partition: PartitionKey, error: SegmentError) {
    tracing::warn!(
        kind = %report.kind,
        partition = %partition,
        error = %error,
        "partition rolled back"
    );
    report.failed_partitions.push(PartitionFailure { partition, error });
}

fn claim_all(
    assigner: &mut IdentifierAssigner,
    assignments: &[RecordAssignment],
) -> Result<(), ConsistencyError> {
    for assignment in assignments {
        assigner.claim(&assignment.record_id, &assignment.run_id)?;
    }
    Ok(())
}

fn ensure_written(expected: usize, written: usize) -> Result<(), ConsistencyError> {
    if written == expected {
        Ok(())
    } else {
        Err(ConsistencyError::ConcurrentAssignment { expected, written })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{MemoryStore, MemoryTransaction};
    use crate::source::{Observation, RecordSelection};
    use crate::store::{Placement, StoreError};
    use crate::types::{PartSummary, RecordId};
    use chrono::{Duration, TimeZone};

    const HORSE: &str = "Equus ferus caballus";

    fn ts(minutes: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2020, 6, 1, 6, 0, 0).unwrap() + Duration::minutes(minutes)
    }

    fn detection(id: &str, camera: &str, minutes: Option<i64>) -> Observation {
        Observation {
            id: RecordId::new(id).unwrap(),
            site_name: Some("Austin".to_string()),
            camera_id: Some(camera.to_string()),
            subject: Some(HORSE.to_string()),
            taken_at: minutes.map(ts),
            modified_at: None,
        }
    }

    fn photo(id: &str, camera: &str, day: i64) -> Observation {
        Observation {
            subject: None,
            ..detection(id, camera, Some(day * 24 * 60))
        }
    }

    fn config(max_members: i64) -> SegmentationConfig {
        SegmentationConfig {
            max_members_per_sequence: max_members,
            ..SegmentationConfig::default()
        }
    }

    fn reference_store() -> MemoryStore {
        let mut store = MemoryStore::new();
        store.insert_detections(
            [0, 10, 20, 90, 95, 200].map(|m| detection(&format!("t{m}"), "1", Some(m))),
        );
        store
    }

    fn sequence_of(store: &MemoryStore, id: &str) -> Option<(RunId, u32)> {
        store
            .assignment(RunKind::Sequence, &RecordId::new(id).unwrap())
            .map(|(run_id, placement)| match placement {
                Placement::Sequence { part_index } => (run_id.clone(), part_index),
                Placement::Season { .. } => unreachable!(),
            })
    }

    fn incremental(store: &mut MemoryStore, config: &SegmentationConfig) -> SegmentationReport {
        segment_sequences(store, config, SequenceMode::Incremental).unwrap()
    }

    #[test]
    fn test_reference_scenario_end_to_end() {
        let mut store = reference_store();
        let config = config(2);

        let report = incremental(&mut store, &config);
        assert_eq!(report.records_assigned, 6);
        assert_eq!(report.runs_created, 3);

        let a = sequence_of(&store, "t0").unwrap().0;
        assert_eq!(sequence_of(&store, "t10"), Some((a.clone(), 1)));
        assert_eq!(sequence_of(&store, "t20"), Some((a.clone(), 2)));
        let b = sequence_of(&store, "t90").unwrap().0;
        assert_eq!(sequence_of(&store, "t95"), Some((b.clone(), 1)));
        assert_ne!(a, b);

        let before: Vec<_> = ["t0", "t10", "t20", "t90", "t95", "t200"]
            .iter()
            .map(|id| sequence_of(&store, id))
            .collect();

        store.insert_detections([detection("t25", "1", Some(25))]);
        let report = incremental(&mut store, &config);
        assert_eq!(report.records_assigned, 1);
        assert_eq!(report.runs_created, 0);
        assert_eq!(report.runs_extended, 1);
        assert_eq!(sequence_of(&store, "t25"), Some((a.clone(), 2)));

        let after: Vec<_> = ["t0", "t10", "t20", "t90", "t95", "t200"]
            .iter()
            .map(|id| sequence_of(&store, id))
            .collect();
        assert_eq!(before, after);

        let runs = store.list_runs(RunKind::Sequence).unwrap();
        assert_eq!(runs.len(), 3);
        let run_a = runs.iter().find(|run| run.run_id == a).unwrap();
        assert_eq!(run_a.member_count, 4);
        assert_eq!(run_a.end, ts(25));
        assert_eq!(run_a.parts[1].member_count, 2);
    }

    #[test]
    fn test_second_pass_without_new_records_changes_nothing() {
        let mut store = reference_store();
        let config = config(2);
        incremental(&mut store, &config);
        let runs = store.list_runs(RunKind::Sequence).unwrap();

        let report = incremental(&mut store, &config);
        assert_eq!(report.records_assigned, 0);
        assert_eq!(report.runs_created, 0);
        assert_eq!(store.list_runs(RunKind::Sequence).unwrap(), runs);
    }

    #[test]
    fn test_seasons_are_idempotent() {
        let mut store = MemoryStore::new();
        store.insert_photos([
            photo("p1", "1", 0),
            photo("p2", "1", 3),
            photo("p3", "1", 50),
            photo("p4", "2", 1),
        ]);
        let config = SegmentationConfig::default();

        let report = segment_seasons(&mut store, &config).unwrap();
        assert_eq!(report.partitions, 2);
        assert_eq!(report.runs_created, 3);
        assert_eq!(report.records_assigned, 4);
        let first = store.list_runs(RunKind::Season).unwrap();

        segment_seasons(&mut store, &config).unwrap();
        assert_eq!(store.list_runs(RunKind::Season).unwrap(), first);

        let (_, placement) = store
            .assignment(RunKind::Season, &RecordId::new("p2").unwrap())
            .unwrap();
        assert_eq!(
            placement,
            Placement::Season {
                run_index: 1,
                order_within_run: 2
            }
        );
    }

    #[test]
    fn test_season_rebuild_drops_stale_seasons() {
        let mut store = MemoryStore::new();
        store.insert_photos([photo("p1", "1", 0), photo("p2", "1", 50)]);
        let config = SegmentationConfig::default();
        segment_seasons(&mut store, &config).unwrap();
        assert_eq!(store.list_runs(RunKind::Season).unwrap().len(), 2);

        store.insert_photos([photo("p3", "1", 25)]);
        segment_seasons(&mut store, &config).unwrap();
        let seasons = store.list_runs(RunKind::Season).unwrap();
        assert_eq!(seasons.len(), 1);
        assert_eq!(seasons[0].member_count, 3);
    }

    #[test]
    fn test_untimed_partition_is_reported_not_fatal() {
        let mut store = reference_store();
        store.insert_detections([detection("lost", "9", None)]);

        let report = incremental(&mut store, &config(2));
        assert_eq!(report.partitions, 2);
        assert_eq!(report.empty_partitions.len(), 1);
        assert_eq!(report.empty_partitions[0].components()[1], "9");
        assert!(sequence_of(&store, "lost").is_none());
        assert_eq!(report.records_assigned, 6);
    }

    #[test]
    fn test_invalid_config_fails_before_any_write() {
        let mut store = reference_store();
        let result = segment_sequences(&mut store, &config(0), SequenceMode::Incremental);
        assert!(matches!(result, Err(SegmentError::Config(_))));
        assert!(store.list_runs(RunKind::Sequence).unwrap().is_empty());
    }

    #[test]
    fn test_global_scope_rolls_back_everything() {
        let mut store = reference_store();
        store.insert_detections([detection("other", "2", Some(0))]);
        store.refuse_writes_for(PartitionKey::from_components([
            Some("Austin"),
            Some("2"),
            Some(HORSE),
        ]));

        let result = incremental_result(&mut store, &config(2));
        assert!(matches!(result, Err(SegmentError::Persistence(_))));
        assert!(sequence_of(&store, "t0").is_none());
        assert!(store.list_runs(RunKind::Sequence).unwrap().is_empty());
    }

    fn incremental_result(
        store: &mut MemoryStore,
        config: &SegmentationConfig,
    ) -> Result<SegmentationReport, SegmentError> {
        segment_sequences(store, config, SequenceMode::Incremental)
    }

    #[test]
    fn test_per_partition_scope_isolates_failures() {
        let mut store = reference_store();
        store.insert_detections([detection("other", "2", Some(0))]);
        let failing = PartitionKey::from_components([Some("Austin"), Some("2"), Some(HORSE)]);
        store.refuse_writes_for(failing.clone());
        let config = SegmentationConfig {
            transaction_scope: TransactionScope::PerPartition,
            ..config(2)
        };

        let report = incremental(&mut store, &config);
        assert!(!report.is_complete());
        assert_eq!(report.failed_partitions.len(), 1);
        assert_eq!(report.failed_partitions[0].partition, failing);
        assert_eq!(report.records_assigned, 6);
        assert!(sequence_of(&store, "t0").is_some());
        assert!(sequence_of(&store, "other").is_none());
    }

    #[test]
    fn test_per_partition_scope_matches_global_results() {
        let mut global = reference_store();
        let mut split = reference_store();
        let per_partition = SegmentationConfig {
            transaction_scope: TransactionScope::PerPartition,
            ..config(2)
        };
        incremental(&mut global, &config(2));
        incremental(&mut split, &per_partition);

        for id in ["t0", "t10", "t20", "t90", "t95", "t200"] {
            assert_eq!(
                sequence_of(&global, id).map(|(_, part)| part),
                sequence_of(&split, id).map(|(_, part)| part)
            );
        }
    }

    #[test]
    fn test_rebuild_replaces_stored_sequences() {
        let mut store = reference_store();
        incremental(&mut store, &config(2));
        let old = sequence_of(&store, "t0").unwrap().0;

        let report = segment_sequences(&mut store, &config(30), SequenceMode::Rebuild).unwrap();
        assert_eq!(report.records_assigned, 6);
        assert_eq!(report.runs_created, 3);
        let (new, part) = sequence_of(&store, "t20").unwrap();
        assert_ne!(new, old);
        assert_eq!(part, 1);
        assert_eq!(store.list_runs(RunKind::Sequence).unwrap().len(), 3);
    }

    #[test]
    fn test_prune_removes_emptied_sequences_and_renumbers() {
        let mut store = reference_store();
        incremental(&mut store, &config(2));
        let first = sequence_of(&store, "t0").unwrap().0;
        store.remove_detections(&[
            RecordId::new("t0").unwrap(),
            RecordId::new("t10").unwrap(),
            RecordId::new("t20").unwrap(),
        ]);

        let report = prune_sequences(&mut store, &config(2)).unwrap();
        assert_eq!(report.deleted, vec![first]);
        assert_eq!(report.refreshed, 0);

        let runs = store.list_runs(RunKind::Sequence).unwrap();
        let indexes: Vec<_> = runs.iter().map(|run| (run.start, run.run_index)).collect();
        assert_eq!(indexes, vec![(ts(90), 1), (ts(200), 2)]);
    }

    #[test]
    fn test_prune_refreshes_partly_emptied_sequence() {
        let mut store = reference_store();
        incremental(&mut store, &config(2));
        let first = sequence_of(&store, "t0").unwrap().0;
        store.remove_detections(&[RecordId::new("t10").unwrap(), RecordId::new("t20").unwrap()]);

        let report = prune_sequences(&mut store, &config(2)).unwrap();
        assert!(report.deleted.is_empty());
        assert_eq!(report.refreshed, 1);

        let runs = store.list_runs(RunKind::Sequence).unwrap();
        let run = runs.iter().find(|run| run.run_id == first).unwrap();
        assert_eq!(run.member_count, 1);
        assert_eq!((run.start, run.end), (ts(0), ts(0)));
        assert_eq!(
            run.parts,
            vec![PartSummary {
                part_index: 1,
                start: ts(0),
                end: ts(0),
                member_count: 1,
            }]
        );

        // a late detection now fills the freed slot of part 1
        store.insert_detections([detection("t25", "1", Some(25))]);
        incremental(&mut store, &config(2));
        assert_eq!(sequence_of(&store, "t25"), Some((first.clone(), 1)));
        let runs = store.list_runs(RunKind::Sequence).unwrap();
        let run = runs.iter().find(|run| run.run_id == first).unwrap();
        assert_eq!(run.member_count, 2);
        assert_eq!(run.parts.len(), 1);
        assert_eq!(run.parts[0].member_count, 2);
    }

    #[test]
    fn test_prune_without_changes_writes_nothing() {
        let mut store = reference_store();
        incremental(&mut store, &config(2));
        let before = store.list_runs(RunKind::Sequence).unwrap();

        let report = prune_sequences(&mut store, &config(2)).unwrap();
        assert!(report.deleted.is_empty());
        assert_eq!(report.refreshed, 0);
        assert_eq!(store.list_runs(RunKind::Sequence).unwrap(), before);
    }

    /// Assigns a detection between the read and the write of a pass.
    struct RacingStore {
        inner: MemoryStore,
        race: Option<RecordId>,
    }

    impl DataStore for RacingStore {
        type Transaction<'a> = MemoryTransaction<'a>;

        fn fetch_records(&self, selection: &RecordSelection) -> Result<Vec<Record>, StoreError> {
            self.inner.fetch_records(selection)
        }

        fn list_runs(&self, kind: RunKind) -> Result<Vec<RunSummary>, StoreError> {
            self.inner.list_runs(kind)
        }

        fn begin(&mut self) -> Result<Self::Transaction<'_>, StoreError> {
            if let Some(record_id) = self.race.take() {
                self.inner.force_assignment(
                    record_id,
                    RunId::new("elsewhere").unwrap(),
                    Placement::Sequence { part_index: 1 },
                );
            }
            self.inner.begin()
        }
    }

    #[test]
    fn test_concurrent_assignment_aborts_pass() {
        let mut store = RacingStore {
            inner: reference_store(),
            race: Some(RecordId::new("t90").unwrap()),
        };

        let result = segment_sequences(&mut store, &config(2), SequenceMode::Incremental);
        assert!(matches!(
            result,
            Err(SegmentError::Consistency(
                ConsistencyError::ConcurrentAssignment {
                    expected: 6,
                    written: 5
                }
            ))
        ));
        assert!(store.inner.list_runs(RunKind::Sequence).unwrap().is_empty());
    }
}
