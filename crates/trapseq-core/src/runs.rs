//! Run assignment: splitting a sorted partition into gap-bounded runs.

use std::collections::HashSet;
use std::ops::Range;

use chrono::{DateTime, Utc};

use crate::gap::{GapScale, RecordGaps, detect_gaps};
use crate::types::{Record, RecordId, RunId, RunSummary, count_u32};

/// A run located by index range within the sequence it was computed over.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunBounds {
    /// 1-based run number, increasing with start time.
    pub run_index: u32,
    pub members: Range<usize>,
}

/// Splits a gap-annotated sequence into maximal runs.
///
/// A new run starts at the first element and wherever `gap_before` exceeds
/// `threshold`. Equal-to-threshold gaps stay within the run.
pub fn assign_runs(gaps: &[RecordGaps], threshold: u32) -> Vec<RunBounds> {
    let limit = f64::from(threshold);
    let mut runs = Vec::new();
    let mut start = 0;

    for (idx, gap) in gaps.iter().enumerate() {
        let starts_run = gap.before.is_none_or(|before| before > limit);
        if starts_run && idx > start {
            runs.push(RunBounds {
                run_index: count_u32(runs.len() + 1),
                members: start..idx,
            });
            start = idx;
        }
    }
    if !gaps.is_empty() {
        runs.push(RunBounds {
            run_index: count_u32(runs.len() + 1),
            members: start..gaps.len(),
        });
    }
    runs
}

/// A record placed on its partition's timeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimedRecord {
    pub id: RecordId,
    pub at: DateTime<Utc>,
}

/// Orders the eligible records of one partition.
///
/// Records without an effective timestamp are dropped. Ties on time are
/// broken by record id so the order is total.
pub fn timeline<'a, I>(records: I) -> Vec<TimedRecord>
where
    I: IntoIterator<Item = &'a Record>,
{
    let mut timed: Vec<TimedRecord> = records
        .into_iter()
        .filter_map(|record| {
            record.effective_ts().map(|ts| TimedRecord {
                id: record.id.clone(),
                at: ts.instant(),
            })
        })
        .collect();
    timed.sort_by(|a, b| a.at.cmp(&b.at).then_with(|| a.id.cmp(&b.id)));
    timed
}

/// A run of time-ordered records.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Run {
    pub run_index: u32,
    /// Members in time order; never empty.
    pub members: Vec<TimedRecord>,
}

impl Run {
    pub fn start(&self) -> DateTime<Utc> {
        self.members[0].at
    }

    pub fn end(&self) -> DateTime<Utc> {
        self.members[self.members.len() - 1].at
    }

    pub fn member_count(&self) -> u32 {
        count_u32(self.members.len())
    }
}

/// Splits a sorted timeline into runs.
pub fn segment(timeline: Vec<TimedRecord>, threshold: u32, scale: GapScale) -> Vec<Run> {
    let instants: Vec<DateTime<Utc>> = timeline.iter().map(|timed| timed.at).collect();
    let bounds = assign_runs(&detect_gaps(&instants, scale), threshold);

    let mut members = timeline.into_iter();
    bounds
        .into_iter()
        .map(|bound| Run {
            run_index: bound.run_index,
            members: members.by_ref().take(bound.members.len()).collect(),
        })
        .collect()
}

/// Renumbers a partition's runs 1.. by start time, ties broken by id.
///
/// Returns the ids whose `run_index` changed.
pub fn renumber(runs: &mut [RunSummary]) -> HashSet<RunId> {
    runs.sort_by(|a, b| a.start.cmp(&b.start).then_with(|| a.run_id.cmp(&b.run_id)));
    let mut changed = HashSet::new();
    for (idx, run) in runs.iter_mut().enumerate() {
        let run_index = count_u32(idx + 1);
        if run.run_index != run_index {
            run.run_index = run_index;
            changed.insert(run.run_id.clone());
        }
    }
    changed
}
