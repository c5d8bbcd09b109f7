//! Incremental sequence planning.
//!
//! Previously assigned detections never move. Each stored run of a partition
//! is placed on the timeline as a solid span next to the unassigned
//! detections, and the combined timeline is grouped with the sequence
//! threshold. A group without a stored run becomes a new sequence; a group
//! with one stored run extends it; a group spanning several stored runs
//! leaves them separate and hands each new detection to its nearest run.

use std::collections::HashSet;

use chrono::{DateTime, Duration, Utc};

use crate::chunk::{assign_parts, merge_parts, part_offset, summarize_parts};
use crate::gap::{GapScale, detect_span_gaps};
use crate::runs::{TimedRecord, assign_runs, renumber, timeline};
use crate::store::{Placement, RecordAssignment};
use crate::types::{PartitionKey, Record, RunId, RunSummary, count_u32};

/// Which run a group of new detections goes into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunTarget {
    /// Index into [`SequencePlan::existing`].
    Existing(usize),
    New,
}

/// New detections bound for one run, in time order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedGroup {
    pub target: RunTarget,
    pub members: Vec<TimedRecord>,
}

/// The merge of one partition's unassigned detections into its stored runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SequencePlan {
    pub partition: PartitionKey,
    /// Stored runs, sorted by start.
    pub existing: Vec<RunSummary>,
    pub groups: Vec<PlannedGroup>,
    /// Groups whose new detections bridged more than one stored run.
    pub bridged: usize,
}

/// Writes produced by resolving a [`SequencePlan`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedSequences {
    pub partition: PartitionKey,
    pub assignments: Vec<RecordAssignment>,
    /// Summaries that are new or changed, in run order.
    pub summaries: Vec<RunSummary>,
    pub created: usize,
    pub extended: usize,
}

enum Slot {
    Anchor(usize),
    Fresh(TimedRecord),
}

impl Slot {
    fn span(&self, existing: &[RunSummary]) -> (DateTime<Utc>, DateTime<Utc>) {
        match self {
            Self::Anchor(idx) => (existing[*idx].start, existing[*idx].end),
            Self::Fresh(timed) => (timed.at, timed.at),
        }
    }
}

/// Plans how the unassigned detections of a partition join its runs.
///
/// `records` may include already assigned detections; only unassigned ones
/// with an effective timestamp are placed.
pub fn plan_sequences(
    partition: &PartitionKey,
    records: &[Record],
    mut existing: Vec<RunSummary>,
    threshold_minutes: u32,
) -> SequencePlan {
    existing.sort_by(|a, b| a.start.cmp(&b.start).then_with(|| a.run_id.cmp(&b.run_id)));
    let fresh = timeline(records.iter().filter(|record| !record.is_assigned()));

    let mut slots: Vec<Slot> = (0..existing.len()).map(Slot::Anchor).collect();
    slots.extend(fresh.into_iter().map(Slot::Fresh));
    slots.sort_by_key(|slot| slot.span(&existing));

    let spans: Vec<_> = slots.iter().map(|slot| slot.span(&existing)).collect();
    let bounds = assign_runs(
        &detect_span_gaps(&spans, GapScale::Minutes),
        threshold_minutes,
    );

    let mut slots = slots.into_iter();
    let mut groups = Vec::new();
    let mut bridged = 0;
    for bound in bounds {
        let mut anchors = Vec::new();
        let mut members = Vec::new();
        for slot in slots.by_ref().take(bound.members.len()) {
            match slot {
                Slot::Anchor(idx) => anchors.push(idx),
                Slot::Fresh(timed) => members.push(timed),
            }
        }
        if members.is_empty() {
            continue;
        }

        match anchors.as_slice() {
            [] => groups.push(PlannedGroup {
                target: RunTarget::New,
                members,
            }),
            [anchor] => groups.push(PlannedGroup {
                target: RunTarget::Existing(*anchor),
                members,
            }),
            _ => {
                bridged += 1;
                tracing::warn!(
                    partition = %partition,
                    runs = anchors.len(),
                    detections = members.len(),
                    "new detections bridge stored sequences; keeping them separate"
                );
                groups.extend(split_between(&existing, &anchors, members));
            }
        }
    }

    SequencePlan {
        partition: partition.clone(),
        existing,
        groups,
        bridged,
    }
}

/// Hands each member to the anchor run whose span contains it, otherwise the
/// nearest one. Ties go to the earlier run.
fn split_between(
    existing: &[RunSummary],
    anchors: &[usize],
    members: Vec<TimedRecord>,
) -> Vec<PlannedGroup> {
    let mut groups: Vec<PlannedGroup> = anchors
        .iter()
        .map(|&idx| PlannedGroup {
            target: RunTarget::Existing(idx),
            members: Vec::new(),
        })
        .collect();
    for member in members {
        let nearest = anchors
            .iter()
            .enumerate()
            .min_by_key(|&(_, &idx)| distance(&existing[idx], member.at))
            .map_or(0, |(pos, _)| pos);
        groups[nearest].members.push(member);
    }
    groups.retain(|group| !group.members.is_empty());
    groups
}

fn distance(run: &RunSummary, at: DateTime<Utc>) -> Duration {
    if at < run.start {
        run.start - at
    } else if at > run.end {
        at - run.end
    } else {
        Duration::zero()
    }
}

impl SequencePlan {
    /// Number of detections this plan assigns.
    pub fn member_count(&self) -> usize {
        self.groups.iter().map(|group| group.members.len()).sum()
    }

    /// Turns the plan into writes.
    ///
    /// `mint` is called once per new run. Stored runs keep their ids and the
    /// part indexes of their members; new members fill the last part first.
    /// This holds for newcomers inside a stored span too, so that part's span
    /// can overlap earlier parts until a [`crate::SequenceMode::Rebuild`] pass.
    /// Every run of the partition is renumbered by start time afterwards.
    pub fn resolve<E, F>(self, max_members: u32, mut mint: F) -> Result<ResolvedSequences, E>
    where
        F: FnMut() -> Result<RunId, E>,
    {
        let mut runs = self.existing;
        let mut touched = HashSet::new();
        let mut assignments = Vec::new();
        let mut created = 0;
        let mut extended = 0;

        for group in self.groups {
            let (run, offset) = match group.target {
                RunTarget::Existing(idx) => {
                    extended += 1;
                    let run = &runs[idx];
                    let offset = part_offset(&run.parts, run.member_count, max_members);
                    (idx, offset)
                }
                RunTarget::New => {
                    created += 1;
                    let first = &group.members[0];
                    runs.push(RunSummary {
                        run_id: mint()?,
                        partition: self.partition.clone(),
                        run_index: 0,
                        start: first.at,
                        end: first.at,
                        member_count: 0,
                        parts: Vec::new(),
                    });
                    (runs.len() - 1, 0)
                }
            };

            let parts = assign_parts(offset, group.members.len(), max_members);
            let summary = &mut runs[run];
            assignments.extend(group.members.iter().zip(&parts).map(|(member, &part_index)| {
                RecordAssignment {
                    record_id: member.id.clone(),
                    run_id: summary.run_id.clone(),
                    placement: Placement::Sequence { part_index },
                }
            }));
            for member in &group.members {
                summary.start = summary.start.min(member.at);
                summary.end = summary.end.max(member.at);
            }
            summary.member_count += count_u32(group.members.len());
            summary.parts = merge_parts(&summary.parts, summarize_parts(&group.members, &parts));
            touched.insert(summary.run_id.clone());
        }

        let renumbered = renumber(&mut runs);
        let summaries = runs
            .into_iter()
            .filter(|run| touched.contains(&run.run_id) || renumbered.contains(&run.run_id))
            .collect();

        Ok(ResolvedSequences {
            partition: self.partition,
            assignments,
            summaries,
            created,
            extended,
        })
    }
}
