//! Season planning.
//!
//! Seasons are recomputed from scratch on every pass over all timestamped
//! photos of a partition. Ids come from [`IdentifierAssigner::season_id`], so a
//! pass over unchanged photos reproduces the previous seasons exactly.

use crate::gap::GapScale;
use crate::ident::IdentifierAssigner;
use crate::runs::{segment, timeline};
use crate::store::{Placement, RecordAssignment};
use crate::types::{PartitionKey, Record, RunSummary, count_u32};

/// Seasons of one partition, ready to write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeasonPlan {
    pub partition: PartitionKey,
    pub summaries: Vec<RunSummary>,
    pub assignments: Vec<RecordAssignment>,
}

impl SeasonPlan {
    /// True when the partition had no timestamped photos.
    pub fn is_empty(&self) -> bool {
        self.summaries.is_empty()
    }
}

/// Splits a partition's photos into seasons.
///
/// Photos without an effective timestamp are left out and stay unassigned.
pub fn plan_seasons(partition: &PartitionKey, records: &[Record], threshold_days: u32) -> SeasonPlan {
    let runs = segment(timeline(records), threshold_days, GapScale::Days);

    let mut summaries = Vec::with_capacity(runs.len());
    let mut assignments = Vec::new();
    for run in runs {
        let run_id = IdentifierAssigner::season_id(partition, run.start());
        assignments.extend(run.members.iter().enumerate().map(|(rank, member)| {
            RecordAssignment {
                record_id: member.id.clone(),
                run_id: run_id.clone(),
                placement: Placement::Season {
                    run_index: run.run_index,
                    order_within_run: count_u32(rank + 1),
                },
            }
        }));
        summaries.push(RunSummary {
            run_id,
            partition: partition.clone(),
            run_index: run.run_index,
            start: run.start(),
            end: run.end(),
            member_count: run.member_count(),
            parts: Vec::new(),
        });
    }

    SeasonPlan {
        partition: partition.clone(),
        summaries,
        assignments,
    }
}
