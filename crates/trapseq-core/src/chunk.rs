//! Size-bounded sub-parts for long sequences.
//!
//! Parts are filled in time order, `max_size` members at a time. The last part
//! may be short; sizes are never rebalanced.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

use crate::runs::TimedRecord;
use crate::types::{PartSummary, count_u32};

/// Number of member slots already used by a run's existing parts.
///
/// New members continue filling the last part, so the offset is every slot of
/// the earlier parts plus the members of the last one. A last part holding more
/// than `max_size` members (the limit was lowered since) counts as full.
pub fn part_offset(parts: &[PartSummary], member_count: u32, max_size: u32) -> u32 {
    match parts.iter().max_by_key(|part| part.part_index) {
        Some(last) => last
            .part_index
            .saturating_sub(1)
            .saturating_mul(max_size)
            .saturating_add(last.member_count.min(max_size)),
        None => member_count,
    }
}

/// Part index for each of `new_members` members appended after `offset`.
///
/// With `offset == 0` this is `ceil(rank / max_size)` for ranks `1..=n`.
pub fn assign_parts(offset: u32, new_members: usize, max_size: u32) -> Vec<u32> {
    (1..=count_u32(new_members))
        .map(|rank| offset.saturating_add(rank).div_ceil(max_size))
        .collect()
}

/// Summarizes contiguous members sharing a part index.
///
/// `members` and `parts` must be the same length and in time order.
pub fn summarize_parts(members: &[TimedRecord], parts: &[u32]) -> Vec<PartSummary> {
    let mut summaries: Vec<PartSummary> = Vec::new();
    for (member, &part_index) in members.iter().zip(parts) {
        match summaries.last_mut() {
            Some(current) if current.part_index == part_index => {
                current.start = current.start.min(member.at);
                current.end = current.end.max(member.at);
                current.member_count += 1;
            }
            _ => summaries.push(PartSummary {
                part_index,
                start: member.at,
                end: member.at,
                member_count: 1,
            }),
        }
    }
    summaries
}

/// Folds newly summarized parts into a run's existing parts.
pub fn merge_parts(existing: &[PartSummary], additions: Vec<PartSummary>) -> Vec<PartSummary> {
    let mut merged = existing.to_vec();
    for addition in additions {
        match merged
            .iter_mut()
            .find(|part| part.part_index == addition.part_index)
        {
            Some(part) => {
                part.start = part.start.min(addition.start);
                part.end = part.end.max(addition.end);
                part.member_count += addition.member_count;
            }
            None => merged.push(addition),
        }
    }
    merged.sort_by_key(|part| part.part_index);
    merged
}

/// Rebuilds part summaries from the members a run still has.
///
/// `members` pairs each member's instant with its stored part index. Parts
/// left without members disappear; the others keep their index.
pub fn rebuild_parts(members: &[(DateTime<Utc>, u32)]) -> Vec<PartSummary> {
    let mut parts: BTreeMap<u32, PartSummary> = BTreeMap::new();
    for &(at, part_index) in members {
        parts
            .entry(part_index)
            .and_modify(|part| {
                part.start = part.start.min(at);
                part.end = part.end.max(at);
                part.member_count += 1;
            })
            .or_insert(PartSummary {
                part_index,
                start: at,
                end: at,
                member_count: 1,
            });
    }
    parts.into_values().collect()
}
