//! Record source: turning stored observations into segmentation records.
//!
//! Storage backends load raw [`Observation`] rows; the partition key and the
//! primary/fallback timestamps are picked here from a [`RecordSelection`], so
//! every backend partitions and orders records the same way.

use chrono::{DateTime, Utc};

use crate::config::{PartitionField, TimestampField};
use crate::types::{Assignment, PartitionKey, Record, RecordId, RunKind};

/// Which records to fetch and how to key and order them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordSelection {
    pub kind: RunKind,
    pub partition_fields: Vec<PartitionField>,
    pub timestamp: TimestampField,
    pub fallback: Option<TimestampField>,
}

/// A stored photo or detection with every field a selection may use.
///
/// Detections inherit site, camera and timestamps from their photo.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Observation {
    pub id: RecordId,
    pub site_name: Option<String>,
    pub camera_id: Option<String>,
    pub subject: Option<String>,
    pub taken_at: Option<DateTime<Utc>>,
    pub modified_at: Option<DateTime<Utc>>,
}

impl Observation {
    pub fn field(&self, field: PartitionField) -> Option<&str> {
        match field {
            PartitionField::SiteName => self.site_name.as_deref(),
            PartitionField::CameraId => self.camera_id.as_deref(),
            PartitionField::Subject => self.subject.as_deref(),
        }
    }

    pub const fn timestamp(&self, field: TimestampField) -> Option<DateTime<Utc>> {
        match field {
            TimestampField::TakenAt => self.taken_at,
            TimestampField::ModifiedAt => self.modified_at,
        }
    }

    /// Builds the engine's view of this observation.
    pub fn to_record(&self, selection: &RecordSelection, assignment: Option<Assignment>) -> Record {
        let partition = PartitionKey::from_components(
            selection
                .partition_fields
                .iter()
                .map(|&field| self.field(field)),
        );
        Record {
            id: self.id.clone(),
            partition,
            primary_ts: self.timestamp(selection.timestamp),
            fallback_ts: selection.fallback.and_then(|field| self.timestamp(field)),
            assignment,
        }
    }
}

/// Sorts records by partition, then effective timestamp, then id.
///
/// Records without an effective timestamp sort last within their partition.
pub fn sort_records(records: &mut [Record]) {
    records.sort_by(|a, b| {
        a.partition
            .cmp(&b.partition)
            .then_with(|| {
                let a_ts = a.effective_ts().map(|ts| ts.instant());
                let b_ts = b.effective_ts().map(|ts| ts.instant());
                match (a_ts, b_ts) {
                    (Some(a_ts), Some(b_ts)) => a_ts.cmp(&b_ts),
                    (Some(_), None) => std::cmp::Ordering::Less,
                    (None, Some(_)) => std::cmp::Ordering::Greater,
                    (None, None) => std::cmp::Ordering::Equal,
                }
            })
            .then_with(|| a.id.cmp(&b.id))
    });
}
