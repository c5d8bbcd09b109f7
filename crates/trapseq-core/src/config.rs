//! Segmentation configuration and validation.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::gap::GapScale;
use crate::source::RecordSelection;
use crate::types::RunKind;

/// Configuration errors, raised before any computation starts.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{field} must be a positive integer, got {value}")]
    NotPositive { field: &'static str, value: i64 },

    #[error("{field} is too large: {value}")]
    TooLarge { field: &'static str, value: i64 },

    #[error("partition keys for {kind} runs cannot be empty")]
    EmptyPartitionKeys { kind: RunKind },

    #[error("partition key {field} is listed twice for {kind} runs")]
    DuplicatePartitionKey { kind: RunKind, field: PartitionField },

    #[error("partition key {field} is not available for {kind} runs")]
    UnsupportedPartitionKey { kind: RunKind, field: PartitionField },

    #[error("fallback timestamp field must differ from timestamp field {field}")]
    FallbackSameAsPrimary { field: TimestampField },

    #[error("id_attempts must be at least 1")]
    NoIdAttempts,
}

/// A record field that can take part in a partition key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PartitionField {
    SiteName,
    CameraId,
    /// Animal identity of a detection. Photos have none.
    Subject,
}

impl std::fmt::Display for PartitionField {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::SiteName => "site_name",
            Self::CameraId => "camera_id",
            Self::Subject => "subject",
        };
        write!(f, "{name}")
    }
}

/// A timestamp column records can be ordered by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimestampField {
    /// When the photo was taken (EXIF `DateTimeOriginal`).
    TakenAt,
    /// File modification time.
    ModifiedAt,
}

impl std::fmt::Display for TimestampField {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::TakenAt => "taken_at",
            Self::ModifiedAt => "modified_at",
        };
        write!(f, "{name}")
    }
}

/// How much of the write phase shares one transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionScope {
    /// All partitions commit together or not at all.
    #[default]
    Global,
    /// Each partition commits on its own; failures are reported per partition.
    PerPartition,
}

/// User-facing segmentation options.
///
/// Integer options are signed so that a negative value read from a config
/// file is reported as a [`ConfigError`] instead of a parse failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SegmentationConfig {
    /// Days without photos that end a season.
    pub season_gap_days: i64,
    /// Minutes without a detection that end a sequence.
    pub sequence_gap_minutes: i64,
    /// Maximum members per sequence sub-part.
    pub max_members_per_sequence: i64,
    pub season_partition_keys: Vec<PartitionField>,
    pub sequence_partition_keys: Vec<PartitionField>,
    pub timestamp_field: TimestampField,
    pub fallback_timestamp_field: Option<TimestampField>,
    pub transaction_scope: TransactionScope,
    /// How many random identifiers to try before giving up on a collision.
    pub id_attempts: u32,
}

impl Default for SegmentationConfig {
    fn default() -> Self {
        Self {
            season_gap_days: 30,
            sequence_gap_minutes: 60,
            max_members_per_sequence: 30,
            season_partition_keys: vec![PartitionField::SiteName, PartitionField::CameraId],
            sequence_partition_keys: vec![
                PartitionField::SiteName,
                PartitionField::CameraId,
                PartitionField::Subject,
            ],
            timestamp_field: TimestampField::TakenAt,
            fallback_timestamp_field: Some(TimestampField::ModifiedAt),
            transaction_scope: TransactionScope::Global,
            id_attempts: 8,
        }
    }
}

/// Validated numeric limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limits {
    pub season_gap_days: u32,
    pub sequence_gap_minutes: u32,
    pub max_members_per_sequence: u32,
    pub id_attempts: u32,
}

impl Limits {
    /// Gap threshold for the given run kind, in that kind's unit.
    pub const fn threshold(&self, kind: RunKind) -> u32 {
        match kind {
            RunKind::Season => self.season_gap_days,
            RunKind::Sequence => self.sequence_gap_minutes,
        }
    }
}

impl SegmentationConfig {
    /// Checks every option and returns the validated limits.
    pub fn validate(&self) -> Result<Limits, ConfigError> {
        let limits = Limits {
            season_gap_days: positive("season_gap_days", self.season_gap_days)?,
            sequence_gap_minutes: positive("sequence_gap_minutes", self.sequence_gap_minutes)?,
            max_members_per_sequence: positive(
                "max_members_per_sequence",
                self.max_members_per_sequence,
            )?,
            id_attempts: self.id_attempts,
        };
        if limits.id_attempts == 0 {
            return Err(ConfigError::NoIdAttempts);
        }

        check_partition_keys(RunKind::Season, &self.season_partition_keys)?;
        check_partition_keys(RunKind::Sequence, &self.sequence_partition_keys)?;

        if self.fallback_timestamp_field == Some(self.timestamp_field) {
            return Err(ConfigError::FallbackSameAsPrimary {
                field: self.timestamp_field,
            });
        }
        Ok(limits)
    }

    /// Describes which records to fetch for a run kind.
    pub fn selection(&self, kind: RunKind) -> RecordSelection {
        let partition_fields = match kind {
            RunKind::Season => self.season_partition_keys.clone(),
            RunKind::Sequence => self.sequence_partition_keys.clone(),
        };
        RecordSelection {
            kind,
            partition_fields,
            timestamp: self.timestamp_field,
            fallback: self.fallback_timestamp_field,
        }
    }

    /// Unit used to measure gaps for a run kind.
    pub const fn scale(kind: RunKind) -> GapScale {
        match kind {
            RunKind::Season => GapScale::Days,
            RunKind::Sequence => GapScale::Minutes,
        }
    }
}

fn positive(field: &'static str, value: i64) -> Result<u32, ConfigError> {
    if value <= 0 {
        return Err(ConfigError::NotPositive { field, value });
    }
    u32::try_from(value).map_err(|_| ConfigError::TooLarge { field, value })
}

fn check_partition_keys(kind: RunKind, fields: &[PartitionField]) -> Result<(), ConfigError> {
    if fields.is_empty() {
        return Err(ConfigError::EmptyPartitionKeys { kind });
    }
    let mut seen = HashSet::new();
    for &field in fields {
        if kind == RunKind::Season && field == PartitionField::Subject {
            return Err(ConfigError::UnsupportedPartitionKey { kind, field });
        }
        if !seen.insert(field) {
            return Err(ConfigError::DuplicatePartitionKey { kind, field });
        }
    }
    Ok(())
}
