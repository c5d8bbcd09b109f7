//! Core type definitions with validation.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Placeholder used for partition key components that are missing.
pub const NONE_COMPONENT: &str = "none";

/// Validation errors for core types.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// The provided value was empty.
    #[error("{field} cannot be empty")]
    Empty { field: &'static str },

    /// Invalid run kind value.
    #[error("invalid run kind: {value}")]
    InvalidRunKind { value: String },
}

/// Generates a validated string ID newtype with common trait implementations.
macro_rules! define_string_id {
    (
        $(#[$meta:meta])*
        $name:ident, $field_name:literal
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(try_from = "String", into = "String")]
        pub struct $name(String);

        impl $name {
            /// Creates a new ID after validation.
            pub fn new(id: impl Into<String>) -> Result<Self, ValidationError> {
                let id = id.into();
                if id.is_empty() {
                    return Err(ValidationError::Empty { field: $field_name });
                }
                Ok(Self(id))
            }

            /// Returns the ID as a string slice.
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl TryFrom<String> for $name {
            type Error = ValidationError;

            fn try_from(value: String) -> Result<Self, Self::Error> {
                Self::new(value)
            }
        }

        impl From<$name> for String {
            fn from(id: $name) -> Self {
                id.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

define_string_id!(
    /// A validated record identifier.
    ///
    /// Photos are keyed by their content hash; detections by whatever unique
    /// key the importer gave them.
    RecordId, "record ID"
);

define_string_id!(
    /// A validated run identifier (season or sequence).
    ///
    /// Generated identifiers are lower-case hex, but any non-empty string read
    /// back from storage is accepted.
    RunId, "run ID"
);

/// Which kind of run a computation produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunKind {
    /// Camera deployment periods over photos, day-scale gaps.
    Season,
    /// Bursts of same-subject detections, minute-scale gaps.
    Sequence,
}

impl RunKind {
    /// String representation for storage and display.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Season => "season",
            Self::Sequence => "sequence",
        }
    }
}

impl fmt::Display for RunKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for RunKind {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "season" | "seasons" => Ok(Self::Season),
            "sequence" | "sequences" => Ok(Self::Sequence),
            _ => Err(ValidationError::InvalidRunKind {
                value: s.to_string(),
            }),
        }
    }
}

/// The grouping key within which time gaps are evaluated.
///
/// Missing or blank components collapse to [`NONE_COMPONENT`] so that
/// ungrouped records still form deterministic runs.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PartitionKey(Vec<String>);

impl PartitionKey {
    /// Builds a key from optional components.
    pub fn from_components<I, S>(components: I) -> Self
    where
        I: IntoIterator<Item = Option<S>>,
        S: Into<String>,
    {
        Self(
            components
                .into_iter()
                .map(|component| {
                    component
                        .map(Into::into)
                        .filter(|value: &String| !value.trim().is_empty())
                        .unwrap_or_else(|| NONE_COMPONENT.to_string())
                })
                .collect(),
        )
    }

    /// Returns the key components in order.
    pub fn components(&self) -> &[String] {
        &self.0
    }
}

impl fmt::Display for PartitionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.join("/"))
    }
}

/// The timestamp a record is ordered by.
///
/// Keeps track of whether the primary timestamp was present or the fallback
/// had to be used.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EffectiveTimestamp {
    Primary(DateTime<Utc>),
    Fallback(DateTime<Utc>),
}

impl EffectiveTimestamp {
    /// Picks the primary timestamp, else the fallback, else nothing.
    pub fn resolve(primary: Option<DateTime<Utc>>, fallback: Option<DateTime<Utc>>) -> Option<Self> {
        primary
            .map(Self::Primary)
            .or_else(|| fallback.map(Self::Fallback))
    }

    /// Returns the underlying instant.
    #[must_use]
    pub const fn instant(self) -> DateTime<Utc> {
        match self {
            Self::Primary(at) | Self::Fallback(at) => at,
        }
    }

    #[must_use]
    pub const fn is_fallback(self) -> bool {
        matches!(self, Self::Fallback(_))
    }
}

/// An existing run assignment on a record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Assignment {
    pub run_id: RunId,
    pub part_index: Option<u32>,
}

/// A record as seen by the segmentation engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub id: RecordId,
    pub partition: PartitionKey,
    pub primary_ts: Option<DateTime<Utc>>,
    pub fallback_ts: Option<DateTime<Utc>>,
    /// Current assignment, if the record was classified by an earlier pass.
    pub assignment: Option<Assignment>,
}

impl Record {
    /// Returns the effective timestamp, or `None` if the record is not eligible.
    pub fn effective_ts(&self) -> Option<EffectiveTimestamp> {
        EffectiveTimestamp::resolve(self.primary_ts, self.fallback_ts)
    }

    pub const fn is_assigned(&self) -> bool {
        self.assignment.is_some()
    }
}

/// A fixed-size, time-contiguous chunk of a sequence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartSummary {
    pub part_index: u32,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub member_count: u32,
}

/// Persisted summary of one run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: RunId,
    pub partition: PartitionKey,
    /// 1-based position of the run by start time within its partition.
    pub run_index: u32,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub member_count: u32,
    /// Sub-parts ordered by index. Always empty for seasons.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub parts: Vec<PartSummary>,
}

impl RunSummary {
    /// Returns true if `at` lies within the run's stored span.
    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        self.start <= at && at <= self.end
    }
}

/// Converts a collection length to the `u32` counts stored in summaries.
pub(crate) fn count_u32(len: usize) -> u32 {
    u32::try_from(len).unwrap_or(u32::MAX)
}
