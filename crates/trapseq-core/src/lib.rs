//! Core segmentation logic for camera trap observations.
//!
//! This crate recovers the time structure hidden in photo and detection
//! timestamps:
//! - Seasons: camera deployment periods, recomputed on every pass
//! - Sequences: bursts of detections of one subject, extended incrementally
//! - Sub-parts: fixed-size chunks of long sequences
//!
//! Storage is reached only through the [`DataStore`] trait; [`MemoryStore`]
//! is the in-process backend.

pub mod chunk;
pub mod config;
mod engine;
pub mod error;
pub mod gap;
pub mod ident;
pub mod memory;
pub mod runs;
pub mod seasons;
pub mod sequences;
pub mod source;
pub mod store;
pub mod types;

pub use config::{
    ConfigError, Limits, PartitionField, SegmentationConfig, TimestampField, TransactionScope,
};
pub use engine::{
    PartitionFailure, PruneReport, SegmentationReport, SequenceMode, prune_sequences,
    segment_seasons, segment_sequences,
};
pub use error::{ConsistencyError, SegmentError};
pub use ident::IdentifierAssigner;
pub use memory::MemoryStore;
pub use source::{Observation, RecordSelection};
pub use store::{DataStore, Placement, RecordAssignment, StoreError, StoreTransaction};
pub use types::{
    Assignment, PartSummary, PartitionKey, Record, RecordId, RunId, RunKind, RunSummary,
    ValidationError,
};
