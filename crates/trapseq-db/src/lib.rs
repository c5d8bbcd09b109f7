//! `SQLite` storage layer for trapseq.
//!
//! Holds photos, detections and the seasons and sequences computed over them,
//! and implements [`trapseq_core::DataStore`] so the engine can run directly
//! against a database file.
//!
//! # Thread Safety
//!
//! [`Database`] wraps a `rusqlite::Connection`, which is `Send` but not `Sync`.
//! Share one across threads behind a `Mutex`, or open one per thread.
//!
//! # Schema
//!
//! Timestamps are stored as TEXT in RFC 3339 format with millisecond
//! precision (e.g. `2019-05-04T12:00:00.000Z`), so lexicographic order matches
//! chronological order. Rows written by other tools may also use
//! `YYYY-MM-DD HH:MM:SS` or the EXIF form `YYYY:MM:DD HH:MM:SS`, read as UTC.
//!
//! Partition keys are stored as JSON arrays of strings.

mod store;

use std::path::Path;

use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use serde::Serialize;
use thiserror::Error;
use trapseq_core::{PartitionKey, RunId, RunKind, StoreError, ValidationError};

pub use store::SqliteTransaction;

/// Database errors.
#[derive(Debug, Error)]
pub enum DbError {
    /// An error from the underlying database.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// A stored timestamp could not be parsed.
    #[error("invalid timestamp for {record_id}: {timestamp}")]
    TimestampParse {
        record_id: String,
        timestamp: String,
    },

    /// A partition key could not be converted to or from its JSON form.
    #[error("invalid partition key {key}")]
    PartitionKey {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    /// A stored id is empty.
    #[error("invalid stored id: {0}")]
    InvalidId(#[from] ValidationError),

    /// A stored count is negative or too large.
    #[error("{column} out of range: {value}")]
    OutOfRange { column: &'static str, value: i64 },

    /// A run id is already used by a run of another partition.
    #[error("run id {run_id} already exists in another partition")]
    DuplicateRun { run_id: RunId },
}

impl From<DbError> for StoreError {
    fn from(err: DbError) -> Self {
        match err {
            DbError::DuplicateRun { run_id } => Self::DuplicateRun { run_id },
            other => Self::backend(other),
        }
    }
}

/// Database connection wrapper.
///
/// See the [module documentation](self) for thread safety considerations.
pub struct Database {
    conn: Connection,
}

/// A photo ready to be stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhotoRow {
    /// Content hash of the image file.
    pub id: String,
    pub path: Option<String>,
    pub site_name: Option<String>,
    pub camera_id: Option<String>,
    pub taken_at: Option<DateTime<Utc>>,
    pub modified_at: Option<DateTime<Utc>>,
}

/// An animal detection within a photo.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetectionRow {
    pub id: String,
    pub photo_id: String,
    /// Species or individual the detection was labelled with.
    pub subject: Option<String>,
    pub count: Option<u32>,
}

/// Row counts shown by `trapseq status`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct StoreStatus {
    pub photos: u64,
    pub photos_in_season: u64,
    pub detections: u64,
    pub detections_in_sequence: u64,
    pub seasons: u64,
    pub sequences: u64,
}

impl Database {
    /// Opens a database at the given path, creating it if necessary.
    ///
    /// The database schema is automatically initialized on first open.
    pub fn open(path: &Path) -> Result<Self, DbError> {
        let conn = Connection::open(path)?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    /// Opens an in-memory database.
    ///
    /// Useful for testing. The database is destroyed when the connection closes.
    pub fn open_in_memory() -> Result<Self, DbError> {
        let conn = Connection::open_in_memory()?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    /// Initializes the database schema.
    ///
    /// This is idempotent - safe to call on an already-initialized database.
    fn init(&self) -> Result<(), DbError> {
        self.conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        self.conn.execute_batch(
            "
            -- Camera deployment periods, rebuilt on every season pass
            CREATE TABLE IF NOT EXISTS seasons (
                id TEXT PRIMARY KEY,
                partition_key TEXT NOT NULL,
                run_index INTEGER NOT NULL,
                start_at TEXT NOT NULL,
                end_at TEXT NOT NULL,
                member_count INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_seasons_partition ON seasons(partition_key);

            -- Bursts of detections of one subject; rows are only ever extended
            CREATE TABLE IF NOT EXISTS sequences (
                id TEXT PRIMARY KEY,
                partition_key TEXT NOT NULL,
                run_index INTEGER NOT NULL,
                start_at TEXT NOT NULL,
                end_at TEXT NOT NULL,
                member_count INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_sequences_partition ON sequences(partition_key);

            CREATE TABLE IF NOT EXISTS sequence_parts (
                sequence_id TEXT NOT NULL,
                part_index INTEGER NOT NULL,
                start_at TEXT NOT NULL,
                end_at TEXT NOT NULL,
                member_count INTEGER NOT NULL,
                PRIMARY KEY (sequence_id, part_index),
                FOREIGN KEY (sequence_id) REFERENCES sequences(id) ON DELETE CASCADE
            );

            -- taken_at: EXIF DateTimeOriginal; modified_at: file modification time
            CREATE TABLE IF NOT EXISTS photos (
                id TEXT PRIMARY KEY,
                path TEXT,
                site_name TEXT,
                camera_id TEXT,
                taken_at TEXT,
                modified_at TEXT,
                season_id TEXT,
                season_no INTEGER,
                season_order INTEGER,
                FOREIGN KEY (season_id) REFERENCES seasons(id) ON DELETE SET NULL
            );

            CREATE INDEX IF NOT EXISTS idx_photos_site_camera ON photos(site_name, camera_id);
            CREATE INDEX IF NOT EXISTS idx_photos_season ON photos(season_id);

            CREATE TABLE IF NOT EXISTS detections (
                id TEXT PRIMARY KEY,
                photo_id TEXT NOT NULL,
                subject TEXT,
                count INTEGER,
                sequence_id TEXT,
                part_index INTEGER,
                FOREIGN KEY (photo_id) REFERENCES photos(id) ON DELETE CASCADE,
                FOREIGN KEY (sequence_id) REFERENCES sequences(id) ON DELETE SET NULL
            );

            CREATE INDEX IF NOT EXISTS idx_detections_photo ON detections(photo_id);
            CREATE INDEX IF NOT EXISTS idx_detections_subject ON detections(subject);
            CREATE INDEX IF NOT EXISTS idx_detections_sequence ON detections(sequence_id);
            ",
        )?;
        Ok(())
    }

    /// Inserts a batch of photos, ignoring duplicates by ID.
    pub fn insert_photos(&mut self, photos: &[PhotoRow]) -> Result<usize, DbError> {
        if photos.is_empty() {
            return Ok(0);
        }
        let tx = self.conn.transaction()?;
        let mut inserted = 0;
        {
            let mut stmt = tx.prepare(
                "
                INSERT OR IGNORE INTO photos
                (id, path, site_name, camera_id, taken_at, modified_at)
                VALUES (?, ?, ?, ?, ?, ?)
                ",
            )?;
            for photo in photos {
                inserted += stmt.execute(params![
                    photo.id,
                    photo.path,
                    photo.site_name,
                    photo.camera_id,
                    photo.taken_at.map(format_timestamp),
                    photo.modified_at.map(format_timestamp),
                ])?;
            }
        }
        tx.commit()?;
        Ok(inserted)
    }

    /// Inserts a batch of detections, ignoring duplicates by ID.
    ///
    /// Every detection's photo must already be stored.
    pub fn insert_detections(&mut self, detections: &[DetectionRow]) -> Result<usize, DbError> {
        if detections.is_empty() {
            return Ok(0);
        }
        let tx = self.conn.transaction()?;
        let mut inserted = 0;
        {
            let mut stmt = tx.prepare(
                "
                INSERT OR IGNORE INTO detections (id, photo_id, subject, count)
                VALUES (?, ?, ?, ?)
                ",
            )?;
            for detection in detections {
                inserted += stmt.execute(params![
                    detection.id,
                    detection.photo_id,
                    detection.subject,
                    detection.count,
                ])?;
            }
        }
        tx.commit()?;
        Ok(inserted)
    }

    /// Deletes detections by ID, leaving their sequences behind.
    pub fn delete_detections(&mut self, ids: &[&str]) -> Result<usize, DbError> {
        let tx = self.conn.transaction()?;
        let mut deleted = 0;
        {
            let mut stmt = tx.prepare("DELETE FROM detections WHERE id = ?")?;
            for id in ids {
                deleted += stmt.execute([id])?;
            }
        }
        tx.commit()?;
        Ok(deleted)
    }

    /// Season fields stored on a photo: id, number and order within the season.
    pub fn photo_season(&self, photo_id: &str) -> Result<Option<(String, u32, u32)>, DbError> {
        let row = self
            .conn
            .query_row(
                "
                SELECT season_id, season_no, season_order
                FROM photos
                WHERE id = ? AND season_id IS NOT NULL
                ",
                [photo_id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, i64>(1)?,
                        row.get::<_, i64>(2)?,
                    ))
                },
            )
            .optional()?;
        row.map(|(season_id, season_no, season_order)| {
            Ok((
                season_id,
                to_u32("season_no", season_no)?,
                to_u32("season_order", season_order)?,
            ))
        })
        .transpose()
    }

    /// Sequence fields stored on a detection: id and part index.
    pub fn detection_sequence(&self, detection_id: &str) -> Result<Option<(String, u32)>, DbError> {
        let row = self
            .conn
            .query_row(
                "
                SELECT sequence_id, part_index
                FROM detections
                WHERE id = ? AND sequence_id IS NOT NULL
                ",
                [detection_id],
                |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)),
            )
            .optional()?;
        row.map(|(sequence_id, part_index)| Ok((sequence_id, to_u32("part_index", part_index)?)))
            .transpose()
    }

    /// Counts stored rows and how many of them are assigned.
    pub fn status(&self) -> Result<StoreStatus, DbError> {
        let count = |sql: &str| -> Result<u64, DbError> {
            let value: i64 = self.conn.query_row(sql, [], |row| row.get(0))?;
            u64::try_from(value).map_err(|_| DbError::OutOfRange {
                column: "count",
                value,
            })
        };
        Ok(StoreStatus {
            photos: count("SELECT COUNT(*) FROM photos")?,
            photos_in_season: count("SELECT COUNT(*) FROM photos WHERE season_id IS NOT NULL")?,
            detections: count("SELECT COUNT(*) FROM detections")?,
            detections_in_sequence: count(
                "SELECT COUNT(*) FROM detections WHERE sequence_id IS NOT NULL",
            )?,
            seasons: count("SELECT COUNT(*) FROM seasons")?,
            sequences: count("SELECT COUNT(*) FROM sequences")?,
        })
    }
}

/// Table holding the summaries of a run kind.
const fn run_table(kind: RunKind) -> &'static str {
    match kind {
        RunKind::Season => "seasons",
        RunKind::Sequence => "sequences",
    }
}

fn format_timestamp(timestamp: DateTime<Utc>) -> String {
    timestamp.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Parses a timestamp in any of the formats described in the module docs.
pub fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    if let Ok(parsed) = DateTime::parse_from_rfc3339(value) {
        return Some(parsed.with_timezone(&Utc));
    }
    ["%Y-%m-%d %H:%M:%S", "%Y:%m:%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S"]
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(value, format).ok())
        .map(|naive| naive.and_utc())
}

/// Reads a record timestamp column.
///
/// Values this crate cannot parse are treated as missing so one foreign row
/// does not abort a whole pass.
fn stored_timestamp(value: Option<String>, record_id: &str, column: &str) -> Option<DateTime<Utc>> {
    let value = value.filter(|value| !value.trim().is_empty())?;
    let parsed = parse_timestamp(&value);
    if parsed.is_none() {
        tracing::warn!(
            record = record_id,
            column,
            value = %value,
            "unreadable stored timestamp, treating as missing"
        );
    }
    parsed
}

fn encode_partition(partition: &PartitionKey) -> Result<String, DbError> {
    serde_json::to_string(partition).map_err(|source| DbError::PartitionKey {
        key: partition.to_string(),
        source,
    })
}

fn decode_partition(value: &str) -> Result<PartitionKey, DbError> {
    serde_json::from_str(value).map_err(|source| DbError::PartitionKey {
        key: value.to_string(),
        source,
    })
}

fn to_u32(column: &'static str, value: i64) -> Result<u32, DbError> {
    u32::try_from(value).map_err(|_| DbError::OutOfRange { column, value })
}
