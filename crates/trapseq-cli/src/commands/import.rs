//! Import command for loading photos and detections into the `SQLite` store.
//!
//! Input is JSON lines, one object per line, tagged by `type`:
//!
//! ```text
//! {"type":"photo","id":"a1","site_name":"North","camera_id":"C1","taken_at":"2024-05-01 06:00:00"}
//! {"type":"detection","id":"d1","photo_id":"a1","subject":"fox","count":1}
//! ```

use std::io::{BufRead, Write};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Deserialize;

use trapseq_db::{Database, DetectionRow, PhotoRow, parse_timestamp};

/// Rows parsed from one import stream.
#[derive(Debug, Default)]
struct Batch {
    photos: Vec<PhotoRow>,
    detections: Vec<DetectionRow>,
}

pub fn run<R: BufRead, W: Write>(reader: R, writer: &mut W, db: &mut Database) -> Result<()> {
    let batch = parse_lines(reader)?;

    // detections reference photos, so photos go first
    let photos = db
        .insert_photos(&batch.photos)
        .context("failed to insert photos")?;
    let detections = db
        .insert_detections(&batch.detections)
        .context("failed to insert detections")?;

    tracing::info!(photos, detections, "import complete");
    writeln!(
        writer,
        "Imported {photos} of {} photos and {detections} of {} detections",
        batch.photos.len(),
        batch.detections.len()
    )?;
    Ok(())
}

fn parse_lines<R: BufRead>(reader: R) -> Result<Batch> {
    let mut batch = Batch::default();
    for (idx, line) in reader.lines().enumerate() {
        let line = line.with_context(|| format!("failed to read line {}", idx + 1))?;
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        let parsed: ImportLine = serde_json::from_str(trimmed)
            .with_context(|| format!("invalid JSON on line {}", idx + 1))?;
        match parsed {
            ImportLine::Photo(photo) => batch.photos.push(
                photo
                    .into_row()
                    .with_context(|| format!("invalid photo on line {}", idx + 1))?,
            ),
            ImportLine::Detection(detection) => batch.detections.push(
                detection
                    .into_row()
                    .with_context(|| format!("invalid detection on line {}", idx + 1))?,
            ),
        }
    }
    Ok(batch)
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ImportLine {
    Photo(ImportPhoto),
    Detection(ImportDetection),
}

#[derive(Debug, Deserialize)]
struct ImportPhoto {
    id: String,
    #[serde(default)]
    path: Option<String>,
    #[serde(default)]
    site_name: Option<String>,
    #[serde(default)]
    camera_id: Option<String>,
    #[serde(default)]
    taken_at: Option<String>,
    #[serde(default)]
    modified_at: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ImportDetection {
    id: String,
    photo_id: String,
    #[serde(default)]
    subject: Option<String>,
    #[serde(default)]
    count: Option<u32>,
}

impl ImportPhoto {
    fn into_row(self) -> Result<PhotoRow> {
        if self.id.trim().is_empty() {
            anyhow::bail!("missing id");
        }
        let taken_at = timestamp(&self.id, "taken_at", self.taken_at.as_deref());
        let modified_at = timestamp(&self.id, "modified_at", self.modified_at.as_deref());
        Ok(PhotoRow {
            id: self.id,
            path: self.path,
            site_name: self.site_name,
            camera_id: self.camera_id,
            taken_at,
            modified_at,
        })
    }
}

impl ImportDetection {
    fn into_row(self) -> Result<DetectionRow> {
        if self.id.trim().is_empty() {
            anyhow::bail!("missing id");
        }
        if self.photo_id.trim().is_empty() {
            anyhow::bail!("missing photo_id");
        }
        Ok(DetectionRow {
            id: self.id,
            photo_id: self.photo_id,
            subject: self.subject,
            count: self.count,
        })
    }
}

/// Unreadable timestamps are stored as missing, like an absent EXIF tag.
fn timestamp(id: &str, field: &str, value: Option<&str>) -> Option<DateTime<Utc>> {
    let value = value.map(str::trim).filter(|value| !value.is_empty())?;
    let parsed = parse_timestamp(value);
    if parsed.is_none() {
        tracing::warn!(photo = id, field, value, "unreadable timestamp, treating as missing");
    }
    parsed
}
