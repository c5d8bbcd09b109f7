//! Season and sequence passes over the `SQLite` store.
//!
//! Each pass holds an exclusive advisory lock on `<database>.lock` so two
//! `trapseq` processes never segment the same file at once.

use std::fs::File;
use std::io::Write;

use anyhow::{Context, Result};
use fs2::FileExt;

use trapseq_core::{SegmentationReport, SequenceMode, segment_seasons, segment_sequences};
use trapseq_db::Database;

use crate::Config;

/// Recomputes every season.
pub fn run_seasons<W: Write>(writer: &mut W, db: &mut Database, config: &Config) -> Result<()> {
    let _lock = acquire_lock(config)?;
    let report = segment_seasons(db, &config.segmentation).context("season pass failed")?;
    finish(writer, &report)
}

/// Places unassigned detections, or every detection with `rebuild`.
pub fn run_sequences<W: Write>(
    writer: &mut W,
    db: &mut Database,
    config: &Config,
    rebuild: bool,
) -> Result<()> {
    let mode = if rebuild {
        SequenceMode::Rebuild
    } else {
        SequenceMode::Incremental
    };
    let _lock = acquire_lock(config)?;
    let report = segment_sequences(db, &config.segmentation, mode).context("sequence pass failed")?;
    finish(writer, &report)
}

/// Opens and exclusively locks the lock file next to the database.
///
/// The lock is released when the returned file is dropped.
pub(crate) fn acquire_lock(config: &Config) -> Result<File> {
    let path = config.lock_path();
    let file = File::create(&path)
        .with_context(|| format!("failed to create lock file {}", path.display()))?;
    file.lock_exclusive().context("failed to acquire lock")?;
    tracing::debug!(path = %path.display(), "acquired segmentation lock");
    Ok(file)
}

fn finish<W: Write>(writer: &mut W, report: &SegmentationReport) -> Result<()> {
    write_report(writer, report)?;
    if !report.is_complete() {
        anyhow::bail!(
            "{} of {} partitions failed and were rolled back",
            report.failed_partitions.len(),
            report.partitions
        );
    }
    Ok(())
}

fn write_report<W: Write>(writer: &mut W, report: &SegmentationReport) -> Result<()> {
    writeln!(writer, "{} pass", report.kind)?;
    writeln!(writer, "Partitions: {}", report.partitions)?;
    writeln!(writer, "Records assigned: {}", report.records_assigned)?;
    writeln!(writer, "Runs created: {}", report.runs_created)?;
    writeln!(writer, "Runs extended: {}", report.runs_extended)?;
    if report.bridged > 0 {
        writeln!(writer, "Bridging groups: {}", report.bridged)?;
    }
    for partition in &report.empty_partitions {
        writeln!(writer, "- {partition}: no usable timestamps")?;
    }
    for failure in &report.failed_partitions {
        writeln!(writer, "- {}: failed: {}", failure.partition, failure.error)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    use chrono::{TimeZone, Utc};
    use insta::assert_snapshot;
    use trapseq_db::{DetectionRow, PhotoRow};

    fn photo(id: &str, camera: &str, minute: i64) -> PhotoRow {
        let base = Utc.with_ymd_and_hms(2024, 5, 1, 6, 0, 0).unwrap();
        PhotoRow {
            id: id.to_string(),
            path: None,
            site_name: Some("North".to_string()),
            camera_id: Some(camera.to_string()),
            taken_at: Some(base + chrono::Duration::minutes(minute)),
            modified_at: None,
        }
    }

    fn detection(id: &str, photo_id: &str) -> DetectionRow {
        DetectionRow {
            id: id.to_string(),
            photo_id: photo_id.to_string(),
            subject: Some("fox".to_string()),
            count: Some(1),
        }
    }

    fn setup() -> (tempfile::TempDir, Database, Config) {
        let temp = tempfile::tempdir().unwrap();
        let config = Config {
            database_path: temp.path().join("trapseq.db"),
            segmentation: trapseq_core::SegmentationConfig::default(),
        };
        let db = Database::open(&config.database_path).unwrap();
        (temp, db, config)
    }

    #[test]
    fn test_sequences_report_counts_runs_and_extensions() {
        let (_temp, mut db, config) = setup();
        db.insert_photos(&[photo("p0", "C1", 0), photo("p10", "C1", 10), photo("p200", "C1", 200)])
            .unwrap();
        db.insert_detections(&[detection("d0", "p0"), detection("d10", "p10"), detection("d200", "p200")])
            .unwrap();

        let mut output = Vec::new();
        run_sequences(&mut output, &mut db, &config, false).unwrap();
        assert_snapshot!(String::from_utf8(output).unwrap(), @r"
        sequence pass
        Partitions: 1
        Records assigned: 3
        Runs created: 2
        Runs extended: 0
        ");

        db.insert_photos(&[photo("p25", "C1", 25)]).unwrap();
        db.insert_detections(&[detection("d25", "p25")]).unwrap();
        let mut output = Vec::new();
        run_sequences(&mut output, &mut db, &config, false).unwrap();
        assert_snapshot!(String::from_utf8(output).unwrap(), @r"
        sequence pass
        Partitions: 1
        Records assigned: 1
        Runs created: 0
        Runs extended: 1
        ");
    }

    #[test]
    fn test_seasons_report_lists_untimed_partitions() {
        let (_temp, mut db, config) = setup();
        let mut untimed = photo("px", "C9", 0);
        untimed.taken_at = None;
        db.insert_photos(&[photo("p0", "C1", 0), untimed]).unwrap();

        let mut output = Vec::new();
        run_seasons(&mut output, &mut db, &config).unwrap();
        assert_snapshot!(String::from_utf8(output).unwrap(), @r"
        season pass
        Partitions: 2
        Records assigned: 1
        Runs created: 1
        Runs extended: 0
        - North/C9: no usable timestamps
        ");
    }

    #[test]
    fn test_invalid_config_fails_before_writing() {
        let (_temp, mut db, mut config) = setup();
        config.segmentation.sequence_gap_minutes = 0;
        db.insert_photos(&[photo("p0", "C1", 0)]).unwrap();
        db.insert_detections(&[detection("d0", "p0")]).unwrap();

        let mut output = Vec::new();
        let err = run_sequences(&mut output, &mut db, &config, false).unwrap_err();
        assert!(err.to_string().contains("sequence pass failed"));
        assert_eq!(db.status().unwrap().sequences, 0);
    }

    #[test]
    fn test_lock_file_is_created_next_to_database() {
        let (temp, _db, config) = setup();
        let lock = acquire_lock(&config).unwrap();
        assert!(temp.path().join("trapseq.db.lock").exists());
        drop(lock);
        // released locks can be taken again
        acquire_lock(&config).unwrap();
    }
}
