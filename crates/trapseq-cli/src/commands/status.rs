//! Status command for showing record and run counts.

use std::io::Write;

use anyhow::{Context, Result};

use trapseq_db::Database;

use crate::Config;

pub fn run<W: Write>(writer: &mut W, db: &Database, config: &Config) -> Result<()> {
    let status = db.status().context("failed to count stored rows")?;

    writeln!(writer, "trapseq status")?;
    writeln!(writer, "Database: {}", config.database_path.display())?;

    if status.photos == 0 {
        writeln!(writer, "No photos imported.")?;
        return Ok(());
    }

    writeln!(
        writer,
        "Photos: {} ({} in a season, {} unassigned)",
        status.photos,
        status.photos_in_season,
        status.photos - status.photos_in_season
    )?;
    writeln!(
        writer,
        "Detections: {} ({} in a sequence, {} unassigned)",
        status.detections,
        status.detections_in_sequence,
        status.detections - status.detections_in_sequence
    )?;
    writeln!(writer, "Seasons: {}", status.seasons)?;
    writeln!(writer, "Sequences: {}", status.sequences)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    use chrono::{TimeZone, Utc};
    use insta::assert_snapshot;
    use trapseq_core::{SegmentationConfig, segment_seasons};
    use trapseq_db::{DetectionRow, PhotoRow};

    fn config_in(dir: &std::path::Path) -> Config {
        Config {
            database_path: dir.join("trapseq.db"),
            segmentation: SegmentationConfig::default(),
        }
    }

    #[test]
    fn test_status_command_outputs_counts() {
        let temp = tempfile::tempdir().unwrap();
        let config = config_in(temp.path());
        let mut db = Database::open(&config.database_path).unwrap();

        let photo = |id: &str, taken: Option<u32>| PhotoRow {
            id: id.to_string(),
            path: Some(format!("/cards/{id}.jpg")),
            site_name: Some("North".to_string()),
            camera_id: Some("C1".to_string()),
            taken_at: taken.map(|day| Utc.with_ymd_and_hms(2024, 5, day, 6, 0, 0).unwrap()),
            modified_at: None,
        };
        db.insert_photos(&[photo("p1", Some(1)), photo("p2", Some(2)), photo("p3", None)])
            .unwrap();
        db.insert_detections(&[DetectionRow {
            id: "d1".to_string(),
            photo_id: "p1".to_string(),
            subject: Some("fox".to_string()),
            count: Some(1),
        }])
        .unwrap();
        segment_seasons(&mut db, &config.segmentation).unwrap();

        let mut output = Vec::new();
        run(&mut output, &db, &config).unwrap();

        let output = String::from_utf8(output).unwrap();
        let output = output.replace(&config.database_path.display().to_string(), "[DB]");
        assert_snapshot!(output, @r"
        trapseq status
        Database: [DB]
        Photos: 3 (2 in a season, 1 unassigned)
        Detections: 1 (0 in a sequence, 1 unassigned)
        Seasons: 1
        Sequences: 0
        ");
    }

    #[test]
    fn test_status_command_handles_empty_database() {
        let temp = tempfile::tempdir().unwrap();
        let config = config_in(temp.path());
        let db = Database::open(&config.database_path).unwrap();

        let mut output = Vec::new();
        run(&mut output, &db, &config).unwrap();

        let output = String::from_utf8(output).unwrap();
        let output = output.replace(&config.database_path.display().to_string(), "[DB]");
        assert_snapshot!(output, @r"
        trapseq status
        Database: [DB]
        No photos imported.
        ");
    }
}
