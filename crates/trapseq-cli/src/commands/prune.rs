//! Prune command for dropping sequences left without detections.

use std::io::Write;

use anyhow::{Context, Result};

use trapseq_core::prune_sequences;
use trapseq_db::Database;

use crate::Config;
use crate::commands::segment::acquire_lock;

pub fn run<W: Write>(writer: &mut W, db: &mut Database, config: &Config) -> Result<()> {
    let _lock = acquire_lock(config)?;
    let report =
        prune_sequences(db, &config.segmentation).context("failed to prune sequences")?;

    writeln!(writer, "Deleted {} empty sequences", report.deleted.len())?;
    for run_id in &report.deleted {
        writeln!(writer, "- {run_id}")?;
    }
    writeln!(writer, "Refreshed {} sequence summaries", report.refreshed)?;
    Ok(())
}
