//! Runs command for listing stored seasons or sequences.

use std::io::Write;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;

use trapseq_core::{DataStore, RunKind, RunSummary};
use trapseq_db::Database;

/// JSON output structure.
#[derive(Debug, Serialize)]
pub struct JsonRuns<'a> {
    pub kind: RunKind,
    pub runs: &'a [RunSummary],
}

pub fn run<W: Write>(writer: &mut W, db: &Database, kind: RunKind, json: bool) -> Result<()> {
    let runs = db
        .list_runs(kind)
        .with_context(|| format!("failed to list {kind} runs"))?;

    if json {
        let output = serde_json::to_string_pretty(&JsonRuns { kind, runs: &runs })?;
        writeln!(writer, "{output}")?;
    } else {
        write_table(writer, kind, &runs)?;
    }
    Ok(())
}

fn write_table<W: Write>(writer: &mut W, kind: RunKind, runs: &[RunSummary]) -> Result<()> {
    if runs.is_empty() {
        writeln!(writer, "No {kind} runs stored.")?;
        return Ok(());
    }

    writeln!(
        writer,
        "{:<24}  {:>4}  {:<19}  {:<19}  {:>7}  {:>5}  ID",
        "Partition", "No", "Start", "End", "Members", "Parts"
    )?;
    for run in runs {
        writeln!(
            writer,
            "{:<24}  {:>4}  {:<19}  {:<19}  {:>7}  {:>5}  {}",
            run.partition.to_string(),
            run.run_index,
            format_instant(run.start),
            format_instant(run.end),
            run.member_count,
            run.parts.len(),
            run.run_id
        )?;
    }
    Ok(())
}

fn format_instant(at: DateTime<Utc>) -> String {
    at.format("%Y-%m-%d %H:%M:%S").to_string()
}
