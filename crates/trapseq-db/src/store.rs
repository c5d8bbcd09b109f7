//! [`DataStore`] implementation over the `SQLite` schema.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use rusqlite::{Connection, Transaction, TransactionBehavior, params, params_from_iter};
use trapseq_core::source::sort_records;
use trapseq_core::{
    Assignment, DataStore, Observation, PartSummary, PartitionKey, Placement, Record,
    RecordAssignment, RecordId, RecordSelection, RunId, RunKind, RunSummary, StoreError,
    StoreTransaction,
};

use crate::{
    Database, DbError, decode_partition, encode_partition, format_timestamp, parse_timestamp,
    run_table, stored_timestamp, to_u32,
};

/// The member table of a run kind and the columns pointing at its runs.
struct Members {
    table: &'static str,
    run_column: &'static str,
    reset: &'static str,
}

const fn members(kind: RunKind) -> Members {
    match kind {
        RunKind::Season => Members {
            table: "photos",
            run_column: "season_id",
            reset: "season_id = NULL, season_no = NULL, season_order = NULL",
        },
        RunKind::Sequence => Members {
            table: "detections",
            run_column: "sequence_id",
            reset: "sequence_id = NULL, part_index = NULL",
        },
    }
}

impl DataStore for Database {
    type Transaction<'a> = SqliteTransaction<'a>;

    fn fetch_records(&self, selection: &RecordSelection) -> Result<Vec<Record>, StoreError> {
        Ok(fetch_records(&self.conn, selection)?)
    }

    fn list_runs(&self, kind: RunKind) -> Result<Vec<RunSummary>, StoreError> {
        let mut runs = load_runs(&self.conn, kind, None)?;
        runs.sort_by(|a, b| {
            a.partition
                .cmp(&b.partition)
                .then_with(|| a.run_index.cmp(&b.run_index))
        });
        Ok(runs)
    }

    /// Starts an `IMMEDIATE` transaction so the write lock is held from the
    /// first read.
    fn begin(&mut self) -> Result<Self::Transaction<'_>, StoreError> {
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(DbError::from)?;
        Ok(SqliteTransaction { tx })
    }
}

/// A write transaction on a [`Database`]. Rolls back when dropped.
pub struct SqliteTransaction<'a> {
    tx: Transaction<'a>,
}

impl StoreTransaction for SqliteTransaction<'_> {
    fn fetch_records(&self, selection: &RecordSelection) -> Result<Vec<Record>, StoreError> {
        Ok(fetch_records(&self.tx, selection)?)
    }

    fn read_run_summary(
        &self,
        kind: RunKind,
        partition: &PartitionKey,
    ) -> Result<Vec<RunSummary>, StoreError> {
        Ok(load_runs(&self.tx, kind, Some(partition))?)
    }

    fn run_id_exists(&self, kind: RunKind, run_id: &RunId) -> Result<bool, StoreError> {
        let table = run_table(kind);
        let exists = self
            .tx
            .query_row(
                &format!("SELECT EXISTS(SELECT 1 FROM {table} WHERE id = ?1)"),
                [run_id.as_str()],
                |row| row.get::<_, bool>(0),
            )
            .map_err(DbError::from)?;
        Ok(exists)
    }

    fn clear_runs(&mut self, kind: RunKind, partition: Option<&PartitionKey>) -> Result<(), StoreError> {
        Ok(clear_runs(&self.tx, kind, partition)?)
    }

    fn write_assignments(&mut self, assignments: &[RecordAssignment]) -> Result<usize, StoreError> {
        Ok(write_assignments(&self.tx, assignments)?)
    }

    fn upsert_run_summary(&mut self, kind: RunKind, runs: &[RunSummary]) -> Result<(), StoreError> {
        Ok(upsert_runs(&self.tx, kind, runs)?)
    }

    fn delete_orphan_runs(&mut self, kind: RunKind) -> Result<Vec<RunId>, StoreError> {
        Ok(delete_orphan_runs(&self.tx, kind)?)
    }

    fn commit(self) -> Result<(), StoreError> {
        self.tx.commit().map_err(DbError::from)?;
        Ok(())
    }
}

#[derive(Debug)]
struct RecordRow {
    id: String,
    site_name: Option<String>,
    camera_id: Option<String>,
    subject: Option<String>,
    taken_at: Option<String>,
    modified_at: Option<String>,
    run_id: Option<String>,
    part_index: Option<i64>,
}

impl RecordRow {
    fn into_record(self, selection: &RecordSelection) -> Result<Record, DbError> {
        let taken_at = stored_timestamp(self.taken_at, &self.id, "taken_at");
        let modified_at = stored_timestamp(self.modified_at, &self.id, "modified_at");
        let assignment = self
            .run_id
            .map(|run_id| -> Result<Assignment, DbError> {
                Ok(Assignment {
                    run_id: RunId::new(run_id)?,
                    part_index: self
                        .part_index
                        .map(|part| to_u32("part_index", part))
                        .transpose()?,
                })
            })
            .transpose()?;
        let observation = Observation {
            id: RecordId::new(self.id)?,
            site_name: self.site_name,
            camera_id: self.camera_id,
            subject: self.subject,
            taken_at,
            modified_at,
        };
        Ok(observation.to_record(selection, assignment))
    }
}

fn fetch_records(conn: &Connection, selection: &RecordSelection) -> Result<Vec<Record>, DbError> {
    let sql = match selection.kind {
        RunKind::Season => {
            "
            SELECT id, site_name, camera_id, NULL, taken_at, modified_at, season_id, NULL
            FROM photos
            "
        }
        RunKind::Sequence => {
            "
            SELECT d.id, p.site_name, p.camera_id, d.subject, p.taken_at, p.modified_at,
                   d.sequence_id, d.part_index
            FROM detections d
            JOIN photos p ON p.id = d.photo_id
            "
        }
    };
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt.query_map([], |row| {
        Ok(RecordRow {
            id: row.get(0)?,
            site_name: row.get(1)?,
            camera_id: row.get(2)?,
            subject: row.get(3)?,
            taken_at: row.get(4)?,
            modified_at: row.get(5)?,
            run_id: row.get(6)?,
            part_index: row.get(7)?,
        })
    })?;
    let mut records = Vec::new();
    for row in rows {
        records.push(row?.into_record(selection)?);
    }
    sort_records(&mut records);
    tracing::debug!(kind = %selection.kind, records = records.len(), "fetched records");
    Ok(records)
}

#[derive(Debug)]
struct RunRow {
    id: String,
    partition_key: String,
    run_index: i64,
    start_at: String,
    end_at: String,
    member_count: i64,
}

fn required_timestamp(value: String, id: &str) -> Result<DateTime<Utc>, DbError> {
    match parse_timestamp(&value) {
        Some(parsed) => Ok(parsed),
        None => Err(DbError::TimestampParse {
            record_id: id.to_string(),
            timestamp: value,
        }),
    }
}

/// Loads run summaries ordered by start, optionally for one partition.
fn load_runs(
    conn: &Connection,
    kind: RunKind,
    partition: Option<&PartitionKey>,
) -> Result<Vec<RunSummary>, DbError> {
    let table = run_table(kind);
    let filter = if partition.is_some() {
        "WHERE partition_key = ?1"
    } else {
        ""
    };
    let encoded = partition.map(encode_partition).transpose()?;

    let mut stmt = conn.prepare(&format!(
        "
        SELECT id, partition_key, run_index, start_at, end_at, member_count
        FROM {table}
        {filter}
        ORDER BY start_at ASC, id ASC
        "
    ))?;
    let rows = stmt.query_map(params_from_iter(encoded.iter()), |row| {
        Ok(RunRow {
            id: row.get(0)?,
            partition_key: row.get(1)?,
            run_index: row.get(2)?,
            start_at: row.get(3)?,
            end_at: row.get(4)?,
            member_count: row.get(5)?,
        })
    })?;

    let mut parts = match kind {
        RunKind::Season => HashMap::new(),
        RunKind::Sequence => load_parts(conn, encoded.as_deref())?,
    };
    let mut runs = Vec::new();
    for row in rows {
        let row = row?;
        runs.push(RunSummary {
            partition: decode_partition(&row.partition_key)?,
            run_index: to_u32("run_index", row.run_index)?,
            start: required_timestamp(row.start_at, &row.id)?,
            end: required_timestamp(row.end_at, &row.id)?,
            member_count: to_u32("member_count", row.member_count)?,
            parts: parts.remove(&row.id).unwrap_or_default(),
            run_id: RunId::new(row.id)?,
        });
    }
    Ok(runs)
}

fn load_parts(
    conn: &Connection,
    partition_key: Option<&str>,
) -> Result<HashMap<String, Vec<PartSummary>>, DbError> {
    let filter = if partition_key.is_some() {
        "WHERE s.partition_key = ?1"
    } else {
        ""
    };
    let mut stmt = conn.prepare(&format!(
        "
        SELECT sp.sequence_id, sp.part_index, sp.start_at, sp.end_at, sp.member_count
        FROM sequence_parts sp
        JOIN sequences s ON s.id = sp.sequence_id
        {filter}
        ORDER BY sp.sequence_id ASC, sp.part_index ASC
        "
    ))?;
    let rows = stmt.query_map(params_from_iter(partition_key.iter()), |row| {
        Ok((
            row.get::<_, String>(0)?,
            row.get::<_, i64>(1)?,
            row.get::<_, String>(2)?,
            row.get::<_, String>(3)?,
            row.get::<_, i64>(4)?,
        ))
    })?;

    let mut parts: HashMap<String, Vec<PartSummary>> = HashMap::new();
    for row in rows {
        let (sequence_id, part_index, start_at, end_at, member_count) = row?;
        let part = PartSummary {
            part_index: to_u32("part_index", part_index)?,
            start: required_timestamp(start_at, &sequence_id)?,
            end: required_timestamp(end_at, &sequence_id)?,
            member_count: to_u32("member_count", member_count)?,
        };
        parts.entry(sequence_id).or_default().push(part);
    }
    Ok(parts)
}

fn clear_runs(conn: &Connection, kind: RunKind, partition: Option<&PartitionKey>) -> Result<(), DbError> {
    let table = run_table(kind);
    let Members {
        table: member_table,
        run_column,
        reset,
    } = members(kind);
    let filter = if partition.is_some() {
        "WHERE partition_key = ?1"
    } else {
        ""
    };
    let encoded = partition.map(encode_partition).transpose()?;

    let unassigned = conn.execute(
        &format!("UPDATE {member_table} SET {reset} WHERE {run_column} IN (SELECT id FROM {table} {filter})"),
        params_from_iter(encoded.iter()),
    )?;
    let deleted = conn.execute(
        &format!("DELETE FROM {table} {filter}"),
        params_from_iter(encoded.iter()),
    )?;
    tracing::debug!(kind = %kind, deleted, unassigned, "cleared stored runs");
    Ok(())
}

fn write_assignments(conn: &Connection, assignments: &[RecordAssignment]) -> Result<usize, DbError> {
    let mut written = 0;
    for assignment in assignments {
        written += match assignment.placement {
            Placement::Season {
                run_index,
                order_within_run,
            } => conn
                .prepare_cached(
                    "
                    UPDATE photos
                    SET season_id = ?1, season_no = ?2, season_order = ?3
                    WHERE id = ?4
                    ",
                )?
                .execute(params![
                    assignment.run_id.as_str(),
                    run_index,
                    order_within_run,
                    assignment.record_id.as_str(),
                ])?,
            Placement::Sequence { part_index } => conn
                .prepare_cached(
                    "
                    UPDATE detections
                    SET sequence_id = ?1, part_index = ?2
                    WHERE id = ?3 AND sequence_id IS NULL
                    ",
                )?
                .execute(params![
                    assignment.run_id.as_str(),
                    part_index,
                    assignment.record_id.as_str(),
                ])?,
        };
    }
    Ok(written)
}

fn upsert_runs(conn: &Connection, kind: RunKind, runs: &[RunSummary]) -> Result<(), DbError> {
    let table = run_table(kind);
    let mut run_stmt = conn.prepare_cached(&format!(
        "
        INSERT INTO {table} (id, partition_key, run_index, start_at, end_at, member_count)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6)
        ON CONFLICT(id) DO UPDATE SET
            run_index = excluded.run_index,
            start_at = excluded.start_at,
            end_at = excluded.end_at,
            member_count = excluded.member_count
        WHERE {table}.partition_key = excluded.partition_key
        "
    ))?;
    // a summary always carries the full part list, so parts are replaced
    let mut clear_parts = conn.prepare_cached("DELETE FROM sequence_parts WHERE sequence_id = ?1")?;
    let mut part_stmt = conn.prepare_cached(
        "
        INSERT INTO sequence_parts (sequence_id, part_index, start_at, end_at, member_count)
        VALUES (?1, ?2, ?3, ?4, ?5)
        ",
    )?;

    for run in runs {
        let changed = run_stmt.execute(params![
            run.run_id.as_str(),
            encode_partition(&run.partition)?,
            run.run_index,
            format_timestamp(run.start),
            format_timestamp(run.end),
            run.member_count,
        ])?;
        if changed == 0 {
            return Err(DbError::DuplicateRun {
                run_id: run.run_id.clone(),
            });
        }
        if kind == RunKind::Sequence {
            clear_parts.execute([run.run_id.as_str()])?;
            for part in &run.parts {
                part_stmt.execute(params![
                    run.run_id.as_str(),
                    part.part_index,
                    format_timestamp(part.start),
                    format_timestamp(part.end),
                    part.member_count,
                ])?;
            }
        }
    }
    Ok(())
}

fn delete_orphan_runs(conn: &Connection, kind: RunKind) -> Result<Vec<RunId>, DbError> {
    let table = run_table(kind);
    let Members {
        table: member_table,
        run_column,
        ..
    } = members(kind);

    let mut stmt = conn.prepare(&format!(
        "
        SELECT id FROM {table}
        WHERE NOT EXISTS (
            SELECT 1 FROM {member_table} WHERE {member_table}.{run_column} = {table}.id
        )
        ORDER BY start_at ASC, id ASC
        "
    ))?;
    let ids = stmt
        .query_map([], |row| row.get::<_, String>(0))?
        .collect::<Result<Vec<_>, _>>()?;

    let mut delete = conn.prepare(&format!("DELETE FROM {table} WHERE id = ?1"))?;
    let mut deleted = Vec::with_capacity(ids.len());
    for id in ids {
        delete.execute([&id])?;
        deleted.push(RunId::new(id)?);
    }
    Ok(deleted)
}
