//! The append-only log of processing runs.
//!
//! A record is created when a run starts and finalized exactly once when it
//! ends. Finalized records are immutable; they are the observable surface of
//! the processor, queried by time range for dashboards and manual retry
//! tooling.

use rusqlite::{Connection, Row, types::Type};
use serde::Serialize;
use time::OffsetDateTime;

use crate::{Error, schedule::ScheduleId};

/// Database identifier for a run record.
pub type RunRecordId = i64;

/// The error returned when an integer is not a valid run status code.
#[derive(Debug, thiserror::Error)]
#[error("{0} is not a valid run status code")]
pub struct RunStatusError(pub i64);

/// How a processing run ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum RunStatus {
    /// Every due schedule was processed without failure.
    Success,
    /// Some schedules failed; the run still completed and the failed
    /// schedules are retried on the next run.
    PartialFailure,
    /// The run aborted before processing (e.g., the due-set query failed).
    Failed,
    /// Another run already held the lock; nothing was processed.
    Skipped,
}

impl TryFrom<i64> for RunStatus {
    type Error = RunStatusError;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(RunStatus::Success),
            1 => Ok(RunStatus::PartialFailure),
            2 => Ok(RunStatus::Failed),
            3 => Ok(RunStatus::Skipped),
            _ => Err(RunStatusError(value)),
        }
    }
}

impl RunStatus {
    /// The integer code the status is stored as in the database.
    pub fn as_i64(&self) -> i64 {
        match self {
            RunStatus::Success => 0,
            RunStatus::PartialFailure => 1,
            RunStatus::Failed => 2,
            RunStatus::Skipped => 3,
        }
    }
}

/// One entry in the run log.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct RunRecord {
    /// The ID of the run.
    pub id: RunRecordId,
    /// When the run started.
    pub started_at: OffsetDateTime,
    /// When the run finished. `None` while the run is still in flight.
    pub finished_at: Option<OffsetDateTime>,
    /// How the run ended. `None` while the run is still in flight.
    pub status: Option<RunStatus>,
    /// How many due schedules were processed without failure.
    pub processed_count: u32,
    /// The schedules that failed during the run, for manual retry targeting.
    pub failed_schedule_ids: Vec<ScheduleId>,
}

/// Create the table that run records are stored in.
pub fn create_run_record_table(connection: &Connection) -> Result<(), rusqlite::Error> {
    connection.execute(
        "CREATE TABLE IF NOT EXISTS run_record (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                started_at TEXT NOT NULL,
                finished_at TEXT,
                status INTEGER,
                processed_count INTEGER NOT NULL DEFAULT 0,
                failed_schedule_ids TEXT NOT NULL DEFAULT '[]'
            );",
        (),
    )?;

    // Improve performance of time-range queries
    connection.execute(
        "CREATE INDEX IF NOT EXISTS idx_run_record_started_at ON run_record(started_at)",
        (),
    )?;

    // Ensure the sequence starts at 1
    connection.execute(
        "INSERT OR IGNORE INTO sqlite_sequence (name, seq) VALUES ('run_record', 0)",
        (),
    )?;

    Ok(())
}

/// Create a record for a run that started at `started_at`.
///
/// # Errors
/// This function will return an [Error::SqlError] if there is an SQL error.
pub fn start_run(started_at: OffsetDateTime, connection: &Connection) -> Result<RunRecordId, Error> {
    connection.execute(
        "INSERT INTO run_record (started_at) VALUES (?1)",
        [started_at],
    )?;

    Ok(connection.last_insert_rowid())
}

/// Finalize the record for run `id`.
///
/// A record can be finalized only once; records that already have an end
/// time are immutable.
///
/// # Errors
/// This function will return a:
/// - [Error::UpdateMissingRun] if `id` does not refer to an in-flight run,
/// - [Error::JSONSerializationError] if the failed schedule IDs could not be
///   serialized,
/// - or [Error::SqlError] if there is some other SQL error.
pub fn finalize_run(
    id: RunRecordId,
    finished_at: OffsetDateTime,
    status: RunStatus,
    processed_count: u32,
    failed_schedule_ids: &[ScheduleId],
    connection: &Connection,
) -> Result<RunRecord, Error> {
    let failed_ids_json = serde_json::to_string(failed_schedule_ids)
        .map_err(|error| Error::JSONSerializationError(error.to_string()))?;

    let rows_affected = connection.execute(
        "UPDATE run_record
             SET finished_at = ?1, status = ?2, processed_count = ?3, failed_schedule_ids = ?4
             WHERE id = ?5 AND finished_at IS NULL",
        rusqlite::params![
            finished_at,
            status.as_i64(),
            processed_count,
            failed_ids_json,
            id,
        ],
    )?;

    if rows_affected == 0 {
        return Err(Error::UpdateMissingRun);
    }

    get_run(id, connection)
}

/// Retrieve the record for run `id`.
///
/// # Errors
/// This function will return a:
/// - [Error::NotFound] if `id` does not refer to a run,
/// - or [Error::SqlError] if there is some other SQL error.
pub fn get_run(id: RunRecordId, connection: &Connection) -> Result<RunRecord, Error> {
    connection
        .prepare(
            "SELECT id, started_at, finished_at, status, processed_count, failed_schedule_ids
                 FROM run_record WHERE id = :id",
        )?
        .query_row(&[(":id", &id)], map_run_record_row)
        .map_err(|error| error.into())
}

/// Retrieve the runs that started within the given time range (inclusive),
/// oldest first.
///
/// # Errors
/// This function will return an [Error::SqlError] if there is an SQL error.
pub fn get_runs_in_range(
    start: OffsetDateTime,
    end: OffsetDateTime,
    connection: &Connection,
) -> Result<Vec<RunRecord>, Error> {
    connection
        .prepare(
            "SELECT id, started_at, finished_at, status, processed_count, failed_schedule_ids
                 FROM run_record
                 WHERE started_at BETWEEN :start AND :end
                 ORDER BY started_at ASC, id ASC",
        )?
        .query_map(
            rusqlite::named_params! { ":start": start, ":end": end },
            map_run_record_row,
        )?
        .map(|maybe_record| maybe_record.map_err(|error| error.into()))
        .collect()
}

fn map_run_record_row(row: &Row) -> Result<RunRecord, rusqlite::Error> {
    let status = row
        .get::<_, Option<i64>>(3)?
        .map(|code| {
            RunStatus::try_from(code).map_err(|error| {
                rusqlite::Error::FromSqlConversionFailure(3, Type::Integer, Box::new(error))
            })
        })
        .transpose()?;

    let failed_ids_json: String = row.get(5)?;
    let failed_schedule_ids = serde_json::from_str(&failed_ids_json).map_err(|error| {
        rusqlite::Error::FromSqlConversionFailure(5, Type::Text, Box::new(error))
    })?;

    Ok(RunRecord {
        id: row.get(0)?,
        started_at: row.get(1)?,
        finished_at: row.get(2)?,
        status,
        processed_count: row.get(4)?,
        failed_schedule_ids,
    })
}
