//! Persistence for recurring-transaction definitions.

use rusqlite::{Connection, Row, types::Type};
use time::{Date, Weekday};

use crate::Error;

use super::models::{
    Direction, Frequency, NewRecurringTransaction, RecurrenceRule, RecurringTransaction,
    ScheduleId, ScheduleStatus, TransactionTemplate,
};

/// Create the table that recurring transactions are stored in.
pub fn create_recurring_transaction_table(connection: &Connection) -> Result<(), rusqlite::Error> {
    connection.execute(
        "CREATE TABLE IF NOT EXISTS recurring_transaction (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                owner_id INTEGER NOT NULL,
                amount REAL NOT NULL,
                direction INTEGER NOT NULL,
                account_id INTEGER NOT NULL,
                category_id INTEGER,
                memo TEXT NOT NULL,
                frequency INTEGER NOT NULL,
                interval INTEGER NOT NULL,
                day_of_month INTEGER,
                weekday INTEGER,
                end_date TEXT,
                occurrence_limit INTEGER,
                next_run_at TEXT,
                last_run_at TEXT,
                occurrences_posted INTEGER NOT NULL DEFAULT 0,
                status INTEGER NOT NULL
            );",
        (),
    )?;

    // Improve performance of the due-set scan
    connection.execute(
        "CREATE INDEX IF NOT EXISTS idx_recurring_transaction_due
             ON recurring_transaction(status, next_run_at)",
        (),
    )?;

    // Ensure the sequence starts at 1
    connection.execute(
        "INSERT OR IGNORE INTO sqlite_sequence (name, seq) VALUES ('recurring_transaction', 0)",
        (),
    )?;

    Ok(())
}

/// Create a recurring transaction in the database.
///
/// The first occurrence is due on the start date, the posting state starts
/// at zero and the schedule starts out active.
///
/// # Errors
/// This function will return an error if there is an SQL error.
pub fn create_recurring_transaction(
    new: NewRecurringTransaction,
    connection: &Connection,
) -> Result<RecurringTransaction, Error> {
    connection.execute(
        "INSERT INTO recurring_transaction (
                owner_id, amount, direction, account_id, category_id, memo,
                frequency, interval, day_of_month, weekday, end_date, occurrence_limit,
                next_run_at, last_run_at, occurrences_posted, status
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, NULL, 0, ?14)",
        rusqlite::params![
            new.owner_id,
            new.template.amount,
            new.template.direction.as_i64(),
            new.template.account_id,
            new.template.category_id,
            new.template.memo,
            new.rule.frequency.as_i64(),
            new.rule.interval,
            new.rule.day_of_month,
            new.rule.weekday.map(weekday_to_i64),
            new.rule.end_date,
            new.rule.occurrence_limit,
            new.start_date,
            ScheduleStatus::Active.as_i64(),
        ],
    )?;

    let id = connection.last_insert_rowid();

    Ok(RecurringTransaction {
        id,
        owner_id: new.owner_id,
        template: new.template,
        rule: new.rule,
        next_run_at: Some(new.start_date),
        last_run_at: None,
        occurrences_posted: 0,
        status: ScheduleStatus::Active,
    })
}

/// Retrieve a recurring transaction in the database by its `id`.
///
/// # Errors
/// This function will return a:
/// - [Error::NotFound] if `id` does not refer to a valid recurring
///   transaction,
/// - or [Error::SqlError] if there is some other SQL error.
pub fn get_recurring_transaction(
    id: ScheduleId,
    connection: &Connection,
) -> Result<RecurringTransaction, Error> {
    connection
        .prepare(&format!(
            "SELECT {COLUMNS} FROM recurring_transaction WHERE id = :id"
        ))?
        .query_row(&[(":id", &id)], map_recurring_transaction_row)
        .map_err(|error| error.into())
}

/// Retrieve every active recurring transaction whose next occurrence is due
/// at or before `as_of`.
///
/// The result is ordered by `next_run_at` ascending, tie-broken by `id`
/// ascending, so processing order is deterministic and re-querying after a
/// partial failure resumes from a consistent position.
///
/// # Errors
/// This function will return an [Error::SqlError] if there is an SQL error.
pub fn select_due(as_of: Date, connection: &Connection) -> Result<Vec<RecurringTransaction>, Error> {
    connection
        .prepare(&format!(
            "SELECT {COLUMNS} FROM recurring_transaction
                 WHERE status = :status AND next_run_at IS NOT NULL AND next_run_at <= :as_of
                 ORDER BY next_run_at ASC, id ASC"
        ))?
        .query_map(
            rusqlite::named_params! {
                ":status": ScheduleStatus::Active.as_i64(),
                ":as_of": as_of,
            },
            map_recurring_transaction_row,
        )?
        .map(|maybe_schedule| maybe_schedule.map_err(|error| error.into()))
        .collect()
}

/// Persist the posting state of `schedule` after a confirmed posting.
///
/// Only `next_run_at`, `last_run_at`, `occurrences_posted` and `status` are
/// written; the template and rule columns are owned by the schedule's
/// creator and never change here.
///
/// # Errors
/// This function will return a:
/// - [Error::UpdateMissingSchedule] if the schedule is not in the database,
/// - or [Error::SqlError] if there is some other SQL error.
pub fn record_posting(
    schedule: &RecurringTransaction,
    connection: &Connection,
) -> Result<(), Error> {
    let rows_affected = connection.execute(
        "UPDATE recurring_transaction
             SET next_run_at = ?1, last_run_at = ?2, occurrences_posted = ?3, status = ?4
             WHERE id = ?5",
        rusqlite::params![
            schedule.next_run_at,
            schedule.last_run_at,
            schedule.occurrences_posted,
            schedule.status.as_i64(),
            schedule.id,
        ],
    )?;

    if rows_affected == 0 {
        return Err(Error::UpdateMissingSchedule);
    }

    Ok(())
}

/// Set the lifecycle status of a recurring transaction (pause, resume,
/// cancel).
///
/// # Errors
/// This function will return a:
/// - [Error::UpdateMissingSchedule] if the schedule is not in the database,
/// - or [Error::SqlError] if there is some other SQL error.
pub fn set_status(
    id: ScheduleId,
    status: ScheduleStatus,
    connection: &Connection,
) -> Result<(), Error> {
    let rows_affected = connection.execute(
        "UPDATE recurring_transaction SET status = ?1 WHERE id = ?2",
        (status.as_i64(), id),
    )?;

    if rows_affected == 0 {
        return Err(Error::UpdateMissingSchedule);
    }

    Ok(())
}

const COLUMNS: &str = "id, owner_id, amount, direction, account_id, category_id, memo, \
     frequency, interval, day_of_month, weekday, end_date, occurrence_limit, \
     next_run_at, last_run_at, occurrences_posted, status";

fn map_recurring_transaction_row(row: &Row) -> Result<RecurringTransaction, rusqlite::Error> {
    let direction = Direction::try_from(row.get::<_, i64>(3)?)
        .map_err(|error| rusqlite::Error::FromSqlConversionFailure(3, Type::Integer, error.into()))?;
    let frequency = Frequency::try_from(row.get::<_, i64>(7)?)
        .map_err(|error| rusqlite::Error::FromSqlConversionFailure(7, Type::Integer, error.into()))?;
    let weekday = row
        .get::<_, Option<i64>>(10)?
        .map(|code| {
            weekday_from_i64(code).ok_or_else(|| {
                rusqlite::Error::IntegralValueOutOfRange(10, code)
            })
        })
        .transpose()?;
    let status = ScheduleStatus::try_from(row.get::<_, i64>(16)?).map_err(|error| {
        rusqlite::Error::FromSqlConversionFailure(16, Type::Integer, error.into())
    })?;

    Ok(RecurringTransaction {
        id: row.get(0)?,
        owner_id: row.get(1)?,
        template: TransactionTemplate {
            amount: row.get(2)?,
            direction,
            account_id: row.get(4)?,
            category_id: row.get(5)?,
            memo: row.get(6)?,
        },
        rule: RecurrenceRule {
            frequency,
            interval: row.get(8)?,
            day_of_month: row.get(9)?,
            weekday,
            end_date: row.get(11)?,
            occurrence_limit: row.get(12)?,
        },
        next_run_at: row.get(13)?,
        last_run_at: row.get(14)?,
        occurrences_posted: row.get(15)?,
        status,
    })
}

fn weekday_to_i64(weekday: Weekday) -> i64 {
    i64::from(weekday.number_days_from_monday())
}

fn weekday_from_i64(code: i64) -> Option<Weekday> {
    match code {
        0 => Some(Weekday::Monday),
        1 => Some(Weekday::Tuesday),
        2 => Some(Weekday::Wednesday),
        3 => Some(Weekday::Thursday),
        4 => Some(Weekday::Friday),
        5 => Some(Weekday::Saturday),
        6 => Some(Weekday::Sunday),
        _ => None,
    }
}

#[cfg(test)]
mod create_table_tests {
    use rusqlite::Connection;

    use super::create_recurring_transaction_table;

    #[test]
    fn sql_is_valid() {
        let connection =
            Connection::open_in_memory().expect("Could not initialise in-memory SQLite database");

        assert_eq!(Ok(()), create_recurring_transaction_table(&connection));
    }
}
