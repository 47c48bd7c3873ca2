//! Implements a SQLite backed ledger writer.

use std::sync::{Arc, Mutex};

use rusqlite::{Connection, ErrorCode, Row};

use crate::{Error, ledger::writer::LedgerWriter, schedule::{Direction, ScheduleId}};

use super::models::{MaterializedTransaction, PostOutcome, PostedTransaction};

/// Create the table that posted ledger transactions are stored in.
///
/// The unique index on the idempotency key is what makes posting the same
/// occurrence twice a no-op.
pub fn create_ledger_transaction_table(connection: &Connection) -> Result<(), rusqlite::Error> {
    connection.execute(
        "CREATE TABLE IF NOT EXISTS ledger_transaction (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                schedule_id INTEGER NOT NULL,
                occurrence_date TEXT NOT NULL,
                amount REAL NOT NULL,
                direction INTEGER NOT NULL,
                account_id INTEGER NOT NULL,
                category_id INTEGER,
                memo TEXT NOT NULL,
                idempotency_key TEXT NOT NULL UNIQUE,
                posted_at TEXT NOT NULL DEFAULT (datetime('now'))
            );",
        (),
    )?;

    // Ensure the sequence starts at 1
    connection.execute(
        "INSERT OR IGNORE INTO sqlite_sequence (name, seq) VALUES ('ledger_transaction', 0)",
        (),
    )?;

    Ok(())
}

/// Writes materialized transactions to a ledger stored in SQLite.
#[derive(Debug, Clone)]
pub struct SqliteLedgerWriter {
    connection: Arc<Mutex<Connection>>,
}

impl SqliteLedgerWriter {
    /// Create a new writer for the SQLite `connection`.
    pub fn new(connection: Arc<Mutex<Connection>>) -> Self {
        Self { connection }
    }
}

impl LedgerWriter for SqliteLedgerWriter {
    /// Post a materialized transaction to the ledger.
    ///
    /// A transaction whose idempotency key already exists in the ledger is
    /// reported as [PostOutcome::Duplicate] and nothing is written.
    ///
    /// # Errors
    /// This function will return a:
    /// - [Error::LedgerTimeout] if the database is busy or locked,
    /// - [Error::DatabaseLockError] if the connection mutex is poisoned,
    /// - or [Error::SqlError] if there is some other SQL error.
    fn post(&mut self, transaction: &MaterializedTransaction) -> Result<PostOutcome, Error> {
        if !transaction.amount.is_finite() || transaction.amount <= 0.0 {
            return Ok(PostOutcome::Rejected(format!(
                "the amount must be a positive number, got {}",
                transaction.amount
            )));
        }

        let connection = self
            .connection
            .lock()
            .map_err(|_| Error::DatabaseLockError)?;

        let rows_inserted = connection
            .execute(
                "INSERT INTO ledger_transaction (
                        schedule_id, occurrence_date, amount, direction,
                        account_id, category_id, memo, idempotency_key
                    )
                    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                    ON CONFLICT(idempotency_key) DO NOTHING",
                rusqlite::params![
                    transaction.schedule_id,
                    transaction.occurrence_date,
                    transaction.amount,
                    transaction.direction.as_i64(),
                    transaction.account_id,
                    transaction.category_id,
                    transaction.memo,
                    transaction.idempotency_key,
                ],
            )
            .map_err(|error| match error {
                rusqlite::Error::SqliteFailure(sql_error, _)
                    if sql_error.code == ErrorCode::DatabaseBusy
                        || sql_error.code == ErrorCode::DatabaseLocked =>
                {
                    Error::LedgerTimeout
                }
                error => error.into(),
            })?;

        if rows_inserted == 0 {
            Ok(PostOutcome::Duplicate)
        } else {
            Ok(PostOutcome::Accepted(connection.last_insert_rowid()))
        }
    }
}

/// Retrieve the transactions posted for a schedule, in occurrence order.
///
/// # Errors
/// This function will return an [Error::SqlError] if there is an SQL error.
pub fn get_posted_transactions(
    schedule_id: ScheduleId,
    connection: &Connection,
) -> Result<Vec<PostedTransaction>, Error> {
    connection
        .prepare(
            "SELECT id, schedule_id, occurrence_date, amount, direction,
                    account_id, category_id, memo, idempotency_key
                 FROM ledger_transaction
                 WHERE schedule_id = :schedule_id
                 ORDER BY occurrence_date ASC, id ASC",
        )?
        .query_map(&[(":schedule_id", &schedule_id)], map_posted_transaction_row)?
        .map(|maybe_transaction| maybe_transaction.map_err(|error| error.into()))
        .collect()
}

fn map_posted_transaction_row(row: &Row) -> Result<PostedTransaction, rusqlite::Error> {
    let direction = Direction::try_from(row.get::<_, i64>(4)?).map_err(|error| {
        rusqlite::Error::FromSqlConversionFailure(4, rusqlite::types::Type::Integer, error.into())
    })?;

    Ok(PostedTransaction {
        id: row.get(0)?,
        schedule_id: row.get(1)?,
        occurrence_date: row.get(2)?,
        amount: row.get(3)?,
        direction,
        account_id: row.get(5)?,
        category_id: row.get(6)?,
        memo: row.get(7)?,
        idempotency_key: row.get(8)?,
    })
}
