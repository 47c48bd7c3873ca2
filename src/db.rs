/*! This module initializes the application's database. */

use rusqlite::{Connection, Transaction as SqlTransaction};

use crate::{
    Error, ledger::create_ledger_transaction_table, run::create_run_lock_table,
    run::create_run_record_table, schedule::create_recurring_transaction_table,
};

/// Add the tables for the domain models to the database.
///
/// The tables are created in a single exclusive transaction so a half
/// initialized database is never observable.
///
/// # Errors
/// Returns an [Error::SqlError] if there is an SQL error.
pub fn initialize(connection: &Connection) -> Result<(), Error> {
    let transaction =
        SqlTransaction::new_unchecked(connection, rusqlite::TransactionBehavior::Exclusive)?;

    create_recurring_transaction_table(&transaction)?;
    create_ledger_transaction_table(&transaction)?;
    create_run_record_table(&transaction)?;
    create_run_lock_table(&transaction)?;

    transaction.commit()?;

    Ok(())
}
