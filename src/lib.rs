//! Cadence materializes recurring transactions into a personal-finance ledger.
//!
//! A daily processing pass scans recurring-transaction definitions, posts
//! every occurrence that has come due to the ledger, and advances each
//! schedule so that every occurrence is posted exactly once, even across
//! retries, overlapping invocations and process restarts.

#![warn(missing_docs)]

use tokio::signal;

pub mod db;
pub mod ledger;
pub mod run;
pub mod schedule;
pub mod scheduler;

mod database_id;

pub use database_id::DatabaseID;
pub use db::initialize as initialize_db;

/// An async task that waits for either the ctrl+c or terminate signal,
/// whichever comes first.
///
/// Await this alongside the scheduler loop to shut the processor down
/// gracefully. A pass that is already running completes (and releases the run
/// lock) before the process exits.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::debug!("Received ctrl+c signal.");
        },
        _ = terminate => {
            tracing::debug!("Received terminate signal.");
        },
    }
}

/// The errors that may occur in the application.
#[derive(Debug, thiserror::Error, PartialEq)]
pub enum Error {
    /// An invalid recurrence rule was supplied (e.g., a zero interval or an
    /// out-of-range day-of-month anchor).
    #[error("invalid recurrence rule: {0}")]
    InvalidRule(String),

    /// An invalid transaction template was supplied (e.g., a non-positive or
    /// non-finite amount).
    #[error("invalid transaction template: {0}")]
    InvalidTemplate(String),

    /// The ledger refused the transaction.
    ///
    /// The schedule state is left untouched so the same occurrence is retried
    /// on the next run.
    #[error("the ledger rejected the transaction: {0}")]
    LedgerRejected(String),

    /// The ledger did not answer within the allowed time.
    ///
    /// Treated the same as [Error::LedgerRejected] for propagation purposes.
    #[error("the ledger did not respond in time")]
    LedgerTimeout,

    /// The requested resource was not found.
    ///
    /// Internally, this error may occur when a query returns no rows.
    #[error("the requested resource could not be found")]
    NotFound,

    /// Tried to update a recurring transaction that does not exist.
    #[error("tried to update a recurring transaction that is not in the database")]
    UpdateMissingSchedule,

    /// Tried to finalize a run record that does not exist or has already been
    /// finalized. Finalized run records are immutable.
    #[error("tried to finalize a run record that is missing or already finalized")]
    UpdateMissingRun,

    /// An error occurred while serializing a struct as JSON
    #[error("could not serialize as JSON: {0}")]
    JSONSerializationError(String),

    /// Could not acquire the database lock
    #[error("could not acquire the database lock")]
    DatabaseLockError,

    /// The run time string could not be parsed as a 24-hour `HH:MM` time.
    #[error("could not parse \"{0}\" as a HH:MM time of day")]
    InvalidRunTime(String),

    /// An error occurred while getting the local timezone from a canonical timezone string.
    #[error("invalid timezone {0}")]
    InvalidTimezoneError(String),

    /// An unhandled/unexpected SQL error.
    #[error("an unexpected SQL error occurred: {0}")]
    SqlError(rusqlite::Error),
}

impl From<rusqlite::Error> for Error {
    fn from(value: rusqlite::Error) -> Self {
        match value {
            rusqlite::Error::QueryReturnedNoRows => Error::NotFound,
            error => {
                tracing::error!("an unhandled SQL error occurred: {}", error);
                Error::SqlError(error)
            }
        }
    }
}
