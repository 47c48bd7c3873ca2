//! The run-scoped lock that keeps processing passes from overlapping.
//!
//! The lock is a row in the database keyed by a fixed coordinator name, so
//! it excludes concurrent runs across processes sharing the database, not
//! just within one process. Acquisition is non-blocking: a caller that loses
//! the race skips its run rather than queueing up behind a stuck one.

use std::sync::{Arc, Mutex};

use rusqlite::Connection;
use time::OffsetDateTime;

use crate::Error;

/// The coordinator identity the processing-run lock is keyed by.
pub const RUN_LOCK_NAME: &str = "recurring-transactions-job";

/// Create the table that run locks are stored in.
pub fn create_run_lock_table(connection: &Connection) -> Result<(), rusqlite::Error> {
    connection.execute(
        "CREATE TABLE IF NOT EXISTS run_lock (
                name TEXT PRIMARY KEY,
                locked_at TEXT NOT NULL
            );",
        (),
    )?;

    Ok(())
}

/// The exclusive lock guarding processing runs.
#[derive(Debug, Clone)]
pub struct RunLock {
    connection: Arc<Mutex<Connection>>,
}

impl RunLock {
    /// Create a handle to the run lock stored on `connection`.
    pub fn new(connection: Arc<Mutex<Connection>>) -> Self {
        Self { connection }
    }

    /// Try to acquire the lock without blocking.
    ///
    /// Returns `None` when another holder already has the lock. The returned
    /// guard releases the lock when dropped, so the lock is released on every
    /// exit path including panics and early returns.
    ///
    /// # Errors
    /// This function will return a:
    /// - [Error::DatabaseLockError] if the connection mutex is poisoned,
    /// - or [Error::SqlError] if there is an SQL error.
    pub fn try_acquire(&self, now: OffsetDateTime) -> Result<Option<RunLockGuard>, Error> {
        let connection = self
            .connection
            .lock()
            .map_err(|_| Error::DatabaseLockError)?;

        // A pre-existing row means the lock is held; INSERT OR IGNORE makes
        // the check-and-set a single atomic statement.
        let rows_inserted = connection.execute(
            "INSERT OR IGNORE INTO run_lock (name, locked_at) VALUES (?1, ?2)",
            (RUN_LOCK_NAME, now),
        )?;

        if rows_inserted == 0 {
            return Ok(None);
        }

        Ok(Some(RunLockGuard {
            connection: self.connection.clone(),
            released: false,
        }))
    }
}

/// Holds the run lock until released or dropped.
#[derive(Debug)]
pub struct RunLockGuard {
    connection: Arc<Mutex<Connection>>,
    released: bool,
}

impl RunLockGuard {
    /// Release the lock, reporting any error to the caller.
    ///
    /// Dropping the guard also releases the lock, but swallows errors; call
    /// this on the happy path so release failures are not lost.
    ///
    /// # Errors
    /// This function will return a:
    /// - [Error::DatabaseLockError] if the connection mutex is poisoned,
    /// - or [Error::SqlError] if there is an SQL error.
    pub fn release(mut self) -> Result<(), Error> {
        self.release_once()
    }

    fn release_once(&mut self) -> Result<(), Error> {
        if self.released {
            return Ok(());
        }

        self.released = true;

        let connection = self
            .connection
            .lock()
            .map_err(|_| Error::DatabaseLockError)?;

        connection.execute("DELETE FROM run_lock WHERE name = ?1", [RUN_LOCK_NAME])?;

        Ok(())
    }
}

impl Drop for RunLockGuard {
    fn drop(&mut self) {
        if let Err(error) = self.release_once() {
            tracing::warn!("could not release the run lock: {error}");
        }
    }
}

#[cfg(test)]
mod run_lock_tests {
    use std::sync::{Arc, Mutex};

    use rusqlite::Connection;
    use time::OffsetDateTime;

    use super::{RunLock, create_run_lock_table};

    fn get_test_lock() -> RunLock {
        let connection = Connection::open_in_memory().unwrap();
        create_run_lock_table(&connection).expect("Could not create run lock table");

        RunLock::new(Arc::new(Mutex::new(connection)))
    }

    #[test]
    fn acquire_succeeds_when_lock_is_free() {
        let lock = get_test_lock();

        let guard = lock.try_acquire(OffsetDateTime::now_utc()).unwrap();

        assert!(guard.is_some());
    }

    #[test]
    fn acquire_fails_while_lock_is_held() {
        let lock = get_test_lock();
        let _guard = lock.try_acquire(OffsetDateTime::now_utc()).unwrap().unwrap();

        let second = lock.try_acquire(OffsetDateTime::now_utc()).unwrap();

        assert!(second.is_none());
    }

    #[test]
    fn explicit_release_frees_the_lock() {
        let lock = get_test_lock();
        let guard = lock.try_acquire(OffsetDateTime::now_utc()).unwrap().unwrap();

        guard.release().expect("Could not release lock");

        let reacquired = lock.try_acquire(OffsetDateTime::now_utc()).unwrap();
        assert!(reacquired.is_some());
    }

    #[test]
    fn dropping_the_guard_frees_the_lock() {
        let lock = get_test_lock();

        {
            let _guard = lock.try_acquire(OffsetDateTime::now_utc()).unwrap().unwrap();
        }

        let reacquired = lock.try_acquire(OffsetDateTime::now_utc()).unwrap();
        assert!(reacquired.is_some());
    }
}
