//! The run coordinator: one locked, logged pass over the due set.

use std::sync::{Arc, Mutex};

use rusqlite::Connection;
use time::{Date, OffsetDateTime};

use crate::{Error, ledger::LedgerWriter, schedule};

use super::{
    lock::RunLock,
    processor,
    record::{self, RunRecord, RunStatus},
};

/// Run one processing pass over every schedule due at or before `as_of`.
///
/// At most one pass executes at a time: if another pass already holds the
/// run lock, this call does no processing and returns a record with
/// [RunStatus::Skipped] immediately rather than waiting, so a stuck run can
/// never cause later runs to queue up and fire in a burst.
///
/// Due schedules are processed sequentially in selector order. A failing
/// schedule is recorded and skipped over; only a failure of the due-set
/// query itself aborts the pass (as [RunStatus::Failed]). The lock is
/// released on every exit path.
///
/// # Errors
/// This function will return an error if the run record could not be
/// written, or if the lock could not be acquired because of an SQL error.
pub fn run_once<W: LedgerWriter>(
    db_connection: &Arc<Mutex<Connection>>,
    writer: &mut W,
    as_of: Date,
) -> Result<RunRecord, Error> {
    let started_at = OffsetDateTime::now_utc();
    let run_lock = RunLock::new(db_connection.clone());

    let Some(guard) = run_lock.try_acquire(started_at)? else {
        tracing::warn!("another processing run is in progress, skipping this one");

        let connection = lock_connection(db_connection)?;
        let run_id = record::start_run(started_at, &connection)?;

        return record::finalize_run(
            run_id,
            OffsetDateTime::now_utc(),
            RunStatus::Skipped,
            0,
            &[],
            &connection,
        );
    };

    let run_id = {
        let connection = lock_connection(db_connection)?;
        record::start_run(started_at, &connection)?
    };

    let due = {
        let connection = lock_connection(db_connection)?;
        schedule::select_due(as_of, &connection)
    };

    let run_record = match due {
        Err(error) => {
            tracing::error!("could not query the due set, aborting the run: {error}");

            let connection = lock_connection(db_connection)?;
            record::finalize_run(
                run_id,
                OffsetDateTime::now_utc(),
                RunStatus::Failed,
                0,
                &[],
                &connection,
            )?
        }
        Ok(schedules) => {
            tracing::info!("{} schedule(s) due as of {as_of}", schedules.len());

            let mut processed_count = 0;
            let mut occurrences_posted = 0;
            let mut failed_schedule_ids = Vec::new();

            for mut schedule in schedules {
                let outcome = processor::process(&mut schedule, as_of, writer, db_connection);

                occurrences_posted += outcome.occurrences_posted;

                if outcome.failure.is_none() {
                    processed_count += 1;
                } else {
                    failed_schedule_ids.push(outcome.schedule_id);
                }
            }

            let status = if failed_schedule_ids.is_empty() {
                RunStatus::Success
            } else {
                RunStatus::PartialFailure
            };

            tracing::info!(
                "run finished: {occurrences_posted} occurrence(s) posted, \
                 {processed_count} schedule(s) processed, {} failed",
                failed_schedule_ids.len()
            );

            let connection = lock_connection(db_connection)?;
            record::finalize_run(
                run_id,
                OffsetDateTime::now_utc(),
                status,
                processed_count,
                &failed_schedule_ids,
                &connection,
            )?
        }
    };

    guard.release()?;

    Ok(run_record)
}

fn lock_connection(
    db_connection: &Arc<Mutex<Connection>>,
) -> Result<std::sync::MutexGuard<'_, Connection>, Error> {
    db_connection.lock().map_err(|_| Error::DatabaseLockError)
}

#[cfg(test)]
mod run_once_tests {
    use std::sync::{Arc, Mutex};

    use rusqlite::Connection;
    use time::{Date, OffsetDateTime, macros::date};

    use crate::{
        db::initialize,
        ledger::{SqliteLedgerWriter, get_posted_transactions},
        run::{
            lock::RunLock,
            record::{RunStatus, get_runs_in_range},
        },
        schedule::{
            Direction, Frequency, NewRecurringTransaction, RecurrenceRule, RecurringTransaction,
            ScheduleStatus, TransactionTemplate, create_recurring_transaction,
            get_recurring_transaction,
        },
    };

    use super::run_once;

    fn get_test_db_connection() -> Arc<Mutex<Connection>> {
        let connection = Connection::open_in_memory().unwrap();
        initialize(&connection).expect("Could not initialize database");

        Arc::new(Mutex::new(connection))
    }

    fn weekly_groceries(
        start_date: Date,
        connection: &Arc<Mutex<Connection>>,
    ) -> RecurringTransaction {
        let template =
            TransactionTemplate::new(120.0, Direction::Debit, 1, Some(2), "Groceries").unwrap();
        let rule = RecurrenceRule::new(Frequency::Weekly, 1).unwrap();
        let new = NewRecurringTransaction::new(1, template, rule, start_date).unwrap();

        create_recurring_transaction(new, &connection.lock().unwrap()).unwrap()
    }

    /// Insert a schedule whose amount the ledger will refuse, bypassing the
    /// template validation the way a corrupted row would.
    fn broken_schedule(connection: &Arc<Mutex<Connection>>) -> i64 {
        let connection = connection.lock().unwrap();
        connection
            .execute(
                "INSERT INTO recurring_transaction (
                        owner_id, amount, direction, account_id, category_id, memo,
                        frequency, interval, next_run_at, occurrences_posted, status
                    )
                    VALUES (1, -5.0, 0, 1, NULL, 'Broken', 0, 1, '2024-08-01', 0, 0)",
                (),
            )
            .unwrap();

        connection.last_insert_rowid()
    }

    #[test]
    fn successful_run_processes_all_due_schedules() {
        let db_connection = get_test_db_connection();
        let mut writer = SqliteLedgerWriter::new(db_connection.clone());
        let first = weekly_groceries(date!(2024 - 08 - 01), &db_connection);
        let second = weekly_groceries(date!(2024 - 08 - 05), &db_connection);

        let record = run_once(&db_connection, &mut writer, date!(2024 - 08 - 07)).unwrap();

        assert_eq!(record.status, Some(RunStatus::Success));
        assert_eq!(record.processed_count, 2);
        assert!(record.failed_schedule_ids.is_empty());
        assert!(record.finished_at.is_some());

        let connection = db_connection.lock().unwrap();
        assert_eq!(get_posted_transactions(first.id, &connection).unwrap().len(), 1);
        assert_eq!(get_posted_transactions(second.id, &connection).unwrap().len(), 1);
    }

    #[test]
    fn skips_when_the_lock_is_already_held() {
        let db_connection = get_test_db_connection();
        let mut writer = SqliteLedgerWriter::new(db_connection.clone());
        let schedule = weekly_groceries(date!(2024 - 08 - 01), &db_connection);

        let run_lock = RunLock::new(db_connection.clone());
        let _guard = run_lock
            .try_acquire(OffsetDateTime::now_utc())
            .unwrap()
            .unwrap();

        let record = run_once(&db_connection, &mut writer, date!(2024 - 08 - 07)).unwrap();

        assert_eq!(record.status, Some(RunStatus::Skipped));
        assert_eq!(record.processed_count, 0);

        // The skipped run posted nothing and did not advance the schedule.
        let connection = db_connection.lock().unwrap();
        assert!(get_posted_transactions(schedule.id, &connection).unwrap().is_empty());
        let stored = get_recurring_transaction(schedule.id, &connection).unwrap();
        assert_eq!(stored.next_run_at, Some(date!(2024 - 08 - 01)));
    }

    #[test]
    fn lock_is_released_after_a_run() {
        let db_connection = get_test_db_connection();
        let mut writer = SqliteLedgerWriter::new(db_connection.clone());

        run_once(&db_connection, &mut writer, date!(2024 - 08 - 07)).unwrap();
        let second = run_once(&db_connection, &mut writer, date!(2024 - 08 - 07)).unwrap();

        assert_eq!(second.status, Some(RunStatus::Success));
    }

    #[test]
    fn failing_schedule_does_not_stop_the_others() {
        let db_connection = get_test_db_connection();
        let mut writer = SqliteLedgerWriter::new(db_connection.clone());
        let broken_id = broken_schedule(&db_connection);
        let healthy = weekly_groceries(date!(2024 - 08 - 05), &db_connection);

        let record = run_once(&db_connection, &mut writer, date!(2024 - 08 - 07)).unwrap();

        assert_eq!(record.status, Some(RunStatus::PartialFailure));
        assert_eq!(record.processed_count, 1);
        assert_eq!(record.failed_schedule_ids, vec![broken_id]);

        // The healthy schedule advanced, the broken one stayed due for the
        // next run to retry.
        let connection = db_connection.lock().unwrap();
        let stored_healthy = get_recurring_transaction(healthy.id, &connection).unwrap();
        assert_eq!(stored_healthy.next_run_at, Some(date!(2024 - 08 - 12)));
        let stored_broken = get_recurring_transaction(broken_id, &connection).unwrap();
        assert_eq!(stored_broken.next_run_at, Some(date!(2024 - 08 - 01)));
        assert_eq!(stored_broken.occurrences_posted, 0);
    }

    #[test]
    fn completed_schedules_are_never_selected_again() {
        let db_connection = get_test_db_connection();
        let mut writer = SqliteLedgerWriter::new(db_connection.clone());
        let template =
            TransactionTemplate::new(50.0, Direction::Debit, 1, None, "One-off donation").unwrap();
        let rule = RecurrenceRule::new(Frequency::Monthly, 1)
            .unwrap()
            .occurrence_limit(1);
        let new =
            NewRecurringTransaction::new(1, template, rule, date!(2024 - 08 - 01)).unwrap();
        let schedule =
            create_recurring_transaction(new, &db_connection.lock().unwrap()).unwrap();

        let first = run_once(&db_connection, &mut writer, date!(2024 - 08 - 07)).unwrap();
        assert_eq!(first.processed_count, 1);

        {
            let connection = db_connection.lock().unwrap();
            let stored = get_recurring_transaction(schedule.id, &connection).unwrap();
            assert_eq!(stored.status, ScheduleStatus::Completed);
        }

        let second = run_once(&db_connection, &mut writer, date!(2025 - 08 - 07)).unwrap();
        assert_eq!(second.status, Some(RunStatus::Success));
        assert_eq!(second.processed_count, 0);

        let connection = db_connection.lock().unwrap();
        assert_eq!(
            get_posted_transactions(schedule.id, &connection).unwrap().len(),
            1
        );
    }

    #[test]
    fn every_run_lands_in_the_run_log() {
        let db_connection = get_test_db_connection();
        let mut writer = SqliteLedgerWriter::new(db_connection.clone());

        run_once(&db_connection, &mut writer, date!(2024 - 08 - 07)).unwrap();
        run_once(&db_connection, &mut writer, date!(2024 - 08 - 08)).unwrap();

        let connection = db_connection.lock().unwrap();
        let runs = get_runs_in_range(
            OffsetDateTime::now_utc() - time::Duration::hours(1),
            OffsetDateTime::now_utc() + time::Duration::hours(1),
            &connection,
        )
        .unwrap();

        assert_eq!(runs.len(), 2);
        assert!(runs.iter().all(|run| run.finished_at.is_some()));
    }
}
