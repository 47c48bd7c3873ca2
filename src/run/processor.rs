//! The occurrence processor: materializes and posts every due occurrence of
//! a single schedule, catching up on missed periods in order.

use std::sync::Mutex;

use rusqlite::Connection;
use time::Date;

use crate::{
    Error,
    ledger::{LedgerWriter, MaterializedTransaction, PostOutcome},
    schedule::{self, RecurringTransaction, ScheduleId, ScheduleStatus, next_occurrence},
};

/// The result of processing one schedule in a run.
#[derive(Debug, PartialEq)]
pub struct ProcessOutcome {
    /// The schedule that was processed.
    pub schedule_id: ScheduleId,
    /// How many occurrences were posted and persisted during this pass.
    pub occurrences_posted: u32,
    /// The schedule's status when the pass ended.
    pub status: ScheduleStatus,
    /// The failure that stopped the pass, if any. The occurrence that failed
    /// is left due, so the next run retries it.
    pub failure: Option<Error>,
}

/// Post every occurrence of `schedule` that is due at or before `as_of`.
///
/// A schedule that is overdue by several periods (the job did not run for a
/// few days) is caught up one occurrence at a time, oldest first. Each
/// occurrence is independent: it is materialized at its own occurrence date,
/// posted under a deterministic idempotency key, and the schedule state is
/// persisted before the next occurrence is attempted. A `Duplicate` answer
/// from the ledger means an earlier partial run already posted the
/// occurrence and is treated exactly like a fresh acceptance, which makes
/// the whole loop safe to resume after any failure.
///
/// The first failure stops the pass for this schedule without touching its
/// persisted state; the same occurrence is selected again on the next run.
/// Failures never propagate as errors so one bad schedule cannot abort the
/// schedules after it.
pub fn process<W: LedgerWriter>(
    schedule: &mut RecurringTransaction,
    as_of: Date,
    writer: &mut W,
    db_connection: &Mutex<Connection>,
) -> ProcessOutcome {
    let mut occurrences_posted = 0;
    let mut failure = None;

    loop {
        if schedule.status != ScheduleStatus::Active {
            break;
        }

        let Some(occurrence_date) = schedule.next_run_at else {
            break;
        };

        if occurrence_date > as_of {
            break;
        }

        let transaction = MaterializedTransaction::from_schedule(schedule, occurrence_date);

        let outcome = match writer.post(&transaction) {
            Ok(outcome) => outcome,
            Err(error) => {
                failure = Some(error);
                break;
            }
        };

        match outcome {
            PostOutcome::Accepted(_) | PostOutcome::Duplicate => {
                if outcome == PostOutcome::Duplicate {
                    tracing::debug!(
                        "schedule {}: occurrence {occurrence_date} was already in the ledger",
                        schedule.id
                    );
                }

                schedule.occurrences_posted += 1;
                schedule.last_run_at = Some(occurrence_date);

                match next_occurrence(
                    &schedule.rule,
                    occurrence_date,
                    schedule.occurrences_posted,
                ) {
                    Some(next_run_at) => schedule.next_run_at = Some(next_run_at),
                    None => {
                        schedule.next_run_at = None;
                        schedule.status = ScheduleStatus::Completed;
                        tracing::info!("schedule {} has run its course", schedule.id);
                    }
                }

                let persisted = db_connection
                    .lock()
                    .map_err(|_| Error::DatabaseLockError)
                    .and_then(|connection| schedule::record_posting(schedule, &connection));

                occurrences_posted += 1;

                // The ledger holds the occurrence either way; if the state
                // update was lost, the next run re-submits it and the ledger
                // answers Duplicate.
                if let Err(error) = persisted {
                    failure = Some(error);
                    break;
                }
            }
            PostOutcome::Rejected(reason) => {
                failure = Some(Error::LedgerRejected(reason));
                break;
            }
        }
    }

    if let Some(error) = &failure {
        tracing::warn!(
            "schedule {}: stopped after {occurrences_posted} occurrence(s): {error}",
            schedule.id
        );
    }

    ProcessOutcome {
        schedule_id: schedule.id,
        occurrences_posted,
        status: schedule.status,
        failure,
    }
}

#[cfg(test)]
mod process_tests {
    use std::{
        collections::VecDeque,
        sync::{Arc, Mutex},
    };

    use rusqlite::Connection;
    use time::{Date, macros::date};

    use crate::{
        Error,
        ledger::{
            LedgerWriter, MaterializedTransaction, PostOutcome, SqliteLedgerWriter,
            create_ledger_transaction_table, get_posted_transactions,
        },
        schedule::{
            Direction, Frequency, NewRecurringTransaction, RecurrenceRule, RecurringTransaction,
            ScheduleStatus, TransactionTemplate, create_recurring_transaction,
            create_recurring_transaction_table, get_recurring_transaction,
        },
    };

    use super::process;

    /// A ledger writer that answers from a script, for exercising failure
    /// paths without a database.
    struct ScriptedWriter {
        outcomes: VecDeque<Result<PostOutcome, Error>>,
        posted: Vec<MaterializedTransaction>,
    }

    impl ScriptedWriter {
        fn new(outcomes: impl IntoIterator<Item = Result<PostOutcome, Error>>) -> Self {
            Self {
                outcomes: outcomes.into_iter().collect(),
                posted: Vec::new(),
            }
        }
    }

    impl LedgerWriter for ScriptedWriter {
        fn post(&mut self, transaction: &MaterializedTransaction) -> Result<PostOutcome, Error> {
            self.posted.push(transaction.clone());
            self.outcomes
                .pop_front()
                .unwrap_or(Ok(PostOutcome::Accepted(1)))
        }
    }

    fn get_test_db_connection() -> Arc<Mutex<Connection>> {
        let connection = Connection::open_in_memory().unwrap();
        create_recurring_transaction_table(&connection).unwrap();
        create_ledger_transaction_table(&connection).unwrap();

        Arc::new(Mutex::new(connection))
    }

    fn monthly_on_31st(
        start_date: Date,
        connection: &Arc<Mutex<Connection>>,
    ) -> RecurringTransaction {
        let template =
            TransactionTemplate::new(1800.0, Direction::Debit, 1, Some(4), "Mortgage").unwrap();
        let rule = RecurrenceRule::new(Frequency::Monthly, 1)
            .unwrap()
            .day_of_month(31)
            .unwrap();
        let new = NewRecurringTransaction::new(1, template, rule, start_date).unwrap();

        create_recurring_transaction(new, &connection.lock().unwrap()).unwrap()
    }

    #[test]
    fn posts_a_single_due_occurrence_and_advances_the_schedule() {
        let db_connection = get_test_db_connection();
        let mut writer = SqliteLedgerWriter::new(db_connection.clone());
        let mut schedule = monthly_on_31st(date!(2024 - 01 - 31), &db_connection);

        let outcome = process(&mut schedule, date!(2024 - 02 - 05), &mut writer, &db_connection);

        assert_eq!(outcome.occurrences_posted, 1);
        assert_eq!(outcome.failure, None);
        assert_eq!(schedule.last_run_at, Some(date!(2024 - 01 - 31)));
        assert_eq!(schedule.next_run_at, Some(date!(2024 - 02 - 29)));
        assert_eq!(schedule.occurrences_posted, 1);

        // The persisted state matches the in-memory state.
        let stored =
            get_recurring_transaction(schedule.id, &db_connection.lock().unwrap()).unwrap();
        assert_eq!(stored, schedule);
    }

    #[test]
    fn catches_up_every_missed_occurrence_in_order() {
        let db_connection = get_test_db_connection();
        let mut writer = SqliteLedgerWriter::new(db_connection.clone());
        let mut schedule = monthly_on_31st(date!(2024 - 01 - 31), &db_connection);

        let outcome = process(&mut schedule, date!(2024 - 04 - 15), &mut writer, &db_connection);

        assert_eq!(outcome.occurrences_posted, 3);
        assert_eq!(outcome.failure, None);

        let posted =
            get_posted_transactions(schedule.id, &db_connection.lock().unwrap()).unwrap();
        let posted_dates: Vec<_> = posted
            .iter()
            .map(|transaction| transaction.occurrence_date)
            .collect();
        assert_eq!(
            posted_dates,
            vec![
                date!(2024 - 01 - 31),
                date!(2024 - 02 - 29),
                date!(2024 - 03 - 31),
            ]
        );

        // April's candidate falls after the processing date, so it stays due.
        assert_eq!(schedule.next_run_at, Some(date!(2024 - 04 - 30)));
        assert_eq!(schedule.occurrences_posted, 3);
    }

    #[test]
    fn reprocessing_a_stale_snapshot_does_not_double_post() {
        let db_connection = get_test_db_connection();
        let mut writer = SqliteLedgerWriter::new(db_connection.clone());
        let schedule = monthly_on_31st(date!(2024 - 01 - 31), &db_connection);
        let as_of = date!(2024 - 04 - 15);

        let mut first_pass = schedule.clone();
        process(&mut first_pass, as_of, &mut writer, &db_connection);

        // Simulate a retried run that read the schedule before the first
        // pass persisted its advancement.
        let mut stale = schedule.clone();
        let outcome = process(&mut stale, as_of, &mut writer, &db_connection);

        assert_eq!(outcome.failure, None);
        assert_eq!(stale, first_pass);

        let posted =
            get_posted_transactions(schedule.id, &db_connection.lock().unwrap()).unwrap();
        assert_eq!(
            posted.len(),
            3,
            "each occurrence must appear in the ledger exactly once"
        );
    }

    #[test]
    fn rejection_stops_the_pass_without_advancing_past_it() {
        let db_connection = get_test_db_connection();
        let mut schedule = monthly_on_31st(date!(2024 - 01 - 31), &db_connection);
        let mut writer = ScriptedWriter::new([
            Ok(PostOutcome::Accepted(1)),
            Ok(PostOutcome::Rejected("account is closed".to_string())),
        ]);

        let outcome = process(&mut schedule, date!(2024 - 04 - 15), &mut writer, &db_connection);

        assert_eq!(outcome.occurrences_posted, 1);
        assert_eq!(
            outcome.failure,
            Some(Error::LedgerRejected("account is closed".to_string()))
        );

        // Only the first occurrence advanced; the rejected one is still due.
        assert_eq!(schedule.last_run_at, Some(date!(2024 - 01 - 31)));
        assert_eq!(schedule.next_run_at, Some(date!(2024 - 02 - 29)));

        let stored =
            get_recurring_transaction(schedule.id, &db_connection.lock().unwrap()).unwrap();
        assert_eq!(stored.next_run_at, Some(date!(2024 - 02 - 29)));
        assert_eq!(stored.occurrences_posted, 1);
    }

    #[test]
    fn timeout_is_reported_and_leaves_state_unchanged() {
        let db_connection = get_test_db_connection();
        let mut schedule = monthly_on_31st(date!(2024 - 01 - 31), &db_connection);
        let mut writer = ScriptedWriter::new([Err(Error::LedgerTimeout)]);

        let outcome = process(&mut schedule, date!(2024 - 02 - 05), &mut writer, &db_connection);

        assert_eq!(outcome.occurrences_posted, 0);
        assert_eq!(outcome.failure, Some(Error::LedgerTimeout));
        assert_eq!(schedule.occurrences_posted, 0);
        assert_eq!(schedule.next_run_at, Some(date!(2024 - 01 - 31)));
        assert_eq!(schedule.last_run_at, None);
    }

    #[test]
    fn duplicate_answers_advance_the_schedule_like_acceptances() {
        let db_connection = get_test_db_connection();
        let mut schedule = monthly_on_31st(date!(2024 - 01 - 31), &db_connection);
        let mut writer = ScriptedWriter::new([Ok(PostOutcome::Duplicate)]);

        let outcome = process(&mut schedule, date!(2024 - 02 - 05), &mut writer, &db_connection);

        assert_eq!(outcome.occurrences_posted, 1);
        assert_eq!(outcome.failure, None);
        assert_eq!(schedule.last_run_at, Some(date!(2024 - 01 - 31)));
        assert_eq!(schedule.next_run_at, Some(date!(2024 - 02 - 29)));
    }

    #[test]
    fn completes_the_schedule_when_the_occurrence_limit_is_reached() {
        let db_connection = get_test_db_connection();
        let mut writer = SqliteLedgerWriter::new(db_connection.clone());
        let template =
            TransactionTemplate::new(300.0, Direction::Credit, 1, None, "Tax refund").unwrap();
        let rule = RecurrenceRule::new(Frequency::Monthly, 1)
            .unwrap()
            .occurrence_limit(1);
        let new =
            NewRecurringTransaction::new(1, template, rule, date!(2024 - 08 - 01)).unwrap();
        let mut schedule =
            create_recurring_transaction(new, &db_connection.lock().unwrap()).unwrap();

        let outcome = process(&mut schedule, date!(2024 - 08 - 07), &mut writer, &db_connection);

        assert_eq!(outcome.occurrences_posted, 1);
        assert_eq!(outcome.status, ScheduleStatus::Completed);
        assert_eq!(schedule.next_run_at, None);

        let stored =
            get_recurring_transaction(schedule.id, &db_connection.lock().unwrap()).unwrap();
        assert_eq!(stored.status, ScheduleStatus::Completed);
        assert_eq!(stored.next_run_at, None);
    }

    #[test]
    fn paused_schedules_are_left_untouched() {
        let db_connection = get_test_db_connection();
        let mut writer = ScriptedWriter::new([]);
        let mut schedule = monthly_on_31st(date!(2024 - 01 - 31), &db_connection);
        schedule.status = ScheduleStatus::Paused;

        let outcome = process(&mut schedule, date!(2024 - 04 - 15), &mut writer, &db_connection);

        assert_eq!(outcome.occurrences_posted, 0);
        assert_eq!(outcome.failure, None);
        assert!(writer.posted.is_empty());
    }
}
