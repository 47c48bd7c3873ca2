//! Recurring-transaction definitions: the domain model, the pure recurrence
//! calculator and the SQLite-backed schedule store.

mod db;
mod models;
mod recurrence;

pub use db::{
    create_recurring_transaction, create_recurring_transaction_table, get_recurring_transaction,
    record_posting, select_due, set_status,
};
pub use models::{
    Direction, DirectionError, Frequency, FrequencyError, NewRecurringTransaction, RecurrenceRule,
    RecurringTransaction, ScheduleId, ScheduleStatus, ScheduleStatusError, TransactionTemplate,
};
pub use recurrence::next_occurrence;
