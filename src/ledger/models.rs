//! Types exchanged with the ledger.

use sha2::{Digest, Sha256};
use time::Date;

use crate::{
    DatabaseID,
    schedule::{Direction, RecurringTransaction, ScheduleId},
};

/// Database identifier for a posted ledger transaction.
pub type LedgerTransactionId = i64;

/// A concrete transaction materialized from a recurring-transaction
/// definition at a specific occurrence date, ready to be posted to the
/// ledger.
///
/// The idempotency key is derived deterministically from the schedule and
/// the occurrence date, so re-submitting the same occurrence (after a crash
/// or a retried run) can never double-post.
#[derive(Clone, Debug, PartialEq)]
pub struct MaterializedTransaction {
    /// The schedule this transaction was materialized from.
    pub schedule_id: ScheduleId,
    /// The occurrence date the transaction was materialized at.
    pub occurrence_date: Date,
    /// The amount of money moved.
    pub amount: f64,
    /// Whether the transaction debits or credits the account.
    pub direction: Direction,
    /// The account the transaction is posted against.
    pub account_id: DatabaseID,
    /// The category the transaction is filed under, if any.
    pub category_id: Option<DatabaseID>,
    /// A text description of what the transaction is for.
    pub memo: String,
    /// Deterministic key identifying this logical occurrence.
    pub idempotency_key: String,
}

impl MaterializedTransaction {
    /// Snapshot `schedule`'s template at `occurrence_date`.
    pub fn from_schedule(schedule: &RecurringTransaction, occurrence_date: Date) -> Self {
        Self {
            schedule_id: schedule.id,
            occurrence_date,
            amount: schedule.template.amount,
            direction: schedule.template.direction,
            account_id: schedule.template.account_id,
            category_id: schedule.template.category_id,
            memo: schedule.template.memo.clone(),
            idempotency_key: idempotency_key(schedule.id, occurrence_date),
        }
    }
}

/// Derive the idempotency key for one occurrence of a schedule.
///
/// The key is a hex-encoded SHA-256 digest of the schedule ID and occurrence
/// date, so the same occurrence always maps to the same key regardless of
/// which run materializes it.
pub fn idempotency_key(schedule_id: ScheduleId, occurrence_date: Date) -> String {
    let digest = Sha256::digest(format!("{schedule_id}:{occurrence_date}"));

    digest.iter().map(|byte| format!("{byte:02x}")).collect()
}

/// The ledger's answer to a posting attempt.
#[derive(Clone, Debug, PartialEq)]
pub enum PostOutcome {
    /// The transaction was durably recorded.
    Accepted(LedgerTransactionId),
    /// A transaction with the same idempotency key already exists. An
    /// earlier (possibly partial) run posted this occurrence; callers should
    /// treat this the same as [PostOutcome::Accepted].
    Duplicate,
    /// The ledger refused the transaction.
    Rejected(String),
}

/// A transaction as recorded in the ledger.
#[derive(Clone, Debug, PartialEq)]
pub struct PostedTransaction {
    /// The ID of the ledger transaction.
    pub id: LedgerTransactionId,
    /// The schedule that produced the transaction.
    pub schedule_id: ScheduleId,
    /// The occurrence date the transaction was materialized at.
    pub occurrence_date: Date,
    /// The amount of money moved.
    pub amount: f64,
    /// Whether the transaction debits or credits the account.
    pub direction: Direction,
    /// The account the transaction was posted against.
    pub account_id: DatabaseID,
    /// The category the transaction is filed under, if any.
    pub category_id: Option<DatabaseID>,
    /// A text description of what the transaction is for.
    pub memo: String,
    /// Deterministic key identifying the logical occurrence.
    pub idempotency_key: String,
}

#[cfg(test)]
mod idempotency_key_tests {
    use time::macros::date;

    use super::idempotency_key;

    #[test]
    fn same_occurrence_always_yields_same_key() {
        let first = idempotency_key(42, date!(2024 - 08 - 07));
        let second = idempotency_key(42, date!(2024 - 08 - 07));

        assert_eq!(first, second);
    }

    #[test]
    fn different_schedules_and_dates_yield_different_keys() {
        let base = idempotency_key(42, date!(2024 - 08 - 07));

        assert_ne!(base, idempotency_key(43, date!(2024 - 08 - 07)));
        assert_ne!(base, idempotency_key(42, date!(2024 - 08 - 08)));
    }

    #[test]
    fn key_is_hex_encoded_sha256() {
        let key = idempotency_key(1, date!(2024 - 01 - 01));

        assert_eq!(key.len(), 64);
        assert!(key.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
