//! Core domain types for recurring-transaction definitions.

use serde::{Deserialize, Serialize};
use time::{Date, Weekday};

use crate::{DatabaseID, Error};

/// Database identifier for a recurring transaction.
pub type ScheduleId = i64;

/// The error returned when an integer is not a valid frequency code.
#[derive(Debug, thiserror::Error)]
#[error("{0} is not a valid frequency code")]
pub struct FrequencyError(pub i64);

/// The error returned when an integer is not a valid direction code.
#[derive(Debug, thiserror::Error)]
#[error("{0} is not a valid direction code")]
pub struct DirectionError(pub i64);

/// The error returned when an integer is not a valid schedule status code.
#[derive(Debug, thiserror::Error)]
#[error("{0} is not a valid schedule status code")]
pub struct ScheduleStatusError(pub i64);

/// How often a recurring transaction happens.
///
/// Combined with [RecurrenceRule::interval], these four kinds cover the
/// common cadences: fortnightly is weekly with an interval of 2, quarterly is
/// monthly with an interval of 3.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Frequency {
    /// Every `interval` days.
    Daily,
    /// Every `interval` weeks.
    Weekly,
    /// Every `interval` calendar months of variable length.
    Monthly,
    /// Every `interval` years.
    Yearly,
}

impl TryFrom<i64> for Frequency {
    type Error = FrequencyError;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Frequency::Daily),
            1 => Ok(Frequency::Weekly),
            2 => Ok(Frequency::Monthly),
            3 => Ok(Frequency::Yearly),
            _ => Err(FrequencyError(value)),
        }
    }
}

impl Frequency {
    /// The integer code the frequency is stored as in the database.
    pub fn as_i64(&self) -> i64 {
        match self {
            Frequency::Daily => 0,
            Frequency::Weekly => 1,
            Frequency::Monthly => 2,
            Frequency::Yearly => 3,
        }
    }
}

/// Whether a transaction takes money out of an account or puts money in.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    /// Money leaving the account (e.g., rent, a phone bill).
    Debit,
    /// Money entering the account (e.g., wages).
    Credit,
}

impl TryFrom<i64> for Direction {
    type Error = DirectionError;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Direction::Debit),
            1 => Ok(Direction::Credit),
            _ => Err(DirectionError(value)),
        }
    }
}

impl Direction {
    /// The integer code the direction is stored as in the database.
    pub fn as_i64(&self) -> i64 {
        match self {
            Direction::Debit => 0,
            Direction::Credit => 1,
        }
    }
}

/// The lifecycle state of a recurring transaction.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScheduleStatus {
    /// The schedule is live and eligible for processing.
    Active,
    /// The owner suspended the schedule; it is skipped until resumed.
    Paused,
    /// The schedule ran out of occurrences (end date or occurrence limit).
    /// Terminal.
    Completed,
    /// The owner cancelled the schedule. Terminal.
    Cancelled,
}

impl TryFrom<i64> for ScheduleStatus {
    type Error = ScheduleStatusError;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(ScheduleStatus::Active),
            1 => Ok(ScheduleStatus::Paused),
            2 => Ok(ScheduleStatus::Completed),
            3 => Ok(ScheduleStatus::Cancelled),
            _ => Err(ScheduleStatusError(value)),
        }
    }
}

impl ScheduleStatus {
    /// The integer code the status is stored as in the database.
    pub fn as_i64(&self) -> i64 {
        match self {
            ScheduleStatus::Active => 0,
            ScheduleStatus::Paused => 1,
            ScheduleStatus::Completed => 2,
            ScheduleStatus::Cancelled => 3,
        }
    }
}

/// Describes when a recurring transaction happens and when it stops.
#[derive(Clone, Debug, PartialEq)]
pub struct RecurrenceRule {
    /// The base cadence of the schedule.
    pub frequency: Frequency,
    /// Multiplier on the base cadence, at least 1.
    pub interval: u32,
    /// Day of the month the occurrence is anchored to, for monthly and
    /// yearly schedules. Months shorter than the anchor clamp to their last
    /// day without losing the anchor.
    pub day_of_month: Option<u8>,
    /// Day of the week the occurrence is anchored to, for weekly schedules.
    pub weekday: Option<Weekday>,
    /// The last date (inclusive) on which an occurrence may fall.
    pub end_date: Option<Date>,
    /// The maximum number of occurrences to post over the schedule's life.
    pub occurrence_limit: Option<u32>,
}

impl RecurrenceRule {
    /// Create a rule that repeats every `interval` units of `frequency`,
    /// with no anchors and no end.
    ///
    /// # Errors
    ///
    /// Returns [Error::InvalidRule] if `interval` is zero.
    pub fn new(frequency: Frequency, interval: u32) -> Result<Self, Error> {
        if interval == 0 {
            return Err(Error::InvalidRule(
                "the interval must be at least 1".to_string(),
            ));
        }

        Ok(Self {
            frequency,
            interval,
            day_of_month: None,
            weekday: None,
            end_date: None,
            occurrence_limit: None,
        })
    }

    /// Anchor the rule to a day of the month.
    ///
    /// # Errors
    ///
    /// Returns [Error::InvalidRule] if `day` is not in `1..=31`.
    pub fn day_of_month(mut self, day: u8) -> Result<Self, Error> {
        if !(1..=31).contains(&day) {
            return Err(Error::InvalidRule(format!(
                "{day} is not a valid day of the month"
            )));
        }

        self.day_of_month = Some(day);
        Ok(self)
    }

    /// Anchor the rule to a day of the week.
    pub fn weekday(mut self, weekday: Weekday) -> Self {
        self.weekday = Some(weekday);
        self
    }

    /// Stop the schedule after `end_date` (inclusive).
    pub fn end_date(mut self, end_date: Date) -> Self {
        self.end_date = Some(end_date);
        self
    }

    /// Stop the schedule after `limit` occurrences have been posted.
    pub fn occurrence_limit(mut self, limit: u32) -> Self {
        self.occurrence_limit = Some(limit);
        self
    }
}

/// The fields copied onto every ledger transaction materialized from a
/// schedule.
#[derive(Clone, Debug, PartialEq)]
pub struct TransactionTemplate {
    /// The amount of money moved by each occurrence. Always positive; the
    /// sign is carried by `direction`.
    pub amount: f64,
    /// Whether each occurrence debits or credits the account.
    pub direction: Direction,
    /// The account the transaction is posted against.
    pub account_id: DatabaseID,
    /// The category the transaction is filed under, if any.
    pub category_id: Option<DatabaseID>,
    /// A text description of what the transaction is for.
    pub memo: String,
}

impl TransactionTemplate {
    /// Create a template.
    ///
    /// # Errors
    ///
    /// Returns [Error::InvalidTemplate] if `amount` is not finite or not
    /// greater than zero.
    pub fn new(
        amount: f64,
        direction: Direction,
        account_id: DatabaseID,
        category_id: Option<DatabaseID>,
        memo: &str,
    ) -> Result<Self, Error> {
        if !amount.is_finite() || amount <= 0.0 {
            return Err(Error::InvalidTemplate(format!(
                "the amount must be a positive number, got {amount}"
            )));
        }

        Ok(Self {
            amount,
            direction,
            account_id,
            category_id,
            memo: memo.to_string(),
        })
    }
}

/// A transaction (income or expense) that repeats on a regular basis (e.g.,
/// wages, phone bill), along with its processing state.
///
/// `next_run_at`, `last_run_at`, `occurrences_posted` and `status` are only
/// advanced by the occurrence processor after a confirmed posting.
#[derive(Clone, Debug, PartialEq)]
pub struct RecurringTransaction {
    /// The ID of the recurring transaction.
    pub id: ScheduleId,
    /// The user that owns the recurring transaction.
    pub owner_id: DatabaseID,
    /// The fields copied onto each materialized transaction.
    pub template: TransactionTemplate,
    /// When and how often the transaction repeats.
    pub rule: RecurrenceRule,
    /// The date of the next occurrence due. `None` only when the schedule is
    /// in a terminal state.
    pub next_run_at: Option<Date>,
    /// The date of the last occurrence successfully posted.
    pub last_run_at: Option<Date>,
    /// How many occurrences have been posted over the schedule's life.
    /// Never decreases.
    pub occurrences_posted: u32,
    /// The lifecycle state of the schedule.
    pub status: ScheduleStatus,
}

/// A recurring transaction that has not been inserted into the database yet.
#[derive(Clone, Debug, PartialEq)]
pub struct NewRecurringTransaction {
    pub(crate) owner_id: DatabaseID,
    pub(crate) template: TransactionTemplate,
    pub(crate) rule: RecurrenceRule,
    pub(crate) start_date: Date,
}

impl NewRecurringTransaction {
    /// Create a recurring transaction whose first occurrence falls on
    /// `start_date`.
    ///
    /// # Errors
    ///
    /// Returns [Error::InvalidRule] if the rule's end date is before or on
    /// `start_date`, which would leave the schedule with no occurrences.
    pub fn new(
        owner_id: DatabaseID,
        template: TransactionTemplate,
        rule: RecurrenceRule,
        start_date: Date,
    ) -> Result<Self, Error> {
        match rule.end_date {
            Some(end_date) if end_date <= start_date => Err(Error::InvalidRule(format!(
                "the end date {end_date} is before the start date {start_date}"
            ))),
            Some(_) | None => Ok(Self {
                owner_id,
                template,
                rule,
                start_date,
            }),
        }
    }
}
