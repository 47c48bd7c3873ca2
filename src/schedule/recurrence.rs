//! Pure calendar arithmetic for recurring-transaction schedules.
//!
//! Nothing in this module touches the database: the next occurrence of a
//! schedule is a function of the rule, the date of the occurrence just
//! posted, and the number of occurrences posted so far. This keeps the
//! calculator deterministic and testable on (rule, date) pairs alone.

use time::{Date, Duration, Month, util::days_in_year_month};

use super::models::{Frequency, RecurrenceRule};

/// Compute the date of the occurrence that follows the one on `from`.
///
/// `posted` is the number of occurrences posted so far, counting the one on
/// `from`. Returns `None` when the schedule is exhausted, either because
/// `posted` has reached the rule's occurrence limit or because the next
/// candidate date falls after the rule's end date. The caller is expected to
/// mark the schedule completed in that case.
///
/// Monthly and yearly schedules anchored to a day of the month clamp to the
/// last day of months that are too short: a rule anchored to day 31 falls on
/// 29 February in a leap year and returns to the 31st in March.
pub fn next_occurrence(rule: &RecurrenceRule, from: Date, posted: u32) -> Option<Date> {
    if rule.occurrence_limit.is_some_and(|limit| posted >= limit) {
        return None;
    }

    let interval = i64::from(rule.interval);

    let candidate = match rule.frequency {
        Frequency::Daily => from.checked_add(Duration::days(interval))?,
        Frequency::Weekly => {
            let date = from.checked_add(Duration::weeks(interval))?;

            match rule.weekday {
                Some(weekday) => align_to_weekday(date, weekday)?,
                None => date,
            }
        }
        Frequency::Monthly => add_months(from, interval, rule.day_of_month)?,
        Frequency::Yearly => add_months(from, interval * 12, rule.day_of_month)?,
    };

    match rule.end_date {
        Some(end_date) if candidate > end_date => None,
        Some(_) | None => Some(candidate),
    }
}

/// Move `date` forward to the next `weekday`, or leave it unchanged if it
/// already falls on one.
///
/// Advancing a date by whole weeks preserves its weekday, so this only does
/// work on the first occurrence of a series whose start date does not fall on
/// the anchor.
fn align_to_weekday(mut date: Date, weekday: time::Weekday) -> Option<Date> {
    while date.weekday() != weekday {
        date = date.next_day()?;
    }

    Some(date)
}

/// Advance `from` by `months` calendar months, landing on `anchor` (or the
/// day of `from` when no anchor is set), clamped to the length of the target
/// month.
fn add_months(from: Date, months: i64, anchor: Option<u8>) -> Option<Date> {
    let month_index = i64::from(from.year()) * 12 + i64::from(u8::from(from.month())) - 1 + months;

    let year = i32::try_from(month_index.div_euclid(12)).ok()?;
    let month = Month::try_from(month_index.rem_euclid(12) as u8 + 1).ok()?;

    let day = anchor
        .unwrap_or_else(|| from.day())
        .min(days_in_year_month(year, month));

    Date::from_calendar_date(year, month, day).ok()
}
