//! The periodic trigger that fires one processing run per calendar day.
//!
//! The loop sleeps until the configured local time of day, invokes the run
//! coordinator, and goes back to sleep. Firing late (after a long sleep or a
//! slow previous run) is harmless: the run processes everything due at or
//! before the day it wakes up on, and the run lock makes extra invocations
//! safe.

use std::sync::{Arc, Mutex};

use rusqlite::Connection;
use time::{OffsetDateTime, Time, UtcOffset};
use time_tz::{Offset, TimeZone};

use crate::{Error, ledger::LedgerWriter, run};

/// When and where the daily processing run fires.
#[derive(Debug, Clone)]
pub struct TriggerConfig {
    /// The local time of day the run fires at.
    pub run_at: Time,
    /// The canonical timezone `run_at` is interpreted in, e.g.
    /// "Pacific/Auckland".
    pub timezone: String,
}

/// Parse a 24-hour `HH:MM` string as a time of day.
///
/// # Errors
///
/// Returns [Error::InvalidRunTime] if `value` is not a valid `HH:MM` time.
pub fn parse_run_at(value: &str) -> Result<Time, Error> {
    let parsed = value.split_once(':').and_then(|(hours, minutes)| {
        let hours = hours.parse().ok()?;
        let minutes = minutes.parse().ok()?;

        Time::from_hms(hours, minutes, 0).ok()
    });

    parsed.ok_or_else(|| Error::InvalidRunTime(value.to_string()))
}

/// Get the current UTC offset of a canonical timezone.
///
/// # Errors
///
/// Returns [Error::InvalidTimezoneError] if `canonical_timezone` is not a
/// known timezone name.
pub fn local_offset(canonical_timezone: &str) -> Result<UtcOffset, Error> {
    time_tz::timezones::get_by_name(canonical_timezone)
        .map(|timezone| timezone.get_offset_utc(&OffsetDateTime::now_utc()).to_utc())
        .ok_or_else(|| Error::InvalidTimezoneError(canonical_timezone.to_string()))
}

/// Compute the next instant at or after `now` that falls on `run_at`.
///
/// `now` must carry the offset the trigger is configured for; the result
/// carries the same offset.
pub fn next_fire(now: OffsetDateTime, run_at: Time) -> OffsetDateTime {
    let today = now.replace_time(run_at);

    if today > now {
        today
    } else {
        today + time::Duration::days(1)
    }
}

/// Fire one processing run per day at the configured local time, forever.
///
/// Each run executes on a blocking thread so a shutdown signal racing a run
/// in flight lets the run finish (and release the run lock) before the
/// process exits.
///
/// # Errors
///
/// Returns [Error::InvalidTimezoneError] if the configured timezone is
/// unknown. Failures of individual runs are logged and do not stop the loop.
pub async fn run_scheduler<W>(
    db_connection: Arc<Mutex<Connection>>,
    writer: W,
    config: TriggerConfig,
) -> Result<(), Error>
where
    W: LedgerWriter + Clone + Send + 'static,
{
    loop {
        // Recompute the offset every day so daylight-saving transitions
        // move the fire time with the wall clock.
        let offset = local_offset(&config.timezone)?;
        let now = OffsetDateTime::now_utc().to_offset(offset);
        let fire_at = next_fire(now, config.run_at);

        tracing::info!("next processing run at {fire_at}");
        tokio::time::sleep((fire_at - now).unsigned_abs()).await;

        let as_of = OffsetDateTime::now_utc().to_offset(offset).date();
        let run_db_connection = db_connection.clone();
        let mut run_writer = writer.clone();

        let outcome = tokio::task::spawn_blocking(move || {
            run::run_once(&run_db_connection, &mut run_writer, as_of)
        })
        .await;

        match outcome {
            Ok(Ok(record)) => tracing::info!(
                "run {} finished with status {:?}",
                record.id,
                record.status
            ),
            Ok(Err(error)) => tracing::error!("processing run failed: {error}"),
            Err(error) => tracing::error!("processing run panicked: {error}"),
        }
    }
}
