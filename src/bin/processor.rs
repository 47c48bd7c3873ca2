use std::{
    fs::OpenOptions,
    sync::{Arc, Mutex},
};

use clap::Parser;
use rusqlite::Connection;
use time::OffsetDateTime;
use tracing_subscriber::{EnvFilter, Layer, filter, layer::SubscriberExt, util::SubscriberInitExt};

use cadence_rs::{
    initialize_db,
    ledger::SqliteLedgerWriter,
    run::run_once,
    scheduler::{TriggerConfig, local_offset, parse_run_at, run_scheduler},
    shutdown_signal,
};

/// The recurring-transaction processor for cadence_rs.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// File path to the application SQLite database.
    #[arg(long)]
    db_path: String,

    /// The canonical timezone the run time is interpreted in.
    #[arg(long, default_value = "Etc/UTC")]
    timezone: String,

    /// The local time of day (24-hour HH:MM) the daily run fires at.
    #[arg(long, default_value = "02:00")]
    run_at: String,

    /// Run a single processing pass for today and exit, instead of running
    /// the daily schedule. Useful under an external cron or systemd timer.
    #[arg(long)]
    once: bool,
}

#[tokio::main]
async fn main() {
    setup_logging();

    let args = Args::parse();

    let run_at = parse_run_at(&args.run_at).expect("Could not parse the run time");

    let connection = Connection::open(&args.db_path).expect("Could not open the database");
    connection
        .busy_timeout(std::time::Duration::from_secs(5))
        .expect("Could not set the database busy timeout");
    initialize_db(&connection).expect("Could not initialize the database");
    let db_connection = Arc::new(Mutex::new(connection));

    let writer = SqliteLedgerWriter::new(db_connection.clone());

    if args.once {
        let offset = local_offset(&args.timezone).expect("Could not resolve the timezone");
        let as_of = OffsetDateTime::now_utc().to_offset(offset).date();

        let record = tokio::task::spawn_blocking({
            let db_connection = db_connection.clone();
            let mut writer = writer.clone();
            move || run_once(&db_connection, &mut writer, as_of)
        })
        .await
        .expect("The processing run panicked")
        .expect("The processing run failed");

        println!(
            "{}",
            serde_json::to_string_pretty(&record).expect("Could not serialize the run record")
        );

        return;
    }

    let config = TriggerConfig {
        run_at,
        timezone: args.timezone,
    };

    tracing::info!(
        "processing runs scheduled daily at {run_at} ({})",
        config.timezone
    );

    tokio::select! {
        result = run_scheduler(db_connection, writer, config) => {
            if let Err(error) = result {
                tracing::error!("the scheduler stopped: {error}");
            }
        },
        _ = shutdown_signal() => {
            tracing::info!("shutting down");
        },
    }
}

fn setup_logging() {
    let stdout_log = tracing_subscriber::fmt::layer().pretty();

    let log_file = OpenOptions::new()
        .create(true)
        .append(true)
        .open("debug.log")
        .expect("Could not create log file");

    let debug_log = tracing_subscriber::fmt::layer()
        .pretty()
        .with_writer(Arc::new(log_file));

    tracing_subscriber::registry()
        .with(
            stdout_log
                .with_filter(
                    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
                )
                .and_then(debug_log)
                .with_filter(filter::LevelFilter::DEBUG),
        )
        .init();
}
