use std::error::Error;
use std::path::Path;
use std::process::exit;

use clap::Parser;
use rusqlite::Connection;
use time::{OffsetDateTime, Weekday};

use cadence_rs::{
    initialize_db,
    schedule::{
        Direction, Frequency, NewRecurringTransaction, RecurrenceRule, TransactionTemplate,
        create_recurring_transaction,
    },
};

/// A utility for creating a test database for the recurring-transaction
/// processor of cadence_rs.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// File path to save the SQLite database to.
    #[arg(long, short)]
    output_path: String,
}

/// Create and populate a database for manual testing.
fn main() -> Result<(), Box<dyn Error>> {
    let args = Args::parse();

    let output_path = Path::new(&args.output_path);

    match output_path.extension() {
        None => {
            eprintln!("Output path must include a file extension (e.g., 'my_database.db').");
            exit(1);
        }
        Some(extension) if extension.is_empty() => {
            eprintln!("Output path must include a file extension (e.g., 'my_database.db').");
            exit(1);
        }
        _ => {}
    }

    if output_path.is_file() {
        eprintln!("File already exists at {output_path:#?}!");
        exit(1);
    }

    println!("Creating database at {output_path:#?}");
    let conn = Connection::open(output_path)?;

    initialize_db(&conn)?;

    println!("Creating test schedules...");

    // Backdated start dates so the first processing run has something to
    // catch up on.
    let last_month = OffsetDateTime::now_utc().date() - time::Duration::days(31);

    let rent = NewRecurringTransaction::new(
        1,
        TransactionTemplate::new(450.0, Direction::Debit, 1, Some(1), "Rent")?,
        RecurrenceRule::new(Frequency::Monthly, 1)?.day_of_month(1)?,
        last_month.replace_day(1)?,
    )?;
    create_recurring_transaction(rent, &conn)?;

    let salary = NewRecurringTransaction::new(
        1,
        TransactionTemplate::new(4200.0, Direction::Credit, 1, Some(2), "Salary")?,
        RecurrenceRule::new(Frequency::Monthly, 1)?.day_of_month(31)?,
        last_month.replace_day(1)?,
    )?;
    create_recurring_transaction(salary, &conn)?;

    let gym = NewRecurringTransaction::new(
        1,
        TransactionTemplate::new(17.50, Direction::Debit, 2, Some(3), "Gym membership")?,
        RecurrenceRule::new(Frequency::Weekly, 1)?.weekday(Weekday::Monday),
        last_month,
    )?;
    create_recurring_transaction(gym, &conn)?;

    println!("Success!");

    Ok(())
}
