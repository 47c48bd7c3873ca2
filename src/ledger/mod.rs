//! The ledger boundary: the writer trait the processor posts through, the
//! materialized-transaction types, and a SQLite-backed implementation.

mod db;
mod models;
mod writer;

pub use db::{SqliteLedgerWriter, create_ledger_transaction_table, get_posted_transactions};
pub use models::{
    LedgerTransactionId, MaterializedTransaction, PostOutcome, PostedTransaction, idempotency_key,
};
pub use writer::LedgerWriter;
