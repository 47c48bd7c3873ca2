//! Defines the ledger writer trait.

use crate::Error;

use super::models::{MaterializedTransaction, PostOutcome};

/// Durably records materialized transactions in the user's ledger.
///
/// Implementers must treat identical idempotency keys as the same logical
/// occurrence: posting a transaction whose key already exists must return
/// [PostOutcome::Duplicate](super::PostOutcome::Duplicate) rather than
/// recording it twice.
pub trait LedgerWriter {
    /// Post a materialized transaction to the ledger.
    ///
    /// # Errors
    ///
    /// Returns [Error::LedgerTimeout] if the ledger did not answer within
    /// the allowed time, or [Error::SqlError] for unexpected storage errors.
    /// Refusals are reported in-band as
    /// [PostOutcome::Rejected](super::PostOutcome::Rejected).
    fn post(&mut self, transaction: &MaterializedTransaction) -> Result<PostOutcome, Error>;
}
