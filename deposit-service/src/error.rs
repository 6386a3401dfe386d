//! Error types for the deposit service
//!
//! Store failures are logged here with full detail and surfaced to callers as
//! a fixed message.

use rust_decimal::Decimal;
use thiserror::Error;

/// Result type for deposit service operations
pub type Result<T> = std::result::Result<T, Error>;

/// Deposit service errors
#[derive(Error, Debug)]
pub enum Error {
    /// Missing user, pending deposit or active position
    #[error("Not found: {0}")]
    NotFound(String),

    /// Attested amount differs from the declared amount
    #[error("Deposit confirmation failed: declared {declared}, confirmed {}", describe(.confirmed))]
    ValidationMismatch {
        /// Amount the user declared
        declared: Decimal,
        /// Amount the operator attested, if any
        confirmed: Option<Decimal>,
    },

    /// Duplicate pending deposit, confirmation in flight, double withdrawal
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Rejected input
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Ledger store failure; the transaction was rolled back
    #[error("Internal storage failure")]
    Store,

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}

fn describe(amount: &Option<Decimal>) -> String {
    match amount {
        Some(amount) => amount.to_string(),
        None => "nothing".to_string(),
    }
}

impl From<ledger_core::Error> for Error {
    fn from(err: ledger_core::Error) -> Self {
        match err {
            ledger_core::Error::NotFound(what) => Error::NotFound(what),
            ledger_core::Error::Conflict(what) => Error::Conflict(what),
            ledger_core::Error::InvalidRecord(what) => Error::InvalidRequest(what),
            ledger_core::Error::Config(what) => Error::Config(what),
            other => {
                tracing::error!(error = %other, "Ledger store failure");
                Error::Store
            }
        }
    }
}

impl From<accrual_engine::Error> for Error {
    fn from(err: accrual_engine::Error) -> Self {
        use accrual_engine::Error as Accrual;

        match err {
            Accrual::NoActivePosition(_) => Error::NotFound(err.to_string()),
            Accrual::AlreadyWithdrawn(_) | Accrual::WithdrawalLocked { .. } => {
                Error::Conflict(err.to_string())
            }
            Accrual::InvalidPlan(what) => Error::InvalidRequest(what),
            Accrual::InvalidConfig(what) => Error::Config(what),
        }
    }
}
