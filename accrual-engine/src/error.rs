//! Error types for the accrual engine

use ledger_core::UserId;
use thiserror::Error;

/// Accrual engine error
#[derive(Debug, Error)]
pub enum Error {
    /// No position is registered for the user
    #[error("No active mining plan found for user {0}")]
    NoActivePosition(UserId),

    /// The position was already paid out
    #[error("Mining plan for user {0} was already withdrawn")]
    AlreadyWithdrawn(UserId),

    /// Withdrawal attempted before the plan completed while completion is required
    #[error("Mining plan for user {user_id} completes in {remaining_minutes} minutes")]
    WithdrawalLocked {
        /// Position owner
        user_id: UserId,
        /// Minutes until completion, rounded up
        remaining_minutes: u64,
    },

    /// Plan terms rejected
    #[error("Invalid plan: {0}")]
    InvalidPlan(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Result type
pub type Result<T> = std::result::Result<T, Error>;
