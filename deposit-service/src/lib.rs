//! Yieldvault Deposit Service
//!
//! Deposit confirmation, referral bonus cascade and the caller-facing desk
//! over the ledger store and accrual engine.
//!
//! # Flow
//!
//! ```text
//! register_user ─▶ submit_deposit ─▶ attest_deposit ─▶ confirm_deposit ─▶ get_miner_status ─▶ withdraw
//!                        │                                  │                                     │
//!                   mining_plan                   deposit + referral_bonus                   withdrawal
//! ```
//!
//! # Guarantees
//!
//! - Confirmation writes its deposit record, every bonus and the pending-deposit
//!   delete in one ledger batch; the position is registered only after it commits
//! - A pending deposit is confirmed at most once
//! - Notifications never block or fail a financial operation

#![forbid(unsafe_code)]
#![warn(
    missing_docs,
    rust_2018_idioms,
    missing_debug_implementations,
    clippy::all
)]

pub mod config;
pub mod confirmation;
pub mod desk;
pub mod error;
pub mod metrics;
pub mod notify;
pub mod referral;
pub mod types;

// Re-exports
pub use config::{Config, NotificationConfig, PlanConfig, ReferralConfig, StartLevelPolicy};
pub use desk::{DepositDesk, DEFAULT_PAGE_LIMIT, MAX_PAGE_LIMIT};
pub use error::{Error, Result};
pub use metrics::ServiceMetrics;
pub use notify::{
    notification_queue, spawn_dispatcher, ChannelNotifier, LogNotifier, Notification,
    NotificationDispatcher, NotificationHandle, NotificationKind, Notifier, NotifyError, Recipient,
};
pub use referral::{BonusPayout, CascadeHalt, CascadeOutcome, ReferralCascade};
pub use types::{Confirmation, DepositRequest, NewUser, WithdrawalReceipt};
