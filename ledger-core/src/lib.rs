//! Yieldvault Ledger Core
//!
//! Durable record of users, pending deposits and an append-only transaction log.
//!
//! # Architecture
//!
//! - **Write batches**: every multi-step write is one [`LedgerBatch`], applied all-or-nothing
//! - **Single writer**: commits are serialized so preconditions cannot race
//! - **Backends**: [`RocksLedger`] for persistence, [`MemoryLedger`] for tests and embedding
//!
//! # Invariants
//!
//! - Append-only: transaction records are never modified or deleted
//! - At most one pending deposit per user
//! - Usernames are unique; referral levels never decrease

#![forbid(unsafe_code)]
#![warn(
    missing_docs,
    rust_2018_idioms,
    missing_debug_implementations,
    clippy::all
)]

pub mod config;
pub mod error;
pub mod memory;
pub mod storage;
pub mod store;
pub mod types;

// Re-exports
pub use config::Config;
pub use error::{Error, Result};
pub use memory::MemoryLedger;
pub use storage::RocksLedger;
pub use store::{run_atomic, BatchOp, LedgerBatch, LedgerStore};
pub use types::{
    new_reference, PendingDeposit, TransactionPage, TransactionRecord, TransactionType, User,
    UserId, Username,
};
