//! Yieldvault Accrual Engine
//!
//! Simulated time-based profit toward a fixed target, with bounded noise.
//!
//! # Architecture
//!
//! - **Position**: pure state machine, driven only by the injected clock and noise source
//! - **Registry**: one slot per user, each with its own lock
//! - **Engine**: ties clock, noise and registry together and exposes status and withdrawal
//!
//! # Invariants
//!
//! - `0 <= current_profit <= target_profit` while active
//! - `current_profit == target_profit` exactly once the duration has elapsed
//! - A position is withdrawn at most once

#![forbid(unsafe_code)]
#![warn(
    missing_docs,
    rust_2018_idioms,
    missing_debug_implementations,
    clippy::all
)]

pub mod clock;
pub mod config;
pub mod engine;
pub mod error;
pub mod position;
pub mod registry;
pub mod volatility;

// Re-exports
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::AccrualConfig;
pub use engine::AccrualEngine;
pub use error::{Error, Result};
pub use position::{
    MinerStatus, MiningPosition, PlanTerms, PositionState, Withdrawal, DEFAULT_DURATION_MS,
    DEFAULT_PERCENT,
};
pub use registry::PositionRegistry;
pub use volatility::{
    FixedVolatility, SeededVolatility, VolatilitySource, DEFAULT_VOLATILITY_BOUND,
};
