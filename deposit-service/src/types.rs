//! Request and response types for the deposit desk

use crate::referral::{BonusPayout, CascadeHalt};
use chrono::{DateTime, Utc};
use ledger_core::UserId;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Registration request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewUser {
    /// Desired username (case-insensitive)
    pub username: String,
    /// Contact address
    pub email: String,
    /// Display name
    #[serde(default)]
    pub full_name: Option<String>,
    /// Username of the referring account
    #[serde(default)]
    pub referrer: Option<String>,
}

impl NewUser {
    /// Request with no display name or referrer
    pub fn new(username: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            email: email.into(),
            full_name: None,
            referrer: None,
        }
    }

    /// Set the referrer
    pub fn referred_by(mut self, referrer: impl Into<String>) -> Self {
        self.referrer = Some(referrer.into());
        self
    }

    /// Set the display name
    pub fn with_full_name(mut self, full_name: impl Into<String>) -> Self {
        self.full_name = Some(full_name.into());
        self
    }
}

/// Deposit submission
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DepositRequest {
    /// Declared amount
    pub amount: Decimal,
    /// Proposed profit target as a fraction; plan default when absent
    #[serde(default)]
    pub proposed_percent: Option<Decimal>,
    /// Proposed duration in ms; plan default when absent
    #[serde(default)]
    pub proposed_duration_ms: Option<u64>,
}

impl DepositRequest {
    /// Request using the plan defaults
    pub fn new(amount: Decimal) -> Self {
        Self {
            amount,
            proposed_percent: None,
            proposed_duration_ms: None,
        }
    }

    /// Propose a percent
    pub fn with_percent(mut self, percent: Decimal) -> Self {
        self.proposed_percent = Some(percent);
        self
    }

    /// Propose a duration
    pub fn with_duration_ms(mut self, duration_ms: u64) -> Self {
        self.proposed_duration_ms = Some(duration_ms);
        self
    }
}

/// Successful confirmation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Confirmation {
    /// Depositing user
    pub user_id: UserId,
    /// Confirmed amount
    pub amount: Decimal,
    /// Reference on the `deposit` record
    pub reference: String,
    /// Bonuses paid up the referral chain
    pub bonuses: Vec<BonusPayout>,
    /// Why the cascade stopped
    pub cascade_halt: CascadeHalt,
    /// Profit owed at completion
    pub target_profit: Decimal,
    /// Accrual duration in milliseconds
    pub duration_ms: u64,
}

/// Successful withdrawal
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WithdrawalReceipt {
    /// Account paid
    pub user_id: UserId,
    /// Principal plus profit
    pub amount: Decimal,
    /// Profit component
    pub profit: Decimal,
    /// Whether the plan had completed
    pub profit_complete: bool,
    /// Reference on the `withdrawal` record
    pub reference: String,
    /// Withdrawal instant
    pub withdrawn_at: DateTime<Utc>,
}
