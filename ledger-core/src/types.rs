//! Core types for the ledger
//!
//! All types are designed for:
//! - Deterministic serialization (bincode)
//! - Exact arithmetic (Decimal for money)

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use uuid::Uuid;

/// Opaque user identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UserId(Uuid);

impl UserId {
    /// Generate a fresh identifier
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Wrap an existing UUID
    pub fn from_uuid(id: Uuid) -> Self {
        Self(id)
    }

    /// Raw UUID
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }

    /// Key bytes for storage
    pub fn as_bytes(&self) -> &[u8; 16] {
        self.0.as_bytes()
    }
}

impl Default for UserId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Username, normalized to trimmed lowercase
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Username(String);

impl Username {
    /// Create a normalized username
    pub fn new(name: impl AsRef<str>) -> Self {
        Self(name.as_ref().trim().to_lowercase())
    }

    /// Get as string
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// True when the normalized name is empty
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for Username {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Registered user and its edge in the referral graph
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    /// User ID
    pub user_id: UserId,

    /// Unique username
    pub username: Username,

    /// Contact address for notifications
    pub email: String,

    /// Display name
    pub full_name: Option<String>,

    /// Username of the user who referred this one
    pub referrer: Option<Username>,

    /// Bonus levels this user has already generated for its upward chain.
    /// Never decreases.
    pub referral_level: u32,

    /// Registration timestamp
    pub created_at: DateTime<Utc>,
}

impl User {
    /// Create a new user with no referral progress
    pub fn new(username: Username, email: impl Into<String>, referrer: Option<Username>) -> Self {
        Self {
            user_id: UserId::new(),
            username,
            email: email.into().trim().to_lowercase(),
            full_name: None,
            referrer,
            referral_level: 0,
            created_at: Utc::now(),
        }
    }

    /// Set display name
    pub fn with_full_name(mut self, full_name: impl Into<String>) -> Self {
        self.full_name = Some(full_name.into());
        self
    }

    /// Name used in notifications
    pub fn display_name(&self) -> &str {
        self.full_name.as_deref().unwrap_or(self.username.as_str())
    }
}

/// Deposit awaiting operator confirmation. At most one per user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingDeposit {
    /// Identifies this submission. Attestation and confirmation target it.
    pub deposit_id: Uuid,

    /// Depositing user
    pub user_id: UserId,

    /// Amount the user declared
    pub deposit_amount: Decimal,

    /// Profit target as a fraction of the deposit (0.04 = 4%)
    pub proposed_percent: Decimal,

    /// Accrual duration in milliseconds
    pub proposed_duration_ms: u64,

    /// Amount attested by the operator, if any
    pub confirmed_amount: Option<Decimal>,

    /// Submission timestamp
    pub submitted_at: DateTime<Utc>,
}

impl PendingDeposit {
    /// Create a pending deposit with no attested amount
    pub fn new(
        user_id: UserId,
        deposit_amount: Decimal,
        proposed_percent: Decimal,
        proposed_duration_ms: u64,
    ) -> Self {
        Self {
            deposit_id: Uuid::now_v7(),
            user_id,
            deposit_amount,
            proposed_percent,
            proposed_duration_ms,
            confirmed_amount: None,
            submitted_at: Utc::now(),
        }
    }

    /// True when the attested amount equals the declared amount
    pub fn is_confirmed(&self) -> bool {
        self.confirmed_amount == Some(self.deposit_amount)
    }

    /// Human-readable plan, e.g. "4% after 1 hours"
    pub fn plan_description(&self) -> String {
        let percent = (self.proposed_percent * Decimal::ONE_HUNDRED).normalize();
        let hours = (Decimal::from(self.proposed_duration_ms) / Decimal::from(3_600_000u64))
            .round_dp(2)
            .normalize();
        format!("{}% after {} hours", percent, hours)
    }
}

/// Transaction log entry kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionType {
    /// Confirmed deposit
    Deposit,
    /// Submitted mining plan
    MiningPlan,
    /// Bonus credited to an ancestor in the referral chain
    ReferralBonus,
    /// Payout of principal plus profit
    Withdrawal,
}

impl TransactionType {
    /// Wire name
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionType::Deposit => "deposit",
            TransactionType::MiningPlan => "mining_plan",
            TransactionType::ReferralBonus => "referral_bonus",
            TransactionType::Withdrawal => "withdrawal",
        }
    }
}

impl fmt::Display for TransactionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immutable, append-only transaction log entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionRecord {
    /// Record ID (UUIDv7 for time-ordering)
    pub id: Uuid,

    /// Account the record belongs to
    pub user_id: UserId,

    /// Kind of transaction
    pub kind: TransactionType,

    /// Amount (exact decimal)
    pub amount: Decimal,

    /// Description shown in history
    pub description: String,

    /// Opaque external reference
    pub reference: Option<String>,

    /// Additional metadata
    #[serde(default)]
    pub metadata: HashMap<String, String>,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,
}

impl TransactionRecord {
    /// Create a record
    pub fn new(
        user_id: UserId,
        kind: TransactionType,
        amount: Decimal,
        description: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::now_v7(),
            user_id,
            kind,
            amount,
            description: description.into(),
            reference: None,
            metadata: HashMap::new(),
            created_at: Utc::now(),
        }
    }

    /// Attach an external reference
    pub fn with_reference(mut self, reference: impl Into<String>) -> Self {
        self.reference = Some(reference.into());
        self
    }

    /// Attach a metadata entry
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.metadata.insert(key.into(), value.to_string());
        self
    }

    /// Check record invariants
    pub fn validate(&self) -> crate::Result<()> {
        if self.amount.is_sign_negative() {
            return Err(crate::Error::InvalidRecord(format!(
                "{} amount must not be negative: {}",
                self.kind, self.amount
            )));
        }
        Ok(())
    }
}

/// Generate an opaque reference such as `dep_3f2a...`
pub fn new_reference(prefix: &str) -> String {
    format!("{}_{}", prefix, Uuid::new_v4().simple())
}

/// One page of a user's transaction history, newest first
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionPage {
    /// Records on this page
    pub records: Vec<TransactionRecord>,

    /// 1-based page number
    pub page: u32,

    /// Page size
    pub limit: u32,

    /// Total records for the user
    pub total: u64,

    /// Total number of pages
    pub pages: u64,
}

impl TransactionPage {
    /// Slice a newest-first history into a page
    pub fn from_history(history: Vec<TransactionRecord>, page: u32, limit: u32) -> Self {
        let page = page.max(1);
        let limit = limit.max(1);
        let total = history.len() as u64;
        let pages = total.div_ceil(u64::from(limit));
        let offset = (page as usize - 1).saturating_mul(limit as usize);

        let records = history
            .into_iter()
            .skip(offset)
            .take(limit as usize)
            .collect();

        Self {
            records,
            page,
            limit,
            total,
            pages,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_username_normalized() {
        assert_eq!(Username::new("  Alice ").as_str(), "alice");
        assert!(Username::new("   ").is_empty());
    }

    #[test]
    fn test_plan_description() {
        let deposit = PendingDeposit::new(
            UserId::new(),
            Decimal::from(1000),
            Decimal::new(4, 2),
            3_600_000,
        );
        assert_eq!(deposit.plan_description(), "4% after 1 hours");

        let deposit = PendingDeposit::new(
            UserId::new(),
            Decimal::from(1000),
            Decimal::new(125, 3),
            5_400_000,
        );
        assert_eq!(deposit.plan_description(), "12.5% after 1.5 hours");
    }

    #[test]
    fn test_pending_deposit_confirmation() {
        let mut deposit = PendingDeposit::new(
            UserId::new(),
            Decimal::new(100000, 2),
            Decimal::new(4, 2),
            3_600_000,
        );
        assert!(!deposit.is_confirmed());

        deposit.confirmed_amount = Some(Decimal::from(999));
        assert!(!deposit.is_confirmed());

        // 1000 and 1000.00 compare equal
        deposit.confirmed_amount = Some(Decimal::from(1000));
        assert!(deposit.is_confirmed());
    }

    #[test]
    fn test_negative_amount_rejected() {
        let record = TransactionRecord::new(
            UserId::new(),
            TransactionType::Deposit,
            Decimal::from(-1),
            "bad",
        );
        assert!(record.validate().is_err());
    }

    #[test]
    fn test_transaction_page() {
        let user = UserId::new();
        let history: Vec<_> = (0..45)
            .map(|i| TransactionRecord::new(user, TransactionType::Deposit, Decimal::from(i), "x"))
            .collect();

        let page = TransactionPage::from_history(history.clone(), 3, 20);
        assert_eq!(page.total, 45);
        assert_eq!(page.pages, 3);
        assert_eq!(page.records.len(), 5);
        assert_eq!(page.records[0].amount, Decimal::from(40));

        let empty = TransactionPage::from_history(history, 9, 20);
        assert!(empty.records.is_empty());
    }

    #[test]
    fn test_reference_prefix() {
        let reference = new_reference("dep");
        assert!(reference.starts_with("dep_"));
        assert_eq!(reference.len(), 4 + 32);
    }
}
