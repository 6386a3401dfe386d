//! Configuration for the deposit service

use crate::{Error, Result};
use accrual_engine::{AccrualConfig, DEFAULT_DURATION_MS, DEFAULT_PERCENT};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Ledger store
    pub ledger: ledger_core::Config,

    /// Deposit plan defaults and bounds
    pub plan: PlanConfig,

    /// Referral bonus cascade
    pub referral: ReferralConfig,

    /// Profit accrual
    pub accrual: AccrualConfig,

    /// Notification delivery
    pub notifications: NotificationConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            ledger: ledger_core::Config::default(),
            plan: PlanConfig::default(),
            referral: ReferralConfig::default(),
            accrual: AccrualConfig::default(),
            notifications: NotificationConfig::default(),
        }
    }
}

/// Deposit plan configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlanConfig {
    /// Percent used when the depositor proposes none (fraction)
    pub default_percent: Decimal,

    /// Duration used when the depositor proposes none (ms)
    pub default_duration_ms: u64,

    /// Largest single deposit accepted
    pub max_amount: Decimal,

    /// Largest percent a depositor may propose (fraction)
    pub max_percent: Decimal,

    /// Shortest allowed duration (ms)
    pub min_duration_ms: u64,

    /// Longest allowed duration (ms)
    pub max_duration_ms: u64,
}

impl Default for PlanConfig {
    fn default() -> Self {
        Self {
            default_percent: DEFAULT_PERCENT,
            default_duration_ms: DEFAULT_DURATION_MS,
            max_amount: Decimal::from(1_000_000_000u64),
            max_percent: Decimal::ONE,
            min_duration_ms: 60_000,
            max_duration_ms: 30 * 24 * DEFAULT_DURATION_MS,
        }
    }
}

/// Where the cascade starts in the rate table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StartLevelPolicy {
    /// Resume from the direct referrer's stored referral level
    ResumeFromReferrer,
    /// Always start at the first rate
    AlwaysZero,
}

/// Referral configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReferralConfig {
    /// Bonus rate per level, direct referrer first. Its length caps the chain depth.
    pub rates: Vec<Decimal>,

    /// Start level policy
    pub start_level: StartLevelPolicy,
}

impl Default for ReferralConfig {
    fn default() -> Self {
        Self {
            rates: vec![Decimal::new(8, 2), Decimal::new(5, 2), Decimal::new(2, 2)],
            start_level: StartLevelPolicy::ResumeFromReferrer,
        }
    }
}

/// Notification configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationConfig {
    /// Bounded queue between the service and the delivery task
    pub queue_capacity: usize,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 1024,
        }
    }
}

impl Config {
    /// Load from file
    pub fn from_file(path: impl AsRef<std::path::Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("Failed to read {}: {}", path.display(), e)))?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| Error::Config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from environment variables
    pub fn from_env() -> Result<Self> {
        let mut config = Config::default();

        if let Ok(data_dir) = std::env::var("DEPOSIT_DATA_DIR") {
            config.ledger.data_dir = PathBuf::from(data_dir);
        }

        if let Some(sync) = parse_env("DEPOSIT_SYNC_WRITES")? {
            config.ledger.rocksdb.sync_writes = sync;
        }

        if let Some(seed) = parse_env("DEPOSIT_VOLATILITY_SEED")? {
            config.accrual.volatility_seed = Some(seed);
        }

        if let Some(required) = parse_env("DEPOSIT_REQUIRE_COMPLETION")? {
            config.accrual.require_completion_for_withdrawal = required;
        }

        if let Ok(policy) = std::env::var("DEPOSIT_REFERRAL_START_LEVEL") {
            config.referral.start_level = match policy.as_str() {
                "resume_from_referrer" => StartLevelPolicy::ResumeFromReferrer,
                "always_zero" => StartLevelPolicy::AlwaysZero,
                other => {
                    return Err(Error::Config(format!(
                        "DEPOSIT_REFERRAL_START_LEVEL: {}",
                        other
                    )))
                }
            };
        }

        if let Some(capacity) = parse_env("DEPOSIT_NOTIFY_QUEUE")? {
            config.notifications.queue_capacity = capacity;
        }

        config.validate()?;
        Ok(config)
    }

    /// Check cross-field constraints
    pub fn validate(&self) -> Result<()> {
        let plan = &self.plan;
        if plan.max_amount <= Decimal::ZERO {
            return Err(Error::Config("plan.max_amount must be positive".to_string()));
        }
        if plan.max_percent <= Decimal::ZERO {
            return Err(Error::Config("plan.max_percent must be positive".to_string()));
        }
        if plan.default_percent <= Decimal::ZERO || plan.default_percent > plan.max_percent {
            return Err(Error::Config(format!(
                "plan.default_percent {} outside (0, {}]",
                plan.default_percent, plan.max_percent
            )));
        }
        if plan.min_duration_ms == 0 || plan.min_duration_ms > plan.max_duration_ms {
            return Err(Error::Config("plan duration bounds are inverted or zero".to_string()));
        }
        if !(plan.min_duration_ms..=plan.max_duration_ms).contains(&plan.default_duration_ms) {
            return Err(Error::Config(format!(
                "plan.default_duration_ms {} outside bounds",
                plan.default_duration_ms
            )));
        }

        if let Some(rate) = self
            .referral
            .rates
            .iter()
            .find(|rate| rate.is_sign_negative() || **rate >= Decimal::ONE)
        {
            return Err(Error::Config(format!("referral rate {} outside [0, 1)", rate)));
        }

        if self.notifications.queue_capacity == 0 {
            return Err(Error::Config(
                "notifications.queue_capacity must be positive".to_string(),
            ));
        }

        Ok(())
    }
}

fn parse_env<T: std::str::FromStr>(key: &str) -> Result<Option<T>> {
    match std::env::var(key) {
        Ok(value) => value
            .parse()
            .map(Some)
            .map_err(|_| Error::Config(format!("{}: {}", key, value))),
        Err(_) => Ok(None),
    }
}
