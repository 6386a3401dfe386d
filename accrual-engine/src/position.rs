//! Mining position state machine
//!
//! ```text
//!   Active ──(elapsed >= duration)──▶ Complete
//!     │                                  │
//!     └──────────(withdraw)──────────────┴──▶ Withdrawn
//! ```
//!
//! While active, profit tracks `progress * target` with bounded noise and is
//! clamped to `[0, target]`. Once complete the profit is frozen at exactly the
//! target.

use crate::{volatility::VolatilitySource, Error, Result};
use chrono::{DateTime, Utc};
use ledger_core::UserId;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Default profit target as a fraction of the deposit
pub const DEFAULT_PERCENT: Decimal = Decimal::from_parts(4, 0, 0, false, 2);

/// Default accrual duration (one hour)
pub const DEFAULT_DURATION_MS: u64 = 3_600_000;

/// Decimal places kept for in-progress profit
pub const PROFIT_SCALE: u32 = 6;

const MS_PER_MINUTE: u64 = 60_000;

/// Lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PositionState {
    /// Accruing
    Active,
    /// Duration elapsed, profit fixed at target
    Complete,
    /// Paid out
    Withdrawn,
}

/// Terms a position is opened with
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanTerms {
    /// Principal
    pub deposit_amount: Decimal,
    /// Profit target as a fraction of the principal
    pub proposed_percent: Decimal,
    /// Accrual duration in milliseconds
    pub duration_ms: u64,
}

impl PlanTerms {
    /// Terms with the default percent and duration
    pub fn new(deposit_amount: Decimal) -> Self {
        Self {
            deposit_amount,
            proposed_percent: DEFAULT_PERCENT,
            duration_ms: DEFAULT_DURATION_MS,
        }
    }

    /// Override the percent
    pub fn with_percent(mut self, percent: Decimal) -> Self {
        self.proposed_percent = percent;
        self
    }

    /// Override the duration
    pub fn with_duration_ms(mut self, duration_ms: u64) -> Self {
        self.duration_ms = duration_ms;
        self
    }

    /// Reject terms the accrual math cannot handle
    pub fn validate(&self) -> Result<()> {
        if self.deposit_amount <= Decimal::ZERO {
            return Err(Error::InvalidPlan(format!(
                "deposit must be positive, got {}",
                self.deposit_amount
            )));
        }
        if self.proposed_percent <= Decimal::ZERO {
            return Err(Error::InvalidPlan(format!(
                "percent must be positive, got {}",
                self.proposed_percent
            )));
        }
        if self.duration_ms == 0 {
            return Err(Error::InvalidPlan("duration must be positive".to_string()));
        }

        // Balances, noisy profit (at most twice the target) and percentages
        // must all stay representable
        let representable = self
            .deposit_amount
            .checked_mul(self.proposed_percent)
            .and_then(|target| {
                target.checked_mul(Decimal::TWO)?;
                self.deposit_amount.checked_add(target)
            })
            .and_then(|_| self.proposed_percent.checked_mul(Decimal::ONE_HUNDRED));
        if representable.is_none() {
            return Err(Error::InvalidPlan(format!(
                "deposit {} at {} overflows balance arithmetic",
                self.deposit_amount, self.proposed_percent
            )));
        }
        Ok(())
    }

    /// `deposit * percent`
    pub fn target_profit(&self) -> Decimal {
        self.deposit_amount * self.proposed_percent
    }
}

/// One user's accrual position
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MiningPosition {
    user_id: UserId,
    deposit_amount: Decimal,
    target_profit: Decimal,
    start_time: DateTime<Utc>,
    duration_ms: u64,
    current_profit: Decimal,
    total_balance: Decimal,
    profit_complete: bool,
    withdrawn: bool,
}

impl MiningPosition {
    /// Open an active position starting at `start_time`
    pub fn open(user_id: UserId, terms: &PlanTerms, start_time: DateTime<Utc>) -> Result<Self> {
        terms.validate()?;

        Ok(Self {
            user_id,
            deposit_amount: terms.deposit_amount,
            target_profit: terms.target_profit(),
            start_time,
            duration_ms: terms.duration_ms,
            current_profit: Decimal::ZERO,
            total_balance: terms.deposit_amount,
            profit_complete: false,
            withdrawn: false,
        })
    }

    /// Position owner
    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    /// Principal
    pub fn deposit_amount(&self) -> Decimal {
        self.deposit_amount
    }

    /// Profit owed at completion
    pub fn target_profit(&self) -> Decimal {
        self.target_profit
    }

    /// Accrual start
    pub fn start_time(&self) -> DateTime<Utc> {
        self.start_time
    }

    /// Accrual duration
    pub fn duration_ms(&self) -> u64 {
        self.duration_ms
    }

    /// Profit as of the last recompute
    pub fn current_profit(&self) -> Decimal {
        self.current_profit
    }

    /// Principal plus current profit
    pub fn total_balance(&self) -> Decimal {
        self.total_balance
    }

    /// Duration has elapsed
    pub fn is_complete(&self) -> bool {
        self.profit_complete
    }

    /// Paid out
    pub fn is_withdrawn(&self) -> bool {
        self.withdrawn
    }

    /// Current lifecycle state
    pub fn state(&self) -> PositionState {
        if self.withdrawn {
            PositionState::Withdrawn
        } else if self.profit_complete {
            PositionState::Complete
        } else {
            PositionState::Active
        }
    }

    fn elapsed_ms(&self, now: DateTime<Utc>) -> u64 {
        (now - self.start_time).num_milliseconds().max(0) as u64
    }

    /// Milliseconds left until completion
    pub fn remaining_ms(&self, now: DateTime<Utc>) -> u64 {
        self.duration_ms.saturating_sub(self.elapsed_ms(now))
    }

    /// Refresh cached profit for `now`. A no-op once complete or withdrawn.
    pub fn recompute(&mut self, now: DateTime<Utc>, volatility: &dyn VolatilitySource) {
        if self.profit_complete || self.withdrawn {
            return;
        }

        let elapsed = self.elapsed_ms(now);
        if elapsed >= self.duration_ms {
            self.current_profit = self.target_profit;
            self.total_balance = self.deposit_amount + self.target_profit;
            self.profit_complete = true;
            return;
        }

        let progress = Decimal::from(elapsed) / Decimal::from(self.duration_ms);
        let base_profit = progress * self.target_profit;
        let noisy = base_profit
            .checked_mul(Decimal::ONE + volatility.sample())
            .map_or(self.target_profit, |profit| profit.round_dp(PROFIT_SCALE));

        self.current_profit = noisy.clamp(Decimal::ZERO, self.target_profit);
        self.total_balance = self.deposit_amount + self.current_profit;
    }

    /// Recompute and snapshot
    pub fn status(&mut self, now: DateTime<Utc>, volatility: &dyn VolatilitySource) -> MinerStatus {
        self.recompute(now, volatility);

        let remaining_ms = self.remaining_ms(now);
        let percent_of_deposit = |amount: Decimal| {
            if self.deposit_amount.is_zero() {
                Decimal::ZERO
            } else {
                (amount / self.deposit_amount * Decimal::ONE_HUNDRED).round_dp(2)
            }
        };

        MinerStatus {
            user_id: self.user_id,
            proposed_percent: percent_of_deposit(self.target_profit),
            deposit: self.deposit_amount.round_dp(2),
            current_profit: self.current_profit.round_dp(PROFIT_SCALE),
            total_balance: self.total_balance.round_dp(PROFIT_SCALE),
            profit_percentage: percent_of_deposit(self.current_profit),
            profit_complete: self.profit_complete,
            withdrawn: self.withdrawn,
            remaining_minutes: remaining_ms.div_ceil(MS_PER_MINUTE),
            can_withdraw: self.profit_complete && !self.withdrawn,
        }
    }

    /// Recompute, mark withdrawn and return the payout
    pub fn withdraw(
        &mut self,
        now: DateTime<Utc>,
        volatility: &dyn VolatilitySource,
    ) -> Result<Withdrawal> {
        if self.withdrawn {
            return Err(Error::AlreadyWithdrawn(self.user_id));
        }

        self.recompute(now, volatility);
        self.withdrawn = true;

        Ok(Withdrawal {
            user_id: self.user_id,
            amount: self.total_balance,
            deposit_amount: self.deposit_amount,
            profit: self.current_profit,
            profit_complete: self.profit_complete,
            withdrawn_at: now,
        })
    }
}

/// Read-only view of a position
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MinerStatus {
    /// Position owner
    pub user_id: UserId,
    /// Target profit relative to deposit, in percent
    pub proposed_percent: Decimal,
    /// Principal
    pub deposit: Decimal,
    /// Accrued profit
    pub current_profit: Decimal,
    /// Principal plus accrued profit
    pub total_balance: Decimal,
    /// Accrued profit relative to deposit, in percent
    pub profit_percentage: Decimal,
    /// Duration has elapsed
    pub profit_complete: bool,
    /// Paid out
    pub withdrawn: bool,
    /// Minutes until completion, rounded up
    pub remaining_minutes: u64,
    /// `profit_complete && !withdrawn`
    pub can_withdraw: bool,
}

/// Payout produced by a withdrawal
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Withdrawal {
    /// Position owner
    pub user_id: UserId,
    /// Principal plus profit paid out
    pub amount: Decimal,
    /// Principal
    pub deposit_amount: Decimal,
    /// Profit component
    pub profit: Decimal,
    /// Whether the plan had completed
    pub profit_complete: bool,
    /// Withdrawal instant
    pub withdrawn_at: DateTime<Utc>,
}
