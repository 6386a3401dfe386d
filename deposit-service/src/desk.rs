//! Caller-facing deposit desk
//!
//! Every operation the HTTP layer needs lives here: registration, deposit
//! submission and attestation, confirmation (see [`crate::confirmation`]),
//! status polling, withdrawal and history.

use crate::{
    config::{Config, PlanConfig},
    metrics::ServiceMetrics,
    notify::{Notification, NotificationHandle, NotificationKind},
    referral::ReferralCascade,
    types::{DepositRequest, NewUser, WithdrawalReceipt},
    Error, Result,
};
use accrual_engine::{AccrualEngine, Clock, MinerStatus, PlanTerms, Withdrawal};
use dashmap::DashSet;
use ledger_core::{
    new_reference, run_atomic, LedgerStore, PendingDeposit, TransactionPage, TransactionRecord,
    TransactionType, User, UserId, Username,
};
use rust_decimal::Decimal;
use std::sync::Arc;

/// Page size when the caller gives none
pub const DEFAULT_PAGE_LIMIT: u32 = 20;

/// Largest page size served
pub const MAX_PAGE_LIMIT: u32 = 100;

/// Deposit desk
pub struct DepositDesk {
    pub(crate) plan: PlanConfig,
    pub(crate) store: Arc<dyn LedgerStore>,
    pub(crate) engine: AccrualEngine,
    pub(crate) cascade: ReferralCascade,
    pub(crate) notifications: NotificationHandle,
    pub(crate) metrics: ServiceMetrics,
    /// Users with a confirmation in progress
    pub(crate) in_flight: DashSet<UserId>,
}

impl std::fmt::Debug for DepositDesk {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DepositDesk")
            .field("plan", &self.plan)
            .field("engine", &self.engine)
            .field("cascade", &self.cascade)
            .finish_non_exhaustive()
    }
}

impl DepositDesk {
    /// Create a desk whose accrual engine is built from `config`
    pub fn new(
        config: &Config,
        store: Arc<dyn LedgerStore>,
        clock: Arc<dyn Clock>,
        notifications: NotificationHandle,
    ) -> Result<Self> {
        let engine = AccrualEngine::from_config(config.accrual.clone(), clock)?;
        Self::with_engine(config, store, engine, notifications)
    }

    /// Create a desk around an existing engine
    pub fn with_engine(
        config: &Config,
        store: Arc<dyn LedgerStore>,
        engine: AccrualEngine,
        notifications: NotificationHandle,
    ) -> Result<Self> {
        config.validate()?;
        let metrics = ServiceMetrics::new()
            .map_err(|e| Error::Config(format!("Failed to register metrics: {}", e)))?;

        Ok(Self {
            plan: config.plan.clone(),
            store,
            engine,
            cascade: ReferralCascade::new(&config.referral),
            notifications,
            metrics,
            in_flight: DashSet::new(),
        })
    }

    /// Metrics collector
    pub fn metrics(&self) -> &ServiceMetrics {
        &self.metrics
    }

    /// Accrual engine
    pub fn engine(&self) -> &AccrualEngine {
        &self.engine
    }

    /// Ledger store
    pub fn store(&self) -> &Arc<dyn LedgerStore> {
        &self.store
    }

    pub(crate) fn emit(&self, notification: Notification) {
        if !self.notifications.notify(notification) {
            self.metrics.notifications_dropped_total.inc();
        }
    }

    pub(crate) fn refresh_position_gauge(&self) {
        self.metrics
            .active_positions
            .set(self.engine.registry().len() as i64);
    }

    pub(crate) fn require_user(&self, user_id: UserId) -> Result<User> {
        self.store
            .get_user(user_id)?
            .ok_or_else(|| Error::NotFound(format!("user {}", user_id)))
    }

    /// Register a user. Usernames are case-insensitive and unique.
    pub fn register_user(&self, request: NewUser) -> Result<User> {
        let username = Username::new(&request.username);
        if username.is_empty() {
            return Err(Error::InvalidRequest("username must not be empty".to_string()));
        }
        if !username
            .as_str()
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
        {
            return Err(Error::InvalidRequest(format!(
                "username may only contain letters, digits, '_', '-' and '.': {}",
                username
            )));
        }

        let email = request.email.trim();
        if !email.contains('@') {
            return Err(Error::InvalidRequest(format!("invalid email address: {}", email)));
        }

        let referrer = request
            .referrer
            .as_deref()
            .map(Username::new)
            .filter(|referrer| !referrer.is_empty());

        let mut user = User::new(username, email, referrer);
        if let Some(full_name) = request.full_name.as_deref().map(str::trim) {
            if !full_name.is_empty() {
                user = user.with_full_name(full_name);
            }
        }

        run_atomic(self.store.as_ref(), |batch| {
            batch.insert_user(user.clone());
            Ok::<_, Error>(())
        })?;

        tracing::info!(
            user_id = %user.user_id,
            username = %user.username,
            referrer = ?user.referrer.as_ref().map(Username::as_str),
            "User registered"
        );
        Ok(user)
    }

    /// Look up a user by ID
    pub fn get_user(&self, user_id: UserId) -> Result<User> {
        self.require_user(user_id)
    }

    /// Look up a user by username
    pub fn get_user_by_username(&self, username: &str) -> Result<User> {
        let username = Username::new(username);
        self.store
            .get_user_by_username(&username)?
            .ok_or_else(|| Error::NotFound(format!("user {}", username)))
    }

    /// Direct referrals of `username`
    pub fn referrals_of(&self, username: &str) -> Result<Vec<User>> {
        let user = self.get_user_by_username(username)?;
        Ok(self.store.referrals_of(&user.username)?)
    }

    /// Submit a deposit for confirmation
    pub fn submit_deposit(&self, user_id: UserId, request: DepositRequest) -> Result<PendingDeposit> {
        let user = self.require_user(user_id)?;

        if request.amount <= Decimal::ZERO {
            return Err(Error::InvalidRequest(format!(
                "deposit amount must be positive, got {}",
                request.amount
            )));
        }
        if request.amount > self.plan.max_amount {
            return Err(Error::InvalidRequest(format!(
                "deposit amount {} exceeds the maximum of {}",
                request.amount, self.plan.max_amount
            )));
        }

        let percent = request.proposed_percent.unwrap_or(self.plan.default_percent);
        if percent <= Decimal::ZERO || percent > self.plan.max_percent {
            return Err(Error::InvalidRequest(format!(
                "proposed percent {} outside (0, {}]",
                percent, self.plan.max_percent
            )));
        }

        let duration_ms = request
            .proposed_duration_ms
            .unwrap_or(self.plan.default_duration_ms);
        if !(self.plan.min_duration_ms..=self.plan.max_duration_ms).contains(&duration_ms) {
            return Err(Error::InvalidRequest(format!(
                "proposed duration {}ms outside [{}, {}]",
                duration_ms, self.plan.min_duration_ms, self.plan.max_duration_ms
            )));
        }

        PlanTerms::new(request.amount)
            .with_percent(percent)
            .with_duration_ms(duration_ms)
            .validate()?;

        let pending = PendingDeposit::new(user_id, request.amount, percent, duration_ms);
        let plan = pending.plan_description();
        let record = TransactionRecord::new(user_id, TransactionType::MiningPlan, request.amount, &plan)
            .with_reference(new_reference("dep"))
            .with_metadata("plan", &plan)
            .with_metadata("proposed_percent", percent)
            .with_metadata("proposed_duration_ms", duration_ms);

        run_atomic(self.store.as_ref(), |batch| {
            batch
                .insert_pending_deposit(pending.clone())
                .append_transaction(record);
            Ok::<_, Error>(())
        })
        .map_err(|e| match e {
            Error::Conflict(_) => Error::Conflict(
                "A deposit is currently being processed for this user".to_string(),
            ),
            other => other,
        })?;

        self.metrics.submissions_total.inc();
        tracing::info!(%user_id, amount = %pending.deposit_amount, %plan, "Deposit submitted");

        self.emit(
            Notification::new(NotificationKind::DepositSubmitted, &user)
                .with_amount("amount", pending.deposit_amount)
                .with("plan", &plan),
        );

        Ok(pending)
    }

    /// Attach the operator-attested amount to the user's pending deposit
    pub fn attest_deposit(&self, user_id: UserId, confirmed_amount: Decimal) -> Result<PendingDeposit> {
        if confirmed_amount.is_sign_negative() {
            return Err(Error::InvalidRequest(format!(
                "confirmed amount must not be negative, got {}",
                confirmed_amount
            )));
        }

        let mut pending = self
            .store
            .get_pending_deposit(user_id)?
            .ok_or_else(|| Error::NotFound("No deposit found for this user".to_string()))?;

        run_atomic(self.store.as_ref(), |batch| {
            batch.attest_pending_deposit(&pending, confirmed_amount);
            Ok::<_, Error>(())
        })
        .map_err(|e| match e {
            Error::Conflict(_) => Error::Conflict(
                "The deposit changed while it was being attested".to_string(),
            ),
            other => other,
        })?;
        pending.confirmed_amount = Some(confirmed_amount);

        tracing::info!(%user_id, %confirmed_amount, "Deposit attested");
        Ok(pending)
    }

    /// Current status of the user's mining position
    pub fn get_miner_status(&self, user_id: UserId) -> Result<MinerStatus> {
        Ok(self.engine.status(user_id)?)
    }

    /// Pay out the user's position and record the withdrawal
    pub fn withdraw(&self, user_id: UserId) -> Result<WithdrawalReceipt> {
        let user = self.require_user(user_id)?;
        let reference = new_reference("with");
        let store = self.store.as_ref();

        let withdrawal = self.engine.withdraw(user_id, |withdrawal: &Withdrawal| -> Result<()> {
            let record = TransactionRecord::new(
                user_id,
                TransactionType::Withdrawal,
                withdrawal.amount,
                "User withdrawal",
            )
            .with_reference(reference.clone())
            .with_metadata("profit", withdrawal.profit)
            .with_metadata("profit_complete", withdrawal.profit_complete);
            store.append_transaction(record)?;
            Ok(())
        })?;

        self.metrics.withdrawals_total.inc();
        self.refresh_position_gauge();

        self.emit(
            Notification::new(NotificationKind::WithdrawalCompleted, &user)
                .with_amount("amount", withdrawal.amount)
                .with("reference", &reference),
        );

        Ok(WithdrawalReceipt {
            user_id,
            amount: withdrawal.amount,
            profit: withdrawal.profit,
            profit_complete: withdrawal.profit_complete,
            reference,
            withdrawn_at: withdrawal.withdrawn_at,
        })
    }

    /// Newest-first page of the user's transaction history
    pub fn transactions(
        &self,
        user_id: UserId,
        page: Option<u32>,
        limit: Option<u32>,
    ) -> Result<TransactionPage> {
        self.require_user(user_id)?;

        let mut history = self.store.transactions_for(user_id)?;
        history.reverse();

        let limit = limit.unwrap_or(DEFAULT_PAGE_LIMIT).clamp(1, MAX_PAGE_LIMIT);
        Ok(TransactionPage::from_history(history, page.unwrap_or(1), limit))
    }
}
