//! Deposit confirmation workflow
//!
//! ```text
//!   PendingDeposit ──(attested == declared)──▶ one ledger batch:
//!                                                deposit record
//!                                                referral bonuses + level bumps
//!                                                delete pending deposit
//!                                              then register the position
//!                  ──(mismatch)──────────────▶ nothing written, ValidationMismatch
//! ```
//!
//! The position is built before the batch commits and registered only after,
//! so a failed commit leaves neither ledger rows nor a position behind. A
//! second confirmation for the same user is rejected while one is in flight,
//! and the pending-deposit delete in the batch rejects one that arrives after.

use crate::{
    desk::DepositDesk,
    notify::{Notification, NotificationKind},
    referral::CascadeOutcome,
    types::Confirmation,
    Error, Result,
};
use accrual_engine::PlanTerms;
use dashmap::DashSet;
use ledger_core::{new_reference, run_atomic, TransactionRecord, TransactionType, UserId};

/// Marks a user as having a confirmation in progress until dropped
struct InFlight<'a> {
    users: &'a DashSet<UserId>,
    user_id: UserId,
}

impl<'a> InFlight<'a> {
    fn begin(users: &'a DashSet<UserId>, user_id: UserId) -> Result<Self> {
        if !users.insert(user_id) {
            return Err(Error::Conflict(
                "A confirmation is already in progress for this user".to_string(),
            ));
        }
        Ok(Self { users, user_id })
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.users.remove(&self.user_id);
    }
}

impl DepositDesk {
    /// Confirm the user's pending deposit, pay referral bonuses and start mining
    pub fn confirm_deposit(&self, user_id: UserId) -> Result<Confirmation> {
        let _in_flight = InFlight::begin(&self.in_flight, user_id)?;

        let user = self.require_user(user_id)?;
        let pending = self
            .store
            .get_pending_deposit(user_id)?
            .ok_or_else(|| Error::NotFound("No deposit found for this user".to_string()))?;

        let amount = match pending.confirmed_amount {
            Some(confirmed) if confirmed == pending.deposit_amount => confirmed,
            confirmed => {
                self.metrics.mismatches_total.inc();
                tracing::warn!(
                    %user_id,
                    declared = %pending.deposit_amount,
                    confirmed = ?confirmed,
                    "Deposit confirmation mismatch"
                );
                self.emit(
                    Notification::new(NotificationKind::ConfirmationFailed, &user)
                        .with_amount("amount", pending.deposit_amount),
                );
                return Err(Error::ValidationMismatch {
                    declared: pending.deposit_amount,
                    confirmed,
                });
            }
        };

        let terms = PlanTerms::new(amount)
            .with_percent(pending.proposed_percent)
            .with_duration_ms(pending.proposed_duration_ms);
        let position = self.engine.open_position(user_id, &terms)?;

        let reference = new_reference("dep");
        let store = self.store.as_ref();
        let outcome: CascadeOutcome = run_atomic(store, |batch| -> Result<CascadeOutcome> {
            batch.append_transaction(
                TransactionRecord::new(user_id, TransactionType::Deposit, amount, "Deposit confirmed")
                    .with_reference(reference.clone())
                    .with_metadata("proposed_percent", pending.proposed_percent)
                    .with_metadata("proposed_duration_ms", pending.proposed_duration_ms),
            );
            let outcome = self.cascade.distribute(store, &user, amount, batch)?;
            batch.consume_pending_deposit(&pending);
            Ok(outcome)
        })?;

        let target_profit = position.target_profit();
        self.engine.register(position);

        self.metrics.confirmations_total.inc();
        self.metrics
            .referral_bonuses_total
            .inc_by(outcome.payouts.len() as u64);
        if outcome.halt.is_graph_integrity_warning() {
            self.metrics.cascade_halts_total.inc();
        }
        self.refresh_position_gauge();

        tracing::info!(
            %user_id,
            %amount,
            %reference,
            bonuses = outcome.payouts.len(),
            halt = ?outcome.halt,
            "Deposit confirmed"
        );

        self.emit(
            Notification::new(NotificationKind::DepositConfirmed, &user)
                .with_amount("amount", amount)
                .with("plan", pending.plan_description()),
        );
        for payout in &outcome.payouts {
            self.emit(
                Notification::new(NotificationKind::ReferralBonus, &payout.referrer)
                    .with_amount("amount", payout.amount)
                    .with("level", payout.level + 1)
                    .with("from_user", &user.username),
            );
        }

        Ok(Confirmation {
            user_id,
            amount,
            reference,
            bonuses: outcome.payouts,
            cascade_halt: outcome.halt,
            target_profit,
            duration_ms: pending.proposed_duration_ms,
        })
    }
}
