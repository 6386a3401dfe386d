//! Shared fixtures for deposit service integration tests

#![allow(dead_code)]

use accrual_engine::{AccrualEngine, FixedVolatility, ManualClock};
use deposit_service::{
    notification_queue, Config, DepositDesk, DepositRequest, LogNotifier, NewUser,
    NotificationDispatcher, NotificationHandle,
};
use ledger_core::{LedgerStore, MemoryLedger, TransactionRecord, TransactionType, User, UserId};
use rust_decimal::Decimal;
use std::sync::Arc;

pub struct Harness {
    pub desk: DepositDesk,
    pub store: Arc<MemoryLedger>,
    pub clock: Arc<ManualClock>,
    // Held so queued notifications are not reported as dropped
    _dispatcher: NotificationDispatcher,
}

pub fn harness() -> Harness {
    harness_with(Config::default())
}

pub fn harness_with(config: Config) -> Harness {
    let (handle, dispatcher) = notification_queue(Arc::new(LogNotifier), 1024);
    let (desk, store, clock) = desk_with(config, handle);
    Harness {
        desk,
        store,
        clock,
        _dispatcher: dispatcher,
    }
}

pub fn desk_with(
    config: Config,
    notifications: NotificationHandle,
) -> (DepositDesk, Arc<MemoryLedger>, Arc<ManualClock>) {
    let store = Arc::new(MemoryLedger::new());
    let clock = Arc::new(ManualClock::starting_now());
    let engine = AccrualEngine::new(
        config.accrual.clone(),
        clock.clone(),
        Arc::new(FixedVolatility(Decimal::ZERO)),
    );
    let desk = DepositDesk::with_engine(&config, store.clone(), engine, notifications).unwrap();
    (desk, store, clock)
}

impl Harness {
    pub fn register(&self, name: &str, referrer: Option<&str>) -> User {
        let mut request = NewUser::new(name, format!("{}@example.com", name));
        if let Some(referrer) = referrer {
            request = request.referred_by(referrer);
        }
        self.desk.register_user(request).unwrap()
    }

    /// Submit, attest and confirm a deposit with the plan defaults
    pub fn fund(&self, user_id: UserId, amount: Decimal) -> deposit_service::Confirmation {
        self.desk
            .submit_deposit(user_id, DepositRequest::new(amount))
            .unwrap();
        self.desk.attest_deposit(user_id, amount).unwrap();
        self.desk.confirm_deposit(user_id).unwrap()
    }

    pub fn records(&self, user_id: UserId, kind: TransactionType) -> Vec<TransactionRecord> {
        self.store
            .transactions_for(user_id)
            .unwrap()
            .into_iter()
            .filter(|record| record.kind == kind)
            .collect()
    }

    pub fn referral_level(&self, user: &User) -> u32 {
        self.store.get_user(user.user_id).unwrap().unwrap().referral_level
    }
}
