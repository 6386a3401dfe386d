//! Accrual engine
//!
//! Opens positions, answers status polls and performs the one-time withdrawal.

use crate::{
    clock::Clock,
    config::AccrualConfig,
    position::{MinerStatus, MiningPosition, PlanTerms, Withdrawal},
    registry::PositionRegistry,
    volatility::VolatilitySource,
    Error, Result,
};
use ledger_core::UserId;
use std::sync::Arc;

/// Accrual engine
#[derive(Debug)]
pub struct AccrualEngine {
    /// Configuration
    config: AccrualConfig,

    /// Open positions
    registry: Arc<PositionRegistry>,

    /// Time source
    clock: Arc<dyn Clock>,

    /// Noise source
    volatility: Arc<dyn VolatilitySource>,
}

impl AccrualEngine {
    /// Create engine with explicit time and noise sources
    pub fn new(
        config: AccrualConfig,
        clock: Arc<dyn Clock>,
        volatility: Arc<dyn VolatilitySource>,
    ) -> Self {
        Self {
            config,
            registry: Arc::new(PositionRegistry::new()),
            clock,
            volatility,
        }
    }

    /// Create engine whose noise source is built from `config`
    pub fn from_config(config: AccrualConfig, clock: Arc<dyn Clock>) -> Result<Self> {
        let volatility = config.volatility_source()?;
        Ok(Self::new(config, clock, volatility))
    }

    /// Configuration
    pub fn config(&self) -> &AccrualConfig {
        &self.config
    }

    /// Time source
    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Open positions
    pub fn registry(&self) -> &Arc<PositionRegistry> {
        &self.registry
    }

    /// Build a position starting now without registering it
    pub fn open_position(&self, user_id: UserId, terms: &PlanTerms) -> Result<MiningPosition> {
        MiningPosition::open(user_id, terms, self.clock.now())
    }

    /// Make a position visible to status polls and withdrawal
    pub fn register(&self, position: MiningPosition) {
        let user_id = position.user_id();
        let target = position.target_profit();
        if self.registry.put(position).is_some() {
            tracing::warn!(%user_id, "Replaced existing mining position");
        }
        tracing::info!(%user_id, %target, "Mining position opened");
    }

    /// Current status of the user's position
    pub fn status(&self, user_id: UserId) -> Result<MinerStatus> {
        let now = self.clock.now();
        self.registry
            .with_position(user_id, |position| position.status(now, self.volatility.as_ref()))
    }

    /// Withdraw the user's position.
    ///
    /// `record` runs while the position is still exclusively held; if it fails
    /// the position is restored untouched and remains withdrawable.
    pub fn withdraw<E, F>(&self, user_id: UserId, record: F) -> std::result::Result<Withdrawal, E>
    where
        E: From<Error>,
        F: FnOnce(&Withdrawal) -> std::result::Result<(), E>,
    {
        let now = self.clock.now();
        let volatility = self.volatility.as_ref();
        let require_completion = self.config.require_completion_for_withdrawal;

        let withdrawal = self.registry.take_with(user_id, |position| {
            if require_completion && !position.is_withdrawn() {
                position.recompute(now, volatility);
                if !position.is_complete() {
                    let remaining_minutes = position.remaining_ms(now).div_ceil(60_000);
                    return Err(E::from(Error::WithdrawalLocked {
                        user_id,
                        remaining_minutes,
                    }));
                }
            }

            let snapshot = position.clone();
            let withdrawal = position.withdraw(now, volatility)?;
            if let Err(err) = record(&withdrawal) {
                *position = snapshot;
                return Err(err);
            }
            Ok(withdrawal)
        })?;

        tracing::info!(
            %user_id,
            amount = %withdrawal.amount,
            complete = withdrawal.profit_complete,
            "Mining position withdrawn"
        );
        Ok(withdrawal)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::volatility::{FixedVolatility, SeededVolatility, DEFAULT_VOLATILITY_BOUND};
    use rust_decimal::Decimal;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn engine_with(
        config: AccrualConfig,
        volatility: Arc<dyn VolatilitySource>,
    ) -> (AccrualEngine, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::starting_now());
        let engine = AccrualEngine::new(config, clock.clone(), volatility);
        (engine, clock)
    }

    fn open(engine: &AccrualEngine, deposit: i64) -> UserId {
        let user_id = UserId::new();
        let position = engine
            .open_position(user_id, &PlanTerms::new(Decimal::from(deposit)))
            .unwrap();
        engine.register(position);
        user_id
    }

    #[test]
    fn test_status_without_position() {
        let (engine, _) = engine_with(AccrualConfig::default(), Arc::new(FixedVolatility(Decimal::ZERO)));
        assert!(matches!(engine.status(UserId::new()), Err(Error::NoActivePosition(_))));
    }

    #[test]
    fn test_open_does_not_register() {
        let (engine, _) = engine_with(AccrualConfig::default(), Arc::new(FixedVolatility(Decimal::ZERO)));
        let user_id = UserId::new();
        engine
            .open_position(user_id, &PlanTerms::new(Decimal::from(10)))
            .unwrap();
        assert!(engine.status(user_id).is_err());
    }

    #[test]
    fn test_halfway_within_noise_band() {
        let volatility = SeededVolatility::from_seed(3, DEFAULT_VOLATILITY_BOUND).unwrap();
        let (engine, clock) = engine_with(AccrualConfig::default(), Arc::new(volatility));
        let user_id = open(&engine, 1000);

        clock.advance_ms(1_800_000);
        for _ in 0..200 {
            let status = engine.status(user_id).unwrap();
            assert!(status.current_profit >= Decimal::new(175, 1));
            assert!(status.current_profit <= Decimal::new(225, 1));
            assert!(!status.can_withdraw);
        }
    }

    #[test]
    fn test_complete_then_withdraw() {
        let (engine, clock) = engine_with(AccrualConfig::default(), Arc::new(FixedVolatility(Decimal::new(-1, 1))));
        let user_id = open(&engine, 1000);

        clock.advance_ms(3_600_000);
        let status = engine.status(user_id).unwrap();
        assert_eq!(status.current_profit, Decimal::from(40));
        assert_eq!(status.total_balance, Decimal::from(1040));
        assert!(status.can_withdraw);

        let withdrawal: Result<Withdrawal> = engine.withdraw(user_id, |_| Ok(()));
        assert_eq!(withdrawal.unwrap().amount, Decimal::from(1040));

        let again: Result<Withdrawal> = engine.withdraw(user_id, |_| Ok(()));
        assert!(matches!(again, Err(Error::NoActivePosition(_))));
        assert!(engine.status(user_id).is_err());
    }

    #[test]
    fn test_failed_record_restores_position() {
        let (engine, clock) = engine_with(AccrualConfig::default(), Arc::new(FixedVolatility(Decimal::ZERO)));
        let user_id = open(&engine, 1000);
        clock.advance_ms(3_600_000);

        let failed: Result<Withdrawal> =
            engine.withdraw(user_id, |_| Err(Error::InvalidPlan("store down".to_string())));
        assert!(failed.is_err());

        let status = engine.status(user_id).unwrap();
        assert!(!status.withdrawn);
        assert!(status.can_withdraw);

        let retry: Result<Withdrawal> = engine.withdraw(user_id, |_| Ok(()));
        assert_eq!(retry.unwrap().amount, Decimal::from(1040));
    }

    #[test]
    fn test_completion_policy() {
        let config = AccrualConfig {
            require_completion_for_withdrawal: true,
            ..Default::default()
        };
        let (engine, clock) = engine_with(config, Arc::new(FixedVolatility(Decimal::ZERO)));
        let user_id = open(&engine, 1000);

        clock.advance_ms(3_000_000);
        let early: Result<Withdrawal> = engine.withdraw(user_id, |_| Ok(()));
        assert!(matches!(
            early,
            Err(Error::WithdrawalLocked { remaining_minutes: 10, .. })
        ));

        clock.advance_ms(600_000);
        let done: Result<Withdrawal> = engine.withdraw(user_id, |_| Ok(()));
        assert_eq!(done.unwrap().amount, Decimal::from(1040));
    }

    #[test]
    fn test_concurrent_withdraw_exactly_once() {
        let (engine, clock) = engine_with(AccrualConfig::default(), Arc::new(FixedVolatility(Decimal::ZERO)));
        let engine = Arc::new(engine);
        let user_id = open(&engine, 1000);
        clock.advance_ms(3_600_000);

        let recorded = Arc::new(AtomicUsize::new(0));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let engine = Arc::clone(&engine);
                let recorded = Arc::clone(&recorded);
                std::thread::spawn(move || {
                    let result: Result<Withdrawal> = engine.withdraw(user_id, |_| {
                        recorded.fetch_add(1, Ordering::SeqCst);
                        Ok(())
                    });
                    result.is_ok()
                })
            })
            .collect();

        let successes = handles
            .into_iter()
            .map(|handle| handle.join().unwrap())
            .filter(|ok| *ok)
            .count();
        assert_eq!(successes, 1);
        assert_eq!(recorded.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_polls_never_see_withdrawn_snapshot() {
        let (engine, clock) = engine_with(AccrualConfig::default(), Arc::new(FixedVolatility(Decimal::ZERO)));
        let engine = Arc::new(engine);
        let user_id = open(&engine, 1000);
        clock.advance_ms(3_600_000);

        let poller = {
            let engine = Arc::clone(&engine);
            std::thread::spawn(move || {
                for _ in 0..1_000 {
                    match engine.status(user_id) {
                        Ok(status) => assert!(!status.withdrawn),
                        Err(err) => assert!(matches!(err, Error::NoActivePosition(_))),
                    }
                }
            })
        };

        let withdrawal: Result<Withdrawal> = engine.withdraw(user_id, |_| Ok(()));
        assert!(withdrawal.is_ok());
        poller.join().unwrap();
    }
}
