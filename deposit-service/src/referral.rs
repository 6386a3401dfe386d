//! Referral bonus cascade
//!
//! Walks up the depositor's referrer chain and stages one bonus per ancestor
//! into the caller's [`LedgerBatch`], so bonuses commit or roll back together
//! with the deposit that triggered them.

use crate::config::{ReferralConfig, StartLevelPolicy};
use ledger_core::{
    LedgerBatch, LedgerStore, TransactionRecord, TransactionType, User, Username,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// One bonus staged for an ancestor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BonusPayout {
    /// Credited ancestor
    pub referrer: User,
    /// Zero-based index into the rate table
    pub level: usize,
    /// Rate applied
    pub rate: Decimal,
    /// Bonus amount
    pub amount: Decimal,
}

/// Why the walk stopped
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CascadeHalt {
    /// Reached an account with no referrer
    EndOfChain,
    /// Every rate level was used
    LevelsExhausted,
    /// A referrer named in the graph has no user record
    MissingReferrer(Username),
    /// The chain revisited an account
    CycleDetected(Username),
}

impl CascadeHalt {
    /// True when the graph itself is broken
    pub fn is_graph_integrity_warning(&self) -> bool {
        matches!(
            self,
            CascadeHalt::MissingReferrer(_) | CascadeHalt::CycleDetected(_)
        )
    }
}

/// Result of one cascade
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CascadeOutcome {
    /// Bonuses in chain order, direct referrer first
    pub payouts: Vec<BonusPayout>,
    /// Stop reason
    pub halt: CascadeHalt,
}

impl CascadeOutcome {
    /// Sum of staged bonuses
    pub fn total(&self) -> Decimal {
        self.payouts.iter().map(|payout| payout.amount).sum()
    }
}

/// Referral bonus calculator
#[derive(Debug, Clone)]
pub struct ReferralCascade {
    rates: Vec<Decimal>,
    start_level: StartLevelPolicy,
}

impl ReferralCascade {
    /// Create from configuration
    pub fn new(config: &ReferralConfig) -> Self {
        Self {
            rates: config.rates.clone(),
            start_level: config.start_level,
        }
    }

    /// Rate table
    pub fn rates(&self) -> &[Decimal] {
        &self.rates
    }

    fn start_level(
        &self,
        store: &dyn LedgerStore,
        referrer: &Username,
    ) -> ledger_core::Result<usize> {
        match self.start_level {
            StartLevelPolicy::AlwaysZero => Ok(0),
            StartLevelPolicy::ResumeFromReferrer => Ok(store
                .get_user_by_username(referrer)?
                .map(|user| user.referral_level as usize)
                .unwrap_or(0)),
        }
    }

    /// Stage bonuses for `depositor`'s confirmed `amount` into `batch`.
    ///
    /// Reads committed state only. Every credited ancestor gets a
    /// `referral_bonus` record and a referral level increment in the batch.
    pub fn distribute(
        &self,
        store: &dyn LedgerStore,
        depositor: &User,
        amount: Decimal,
        batch: &mut LedgerBatch,
    ) -> ledger_core::Result<CascadeOutcome> {
        let mut payouts = Vec::new();

        let Some(direct) = depositor.referrer.clone() else {
            return Ok(CascadeOutcome {
                payouts,
                halt: CascadeHalt::EndOfChain,
            });
        };

        let mut level = self.start_level(store, &direct)?;
        let mut visited: HashSet<Username> = HashSet::from([depositor.username.clone()]);
        let mut current = Some(direct);

        let halt = loop {
            let Some(name) = current.take() else {
                break CascadeHalt::EndOfChain;
            };
            if level >= self.rates.len() {
                break CascadeHalt::LevelsExhausted;
            }
            if !visited.insert(name.clone()) {
                tracing::warn!(
                    user_id = %depositor.user_id,
                    referrer = %name,
                    "Referral chain revisits an account, stopping cascade"
                );
                break CascadeHalt::CycleDetected(name);
            }
            let Some(referrer) = store.get_user_by_username(&name)? else {
                tracing::warn!(
                    user_id = %depositor.user_id,
                    referrer = %name,
                    "Referrer has no user record, stopping cascade"
                );
                break CascadeHalt::MissingReferrer(name);
            };

            let rate = self.rates[level];
            let bonus = amount * rate;

            batch
                .append_transaction(
                    TransactionRecord::new(
                        referrer.user_id,
                        TransactionType::ReferralBonus,
                        bonus,
                        format!("Level {} referral bonus", level + 1),
                    )
                    .with_metadata("level", level + 1)
                    .with_metadata("from_user", &depositor.username)
                    .with_metadata("from_deposit", amount),
                )
                .increment_referral_level(name);

            tracing::info!(
                user_id = %depositor.user_id,
                referrer = %referrer.username,
                level = level + 1,
                %bonus,
                "Referral bonus staged"
            );

            current = referrer.referrer.clone();
            payouts.push(BonusPayout {
                referrer,
                level,
                rate,
                amount: bonus,
            });
            level += 1;
        };

        Ok(CascadeOutcome { payouts, halt })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ledger_core::{BatchOp, MemoryLedger};

    fn register(store: &MemoryLedger, name: &str, referrer: Option<&str>) -> User {
        let user = User::new(
            Username::new(name),
            format!("{}@example.com", name),
            referrer.map(Username::new),
        );
        let mut batch = LedgerBatch::new();
        batch.insert_user(user.clone());
        store.commit(batch).unwrap();
        user
    }

    fn cascade() -> ReferralCascade {
        ReferralCascade::new(&ReferralConfig::default())
    }

    #[test]
    fn test_three_levels() {
        let store = MemoryLedger::new();
        register(&store, "dave", None);
        register(&store, "carol", Some("dave"));
        register(&store, "bob", Some("carol"));
        let alice = register(&store, "alice", Some("bob"));

        let mut batch = LedgerBatch::new();
        let outcome = cascade()
            .distribute(&store, &alice, Decimal::from(1000), &mut batch)
            .unwrap();

        let amounts: Vec<_> = outcome.payouts.iter().map(|p| p.amount).collect();
        assert_eq!(amounts, vec![Decimal::from(80), Decimal::from(50), Decimal::from(20)]);
        assert_eq!(outcome.payouts[0].referrer.username.as_str(), "bob");
        assert_eq!(outcome.halt, CascadeHalt::EndOfChain);
        assert_eq!(outcome.total(), Decimal::from(150));
        assert_eq!(batch.len(), 6);
    }

    #[test]
    fn test_depth_cap() {
        let store = MemoryLedger::new();
        register(&store, "eve", None);
        register(&store, "dave", Some("eve"));
        register(&store, "carol", Some("dave"));
        register(&store, "bob", Some("carol"));
        let alice = register(&store, "alice", Some("bob"));

        let mut batch = LedgerBatch::new();
        let outcome = cascade()
            .distribute(&store, &alice, Decimal::from(1000), &mut batch)
            .unwrap();
        assert_eq!(outcome.payouts.len(), 3);
        assert_eq!(outcome.halt, CascadeHalt::LevelsExhausted);
    }

    #[test]
    fn test_no_referrer() {
        let store = MemoryLedger::new();
        let alice = register(&store, "alice", None);
        let mut batch = LedgerBatch::new();
        let outcome = cascade()
            .distribute(&store, &alice, Decimal::from(1000), &mut batch)
            .unwrap();
        assert!(outcome.payouts.is_empty());
        assert!(batch.is_empty());
    }

    #[test]
    fn test_missing_referrer_stops_walk() {
        let store = MemoryLedger::new();
        register(&store, "bob", Some("ghost"));
        let alice = register(&store, "alice", Some("bob"));

        let mut batch = LedgerBatch::new();
        let outcome = cascade()
            .distribute(&store, &alice, Decimal::from(100), &mut batch)
            .unwrap();
        assert_eq!(outcome.payouts.len(), 1);
        assert_eq!(outcome.halt, CascadeHalt::MissingReferrer(Username::new("ghost")));
        assert!(outcome.halt.is_graph_integrity_warning());
    }

    #[test]
    fn test_cycle_guard() {
        let store = MemoryLedger::new();
        // bob -> carol -> bob
        register(&store, "bob", Some("carol"));
        register(&store, "carol", Some("bob"));
        let alice = register(&store, "alice", Some("bob"));

        let mut batch = LedgerBatch::new();
        let outcome = cascade()
            .distribute(&store, &alice, Decimal::from(100), &mut batch)
            .unwrap();
        assert_eq!(outcome.payouts.len(), 2);
        assert_eq!(outcome.halt, CascadeHalt::CycleDetected(Username::new("bob")));
    }

    #[test]
    fn test_self_referral_is_a_cycle() {
        let store = MemoryLedger::new();
        let alice = register(&store, "alice", Some("alice"));

        let mut batch = LedgerBatch::new();
        let outcome = cascade()
            .distribute(&store, &alice, Decimal::from(100), &mut batch)
            .unwrap();
        assert!(outcome.payouts.is_empty());
        assert_eq!(outcome.halt, CascadeHalt::CycleDetected(Username::new("alice")));
    }

    #[test]
    fn test_resume_from_referrer_level() {
        let store = MemoryLedger::new();
        register(&store, "carol", None);
        register(&store, "bob", Some("carol"));
        let alice = register(&store, "alice", Some("bob"));
        store.increment_referral_level(&Username::new("bob")).unwrap();

        let mut batch = LedgerBatch::new();
        let outcome = cascade()
            .distribute(&store, &alice, Decimal::from(1000), &mut batch)
            .unwrap();
        assert_eq!(outcome.payouts[0].level, 1);
        assert_eq!(outcome.payouts[0].amount, Decimal::from(50));
        assert_eq!(outcome.payouts[1].amount, Decimal::from(20));

        let zero = ReferralCascade::new(&ReferralConfig {
            start_level: StartLevelPolicy::AlwaysZero,
            ..Default::default()
        });
        let mut batch = LedgerBatch::new();
        let outcome = zero
            .distribute(&store, &alice, Decimal::from(1000), &mut batch)
            .unwrap();
        assert_eq!(outcome.payouts[0].amount, Decimal::from(80));
    }

    #[test]
    fn test_bonus_record_metadata() {
        let store = MemoryLedger::new();
        let bob = register(&store, "bob", None);
        let alice = register(&store, "alice", Some("bob"));

        let mut batch = LedgerBatch::new();
        cascade()
            .distribute(&store, &alice, Decimal::new(12345, 2), &mut batch)
            .unwrap();

        let record = batch
            .ops()
            .iter()
            .find_map(|op| match op {
                BatchOp::AppendTransaction(record) => Some(record.clone()),
                _ => None,
            })
            .unwrap();
        assert_eq!(record.user_id, bob.user_id);
        assert_eq!(record.description, "Level 1 referral bonus");
        assert_eq!(record.amount, Decimal::new(98760, 4));
        assert_eq!(record.metadata["level"], "1");
        assert_eq!(record.metadata["from_user"], "alice");
        assert_eq!(record.metadata["from_deposit"], "123.45");
    }
}
