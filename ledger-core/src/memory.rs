//! In-memory ledger backend
//!
//! Same atomicity contract as the RocksDB backend, without durability. Used by
//! tests and by embedders that do not need persistence.

use crate::{
    error::{Error, Result},
    store::{check_preconditions, BatchOp, LedgerBatch, LedgerStore, StoreView},
    types::{PendingDeposit, TransactionRecord, User, UserId, Username},
};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use uuid::Uuid;

#[derive(Debug, Default)]
struct State {
    users: HashMap<UserId, User>,
    usernames: HashMap<Username, UserId>,
    pending: HashMap<UserId, PendingDeposit>,
    transactions: Vec<TransactionRecord>,
}

impl StoreView for State {
    fn username_taken(&self, username: &Username) -> Result<bool> {
        Ok(self.usernames.contains_key(username))
    }

    fn pending_deposit_id(&self, user_id: UserId) -> Result<Option<Uuid>> {
        Ok(self.pending.get(&user_id).map(|deposit| deposit.deposit_id))
    }
}

impl State {
    fn apply(&mut self, op: BatchOp) {
        match op {
            BatchOp::InsertUser(user) => {
                self.usernames.insert(user.username.clone(), user.user_id);
                self.users.insert(user.user_id, user);
            }
            BatchOp::IncrementReferralLevel(username) => {
                let user_id = self.usernames.get(&username).copied();
                if let Some(user) = user_id.and_then(|id| self.users.get_mut(&id)) {
                    user.referral_level = user.referral_level.saturating_add(1);
                }
            }
            BatchOp::InsertPendingDeposit(deposit) => {
                self.pending.insert(deposit.user_id, deposit);
            }
            BatchOp::AttestPendingDeposit {
                user_id,
                confirmed_amount,
                ..
            } => {
                if let Some(deposit) = self.pending.get_mut(&user_id) {
                    deposit.confirmed_amount = Some(confirmed_amount);
                }
            }
            BatchOp::DeletePendingDeposit { user_id, .. } => {
                self.pending.remove(&user_id);
            }
            BatchOp::AppendTransaction(record) => self.transactions.push(record),
        }
    }
}

/// Ledger kept entirely in memory
#[derive(Debug, Default)]
pub struct MemoryLedger {
    state: RwLock<State>,
    fail_next_commit: AtomicBool,
}

impl MemoryLedger {
    /// Create an empty ledger
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next commit fail with a storage error (fault injection)
    pub fn fail_next_commit(&self) {
        self.fail_next_commit.store(true, Ordering::SeqCst);
    }

    /// Total number of transaction records across all users
    pub fn transaction_count(&self) -> usize {
        self.state.read().transactions.len()
    }
}

impl LedgerStore for MemoryLedger {
    fn get_user(&self, user_id: UserId) -> Result<Option<User>> {
        Ok(self.state.read().users.get(&user_id).cloned())
    }

    fn get_user_by_username(&self, username: &Username) -> Result<Option<User>> {
        let state = self.state.read();
        Ok(state
            .usernames
            .get(username)
            .and_then(|id| state.users.get(id))
            .cloned())
    }

    fn referrals_of(&self, username: &Username) -> Result<Vec<User>> {
        let state = self.state.read();
        let mut referrals: Vec<User> = state
            .users
            .values()
            .filter(|user| user.referrer.as_ref() == Some(username))
            .cloned()
            .collect();
        referrals.sort_by_key(|user| user.created_at);
        Ok(referrals)
    }

    fn get_pending_deposit(&self, user_id: UserId) -> Result<Option<PendingDeposit>> {
        Ok(self.state.read().pending.get(&user_id).cloned())
    }

    fn transactions_for(&self, user_id: UserId) -> Result<Vec<TransactionRecord>> {
        Ok(self
            .state
            .read()
            .transactions
            .iter()
            .filter(|record| record.user_id == user_id)
            .cloned()
            .collect())
    }

    fn commit(&self, batch: LedgerBatch) -> Result<()> {
        let mut state = self.state.write();

        if self.fail_next_commit.swap(false, Ordering::SeqCst) {
            return Err(Error::Storage("injected commit failure".to_string()));
        }

        check_preconditions(&*state, batch.ops())?;

        let ops = batch.into_ops();
        tracing::debug!(ops = ops.len(), "Committing ledger batch");
        for op in ops {
            state.apply(op);
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::run_atomic;
    use crate::types::TransactionType;
    use rust_decimal::Decimal;

    fn deposit(user_id: UserId) -> PendingDeposit {
        PendingDeposit::new(user_id, Decimal::from(1000), Decimal::new(4, 2), 3_600_000)
    }

    #[test]
    fn test_failed_batch_writes_nothing() {
        let ledger = MemoryLedger::new();
        let user = User::new(Username::new("alice"), "alice@example.com", None);
        let user_id = user.user_id;

        let mut batch = LedgerBatch::new();
        batch
            .insert_user(user)
            .append_transaction(TransactionRecord::new(
                user_id,
                TransactionType::Deposit,
                Decimal::from(10),
                "ok",
            ))
            // No pending deposit exists, so the whole batch is rejected
            .delete_pending_deposit(user_id);

        let err = ledger.commit(batch).unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));
        assert!(ledger.get_user(user_id).unwrap().is_none());
        assert_eq!(ledger.transaction_count(), 0);
    }

    #[test]
    fn test_duplicate_pending_deposit_conflicts() {
        let ledger = MemoryLedger::new();
        let user_id = UserId::new();

        let mut batch = LedgerBatch::new();
        batch.insert_pending_deposit(deposit(user_id));
        ledger.commit(batch).unwrap();

        let mut batch = LedgerBatch::new();
        batch.insert_pending_deposit(deposit(user_id));
        assert!(matches!(ledger.commit(batch), Err(Error::Conflict(_))));
    }

    #[test]
    fn test_attest_targets_one_submission() {
        let ledger = MemoryLedger::new();
        let user_id = UserId::new();
        let first = deposit(user_id);

        let mut batch = LedgerBatch::new();
        batch.insert_pending_deposit(first.clone());
        ledger.commit(batch).unwrap();

        // Confirmed and resubmitted behind the attester's back
        let second = PendingDeposit::new(user_id, Decimal::from(5), Decimal::new(4, 2), 3_600_000);
        let mut batch = LedgerBatch::new();
        batch
            .consume_pending_deposit(&first)
            .insert_pending_deposit(second.clone());
        ledger.commit(batch).unwrap();

        let mut batch = LedgerBatch::new();
        batch.attest_pending_deposit(&first, Decimal::from(1000));
        assert!(matches!(ledger.commit(batch), Err(Error::Conflict(_))));

        let mut batch = LedgerBatch::new();
        batch.consume_pending_deposit(&first);
        assert!(matches!(ledger.commit(batch), Err(Error::Conflict(_))));

        let stored = ledger.get_pending_deposit(user_id).unwrap().unwrap();
        assert_eq!(stored.deposit_id, second.deposit_id);
        assert_eq!(stored.deposit_amount, Decimal::from(5));
        assert_eq!(stored.confirmed_amount, None);

        let mut batch = LedgerBatch::new();
        batch.attest_pending_deposit(&second, Decimal::from(5));
        ledger.commit(batch).unwrap();
        assert!(ledger.get_pending_deposit(user_id).unwrap().unwrap().is_confirmed());
    }

    #[test]
    fn test_increment_referral_level() {
        let ledger = MemoryLedger::new();
        let name = Username::new("bob");

        let mut batch = LedgerBatch::new();
        batch.insert_user(User::new(name.clone(), "bob@example.com", None));
        ledger.commit(batch).unwrap();

        ledger.increment_referral_level(&name).unwrap();
        ledger.increment_referral_level(&name).unwrap();

        let bob = ledger.get_user_by_username(&name).unwrap().unwrap();
        assert_eq!(bob.referral_level, 2);

        let missing = ledger.increment_referral_level(&Username::new("nobody"));
        assert!(matches!(missing, Err(Error::NotFound(_))));
    }

    #[test]
    fn test_injected_failure_rolls_back() {
        let ledger = MemoryLedger::new();
        let user_id = UserId::new();
        ledger.fail_next_commit();

        let result: Result<()> = run_atomic(&ledger, |batch| {
            batch.insert_pending_deposit(deposit(user_id));
            Ok(())
        });
        assert!(matches!(result, Err(Error::Storage(_))));
        assert!(ledger.get_pending_deposit(user_id).unwrap().is_none());

        // Only the next commit fails
        let result: Result<()> = run_atomic(&ledger, |batch| {
            batch.insert_pending_deposit(deposit(user_id));
            Ok(())
        });
        assert!(result.is_ok());
    }

    #[test]
    fn test_referrals_of() {
        let ledger = MemoryLedger::new();
        let carol = Username::new("carol");

        let mut batch = LedgerBatch::new();
        batch
            .insert_user(User::new(carol.clone(), "carol@example.com", None))
            .insert_user(User::new(Username::new("dave"), "d@example.com", Some(carol.clone())))
            .insert_user(User::new(Username::new("erin"), "e@example.com", Some(carol.clone())))
            .insert_user(User::new(Username::new("frank"), "f@example.com", None));
        ledger.commit(batch).unwrap();

        assert_eq!(ledger.referrals_of(&carol).unwrap().len(), 2);
    }
}
