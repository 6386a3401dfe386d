//! Ledger store abstraction
//!
//! Reads go straight to the backend. Writes are collected into a
//! [`LedgerBatch`] and committed as one unit: either every operation in the
//! batch is applied or none is. Preconditions (unique usernames, one pending
//! deposit per user, attest and delete aimed at the pending deposit that is
//! actually stored) are checked at commit time under the backend's writer
//! lock, so two racing batches cannot both consume the same pending deposit
//! and a stale read cannot overwrite a newer submission.

use crate::{
    error::{Error, Result},
    types::{PendingDeposit, TransactionRecord, User, UserId, Username},
};
use rust_decimal::Decimal;
use std::collections::HashMap;
use uuid::Uuid;

/// A single write inside a batch
#[derive(Debug, Clone)]
pub enum BatchOp {
    /// Register a user (username must be unused)
    InsertUser(User),
    /// Bump a user's referral level by one
    IncrementReferralLevel(Username),
    /// Create a pending deposit (none may exist for the user)
    InsertPendingDeposit(PendingDeposit),
    /// Record the attested amount on the stored pending deposit
    AttestPendingDeposit {
        /// Depositing user
        user_id: UserId,
        /// Submission the attestation was made against
        deposit_id: Uuid,
        /// Operator-attested amount
        confirmed_amount: Decimal,
    },
    /// Remove the stored pending deposit
    DeletePendingDeposit {
        /// Depositing user
        user_id: UserId,
        /// When set, the stored deposit must be this submission
        deposit_id: Option<Uuid>,
    },
    /// Append to the transaction log
    AppendTransaction(TransactionRecord),
}

/// Ordered set of writes committed atomically
#[derive(Debug, Clone, Default)]
pub struct LedgerBatch {
    ops: Vec<BatchOp>,
}

impl LedgerBatch {
    /// Create an empty batch
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a user
    pub fn insert_user(&mut self, user: User) -> &mut Self {
        self.ops.push(BatchOp::InsertUser(user));
        self
    }

    /// Increment a user's referral level
    pub fn increment_referral_level(&mut self, username: Username) -> &mut Self {
        self.ops.push(BatchOp::IncrementReferralLevel(username));
        self
    }

    /// Create a pending deposit
    pub fn insert_pending_deposit(&mut self, deposit: PendingDeposit) -> &mut Self {
        self.ops.push(BatchOp::InsertPendingDeposit(deposit));
        self
    }

    /// Attach the attested amount to the submission `deposit` was read from
    pub fn attest_pending_deposit(
        &mut self,
        deposit: &PendingDeposit,
        confirmed_amount: Decimal,
    ) -> &mut Self {
        self.ops.push(BatchOp::AttestPendingDeposit {
            user_id: deposit.user_id,
            deposit_id: deposit.deposit_id,
            confirmed_amount,
        });
        self
    }

    /// Remove whatever pending deposit the user has
    pub fn delete_pending_deposit(&mut self, user_id: UserId) -> &mut Self {
        self.ops.push(BatchOp::DeletePendingDeposit {
            user_id,
            deposit_id: None,
        });
        self
    }

    /// Remove the pending deposit, provided it is still the submission `deposit`
    /// was read from
    pub fn consume_pending_deposit(&mut self, deposit: &PendingDeposit) -> &mut Self {
        self.ops.push(BatchOp::DeletePendingDeposit {
            user_id: deposit.user_id,
            deposit_id: Some(deposit.deposit_id),
        });
        self
    }

    /// Append a transaction record
    pub fn append_transaction(&mut self, record: TransactionRecord) -> &mut Self {
        self.ops.push(BatchOp::AppendTransaction(record));
        self
    }

    /// Operations in submission order
    pub fn ops(&self) -> &[BatchOp] {
        &self.ops
    }

    /// Number of operations
    pub fn len(&self) -> usize {
        self.ops.len()
    }

    /// True when nothing has been queued
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub(crate) fn into_ops(self) -> Vec<BatchOp> {
        self.ops
    }
}

/// Durable record of users, pending deposits and the transaction log
pub trait LedgerStore: Send + Sync {
    /// Look up a user by ID
    fn get_user(&self, user_id: UserId) -> Result<Option<User>>;

    /// Look up a user by username
    fn get_user_by_username(&self, username: &Username) -> Result<Option<User>>;

    /// Users whose referrer is `username`
    fn referrals_of(&self, username: &Username) -> Result<Vec<User>>;

    /// The user's pending deposit, if any
    fn get_pending_deposit(&self, user_id: UserId) -> Result<Option<PendingDeposit>>;

    /// The user's transaction log, oldest first
    fn transactions_for(&self, user_id: UserId) -> Result<Vec<TransactionRecord>>;

    /// Apply every operation in the batch, or none of them
    fn commit(&self, batch: LedgerBatch) -> Result<()>;

    /// Append one transaction record
    fn append_transaction(&self, record: TransactionRecord) -> Result<()> {
        let mut batch = LedgerBatch::new();
        batch.append_transaction(record);
        self.commit(batch)
    }

    /// Increment one user's referral level
    fn increment_referral_level(&self, username: &Username) -> Result<()> {
        let mut batch = LedgerBatch::new();
        batch.increment_referral_level(username.clone());
        self.commit(batch)
    }
}

/// Build a batch with `f` and commit it. Nothing is written if `f` fails.
pub fn run_atomic<S, T, E, F>(store: &S, f: F) -> std::result::Result<T, E>
where
    S: LedgerStore + ?Sized,
    E: From<Error>,
    F: FnOnce(&mut LedgerBatch) -> std::result::Result<T, E>,
{
    let mut batch = LedgerBatch::new();
    let value = f(&mut batch)?;
    if !batch.is_empty() {
        store.commit(batch)?;
    }
    Ok(value)
}

/// Committed state a backend exposes to precondition checks
pub(crate) trait StoreView {
    fn username_taken(&self, username: &Username) -> Result<bool>;
    /// Submission ID of the user's stored pending deposit
    fn pending_deposit_id(&self, user_id: UserId) -> Result<Option<Uuid>>;
}

/// Check every operation against committed state plus earlier operations in
/// the same batch. Must run under the backend's writer lock.
pub(crate) fn check_preconditions(view: &impl StoreView, ops: &[BatchOp]) -> Result<()> {
    let mut usernames: HashMap<&Username, bool> = HashMap::new();
    // Pending deposit per user as of the ops seen so far
    let mut pending: HashMap<UserId, Option<Uuid>> = HashMap::new();

    for op in ops {
        match op {
            BatchOp::InsertUser(user) => {
                if user.username.is_empty() {
                    return Err(Error::InvalidRecord("username must not be empty".to_string()));
                }
                let taken = match usernames.get(&user.username) {
                    Some(taken) => *taken,
                    None => view.username_taken(&user.username)?,
                };
                if taken {
                    return Err(Error::Conflict(format!(
                        "username {} is already taken",
                        user.username
                    )));
                }
                usernames.insert(&user.username, true);
            }
            BatchOp::IncrementReferralLevel(username) => {
                let exists = match usernames.get(username) {
                    Some(exists) => *exists,
                    None => view.username_taken(username)?,
                };
                if !exists {
                    return Err(Error::NotFound(format!("user {}", username)));
                }
            }
            BatchOp::InsertPendingDeposit(deposit) => {
                if deposit.deposit_amount <= Decimal::ZERO {
                    return Err(Error::InvalidRecord(
                        "deposit amount must be positive".to_string(),
                    ));
                }
                if current_pending(view, &pending, deposit.user_id)?.is_some() {
                    return Err(Error::Conflict(format!(
                        "a deposit is already being processed for user {}",
                        deposit.user_id
                    )));
                }
                pending.insert(deposit.user_id, Some(deposit.deposit_id));
            }
            BatchOp::AttestPendingDeposit {
                user_id,
                deposit_id,
                confirmed_amount,
            } => {
                if confirmed_amount.is_sign_negative() {
                    return Err(Error::InvalidRecord(
                        "attested amount must not be negative".to_string(),
                    ));
                }
                match current_pending(view, &pending, *user_id)? {
                    None => {
                        return Err(Error::NotFound(format!(
                            "pending deposit for user {}",
                            user_id
                        )))
                    }
                    Some(stored) if stored != *deposit_id => {
                        return Err(Error::Conflict(format!(
                            "pending deposit {} for user {} was replaced",
                            deposit_id, user_id
                        )))
                    }
                    Some(_) => {}
                }
            }
            BatchOp::DeletePendingDeposit {
                user_id,
                deposit_id,
            } => {
                let stored = current_pending(view, &pending, *user_id)?;
                let matches = match (stored, deposit_id) {
                    (None, _) => false,
                    (Some(_), None) => true,
                    (Some(stored), Some(expected)) => stored == *expected,
                };
                if !matches {
                    return Err(Error::Conflict(format!(
                        "pending deposit for user {} was already consumed",
                        user_id
                    )));
                }
                pending.insert(*user_id, None);
            }
            BatchOp::AppendTransaction(record) => record.validate()?,
        }
    }

    Ok(())
}

fn current_pending(
    view: &impl StoreView,
    staged: &HashMap<UserId, Option<Uuid>>,
    user_id: UserId,
) -> Result<Option<Uuid>> {
    match staged.get(&user_id) {
        Some(staged) => Ok(*staged),
        None => view.pending_deposit_id(user_id),
    }
}
