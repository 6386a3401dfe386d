//! Storage layer using RocksDB
//!
//! # Column Families
//!
//! - `users` - User records (key: user_id)
//! - `usernames` - Username index (key: username, value: user_id)
//! - `referrals` - Referral index (key: referrer || '|' || user_id)
//! - `pending` - Pending deposits (key: user_id)
//! - `transactions` - Append-only transaction log (key: user_id || sequence)
//! - `meta` - Store metadata (next transaction sequence)
//!
//! Every [`LedgerBatch`] becomes one RocksDB `WriteBatch`. A single writer lock
//! serializes commits so preconditions are checked against the state the batch
//! is applied to.

use crate::{
    error::{Error, Result},
    store::{check_preconditions, BatchOp, LedgerBatch, LedgerStore, StoreView},
    types::{PendingDeposit, TransactionRecord, User, UserId, Username},
    Config,
};
use parking_lot::Mutex;
use rocksdb::{
    ColumnFamily, ColumnFamilyDescriptor, Direction, IteratorMode, Options, WriteBatch,
    WriteOptions, DB,
};
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

/// Column family names
const CF_USERS: &str = "users";
const CF_USERNAMES: &str = "usernames";
const CF_REFERRALS: &str = "referrals";
const CF_PENDING: &str = "pending";
const CF_TRANSACTIONS: &str = "transactions";
const CF_META: &str = "meta";

const NEXT_SEQ_KEY: &[u8] = b"next_transaction_seq";

/// Ledger persisted in RocksDB
pub struct RocksLedger {
    db: Arc<DB>,
    /// Writer lock guarding the next transaction sequence number
    writer: Mutex<u64>,
    sync_writes: bool,
}

impl std::fmt::Debug for RocksLedger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RocksLedger")
            .field("path", &self.db.path())
            .field("sync_writes", &self.sync_writes)
            .finish()
    }
}

impl RocksLedger {
    /// Open or create database
    pub fn open(config: &Config) -> Result<Self> {
        let path = &config.data_dir;

        std::fs::create_dir_all(path)?;

        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);

        db_opts.set_write_buffer_size(config.rocksdb.write_buffer_size_mb * 1024 * 1024);
        db_opts.set_max_write_buffer_number(config.rocksdb.max_write_buffer_number);
        db_opts.set_max_background_jobs(config.rocksdb.max_background_jobs);

        if config.rocksdb.enable_statistics {
            db_opts.enable_statistics();
        }

        let cf_descriptors = vec![
            ColumnFamilyDescriptor::new(CF_USERS, Self::cf_options_records()),
            ColumnFamilyDescriptor::new(CF_USERNAMES, Self::cf_options_indices()),
            ColumnFamilyDescriptor::new(CF_REFERRALS, Self::cf_options_indices()),
            ColumnFamilyDescriptor::new(CF_PENDING, Self::cf_options_records()),
            ColumnFamilyDescriptor::new(CF_TRANSACTIONS, Self::cf_options_log()),
            ColumnFamilyDescriptor::new(CF_META, Options::default()),
        ];

        let db = DB::open_cf_descriptors(&db_opts, path, cf_descriptors)?;

        let next_seq = {
            let cf = db
                .cf_handle(CF_META)
                .ok_or_else(|| Error::Storage(format!("Column family {} not found", CF_META)))?;
            match db.get_cf(cf, NEXT_SEQ_KEY)? {
                Some(bytes) => {
                    let raw: [u8; 8] = bytes.as_slice().try_into().map_err(|_| {
                        Error::Storage("corrupt transaction sequence".to_string())
                    })?;
                    u64::from_be_bytes(raw)
                }
                None => 0,
            }
        };

        tracing::info!(path = ?path, next_seq, "Opened ledger RocksDB");

        Ok(Self {
            db: Arc::new(db),
            writer: Mutex::new(next_seq),
            sync_writes: config.rocksdb.sync_writes,
        })
    }

    // Column family options

    fn cf_options_records() -> Options {
        let mut opts = Options::default();
        // Records are read on every request, use LZ4 for speed
        opts.set_compression_type(rocksdb::DBCompressionType::Lz4);
        opts
    }

    fn cf_options_indices() -> Options {
        let mut opts = Options::default();
        opts.set_compression_type(rocksdb::DBCompressionType::Lz4);
        let mut block_opts = rocksdb::BlockBasedOptions::default();
        block_opts.set_bloom_filter(10.0, false);
        opts.set_block_based_table_factory(&block_opts);
        opts
    }

    fn cf_options_log() -> Options {
        let mut opts = Options::default();
        opts.set_compression_type(rocksdb::DBCompressionType::Zstd);
        opts.set_bottommost_compression_type(rocksdb::DBCompressionType::Zstd);
        opts
    }

    fn cf_handle(&self, name: &str) -> Result<&ColumnFamily> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| Error::Storage(format!("Column family {} not found", name)))
    }

    fn get_record<T: serde::de::DeserializeOwned>(&self, cf: &str, key: &[u8]) -> Result<Option<T>> {
        let cf = self.cf_handle(cf)?;
        match self.db.get_cf(cf, key)? {
            Some(value) => Ok(Some(bincode::deserialize(&value)?)),
            None => Ok(None),
        }
    }

    /// Keys in `cf` starting with `prefix`, in key order
    fn scan_prefix(&self, cf: &str, prefix: &[u8]) -> Result<Vec<(Box<[u8]>, Box<[u8]>)>> {
        let cf = self.cf_handle(cf)?;
        let iter = self
            .db
            .iterator_cf(cf, IteratorMode::From(prefix, Direction::Forward));

        let mut entries = Vec::new();
        for item in iter {
            let (key, value) = item?;
            if !key.starts_with(prefix) {
                break;
            }
            entries.push((key, value));
        }
        Ok(entries)
    }

    // Index key helpers

    fn referral_prefix(referrer: &Username) -> Vec<u8> {
        let mut key = referrer.as_str().as_bytes().to_vec();
        key.push(b'|');
        key
    }

    fn referral_key(referrer: &Username, user_id: UserId) -> Vec<u8> {
        let mut key = Self::referral_prefix(referrer);
        key.extend_from_slice(user_id.as_bytes());
        key
    }

    fn transaction_key(user_id: UserId, seq: u64) -> Vec<u8> {
        let mut key = user_id.as_bytes().to_vec();
        key.extend_from_slice(&seq.to_be_bytes());
        key
    }

    /// Close database (graceful shutdown)
    pub fn close(self) -> Result<()> {
        self.db.flush()?;
        drop(self.db);
        tracing::info!("Ledger RocksDB closed");
        Ok(())
    }
}

impl StoreView for RocksLedger {
    fn username_taken(&self, username: &Username) -> Result<bool> {
        let cf = self.cf_handle(CF_USERNAMES)?;
        Ok(self.db.get_cf(cf, username.as_str().as_bytes())?.is_some())
    }

    fn pending_deposit_id(&self, user_id: UserId) -> Result<Option<Uuid>> {
        let deposit: Option<PendingDeposit> = self.get_record(CF_PENDING, user_id.as_bytes())?;
        Ok(deposit.map(|deposit| deposit.deposit_id))
    }
}

impl LedgerStore for RocksLedger {
    fn get_user(&self, user_id: UserId) -> Result<Option<User>> {
        self.get_record(CF_USERS, user_id.as_bytes())
    }

    fn get_user_by_username(&self, username: &Username) -> Result<Option<User>> {
        let cf = self.cf_handle(CF_USERNAMES)?;
        let Some(raw) = self.db.get_cf(cf, username.as_str().as_bytes())? else {
            return Ok(None);
        };
        let bytes: [u8; 16] = raw
            .as_slice()
            .try_into()
            .map_err(|_| Error::Storage(format!("corrupt username index for {}", username)))?;
        self.get_user(UserId::from_uuid(Uuid::from_bytes(bytes)))
    }

    fn referrals_of(&self, username: &Username) -> Result<Vec<User>> {
        let prefix = Self::referral_prefix(username);
        let mut referrals = Vec::new();
        for (key, _) in self.scan_prefix(CF_REFERRALS, &prefix)? {
            let bytes: [u8; 16] = <[u8; 16]>::try_from(&key[prefix.len()..])
                .map_err(|_| Error::Storage(format!("corrupt referral index for {}", username)))?;
            if let Some(user) = self.get_user(UserId::from_uuid(Uuid::from_bytes(bytes)))? {
                referrals.push(user);
            }
        }
        referrals.sort_by_key(|user| user.created_at);
        Ok(referrals)
    }

    fn get_pending_deposit(&self, user_id: UserId) -> Result<Option<PendingDeposit>> {
        self.get_record(CF_PENDING, user_id.as_bytes())
    }

    fn transactions_for(&self, user_id: UserId) -> Result<Vec<TransactionRecord>> {
        self.scan_prefix(CF_TRANSACTIONS, user_id.as_bytes())?
            .into_iter()
            .map(|(_, value)| bincode::deserialize(&value).map_err(Error::from))
            .collect()
    }

    fn commit(&self, batch: LedgerBatch) -> Result<()> {
        let mut next_seq = self.writer.lock();

        check_preconditions(self, batch.ops())?;

        let cf_usernames = self.cf_handle(CF_USERNAMES)?;
        let cf_referrals = self.cf_handle(CF_REFERRALS)?;
        let cf_pending = self.cf_handle(CF_PENDING)?;
        let cf_transactions = self.cf_handle(CF_TRANSACTIONS)?;

        let mut write_batch = WriteBatch::default();
        let mut touched_users: HashMap<Username, User> = HashMap::new();
        let mut touched_pending: HashMap<UserId, Option<PendingDeposit>> = HashMap::new();
        let mut seq = *next_seq;

        for op in batch.into_ops() {
            match op {
                BatchOp::InsertUser(user) => {
                    write_batch.put_cf(
                        cf_usernames,
                        user.username.as_str().as_bytes(),
                        user.user_id.as_bytes(),
                    );
                    if let Some(referrer) = &user.referrer {
                        write_batch.put_cf(
                            cf_referrals,
                            Self::referral_key(referrer, user.user_id),
                            b"",
                        );
                    }
                    touched_users.insert(user.username.clone(), user);
                }
                BatchOp::IncrementReferralLevel(username) => {
                    let mut user = match touched_users.remove(&username) {
                        Some(user) => user,
                        None => self
                            .get_user_by_username(&username)?
                            .ok_or_else(|| Error::NotFound(format!("user {}", username)))?,
                    };
                    user.referral_level = user.referral_level.saturating_add(1);
                    touched_users.insert(username, user);
                }
                BatchOp::InsertPendingDeposit(deposit) => {
                    touched_pending.insert(deposit.user_id, Some(deposit));
                }
                BatchOp::AttestPendingDeposit {
                    user_id,
                    confirmed_amount,
                    ..
                } => {
                    let staged = match touched_pending.remove(&user_id) {
                        Some(staged) => staged,
                        None => self.get_pending_deposit(user_id)?,
                    };
                    let mut deposit = staged.ok_or_else(|| {
                        Error::NotFound(format!("pending deposit for user {}", user_id))
                    })?;
                    deposit.confirmed_amount = Some(confirmed_amount);
                    touched_pending.insert(user_id, Some(deposit));
                }
                BatchOp::DeletePendingDeposit { user_id, .. } => {
                    touched_pending.insert(user_id, None);
                }
                BatchOp::AppendTransaction(record) => {
                    write_batch.put_cf(
                        cf_transactions,
                        Self::transaction_key(record.user_id, seq),
                        bincode::serialize(&record)?,
                    );
                    seq += 1;
                }
            }
        }

        for (user_id, deposit) in &touched_pending {
            match deposit {
                Some(deposit) => write_batch.put_cf(
                    cf_pending,
                    user_id.as_bytes(),
                    bincode::serialize(deposit)?,
                ),
                None => write_batch.delete_cf(cf_pending, user_id.as_bytes()),
            }
        }

        let cf_users = self.cf_handle(CF_USERS)?;
        for user in touched_users.values() {
            write_batch.put_cf(cf_users, user.user_id.as_bytes(), bincode::serialize(user)?);
        }

        let cf_meta = self.cf_handle(CF_META)?;
        write_batch.put_cf(cf_meta, NEXT_SEQ_KEY, seq.to_be_bytes());

        let mut write_opts = WriteOptions::default();
        write_opts.set_sync(self.sync_writes);

        // Atomic commit
        self.db.write_opt(write_batch, &write_opts)?;
        *next_seq = seq;

        tracing::debug!(next_seq = seq, "Ledger batch committed");

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TransactionType;
    use rust_decimal::Decimal;
    use tempfile::TempDir;

    fn test_config() -> (Config, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let mut config = Config::default();
        config.data_dir = temp_dir.path().to_path_buf();
        config.rocksdb.sync_writes = false;
        (config, temp_dir)
    }

    #[test]
    fn test_storage_open() {
        let (config, _temp) = test_config();
        let storage = RocksLedger::open(&config).unwrap();
        assert!(storage.db.cf_handle(CF_USERS).is_some());
        assert!(storage.db.cf_handle(CF_TRANSACTIONS).is_some());
    }

    #[test]
    fn test_user_roundtrip_and_referrals() {
        let (config, _temp) = test_config();
        let storage = RocksLedger::open(&config).unwrap();

        let bob = User::new(Username::new("Bob"), "bob@example.com", None);
        let alice = User::new(
            Username::new("alice"),
            "alice@example.com",
            Some(bob.username.clone()),
        );

        let mut batch = LedgerBatch::new();
        batch.insert_user(bob.clone()).insert_user(alice.clone());
        storage.commit(batch).unwrap();

        let found = storage
            .get_user_by_username(&Username::new("BOB"))
            .unwrap()
            .unwrap();
        assert_eq!(found.user_id, bob.user_id);

        let referrals = storage.referrals_of(&bob.username).unwrap();
        assert_eq!(referrals.len(), 1);
        assert_eq!(referrals[0].user_id, alice.user_id);
    }

    #[test]
    fn test_increment_within_batch_after_insert() {
        let (config, _temp) = test_config();
        let storage = RocksLedger::open(&config).unwrap();

        let bob = User::new(Username::new("bob"), "bob@example.com", None);
        let mut batch = LedgerBatch::new();
        batch
            .insert_user(bob.clone())
            .increment_referral_level(bob.username.clone())
            .increment_referral_level(bob.username.clone());
        storage.commit(batch).unwrap();

        let stored = storage.get_user(bob.user_id).unwrap().unwrap();
        assert_eq!(stored.referral_level, 2);
    }

    #[test]
    fn test_pending_deposit_lifecycle() {
        let (config, _temp) = test_config();
        let storage = RocksLedger::open(&config).unwrap();
        let user_id = UserId::new();

        let deposit =
            PendingDeposit::new(user_id, Decimal::new(100000, 2), Decimal::new(4, 2), 3_600_000);
        let mut batch = LedgerBatch::new();
        batch.insert_pending_deposit(deposit.clone());
        storage.commit(batch).unwrap();

        let stored = storage.get_pending_deposit(user_id).unwrap().unwrap();
        assert_eq!(stored.deposit_amount, deposit.deposit_amount);
        assert_eq!(stored.deposit_id, deposit.deposit_id);

        let mut batch = LedgerBatch::new();
        batch.attest_pending_deposit(&deposit, Decimal::new(100000, 2));
        storage.commit(batch).unwrap();
        assert!(storage.get_pending_deposit(user_id).unwrap().unwrap().is_confirmed());

        // An attestation against another submission is rejected
        let other =
            PendingDeposit::new(user_id, Decimal::new(500, 2), Decimal::new(4, 2), 3_600_000);
        let mut batch = LedgerBatch::new();
        batch.attest_pending_deposit(&other, Decimal::new(500, 2));
        assert!(matches!(storage.commit(batch), Err(Error::Conflict(_))));
        assert_eq!(
            storage.get_pending_deposit(user_id).unwrap().unwrap().confirmed_amount,
            Some(Decimal::new(100000, 2))
        );

        let mut batch = LedgerBatch::new();
        batch.delete_pending_deposit(user_id);
        storage.commit(batch).unwrap();
        assert!(storage.get_pending_deposit(user_id).unwrap().is_none());

        // Deleting twice is a conflict, not a silent no-op
        let mut batch = LedgerBatch::new();
        batch.delete_pending_deposit(user_id);
        assert!(matches!(storage.commit(batch), Err(Error::Conflict(_))));
    }

    #[test]
    fn test_transactions_ordered_and_scoped() {
        let (config, _temp) = test_config();
        let storage = RocksLedger::open(&config).unwrap();
        let alice = UserId::new();
        let bob = UserId::new();

        for i in 1..=3 {
            storage
                .append_transaction(TransactionRecord::new(
                    alice,
                    TransactionType::Deposit,
                    Decimal::from(i),
                    format!("deposit {}", i),
                ))
                .unwrap();
        }
        storage
            .append_transaction(TransactionRecord::new(
                bob,
                TransactionType::Withdrawal,
                Decimal::from(7),
                "withdrawal",
            ))
            .unwrap();

        let history = storage.transactions_for(alice).unwrap();
        let amounts: Vec<_> = history.iter().map(|r| r.amount).collect();
        assert_eq!(amounts, vec![Decimal::from(1), Decimal::from(2), Decimal::from(3)]);
        assert_eq!(storage.transactions_for(bob).unwrap().len(), 1);
    }

    #[test]
    fn test_sequence_survives_reopen() {
        let (config, _temp) = test_config();
        let user_id = UserId::new();

        {
            let storage = RocksLedger::open(&config).unwrap();
            storage
                .append_transaction(TransactionRecord::new(
                    user_id,
                    TransactionType::Deposit,
                    Decimal::from(1),
                    "first",
                ))
                .unwrap();
            storage.close().unwrap();
        }

        let storage = RocksLedger::open(&config).unwrap();
        storage
            .append_transaction(TransactionRecord::new(
                user_id,
                TransactionType::Withdrawal,
                Decimal::from(2),
                "second",
            ))
            .unwrap();

        let history = storage.transactions_for(user_id).unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].description, "first");
        assert_eq!(history[1].description, "second");
    }
}
