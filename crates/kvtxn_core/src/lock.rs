//! Advisory record locks.
//!
//! A lock is a record in the lock set whose user key is the identity string
//! of the locked record. Locks are created with a create-only write, so the
//! store guarantees at most one lock per record. The `txnID` bin names the
//! owner; a transaction may re-lock a record it already owns.

use crate::config::Config;
use crate::error::{TxnError, TxnResult};
use crate::identity::lock_key;
use crate::schema::{
    LOCK_TYPE, NAMESPACE_BIN, SET_BIN, TIMESTAMP_BIN, TXN_ID_BIN, TYPE_BIN, USER_KEY_BIN,
};
use crate::types::TxnId;
use kvtxn_codec::{Bins, Value};
use kvtxn_store::{BinPredicate, DeleteOptions, Key, RecordStore, StoreError, WriteMode};
use std::sync::Arc;
use tracing::debug;

fn lock_bins(key: &Key, txn_id: &TxnId, timestamp: i64) -> Bins {
    let mut bins = Bins::new();
    bins.insert(TYPE_BIN.to_string(), Value::from(LOCK_TYPE));
    bins.insert(TXN_ID_BIN.to_string(), Value::from(txn_id.as_str()));
    bins.insert(NAMESPACE_BIN.to_string(), Value::from(key.namespace()));
    bins.insert(SET_BIN.to_string(), Value::from(key.set()));
    bins.insert(
        USER_KEY_BIN.to_string(),
        Value::from(key.user_key().unwrap_or_default()),
    );
    bins.insert(TIMESTAMP_BIN.to_string(), Value::Integer(timestamp));
    bins
}

/// Acquires, releases and inspects record locks.
#[derive(Clone)]
pub struct LockManager {
    store: Arc<dyn RecordStore>,
    config: Config,
}

impl LockManager {
    /// Creates a lock manager over `store`.
    ///
    /// Lock records live in `config.txn_namespace` and are deleted with
    /// `config.durable_delete`.
    pub fn new(store: Arc<dyn RecordStore>, config: Config) -> Self {
        Self { store, config }
    }

    /// Locks `key` for `txn_id`.
    ///
    /// Succeeds if the lock is new or already owned by `txn_id`.
    ///
    /// # Errors
    ///
    /// Returns [`TxnError::LockHeld`] if another transaction owns the lock,
    /// or [`TxnError::TransactionFailure`] if the store fails.
    pub fn create_lock(&self, key: &Key, txn_id: &TxnId) -> TxnResult<()> {
        let lock = lock_key(&self.config.txn_namespace, key)
            .map_err(|e| TxnError::failure(txn_id, e))?;
        let bins = lock_bins(key, txn_id, self.config.now_millis());

        match self.store.put(WriteMode::CreateOnly, &lock, &bins) {
            Ok(()) => {
                debug!(%key, txn = %txn_id, "lock acquired");
                Ok(())
            }
            Err(StoreError::KeyExists(_)) => {
                let owner = self
                    .read_owner(&lock)
                    .map_err(|e| TxnError::failure(txn_id, e))?;
                // A lock released between the two calls still reports LockHeld.
                if owner.as_ref() == Some(txn_id) {
                    debug!(%key, txn = %txn_id, "lock already held by this transaction");
                    Ok(())
                } else {
                    debug!(%key, txn = %txn_id, owner = ?owner, "lock held");
                    Err(TxnError::LockHeld {
                        key: key.clone(),
                        txn_id: txn_id.clone(),
                    })
                }
            }
            Err(e) => Err(TxnError::failure(txn_id, e)),
        }
    }

    /// Releases the lock on `key` if `txn_id` owns it.
    ///
    /// An absent lock, or one owned by another transaction, is left alone.
    ///
    /// # Errors
    ///
    /// Returns [`TxnError::TransactionFailure`] if the store fails.
    pub fn remove_lock(&self, key: &Key, txn_id: &TxnId) -> TxnResult<()> {
        let lock = lock_key(&self.config.txn_namespace, key)
            .map_err(|e| TxnError::failure(txn_id, e))?;
        let options = DeleteOptions::new()
            .when(BinPredicate::equals(TXN_ID_BIN, txn_id.as_str()))
            .durable(self.config.durable_delete);

        let removed = self
            .store
            .delete(&lock, &options)
            .map_err(|e| TxnError::failure(txn_id, e))?;
        debug!(%key, txn = %txn_id, removed, "lock released");
        Ok(())
    }

    /// Releases every lock in `keys` that `txn_id` owns.
    ///
    /// Every key is attempted even if one fails.
    ///
    /// # Errors
    ///
    /// Returns the first failure.
    pub fn remove_locks<'a, I>(&self, keys: I, txn_id: &TxnId) -> TxnResult<()>
    where
        I: IntoIterator<Item = &'a Key>,
    {
        let mut first_error = None;
        for key in keys {
            if let Err(e) = self.remove_lock(key, txn_id) {
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Returns true if any transaction holds a lock on `key`.
    ///
    /// # Errors
    ///
    /// Returns [`TxnError::Store`] if the store fails.
    pub fn lock_exists(&self, key: &Key) -> TxnResult<bool> {
        let lock = lock_key(&self.config.txn_namespace, key)?;
        Ok(self.store.get(&lock)?.is_some())
    }

    /// Returns the transaction holding the lock on `key`.
    ///
    /// # Errors
    ///
    /// Returns [`TxnError::Store`] if the store fails.
    pub fn lock_owner(&self, key: &Key) -> TxnResult<Option<TxnId>> {
        let lock = lock_key(&self.config.txn_namespace, key)?;
        Ok(self.read_owner(&lock)?)
    }

    fn read_owner(&self, lock: &Key) -> Result<Option<TxnId>, StoreError> {
        Ok(self
            .store
            .get(lock)?
            .and_then(|record| record.get_text(TXN_ID_BIN).map(TxnId::new)))
    }
}
