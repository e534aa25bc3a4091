//! Transaction coordinator.

use crate::config::Config;
use crate::error::{TxnError, TxnResult};
use crate::identity::{self, txn_key};
use crate::lock::LockManager;
use crate::log::{PreImages, TxnRecord};
use crate::state::TxnPhase;
use crate::types::{Generations, TxnId, WriteSet};
use kvtxn_store::{DeleteOptions, Key, RecordStore, StoreError, WriteMode};
use std::sync::Arc;
use tracing::{debug, warn};

/// Runs multi-record transactions over a single-record-atomic store.
///
/// The coordinator provides:
/// - Exclusive advisory locks on every written record
/// - A write-ahead transaction record holding pre-images
/// - All-or-nothing application with rollback on failure
/// - Rollback of abandoned transactions by ID
///
/// ## Protocol
///
/// 1. Lock every record of the write set, in write-set order
/// 2. Read the current bins and persist them in the transaction record
/// 3. Apply the writes
/// 4. Delete the transaction record (the commit point) and release the locks
///
/// If step 3 fails, the pre-images are written back before the transaction
/// record is deleted. If the caller dies after step 2, the transaction
/// record remains and [`crate::RecoveryManager`] rolls it back once it
/// expires.
///
/// The coordinator holds no state between calls beyond its configuration;
/// any number of coordinators in any number of processes may share a store.
pub struct Coordinator {
    store: Arc<dyn RecordStore>,
    config: Config,
    locks: LockManager,
}

impl Coordinator {
    /// Creates a coordinator.
    ///
    /// If durable deletes are requested but the store cannot provide them,
    /// the coordinator logs a warning and continues without them.
    ///
    /// # Errors
    ///
    /// Returns [`TxnError::Store`] if `config.txn_namespace` is not a valid
    /// namespace.
    pub fn new(store: Arc<dyn RecordStore>, config: Config) -> TxnResult<Self> {
        Key::new(config.txn_namespace.as_str(), identity::TRANSACTION_SET, "")?;

        let mut config = config;
        if config.durable_delete && !store.supports_durable_delete() {
            warn!("durable delete requested but not supported by the store, continuing without it");
            config.durable_delete = false;
        }
        if !config.durable_delete {
            warn!(
                "durable delete disabled: deleted lock and transaction records may reappear after a store cold restart"
            );
        }

        let locks = LockManager::new(Arc::clone(&store), config.clone());
        Ok(Self {
            store,
            config,
            locks,
        })
    }

    /// Returns the effective configuration.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Returns the underlying store.
    #[must_use]
    pub fn store(&self) -> &Arc<dyn RecordStore> {
        &self.store
    }

    /// Returns the lock manager.
    #[must_use]
    pub fn locks(&self) -> &LockManager {
        &self.locks
    }

    /// Applies `write_set` atomically under a generated transaction ID.
    ///
    /// # Errors
    ///
    /// See [`Coordinator::apply_writes`].
    pub fn put(&self, write_set: &WriteSet) -> TxnResult<TxnId> {
        self.put_with_generations(write_set, &Generations::new())
    }

    /// Applies `write_set` atomically under a generated transaction ID,
    /// conditioning writes on `generations`.
    ///
    /// # Errors
    ///
    /// See [`Coordinator::apply_writes`].
    pub fn put_with_generations(
        &self,
        write_set: &WriteSet,
        generations: &Generations,
    ) -> TxnResult<TxnId> {
        let txn_id = TxnId::generate();
        self.apply_writes(write_set, &txn_id, generations)?;
        Ok(txn_id)
    }

    /// Applies `write_set` atomically as transaction `txn_id`.
    ///
    /// Records with an entry in `generations` are written only if their
    /// current generation matches. Locks `txn_id` already holds on records of
    /// the write set are reused and released at the end.
    ///
    /// # Errors
    ///
    /// - [`TxnError::Store`] if `txn_id` is empty; nothing was written
    /// - [`TxnError::LockHeld`] if another transaction holds a lock; nothing
    ///   was written
    /// - [`TxnError::GenerationConflict`] if a generation check failed; every
    ///   record was restored
    /// - [`TxnError::TransactionFailure`] for any other failure; every record
    ///   was restored, unless restoration itself failed, in which case the
    ///   transaction record is left for recovery
    pub fn apply_writes(
        &self,
        write_set: &WriteSet,
        txn_id: &TxnId,
        generations: &Generations,
    ) -> TxnResult<()> {
        if write_set.is_empty() {
            return Ok(());
        }
        txn_key(&self.config.txn_namespace, txn_id)?;
        let keys: Vec<Key> = write_set.keys().cloned().collect();

        let mut lifecycle = Lifecycle::start(txn_id);
        for key in &keys {
            if let Err(err) = self.locks.create_lock(key, txn_id) {
                self.release_quietly(&keys, txn_id);
                return Err(err);
            }
        }

        let pre_images = match self.write_log(&keys, txn_id) {
            Ok(pre_images) => pre_images,
            Err(err) => {
                self.release_quietly(&keys, txn_id);
                return Err(err);
            }
        };
        lifecycle.enter(TxnPhase::Logged);

        lifecycle.enter(TxnPhase::Applying);
        let outcome = self
            .apply(write_set, txn_id, generations)
            .and_then(|()| self.delete_log(txn_id));

        match outcome {
            Ok(()) => {
                lifecycle.enter(TxnPhase::Committed);
                self.release_quietly(&keys, txn_id);
                Ok(())
            }
            Err(err) => {
                debug!(txn = %txn_id, error = %err, "write failed, rolling back");
                self.restore(&pre_images, txn_id)?;
                self.finish(&keys, txn_id)?;
                lifecycle.enter(TxnPhase::RolledBack);
                Err(err)
            }
        }
    }

    /// Rolls back the incomplete transaction `txn_id`.
    ///
    /// The transaction record is locked under a fresh ID for the duration so
    /// that concurrent rollbacks of the same transaction exclude each other.
    /// A transaction that already finished is left alone.
    ///
    /// # Errors
    ///
    /// Returns [`TxnError::LockHeld`] if another actor is rolling back the
    /// same transaction, or [`TxnError::TransactionFailure`] if the record
    /// cannot be read or restoration fails.
    pub fn rollback_by_id(&self, txn_id: &TxnId) -> TxnResult<()> {
        let recovery_id = TxnId::generate();
        let record_key =
            txn_key(&self.config.txn_namespace, txn_id).map_err(|e| TxnError::failure(txn_id, e))?;

        self.locks.create_lock(&record_key, &recovery_id)?;
        debug!(txn = %txn_id, recovery = %recovery_id, "rolling back by id");

        let result = self.rollback_logged(&record_key, txn_id);
        let released = self.locks.remove_lock(&record_key, &recovery_id);
        result?;
        released
    }

    /// Returns true if a transaction record exists for `txn_id`.
    ///
    /// # Errors
    ///
    /// Returns [`TxnError::Store`] if the store fails.
    pub fn is_incomplete(&self, txn_id: &TxnId) -> TxnResult<bool> {
        let record_key = txn_key(&self.config.txn_namespace, txn_id)?;
        Ok(self.store.get(&record_key)?.is_some())
    }

    fn rollback_logged(&self, record_key: &Key, txn_id: &TxnId) -> TxnResult<()> {
        let Some(record) = self
            .store
            .get(record_key)
            .map_err(|e| TxnError::failure(txn_id, e))?
        else {
            debug!(txn = %txn_id, "transaction already finished");
            return Ok(());
        };

        let mut lifecycle = Lifecycle::abandoned(txn_id);
        let logged = TxnRecord::from_bins(&record.bins).map_err(|c| TxnError::failure(txn_id, c))?;
        let keys: Vec<Key> = logged
            .pre_images
            .entries()
            .map_err(|e| TxnError::failure(txn_id, e))?
            .into_iter()
            .map(|(key, _)| key)
            .collect();

        self.restore(&logged.pre_images, txn_id)?;
        self.finish(&keys, txn_id)?;
        lifecycle.enter(TxnPhase::RolledBack);
        Ok(())
    }

    fn write_log(&self, keys: &[Key], txn_id: &TxnId) -> TxnResult<PreImages> {
        let current = self
            .store
            .batch_get(keys)
            .map_err(|e| TxnError::failure(txn_id, e))?;

        let mut pre_images = PreImages::new();
        for (key, record) in keys.iter().zip(current) {
            pre_images.insert(key, record.map(|r| r.bins));
        }

        let logged = TxnRecord {
            txn_id: txn_id.clone(),
            timestamp: self.config.now_millis(),
            pre_images,
        };
        let bins = logged.to_bins().map_err(|e| TxnError::failure(txn_id, e))?;
        let record_key =
            txn_key(&self.config.txn_namespace, txn_id).map_err(|e| TxnError::failure(txn_id, e))?;
        self.store
            .put(WriteMode::Upsert, &record_key, &bins)
            .map_err(|e| TxnError::failure(txn_id, e))?;

        Ok(logged.pre_images)
    }

    fn apply(&self, write_set: &WriteSet, txn_id: &TxnId, generations: &Generations) -> TxnResult<()> {
        for (key, bins) in write_set.iter() {
            let expected = generations.get(key).copied();
            let result = match bins {
                Some(bins) => {
                    let mode = expected.map_or(WriteMode::Upsert, WriteMode::GenerationEquals);
                    self.store.put(mode, key, bins)
                }
                None => {
                    let mut options = DeleteOptions::new().durable(self.config.durable_delete);
                    if let Some(generation) = expected {
                        options = options.generation(generation);
                    }
                    self.store.delete(key, &options).map(|_| ())
                }
            };

            match result {
                Ok(()) => debug!(%key, txn = %txn_id, "write applied"),
                Err(StoreError::GenerationMismatch { .. }) => {
                    return Err(TxnError::GenerationConflict {
                        key: key.clone(),
                        txn_id: txn_id.clone(),
                    })
                }
                Err(e) => return Err(TxnError::failure(txn_id, e)),
            }
        }
        Ok(())
    }

    /// Writes every pre-image back; absent pre-images become deletes.
    fn restore(&self, pre_images: &PreImages, txn_id: &TxnId) -> TxnResult<()> {
        let entries = pre_images
            .entries()
            .map_err(|e| TxnError::failure(txn_id, e))?;

        for (key, bins) in entries {
            let restored = match bins {
                Some(bins) => self.store.put(WriteMode::Upsert, &key, bins),
                None => self
                    .store
                    .delete(&key, &DeleteOptions::new().durable(self.config.durable_delete))
                    .map(|_| ()),
            };
            if let Err(e) = restored {
                warn!(%key, txn = %txn_id, error = %e, "restoring pre-image failed, leaving transaction for recovery");
                return Err(TxnError::failure(txn_id, e));
            }
        }
        Ok(())
    }

    fn delete_log(&self, txn_id: &TxnId) -> TxnResult<()> {
        let record_key =
            txn_key(&self.config.txn_namespace, txn_id).map_err(|e| TxnError::failure(txn_id, e))?;
        self.store
            .delete(&record_key, &DeleteOptions::new().durable(self.config.durable_delete))
            .map_err(|e| TxnError::failure(txn_id, e))?;
        Ok(())
    }

    /// Deletes the transaction record, then releases the locks.
    fn finish(&self, keys: &[Key], txn_id: &TxnId) -> TxnResult<()> {
        self.delete_log(txn_id)?;
        self.release_quietly(keys, txn_id);
        Ok(())
    }

    /// Releases locks; failures leave orphans for the orphan sweep.
    fn release_quietly(&self, keys: &[Key], txn_id: &TxnId) {
        if let Err(e) = self.locks.remove_locks(keys, txn_id) {
            warn!(txn = %txn_id, error = %e, "failed to release locks");
        }
    }
}

/// Phase of the attempt running on this thread.
struct Lifecycle<'a> {
    txn_id: &'a TxnId,
    phase: TxnPhase,
}

impl<'a> Lifecycle<'a> {
    fn start(txn_id: &'a TxnId) -> Self {
        Self::at(txn_id, TxnPhase::Locking)
    }

    /// Recovery from a transaction record; the owner's phase is unknown.
    fn abandoned(txn_id: &'a TxnId) -> Self {
        Self::at(txn_id, TxnPhase::Abandoned)
    }

    fn at(txn_id: &'a TxnId, phase: TxnPhase) -> Self {
        debug!(txn = %txn_id, phase = %phase, "transaction phase");
        Self { txn_id, phase }
    }

    fn enter(&mut self, next: TxnPhase) {
        debug_assert!(
            self.phase.can_transition_to(next),
            "illegal transition {} -> {}",
            self.phase,
            next
        );
        self.phase = next;
        debug!(txn = %self.txn_id, phase = %next, "transaction phase");
    }

    #[cfg(test)]
    fn phase(&self) -> TxnPhase {
        self.phase
    }
}
