//! Recovery of abandoned transactions and locks.
//!
//! A caller that dies mid-transaction leaves a transaction record, its
//! locks, or both. Nothing inside the coordinator notices; the embedding
//! application schedules the sweeps here (for example every few seconds)
//! from one or more processes.

use crate::coordinator::Coordinator;
use crate::error::{TxnError, TxnResult};
use crate::identity::{INDEX_MARKER_SET, LOCK_SET, TRANSACTION_SET};
use crate::schema::{
    INDEX_CREATED_TYPE, LOCK_INDEX_MARKER, LOCK_TYPE, TIMESTAMP_BIN, TXN_ID_BIN,
    TXN_INDEX_MARKER, TXN_TYPE, TYPE_BIN, VALUE_BIN,
};
use crate::types::TxnId;
use kvtxn_codec::bins;
use kvtxn_store::{BinPredicate, DeleteOptions, Key, RecordStore, ScanQuery, WriteMode};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Outcome of [`RecoveryManager::sweep_expired_transactions`].
#[derive(Debug, Default)]
pub struct SweepReport {
    rolled_back: Vec<TxnId>,
    skipped: Vec<TxnId>,
    failed: Vec<(TxnId, TxnError)>,
}

impl SweepReport {
    /// Number of transactions rolled back.
    #[must_use]
    pub fn rolled_back(&self) -> usize {
        self.rolled_back.len()
    }

    /// Transactions rolled back by this sweep.
    #[must_use]
    pub fn rolled_back_ids(&self) -> &[TxnId] {
        &self.rolled_back
    }

    /// Transactions another actor was already rolling back.
    #[must_use]
    pub fn skipped_ids(&self) -> &[TxnId] {
        &self.skipped
    }

    /// Transactions whose rollback failed, with the error. Their records
    /// stay in place.
    #[must_use]
    pub fn failed(&self) -> &[(TxnId, TxnError)] {
        &self.failed
    }

    /// Returns true if the sweep found nothing to do.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rolled_back.is_empty() && self.skipped.is_empty() && self.failed.is_empty()
    }
}

/// Finds and resolves expired transactions and orphaned locks.
pub struct RecoveryManager {
    coordinator: Arc<Coordinator>,
}

impl RecoveryManager {
    /// Creates a recovery manager sharing `coordinator`'s store and
    /// configuration.
    ///
    /// Call [`RecoveryManager::setup`] once before sweeping.
    pub fn new(coordinator: Arc<Coordinator>) -> Self {
        Self { coordinator }
    }

    /// Returns the coordinator used for rollbacks.
    #[must_use]
    pub fn coordinator(&self) -> &Arc<Coordinator> {
        &self.coordinator
    }

    /// Rolls back every transaction older than the expiry threshold.
    ///
    /// A transaction that another actor is rolling back concurrently is
    /// skipped and reported. A transaction whose rollback fails, for example
    /// because its record is corrupt, is reported as failed and the sweep
    /// moves on to the next one.
    ///
    /// # Errors
    ///
    /// Returns [`TxnError::Store`] if the scan fails.
    pub fn sweep_expired_transactions(&self) -> TxnResult<SweepReport> {
        let config = self.coordinator.config();
        let query = ScanQuery::new(
            config.txn_namespace.as_str(),
            TRANSACTION_SET,
            BinPredicate::equals(TYPE_BIN, TXN_TYPE),
        )
        .below(TIMESTAMP_BIN, config.expiry_cutoff())
        .project([TXN_ID_BIN]);

        let mut report = SweepReport::default();
        for found in self.coordinator.store().scan(&query)? {
            let Some(txn_id) = found.record.get_text(TXN_ID_BIN).map(TxnId::new) else {
                warn!(key = %found.key, "transaction record without txnID");
                continue;
            };
            match self.coordinator.rollback_by_id(&txn_id) {
                Ok(()) => report.rolled_back.push(txn_id),
                Err(TxnError::LockHeld { .. }) => {
                    debug!(txn = %txn_id, "rollback already in progress elsewhere");
                    report.skipped.push(txn_id);
                }
                Err(e) => {
                    warn!(txn = %txn_id, error = %e, "rollback of expired transaction failed");
                    report.failed.push((txn_id, e));
                }
            }
        }

        info!(
            rolled_back = report.rolled_back(),
            skipped = report.skipped.len(),
            failed = report.failed.len(),
            "expired transaction sweep finished"
        );
        Ok(report)
    }

    /// Deletes expired locks whose owner has no transaction record.
    ///
    /// Returns the number of locks deleted. Locks younger than the expiry
    /// threshold are kept even if their owner is unknown, since the owner may
    /// still be acquiring locks.
    ///
    /// # Errors
    ///
    /// Returns [`TxnError::Store`] if a scan or delete fails.
    pub fn sweep_orphan_locks(&self) -> TxnResult<usize> {
        let config = self.coordinator.config();
        let store = self.coordinator.store();

        let live_query = ScanQuery::new(
            config.txn_namespace.as_str(),
            TRANSACTION_SET,
            BinPredicate::equals(TYPE_BIN, TXN_TYPE),
        )
        .project([TXN_ID_BIN]);
        let live: HashSet<String> = store
            .scan(&live_query)?
            .into_iter()
            .filter_map(|found| found.record.get_text(TXN_ID_BIN).map(str::to_string))
            .collect();

        let lock_query = ScanQuery::new(
            config.txn_namespace.as_str(),
            LOCK_SET,
            BinPredicate::equals(TYPE_BIN, LOCK_TYPE),
        )
        .below(TIMESTAMP_BIN, config.expiry_cutoff())
        .project([TXN_ID_BIN]);

        let mut removed = 0;
        for found in store.scan(&lock_query)? {
            let Some(owner) = found.record.get_text(TXN_ID_BIN) else {
                continue;
            };
            if live.contains(owner) {
                continue;
            }
            // Conditioned on the owner, so a lock re-created meanwhile survives.
            let options = DeleteOptions::new()
                .when(BinPredicate::equals(TXN_ID_BIN, owner))
                .durable(config.durable_delete);
            if store.delete(&found.key, &options)? {
                debug!(lock = %found.key, owner, "orphan lock removed");
                removed += 1;
            }
        }

        info!(removed, "orphan lock sweep finished");
        Ok(removed)
    }

    /// Ensures the secondary indexes the sweeps rely on exist.
    ///
    /// Each index is recorded by a marker record so later calls skip it. An
    /// index created concurrently by another process counts as created.
    ///
    /// # Errors
    ///
    /// Returns [`TxnError::Store`] if an index or marker cannot be written.
    pub fn setup(&self) -> TxnResult<()> {
        let namespace = self.coordinator.config().txn_namespace.as_str();
        let store = self.coordinator.store();

        for (set, kind, marker) in [
            (LOCK_SET, LOCK_TYPE, LOCK_INDEX_MARKER),
            (TRANSACTION_SET, TXN_TYPE, TXN_INDEX_MARKER),
        ] {
            let marker_key = Key::new(namespace, INDEX_MARKER_SET, marker)?;
            if store.get(&marker_key)?.is_some() {
                debug!(set, "index already recorded");
                continue;
            }

            match store.create_index(namespace, set, TYPE_BIN) {
                Ok(()) => info!(namespace, set, bin = TYPE_BIN, "index created"),
                Err(e) if e.is_index_exists() => {
                    debug!(namespace, set, "index created by another process");
                }
                Err(e) => return Err(e.into()),
            }

            store.put(
                WriteMode::Upsert,
                &marker_key,
                &bins([(TYPE_BIN, INDEX_CREATED_TYPE), (VALUE_BIN, kind)]),
            )?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Clock, Config, ManualClock};
    use crate::error::ErrorKind;
    use crate::identity::txn_key;
    use crate::log::{PreImages, TxnRecord};
    use kvtxn_codec::{Bins, Value};
    use kvtxn_store::InMemoryStore;

    struct Fixture {
        store: Arc<InMemoryStore>,
        clock: Arc<ManualClock>,
        recovery: RecoveryManager,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(InMemoryStore::new());
        let clock = Arc::new(ManualClock::new(100_000));
        let config = Config::new().expiry_ms(30_000).clock(clock.clone());
        let coordinator = Arc::new(Coordinator::new(store.clone(), config).unwrap());
        let recovery = RecoveryManager::new(coordinator);
        recovery.setup().unwrap();
        Fixture {
            store,
            clock,
            recovery,
        }
    }

    fn key(user_key: &str) -> Key {
        Key::new("test", "accounts", user_key).unwrap()
    }

    /// Leaves a transaction as a crashed caller would: locked, logged and
    /// half-written.
    fn abandon(f: &Fixture, txn: &TxnId, original: i64) {
        abandon_record(f, txn, &key("A"), original);
    }

    fn abandon_record(f: &Fixture, txn: &TxnId, record: &Key, original: i64) {
        let coordinator = f.recovery.coordinator();
        f.store
            .put(WriteMode::Upsert, record, &bins([("balance", original)]))
            .unwrap();
        coordinator.locks().create_lock(record, txn).unwrap();

        let mut pre = PreImages::new();
        pre.insert(record, Some(bins([("balance", original)])));
        let logged = TxnRecord {
            txn_id: txn.clone(),
            timestamp: f.clock.now_millis(),
            pre_images: pre,
        };
        f.store
            .put(
                WriteMode::Upsert,
                &txn_key("txn", txn).unwrap(),
                &logged.to_bins().unwrap(),
            )
            .unwrap();
        f.store
            .put(WriteMode::Upsert, record, &bins([("balance", 0)]))
            .unwrap();
    }

    fn balance(f: &Fixture) -> Option<i64> {
        f.store
            .get(&key("A"))
            .unwrap()
            .and_then(|r| r.get_integer("balance"))
    }

    #[test]
    fn young_transactions_are_left_alone() {
        let f = fixture();
        let txn = TxnId::new("crashed");
        abandon(&f, &txn, 1000);

        f.clock.advance(29_999);
        let report = f.recovery.sweep_expired_transactions().unwrap();
        assert_eq!(report.rolled_back(), 0);
        assert!(f.recovery.coordinator().is_incomplete(&txn).unwrap());
        assert_eq!(balance(&f), Some(0));
    }

    #[test]
    fn expired_transactions_are_rolled_back() {
        let f = fixture();
        let txn = TxnId::new("crashed");
        abandon(&f, &txn, 1000);

        f.clock.advance(30_001);
        let report = f.recovery.sweep_expired_transactions().unwrap();
        assert_eq!(report.rolled_back(), 1);
        assert_eq!(report.rolled_back_ids(), &[txn.clone()]);
        assert!(!f.recovery.coordinator().is_incomplete(&txn).unwrap());
        assert_eq!(balance(&f), Some(1000));
        assert!(!f
            .recovery
            .coordinator()
            .locks()
            .lock_exists(&key("A"))
            .unwrap());
    }

    #[test]
    fn sweep_skips_transactions_being_recovered() {
        let f = fixture();
        let txn = TxnId::new("crashed");
        abandon(&f, &txn, 1000);
        let record_key = txn_key("txn", &txn).unwrap();
        f.recovery
            .coordinator()
            .locks()
            .create_lock(&record_key, &TxnId::new("other-recoverer"))
            .unwrap();

        f.clock.advance(60_000);
        let report = f.recovery.sweep_expired_transactions().unwrap();
        assert_eq!(report.rolled_back(), 0);
        assert_eq!(report.skipped_ids(), &[txn.clone()]);
        assert!(f.recovery.coordinator().is_incomplete(&txn).unwrap());
    }

    #[test]
    fn corrupt_record_does_not_block_other_rollbacks() {
        let f = fixture();
        let corrupt = TxnId::new("corrupt");
        f.store
            .put(
                WriteMode::Upsert,
                &txn_key("txn", &corrupt).unwrap(),
                &bins([
                    (TYPE_BIN, Value::from(TXN_TYPE)),
                    (TXN_ID_BIN, Value::from(corrupt.as_str())),
                    (TIMESTAMP_BIN, Value::from(f.clock.now_millis())),
                ]),
            )
            .unwrap();

        let good: Vec<TxnId> = (0..8).map(|i| TxnId::new(format!("good-{i}"))).collect();
        for (i, txn) in good.iter().enumerate() {
            abandon_record(&f, txn, &key(&format!("R{i}")), 100);
        }

        f.clock.advance(60_000);
        for _ in 0..2 {
            let report = f.recovery.sweep_expired_transactions().unwrap();
            assert_eq!(report.failed().len(), 1);
            assert_eq!(report.failed()[0].0, corrupt);
            assert_eq!(report.failed()[0].1.kind(), ErrorKind::TransactionFailure);
            assert!(f.recovery.coordinator().is_incomplete(&corrupt).unwrap());
        }

        let coordinator = f.recovery.coordinator();
        for (i, txn) in good.iter().enumerate() {
            assert!(!coordinator.is_incomplete(txn).unwrap());
            let record = key(&format!("R{i}"));
            assert!(!coordinator.locks().lock_exists(&record).unwrap());
            assert_eq!(
                f.store.get(&record).unwrap().and_then(|r| r.get_integer("balance")),
                Some(100)
            );
        }
        assert_eq!(f.store.count_in("txn", LOCK_SET), 0);
    }

    #[test]
    fn orphan_locks_are_removed_after_expiry() {
        let f = fixture();
        let locks = f.recovery.coordinator().locks();
        locks.create_lock(&key("A"), &TxnId::new("dead")).unwrap();

        assert_eq!(f.recovery.sweep_orphan_locks().unwrap(), 0);
        assert!(locks.lock_exists(&key("A")).unwrap());

        f.clock.advance(30_001);
        assert_eq!(f.recovery.sweep_orphan_locks().unwrap(), 1);
        assert!(!locks.lock_exists(&key("A")).unwrap());
    }

    #[test]
    fn locks_of_live_transactions_are_kept() {
        let f = fixture();
        let txn = TxnId::new("slow");
        abandon(&f, &txn, 1000);

        f.clock.advance(60_000);
        assert_eq!(f.recovery.sweep_orphan_locks().unwrap(), 0);
        assert!(f
            .recovery
            .coordinator()
            .locks()
            .lock_exists(&key("A"))
            .unwrap());
    }

    #[test]
    fn setup_is_idempotent() {
        let f = fixture();
        let before = f.store.len();
        f.recovery.setup().unwrap();
        assert_eq!(f.store.len(), before);
        assert_eq!(f.store.count_in("txn", INDEX_MARKER_SET), 2);
        assert!(f.store.has_index("txn", LOCK_SET, TYPE_BIN));
        assert!(f.store.has_index("txn", TRANSACTION_SET, TYPE_BIN));
    }

    #[test]
    fn setup_tolerates_foreign_index() {
        let store = Arc::new(InMemoryStore::new());
        store.create_index("txn", LOCK_SET, TYPE_BIN).unwrap();
        let coordinator = Arc::new(Coordinator::new(store.clone(), Config::new()).unwrap());
        let recovery = RecoveryManager::new(coordinator);

        recovery.setup().unwrap();
        let marker = Key::new("txn", INDEX_MARKER_SET, LOCK_INDEX_MARKER).unwrap();
        let record = store.get(&marker).unwrap().unwrap();
        assert_eq!(record.get_text(TYPE_BIN), Some(INDEX_CREATED_TYPE));
        assert_eq!(record.get_text(VALUE_BIN), Some("lock"));
    }

    #[test]
    fn sweeps_need_setup() {
        let store = Arc::new(InMemoryStore::new());
        let coordinator = Arc::new(Coordinator::new(store, Config::new()).unwrap());
        let recovery = RecoveryManager::new(coordinator);
        assert!(matches!(
            recovery.sweep_expired_transactions(),
            Err(TxnError::Store(_))
        ));
    }

    #[test]
    fn record_without_txn_id_is_ignored() {
        let f = fixture();
        let stray = Key::new("txn", TRANSACTION_SET, "stray").unwrap();
        let mut without_id = Bins::new();
        without_id.insert(TYPE_BIN.to_string(), TXN_TYPE.into());
        without_id.insert(TIMESTAMP_BIN.to_string(), 0.into());
        f.store.put(WriteMode::Upsert, &stray, &without_id).unwrap();

        let report = f.recovery.sweep_expired_transactions().unwrap();
        assert!(report.is_empty());
    }
}
