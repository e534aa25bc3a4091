//! Test fixtures and harness helpers.
//!
//! Provides a coordinator, recovery manager and manual clock wired to one
//! store, plus tracing setup for tests.

use kvtxn_codec::{bins, Bins};
use kvtxn_core::{Config, Coordinator, ManualClock, RecoveryManager, TxnResult};
use kvtxn_store::{InMemoryStore, Key, RecordStore, StoreResult, WriteMode};
use std::sync::{Arc, Once};
use tracing_subscriber::EnvFilter;

use crate::faults::FaultyStore;

/// Namespace used for user records in tests.
pub const TEST_NAMESPACE: &str = "test";

/// Set used for user records in tests.
pub const TEST_SET: &str = "test-set";

/// Clock reading of a fresh harness, in milliseconds.
pub const START_MILLIS: i64 = 1_700_000_000_000;

static TRACING: Once = Once::new();

/// Installs a `tracing` subscriber filtered by `RUST_LOG` (default `warn`).
///
/// Safe to call from every test; only the first call installs anything.
pub fn init_tracing() {
    TRACING.call_once(|| {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .try_init();
    });
}

/// Key of a user record in the test set.
pub fn test_key(user_key: &str) -> Key {
    Key::new(TEST_NAMESPACE, TEST_SET, user_key).expect("test namespace is valid")
}

/// Bins holding a single integer `value` bin.
pub fn value_bins(value: i64) -> Bins {
    bins([("value", value)])
}

/// A coordinator and recovery manager over one store, driven by a manual
/// clock.
pub struct TestHarness<S: RecordStore + 'static = InMemoryStore> {
    /// The store under test.
    pub store: Arc<S>,
    /// The clock stamped into locks and transaction records.
    pub clock: Arc<ManualClock>,
    /// Coordinator over `store`.
    pub coordinator: Arc<Coordinator>,
    /// Recovery manager sharing `coordinator`; already set up.
    pub recovery: RecoveryManager,
}

impl TestHarness<InMemoryStore> {
    /// Creates a harness over a fresh in-memory store.
    pub fn memory() -> Self {
        Self::with_store(Arc::new(InMemoryStore::new()), Config::new())
    }
}

impl TestHarness<FaultyStore> {
    /// Creates a harness over a fresh fault-injecting store.
    pub fn faulty() -> Self {
        Self::with_store(Arc::new(FaultyStore::new()), Config::new())
    }
}

impl<S: RecordStore + 'static> TestHarness<S> {
    /// Creates a harness over `store`, replacing the clock in `config` with
    /// a manual one starting at [`START_MILLIS`].
    ///
    /// # Panics
    ///
    /// Panics if the coordinator cannot be built or setup fails.
    pub fn with_store(store: Arc<S>, config: Config) -> Self {
        init_tracing();
        let clock = Arc::new(ManualClock::new(START_MILLIS));
        let config = config.clock(clock.clone());
        let coordinator = Arc::new(
            Coordinator::new(store.clone(), config).expect("coordinator config is valid"),
        );
        let recovery = RecoveryManager::new(Arc::clone(&coordinator));
        recovery.setup().expect("index setup succeeds");
        Self {
            store,
            clock,
            coordinator,
            recovery,
        }
    }

    /// Moves the clock past the expiry threshold.
    pub fn expire(&self) {
        let expiry = i64::try_from(self.coordinator.config().expiry_ms).unwrap_or(i64::MAX);
        self.clock.advance(expiry.saturating_add(1));
    }

    /// Writes `bins` to `key` outside any transaction.
    ///
    /// # Errors
    ///
    /// Returns the store's error.
    pub fn seed(&self, key: &Key, bins: &Bins) -> StoreResult<()> {
        self.store.put(WriteMode::Upsert, key, bins)
    }

    /// Reads the bins of `key`.
    ///
    /// # Errors
    ///
    /// Returns the store's error.
    pub fn bins_of(&self, key: &Key) -> StoreResult<Option<Bins>> {
        Ok(self.store.get(key)?.map(|r| r.bins))
    }

    /// Reads the `value` bin of `key`.
    ///
    /// # Errors
    ///
    /// Returns the store's error.
    pub fn value_of(&self, key: &Key) -> StoreResult<Option<i64>> {
        Ok(self.store.get(key)?.and_then(|r| r.get_integer("value")))
    }

    /// Returns true if no lock exists on any of `keys`.
    ///
    /// # Errors
    ///
    /// Returns the lock manager's error.
    pub fn unlocked<'a>(&self, keys: impl IntoIterator<Item = &'a Key>) -> TxnResult<bool> {
        for key in keys {
            if self.coordinator.locks().lock_exists(key)? {
                return Ok(false);
            }
        }
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kvtxn_core::WriteSet;

    #[test]
    fn harness_is_set_up() {
        let h = TestHarness::memory();
        // two index markers
        assert_eq!(h.store.len(), 2);
        assert_eq!(h.recovery.sweep_orphan_locks().unwrap(), 0);
    }

    #[test]
    fn harness_runs_transactions() {
        let h = TestHarness::memory();
        h.seed(&test_key("A"), &value_bins(1)).unwrap();

        let ws = WriteSet::new().with_put(test_key("A"), value_bins(2));
        h.coordinator.put(&ws).unwrap();
        assert_eq!(h.value_of(&test_key("A")).unwrap(), Some(2));
        assert!(h.unlocked([test_key("A")].iter()).unwrap());
    }

    #[test]
    fn expire_moves_past_threshold() {
        let h = TestHarness::memory();
        h.expire();
        assert_eq!(h.coordinator.config().expiry_cutoff(), START_MILLIS + 1);
    }

    #[test]
    fn init_tracing_twice() {
        init_tracing();
        init_tracing();
    }
}
