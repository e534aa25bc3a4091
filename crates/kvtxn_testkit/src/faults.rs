//! Fault injection for store-level failure testing.
//!
//! [`FaultyStore`] wraps an [`InMemoryStore`] and fails writes on demand, so
//! tests can stop a transaction at any point of the protocol.
//!
//! ## Counting Writes
//!
//! For a write set of `n` records, `apply_writes` issues, in order:
//!
//! 1. `n` create-only puts (one lock per record)
//! 2. one put of the transaction record
//! 3. the `n` writes themselves (puts, or deletes for delete intents)
//!
//! so `crash_after_puts(n + 1)` stops a transaction right after its log is
//! durable. A lock put refused because the lock already exists still
//! counts.
//!
//! ## Usage
//!
//! ```rust
//! use kvtxn_testkit::FaultyStore;
//!
//! let store = FaultyStore::new();
//! store.crash_after_puts(3);
//! // ... run a transaction, observe the failure ...
//! store.reset();
//! ```

use kvtxn_codec::Bins;
use kvtxn_store::{
    DeleteOptions, InMemoryStore, Key, KeyRecord, Record, RecordStore, ScanQuery, StoreError,
    StoreResult, WriteMode,
};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

/// A store that fails writes after a configurable number of puts.
#[derive(Debug)]
pub struct FaultyStore {
    inner: InMemoryStore,
    fail_after_puts: AtomicUsize,
    puts: AtomicUsize,
    sticky: AtomicBool,
    crashed: AtomicBool,
    fail_deletes: AtomicBool,
}

impl Default for FaultyStore {
    fn default() -> Self {
        Self::new()
    }
}

impl FaultyStore {
    /// Creates a healthy store.
    pub fn new() -> Self {
        Self::wrap(InMemoryStore::new())
    }

    /// Wraps an existing in-memory store.
    pub fn wrap(inner: InMemoryStore) -> Self {
        Self {
            inner,
            fail_after_puts: AtomicUsize::new(usize::MAX),
            puts: AtomicUsize::new(0),
            sticky: AtomicBool::new(false),
            crashed: AtomicBool::new(false),
            fail_deletes: AtomicBool::new(false),
        }
    }

    /// Lets `puts` more puts succeed, then fails every write until
    /// [`FaultyStore::reset`].
    ///
    /// Models a caller that loses its connection for good.
    pub fn crash_after_puts(&self, puts: usize) {
        self.arm(puts, true);
    }

    /// Lets `puts` more puts succeed, then fails exactly one put.
    pub fn fail_put_once_after(&self, puts: usize) {
        self.arm(puts, false);
    }

    /// Sets whether deletes fail.
    pub fn set_fail_deletes(&self, fail: bool) {
        self.fail_deletes.store(fail, Ordering::SeqCst);
    }

    /// Clears every fault.
    pub fn reset(&self) {
        self.fail_after_puts.store(usize::MAX, Ordering::SeqCst);
        self.puts.store(0, Ordering::SeqCst);
        self.sticky.store(false, Ordering::SeqCst);
        self.crashed.store(false, Ordering::SeqCst);
        self.fail_deletes.store(false, Ordering::SeqCst);
    }

    /// Returns whether a fault has fired.
    pub fn has_crashed(&self) -> bool {
        self.crashed.load(Ordering::SeqCst)
    }

    /// Returns the wrapped store.
    pub fn inner(&self) -> &InMemoryStore {
        &self.inner
    }

    fn arm(&self, puts: usize, sticky: bool) {
        self.puts.store(0, Ordering::SeqCst);
        self.crashed.store(false, Ordering::SeqCst);
        self.sticky.store(sticky, Ordering::SeqCst);
        self.fail_after_puts.store(puts, Ordering::SeqCst);
    }

    fn check_put(&self) -> StoreResult<()> {
        if self.crashed.load(Ordering::SeqCst) && self.sticky.load(Ordering::SeqCst) {
            return Err(StoreError::unavailable("simulated crash"));
        }

        let count = self.puts.fetch_add(1, Ordering::SeqCst);
        if count == self.fail_after_puts.load(Ordering::SeqCst) {
            self.crashed.store(true, Ordering::SeqCst);
            return Err(StoreError::unavailable("simulated write failure"));
        }
        Ok(())
    }

    fn check_delete(&self) -> StoreResult<()> {
        if self.fail_deletes.load(Ordering::SeqCst)
            || (self.crashed.load(Ordering::SeqCst) && self.sticky.load(Ordering::SeqCst))
        {
            return Err(StoreError::unavailable("simulated delete failure"));
        }
        Ok(())
    }
}

impl RecordStore for FaultyStore {
    fn put(&self, mode: WriteMode, key: &Key, bins: &Bins) -> StoreResult<()> {
        self.check_put()?;
        self.inner.put(mode, key, bins)
    }

    fn get(&self, key: &Key) -> StoreResult<Option<Record>> {
        self.inner.get(key)
    }

    fn batch_get(&self, keys: &[Key]) -> StoreResult<Vec<Option<Record>>> {
        self.inner.batch_get(keys)
    }

    fn delete(&self, key: &Key, options: &DeleteOptions) -> StoreResult<bool> {
        self.check_delete()?;
        self.inner.delete(key, options)
    }

    fn scan(&self, query: &ScanQuery) -> StoreResult<Vec<KeyRecord>> {
        self.inner.scan(query)
    }

    fn create_index(&self, namespace: &str, set: &str, bin: &str) -> StoreResult<()> {
        self.inner.create_index(namespace, set, bin)
    }

    fn supports_durable_delete(&self) -> bool {
        self.inner.supports_durable_delete()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kvtxn_codec::bins;

    fn key(user_key: &str) -> Key {
        Key::new("test", "accounts", user_key).unwrap()
    }

    #[test]
    fn healthy_by_default() {
        let store = FaultyStore::new();
        for i in 0..10 {
            store
                .put(WriteMode::Upsert, &key("A"), &bins([("v", i)]))
                .unwrap();
        }
        assert!(!store.has_crashed());
    }

    #[test]
    fn crash_is_sticky() {
        let store = FaultyStore::new();
        store.crash_after_puts(2);

        store.put(WriteMode::Upsert, &key("A"), &bins([("v", 1)])).unwrap();
        store.put(WriteMode::Upsert, &key("B"), &bins([("v", 1)])).unwrap();
        assert!(store.put(WriteMode::Upsert, &key("C"), &bins([("v", 1)])).is_err());
        assert!(store.has_crashed());
        assert!(store.put(WriteMode::Upsert, &key("D"), &bins([("v", 1)])).is_err());
        assert!(store.delete(&key("A"), &DeleteOptions::new()).is_err());

        // reads keep working
        assert!(store.get(&key("A")).unwrap().is_some());

        store.reset();
        store.put(WriteMode::Upsert, &key("C"), &bins([("v", 1)])).unwrap();
        assert_eq!(store.inner().len(), 3);
    }

    #[test]
    fn single_failure() {
        let store = FaultyStore::new();
        store.fail_put_once_after(1);

        store.put(WriteMode::Upsert, &key("A"), &bins([("v", 1)])).unwrap();
        assert!(store.put(WriteMode::Upsert, &key("B"), &bins([("v", 1)])).is_err());
        store.put(WriteMode::Upsert, &key("B"), &bins([("v", 1)])).unwrap();
        assert!(store.delete(&key("A"), &DeleteOptions::new()).unwrap());
    }

    #[test]
    fn failing_deletes() {
        let store = FaultyStore::new();
        store.put(WriteMode::Upsert, &key("A"), &bins([("v", 1)])).unwrap();
        store.set_fail_deletes(true);
        assert!(store.delete(&key("A"), &DeleteOptions::new()).is_err());
        store.set_fail_deletes(false);
        assert!(store.delete(&key("A"), &DeleteOptions::new()).unwrap());
    }
}
