//! Store capability contract.

use crate::error::StoreResult;
use crate::key::Key;
use crate::record::{DeleteOptions, KeyRecord, Record, ScanQuery, WriteMode};
use kvtxn_codec::Bins;

/// The operations kvtxn needs from a key-value store.
///
/// Each call is atomic for the single record it touches; nothing here spans
/// records. Multi-record atomicity is built on top by `kvtxn_core`, using
/// [`WriteMode::CreateOnly`] as the only cross-process compare-and-swap.
///
/// # Invariants
///
/// - `put` with `CreateOnly` fails with `KeyExists` when the record exists
/// - `put` with `GenerationEquals(n)` fails with `GenerationMismatch` unless
///   the stored generation is `n`
/// - `batch_get` returns one entry per input key, in input order
/// - `delete` reports `Ok(false)` for an absent record or a predicate that
///   does not match
/// - `scan` requires an index on the filter bin
///
/// # Implementors
///
/// - [`crate::InMemoryStore`] - For tests and embedded use
pub trait RecordStore: Send + Sync {
    /// Writes `bins` under `key` according to `mode`.
    ///
    /// The written bins replace the record's previous bins.
    ///
    /// # Errors
    ///
    /// Returns `KeyExists` or `GenerationMismatch` when the mode's condition
    /// fails, or a transport error.
    fn put(&self, mode: WriteMode, key: &Key, bins: &Bins) -> StoreResult<()>;

    /// Reads one record.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be reached.
    fn get(&self, key: &Key) -> StoreResult<Option<Record>>;

    /// Reads several records in one round trip.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be reached.
    fn batch_get(&self, keys: &[Key]) -> StoreResult<Vec<Option<Record>>>;

    /// Deletes one record, optionally only when a predicate holds.
    ///
    /// Returns whether a record was removed.
    ///
    /// # Errors
    ///
    /// Returns `GenerationMismatch` if a generation was given and differs,
    /// `DurableDeleteUnsupported` if a durable delete was requested from a
    /// store without that capability, or a transport error.
    fn delete(&self, key: &Key, options: &DeleteOptions) -> StoreResult<bool>;

    /// Runs a secondary-index query.
    ///
    /// # Errors
    ///
    /// Returns `IndexNotFound` if the filter bin is not indexed.
    fn scan(&self, query: &ScanQuery) -> StoreResult<Vec<KeyRecord>>;

    /// Creates a secondary index on `bin` for records in `namespace.set`.
    ///
    /// # Errors
    ///
    /// Returns `IndexExists` if the index is already present.
    fn create_index(&self, namespace: &str, set: &str, bin: &str) -> StoreResult<()>;

    /// Whether deletes can be made durable across cold restarts.
    fn supports_durable_delete(&self) -> bool;
}
