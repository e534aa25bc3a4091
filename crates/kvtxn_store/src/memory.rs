//! In-memory record store.

use crate::backend::RecordStore;
use crate::error::{StoreError, StoreResult};
use crate::key::Key;
use crate::record::{DeleteOptions, KeyRecord, Record, ScanQuery, WriteMode};
use kvtxn_codec::Bins;
use parking_lot::RwLock;
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct IndexSpec {
    namespace: String,
    set: String,
    bin: String,
}

#[derive(Debug, Default)]
struct State {
    records: BTreeMap<Key, Record>,
    indexes: BTreeSet<IndexSpec>,
}

/// An in-memory record store.
///
/// This store keeps every record in memory and is suitable for:
/// - Unit and integration tests
/// - Single-process embedding where durability is not required
///
/// Each operation takes the internal lock once, so every call is atomic for
/// the record it touches, matching the single-record guarantee of a
/// distributed store.
///
/// # Example
///
/// ```rust
/// use kvtxn_codec::{bins, Value};
/// use kvtxn_store::{InMemoryStore, Key, RecordStore, WriteMode};
///
/// let store = InMemoryStore::new();
/// let key = Key::new("test", "accounts", "A").unwrap();
/// store.put(WriteMode::Upsert, &key, &bins([("balance", 1000)])).unwrap();
///
/// let record = store.get(&key).unwrap().unwrap();
/// assert_eq!(record.generation, 1);
/// assert_eq!(record.get("balance"), Some(&Value::Integer(1000)));
/// ```
#[derive(Debug)]
pub struct InMemoryStore {
    state: RwLock<State>,
    durable_delete: bool,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStore {
    /// Creates an empty store that accepts durable deletes.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: RwLock::new(State::default()),
            durable_delete: true,
        }
    }

    /// Creates an empty store that rejects durable deletes.
    ///
    /// Useful for exercising the coordinator's non-durable fallback.
    #[must_use]
    pub fn without_durable_delete() -> Self {
        Self {
            state: RwLock::new(State::default()),
            durable_delete: false,
        }
    }

    /// Returns the number of stored records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.state.read().records.len()
    }

    /// Returns true if no records are stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.state.read().records.is_empty()
    }

    /// Returns the number of records in `namespace.set`.
    #[must_use]
    pub fn count_in(&self, namespace: &str, set: &str) -> usize {
        self.state
            .read()
            .records
            .keys()
            .filter(|k| k.namespace() == namespace && k.set() == set)
            .count()
    }

    /// Returns true if an index exists on `namespace.set.bin`.
    #[must_use]
    pub fn has_index(&self, namespace: &str, set: &str, bin: &str) -> bool {
        self.state.read().indexes.contains(&IndexSpec {
            namespace: namespace.to_string(),
            set: set.to_string(),
            bin: bin.to_string(),
        })
    }

    /// Returns a copy of every record, ordered by key.
    #[must_use]
    pub fn snapshot(&self) -> Vec<KeyRecord> {
        self.state
            .read()
            .records
            .iter()
            .map(|(key, record)| KeyRecord {
                key: key.clone(),
                record: record.clone(),
            })
            .collect()
    }

    /// Removes every record and index.
    pub fn clear(&self) {
        let mut state = self.state.write();
        state.records.clear();
        state.indexes.clear();
    }
}

impl RecordStore for InMemoryStore {
    fn put(&self, mode: WriteMode, key: &Key, bins: &Bins) -> StoreResult<()> {
        let mut state = self.state.write();
        let current = state.records.get(key).map_or(0, |r| r.generation);

        match mode {
            WriteMode::Upsert => {}
            WriteMode::CreateOnly => {
                if current != 0 {
                    return Err(StoreError::KeyExists(key.clone()));
                }
            }
            WriteMode::GenerationEquals(expected) => {
                if expected != current {
                    return Err(StoreError::GenerationMismatch {
                        expected,
                        actual: current,
                    });
                }
            }
        }

        state
            .records
            .insert(key.clone(), Record::new(bins.clone(), current.wrapping_add(1).max(1)));
        Ok(())
    }

    fn get(&self, key: &Key) -> StoreResult<Option<Record>> {
        Ok(self.state.read().records.get(key).cloned())
    }

    fn batch_get(&self, keys: &[Key]) -> StoreResult<Vec<Option<Record>>> {
        let state = self.state.read();
        Ok(keys.iter().map(|k| state.records.get(k).cloned()).collect())
    }

    fn delete(&self, key: &Key, options: &DeleteOptions) -> StoreResult<bool> {
        if options.durable && !self.durable_delete {
            return Err(StoreError::DurableDeleteUnsupported);
        }

        let mut state = self.state.write();
        if let Some(expected) = options.generation {
            let actual = state.records.get(key).map_or(0, |r| r.generation);
            if expected != actual {
                return Err(StoreError::GenerationMismatch { expected, actual });
            }
        }

        let matches = match (state.records.get(key), &options.predicate) {
            (None, _) => false,
            (Some(_), None) => true,
            (Some(record), Some(predicate)) => predicate.matches(record),
        };

        if matches {
            state.records.remove(key);
        }
        Ok(matches)
    }

    fn scan(&self, query: &ScanQuery) -> StoreResult<Vec<KeyRecord>> {
        let state = self.state.read();
        let spec = IndexSpec {
            namespace: query.namespace.clone(),
            set: query.set.clone(),
            bin: query.filter.bin.clone(),
        };
        if !state.indexes.contains(&spec) {
            return Err(StoreError::IndexNotFound {
                namespace: spec.namespace,
                set: spec.set,
                bin: spec.bin,
            });
        }

        Ok(state
            .records
            .iter()
            .filter(|(key, _)| key.namespace() == query.namespace && key.set() == query.set)
            .filter(|(_, record)| query.matches(record))
            .map(|(key, record)| KeyRecord {
                key: key.clone(),
                record: query.project_record(record),
            })
            .collect())
    }

    fn create_index(&self, namespace: &str, set: &str, bin: &str) -> StoreResult<()> {
        let spec = IndexSpec {
            namespace: namespace.to_string(),
            set: set.to_string(),
            bin: bin.to_string(),
        };
        let mut state = self.state.write();
        if !state.indexes.insert(spec) {
            return Err(StoreError::IndexExists {
                namespace: namespace.to_string(),
                set: set.to_string(),
                bin: bin.to_string(),
            });
        }
        Ok(())
    }

    fn supports_durable_delete(&self) -> bool {
        self.durable_delete
    }
}
