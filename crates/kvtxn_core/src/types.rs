//! Core type definitions for kvtxn.

use kvtxn_codec::Bins;
use kvtxn_store::Key;
use std::collections::HashMap;
use std::fmt;
use uuid::Uuid;

/// Identifier of a transaction.
///
/// Any non-empty string works; the coordinator refuses an empty ID before
/// taking any lock, and generates UUID v4 strings when the caller does not
/// supply one. IDs must be unique across every process sharing a store.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TxnId(String);

impl TxnId {
    /// Creates a transaction ID from a caller-chosen string.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generates a fresh random ID.
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Returns the ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TxnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TxnId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for TxnId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Expected generation per record, for optimistic writes.
pub type Generations = HashMap<Key, u32>;

/// The records a transaction writes, in the order they are locked and
/// applied.
///
/// A `None` value requests deletion of the record. Writing the same key twice
/// replaces the earlier entry in place.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriteSet {
    entries: Vec<(Key, Option<Bins>)>,
}

impl WriteSet {
    /// Creates an empty write set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a write of `bins` to `key`.
    pub fn put(&mut self, key: Key, bins: Bins) -> &mut Self {
        self.insert(key, Some(bins))
    }

    /// Adds a delete of `key`.
    pub fn delete(&mut self, key: Key) -> &mut Self {
        self.insert(key, None)
    }

    /// Builder form of [`WriteSet::put`].
    #[must_use]
    pub fn with_put(mut self, key: Key, bins: Bins) -> Self {
        self.put(key, bins);
        self
    }

    /// Builder form of [`WriteSet::delete`].
    #[must_use]
    pub fn with_delete(mut self, key: Key) -> Self {
        self.delete(key);
        self
    }

    fn insert(&mut self, key: Key, value: Option<Bins>) -> &mut Self {
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((key, value)),
        }
        self
    }

    /// Returns the number of records written.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if nothing is written.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterates over the keys in write order.
    pub fn keys(&self) -> impl Iterator<Item = &Key> {
        self.entries.iter().map(|(k, _)| k)
    }

    /// Iterates over the entries in write order.
    pub fn iter(&self) -> impl Iterator<Item = (&Key, Option<&Bins>)> {
        self.entries.iter().map(|(k, v)| (k, v.as_ref()))
    }
}

impl FromIterator<(Key, Option<Bins>)> for WriteSet {
    fn from_iter<I: IntoIterator<Item = (Key, Option<Bins>)>>(iter: I) -> Self {
        let mut set = WriteSet::new();
        for (key, value) in iter {
            set.insert(key, value);
        }
        set
    }
}
