//! Records and request options.

use crate::key::Key;
use kvtxn_codec::{Bins, Value};

/// A stored record: its bins plus the store-maintained generation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    /// Named attribute values.
    pub bins: Bins,
    /// Write counter, 1 after creation and incremented on every write.
    pub generation: u32,
}

impl Record {
    /// Creates a record.
    #[must_use]
    pub fn new(bins: Bins, generation: u32) -> Self {
        Self { bins, generation }
    }

    /// Returns a bin value.
    #[must_use]
    pub fn get(&self, bin: &str) -> Option<&Value> {
        self.bins.get(bin)
    }

    /// Returns a text bin.
    #[must_use]
    pub fn get_text(&self, bin: &str) -> Option<&str> {
        self.get(bin).and_then(Value::as_text)
    }

    /// Returns an integer bin.
    #[must_use]
    pub fn get_integer(&self, bin: &str) -> Option<i64> {
        self.get(bin).and_then(Value::as_integer)
    }
}

/// A record returned by a scan, with the key it was found under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyRecord {
    /// The record's key.
    pub key: Key,
    /// The record, possibly projected.
    pub record: Record,
}

/// How a put treats an existing record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    /// Create or replace unconditionally.
    Upsert,
    /// Fail with `KeyExists` if the record exists.
    CreateOnly,
    /// Fail with `GenerationMismatch` unless the record's generation equals
    /// the given value (0 for an absent record).
    GenerationEquals(u32),
}

/// Equality test on one bin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BinPredicate {
    /// Bin name.
    pub bin: String,
    /// Value the bin must equal.
    pub value: Value,
}

impl BinPredicate {
    /// Creates a predicate `bin == value`.
    pub fn equals(bin: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            bin: bin.into(),
            value: value.into(),
        }
    }

    /// Tests a record against the predicate.
    #[must_use]
    pub fn matches(&self, record: &Record) -> bool {
        record.get(&self.bin) == Some(&self.value)
    }
}

/// Options for a delete.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeleteOptions {
    /// Only delete if the record satisfies this predicate.
    pub predicate: Option<BinPredicate>,
    /// Only delete if the record's generation equals this value.
    pub generation: Option<u32>,
    /// Ask for a delete that survives a cold restart.
    pub durable: bool,
}

impl DeleteOptions {
    /// Unconditional, non-durable delete.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the delete predicate.
    #[must_use]
    pub fn when(mut self, predicate: BinPredicate) -> Self {
        self.predicate = Some(predicate);
        self
    }

    /// Requires the record to be at `generation`.
    #[must_use]
    pub const fn generation(mut self, generation: u32) -> Self {
        self.generation = Some(generation);
        self
    }

    /// Sets durable-delete mode.
    #[must_use]
    pub const fn durable(mut self, value: bool) -> Self {
        self.durable = value;
        self
    }
}

/// Integer range test: `bin < below`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BelowPredicate {
    /// Integer bin name.
    pub bin: String,
    /// Exclusive upper bound.
    pub below: i64,
}

/// A secondary-index query over one set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanQuery {
    /// Namespace to scan.
    pub namespace: String,
    /// Set to scan.
    pub set: String,
    /// Exact-match filter; its bin must be indexed.
    pub filter: BinPredicate,
    /// Optional numeric range predicate.
    pub below: Option<BelowPredicate>,
    /// Bins to return; `None` returns every bin.
    pub projection: Option<Vec<String>>,
}

impl ScanQuery {
    /// Creates a query for records of `set` matching `filter`.
    pub fn new(namespace: impl Into<String>, set: impl Into<String>, filter: BinPredicate) -> Self {
        Self {
            namespace: namespace.into(),
            set: set.into(),
            filter,
            below: None,
            projection: None,
        }
    }

    /// Restricts results to records whose integer `bin` is below `value`.
    #[must_use]
    pub fn below(mut self, bin: impl Into<String>, value: i64) -> Self {
        self.below = Some(BelowPredicate {
            bin: bin.into(),
            below: value,
        });
        self
    }

    /// Returns only the named bins.
    #[must_use]
    pub fn project<I, S>(mut self, bins: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.projection = Some(bins.into_iter().map(Into::into).collect());
        self
    }

    /// Tests a record against the filter and range predicate.
    #[must_use]
    pub fn matches(&self, record: &Record) -> bool {
        if !self.filter.matches(record) {
            return false;
        }
        match &self.below {
            Some(range) => record
                .get_integer(&range.bin)
                .is_some_and(|v| v < range.below),
            None => true,
        }
    }

    /// Applies the projection to a matching record.
    #[must_use]
    pub fn project_record(&self, record: &Record) -> Record {
        match &self.projection {
            Some(names) => Record::new(
                record
                    .bins
                    .iter()
                    .filter(|(name, _)| names.iter().any(|n| n == *name))
                    .map(|(name, value)| (name.clone(), value.clone()))
                    .collect(),
                record.generation,
            ),
            None => record.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kvtxn_codec::bins;

    fn lock_record(ts: i64) -> Record {
        Record::new(
            bins([
                ("type", Value::from("lock")),
                ("txnID", Value::from("t1")),
                ("timestamp", Value::from(ts)),
            ]),
            1,
        )
    }

    #[test]
    fn predicate_matches_exact_value() {
        let rec = lock_record(10);
        assert!(BinPredicate::equals("txnID", "t1").matches(&rec));
        assert!(!BinPredicate::equals("txnID", "t2").matches(&rec));
        assert!(!BinPredicate::equals("missing", "t1").matches(&rec));
    }

    #[test]
    fn query_applies_range() {
        let q = ScanQuery::new("txn", "locks", BinPredicate::equals("type", "lock"))
            .below("timestamp", 100);
        assert!(q.matches(&lock_record(99)));
        assert!(!q.matches(&lock_record(100)));
    }

    #[test]
    fn range_on_missing_bin_does_not_match() {
        let q = ScanQuery::new("txn", "locks", BinPredicate::equals("type", "lock"))
            .below("createdAt", 100);
        assert!(!q.matches(&lock_record(1)));
    }

    #[test]
    fn projection_keeps_named_bins() {
        let q = ScanQuery::new("txn", "locks", BinPredicate::equals("type", "lock"))
            .project(["txnID"]);
        let projected = q.project_record(&lock_record(1));
        assert_eq!(projected.bins.len(), 1);
        assert_eq!(projected.get_text("txnID"), Some("t1"));
    }

    #[test]
    fn delete_options_builder() {
        let opts = DeleteOptions::new()
            .when(BinPredicate::equals("txnID", "t1"))
            .generation(3)
            .durable(true);
        assert!(opts.durable);
        assert!(opts.predicate.is_some());
        assert_eq!(opts.generation, Some(3));
    }
}
