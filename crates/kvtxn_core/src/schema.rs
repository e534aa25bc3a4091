//! Bin names and type tags of the bookkeeping records.

/// Record type tag, indexed for sweeps.
pub const TYPE_BIN: &str = "type";
/// Owning transaction ID.
pub const TXN_ID_BIN: &str = "txnID";
/// Creation time in milliseconds since the Unix epoch.
pub const TIMESTAMP_BIN: &str = "timestamp";
/// Encoded pre-images of a transaction record.
pub const PREVIOUS_VERSIONS_BIN: &str = "previousVersions";
/// Namespace of the locked record.
pub const NAMESPACE_BIN: &str = "namespace";
/// Set of the locked record.
pub const SET_BIN: &str = "set";
/// User key of the locked record, empty if unknown.
pub const USER_KEY_BIN: &str = "userKey";
/// Payload of an index marker.
pub const VALUE_BIN: &str = "value";

/// Type tag of lock records.
pub const LOCK_TYPE: &str = "lock";
/// Type tag of transaction records.
pub const TXN_TYPE: &str = "txn";
/// Type tag of index marker records.
pub const INDEX_CREATED_TYPE: &str = "index-created-record";

/// User key of the marker recording the lock-set index.
pub const LOCK_INDEX_MARKER: &str = "62d020b4-7561-410d-a269-16bc32194409";
/// User key of the marker recording the transaction-set index.
pub const TXN_INDEX_MARKER: &str = "c86304ee-a0fa-48ef-86b2-21040979d0a2";
