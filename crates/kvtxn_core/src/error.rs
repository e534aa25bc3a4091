//! Error types for transaction operations.

use crate::types::TxnId;
use kvtxn_codec::CodecError;
use kvtxn_store::{Key, StoreError};
use thiserror::Error;

/// Result type for transaction operations.
pub type TxnResult<T> = Result<T, TxnError>;

/// Errors that can occur while running, rolling back or recovering
/// transactions.
#[derive(Debug, Error)]
pub enum TxnError {
    /// Another transaction owns the lock on a record.
    #[error("{key} is locked by another transaction (requested by {txn_id})")]
    LockHeld {
        /// The contended record.
        key: Key,
        /// The transaction that asked for the lock.
        txn_id: TxnId,
    },

    /// A generation-conditioned write found a different generation.
    #[error("generation check failed on {key} in transaction {txn_id}")]
    GenerationConflict {
        /// The first record whose generation did not match.
        key: Key,
        /// The transaction that was rolled back.
        txn_id: TxnId,
    },

    /// The transaction failed mid-protocol.
    #[error("transaction {txn_id} failed: {source}")]
    TransactionFailure {
        /// The failed transaction.
        txn_id: TxnId,
        /// Underlying failure.
        source: FailureCause,
    },

    /// An identity string could not be decoded.
    #[error("key format error: {0}")]
    KeyFormat(#[from] KeyFormatError),

    /// Store failure outside of a transaction.
    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

/// What went wrong inside a [`TxnError::TransactionFailure`].
#[derive(Debug, Error)]
pub enum FailureCause {
    /// The store rejected or failed a request.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// A transaction record could not be encoded or decoded.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// A transaction record is missing required attributes.
    #[error("corrupt transaction record: {message}")]
    CorruptLog {
        /// Description of the corruption.
        message: String,
    },
}

impl FailureCause {
    /// Creates a corrupt log cause.
    pub fn corrupt_log(message: impl Into<String>) -> Self {
        Self::CorruptLog {
            message: message.into(),
        }
    }
}

impl From<KeyFormatError> for FailureCause {
    fn from(err: KeyFormatError) -> Self {
        Self::corrupt_log(err.to_string())
    }
}

/// Malformed identity string.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum KeyFormatError {
    /// Fewer than three `::`-separated segments.
    #[error("identity {input:?} has fewer than three segments")]
    MissingSegments {
        /// The rejected input.
        input: String,
    },

    /// The digest segment is not fixed-width hex.
    #[error("identity {input:?} has an invalid digest: {reason}")]
    InvalidDigest {
        /// The rejected input.
        input: String,
        /// Why the digest was rejected.
        reason: String,
    },

    /// Namespace or set is not acceptable as a key.
    #[error("identity {input:?} does not name a valid key: {reason}")]
    InvalidKey {
        /// The rejected input.
        input: String,
        /// Why the key was rejected.
        reason: String,
    },
}

/// Tag of a [`TxnError`], for callers that branch on the kind of failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// See [`TxnError::LockHeld`].
    LockHeld,
    /// See [`TxnError::GenerationConflict`].
    GenerationConflict,
    /// See [`TxnError::TransactionFailure`].
    TransactionFailure,
    /// See [`TxnError::KeyFormat`].
    KeyFormat,
    /// See [`TxnError::Store`].
    Store,
}

impl TxnError {
    /// Creates a transaction failure.
    pub fn failure(txn_id: &TxnId, cause: impl Into<FailureCause>) -> Self {
        Self::TransactionFailure {
            txn_id: txn_id.clone(),
            source: cause.into(),
        }
    }

    /// Returns the error tag.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            TxnError::LockHeld { .. } => ErrorKind::LockHeld,
            TxnError::GenerationConflict { .. } => ErrorKind::GenerationConflict,
            TxnError::TransactionFailure { .. } => ErrorKind::TransactionFailure,
            TxnError::KeyFormat(_) => ErrorKind::KeyFormat,
            TxnError::Store(_) => ErrorKind::Store,
        }
    }

    /// Check if retrying the same transaction may succeed.
    ///
    /// A held lock is released once its owner finishes. A generation
    /// conflict needs the caller to re-read before retrying.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            TxnError::LockHeld { .. } | TxnError::TransactionFailure { .. }
        )
    }

    /// Returns the transaction the error belongs to, if any.
    #[must_use]
    pub fn txn_id(&self) -> Option<&TxnId> {
        match self {
            TxnError::LockHeld { txn_id, .. }
            | TxnError::GenerationConflict { txn_id, .. }
            | TxnError::TransactionFailure { txn_id, .. } => Some(txn_id),
            TxnError::KeyFormat(_) | TxnError::Store(_) => None,
        }
    }

    /// Returns the record the error names, if any.
    #[must_use]
    pub fn key(&self) -> Option<&Key> {
        match self {
            TxnError::LockHeld { key, .. } | TxnError::GenerationConflict { key, .. } => Some(key),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    fn key() -> Key {
        Key::new("test", "accounts", "A").unwrap()
    }

    #[test]
    fn kinds_and_retry() {
        let txn = TxnId::new("t1");
        let held = TxnError::LockHeld {
            key: key(),
            txn_id: txn.clone(),
        };
        assert_eq!(held.kind(), ErrorKind::LockHeld);
        assert!(held.is_retryable());

        let conflict = TxnError::GenerationConflict {
            key: key(),
            txn_id: txn.clone(),
        };
        assert_eq!(conflict.kind(), ErrorKind::GenerationConflict);
        assert!(!conflict.is_retryable());

        let failure = TxnError::failure(&txn, StoreError::unavailable("timeout"));
        assert_eq!(failure.kind(), ErrorKind::TransactionFailure);
        assert!(failure.is_retryable());

        let store = TxnError::from(StoreError::unavailable("down"));
        assert_eq!(store.kind(), ErrorKind::Store);
        assert!(!store.is_retryable());
    }

    #[test]
    fn accessors() {
        let txn = TxnId::new("t1");
        let held = TxnError::LockHeld {
            key: key(),
            txn_id: txn.clone(),
        };
        assert_eq!(held.txn_id(), Some(&txn));
        assert_eq!(held.key(), Some(&key()));

        let format = TxnError::from(KeyFormatError::MissingSegments {
            input: "a::b".into(),
        });
        assert!(format.txn_id().is_none());
        assert!(format.key().is_none());
    }

    #[test]
    fn failure_exposes_source() {
        let err = TxnError::failure(&TxnId::new("t9"), FailureCause::corrupt_log("no txnID"));
        assert_eq!(
            err.to_string(),
            "transaction t9 failed: corrupt transaction record: no txnID"
        );
        assert!(err.source().is_some());
    }

    #[test]
    fn key_format_becomes_corrupt_log() {
        let cause = FailureCause::from(KeyFormatError::MissingSegments { input: "x".into() });
        assert!(matches!(cause, FailureCause::CorruptLog { .. }));
    }
}
