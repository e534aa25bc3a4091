//! Error types for store operations.

use crate::key::Key;
use thiserror::Error;

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors a [`crate::RecordStore`] can report.
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    /// A create-only write found an existing record.
    #[error("record already exists: {0}")]
    KeyExists(Key),

    /// A generation-conditioned write found a different generation.
    #[error("generation mismatch: expected {expected}, found {actual}")]
    GenerationMismatch {
        /// Generation the caller expected.
        expected: u32,
        /// Generation the store holds (0 when the record is absent).
        actual: u32,
    },

    /// The secondary index already exists.
    #[error("index already exists on {namespace}.{set}.{bin}")]
    IndexExists {
        /// Namespace of the index.
        namespace: String,
        /// Set of the index.
        set: String,
        /// Indexed bin.
        bin: String,
    },

    /// A scan filtered on a bin that has no secondary index.
    #[error("no index on {namespace}.{set}.{bin}")]
    IndexNotFound {
        /// Namespace of the scan.
        namespace: String,
        /// Set of the scan.
        set: String,
        /// Filter bin.
        bin: String,
    },

    /// The store does not offer durable deletes.
    #[error("durable delete is not supported by this store")]
    DurableDeleteUnsupported,

    /// Namespace, set or user key is not acceptable.
    #[error("invalid key: {0}")]
    InvalidKey(String),

    /// The store could not serve the request.
    #[error("store unavailable: {message}")]
    Unavailable {
        /// Description of the failure.
        message: String,
    },
}

impl StoreError {
    /// Creates an unavailable error.
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable {
            message: message.into(),
        }
    }

    /// Check if this error is a create-only collision.
    pub fn is_key_exists(&self) -> bool {
        matches!(self, StoreError::KeyExists(_))
    }

    /// Check if this error is a failed generation check.
    pub fn is_generation_mismatch(&self) -> bool {
        matches!(self, StoreError::GenerationMismatch { .. })
    }

    /// Check if this error reports an index created by someone else.
    pub fn is_index_exists(&self) -> bool {
        matches!(self, StoreError::IndexExists { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_classification() {
        let key = Key::new("test", "accounts", "A").unwrap();
        assert!(StoreError::KeyExists(key).is_key_exists());

        let gen = StoreError::GenerationMismatch {
            expected: 1,
            actual: 2,
        };
        assert!(gen.is_generation_mismatch());
        assert!(!gen.is_key_exists());

        assert!(!StoreError::unavailable("down").is_index_exists());
    }

    #[test]
    fn display_includes_context() {
        let err = StoreError::GenerationMismatch {
            expected: 3,
            actual: 4,
        };
        assert_eq!(err.to_string(), "generation mismatch: expected 3, found 4");
    }
}
