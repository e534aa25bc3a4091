//! Record identity strings and the keys of bookkeeping records.
//!
//! An identity string names one record as `namespace::set::HEXDIGEST`. It is
//! used as the user key of lock records and as the map key of pre-images in
//! transaction records, so it must decode back to the same [`Key`].

use crate::error::KeyFormatError;
use crate::types::TxnId;
use kvtxn_codec::hex;
use kvtxn_store::{Key, StoreError, StoreResult, DIGEST_LEN};

/// Separator between identity segments.
pub const DELIMITER: &str = "::";

/// Set holding lock records.
pub const LOCK_SET: &str = "__kvtxn_locks";

/// Set holding transaction records.
pub const TRANSACTION_SET: &str = "__kvtxn_transactions";

/// Set holding index marker records.
pub const INDEX_MARKER_SET: &str = "index-created";

/// Canonical string form of a record identity.
pub struct IdentityString;

impl IdentityString {
    /// Encodes a key as `namespace::set::HEXDIGEST`.
    #[must_use]
    pub fn encode(key: &Key) -> String {
        format!(
            "{}{DELIMITER}{}{DELIMITER}{}",
            key.namespace(),
            key.set(),
            hex::encode(key.digest())
        )
    }

    /// Decodes an identity string back into a key.
    ///
    /// The decoded key carries no user key.
    ///
    /// # Errors
    ///
    /// Fails if fewer than three segments are present, the digest is not
    /// `2 * DIGEST_LEN` hex characters, or the namespace/set is invalid.
    pub fn decode(input: &str) -> Result<Key, KeyFormatError> {
        // The namespace ends at the first delimiter and the digest starts
        // after the last one; single colons in between belong to the set.
        let segments = input
            .split_once(DELIMITER)
            .and_then(|(namespace, rest)| {
                let (set, digest_hex) = rest.rsplit_once(DELIMITER)?;
                Some((namespace, set, digest_hex))
            });
        let Some((namespace, set, digest_hex)) = segments else {
            return Err(KeyFormatError::MissingSegments {
                input: input.to_string(),
            });
        };

        if digest_hex.len() != 2 * DIGEST_LEN {
            return Err(KeyFormatError::InvalidDigest {
                input: input.to_string(),
                reason: format!(
                    "expected {} hex characters, found {}",
                    2 * DIGEST_LEN,
                    digest_hex.len()
                ),
            });
        }
        let bytes = hex::decode(digest_hex).map_err(|e| KeyFormatError::InvalidDigest {
            input: input.to_string(),
            reason: e.to_string(),
        })?;
        let mut digest = [0u8; DIGEST_LEN];
        digest.copy_from_slice(&bytes);

        Key::from_digest(namespace, set, digest).map_err(|e| KeyFormatError::InvalidKey {
            input: input.to_string(),
            reason: e.to_string(),
        })
    }
}

/// Key of the lock record guarding `key`.
///
/// # Errors
///
/// Fails if `txn_namespace` is not a valid namespace.
pub fn lock_key(txn_namespace: &str, key: &Key) -> StoreResult<Key> {
    Key::new(txn_namespace, LOCK_SET, IdentityString::encode(key))
}

/// Key of the transaction record for `txn_id`.
///
/// # Errors
///
/// Fails if `txn_namespace` is not a valid namespace or `txn_id` is empty.
pub fn txn_key(txn_namespace: &str, txn_id: &TxnId) -> StoreResult<Key> {
    if txn_id.as_str().is_empty() {
        return Err(StoreError::InvalidKey("transaction id is empty".to_string()));
    }
    Key::new(txn_namespace, TRANSACTION_SET, txn_id.as_str())
}
