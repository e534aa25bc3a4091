//! Transaction records: the write-ahead log of pre-images.
//!
//! A transaction record holds, for every record a transaction writes, the
//! bins it had before the transaction started (or an absence marker). The
//! record is written before the first mutation and deleted once the
//! transaction has committed or been rolled back, so its existence means the
//! transaction is incomplete.
//!
//! ## Encoding
//!
//! The pre-image map is stored in the `previousVersions` bin as canonical
//! CBOR:
//!
//! ```text
//! { "<identity>": { "<bin>": value, ... } | null, ... }
//! ```

use crate::error::{FailureCause, KeyFormatError};
use crate::identity::IdentityString;
use crate::schema::{PREVIOUS_VERSIONS_BIN, TIMESTAMP_BIN, TXN_ID_BIN, TXN_TYPE, TYPE_BIN};
use crate::types::TxnId;
use kvtxn_codec::{from_cbor, to_cbor, Bins, CodecError, CodecResult, Value};
use kvtxn_store::Key;
use std::collections::BTreeMap;

/// Snapshot of the records a transaction touches, keyed by identity string.
///
/// `None` marks a record that did not exist.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PreImages {
    entries: BTreeMap<String, Option<Bins>>,
}

impl PreImages {
    /// Creates an empty snapshot.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records the state of `key` before the transaction.
    pub fn insert(&mut self, key: &Key, bins: Option<Bins>) {
        self.entries.insert(IdentityString::encode(key), bins);
    }

    /// Returns the number of records in the snapshot.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if the snapshot is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns the pre-image of `key`, `Some(None)` if it was absent.
    #[must_use]
    pub fn get(&self, key: &Key) -> Option<Option<&Bins>> {
        self.entries
            .get(&IdentityString::encode(key))
            .map(Option::as_ref)
    }

    /// Decodes every identity and pairs it with its pre-image.
    ///
    /// # Errors
    ///
    /// Fails on the first identity string that does not decode.
    pub fn entries(&self) -> Result<Vec<(Key, Option<&Bins>)>, KeyFormatError> {
        self.entries
            .iter()
            .map(|(identity, bins)| Ok((IdentityString::decode(identity)?, bins.as_ref())))
            .collect()
    }

    /// Encodes the snapshot as canonical CBOR.
    ///
    /// # Errors
    ///
    /// Returns an error if CBOR encoding fails.
    pub fn to_bytes(&self) -> CodecResult<Vec<u8>> {
        let map = self
            .entries
            .iter()
            .map(|(identity, bins)| {
                let value = match bins {
                    Some(bins) => Value::Map(bins.clone()),
                    None => Value::Null,
                };
                (identity.clone(), value)
            })
            .collect();
        to_cbor(&Value::Map(map))
    }

    /// Decodes a snapshot written by [`PreImages::to_bytes`].
    ///
    /// # Errors
    ///
    /// Fails if the payload is not a map, or if an entry is neither a map of
    /// bins nor null.
    pub fn from_bytes(bytes: &[u8]) -> CodecResult<Self> {
        let Value::Map(map) = from_cbor(bytes)? else {
            return Err(CodecError::invalid_structure("pre-images must be a map"));
        };

        let mut entries = BTreeMap::new();
        for (identity, value) in map {
            let bins = match value {
                Value::Map(bins) => Some(bins),
                Value::Null => None,
                other => {
                    return Err(CodecError::invalid_structure(format!(
                        "pre-image of {identity} is a {}, expected map or null",
                        other.kind()
                    )))
                }
            };
            entries.insert(identity, bins);
        }
        Ok(Self { entries })
    }
}

/// A transaction record as stored in the transaction set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxnRecord {
    /// Transaction the record belongs to.
    pub txn_id: TxnId,
    /// Creation time in milliseconds since the Unix epoch.
    pub timestamp: i64,
    /// State of every written record before the transaction.
    pub pre_images: PreImages,
}

impl TxnRecord {
    /// Converts the record to store bins.
    ///
    /// # Errors
    ///
    /// Returns an error if the pre-images cannot be encoded.
    pub fn to_bins(&self) -> CodecResult<Bins> {
        let mut bins = Bins::new();
        bins.insert(TYPE_BIN.to_string(), Value::from(TXN_TYPE));
        bins.insert(
            PREVIOUS_VERSIONS_BIN.to_string(),
            Value::Bytes(self.pre_images.to_bytes()?),
        );
        bins.insert(TXN_ID_BIN.to_string(), Value::from(self.txn_id.as_str()));
        bins.insert(TIMESTAMP_BIN.to_string(), Value::Integer(self.timestamp));
        Ok(bins)
    }

    /// Reads a record from store bins.
    ///
    /// # Errors
    ///
    /// Fails if the type tag or a required bin is missing, or the pre-images
    /// do not decode.
    pub fn from_bins(bins: &Bins) -> Result<Self, FailureCause> {
        match bins.get(TYPE_BIN).and_then(Value::as_text) {
            Some(TXN_TYPE) => {}
            other => {
                return Err(FailureCause::corrupt_log(format!(
                    "expected type {TXN_TYPE:?}, found {other:?}"
                )))
            }
        }
        let txn_id = bins
            .get(TXN_ID_BIN)
            .and_then(Value::as_text)
            .ok_or_else(|| FailureCause::corrupt_log("missing txnID"))?;
        let timestamp = bins
            .get(TIMESTAMP_BIN)
            .and_then(Value::as_integer)
            .ok_or_else(|| FailureCause::corrupt_log("missing timestamp"))?;
        let encoded = bins
            .get(PREVIOUS_VERSIONS_BIN)
            .and_then(Value::as_bytes)
            .ok_or_else(|| FailureCause::corrupt_log("missing previousVersions"))?;

        Ok(Self {
            txn_id: TxnId::new(txn_id),
            timestamp,
            pre_images: PreImages::from_bytes(encoded)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kvtxn_codec::bins;
    use proptest::prelude::*;

    fn key(user_key: &str) -> Key {
        Key::new("test", "accounts", user_key).unwrap()
    }

    fn sample() -> PreImages {
        let mut pre = PreImages::new();
        pre.insert(&key("A"), Some(bins([("balance", 1000)])));
        pre.insert(&key("B"), None);
        pre
    }

    #[test]
    fn pre_images_roundtrip_with_absence() {
        let pre = sample();
        let decoded = PreImages::from_bytes(&pre.to_bytes().unwrap()).unwrap();
        assert_eq!(decoded, pre);
        assert_eq!(decoded.get(&key("B")), Some(None));
        assert_eq!(
            decoded.get(&key("A")).flatten(),
            Some(&bins([("balance", 1000)]))
        );
        assert_eq!(decoded.get(&key("C")), None);
    }

    #[test]
    fn entries_decode_keys() {
        let pre_images = sample();
        let entries = pre_images.entries().unwrap();
        assert_eq!(entries.len(), 2);
        assert!(entries.iter().any(|(k, v)| *k == key("A") && v.is_some()));
        assert!(entries.iter().any(|(k, v)| *k == key("B") && v.is_none()));
    }

    #[test]
    fn rejects_non_map_payload() {
        let bytes = to_cbor(&Value::Array(vec![])).unwrap();
        assert!(matches!(
            PreImages::from_bytes(&bytes),
            Err(CodecError::InvalidStructure { .. })
        ));
    }

    #[test]
    fn rejects_scalar_pre_image() {
        let bytes = to_cbor(&Value::Map(bins([("test::s::00", 5)]))).unwrap();
        assert!(matches!(
            PreImages::from_bytes(&bytes),
            Err(CodecError::InvalidStructure { .. })
        ));
    }

    #[test]
    fn corrupt_identity_surfaces_on_entries() {
        let bytes = to_cbor(&Value::Map(bins([("not-an-identity", Value::Null)]))).unwrap();
        let pre = PreImages::from_bytes(&bytes).unwrap();
        assert!(matches!(
            pre.entries(),
            Err(KeyFormatError::MissingSegments { .. })
        ));
    }

    #[test]
    fn txn_record_bins() {
        let record = TxnRecord {
            txn_id: TxnId::new("t1"),
            timestamp: 1_700_000_000_000,
            pre_images: sample(),
        };
        let b = record.to_bins().unwrap();
        assert_eq!(b.get(TYPE_BIN), Some(&Value::from("txn")));
        assert_eq!(b.get(TXN_ID_BIN), Some(&Value::from("t1")));
        assert!(b.get(PREVIOUS_VERSIONS_BIN).and_then(Value::as_bytes).is_some());

        assert_eq!(TxnRecord::from_bins(&b).unwrap(), record);
    }

    #[test]
    fn txn_record_rejects_wrong_type() {
        let mut b = TxnRecord {
            txn_id: TxnId::new("t1"),
            timestamp: 1,
            pre_images: PreImages::new(),
        }
        .to_bins()
        .unwrap();
        b.insert(TYPE_BIN.to_string(), Value::from("lock"));
        assert!(matches!(
            TxnRecord::from_bins(&b),
            Err(FailureCause::CorruptLog { .. })
        ));

        b.insert(TYPE_BIN.to_string(), Value::from("txn"));
        b.remove(PREVIOUS_VERSIONS_BIN);
        assert!(matches!(
            TxnRecord::from_bins(&b),
            Err(FailureCause::CorruptLog { .. })
        ));
    }

    fn arb_bins() -> impl Strategy<Value = Bins> {
        prop::collection::btree_map(
            "[a-z]{1,8}",
            prop_oneof![
                any::<i64>().prop_map(Value::Integer),
                "[ -~]{0,16}".prop_map(Value::Text),
                any::<bool>().prop_map(Value::Bool),
            ],
            0..5,
        )
    }

    proptest! {
        #[test]
        fn pre_images_roundtrip(
            records in prop::collection::vec(("[A-Z0-9]{1,12}", prop::option::of(arb_bins())), 0..8)
        ) {
            let mut pre = PreImages::new();
            for (user_key, bins) in records {
                pre.insert(&key(&user_key), bins);
            }
            let decoded = PreImages::from_bytes(&pre.to_bytes().unwrap()).unwrap();
            prop_assert_eq!(decoded, pre);
        }
    }
}
