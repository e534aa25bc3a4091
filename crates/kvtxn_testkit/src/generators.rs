//! Property-based test generators using proptest.
//!
//! Provides strategies for generating keys, bins and write sets that respect
//! the store's key rules.

use kvtxn_codec::{Bins, Value};
use kvtxn_core::WriteSet;
use kvtxn_store::Key;
use proptest::prelude::*;

use crate::fixtures::{TEST_NAMESPACE, TEST_SET};

/// Strategy for namespaces accepted by [`Key::new`].
pub fn namespace_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-z][a-z0-9_-]{0,15}").expect("Invalid regex")
}

/// Strategy for set names accepted by [`Key::new`].
pub fn set_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-zA-Z0-9_.-]{0,31}").expect("Invalid regex")
}

/// Strategy for arbitrary user keys, including delimiter look-alikes.
pub fn user_key_strategy() -> impl Strategy<Value = String> {
    prop_oneof![
        prop::string::string_regex("[A-Z0-9-]{1,16}").expect("Invalid regex"),
        prop::string::string_regex("[a-z:]{1,16}").expect("Invalid regex"),
        any::<String>(),
    ]
}

/// Strategy for keys in any valid namespace and set.
pub fn key_strategy() -> impl Strategy<Value = Key> {
    (namespace_strategy(), set_strategy(), user_key_strategy()).prop_map(
        |(namespace, set, user_key)| Key::new(namespace, set, user_key).expect("generated key is valid"),
    )
}

/// Strategy for a flat attribute value.
pub fn value_strategy() -> impl Strategy<Value = Value> {
    prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        any::<i64>().prop_map(Value::Integer),
        prop::collection::vec(any::<u8>(), 0..32).prop_map(Value::Bytes),
        prop::string::string_regex("[ -~]{0,24}")
            .expect("Invalid regex")
            .prop_map(Value::Text),
    ]
}

/// Strategy for the bins of one record.
pub fn bins_strategy() -> impl Strategy<Value = Bins> {
    prop::collection::btree_map(
        prop::string::string_regex("[a-zA-Z][a-zA-Z0-9_]{0,13}").expect("Invalid regex"),
        value_strategy(),
        1..6,
    )
}

/// Strategy for write sets over distinct keys in the test set.
///
/// About one entry in five is a delete intent.
pub fn write_set_strategy(max_records: usize) -> impl Strategy<Value = WriteSet> {
    prop::collection::btree_map(
        prop::string::string_regex("[A-Z]{1,6}").expect("Invalid regex"),
        prop::option::weighted(0.8, bins_strategy()),
        1..=max_records.max(1),
    )
    .prop_map(|entries| {
        entries
            .into_iter()
            .map(|(user_key, bins)| {
                let key = Key::new(TEST_NAMESPACE, TEST_SET, user_key).expect("test key is valid");
                (key, bins)
            })
            .collect()
    })
}
