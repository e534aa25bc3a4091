//! Record keys.

use crate::error::{StoreError, StoreResult};
use kvtxn_codec::hex;
use sha2::{Digest, Sha256};
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};

/// Length in bytes of a record digest.
pub const DIGEST_LEN: usize = 20;

/// Address of one record: namespace, set and a digest of the user key.
///
/// Keys compare and hash by `(namespace, set, digest)`. The user key is
/// kept for diagnostics only; keys rebuilt from a digest carry none.
///
/// Namespaces and sets may not contain `::`; a namespace may not end with
/// `:` and a set may not start with one. That keeps the `::` delimiter
/// of identity strings unambiguous.
#[derive(Clone)]
pub struct Key {
    namespace: String,
    set: String,
    user_key: Option<String>,
    digest: [u8; DIGEST_LEN],
}

impl Key {
    /// Creates a key from a user key, computing its digest.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InvalidKey`] if the namespace is empty or the
    /// namespace or set contains `::`, the namespace ends with `:` or the set
    /// starts with `:`.
    pub fn new(
        namespace: impl Into<String>,
        set: impl Into<String>,
        user_key: impl Into<String>,
    ) -> StoreResult<Self> {
        let namespace = namespace.into();
        let set = set.into();
        let user_key = user_key.into();
        validate(&namespace, &set)?;
        let digest = Self::compute_digest(&set, &user_key);
        Ok(Self {
            namespace,
            set,
            user_key: Some(user_key),
            digest,
        })
    }

    /// Creates a key from a digest already computed by the store.
    ///
    /// # Errors
    ///
    /// Same validation as [`Key::new`].
    pub fn from_digest(
        namespace: impl Into<String>,
        set: impl Into<String>,
        digest: [u8; DIGEST_LEN],
    ) -> StoreResult<Self> {
        let namespace = namespace.into();
        let set = set.into();
        validate(&namespace, &set)?;
        Ok(Self {
            namespace,
            set,
            user_key: None,
            digest,
        })
    }

    /// Digest of a user key within a set.
    #[must_use]
    pub fn compute_digest(set: &str, user_key: &str) -> [u8; DIGEST_LEN] {
        let mut hasher = Sha256::new();
        hasher.update(set.as_bytes());
        hasher.update([0u8]);
        hasher.update(user_key.as_bytes());
        let full = hasher.finalize();

        let mut digest = [0u8; DIGEST_LEN];
        digest.copy_from_slice(&full[..DIGEST_LEN]);
        digest
    }

    /// Returns the namespace.
    #[must_use]
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Returns the set name.
    #[must_use]
    pub fn set(&self) -> &str {
        &self.set
    }

    /// Returns the user key, if this key was built from one.
    #[must_use]
    pub fn user_key(&self) -> Option<&str> {
        self.user_key.as_deref()
    }

    /// Returns the digest.
    #[must_use]
    pub fn digest(&self) -> &[u8; DIGEST_LEN] {
        &self.digest
    }

    fn identity(&self) -> (&str, &str, &[u8; DIGEST_LEN]) {
        (&self.namespace, &self.set, &self.digest)
    }
}

fn validate(namespace: &str, set: &str) -> StoreResult<()> {
    if namespace.is_empty() {
        return Err(StoreError::InvalidKey("namespace is empty".to_string()));
    }
    if namespace.contains("::") || namespace.ends_with(':') {
        return Err(StoreError::InvalidKey(format!(
            "namespace {namespace:?} contains '::' or ends with ':'"
        )));
    }
    if set.contains("::") || set.starts_with(':') {
        return Err(StoreError::InvalidKey(format!(
            "set {set:?} contains '::' or starts with ':'"
        )));
    }
    Ok(())
}

impl PartialEq for Key {
    fn eq(&self, other: &Self) -> bool {
        self.identity() == other.identity()
    }
}

impl Eq for Key {}

impl Hash for Key {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.identity().hash(state);
    }
}

impl PartialOrd for Key {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Key {
    fn cmp(&self, other: &Self) -> Ordering {
        self.identity().cmp(&other.identity())
    }
}

impl fmt::Debug for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Key({self})")
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.user_key {
            Some(user_key) => write!(f, "{}/{}/{}", self.namespace, self.set, user_key),
            None => write!(
                f,
                "{}/{}/#{}",
                self.namespace,
                self.set,
                hex::encode(&self.digest)
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn same_user_key_same_digest() {
        let a = Key::new("test", "accounts", "A").unwrap();
        let b = Key::new("test", "accounts", "A").unwrap();
        assert_eq!(a, b);
        assert_eq!(a.digest(), b.digest());
    }

    #[test]
    fn digest_depends_on_set() {
        let a = Key::new("test", "accounts", "A").unwrap();
        let b = Key::new("test", "ledger", "A").unwrap();
        assert_ne!(a.digest(), b.digest());
    }

    #[test]
    fn digest_key_equals_user_key() {
        let a = Key::new("test", "accounts", "A").unwrap();
        let b = Key::from_digest("test", "accounts", *a.digest()).unwrap();
        assert_eq!(a, b);
        assert!(b.user_key().is_none());
    }

    #[test]
    fn rejects_delimiters_and_empty_namespace() {
        assert!(Key::new("", "s", "k").is_err());
        assert!(Key::new("a::b", "s", "k").is_err());
        assert!(Key::new("ns:", "s", "k").is_err());
        assert!(Key::new("ns", "s::t", "k").is_err());
        assert!(Key::new("ns", ":s", "k").is_err());
        // single colons are fine elsewhere
        assert!(Key::new("a:b", "c:d", "k").is_ok());
        assert!(Key::new(":ns", "s:", "k").is_ok());
        // user keys may contain anything
        assert!(Key::new("ns", "s", "a::b").is_ok());
        // empty set is allowed
        assert!(Key::new("ns", "", "k").is_ok());
    }

    #[test]
    fn display_prefers_user_key() {
        let a = Key::new("test", "accounts", "A").unwrap();
        assert_eq!(a.to_string(), "test/accounts/A");

        let b = Key::from_digest("test", "accounts", [0xab; DIGEST_LEN]).unwrap();
        assert!(b.to_string().starts_with("test/accounts/#ABAB"));
    }

    proptest! {
        #[test]
        fn digest_key_matches_user_key(
            namespace in "[a-z][a-z0-9:_-]{0,15}",
            set in "[a-zA-Z0-9:_.-]{0,31}",
            user_key in any::<String>(),
        ) {
            let Ok(key) = Key::new(namespace.as_str(), set.as_str(), user_key.as_str()) else {
                prop_assert!(namespace.contains("::") || namespace.ends_with(':')
                    || set.contains("::") || set.starts_with(':'));
                return Ok(());
            };
            let rebuilt = Key::from_digest(namespace, set, *key.digest()).unwrap();
            prop_assert_eq!(&rebuilt, &key);
            prop_assert_eq!(rebuilt.cmp(&key), Ordering::Equal);
            prop_assert_eq!(*key.digest(), Key::compute_digest(key.set(), &user_key));
        }

        #[test]
        fn distinct_user_keys_get_distinct_digests(a in any::<String>(), b in any::<String>()) {
            prop_assume!(a != b);
            prop_assert_ne!(Key::compute_digest("s", &a), Key::compute_digest("s", &b));
        }
    }
}
