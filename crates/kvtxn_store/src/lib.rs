//! # kvtxn Store
//!
//! Key-value store contract and in-memory implementation for kvtxn.
//!
//! This crate describes what the transaction coordinator needs from the
//! underlying store. Stores are **single-record atomic**: every call touches
//! one record (or reads a batch), and no call spans records.
//!
//! ## Design Principles
//!
//! - Records are addressed by `(namespace, set, digest)`
//! - Conditional writes (create-only, generation-equals) are the only
//!   coordination primitive
//! - Must be `Send + Sync` for concurrent access
//! - No knowledge of locks, transaction records or rollback
//!
//! ## Available Stores
//!
//! - [`InMemoryStore`] - For testing and embedded use
//!
//! ## Example
//!
//! ```rust
//! use kvtxn_codec::bins;
//! use kvtxn_store::{InMemoryStore, Key, RecordStore, StoreError, WriteMode};
//!
//! let store = InMemoryStore::new();
//! let key = Key::new("test", "locks", "A").unwrap();
//! store.put(WriteMode::CreateOnly, &key, &bins([("txnID", "t1")])).unwrap();
//!
//! let again = store.put(WriteMode::CreateOnly, &key, &bins([("txnID", "t2")]));
//! assert!(matches!(again, Err(StoreError::KeyExists(_))));
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod error;
mod key;
mod memory;
mod record;

pub use backend::RecordStore;
pub use error::{StoreError, StoreResult};
pub use key::{Key, DIGEST_LEN};
pub use memory::InMemoryStore;
pub use record::{BelowPredicate, BinPredicate, DeleteOptions, KeyRecord, Record, ScanQuery, WriteMode};
