//! # kvtxn Core
//!
//! Multi-record atomic transactions for key-value stores that are only
//! atomic per record.
//!
//! This crate provides:
//! - Identity strings for records ([`IdentityString`])
//! - Advisory per-record locks built on create-only writes ([`LockManager`])
//! - A write-ahead transaction record of pre-images ([`TxnRecord`])
//! - The commit and rollback engine ([`Coordinator`])
//! - Expiry-based recovery of abandoned work ([`RecoveryManager`])
//!
//! ## Example
//!
//! ```rust
//! use std::sync::Arc;
//! use kvtxn_codec::bins;
//! use kvtxn_core::{Config, Coordinator, WriteSet};
//! use kvtxn_store::{InMemoryStore, Key, RecordStore};
//!
//! let store = Arc::new(InMemoryStore::new());
//! let coordinator = Coordinator::new(store.clone(), Config::default()).unwrap();
//!
//! let a = Key::new("bank", "accounts", "A").unwrap();
//! let b = Key::new("bank", "accounts", "B").unwrap();
//! let transfer = WriteSet::new()
//!     .with_put(a.clone(), bins([("balance", 700)]))
//!     .with_put(b.clone(), bins([("balance", 800)]));
//! coordinator.put(&transfer).unwrap();
//!
//! let record = store.get(&a).unwrap().unwrap();
//! assert_eq!(record.get_integer("balance"), Some(700));
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod coordinator;
mod error;
pub mod identity;
mod lock;
mod log;
mod recovery;
pub mod schema;
mod state;
mod types;

pub use config::{Clock, Config, ManualClock, SystemClock, DEFAULT_EXPIRY_MS, DEFAULT_TXN_NAMESPACE};
pub use coordinator::Coordinator;
pub use error::{ErrorKind, FailureCause, KeyFormatError, TxnError, TxnResult};
pub use identity::IdentityString;
pub use lock::LockManager;
pub use log::{PreImages, TxnRecord};
pub use recovery::{RecoveryManager, SweepReport};
pub use state::TxnPhase;
pub use types::{Generations, TxnId, WriteSet};
