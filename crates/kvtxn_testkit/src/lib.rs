//! # kvtxn Testkit
//!
//! Test utilities for kvtxn.
//!
//! This crate provides:
//! - A fault-injecting store for crash and failure testing
//! - A test harness wiring a coordinator, recovery manager and manual clock
//! - Property-based test generators using proptest
//! - A concurrent account-transfer simulation
//!
//! ## Usage
//!
//! ```rust
//! use kvtxn_core::WriteSet;
//! use kvtxn_testkit::prelude::*;
//!
//! let h = TestHarness::memory();
//! let ws = WriteSet::new().with_put(test_key("A"), value_bins(10));
//! h.coordinator.put(&ws).unwrap();
//! assert_eq!(h.value_of(&test_key("A")).unwrap(), Some(10));
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod faults;
pub mod fixtures;
pub mod generators;
pub mod ledger;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::faults::*;
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::ledger::*;
}

pub use faults::FaultyStore;
pub use fixtures::*;
pub use generators::*;
pub use ledger::{AccountSimulation, LedgerError, LedgerResult, TransferStats};
