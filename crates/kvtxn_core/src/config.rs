//! Coordinator configuration.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

/// Default age after which transactions and locks count as abandoned.
pub const DEFAULT_EXPIRY_MS: u64 = 30_000;

/// Default namespace for lock and transaction records.
pub const DEFAULT_TXN_NAMESPACE: &str = "txn";

/// Source of wall-clock time in milliseconds since the Unix epoch.
///
/// Lock and transaction records are stamped with this clock, and the
/// recovery sweeps compare against it.
pub trait Clock: Send + Sync + fmt::Debug {
    /// Returns the current time in milliseconds since the Unix epoch.
    fn now_millis(&self) -> i64;
}

/// The system clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |d| i64::try_from(d.as_millis()).unwrap_or(i64::MAX))
    }
}

/// A clock that only moves when told to.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicI64,
}

impl ManualClock {
    /// Creates a clock reading `start_ms`.
    #[must_use]
    pub fn new(start_ms: i64) -> Self {
        Self {
            now: AtomicI64::new(start_ms),
        }
    }

    /// Sets the current time.
    pub fn set(&self, ms: i64) {
        self.now.store(ms, Ordering::SeqCst);
    }

    /// Moves the clock forward.
    pub fn advance(&self, ms: i64) {
        self.now.fetch_add(ms, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_millis(&self) -> i64 {
        self.now.load(Ordering::SeqCst)
    }
}

fn default_clock() -> Arc<dyn Clock> {
    Arc::new(SystemClock)
}

/// Configuration for a coordinator and its recovery manager.
///
/// Loadable from application configuration through serde; the clock is not
/// serialized and defaults to [`SystemClock`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Namespace holding lock, transaction and index marker records.
    pub txn_namespace: String,

    /// Age in milliseconds after which a transaction or lock is abandoned.
    pub expiry_ms: u64,

    /// Whether to delete with durable-delete semantics.
    pub durable_delete: bool,

    /// Clock used for timestamps and expiry.
    #[serde(skip, default = "default_clock")]
    pub clock: Arc<dyn Clock>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            txn_namespace: DEFAULT_TXN_NAMESPACE.to_string(),
            expiry_ms: DEFAULT_EXPIRY_MS,
            durable_delete: true,
            clock: default_clock(),
        }
    }
}

impl Config {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the namespace for lock and transaction records.
    #[must_use]
    pub fn txn_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.txn_namespace = namespace.into();
        self
    }

    /// Sets the expiry threshold.
    #[must_use]
    pub const fn expiry_ms(mut self, ms: u64) -> Self {
        self.expiry_ms = ms;
        self
    }

    /// Sets whether to use durable deletes.
    #[must_use]
    pub const fn durable_delete(mut self, value: bool) -> Self {
        self.durable_delete = value;
        self
    }

    /// Sets the clock.
    #[must_use]
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Returns the current time according to the configured clock.
    #[must_use]
    pub fn now_millis(&self) -> i64 {
        self.clock.now_millis()
    }

    /// Timestamps strictly below this value are expired.
    #[must_use]
    pub fn expiry_cutoff(&self) -> i64 {
        let expiry = i64::try_from(self.expiry_ms).unwrap_or(i64::MAX);
        self.now_millis().saturating_sub(expiry)
    }
}
