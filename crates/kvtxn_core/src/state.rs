//! Transaction lifecycle.

use std::fmt;

/// Phase of one transaction attempt.
///
/// ```text
/// Locking -> Logged -> Applying -> Committed
///                  \           \-> RolledBack
///                   \-> Abandoned -> RolledBack
/// ```
///
/// `Abandoned` marks a logged transaction whose owner is gone. The
/// coordinator enters it when it rolls back from the transaction record
/// rather than from its own in-flight state, as `rollback_by_id` and the
/// recovery sweep do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TxnPhase {
    /// Acquiring locks.
    Locking,
    /// Pre-images are persisted in the transaction record.
    Logged,
    /// Writes are being applied.
    Applying,
    /// All writes applied and the transaction record removed.
    Committed,
    /// Pre-images restored and the transaction record removed.
    RolledBack,
    /// The owner disappeared before reaching a terminal phase.
    Abandoned,
}

impl TxnPhase {
    /// Returns true if `self -> next` is a legal transition.
    #[must_use]
    pub fn can_transition_to(self, next: TxnPhase) -> bool {
        use TxnPhase::{Abandoned, Applying, Committed, Locking, Logged, RolledBack};
        matches!(
            (self, next),
            (Locking, Logged)
                | (Logged, Applying)
                | (Logged, RolledBack)
                | (Logged, Abandoned)
                | (Applying, Committed)
                | (Applying, RolledBack)
                | (Applying, Abandoned)
                | (Abandoned, RolledBack)
        )
    }

    /// Returns true for `Committed` and `RolledBack`.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, TxnPhase::Committed | TxnPhase::RolledBack)
    }
}

impl fmt::Display for TxnPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TxnPhase::Locking => "locking",
            TxnPhase::Logged => "logged",
            TxnPhase::Applying => "applying",
            TxnPhase::Committed => "committed",
            TxnPhase::RolledBack => "rolled-back",
            TxnPhase::Abandoned => "abandoned",
        };
        f.write_str(name)
    }
}
