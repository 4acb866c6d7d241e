//! Transaction bookkeeping.
//!
//! A record store runs at most one transaction at a time. Its metadata is
//! kept after it ends so callers can inspect how the last batch finished.

use std::fmt;

use chrono::{DateTime, Utc};
use ulid::Ulid;

/// Lifecycle state of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxState {
    /// Writes are being staged.
    Active,
    /// The change set reached the backend.
    Committed,
    /// The change set was discarded.
    Aborted,
}

impl fmt::Display for TxState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TxState::Active => write!(f, "active"),
            TxState::Committed => write!(f, "committed"),
            TxState::Aborted => write!(f, "aborted"),
        }
    }
}

/// Transaction metadata.
#[derive(Debug, Clone)]
pub struct TransactionMetadata {
    /// Unique transaction ID.
    pub tx_id: String,
    /// When the transaction started.
    pub started_at: DateTime<Utc>,
    /// When the transaction ended, if it has.
    pub finished_at: Option<DateTime<Utc>>,
    /// Current state.
    pub state: TxState,
}

impl TransactionMetadata {
    /// Metadata for a freshly begun transaction.
    pub(crate) fn begin() -> Self {
        Self {
            tx_id: Ulid::new().to_string().to_lowercase(),
            started_at: Utc::now(),
            finished_at: None,
            state: TxState::Active,
        }
    }

    pub(crate) fn finish(&mut self, state: TxState) {
        self.state = state;
        self.finished_at = Some(Utc::now());
    }

    /// Returns `true` while writes may be staged.
    pub fn is_active(&self) -> bool {
        self.state == TxState::Active
    }
}
