//! Pool error types.

use thiserror::Error;

use crate::record::CodecError;
use crate::storage::{Pid, StoreError};
use crate::transaction::TransactionError;

/// Result type for pool operations.
pub type PoolResult<T> = Result<T, PoolError>;

/// Errors raised by the object pool.
#[derive(Debug, Error)]
pub enum PoolError {
    /// The record store has not been opened.
    #[error("pool is not open")]
    NotOpen,

    /// The pool was closed.
    #[error("pool is closed")]
    Closed,

    /// A root object already exists in memory or in the store.
    #[error("root object already set")]
    RootAlreadySet,

    /// The object already has a pid and cannot become the root.
    #[error("object {0} is already known to the pool")]
    ObjectAlreadyKnown(Pid),

    /// The object is not in the active set.
    #[error("object {0} is not referenced by the pool")]
    NotReferenced(Pid),

    /// The same pid came up twice in one store pass.
    #[error("attempt to store {0} twice in one commit")]
    DoubleStore(Pid),

    /// An object with a pid was given a different one.
    #[error("object {old} cannot be reassigned pid {new}")]
    PidReassignment { old: Pid, new: Pid },

    /// No root object exists in the store.
    #[error("no root object in store")]
    MissingRoot,

    /// The object has no pid where one is required.
    #[error("object has no pid")]
    MissingPid,

    /// The object opted out of persistence where it must be stored.
    #[error("object of type {0} cannot be stored")]
    NotStorable(String),

    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("transaction error: {0}")]
    Transaction(#[from] TransactionError),

    #[error("storage error: {0}")]
    Storage(#[from] StoreError),
}

impl PoolError {
    /// True for misuse of the pool API, as opposed to failures of the
    /// underlying store or bad stored data.
    pub fn is_programmer_error(&self) -> bool {
        match self {
            PoolError::Codec(
                CodecError::InvalidLiteral { .. } | CodecError::InvalidReference { .. },
            ) => true,
            PoolError::Codec(_) | PoolError::Storage(_) => false,
            PoolError::Transaction(e) => e.is_contract_violation(),
            _ => true,
        }
    }

    /// Check if this error is retryable.
    pub fn is_retriable(&self) -> bool {
        match self {
            PoolError::Transaction(e) => e.is_retryable(),
            PoolError::Storage(e) => e.is_retriable(),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        let pid = Pid::new("a").unwrap();
        assert!(PoolError::DoubleStore(pid).is_programmer_error());
        assert!(PoolError::RootAlreadySet.is_programmer_error());

        let failed = PoolError::from(TransactionError::Storage(StoreError::CommitFailed(
            "disk".to_string(),
        )));
        assert!(!failed.is_programmer_error());
        assert!(failed.is_retriable());

        let missing = PoolError::from(CodecError::MissingType("Ghost".to_string()));
        assert!(!missing.is_programmer_error());
        assert!(!missing.is_retriable());
    }

    #[test]
    fn test_display() {
        let err = PoolError::PidReassignment {
            old: Pid::new("a").unwrap(),
            new: Pid::new("b").unwrap(),
        };
        assert_eq!(err.to_string(), "object a cannot be reassigned pid b");
    }
}
