//! Transaction error types.

use thiserror::Error;

use crate::storage::{InvalidKeyError, StoreError};

/// Result type for transaction operations.
pub type TransactionResult<T> = Result<T, TransactionError>;

/// Errors that can occur during transaction operations.
#[derive(Debug, Error)]
pub enum TransactionError {
    /// Storage layer error.
    #[error("storage error: {0}")]
    Storage(#[from] StoreError),

    /// The store has not been opened yet.
    #[error("record store {name} is not open")]
    NotOpen { name: String },

    /// A write was attempted outside `begin()`/`commit()`.
    #[error("no active transaction on {name}")]
    NoActiveTransaction { name: String },

    /// `begin()` was called while a transaction was still pending.
    #[error("transaction {tx_id} is still active")]
    AlreadyActive { tx_id: String },

    /// The operation is not allowed while a transaction is pending.
    #[error("invalid operation: {0}")]
    InvalidOperation(String),
}

impl From<InvalidKeyError> for TransactionError {
    fn from(err: InvalidKeyError) -> Self {
        TransactionError::Storage(StoreError::InvalidKey(err))
    }
}

impl TransactionError {
    /// Check if this error is retryable.
    pub fn is_retryable(&self) -> bool {
        match self {
            TransactionError::Storage(e) => e.is_retriable(),
            _ => false,
        }
    }

    /// True for misuse of the store contract rather than storage failures.
    pub fn is_contract_violation(&self) -> bool {
        !matches!(self, TransactionError::Storage(_))
    }
}
