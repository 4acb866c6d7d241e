//! Storage layer error types
//!
//! All errors that can occur while reading or persisting records are defined
//! here. We use `thiserror` for ergonomic error definition.

use std::path::PathBuf;

use thiserror::Error;

use crate::storage::types::InvalidKeyError;

/// the main error type for record backends
#[derive(Debug, Error)]
pub enum StoreError {
    /// error from the underlying Git library
    #[error("git error: {0}")]
    Git(#[from] git2::Error),

    /// the key cannot be used as a record key
    #[error("invalid record key: {0}")]
    InvalidKey(#[from] InvalidKeyError),

    /// I/O error (filesystem level)
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// invalid UTF-8 in a stored record
    #[error("invalid utf-8 in record {key}: {source}")]
    InvalidUtf8 {
        key: String,
        source: std::str::Utf8Error,
    },

    /// repo is not initialized
    #[error("repository not initialized: {0}")]
    NotInitialized(PathBuf),

    /// the commit was not found
    #[error("commit not found: {0}")]
    CommitNotFound(String),

    /// the tree entry has an unexpected type
    #[error("unexpected entry type for {key}: expected blob, found {found}")]
    UnexpectedEntryType { key: String, found: String },

    /// the backend refused to open
    #[error("open failed: {0}")]
    OpenFailed(String),

    /// the backend refused to persist a change set
    #[error("commit failed: {0}")]
    CommitFailed(String),

    /// internal error that shouldn't happen
    #[error("internal error: {0}")]
    Internal(String),
}

impl StoreError {
    /// check if this error is recoverable by retry
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            StoreError::Io(_) | StoreError::OpenFailed(_) | StoreError::CommitFailed(_)
        )
    }
}

/// result type alias for storage operations
pub type StoreResult<T> = Result<T, StoreError>;
