//! Codec error types.

use thiserror::Error;

/// Result type for encoding and decoding records.
pub type CodecResult<T> = Result<T, CodecError>;

/// Errors raised while converting between objects and records.
#[derive(Debug, Error)]
pub enum CodecError {
    /// The record names a type no registry entry handles.
    #[error("no registered type named {0}")]
    MissingType(String),

    /// A literal slot holds a value that cannot be written as a literal.
    #[error("slot {slot} of {type_name} does not hold a literal")]
    InvalidLiteral { type_name: String, slot: String },

    /// A reference slot holds a non-null literal.
    #[error("slot {slot} of {type_name} does not hold an object")]
    InvalidReference { type_name: String, slot: String },

    /// The stored text is not a valid record.
    #[error("malformed record: {0}")]
    Json(#[from] serde_json::Error),
}

impl CodecError {
    /// True when the stored data itself is at fault.
    pub fn is_data_error(&self) -> bool {
        matches!(self, CodecError::MissingType(_) | CodecError::Json(_))
    }
}
