//! core type-safe wrappers for the storage layer.

use std::fmt;

use git2::Oid;
use serde::{Deserialize, Serialize};

/// Key under which the root object's pid is recorded.
pub const ROOT_KEY: &str = "root";

/// Reserved key that collection never sweeps.
pub const HEADER_KEY: &str = "header";

/// Git commit identifier for the git-backed record store.
///
/// The inner Oid is only accessible within the storage module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CommitId(pub(crate) Oid);

impl CommitId {
    pub(crate) fn new(oid: Oid) -> Self {
        Self(oid)
    }

    pub(crate) fn raw(&self) -> Oid {
        self.0
    }

    /// short form of the commit ID
    pub fn short(&self) -> String {
        self.0.to_string()[..7].to_string()
    }
}

impl fmt::Display for CommitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A persistent identifier naming one stored object.
///
/// Pids double as record keys, and the git backend uses keys as tree entry
/// names, so they are restricted to ASCII alphanumerics, underscores and
/// hyphens. They are normally generated (lowercase ULIDs) and never equal
/// one of the reserved keys.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Pid(String);

impl Pid {
    /// create a new Pid, validating the input
    pub fn new(pid: impl Into<String>) -> Result<Self, InvalidKeyError> {
        let pid = pid.into();
        validate_key(&pid)?;
        if is_reserved_key(&pid) {
            return Err(InvalidKeyError::Reserved(pid));
        }
        Ok(Self(pid))
    }

    /// Generate a new ULID-based pid.
    pub fn generate() -> Self {
        Self(ulid::Ulid::new().to_string().to_lowercase())
    }

    /// get the string representation
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Pid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for Pid {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for Pid {
    type Error = InvalidKeyError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Pid::new(value)
    }
}

impl From<Pid> for String {
    fn from(pid: Pid) -> Self {
        pid.0
    }
}

/// true for keys the pool manages itself (`root`, `header`)
pub fn is_reserved_key(key: &str) -> bool {
    key == ROOT_KEY || key == HEADER_KEY
}

/// Validate a record key.
pub fn validate_key(key: &str) -> Result<(), InvalidKeyError> {
    if key.is_empty() {
        return Err(InvalidKeyError::Empty);
    }

    if key.len() > 128 {
        return Err(InvalidKeyError::TooLong(key.len()));
    }

    for (i, c) in key.chars().enumerate() {
        // alphanumeric, underscore, hyphen allowed
        if !c.is_ascii_alphanumeric() && c != '_' && c != '-' {
            return Err(InvalidKeyError::InvalidCharacter { char: c, position: i });
        }
    }

    Ok(())
}

/// git signature (author/committer info)
#[derive(Debug, Clone)]
pub struct GitSignature {
    pub name: String,
    pub email: String,
}

impl GitSignature {
    /// create a new signature
    pub fn new(name: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            email: email.into(),
        }
    }

    /// default signature for pool commits
    pub fn objpool() -> Self {
        Self::new("objpool", "objpool@localhost")
    }

    pub(crate) fn to_git2_signature(&self) -> Result<git2::Signature<'static>, git2::Error> {
        git2::Signature::now(&self.name, &self.email)
    }
}

impl Default for GitSignature {
    fn default() -> Self {
        Self::objpool()
    }
}

/// error type for invalid record keys and pids
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvalidKeyError {
    Empty,
    TooLong(usize),
    InvalidCharacter { char: char, position: usize },
    Reserved(String),
}

impl fmt::Display for InvalidKeyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => write!(f, "key cannot be empty"),
            Self::TooLong(len) => write!(f, "key too long: {} characters", len),
            Self::InvalidCharacter { char, position } => {
                write!(f, "invalid character '{}' at position {}", char, position)
            }
            Self::Reserved(key) => write!(f, "'{}' is a reserved key", key),
        }
    }
}

impl std::error::Error for InvalidKeyError {}
