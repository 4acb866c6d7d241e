//! storage layer for objpool
//!
//! this module owns the durable side of a pool: a flat key space of string
//! records behind the [`RecordBackend`] trait. The transaction layer above it
//! stages writes in a [`ChangeSet`] and hands the whole set to the backend in
//! one `apply` call.
//!
//!  # Architecture
//!
//! ```text
//!                    ┌───────────────────┐
//!                    │   RecordBackend   │
//!                    │ (load/apply/clear)│
//!                    └───────────────────┘
//!                              │
//!              ┌───────────────┴───────────────┐
//!              │                               │
//!              ▼                               ▼
//!       ┌─────────────┐                 ┌─────────────┐
//!       │   memory    │                 │     git     │
//!       │ (BTreeMap)  │                 │ (blob tree) │
//!       └─────────────┘                 └─────────────┘
//!                                              │
//!                                              ▼
//!                                       ┌─────────────┐
//!                                       │   commit    │
//!                                       │  (history)  │
//!                                       └─────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use objpool::storage::{ChangeSet, GitBackend, RecordBackend};
//!
//! let mut backend = GitBackend::open_or_init("./my_pool")?;
//! let mut changes = ChangeSet::new();
//! changes.put("root", "01hx...");
//! backend.apply(&changes, "tx1")?;
//!
//! let records = backend.load()?;
//! ```

mod backend;
mod change_set;
mod commit;
mod error;
mod git;
mod memory;
mod types;

// Re-export public API
pub use backend::RecordBackend;
pub use change_set::{Change, ChangeSet, PendingValue};
pub use commit::{CommitInfo, CommitMessage};
pub use error::{StoreError, StoreResult};
pub use git::GitBackend;
pub use memory::MemoryBackend;
pub use types::{
    is_reserved_key, validate_key, CommitId, GitSignature, InvalidKeyError, Pid, HEADER_KEY,
    ROOT_KEY,
};
