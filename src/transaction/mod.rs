//! Transaction management for objpool.
//!
//! This module implements the transactional record store the pool writes
//! through. Writes are staged between `begin()` and `commit()` and reach the
//! backend as one atomic change set; a failed commit leaves the committed
//! view untouched.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        AtomicMap                            │
//! │  (committed cache + pending ChangeSet, single writer)       │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//!                     ┌─────────────────┐
//!                     │  RecordBackend  │
//!                     └─────────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use objpool::storage::MemoryBackend;
//! use objpool::transaction::AtomicMap;
//!
//! let mut map = AtomicMap::new(MemoryBackend::new());
//! map.open()?;
//!
//! map.begin()?;
//! map.at_put("root", "01hx...")?;
//! map.commit()?;  // or map.abort();
//! ```

mod atomic_map;
mod context;
mod error;

pub use atomic_map::AtomicMap;
pub use context::{TransactionMetadata, TxState};
pub use error::{TransactionError, TransactionResult};
