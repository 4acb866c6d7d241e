//! Object pool with transactional persistence and mark-and-sweep collection.
//!
//! # Architecture
//!
//! ```text
//!   objects ──mutate──▶ MutationChannel ──▶ ObjectPool ──schedule──▶ Scheduler
//!                                              │                        │
//!                                      encode  │  decode          (delay)
//!                                              ▼                        │
//!                                          AtomicMap ◀──commit──────────┘
//!                                              │
//!                                       RecordBackend (git, memory)
//! ```
//!
//! The pool owns every active object. Objects reference each other through
//! weak [`PidRef`](crate::record::PidRef)s once stored, so dropping the pool's
//! caches frees whole graphs, cycles included.

mod collect;
mod config;
mod error;
mod object_pool;
mod scheduler;

#[cfg(test)]
mod fixtures;

pub use config::{PoolConfig, DEFAULT_STORE_DELAY};
pub use error::{PoolError, PoolResult};
pub use object_pool::{ObjectPool, ObjectPoolBuilder, PoolStats};
pub use scheduler::{ManualScheduler, Scheduler, Task, TaskKey};
