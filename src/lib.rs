//! objpool - A garbage-collected object graph store
//!
//! Application objects are kept in an [`ObjectPool`](pool::ObjectPool) and
//! persisted as JSON records in a transactional key/value map. Mutations are
//! coalesced into one transaction, objects reachable from newly stored ones
//! are stored with them, and records no longer reachable from the root are
//! removed by a mark-and-sweep pass. Records live in memory or in a git
//! repository, where every transaction is a commit.
//!
//! # Example
//!
//! ```
//! use objpool::pool::{ObjectPool, PoolConfig};
//! use objpool::record::{downcast_mut, DynamicObject, TypeRegistry, TypeSchema};
//! use objpool::storage::MemoryBackend;
//! use serde_json::json;
//!
//! let mut registry = TypeRegistry::new();
//! let note = registry.register_dynamic(TypeSchema::new("Note").literal("text").object("next"));
//!
//! let pool = ObjectPool::builder(PoolConfig::new("notes"))
//!     .backend(MemoryBackend::new())
//!     .registry(registry)
//!     .build();
//! pool.open()?;
//!
//! let root = DynamicObject::new_ref(note, pool.channel().clone());
//! pool.set_root_object(root.clone())?;
//! if let Some(mut text) = downcast_mut::<DynamicObject>(&root) {
//!     text.set("text", json!("hello"));
//! }
//! assert_eq!(pool.commit_store_dirty_objects()?, 1);
//! # Ok::<(), objpool::pool::PoolError>(())
//! ```

pub mod notification;
pub mod pool;
pub mod record;
pub mod storage;
pub mod transaction;
