//! Mark-and-sweep collection of stored records.
//!
//! Marking walks stored records, not objects: a reachable record is scanned
//! for reference tokens without being loaded. A store without a root is
//! cleared, reserved keys included.

use std::collections::HashSet;

use tracing::{debug, info, warn};

use crate::pool::error::PoolResult;
use crate::pool::object_pool::ObjectPool;
use crate::record::ref_pids_in_json;
use crate::storage::{is_reserved_key, Pid};

impl ObjectPool {
    /// Flush dirty objects, then delete every record that is not reachable
    /// from the root, the active objects or their lazy references. Runs in
    /// one transaction. Returns the number of records removed.
    pub fn collect(&self) -> PoolResult<usize> {
        self.ensure_usable()?;
        let removed = self.run_transaction(|| {
            self.store_dirty_objects()?;
            if self.root_pid()?.is_none() {
                return self.clear_records();
            }
            let marked = self.mark()?;
            self.sweep(&marked)
        })?;
        info!(pool = %self.name(), removed, "collected");
        Ok(removed)
    }

    fn clear_records(&self) -> PoolResult<usize> {
        let count = self.inner.store.borrow().count()?;
        if count > 0 {
            debug!(pool = %self.name(), count, "no root, clearing every record");
            self.inner.store.borrow_mut().clear_all()?;
        }
        Ok(count)
    }

    fn mark(&self) -> PoolResult<HashSet<Pid>> {
        let mut marked = HashSet::new();
        let mut work: Vec<Pid> = self.root_pid()?.into_iter().collect();
        work.extend(self.inner.active.borrow().keys().cloned());
        work.extend(self.active_lazy_pids());

        let store = self.inner.store.borrow();
        while let Some(pid) = work.pop() {
            if !marked.insert(pid.clone()) {
                continue;
            }
            let Some(json) = store.at(pid.as_str())? else {
                continue;
            };
            match ref_pids_in_json(&json) {
                Ok(refs) => work.extend(refs.into_iter().filter(|p| !marked.contains(p))),
                Err(e) => {
                    warn!(pool = %self.name(), pid = %pid, error = %e, "unreadable record kept as leaf");
                }
            }
        }
        debug!(pool = %self.name(), marked = marked.len(), "marked");
        Ok(marked)
    }

    fn sweep(&self, marked: &HashSet<Pid>) -> PoolResult<usize> {
        let live: HashSet<&str> = marked.iter().map(Pid::as_str).collect();
        let keys = self.inner.store.borrow().keys()?;
        let mut store = self.inner.store.borrow_mut();
        let mut removed = 0;
        for key in keys {
            if is_reserved_key(&key) || live.contains(key.as_str()) {
                continue;
            }
            debug!(pool = %self.name(), key = %key, "sweep");
            store.remove_key(&key)?;
            removed += 1;
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use crate::pool::config::PoolConfig;
    use crate::pool::fixtures::{registry, set, Fixture};
    use crate::record::PidRef;
    use crate::storage::{MemoryBackend, Pid, HEADER_KEY, ROOT_KEY};

    fn node_json(name: &str, refs: &[(&str, &str)]) -> String {
        let mut entries = vec![json!(["name", name])];
        for (slot, pid) in refs {
            entries.push(json!([slot, {"*": pid}]));
        }
        json!({"type": "Node", "entries": entries}).to_string()
    }

    #[test]
    fn test_orphans_removed_on_open() {
        let backend = MemoryBackend::named("test");
        backend.insert_raw(ROOT_KEY, "r1");
        backend.insert_raw("r1", node_json("root", &[]));
        backend.insert_raw("orphan1", node_json("x", &[]));
        backend.insert_raw("orphan2", node_json("y", &[("next", "orphan1")]));

        let fx = Fixture::open_with(backend.clone(), registry(), PoolConfig::new("test"));
        let mut keys: Vec<_> = backend.records().into_keys().collect();
        keys.sort();
        assert_eq!(keys, vec!["r1".to_string(), ROOT_KEY.to_string()]);
        assert_eq!(fx.pool.active_count(), 0);
    }

    #[test]
    fn test_reachable_records_survive() {
        let backend = MemoryBackend::named("test");
        backend.insert_raw(ROOT_KEY, "r1");
        backend.insert_raw("r1", node_json("root", &[("child", "c1"), ("later", "l1")]));
        backend.insert_raw("c1", node_json("child", &[("next", "r1")]));
        backend.insert_raw("l1", node_json("lazy", &[("next", "l2")]));
        backend.insert_raw("l2", node_json("deep", &[]));
        backend.insert_raw("gone", node_json("gone", &[("next", "r1")]));

        let fx = Fixture::open_with(backend.clone(), registry(), PoolConfig::new("test"));
        assert_eq!(fx.pool.collect().unwrap(), 0);
        assert_eq!(backend.len(), 5);
        assert!(backend.get("gone").is_none());
    }

    #[test]
    fn test_collect_is_idempotent() {
        let backend = MemoryBackend::named("test");
        backend.insert_raw("stray", node_json("stray", &[]));
        let fx = Fixture::open_with(backend, registry(), PoolConfig::new("test").collect_on_open(false));
        let root = fx.node("root");
        fx.pool.set_root_object(root.clone()).unwrap();
        set(&root, "child", fx.node("child"));

        assert_eq!(fx.pool.collect().unwrap(), 1);
        let after_first = fx.backend.records();
        assert_eq!(fx.pool.collect().unwrap(), 0);
        assert_eq!(fx.backend.records(), after_first);
        assert_eq!(after_first.len(), 3);
    }

    #[test]
    fn test_collect_stores_dirty_objects_first() {
        let fx = Fixture::new();
        let root = fx.node("root");
        fx.pool.set_root_object(root.clone()).unwrap();
        assert!(fx.backend.is_empty());

        fx.pool.collect().unwrap();
        assert!(!fx.pool.has_dirty_objects());
        let root_pid = root.borrow().pid().unwrap();
        assert_eq!(fx.backend.get(ROOT_KEY), Some(root_pid.as_str().to_string()));
        assert_eq!(fx.backend.commit_count(), 1);
    }

    #[test]
    fn test_detached_object_collected_after_reload() {
        let fx = Fixture::new();
        let root = fx.node("root");
        let child = fx.node("child");
        fx.pool.set_root_object(root.clone()).unwrap();
        set(&root, "child", child.clone());
        fx.settle();
        let child_pid = child.borrow().pid().unwrap();
        assert!(fx.backend.get(child_pid.as_str()).is_some());

        set(&root, "child", serde_json::Value::Null);
        fx.settle();
        // still active in memory, so still reachable
        fx.pool.collect().unwrap();
        assert!(fx.backend.get(child_pid.as_str()).is_some());

        fx.pool.clear_cache().unwrap();
        assert_eq!(fx.pool.collect().unwrap(), 1);
        assert!(fx.backend.get(child_pid.as_str()).is_none());
    }

    #[test]
    fn test_unloaded_lazy_reference_keeps_target() {
        let fx = Fixture::new();
        let root = fx.node("root");
        let archive = fx.node("archive");
        fx.pool.set_root_object(root.clone()).unwrap();
        set(&root, "later", archive.clone());
        fx.settle();
        let archive_pid = archive.borrow().pid().unwrap();
        drop(archive);

        let reopened = fx.reopen();
        let root = reopened.pool.read_root().unwrap();
        assert!(!reopened.pool.has_active_pid(&archive_pid));
        assert_eq!(reopened.pool.collect().unwrap(), 0);

        let archive = reopened.follow(&root, "later").unwrap();
        assert_eq!(archive.borrow().pid(), Some(archive_pid));
    }

    #[test]
    fn test_lazy_pid_held_only_in_memory_is_marked() {
        let backend = MemoryBackend::named("test");
        backend.insert_raw("kept", node_json("kept", &[]));
        let fx = Fixture::open_with(backend, registry(), PoolConfig::new("test").collect_on_open(false));
        let root = fx.node("root");
        fx.pool.set_root_object(root.clone()).unwrap();
        fx.settle();

        // a lazy slot set silently is not stored, but the pid it holds is live
        root.borrow_mut().set_slot(
            "later",
            PidRef::new(Pid::new("kept").unwrap()).into(),
        );
        assert_eq!(fx.pool.collect().unwrap(), 0);
        assert!(fx.backend.get("kept").is_some());
    }

    #[test]
    fn test_unreadable_record_is_a_leaf() {
        let backend = MemoryBackend::named("test");
        backend.insert_raw(ROOT_KEY, "r1");
        backend.insert_raw("r1", node_json("root", &[("child", "bad")]));
        backend.insert_raw("bad", "not a record");
        backend.insert_raw("orphan", node_json("orphan", &[]));

        let fx = Fixture::open_with(
            backend.clone(),
            registry(),
            PoolConfig::new("test").collect_on_open(false),
        );
        assert_eq!(fx.pool.collect().unwrap(), 1);
        assert!(backend.get("bad").is_some());
        assert!(backend.get("orphan").is_none());
    }

    #[test]
    fn test_header_survives_sweep() {
        let backend = MemoryBackend::named("test");
        backend.insert_raw(HEADER_KEY, "v1");
        backend.insert_raw(ROOT_KEY, "r1");
        backend.insert_raw("r1", node_json("root", &[]));
        backend.insert_raw("a", node_json("a", &[]));

        let _fx = Fixture::open_with(backend.clone(), registry(), PoolConfig::new("test"));
        assert_eq!(backend.len(), 3);
        assert_eq!(backend.get(HEADER_KEY), Some("v1".to_string()));
        assert!(backend.get("a").is_none());
    }

    #[test]
    fn test_no_root_clears_whole_store() {
        let backend = MemoryBackend::named("test");
        backend.insert_raw(HEADER_KEY, "v1");
        backend.insert_raw("a", node_json("a", &[]));
        backend.insert_raw("b", node_json("b", &[("next", "a")]));

        let fx = Fixture::open_with(
            backend.clone(),
            registry(),
            PoolConfig::new("test").collect_on_open(false),
        );
        assert_eq!(fx.pool.collect().unwrap(), 3);
        assert!(backend.is_empty());
        assert_eq!(backend.commit_count(), 1);

        assert_eq!(fx.pool.collect().unwrap(), 0);
        assert_eq!(backend.commit_count(), 1);
    }

    #[test]
    fn test_failed_collect_restores_dirty() {
        let fx = Fixture::new();
        let root = fx.node("root");
        fx.pool.set_root_object(root.clone()).unwrap();
        fx.backend.fail_next_commit();

        assert!(fx.pool.collect().is_err());
        assert!(fx.backend.is_empty());
        assert!(fx.pool.is_dirty(&root.borrow().pid().unwrap()));
        assert!(fx.pool.last_error().is_some());

        assert_eq!(fx.pool.collect().unwrap(), 0);
        assert_eq!(fx.backend.len(), 2);
    }
}
