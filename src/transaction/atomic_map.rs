//! Transactional record store.
//!
//! `AtomicMap` keeps a cache of the committed key space and stages writes of
//! the current transaction in a [`ChangeSet`]. Reads go through the change set
//! first, so a transaction sees its own writes. `commit()` hands the whole set
//! to the backend in one `apply` call; on failure the set is discarded and the
//! cache stays as it was.

use std::collections::{BTreeMap, BTreeSet};

use serde_json::{Map, Value};
use tracing::{debug, info};

use crate::storage::{validate_key, ChangeSet, PendingValue, RecordBackend};
use crate::transaction::context::{TransactionMetadata, TxState};
use crate::transaction::error::{TransactionError, TransactionResult};

struct PendingTx {
    meta: TransactionMetadata,
    changes: ChangeSet,
}

/// Key-value record store with single-writer batched transactions.
pub struct AtomicMap {
    name: String,
    backend: Box<dyn RecordBackend>,
    committed: BTreeMap<String, String>,
    tx: Option<PendingTx>,
    is_open: bool,
    last_tx: Option<TransactionMetadata>,
}

impl AtomicMap {
    /// Create a store over a backend. Nothing is read until `open()`.
    pub fn new(backend: impl RecordBackend + 'static) -> Self {
        Self::from_boxed(Box::new(backend))
    }

    pub fn from_boxed(backend: Box<dyn RecordBackend>) -> Self {
        Self {
            name: backend.name().to_string(),
            backend,
            committed: BTreeMap::new(),
            tx: None,
            is_open: false,
            last_tx: None,
        }
    }

    /// Name of the underlying backend.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Load the durable state. Calling it again is a no-op.
    pub fn open(&mut self) -> TransactionResult<()> {
        if self.is_open {
            return Ok(());
        }
        self.committed = self.backend.load()?;
        self.is_open = true;
        info!(store = %self.name, count = self.committed.len(), "opened record store");
        Ok(())
    }

    pub fn is_open(&self) -> bool {
        self.is_open
    }

    /// Drop the loaded state and any pending transaction. A later `open()`
    /// reads the backend again.
    pub fn close(&mut self) {
        self.abort();
        self.committed.clear();
        self.is_open = false;
    }

    /// Returns `true` between `begin()` and `commit()`/`abort()`.
    pub fn in_transaction(&self) -> bool {
        self.tx.is_some()
    }

    /// Metadata of the most recently finished transaction.
    pub fn last_transaction(&self) -> Option<&TransactionMetadata> {
        self.last_tx.as_ref()
    }

    // ==================== Transaction Control ====================

    /// Start a batched write.
    pub fn begin(&mut self) -> TransactionResult<()> {
        self.ensure_open()?;
        if let Some(tx) = &self.tx {
            return Err(TransactionError::AlreadyActive {
                tx_id: tx.meta.tx_id.clone(),
            });
        }
        let meta = TransactionMetadata::begin();
        debug!(store = %self.name, tx = %meta.tx_id, "begin");
        self.tx = Some(PendingTx {
            meta,
            changes: ChangeSet::new(),
        });
        Ok(())
    }

    /// Flush every write since `begin()` atomically.
    ///
    /// On failure the pending writes are discarded and the committed view is
    /// unchanged.
    pub fn commit(&mut self) -> TransactionResult<()> {
        let mut tx = self.take_tx()?;

        if !tx.changes.is_empty() {
            if let Err(e) = self.backend.apply(&tx.changes, &tx.meta.tx_id) {
                tx.meta.finish(TxState::Aborted);
                debug!(store = %self.name, tx = %tx.meta.tx_id, error = %e, "commit failed");
                self.last_tx = Some(tx.meta);
                return Err(e.into());
            }
            tx.changes.apply_to(&mut self.committed);
        }

        tx.meta.finish(TxState::Committed);
        debug!(
            store = %self.name,
            tx = %tx.meta.tx_id,
            puts = tx.changes.put_count(),
            removes = tx.changes.remove_count(),
            "commit"
        );
        self.last_tx = Some(tx.meta);
        Ok(())
    }

    /// Discard pending writes. Returns `false` if no transaction was active.
    pub fn abort(&mut self) -> bool {
        match self.tx.take() {
            Some(mut tx) => {
                tx.meta.finish(TxState::Aborted);
                debug!(store = %self.name, tx = %tx.meta.tx_id, "abort");
                self.last_tx = Some(tx.meta);
                true
            }
            None => false,
        }
    }

    fn take_tx(&mut self) -> TransactionResult<PendingTx> {
        self.tx
            .take()
            .ok_or_else(|| TransactionError::NoActiveTransaction {
                name: self.name.clone(),
            })
    }

    fn ensure_open(&self) -> TransactionResult<()> {
        if self.is_open {
            Ok(())
        } else {
            Err(TransactionError::NotOpen {
                name: self.name.clone(),
            })
        }
    }

    fn pending_mut(&mut self) -> TransactionResult<&mut ChangeSet> {
        self.ensure_open()?;
        match self.tx.as_mut() {
            Some(tx) => Ok(&mut tx.changes),
            None => Err(TransactionError::NoActiveTransaction {
                name: self.name.clone(),
            }),
        }
    }

    // ==================== Reads ====================

    /// Value stored under `key`, including pending writes.
    pub fn at(&self, key: &str) -> TransactionResult<Option<String>> {
        self.ensure_open()?;
        let pending = self
            .tx
            .as_ref()
            .map_or(PendingValue::Untouched, |tx| tx.changes.get(key));
        Ok(match pending {
            PendingValue::Put(value) => Some(value.to_string()),
            PendingValue::Removed => None,
            PendingValue::Untouched => self.committed.get(key).cloned(),
        })
    }

    pub fn has_key(&self, key: &str) -> TransactionResult<bool> {
        Ok(self.at(key)?.is_some())
    }

    /// All keys in order, including pending writes.
    pub fn keys(&self) -> TransactionResult<Vec<String>> {
        Ok(self.keys_set()?.into_iter().collect())
    }

    pub fn keys_set(&self) -> TransactionResult<BTreeSet<String>> {
        Ok(self.merged_view()?.into_keys().collect())
    }

    pub fn count(&self) -> TransactionResult<usize> {
        Ok(self.merged_view()?.len())
    }

    /// Sum of key and value lengths in bytes.
    pub fn total_bytes(&self) -> TransactionResult<usize> {
        Ok(self
            .merged_view()?
            .iter()
            .map(|(k, v)| k.len() + v.len())
            .sum())
    }

    /// Export of the merged view as a JSON object of strings.
    pub fn as_json(&self) -> TransactionResult<Value> {
        let map: Map<String, Value> = self
            .merged_view()?
            .into_iter()
            .map(|(k, v)| (k, Value::String(v)))
            .collect();
        Ok(Value::Object(map))
    }

    /// One-line summary of the pending transaction.
    pub fn describe(&self) -> String {
        match &self.tx {
            Some(tx) => format!(
                "{} tx:{} put {} remove {}{}",
                self.name,
                tx.meta.tx_id,
                tx.changes.put_count(),
                tx.changes.remove_count(),
                if tx.changes.is_cleared() { " (cleared)" } else { "" }
            ),
            None => format!("{} idle, {} records", self.name, self.committed.len()),
        }
    }

    fn merged_view(&self) -> TransactionResult<BTreeMap<String, String>> {
        self.ensure_open()?;
        let mut view = self.committed.clone();
        if let Some(tx) = &self.tx {
            tx.changes.apply_to(&mut view);
        }
        Ok(view)
    }

    // ==================== Writes ====================

    /// Stage a put. Requires an active transaction.
    pub fn at_put(&mut self, key: &str, value: impl Into<String>) -> TransactionResult<()> {
        validate_key(key)?;
        self.pending_mut()?.put(key, value);
        Ok(())
    }

    /// Stage a removal. Requires an active transaction.
    pub fn remove_key(&mut self, key: &str) -> TransactionResult<()> {
        self.pending_mut()?.remove(key);
        Ok(())
    }

    /// Stage removal of every key. Requires an active transaction.
    pub fn clear_all(&mut self) -> TransactionResult<()> {
        self.pending_mut()?.clear();
        Ok(())
    }

    /// Wipe all durable state outside of any transaction.
    pub fn clear(&mut self) -> TransactionResult<()> {
        self.ensure_open()?;
        if let Some(tx) = &self.tx {
            return Err(TransactionError::InvalidOperation(format!(
                "cannot clear {} while transaction {} is active",
                self.name, tx.meta.tx_id
            )));
        }
        self.backend.clear()?;
        self.committed.clear();
        info!(store = %self.name, "cleared record store");
        Ok(())
    }
}

impl std::fmt::Debug for AtomicMap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AtomicMap")
            .field("name", &self.name)
            .field("is_open", &self.is_open)
            .field("records", &self.committed.len())
            .field("in_transaction", &self.in_transaction())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{MemoryBackend, StoreError};

    fn setup() -> (MemoryBackend, AtomicMap) {
        let backend = MemoryBackend::new();
        let mut map = AtomicMap::new(backend.clone());
        map.open().unwrap();
        (backend, map)
    }

    #[test]
    fn test_read_your_writes() {
        let (backend, mut map) = setup();
        map.begin().unwrap();
        map.at_put("a", "1").unwrap();
        assert_eq!(map.at("a").unwrap().as_deref(), Some("1"));
        assert!(backend.get("a").is_none());

        map.commit().unwrap();
        assert_eq!(backend.get("a").as_deref(), Some("1"));
        assert_eq!(map.last_transaction().unwrap().state, TxState::Committed);
    }

    #[test]
    fn test_writes_require_transaction() {
        let (_backend, mut map) = setup();
        let err = map.at_put("a", "1").unwrap_err();
        assert!(matches!(err, TransactionError::NoActiveTransaction { .. }));
        assert!(matches!(
            map.remove_key("a"),
            Err(TransactionError::NoActiveTransaction { .. })
        ));
        assert!(matches!(
            map.commit(),
            Err(TransactionError::NoActiveTransaction { .. })
        ));
    }

    #[test]
    fn test_begin_twice_fails() {
        let (_backend, mut map) = setup();
        map.begin().unwrap();
        assert!(matches!(
            map.begin(),
            Err(TransactionError::AlreadyActive { .. })
        ));
    }

    #[test]
    fn test_requires_open() {
        let mut map = AtomicMap::new(MemoryBackend::new());
        assert!(matches!(map.begin(), Err(TransactionError::NotOpen { .. })));
        assert!(matches!(map.at("a"), Err(TransactionError::NotOpen { .. })));
        map.open().unwrap();
        map.open().unwrap();
        assert!(map.is_open());
    }

    #[test]
    fn test_close_then_reopen_reloads() {
        let (backend, mut map) = setup();
        map.begin().unwrap();
        map.at_put("pending", "1").unwrap();
        backend.insert_raw("outside", "2");

        map.close();
        assert!(!map.is_open());
        assert!(!map.in_transaction());
        assert!(matches!(map.at("outside"), Err(TransactionError::NotOpen { .. })));

        map.open().unwrap();
        assert_eq!(map.at("outside").unwrap().as_deref(), Some("2"));
        assert!(map.at("pending").unwrap().is_none());
    }

    #[test]
    fn test_open_loads_durable_state() {
        let backend = MemoryBackend::new();
        backend.insert_raw("root", "abc");
        let mut map = AtomicMap::new(backend);
        map.open().unwrap();
        assert_eq!(map.at("root").unwrap().as_deref(), Some("abc"));
        assert_eq!(map.count().unwrap(), 1);
    }

    #[test]
    fn test_failed_commit_discards_changes() {
        let (backend, mut map) = setup();
        map.begin().unwrap();
        map.at_put("keep", "1").unwrap();
        map.commit().unwrap();

        backend.fail_next_commit();
        map.begin().unwrap();
        map.at_put("lost", "2").unwrap();
        map.remove_key("keep").unwrap();
        let err = map.commit().unwrap_err();
        assert!(err.is_retryable());

        assert!(!map.in_transaction());
        assert!(map.at("lost").unwrap().is_none());
        assert_eq!(map.at("keep").unwrap().as_deref(), Some("1"));
        assert_eq!(map.last_transaction().unwrap().state, TxState::Aborted);
    }

    #[test]
    fn test_abort() {
        let (_backend, mut map) = setup();
        assert!(!map.abort());
        map.begin().unwrap();
        map.at_put("a", "1").unwrap();
        assert!(map.abort());
        assert!(map.at("a").unwrap().is_none());
    }

    #[test]
    fn test_clear_all_within_transaction() {
        let backend = MemoryBackend::new();
        backend.insert_raw("a", "1");
        backend.insert_raw("b", "2");
        let mut map = AtomicMap::new(backend.clone());
        map.open().unwrap();

        map.begin().unwrap();
        map.clear_all().unwrap();
        map.at_put("c", "3").unwrap();
        assert_eq!(map.keys().unwrap(), vec!["c".to_string()]);
        map.commit().unwrap();

        assert_eq!(backend.len(), 1);
    }

    #[test]
    fn test_clear_not_allowed_in_transaction() {
        let (backend, mut map) = setup();
        map.begin().unwrap();
        map.at_put("a", "1").unwrap();
        map.commit().unwrap();

        map.begin().unwrap();
        assert!(matches!(
            map.clear(),
            Err(TransactionError::InvalidOperation(_))
        ));
        map.abort();

        map.clear().unwrap();
        assert_eq!(map.count().unwrap(), 0);
        assert!(backend.is_empty());
    }

    #[test]
    fn test_invalid_key() {
        let (_backend, mut map) = setup();
        map.begin().unwrap();
        let err = map.at_put("bad key", "1").unwrap_err();
        assert!(matches!(
            err,
            TransactionError::Storage(StoreError::InvalidKey(_))
        ));
    }

    #[test]
    fn test_empty_commit_skips_backend() {
        let (backend, mut map) = setup();
        map.begin().unwrap();
        map.commit().unwrap();
        assert_eq!(backend.commit_count(), 0);
    }

    #[test]
    fn test_export_and_sizes() {
        let (_backend, mut map) = setup();
        map.begin().unwrap();
        map.at_put("ab", "123").unwrap();
        assert_eq!(map.total_bytes().unwrap(), 5);
        assert!(map.describe().contains("put 1 remove 0"));
        map.commit().unwrap();

        let json = map.as_json().unwrap();
        assert_eq!(json["ab"], Value::String("123".to_string()));
        assert!(map.has_key("ab").unwrap());
        assert!(map.keys_set().unwrap().contains("ab"));
    }
}
