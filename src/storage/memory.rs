use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use crate::storage::backend::RecordBackend;
use crate::storage::change_set::ChangeSet;
use crate::storage::error::{StoreError, StoreResult};

/// In-memory record backend.
///
/// Clone this to share the same durable map between pools - it uses Arc
/// internally, the way a browser-local database outlives any one page.
/// Faults can be injected to exercise failure paths.
#[derive(Clone)]
pub struct MemoryBackend {
    inner: Arc<MemoryBackendInner>,
}

struct MemoryBackendInner {
    name: String,
    records: RwLock<BTreeMap<String, String>>,
    faults: Mutex<Faults>,
}

#[derive(Default)]
struct Faults {
    fail_open: usize,
    fail_commit: usize,
    commits: usize,
}

impl MemoryBackend {
    /// Create a new empty backend.
    pub fn new() -> Self {
        Self::named("memory")
    }

    /// Create a new empty backend with a name for logs.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(MemoryBackendInner {
                name: name.into(),
                records: RwLock::new(BTreeMap::new()),
                faults: Mutex::new(Faults::default()),
            }),
        }
    }

    /// Snapshot of the durable records.
    pub fn records(&self) -> BTreeMap<String, String> {
        self.inner.records.read().clone()
    }

    /// Durable value for one key.
    pub fn get(&self, key: &str) -> Option<String> {
        self.inner.records.read().get(key).cloned()
    }

    /// Number of durable records.
    pub fn len(&self) -> usize {
        self.inner.records.read().len()
    }

    /// Returns `true` if nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.inner.records.read().is_empty()
    }

    /// Write a record directly, bypassing any transaction.
    pub fn insert_raw(&self, key: impl Into<String>, value: impl Into<String>) {
        self.inner.records.write().insert(key.into(), value.into());
    }

    /// Make the next `load` fail.
    pub fn fail_next_open(&self) {
        self.inner.faults.lock().fail_open += 1;
    }

    /// Make the next `apply` fail without changing anything.
    pub fn fail_next_commit(&self) {
        self.inner.faults.lock().fail_commit += 1;
    }

    /// Number of change sets applied so far.
    pub fn commit_count(&self) -> usize {
        self.inner.faults.lock().commits
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordBackend for MemoryBackend {
    fn name(&self) -> &str {
        &self.inner.name
    }

    fn load(&mut self) -> StoreResult<BTreeMap<String, String>> {
        {
            let mut faults = self.inner.faults.lock();
            if faults.fail_open > 0 {
                faults.fail_open -= 1;
                return Err(StoreError::OpenFailed(format!(
                    "{}: injected open failure",
                    self.inner.name
                )));
            }
        }
        Ok(self.records())
    }

    fn apply(&mut self, changes: &ChangeSet, tx_id: &str) -> StoreResult<()> {
        let mut faults = self.inner.faults.lock();
        if faults.fail_commit > 0 {
            faults.fail_commit -= 1;
            return Err(StoreError::CommitFailed(format!(
                "{}: injected commit failure in tx {}",
                self.inner.name, tx_id
            )));
        }
        changes.apply_to(&mut self.inner.records.write());
        faults.commits += 1;
        Ok(())
    }
}

impl std::fmt::Debug for MemoryBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryBackend")
            .field("name", &self.inner.name)
            .field("record_count", &self.len())
            .finish()
    }
}
