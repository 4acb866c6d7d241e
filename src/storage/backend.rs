use std::collections::BTreeMap;

use crate::storage::change_set::ChangeSet;
use crate::storage::error::StoreResult;

/// Durable medium beneath the transactional record map.
///
/// All implementations must satisfy these invariants:
/// - `apply` is atomic: either every change in the set is durable, or an
///   error is returned and the durable state is unchanged.
/// - `load` returns the state produced by the last successful `apply`.
/// - Keys are plain record keys; values are opaque strings.
pub trait RecordBackend {
    /// Human-readable name used in logs.
    fn name(&self) -> &str;

    /// Read the full durable key space.
    fn load(&mut self) -> StoreResult<BTreeMap<String, String>>;

    /// Persist a change set atomically.
    fn apply(&mut self, changes: &ChangeSet, tx_id: &str) -> StoreResult<()>;

    /// Wipe all durable state.
    fn clear(&mut self) -> StoreResult<()> {
        let mut changes = ChangeSet::new();
        changes.clear();
        self.apply(&changes, "clear")
    }
}

impl<B: RecordBackend + ?Sized> RecordBackend for Box<B> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn load(&mut self) -> StoreResult<BTreeMap<String, String>> {
        (**self).load()
    }

    fn apply(&mut self, changes: &ChangeSet, tx_id: &str) -> StoreResult<()> {
        (**self).apply(changes, tx_id)
    }

    fn clear(&mut self) -> StoreResult<()> {
        (**self).clear()
    }
}
