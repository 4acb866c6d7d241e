//! Pending writes of one transaction.
//!
//! A change set records puts and removes in key order. `clear()` marks the
//! whole key space for deletion; puts made after the clear still apply.

use std::collections::BTreeMap;

/// What a change set says about one key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PendingValue<'a> {
    /// the key will hold this value after commit
    Put(&'a str),
    /// the key will be gone after commit
    Removed,
    /// the change set does not touch the key
    Untouched,
}

/// A single pending write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Change {
    Put(String),
    Remove,
}

/// Ordered set of pending writes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeSet {
    cleared: bool,
    changes: BTreeMap<String, Change>,
}

impl ChangeSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// record a put, replacing any earlier change to the key
    pub fn put(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.changes.insert(key.into(), Change::Put(value.into()));
    }

    /// record a removal, replacing any earlier change to the key
    pub fn remove(&mut self, key: impl Into<String>) {
        self.changes.insert(key.into(), Change::Remove);
    }

    /// drop every earlier change and wipe the key space on commit
    pub fn clear(&mut self) {
        self.cleared = true;
        self.changes.clear();
    }

    /// true if the backend must be wiped before the changes apply
    pub fn is_cleared(&self) -> bool {
        self.cleared
    }

    /// true if committing would change nothing
    pub fn is_empty(&self) -> bool {
        !self.cleared && self.changes.is_empty()
    }

    /// look up a key; keys untouched after a clear read as removed
    pub fn get(&self, key: &str) -> PendingValue<'_> {
        match self.changes.get(key) {
            Some(Change::Put(value)) => PendingValue::Put(value),
            Some(Change::Remove) => PendingValue::Removed,
            None if self.cleared => PendingValue::Removed,
            None => PendingValue::Untouched,
        }
    }

    /// iterate changes in key order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Change)> {
        self.changes.iter().map(|(k, c)| (k.as_str(), c))
    }

    /// number of keys written
    pub fn put_count(&self) -> usize {
        self.changes
            .values()
            .filter(|c| matches!(c, Change::Put(_)))
            .count()
    }

    /// number of keys removed
    pub fn remove_count(&self) -> usize {
        self.changes.len() - self.put_count()
    }

    /// Apply this change set to a plain map.
    pub fn apply_to(&self, map: &mut BTreeMap<String, String>) {
        if self.cleared {
            map.clear();
        }
        for (key, change) in &self.changes {
            match change {
                Change::Put(value) => {
                    map.insert(key.clone(), value.clone());
                }
                Change::Remove => {
                    map.remove(key);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_last_write_wins() {
        let mut cs = ChangeSet::new();
        cs.put("a", "1");
        cs.remove("a");
        assert_eq!(cs.get("a"), PendingValue::Removed);
        cs.put("a", "2");
        assert_eq!(cs.get("a"), PendingValue::Put("2"));
        assert_eq!(cs.get("b"), PendingValue::Untouched);
    }

    #[test]
    fn test_clear_then_put() {
        let mut cs = ChangeSet::new();
        cs.put("a", "1");
        cs.clear();
        cs.put("b", "2");
        assert!(cs.is_cleared());
        assert_eq!(cs.get("a"), PendingValue::Removed);
        assert_eq!(cs.get("b"), PendingValue::Put("2"));

        let mut map = BTreeMap::new();
        map.insert("z".to_string(), "old".to_string());
        cs.apply_to(&mut map);
        assert_eq!(map.len(), 1);
        assert_eq!(map.get("b").map(String::as_str), Some("2"));
    }

    #[test]
    fn test_counts() {
        let mut cs = ChangeSet::new();
        assert!(cs.is_empty());
        cs.put("a", "1");
        cs.put("b", "1");
        cs.remove("c");
        assert_eq!(cs.put_count(), 2);
        assert_eq!(cs.remove_count(), 1);
        assert!(!cs.is_empty());
    }
}
