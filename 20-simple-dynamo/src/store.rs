//! Local key-value storage owned by each node.
//!
//! The node core only talks to storage through [`LocalStore`]; the bundled
//! [`MemoryStore`] keeps records in a mutex-guarded `BTreeMap` so that scans
//! come back in key order.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// One stored `(key, value)` pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub key: String,
    pub value: String,
}

impl Record {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// Durable key-value table used by the node core.
///
/// Implementations must tolerate concurrent calls from connection handler
/// tasks. Writes are last-write-wins; there is no versioning.
pub trait LocalStore: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;

    /// Stores `value` under `key`, overwriting any existing value.
    fn put(&self, key: String, value: String);

    /// Like [`LocalStore::put`], but hands back the value it replaced.
    fn replace(&self, key: String, value: String) -> Option<String>;

    /// Removes `key` and returns the number of rows removed (0 or 1).
    fn delete(&self, key: &str) -> usize;

    /// Every record, in key order.
    fn scan_all(&self) -> Vec<Record>;

    fn len(&self) -> usize {
        self.scan_all().len()
    }

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Thread-safe in-memory store.
///
/// `Mutex` rather than `RwLock`: every inbound insert and delete writes, and
/// reads are a single map lookup.
#[derive(Debug, Default)]
pub struct MemoryStore {
    data: Mutex<BTreeMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn data(&self) -> MutexGuard<'_, BTreeMap<String, String>> {
        // A panicked writer leaves the map itself intact.
        self.data.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl LocalStore for MemoryStore {
    fn get(&self, key: &str) -> Option<String> {
        self.data().get(key).cloned()
    }

    fn put(&self, key: String, value: String) {
        self.data().insert(key, value);
    }

    fn replace(&self, key: String, value: String) -> Option<String> {
        self.data().insert(key, value)
    }

    fn delete(&self, key: &str) -> usize {
        usize::from(self.data().remove(key).is_some())
    }

    fn scan_all(&self) -> Vec<Record> {
        self.data()
            .iter()
            .map(|(key, value)| Record::new(key.clone(), value.clone()))
            .collect()
    }

    fn len(&self) -> usize {
        self.data().len()
    }
}
