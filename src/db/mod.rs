//! Key/value persistence backends for session snapshots.
//!
//! Two logical namespaces are used by the record store: a durable one that
//! survives navigation ([`SqliteStore`]) and a session-scoped backup
//! ([`MemoryStore`]). Both hold opaque serialized snapshots.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard},
};

use anyhow::{bail, Result};

mod migrations;
mod sqlite;

pub use sqlite::SqliteStore;

pub trait KeyValueStore: Send {
    fn get(&self, key: &str) -> Result<Option<String>>;
    fn set(&mut self, key: &str, value: &str) -> Result<()>;
    fn remove(&mut self, key: &str) -> Result<()>;
}

pub type BoxedStore = Box<dyn KeyValueStore>;

#[derive(Default)]
struct MemoryInner {
    entries: HashMap<String, String>,
    writes: usize,
}

/// In-process store. Clones share the same entries, so a caller can keep a
/// handle for inspection after boxing one into a record store.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<MemoryInner>>,
    quota_bytes: Option<usize>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rejects any write that would push the total stored bytes past `quota_bytes`.
    pub fn with_quota(quota_bytes: usize) -> Self {
        Self {
            inner: Arc::default(),
            quota_bytes: Some(quota_bytes),
        }
    }

    /// Number of successful `set` calls so far.
    pub fn write_count(&self) -> usize {
        self.lock().writes
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> MutexGuard<'_, MemoryInner> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.lock().entries.get(key).cloned())
    }

    fn set(&mut self, key: &str, value: &str) -> Result<()> {
        let quota = self.quota_bytes;
        let mut guard = self.lock();

        if let Some(quota) = quota {
            let used: usize = guard
                .entries
                .iter()
                .filter(|(existing, _)| existing.as_str() != key)
                .map(|(k, v)| k.len() + v.len())
                .sum();
            let needed = used + key.len() + value.len();
            if needed > quota {
                bail!("storage quota exceeded: {needed} bytes needed, {quota} available");
            }
        }

        guard.entries.insert(key.to_string(), value.to_string());
        guard.writes += 1;
        Ok(())
    }

    fn remove(&mut self, key: &str) -> Result<()> {
        self.lock().entries.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_share_entries() {
        let store = MemoryStore::new();
        let mut writer = store.clone();
        writer.set("k", "v").unwrap();

        assert_eq!(store.get("k").unwrap().as_deref(), Some("v"));
        assert_eq!(store.write_count(), 1);

        writer.remove("k").unwrap();
        assert!(store.is_empty());
    }

    #[test]
    fn quota_rejects_oversized_writes() {
        let mut store = MemoryStore::with_quota(10);
        store.set("a", "12345").unwrap();
        assert!(store.set("b", "123456789").is_err());
        // Overwriting an existing key only counts the new value.
        store.set("a", "123456789").unwrap();
        assert_eq!(store.write_count(), 2);
    }
}
