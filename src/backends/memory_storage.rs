//! `DashMap` Storage - In-Memory Persistent Storage Backend
//!
//! Keeps persisted records in a concurrent map. Nothing survives the process,
//! which makes it the storage of choice for tests and for hosts without a
//! durable store.

use anyhow::Result;
use dashmap::DashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

use crate::traits::PersistentStorage;

/// Concurrent in-memory storage using `DashMap`
///
/// **Example**:
/// ```rust
/// use self_healing_cache::backends::MemoryStorage;
/// use self_healing_cache::PersistentStorage;
///
/// # fn example() -> anyhow::Result<()> {
/// let storage = MemoryStorage::new();
/// storage.save("app_cache_profiles", b"{}")?;
/// assert_eq!(storage.load("app_cache_profiles")?, Some(b"{}".to_vec()));
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Default)]
pub struct MemoryStorage {
    records: Arc<DashMap<String, Vec<u8>>>,
    writes: Arc<AtomicU64>,
}

impl MemoryStorage {
    /// Create empty storage
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored records
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether storage holds no records
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Total number of `save` calls
    #[must_use]
    pub fn writes(&self) -> u64 {
        self.writes.load(Ordering::Relaxed)
    }
}

impl PersistentStorage for MemoryStorage {
    fn load(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.records.get(key).map(|record| record.value().clone()))
    }

    fn save(&self, key: &str, bytes: &[u8]) -> Result<()> {
        self.records.insert(key.to_string(), bytes.to_vec());
        self.writes.fetch_add(1, Ordering::Relaxed);
        debug!(key = %key, bytes = bytes.len(), "[MemoryStorage] Saved record");
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.records.remove(key);
        Ok(())
    }

    fn keys(&self) -> Result<Vec<String>> {
        Ok(self.records.iter().map(|record| record.key().clone()).collect())
    }

    fn name(&self) -> &'static str {
        "DashMap"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_save_load_remove() {
        let storage = MemoryStorage::new();
        storage.save("k", b"v1").unwrap();
        storage.save("k", b"v2").unwrap();
        assert_eq!(storage.load("k").unwrap(), Some(b"v2".to_vec()));
        assert_eq!(storage.writes(), 2);

        storage.remove("k").unwrap();
        assert_eq!(storage.load("k").unwrap(), None);
        assert!(storage.is_empty());
    }

    #[test]
    fn test_clones_share_records() {
        let storage = MemoryStorage::new();
        let view = storage.clone();
        storage.save("a", b"1").unwrap();
        assert_eq!(view.keys().unwrap(), vec!["a".to_string()]);
    }
}
