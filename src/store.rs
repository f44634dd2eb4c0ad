//! Cache Store - Bounded TTL Map
//!
//! In-memory `key -> entry` map with per-entry TTL, a fixed capacity and
//! batch eviction of the oldest entries. Optionally writes through to a
//! [`PersistentStorage`] backend.
//!
//! # Eviction
//!
//! When a new key is inserted into a full store, entries are sorted by the
//! time they were stored (refresh recency, not access recency) and the oldest
//! `eviction_percent` of them (at least one) are dropped before the insert.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::codecs::JsonCodec;
use crate::error::CacheError;
use crate::traits::{CacheCodec, PersistentStorage};

/// Configuration for [`CacheStore`]
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Maximum number of entries held in memory
    pub max_entries: usize,
    /// Share of entries dropped by one eviction pass, in percent
    pub eviction_percent: usize,
    /// TTL used when a caller does not supply one
    pub default_ttl: Duration,
    /// Prefix prepended to keys in persistent storage
    pub persist_prefix: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            max_entries: 100,
            eviction_percent: 20,
            default_ttl: Duration::from_secs(300),
            persist_prefix: "app_cache_".to_string(),
        }
    }
}

/// How a read treats expired entries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReadMode {
    /// Expired entries are a miss and are dropped on the spot
    #[default]
    Strict,
    /// Expired entries are returned, flagged as stale
    AllowStale,
}

/// Entry owned by the store; replaced wholesale, never patched
#[derive(Debug, Clone)]
struct CacheEntry {
    data: Value,
    stored_at: Instant,
    stored_wall: SystemTime,
    ttl: Duration,
    /// Insertion order, breaks ties between entries stored in the same instant
    sequence: u64,
}

impl CacheEntry {
    fn is_stale(&self) -> bool {
        self.stored_at.elapsed() > self.ttl
    }
}

/// Result of a store read
#[derive(Debug, Clone, PartialEq)]
pub struct CacheLookup {
    pub data: Value,
    pub age: Duration,
    pub ttl: Duration,
    pub is_stale: bool,
}

/// Per-entry view returned by [`CacheStore::stats`]
#[derive(Debug, Clone, Serialize)]
pub struct EntryInfo {
    pub key: String,
    pub stored_at: SystemTime,
    pub age: Duration,
    pub ttl: Duration,
    pub is_stale: bool,
}

/// Snapshot of the store contents
#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
    pub size: usize,
    pub max_size: usize,
    pub evictions: u64,
    pub entries: Vec<EntryInfo>,
}

/// Record written to persistent storage under `<prefix><key>`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedEntry {
    pub data: Value,
    /// Unix epoch milliseconds
    pub stored_at: u64,
    /// Milliseconds
    pub ttl: u64,
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// Write-through link between the store and a storage backend
struct Persistence {
    storage: Arc<dyn PersistentStorage>,
    codec: JsonCodec,
    prefix: String,
}

impl Persistence {
    fn storage_key(&self, key: &str) -> String {
        format!("{}{key}", self.prefix)
    }

    fn save(&self, key: &str, entry: &CacheEntry) {
        let record = PersistedEntry {
            data: entry.data.clone(),
            stored_at: millis(entry.stored_wall.duration_since(UNIX_EPOCH).unwrap_or_default()),
            ttl: millis(entry.ttl),
        };
        let result = self
            .codec
            .serialize(&record)
            .and_then(|bytes| self.storage.save(&self.storage_key(key), &bytes));
        if let Err(e) = result {
            warn!(key = %key, storage = self.storage.name(), "Failed to persist cache entry: {e:#}");
        }
    }

    fn remove(&self, key: &str) {
        if let Err(e) = self.storage.remove(&self.storage_key(key)) {
            warn!(key = %key, storage = self.storage.name(), "Failed to remove persisted entry: {e:#}");
        }
    }

    fn stored_keys(&self) -> Vec<String> {
        match self.storage.keys() {
            Ok(keys) => keys
                .into_iter()
                .filter_map(|k| k.strip_prefix(&self.prefix).map(str::to_string))
                .collect(),
            Err(e) => {
                warn!(storage = self.storage.name(), "Failed to list persisted entries: {e:#}");
                Vec::new()
            }
        }
    }

    fn load(&self, key: &str) -> Option<PersistedEntry> {
        let bytes = match self.storage.load(&self.storage_key(key)) {
            Ok(bytes) => bytes?,
            Err(e) => {
                warn!(key = %key, "Failed to read persisted entry: {e:#}");
                return None;
            }
        };
        match self.codec.deserialize(&bytes) {
            Ok(record) => Some(record),
            Err(e) => {
                warn!(key = %key, codec = self.codec.name(), "Discarding undecodable persisted entry: {e:#}");
                self.remove(key);
                None
            }
        }
    }
}

/// Bounded in-memory cache store
pub struct CacheStore {
    entries: RwLock<HashMap<String, CacheEntry>>,
    config: StoreConfig,
    sequence: AtomicU64,
    evictions: AtomicU64,
    persistence: Option<Persistence>,
}

impl CacheStore {
    /// Create a memory-only store
    #[must_use]
    pub fn new(config: StoreConfig) -> Self {
        info!(capacity = config.max_entries, "Initializing cache store");
        Self {
            entries: RwLock::new(HashMap::with_capacity(config.max_entries)),
            config,
            sequence: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
            persistence: None,
        }
    }

    /// Create a store that writes through to `storage`
    #[must_use]
    pub fn with_storage(config: StoreConfig, storage: Arc<dyn PersistentStorage>) -> Self {
        info!(storage = storage.name(), "Cache store persistence enabled");
        let prefix = config.persist_prefix.clone();
        Self {
            persistence: Some(Persistence {
                storage,
                codec: JsonCodec::default(),
                prefix,
            }),
            ..Self::new(config)
        }
    }

    /// Read an entry
    ///
    /// In [`ReadMode::Strict`] an expired entry counts as a miss and is removed.
    /// [`ReadMode::AllowStale`] never mutates the store.
    pub fn get(&self, key: &str, mode: ReadMode) -> Option<CacheLookup> {
        let lookup = {
            let entries = self.entries.read();
            let entry = entries.get(key)?;
            CacheLookup {
                data: entry.data.clone(),
                age: entry.stored_at.elapsed(),
                ttl: entry.ttl,
                is_stale: entry.is_stale(),
            }
        };

        if lookup.is_stale && mode == ReadMode::Strict {
            let mut entries = self.entries.write();
            // Another writer may have replaced the entry since the read lock was released
            if entries.get(key).is_some_and(CacheEntry::is_stale) {
                entries.remove(key);
                if let Some(persistence) = &self.persistence {
                    persistence.remove(key);
                }
                debug!(key = %key, "Dropped expired entry on read");
            }
            return None;
        }

        Some(lookup)
    }

    /// Insert or replace an entry, evicting first if the store is full
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::InvalidTtl`] if `ttl` is zero.
    pub fn set(&self, key: &str, data: Value, ttl: Duration) -> Result<(), CacheError> {
        if ttl.is_zero() {
            return Err(CacheError::InvalidTtl { key: key.to_string() });
        }

        let entry = CacheEntry {
            data,
            stored_at: Instant::now(),
            stored_wall: SystemTime::now(),
            ttl,
            sequence: self.sequence.fetch_add(1, Ordering::Relaxed),
        };

        let mut entries = self.entries.write();
        if !entries.contains_key(key) && entries.len() >= self.config.max_entries {
            self.evict_oldest(&mut entries);
        }
        if let Some(persistence) = &self.persistence {
            persistence.save(key, &entry);
        }
        entries.insert(key.to_string(), entry);
        debug!(key = %key, ttl_ms = millis(ttl), "Cached entry");
        Ok(())
    }

    fn evict_oldest(&self, entries: &mut HashMap<String, CacheEntry>) {
        let count = (entries.len() * self.config.eviction_percent / 100).max(1);

        let mut by_age: Vec<(&String, Instant, u64)> = entries
            .iter()
            .map(|(key, entry)| (key, entry.stored_at, entry.sequence))
            .collect();
        by_age.sort_by_key(|&(_, stored_at, sequence)| (stored_at, sequence));
        let victims: Vec<String> = by_age
            .into_iter()
            .take(count)
            .map(|(key, _, _)| key.clone())
            .collect();

        for key in &victims {
            entries.remove(key);
            if let Some(persistence) = &self.persistence {
                persistence.remove(key);
            }
        }
        self.evictions.fetch_add(victims.len() as u64, Ordering::Relaxed);
        debug!(count = victims.len(), "Evicted oldest entries");
    }

    /// Remove one entry; returns whether it existed
    pub fn remove(&self, key: &str) -> bool {
        let removed = self.entries.write().remove(key).is_some();
        if let Some(persistence) = &self.persistence {
            persistence.remove(key);
        }
        removed
    }

    /// Remove every entry whose key satisfies `predicate`, under a single lock
    ///
    /// Returns the removed keys.
    pub fn remove_matching<F>(&self, mut predicate: F) -> Vec<String>
    where
        F: FnMut(&str) -> bool,
    {
        let mut removed = Vec::new();
        let mut entries = self.entries.write();
        entries.retain(|key, _| {
            if predicate(key) {
                removed.push(key.clone());
                false
            } else {
                true
            }
        });
        if let Some(persistence) = &self.persistence {
            for key in &removed {
                persistence.remove(key);
            }
        }
        removed
    }

    /// Remove every entry, in memory and in persistent storage
    pub fn clear(&self) -> usize {
        let count = {
            let mut entries = self.entries.write();
            let count = entries.len();
            entries.clear();
            count
        };
        if let Some(persistence) = &self.persistence {
            for key in persistence.stored_keys() {
                persistence.remove(&key);
            }
        }
        info!(count, "Cache store cleared");
        count
    }

    /// Drop in-memory entries only, leaving persisted records in place
    pub fn unload(&self) -> usize {
        let mut entries = self.entries.write();
        let count = entries.len();
        entries.clear();
        count
    }

    /// Load persisted entries into memory
    ///
    /// Expired and undecodable records are deleted from storage. If storage
    /// holds more records than the store capacity, the most recent ones win.
    /// Returns the number of entries restored.
    pub fn restore(&self) -> usize {
        let Some(persistence) = &self.persistence else {
            return 0;
        };

        let now_wall = SystemTime::now();
        let mut records: Vec<(String, PersistedEntry, Duration)> = Vec::new();
        for key in persistence.stored_keys() {
            let Some(record) = persistence.load(&key) else {
                continue;
            };
            let stored_wall = UNIX_EPOCH + Duration::from_millis(record.stored_at);
            let age = now_wall.duration_since(stored_wall).unwrap_or_default();
            if record.ttl == 0 || age > Duration::from_millis(record.ttl) {
                persistence.remove(&key);
                continue;
            }
            records.push((key, record, age));
        }

        records.sort_by_key(|(_, _, age)| *age);
        records.truncate(self.config.max_entries);

        let now = Instant::now();
        let mut entries = self.entries.write();
        let restored = records.len();
        // Oldest first so that sequence numbers follow storage order
        for (key, record, age) in records.into_iter().rev() {
            entries.insert(
                key,
                CacheEntry {
                    data: record.data,
                    stored_at: now.checked_sub(age).unwrap_or(now),
                    stored_wall: UNIX_EPOCH + Duration::from_millis(record.stored_at),
                    ttl: Duration::from_millis(record.ttl),
                    sequence: self.sequence.fetch_add(1, Ordering::Relaxed),
                },
            );
        }
        info!(count = restored, "Restored persisted cache entries");
        restored
    }

    /// Snapshot of current keys
    pub fn keys(&self) -> Vec<String> {
        self.entries.read().keys().cloned().collect()
    }

    /// Whether `key` is present (fresh or stale)
    pub fn contains(&self, key: &str) -> bool {
        self.entries.read().contains_key(key)
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Whether the store is empty
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Maximum number of entries
    pub fn capacity(&self) -> usize {
        self.config.max_entries
    }

    /// Default TTL from configuration
    pub fn default_ttl(&self) -> Duration {
        self.config.default_ttl
    }

    /// Number of entries past their TTL
    pub fn stale_count(&self) -> usize {
        self.entries.read().values().filter(|e| e.is_stale()).count()
    }

    /// Size, capacity and per-entry details
    pub fn stats(&self) -> CacheStats {
        let entries = self.entries.read();
        let mut infos: Vec<EntryInfo> = entries
            .iter()
            .map(|(key, entry)| EntryInfo {
                key: key.clone(),
                stored_at: entry.stored_wall,
                age: entry.stored_at.elapsed(),
                ttl: entry.ttl,
                is_stale: entry.is_stale(),
            })
            .collect();
        infos.sort_by(|a, b| a.key.cmp(&b.key));

        CacheStats {
            size: entries.len(),
            max_size: self.config.max_entries,
            evictions: self.evictions.load(Ordering::Relaxed),
            entries: infos,
        }
    }
}
