//! Invalidation Manager
//!
//! Removes cache entries by key or by pattern and tells subscribers about it.
//!
//! Patterns can be applied immediately with [`InvalidationManager::invalidate_pattern`],
//! or queued with [`InvalidationManager::queue_invalidation`]: queued patterns are
//! collected until no new pattern has arrived for the debounce period, then
//! applied together in a single pass over the key set.
//!
//! Every pattern pass emits an [`InvalidationEvent`] on a broadcast channel.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::keys::{KEY_SEPARATOR, KeyPattern};
use crate::store::CacheStore;

/// Configuration for cache invalidation
#[derive(Debug, Clone)]
pub struct InvalidationConfig {
    /// Quiet period that closes a batch of queued patterns
    pub debounce: Duration,

    /// Buffer size of the invalidation event channel
    pub channel_capacity: usize,

    /// Resources derived from others, invalidated on every mutation
    pub aggregate_resources: Vec<String>,
}

impl Default for InvalidationConfig {
    fn default() -> Self {
        Self {
            debounce: Duration::from_millis(100),
            channel_capacity: 64,
            aggregate_resources: vec!["analytics".to_string(), "dashboard".to_string()],
        }
    }
}

/// Notification emitted after a pattern invalidation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvalidationEvent {
    pub pattern: String,
    pub invalidated_count: usize,
}

/// Kind of write performed against the data source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MutationKind {
    Create,
    Update,
    Delete,
}

/// A write whose cached reads must be invalidated
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mutation {
    pub kind: MutationKind,
    pub resource: String,
    /// Owner of the written rows, usually the acting user id
    pub scope: Option<String>,
}

impl Mutation {
    pub fn create(resource: impl Into<String>, scope: Option<&str>) -> Self {
        Self::new(MutationKind::Create, resource, scope)
    }

    pub fn update(resource: impl Into<String>, scope: Option<&str>) -> Self {
        Self::new(MutationKind::Update, resource, scope)
    }

    pub fn delete(resource: impl Into<String>, scope: Option<&str>) -> Self {
        Self::new(MutationKind::Delete, resource, scope)
    }

    fn new(kind: MutationKind, resource: impl Into<String>, scope: Option<&str>) -> Self {
        Self {
            kind,
            resource: resource.into(),
            scope: scope.map(str::to_string),
        }
    }

    /// Patterns to invalidate: the resource's keys for the scope, then every aggregate
    ///
    /// A scope matches keys whose filters hold the scope as a JSON string
    /// (for instance `{"userId":"u1"}`), so `u1` never matches `u10`.
    pub fn patterns(&self, aggregates: &[String]) -> Vec<String> {
        let mut patterns = Vec::with_capacity(aggregates.len() + 1);
        match &self.scope {
            Some(scope) => {
                let quoted = Value::String(scope.clone()).to_string();
                patterns.push(format!("{}{KEY_SEPARATOR}*{quoted}*", self.resource));
            }
            None => patterns.push(format!("{}*", self.resource)),
        }
        patterns.extend(
            aggregates
                .iter()
                .filter(|aggregate| **aggregate != self.resource)
                .map(|aggregate| format!("{aggregate}*")),
        );
        patterns
    }
}

/// Statistics for invalidation operations
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct InvalidationStats {
    /// Single-key invalidations
    pub keys_invalidated: u64,

    /// Patterns applied, immediately or in a batch
    pub patterns_processed: u64,

    /// Debounced or explicitly flushed batches
    pub batches_processed: u64,

    /// Entries removed by pattern passes
    pub entries_removed: u64,

    /// Patterns accepted into the queue
    pub patterns_queued: u64,
}

/// Thread-safe statistics for invalidation operations
#[derive(Debug, Default)]
pub struct AtomicInvalidationStats {
    pub keys_invalidated: AtomicU64,
    pub patterns_processed: AtomicU64,
    pub batches_processed: AtomicU64,
    pub entries_removed: AtomicU64,
    pub patterns_queued: AtomicU64,
}

impl AtomicInvalidationStats {
    pub fn snapshot(&self) -> InvalidationStats {
        InvalidationStats {
            keys_invalidated: self.keys_invalidated.load(Ordering::Relaxed),
            patterns_processed: self.patterns_processed.load(Ordering::Relaxed),
            batches_processed: self.batches_processed.load(Ordering::Relaxed),
            entries_removed: self.entries_removed.load(Ordering::Relaxed),
            patterns_queued: self.patterns_queued.load(Ordering::Relaxed),
        }
    }
}

/// Key and pattern invalidation over a [`CacheStore`]
pub struct InvalidationManager {
    store: Arc<CacheStore>,
    config: InvalidationConfig,
    events: broadcast::Sender<InvalidationEvent>,
    queue: Mutex<Vec<String>>,
    debounce_task: Mutex<Option<JoinHandle<()>>>,
    stats: AtomicInvalidationStats,
}

impl InvalidationManager {
    pub fn new(store: Arc<CacheStore>, config: InvalidationConfig) -> Self {
        let (events, _) = broadcast::channel(config.channel_capacity.max(1));
        Self {
            store,
            config,
            events,
            queue: Mutex::new(Vec::new()),
            debounce_task: Mutex::new(None),
            stats: AtomicInvalidationStats::default(),
        }
    }

    pub fn config(&self) -> &InvalidationConfig {
        &self.config
    }

    /// Subscribe to invalidation events
    pub fn subscribe(&self) -> broadcast::Receiver<InvalidationEvent> {
        self.events.subscribe()
    }

    fn emit(&self, pattern: &str, invalidated_count: usize) {
        // No subscribers is not an error
        let _ = self.events.send(InvalidationEvent {
            pattern: pattern.to_string(),
            invalidated_count,
        });
    }

    /// Remove one key immediately; returns whether it was cached
    pub fn invalidate(&self, key: &str) -> bool {
        let removed = self.store.remove(key);
        self.stats.keys_invalidated.fetch_add(1, Ordering::Relaxed);
        debug!(key = %key, removed, "Invalidated cache key");
        removed
    }

    /// Remove every key matching `pattern` in one pass and emit an event
    pub fn invalidate_pattern(&self, pattern: &str) -> usize {
        let parsed = KeyPattern::parse(pattern);
        let removed = self.store.remove_matching(|key| parsed.matches(key)).len();

        self.stats.patterns_processed.fetch_add(1, Ordering::Relaxed);
        self.stats
            .entries_removed
            .fetch_add(removed as u64, Ordering::Relaxed);
        debug!(pattern = %pattern, count = removed, "Invalidated cache pattern");
        self.emit(pattern, removed);
        removed
    }

    /// Queue `pattern` for the next debounced batch
    ///
    /// Every call restarts the debounce timer, so a burst of patterns is
    /// applied once, after the burst ends.
    pub fn queue_invalidation(self: &Arc<Self>, pattern: &str) {
        {
            let mut queue = self.queue.lock();
            if !queue.iter().any(|queued| queued == pattern) {
                queue.push(pattern.to_string());
                self.stats.patterns_queued.fetch_add(1, Ordering::Relaxed);
            }
        }

        let weak: Weak<Self> = Arc::downgrade(self);
        let debounce = self.config.debounce;
        let task = tokio::spawn(async move {
            tokio::time::sleep(debounce).await;
            if let Some(manager) = weak.upgrade() {
                manager.process_batch();
            }
        });

        if let Some(previous) = self.debounce_task.lock().replace(task) {
            previous.abort();
        }
    }

    /// Queue the patterns affected by `mutation`
    pub fn invalidate_for_mutation(self: &Arc<Self>, mutation: &Mutation) {
        debug!(
            resource = %mutation.resource,
            kind = ?mutation.kind,
            scope = ?mutation.scope,
            "Queueing invalidation for mutation"
        );
        for pattern in mutation.patterns(&self.config.aggregate_resources) {
            self.queue_invalidation(&pattern);
        }
    }

    /// Apply every queued pattern in a single pass over the key set
    ///
    /// Returns the number of entries removed.
    pub fn process_batch(&self) -> usize {
        let patterns: Vec<String> = std::mem::take(&mut *self.queue.lock());
        if patterns.is_empty() {
            return 0;
        }

        let parsed: Vec<KeyPattern> = patterns.iter().map(|p| KeyPattern::parse(p)).collect();
        let mut counts = vec![0usize; parsed.len()];
        let removed = self
            .store
            .remove_matching(|key| match parsed.iter().position(|p| p.matches(key)) {
                Some(index) => {
                    if let Some(count) = counts.get_mut(index) {
                        *count += 1;
                    }
                    true
                }
                None => false,
            })
            .len();

        self.stats.batches_processed.fetch_add(1, Ordering::Relaxed);
        self.stats
            .patterns_processed
            .fetch_add(patterns.len() as u64, Ordering::Relaxed);
        self.stats
            .entries_removed
            .fetch_add(removed as u64, Ordering::Relaxed);

        for (pattern, count) in patterns.iter().zip(counts) {
            self.emit(pattern, count);
        }
        info!(patterns = patterns.len(), count = removed, "Processed invalidation batch");
        removed
    }

    /// Flush the queue now, without waiting for the debounce timer
    ///
    /// When this returns, every pattern queued before the call has been applied.
    pub async fn process_batch_async(&self) -> usize {
        if let Some(task) = self.debounce_task.lock().take() {
            task.abort();
        }
        let removed = self.process_batch();
        tokio::task::yield_now().await;
        removed
    }

    /// Drop queued patterns and stop the debounce timer; returns the count dropped
    pub fn cancel_pending(&self) -> usize {
        if let Some(task) = self.debounce_task.lock().take() {
            task.abort();
        }
        let dropped = std::mem::take(&mut *self.queue.lock()).len();
        if dropped > 0 {
            debug!(count = dropped, "Dropped queued invalidations");
        }
        dropped
    }

    /// Number of patterns waiting for the next batch
    pub fn queued(&self) -> usize {
        self.queue.lock().len()
    }

    /// Drop every entry, in memory and in persistent storage, and the pending queue
    pub fn clear(&self) -> usize {
        if let Some(task) = self.debounce_task.lock().take() {
            task.abort();
        }
        self.queue.lock().clear();
        let removed = self.store.clear();
        self.emit("*", removed);
        removed
    }

    pub fn stats(&self) -> InvalidationStats {
        self.stats.snapshot()
    }
}

impl Drop for InvalidationManager {
    fn drop(&mut self) {
        if let Some(task) = self.debounce_task.lock().take() {
            task.abort();
        }
    }
}
