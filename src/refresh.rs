//! Refresh Service
//!
//! Holds the refresh strategies registered per key or key pattern and a
//! refresh queue drained strictly one key at a time.
//!
//! Queue order is positional: high-priority keys are pushed to the front,
//! everything else to the back. An item already being refreshed is never
//! pre-empted. Running the refresh itself (store update, corruption
//! bookkeeping) is driven by [`CacheService`](crate::CacheService).

use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::collections::VecDeque;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info};

use crate::error::CacheError;
use crate::keys::KeyPattern;
use crate::query::QueryFn;

/// Queue position of a refresh
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    High,
    #[default]
    Medium,
    Low,
}

/// Refresh function registered for a key, key prefix or key pattern
#[derive(Debug, Clone)]
pub struct RefreshStrategy {
    pattern: String,
    matcher: KeyPattern,
    query: QueryFn,
    priority: Priority,
    ttl: Option<Duration>,
}

impl RefreshStrategy {
    /// Create a strategy
    ///
    /// A pattern without `*` matches the exact key and every key it prefixes.
    pub fn new(pattern: impl Into<String>, query: QueryFn, priority: Priority) -> Self {
        let pattern = pattern.into();
        let matcher = if pattern.contains('*') {
            KeyPattern::parse(&pattern)
        } else {
            KeyPattern::Prefix(pattern.clone())
        };
        Self {
            pattern,
            matcher,
            query,
            priority,
            ttl: None,
        }
    }

    /// TTL for refreshed entries; the store default applies otherwise
    #[must_use]
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    pub fn query(&self) -> &QueryFn {
        &self.query
    }

    pub fn priority(&self) -> Priority {
        self.priority
    }

    pub fn ttl(&self) -> Option<Duration> {
        self.ttl
    }

    pub fn matches(&self, key: &str) -> bool {
        self.pattern == key || self.matcher.matches(key)
    }
}

/// Configuration for [`RefreshService`]
#[derive(Debug, Clone)]
pub struct RefreshConfig {
    /// Pause between two queued refreshes
    pub inter_item_delay: Duration,
    /// Attempts per refresh before giving up
    pub max_retries: u32,
    /// Base delay of the backoff between attempts
    pub retry_delay: Duration,
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            inter_item_delay: Duration::from_millis(100),
            max_retries: 3,
            retry_delay: Duration::from_secs(1),
        }
    }
}

/// Result of refreshing one key
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshOutcome {
    Refreshed { attempts: u32 },
    NoStrategy,
    Failed { attempts: u32, error: CacheError },
}

impl RefreshOutcome {
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Refreshed { .. })
    }
}

/// Refresh statistics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RefreshStats {
    pub strategies: usize,
    pub queue_len: usize,
    pub busy: bool,
    pub queued: u64,
    pub refreshed: u64,
    pub failed: u64,
}

/// Whether `key` belongs to `scope`: some alphanumeric token of the key equals it
///
/// `accounts_u1` and `trades_{"userId":"u1"}` belong to `u1`; `accounts_u10` does not.
#[must_use]
pub fn belongs_to_scope(key: &str, scope: &str) -> bool {
    key.split(|c: char| !(c.is_alphanumeric() || c == '-'))
        .any(|token| token == scope)
}

/// Strategy registry and sequential refresh queue
pub struct RefreshService {
    config: RefreshConfig,
    strategies: RwLock<Vec<RefreshStrategy>>,
    queue: Mutex<VecDeque<String>>,
    busy: watch::Sender<bool>,
    retries: DashMap<String, u32>,
    queued: AtomicU64,
    refreshed: AtomicU64,
    failed: AtomicU64,
}

impl RefreshService {
    #[must_use]
    pub fn new(config: RefreshConfig) -> Self {
        let (busy, _) = watch::channel(false);
        Self {
            config,
            strategies: RwLock::new(Vec::new()),
            queue: Mutex::new(VecDeque::new()),
            busy,
            retries: DashMap::new(),
            queued: AtomicU64::new(0),
            refreshed: AtomicU64::new(0),
            failed: AtomicU64::new(0),
        }
    }

    pub fn config(&self) -> &RefreshConfig {
        &self.config
    }

    /// Register a strategy, replacing one registered under the same pattern
    pub fn register_strategy(&self, strategy: RefreshStrategy) {
        let mut strategies = self.strategies.write();
        info!(pattern = %strategy.pattern, priority = ?strategy.priority, "Registered refresh strategy");
        match strategies.iter_mut().find(|s| s.pattern == strategy.pattern) {
            Some(existing) => *existing = strategy,
            None => strategies.push(strategy),
        }
    }

    /// Strategy for `key`: an exact registration wins over pattern matches
    pub fn strategy_for(&self, key: &str) -> Option<RefreshStrategy> {
        let strategies = self.strategies.read();
        strategies
            .iter()
            .find(|s| s.pattern == key)
            .or_else(|| strategies.iter().find(|s| s.matches(key)))
            .cloned()
    }

    /// Registered patterns that are plain keys and belong to `scope`
    pub fn registered_keys_for(&self, scope: &str) -> Vec<String> {
        self.strategies
            .read()
            .iter()
            .filter(|s| !s.pattern.contains('*') && belongs_to_scope(&s.pattern, scope))
            .map(|s| s.pattern.clone())
            .collect()
    }

    /// Add `key` to the queue; returns `false` if it is already queued
    pub fn enqueue(&self, key: &str, priority: Priority) -> bool {
        let mut queue = self.queue.lock();
        if queue.iter().any(|queued| queued == key) {
            return false;
        }
        if priority == Priority::High {
            queue.push_front(key.to_string());
        } else {
            queue.push_back(key.to_string());
        }
        self.queued.fetch_add(1, Ordering::Relaxed);
        debug!(key = %key, priority = ?priority, queue_len = queue.len(), "Queued refresh");
        true
    }

    /// Mark the queue as being drained; `false` if a drain is already running
    pub fn try_begin(&self) -> bool {
        self.busy.send_if_modified(|busy| {
            if *busy {
                false
            } else {
                *busy = true;
                true
            }
        })
    }

    /// Refresh queued keys one at a time until the queue is empty
    ///
    /// Must only be called after a successful [`try_begin`](Self::try_begin).
    /// The busy flag is cleared under the queue lock, so a key enqueued while
    /// the drain finishes is either taken by this drain or sees it stopped.
    pub async fn drain<F, Fut>(&self, refresh: F)
    where
        F: Fn(String) -> Fut,
        Fut: Future<Output = RefreshOutcome>,
    {
        let mut first = true;
        loop {
            let next = {
                let mut queue = self.queue.lock();
                let next = queue.pop_front();
                if next.is_none() {
                    self.busy.send_replace(false);
                }
                next
            };
            let Some(key) = next else {
                debug!("Refresh queue drained");
                return;
            };

            if !first {
                tokio::time::sleep(self.config.inter_item_delay).await;
            }
            first = false;

            let outcome = refresh(key.clone()).await;
            debug!(key = %key, success = outcome.is_success(), "Processed queued refresh");
        }
    }

    /// Wait until no drain is running
    pub async fn wait_idle(&self) {
        let mut busy = self.busy.subscribe();
        // The sender lives as long as self, so this cannot fail
        let _ = busy.wait_for(|busy| !*busy).await;
    }

    pub fn is_busy(&self) -> bool {
        *self.busy.borrow()
    }

    pub fn queue_len(&self) -> usize {
        self.queue.lock().len()
    }

    /// Snapshot of the queue, front first
    pub fn queued_keys(&self) -> Vec<String> {
        self.queue.lock().iter().cloned().collect()
    }

    /// Count a failed attempt for `key`; returns the failures so far
    pub fn record_failure(&self, key: &str) -> u32 {
        let mut retries = self.retries.entry(key.to_string()).or_insert(0);
        *retries += 1;
        *retries
    }

    pub fn reset_retries(&self, key: &str) {
        self.retries.remove(key);
    }

    pub fn retries(&self, key: &str) -> u32 {
        self.retries.get(key).map_or(0, |r| *r)
    }

    /// Count a finished refresh in the statistics
    pub fn record_outcome(&self, outcome: &RefreshOutcome) {
        match outcome {
            RefreshOutcome::Refreshed { .. } => {
                self.refreshed.fetch_add(1, Ordering::Relaxed);
            }
            RefreshOutcome::Failed { .. } => {
                self.failed.fetch_add(1, Ordering::Relaxed);
            }
            RefreshOutcome::NoStrategy => {}
        }
    }

    /// Drop queued keys and retry counters
    pub fn clear_queue(&self) {
        self.queue.lock().clear();
        self.retries.clear();
    }

    pub fn stats(&self) -> RefreshStats {
        RefreshStats {
            strategies: self.strategies.read().len(),
            queue_len: self.queue_len(),
            busy: self.is_busy(),
            queued: self.queued.load(Ordering::Relaxed),
            refreshed: self.refreshed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }
}

impl Default for RefreshService {
    fn default() -> Self {
        Self::new(RefreshConfig::default())
    }
}
