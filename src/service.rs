//! Cache Service
//!
//! Owns every cache component and coordinates them:
//!
//! ```text
//! get(key) ──► store ──fresh──► data
//!               │ stale + SWR ──► stale data, background revalidation
//!               │ miss ──► coalesced fetch ──► health.monitor_operation (timeout, retries)
//!                                   │ ok ──► store.set, detector.report_success
//!                                   │ err ─► detector.report_error ──corrupted──► corruption worker
//!                                                                               │ invalidate + refresh_now
//!                                                                               │ system-wide: clear + recovery
//! ```
//!
//! Corruption handling runs on a side channel: reporting an error never
//! blocks or alters the value returned to the caller. A background worker is
//! woken whenever the detector judges a key corrupted and runs
//! [`CacheService::process_corruption`].

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use parking_lot::Mutex;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{Notify, broadcast};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::config::CacheConfig;
use crate::corruption::{CorruptionDetector, CorruptionVerdict, is_suspicious};
use crate::error::CacheError;
use crate::health::{HealthMonitor, HealthReport, HealthStats, RecoveryOutcome};
use crate::invalidation::{InvalidationEvent, InvalidationManager, InvalidationStats, Mutation};
use crate::metrics::{PerformanceMonitor, PerformanceStats};
use crate::query::{QueryFn, QueryOptions, QueryState, backoff_delay};
use crate::refresh::{
    Priority, RefreshOutcome, RefreshService, RefreshStats, RefreshStrategy, belongs_to_scope,
};
use crate::store::{CacheLookup, CacheStats, CacheStore, ReadMode};
use crate::traits::UserNotifier;

/// RAII guard that removes an in-flight fetch lock when dropped
struct CleanupGuard<'a> {
    map: &'a DashMap<String, Arc<tokio::sync::Mutex<()>>>,
    key: String,
}

impl Drop for CleanupGuard<'_> {
    fn drop(&mut self) {
        self.map.remove(&self.key);
    }
}

/// Combined statistics of every component
#[derive(Debug, Clone, Serialize)]
pub struct ServiceStats {
    pub cache: CacheStats,
    pub performance: PerformanceStats,
    pub invalidation: InvalidationStats,
    pub refresh: RefreshStats,
    pub health: HealthStats,
    pub corrupted_keys: Vec<String>,
}

/// Background query registered for focus or interval refetching
#[derive(Clone)]
struct BackgroundQuery {
    query: QueryFn,
    options: QueryOptions,
}

struct ServiceInner {
    config: CacheConfig,
    store: Arc<CacheStore>,
    invalidation: Arc<InvalidationManager>,
    refresh: RefreshService,
    detector: CorruptionDetector,
    health: HealthMonitor,
    metrics: PerformanceMonitor,
    in_flight: DashMap<String, Arc<tokio::sync::Mutex<()>>>,
    focus_queries: DashMap<String, BackgroundQuery>,
    interval_tasks: DashMap<String, JoinHandle<()>>,
    background: Mutex<Vec<JoinHandle<()>>>,
    corruption_wakeup: Arc<Notify>,
    corruption_pass: tokio::sync::Mutex<()>,
    shutdown_tx: broadcast::Sender<()>,
    shut_down: AtomicBool,
}

impl Drop for ServiceInner {
    fn drop(&mut self) {
        for task in self.background.lock().drain(..) {
            task.abort();
        }
        for entry in self.interval_tasks.iter() {
            entry.value().abort();
        }
    }
}

/// Client-side cache with stale-while-revalidate reads and self-healing
///
/// Cheap to clone; clones share the same cache. Built with
/// [`CacheServiceBuilder`](crate::CacheServiceBuilder).
#[derive(Clone)]
pub struct CacheService {
    inner: Arc<ServiceInner>,
}

impl fmt::Debug for CacheService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheService")
            .field("entries", &self.inner.store.len())
            .field("capacity", &self.inner.store.capacity())
            .finish_non_exhaustive()
    }
}

impl CacheService {
    /// Assemble the service and start its background tasks
    ///
    /// Must run inside a tokio runtime; the builder checks this.
    pub(crate) fn start(
        config: CacheConfig,
        store: Arc<CacheStore>,
        notifier: Arc<dyn UserNotifier>,
    ) -> Self {
        let invalidation = Arc::new(InvalidationManager::new(
            Arc::clone(&store),
            config.invalidation.clone(),
        ));
        let (shutdown_tx, _) = broadcast::channel(1);

        let inner = Arc::new(ServiceInner {
            refresh: RefreshService::new(config.refresh.clone()),
            detector: CorruptionDetector::new(config.corruption.clone()),
            health: HealthMonitor::new(config.health.clone(), notifier),
            metrics: PerformanceMonitor::new(),
            config,
            store,
            invalidation,
            in_flight: DashMap::new(),
            focus_queries: DashMap::new(),
            interval_tasks: DashMap::new(),
            background: Mutex::new(Vec::new()),
            corruption_wakeup: Arc::new(Notify::new()),
            corruption_pass: tokio::sync::Mutex::new(()),
            shutdown_tx,
            shut_down: AtomicBool::new(false),
        });

        let service = Self { inner };
        service.spawn_background_tasks();
        info!(
            capacity = service.inner.store.capacity(),
            entries = service.inner.store.len(),
            "Cache service started"
        );
        service
    }

    fn spawn_background_tasks(&self) {
        let mut tasks = Vec::with_capacity(3);

        let weak = Arc::downgrade(&self.inner);
        let wakeup = Arc::clone(&self.inner.corruption_wakeup);
        let mut shutdown = self.inner.shutdown_tx.subscribe();
        tasks.push(tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.recv() => break,
                    () = wakeup.notified() => {}
                }
                let Some(inner) = weak.upgrade() else { break };
                Self { inner }.process_corruption().await;
            }
            debug!("Corruption worker stopped");
        }));

        if let Some(period) = self.inner.config.health.check_interval {
            tasks.push(self.spawn_periodic(period, "health check", |service| {
                service.check_and_recover();
            }));
        }

        tasks.push(self.spawn_periodic(
            self.inner.config.corruption.cleanup_interval,
            "indicator cleanup",
            |service| {
                service.inner.detector.cleanup_stale();
            },
        ));

        *self.inner.background.lock() = tasks;
    }

    /// Run `work` every `period`, first after one full period, until shutdown
    fn spawn_periodic<F>(&self, period: Duration, name: &'static str, work: F) -> JoinHandle<()>
    where
        F: Fn(&Self) + Send + 'static,
    {
        let weak: Weak<ServiceInner> = Arc::downgrade(&self.inner);
        let mut shutdown = self.inner.shutdown_tx.subscribe();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = shutdown.recv() => break,
                    _ = ticker.tick() => {
                        let Some(inner) = weak.upgrade() else { break };
                        work(&Self { inner });
                    }
                }
            }
            debug!(task = name, "Periodic task stopped");
        })
    }

    // ===== Reads =====

    /// Read `key`, fetching it with `query` when missing or expired
    ///
    /// Fresh entries return immediately. Expired entries are returned with
    /// `loading: true` while a background fetch runs, if
    /// `stale_while_revalidate` is set; otherwise they are dropped and
    /// fetched. Concurrent fetches of one key share a single query call.
    /// Only a failure with no cached fallback yields an error state.
    pub async fn get<T: DeserializeOwned>(
        &self,
        key: &str,
        query: QueryFn,
        options: QueryOptions,
    ) -> QueryState<T> {
        self.get_value(key, query, options).await.decode()
    }

    /// [`get`](Self::get) without deserialization
    pub async fn get_value(&self, key: &str, query: QueryFn, options: QueryOptions) -> QueryState<Value> {
        let inner = &self.inner;
        inner.metrics.record_request();
        self.register_background_query(key, &query, &options);

        if let Some(hit) = inner.store.get(key, ReadMode::AllowStale) {
            if !hit.is_stale {
                inner.metrics.record_hit();
                debug!(key = %key, "Cache hit");
                return QueryState::fresh(hit.data);
            }
            if options.stale_while_revalidate {
                inner.metrics.record_stale_hit();
                debug!(key = %key, "Serving stale entry while revalidating");
                self.spawn_revalidation(key, query, options);
                return QueryState::revalidating(hit.data);
            }
            // Strict read drops the expired entry
            inner.store.get(key, ReadMode::Strict);
        }

        inner.metrics.record_miss();
        debug!(key = %key, "Cache miss");
        match self.fetch_coalesced(key, &query, &options, true).await {
            Ok(data) => QueryState::fresh(data),
            Err(error) => QueryState::failed(error),
        }
    }

    /// Cached entry for `key`, fresh or stale, without fetching
    pub fn cached(&self, key: &str) -> Option<CacheLookup> {
        self.inner.store.get(key, ReadMode::AllowStale)
    }

    fn spawn_revalidation(&self, key: &str, query: QueryFn, options: QueryOptions) {
        let service = self.clone();
        let key = key.to_string();
        tokio::spawn(async move {
            if let Err(e) = service.fetch_coalesced(&key, &query, &options, true).await {
                debug!(key = %key, error = %e, "Background revalidation failed, keeping stale entry");
            }
        });
    }

    /// Fetch `key` with at most one query in flight per key
    ///
    /// With `reuse_fresh`, a caller that waited for another fetch returns the
    /// entry that fetch stored instead of querying again.
    async fn fetch_coalesced(
        &self,
        key: &str,
        query: &QueryFn,
        options: &QueryOptions,
        reuse_fresh: bool,
    ) -> Result<Value, CacheError> {
        let inner = &self.inner;
        let lock = inner
            .in_flight
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone();
        let _guard = lock.lock().await;
        let _cleanup_guard = CleanupGuard {
            map: &inner.in_flight,
            key: key.to_string(),
        };

        if reuse_fresh {
            if let Some(hit) = inner.store.get(key, ReadMode::AllowStale) {
                if !hit.is_stale {
                    inner.metrics.record_coalesced();
                    return Ok(hit.data);
                }
            }
        }

        self.fetch_with_retry(key, query, options).await
    }

    async fn fetch_with_retry(
        &self,
        key: &str,
        query: &QueryFn,
        options: &QueryOptions,
    ) -> Result<Value, CacheError> {
        let inner = &self.inner;
        let mut attempt = 0;
        loop {
            let result = inner
                .health
                .monitor_operation(key, options.timeout, query.call())
                .await;

            let error = match result {
                Ok(data) => {
                    inner.store.set(key, data.clone(), options.ttl)?;
                    self.report_success(key);
                    return Ok(data);
                }
                Err(error) => error,
            };

            inner.metrics.record_fetch_error(error.is_timeout());
            if error.is_cancelled() {
                return Err(error);
            }
            self.check_health_after(&error);
            if attempt >= options.retry_attempts {
                warn!(key = %key, attempts = attempt + 1, error = %error, "Query failed after retries");
                self.report_error(key, &error);
                return Err(error);
            }

            let delay = backoff_delay(options.retry_delay, attempt);
            debug!(key = %key, attempt = attempt + 1, delay_ms = delay.as_millis(), error = %error, "Retrying query");
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }

    /// Run a health check when a monitored operation failed with a cache-related error
    fn check_health_after(&self, error: &CacheError) {
        if is_suspicious(&error.to_string()) {
            self.perform_health_check();
        }
    }

    fn register_background_query(&self, key: &str, query: &QueryFn, options: &QueryOptions) {
        let inner = &self.inner;
        let background = || BackgroundQuery {
            query: query.clone(),
            options: options.clone(),
        };

        if options.refetch_on_focus {
            inner.focus_queries.insert(key.to_string(), background());
        }

        let Some(period) = options.refetch_interval else {
            return;
        };
        if period.is_zero() || inner.shut_down.load(Ordering::Acquire) {
            return;
        }
        if let Entry::Vacant(slot) = inner.interval_tasks.entry(key.to_string()) {
            debug!(key = %key, period_ms = period.as_millis(), "Interval refetch registered");
            let weak = Arc::downgrade(&self.inner);
            let mut shutdown = inner.shutdown_tx.subscribe();
            let key = key.to_string();
            let BackgroundQuery { query, options } = background();
            let task = tokio::spawn(async move {
                let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                loop {
                    tokio::select! {
                        _ = shutdown.recv() => break,
                        _ = ticker.tick() => {
                            let Some(inner) = weak.upgrade() else { break };
                            let service = Self { inner };
                            if let Err(e) = service.fetch_coalesced(&key, &query, &options, false).await {
                                debug!(key = %key, error = %e, "Interval refetch failed");
                            }
                        }
                    }
                }
            });
            slot.insert(task);
        }
    }

    /// Re-fetch every query read with `refetch_on_focus`, in the background
    ///
    /// Returns the number of refetches started.
    pub fn notify_focus(&self) -> usize {
        let queries: Vec<(String, BackgroundQuery)> = self
            .inner
            .focus_queries
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect();

        for (key, background) in &queries {
            let service = self.clone();
            let key = key.clone();
            let background = background.clone();
            tokio::spawn(async move {
                if let Err(e) = service
                    .fetch_coalesced(&key, &background.query, &background.options, false)
                    .await
                {
                    debug!(key = %key, error = %e, "Focus refetch failed");
                }
            });
        }
        debug!(count = queries.len(), "Focus refetch started");
        queries.len()
    }

    /// Stop focus and interval refetching of `key`
    pub fn stop_refetch(&self, key: &str) {
        self.inner.focus_queries.remove(key);
        if let Some((_, task)) = self.inner.interval_tasks.remove(key) {
            task.abort();
        }
    }

    // ===== Invalidation =====

    /// Remove `key` now
    pub fn invalidate(&self, key: &str) -> bool {
        self.inner.invalidation.invalidate(key)
    }

    /// Remove every key matching `pattern` now; returns the count removed
    pub fn invalidate_pattern(&self, pattern: &str) -> usize {
        self.inner.invalidation.invalidate_pattern(pattern)
    }

    /// Queue `pattern` for the next debounced batch
    pub fn queue_invalidation(&self, pattern: &str) {
        self.inner.invalidation.queue_invalidation(pattern);
    }

    /// Apply queued invalidations now
    pub async fn process_batch_async(&self) -> usize {
        self.inner.invalidation.process_batch_async().await
    }

    /// Queue the invalidations implied by a write to the data source
    pub fn invalidate_for_mutation(&self, mutation: &Mutation) {
        self.inner.invalidation.invalidate_for_mutation(mutation);
    }

    /// Remove every entry, in memory and in persistent storage
    pub fn clear(&self) -> usize {
        self.inner.invalidation.clear()
    }

    /// Subscribe to invalidation events
    pub fn subscribe(&self) -> broadcast::Receiver<InvalidationEvent> {
        self.inner.invalidation.subscribe()
    }

    // ===== Refresh =====

    /// Register a refresh strategy
    pub fn register_strategy(&self, strategy: RefreshStrategy) {
        self.inner.refresh.register_strategy(strategy);
    }

    /// Queue `key` for refresh at its strategy's priority and start draining
    ///
    /// Returns `false` if the key was already queued.
    pub fn queue_refresh(&self, key: &str) -> bool {
        let priority = self
            .inner
            .refresh
            .strategy_for(key)
            .map_or(Priority::Medium, |s| s.priority());
        let queued = self.inner.refresh.enqueue(key, priority);
        self.start_refresh_drain();
        queued
    }

    fn start_refresh_drain(&self) {
        if !self.inner.refresh.try_begin() {
            return;
        }
        let service = self.clone();
        tokio::spawn(async move {
            service
                .inner
                .refresh
                .drain(|key| {
                    let service = service.clone();
                    async move { service.refresh_now(&key).await }
                })
                .await;
        });
    }

    /// Refresh `key` with its strategy now, retrying with backoff
    ///
    /// Every failed attempt is reported to the corruption detector. Never
    /// returns an error: failures are described by the outcome.
    pub async fn refresh_now(&self, key: &str) -> RefreshOutcome {
        let inner = &self.inner;
        let Some(strategy) = inner.refresh.strategy_for(key) else {
            debug!(key = %key, "No refresh strategy");
            return RefreshOutcome::NoStrategy;
        };

        let max_attempts = inner.refresh.config().max_retries.max(1);
        let retry_delay = inner.refresh.config().retry_delay;
        let timeout = inner.health.config().default_timeout;
        let ttl = strategy.ttl().unwrap_or_else(|| inner.store.default_ttl());
        inner.refresh.reset_retries(key);

        let outcome = loop {
            let result = inner
                .health
                .monitor_operation(key, timeout, strategy.query().call())
                .await
                .and_then(|data| inner.store.set(key, data, ttl));

            match result {
                Ok(()) => {
                    let attempts = inner.refresh.retries(key) + 1;
                    self.report_success(key);
                    debug!(key = %key, attempts, "Refreshed cache entry");
                    break RefreshOutcome::Refreshed { attempts };
                }
                Err(error) => {
                    let attempts = inner.refresh.record_failure(key);
                    self.report_error(key, &error);
                    self.check_health_after(&error);
                    if error.is_cancelled() || attempts >= max_attempts {
                        warn!(key = %key, attempts, error = %error, "Refresh failed");
                        break RefreshOutcome::Failed { attempts, error };
                    }
                    tokio::time::sleep(backoff_delay(retry_delay, attempts - 1)).await;
                }
            }
        };
        inner.refresh.record_outcome(&outcome);
        outcome
    }

    /// Refresh every key of `scope` and wait for the queue to drain
    ///
    /// Covers registered strategy keys and cached keys with a strategy.
    /// Returns the number of keys queued.
    pub async fn refresh_all_for(&self, scope: &str) -> usize {
        let inner = &self.inner;
        let mut keys = inner.refresh.registered_keys_for(scope);
        for key in inner.store.keys() {
            if belongs_to_scope(&key, scope)
                && !keys.contains(&key)
                && inner.refresh.strategy_for(&key).is_some()
            {
                keys.push(key);
            }
        }

        for key in &keys {
            let priority = inner
                .refresh
                .strategy_for(key)
                .map_or(Priority::Medium, |s| s.priority());
            inner.refresh.enqueue(key, priority);
        }
        info!(scope = %scope, count = keys.len(), "Refreshing scope");

        self.start_refresh_drain();
        inner.refresh.wait_idle().await;
        keys.len()
    }

    // ===== Corruption =====

    /// Report a failed operation on `key`
    ///
    /// Never blocks: a corruption verdict wakes the background worker.
    pub fn report_error(&self, key: &str, error: impl fmt::Display) -> CorruptionVerdict {
        let verdict = self.inner.detector.report_error(key, &error.to_string());
        if verdict.needs_handling() {
            self.inner.corruption_wakeup.notify_one();
        }
        verdict
    }

    /// Report a successful operation on `key`
    pub fn report_success(&self, key: &str) {
        self.inner.detector.report_success(key);
        self.inner.refresh.reset_retries(key);
        self.inner.health.reset_recovery_attempts();
    }

    /// Whether the detector currently judges `key` corrupted
    pub fn is_corrupted(&self, key: &str) -> bool {
        self.inner.detector.is_corrupted(key)
    }

    /// Handle every key currently judged corrupted
    ///
    /// More than `system_wide_threshold` corrupted keys clear the whole store
    /// and trigger recovery. Otherwise each key is invalidated and refreshed,
    /// with recovery if the refresh fails or no strategy covers the key. Handled keys always lose their
    /// indicator. Passes are serialized; returns the number of keys handled.
    pub async fn process_corruption(&self) -> usize {
        let inner = &self.inner;
        let _pass = inner.corruption_pass.lock().await;

        let corrupted = inner.detector.corrupted_keys();
        if corrupted.is_empty() {
            return 0;
        }

        if corrupted.len() > inner.config.corruption.system_wide_threshold {
            warn!(count = corrupted.len(), keys = ?corrupted, "Handling system-wide corruption");
            inner.detector.discard(&corrupted);
            inner.invalidation.clear();
            self.recover();
            return corrupted.len();
        }

        let mut handled = 0;
        for key in corrupted {
            // State may have changed while earlier keys were refreshed
            if !inner.detector.begin_recovery(&key) {
                continue;
            }
            handled += 1;
            warn!(key = %key, "Handling corrupted cache key");

            inner.invalidation.invalidate(&key);
            match self.refresh_now(&key).await {
                RefreshOutcome::Refreshed { .. } => {}
                RefreshOutcome::NoStrategy => {
                    warn!(key = %key, "Corrupted key has no refresh strategy, escalating");
                    self.recover();
                }
                RefreshOutcome::Failed { error, .. } => {
                    warn!(key = %key, error = %error, "Refresh of corrupted key failed, escalating");
                    self.recover();
                }
            }
            inner.detector.finish_recovery(&key);
        }
        handled
    }

    fn recover(&self) {
        match self.trigger_recovery() {
            Ok(RecoveryOutcome::Recovered { attempt, .. }) => {
                debug!(attempt, "Recovery performed");
            }
            Ok(RecoveryOutcome::AlreadyInProgress) => {}
            Err(e) => debug!(error = %e, "Recovery skipped"),
        }
    }

    // ===== Health =====

    /// Evaluate cache health
    pub fn perform_health_check(&self) -> HealthReport {
        self.inner.health.perform_health_check(&self.inner.store)
    }

    /// Evaluate cache health and recover if it is unhealthy
    pub fn check_and_recover(&self) -> HealthReport {
        let report = self.perform_health_check();
        if !report.healthy {
            self.recover();
        }
        report
    }

    /// Clear the store, cancel pending operations and notify the user
    ///
    /// Queued invalidations and refreshes are dropped with the store.
    /// Interval refetches keep running and repopulate the cleared store.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::RecoveryExhausted`] once the attempt budget is spent.
    pub fn trigger_recovery(&self) -> Result<RecoveryOutcome, CacheError> {
        let outcome = self.inner.health.trigger_recovery(&self.inner.store)?;
        if let RecoveryOutcome::Recovered { .. } = outcome {
            self.inner.invalidation.cancel_pending();
            self.inner.refresh.clear_queue();
            self.inner.detector.clear();
        }
        Ok(outcome)
    }

    /// Forget past recovery attempts
    pub fn reset_recovery_attempts(&self) {
        self.inner.health.reset_recovery_attempts();
    }

    // ===== Statistics and components =====

    /// Store size, capacity and per-entry details
    pub fn get_stats(&self) -> CacheStats {
        self.inner.store.stats()
    }

    pub fn performance_stats(&self) -> PerformanceStats {
        self.inner.metrics.snapshot()
    }

    /// Statistics of every component
    pub fn stats(&self) -> ServiceStats {
        let inner = &self.inner;
        ServiceStats {
            cache: inner.store.stats(),
            performance: inner.metrics.snapshot(),
            invalidation: inner.invalidation.stats(),
            refresh: inner.refresh.stats(),
            health: inner.health.stats(),
            corrupted_keys: inner.detector.corrupted_keys(),
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.inner.config
    }

    pub fn store(&self) -> &CacheStore {
        &self.inner.store
    }

    pub fn detector(&self) -> &CorruptionDetector {
        &self.inner.detector
    }

    pub fn health(&self) -> &HealthMonitor {
        &self.inner.health
    }

    pub fn refresh_service(&self) -> &RefreshService {
        &self.inner.refresh
    }

    pub fn invalidation(&self) -> &InvalidationManager {
        &self.inner.invalidation
    }

    // ===== Lifecycle =====

    /// Stop background work, cancel pending operations and unload memory
    ///
    /// Persisted entries are kept for the next start. Idempotent.
    pub fn shutdown(&self) {
        let inner = &self.inner;
        if inner.shut_down.swap(true, Ordering::AcqRel) {
            return;
        }
        // No receivers left is fine
        let _ = inner.shutdown_tx.send(());
        for task in inner.background.lock().drain(..) {
            task.abort();
        }
        let intervals: Vec<String> = inner
            .interval_tasks
            .iter()
            .map(|entry| entry.key().clone())
            .collect();
        for key in intervals {
            if let Some((_, task)) = inner.interval_tasks.remove(&key) {
                task.abort();
            }
        }
        inner.focus_queries.clear();

        let cancelled = inner.health.cancel_all();
        inner.refresh.clear_queue();
        let unloaded = inner.store.unload();
        info!(cancelled, unloaded, "Cache service shut down");
    }

    /// Whether [`shutdown`](Self::shutdown) has run
    pub fn is_shut_down(&self) -> bool {
        self.inner.shut_down.load(Ordering::Acquire)
    }
}
