//! Health Monitor
//!
//! Wraps outstanding operations with timeouts, checks overall cache health and
//! performs bounded, idempotent recovery.
//!
//! # Recovery
//!
//! A recovery pass clears the cache store (memory and persistent storage),
//! cancels every pending operation and tells the user their data was
//! refreshed. Calls arriving within `recovery_settle` of a pass are no-ops.
//! After `max_recovery_attempts` passes without an intervening success,
//! recovery stops and the user is asked once to reload or sign in again.

use dashmap::DashMap;
use parking_lot::Mutex;
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::error::CacheError;
use crate::notifier::Notification;
use crate::store::CacheStore;
use crate::traits::UserNotifier;

/// Configuration for [`HealthMonitor`]
#[derive(Debug, Clone)]
pub struct HealthConfig {
    /// Period of the proactive health check, `None` disables it
    pub check_interval: Option<Duration>,
    /// Timeout applied when a caller does not choose one
    pub default_timeout: Duration,
    /// More pending operations than this is unhealthy
    pub max_pending_operations: usize,
    /// Share of its timeout after which a pending operation counts as slow
    pub slow_operation_ratio: f64,
    /// Store fill ratio considered too high
    pub capacity_warning_ratio: f64,
    /// Share of stale entries considered too high
    pub stale_ratio_threshold: f64,
    /// Recovery passes allowed before asking the user to reload
    pub max_recovery_attempts: u32,
    /// Window after a recovery pass during which new requests are ignored
    pub recovery_settle: Duration,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            check_interval: Some(Duration::from_secs(10)),
            default_timeout: Duration::from_secs(30),
            max_pending_operations: 10,
            slow_operation_ratio: 0.8,
            capacity_warning_ratio: 0.9,
            stale_ratio_threshold: 0.5,
            max_recovery_attempts: 3,
            recovery_settle: Duration::from_secs(1),
        }
    }
}

/// Bookkeeping for an operation wrapped by [`HealthMonitor::monitor_operation`]
#[derive(Debug)]
pub struct PendingOperation {
    pub id: Uuid,
    pub name: String,
    pub started_at: Instant,
    pub timeout: Duration,
    cancel: Option<oneshot::Sender<()>>,
}

/// Removes a pending operation when its waiter finishes, times out or is dropped
struct PendingGuard<'a> {
    pending: &'a DashMap<Uuid, PendingOperation>,
    id: Uuid,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.pending.remove(&self.id);
    }
}

/// Result of [`HealthMonitor::perform_health_check`]
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthReport {
    pub healthy: bool,
    pub issues: Vec<String>,
    pub recommendations: Vec<String>,
    pub pending_operations: usize,
    pub cache_size: usize,
    pub stale_entries: usize,
}

/// Result of a successful [`HealthMonitor::trigger_recovery`] call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryOutcome {
    /// A recovery pass ran
    Recovered {
        attempt: u32,
        cleared: usize,
        cancelled: usize,
    },
    /// Another pass ran moments ago; nothing was done
    AlreadyInProgress,
}

/// Health statistics
#[derive(Debug, Clone, Serialize)]
pub struct HealthStats {
    pub pending_operations: usize,
    pub timeouts: u64,
    pub cancelled: u64,
    pub health_checks: u64,
    pub recoveries: u64,
    pub recovery_attempts: u32,
    pub recovery_exhausted: bool,
    pub last_report: Option<HealthReport>,
}

/// Timeout wrapper, health checker and recovery authority
pub struct HealthMonitor {
    config: HealthConfig,
    notifier: Arc<dyn UserNotifier>,
    pending: DashMap<Uuid, PendingOperation>,
    /// End of the settle window of the last recovery pass
    recovery_guard: Mutex<Option<Instant>>,
    recovery_attempts: AtomicU32,
    exhausted_notified: AtomicBool,
    last_report: Mutex<Option<HealthReport>>,
    timeouts: AtomicU64,
    cancelled: AtomicU64,
    health_checks: AtomicU64,
    recoveries: AtomicU64,
}

impl HealthMonitor {
    pub fn new(config: HealthConfig, notifier: Arc<dyn UserNotifier>) -> Self {
        Self {
            config,
            notifier,
            pending: DashMap::new(),
            recovery_guard: Mutex::new(None),
            recovery_attempts: AtomicU32::new(0),
            exhausted_notified: AtomicBool::new(false),
            last_report: Mutex::new(None),
            timeouts: AtomicU64::new(0),
            cancelled: AtomicU64::new(0),
            health_checks: AtomicU64::new(0),
            recoveries: AtomicU64::new(0),
        }
    }

    pub fn config(&self) -> &HealthConfig {
        &self.config
    }

    /// Run `operation`, giving up after `timeout` or when recovery cancels it
    ///
    /// The operation is tracked as pending until this future completes or is
    /// dropped. On timeout or cancellation the operation future is dropped, so
    /// a late result can never reach the caller.
    ///
    /// # Errors
    ///
    /// Returns the operation's own error, [`CacheError::Timeout`], or
    /// [`CacheError::Cancelled`].
    pub async fn monitor_operation<T, F>(
        &self,
        name: &str,
        timeout: Duration,
        operation: F,
    ) -> Result<T, CacheError>
    where
        F: Future<Output = Result<T, CacheError>>,
    {
        let id = Uuid::new_v4();
        let (cancel_tx, cancel_rx) = oneshot::channel();
        self.pending.insert(
            id,
            PendingOperation {
                id,
                name: name.to_string(),
                started_at: Instant::now(),
                timeout,
                cancel: Some(cancel_tx),
            },
        );
        let _guard = PendingGuard {
            pending: &self.pending,
            id,
        };

        tokio::select! {
            result = operation => result,
            () = tokio::time::sleep(timeout) => {
                self.timeouts.fetch_add(1, Ordering::Relaxed);
                warn!(operation = %name, timeout_ms = timeout.as_millis(), "Operation timed out");
                Err(CacheError::Timeout { name: name.to_string(), timeout })
            }
            _ = cancel_rx => {
                debug!(operation = %name, "Operation cancelled by recovery");
                Err(CacheError::Cancelled { name: name.to_string() })
            }
        }
    }

    /// Cancel every pending operation; their callers receive [`CacheError::Cancelled`]
    pub fn cancel_all(&self) -> usize {
        let ids: Vec<Uuid> = self.pending.iter().map(|entry| *entry.key()).collect();
        let mut count = 0;
        for id in ids {
            if let Some((_, mut op)) = self.pending.remove(&id) {
                if let Some(cancel) = op.cancel.take() {
                    let _ = cancel.send(());
                }
                count += 1;
            }
        }
        self.cancelled.fetch_add(count as u64, Ordering::Relaxed);
        count
    }

    /// Number of operations currently in flight
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Evaluate pending operations and store fill against the configured limits
    #[allow(clippy::cast_precision_loss)]
    pub fn perform_health_check(&self, store: &CacheStore) -> HealthReport {
        self.health_checks.fetch_add(1, Ordering::Relaxed);
        let mut issues = Vec::new();
        let mut recommendations = Vec::new();

        let pending = self.pending.len();
        if pending > self.config.max_pending_operations {
            issues.push(format!(
                "{pending} operations pending, limit is {}",
                self.config.max_pending_operations
            ));
            recommendations
                .push("Reduce concurrent requests or check network connectivity".to_string());
        }

        let mut slow: Vec<String> = self
            .pending
            .iter()
            .filter(|op| {
                op.started_at.elapsed() > op.timeout.mul_f64(self.config.slow_operation_ratio)
            })
            .map(|op| op.name.clone())
            .collect();
        if !slow.is_empty() {
            slow.sort();
            issues.push(format!(
                "{} operations close to timing out: {}",
                slow.len(),
                slow.join(", ")
            ));
            recommendations.push("Check the data source for slow responses".to_string());
        }

        let size = store.len();
        let capacity = store.capacity();
        if size as f64 >= capacity as f64 * self.config.capacity_warning_ratio {
            issues.push(format!("Cache is {size}/{capacity} entries full"));
            recommendations.push("Lower entry TTLs or raise the cache capacity".to_string());
        }

        let stale = store.stale_count();
        if size > 0 && stale as f64 / size as f64 > self.config.stale_ratio_threshold {
            issues.push(format!("{stale} of {size} cached entries are stale"));
            recommendations.push("Refresh or clear stale cache entries".to_string());
        }

        let report = HealthReport {
            healthy: issues.is_empty(),
            issues,
            recommendations,
            pending_operations: pending,
            cache_size: size,
            stale_entries: stale,
        };
        if report.healthy {
            debug!("Health check passed");
        } else {
            warn!(issues = ?report.issues, "Health check found problems");
        }
        *self.last_report.lock() = Some(report.clone());
        report
    }

    /// Clear the store, cancel pending operations and notify the user
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::RecoveryExhausted`] once the attempt budget is
    /// spent; the user is notified the first time.
    pub fn trigger_recovery(&self, store: &CacheStore) -> Result<RecoveryOutcome, CacheError> {
        {
            let now = Instant::now();
            let mut guard = self.recovery_guard.lock();
            if guard.is_some_and(|until| now < until) {
                debug!("Recovery already in progress");
                return Ok(RecoveryOutcome::AlreadyInProgress);
            }

            let attempts = self.recovery_attempts.load(Ordering::Acquire);
            if attempts >= self.config.max_recovery_attempts {
                if !self.exhausted_notified.swap(true, Ordering::AcqRel) {
                    error!(attempts, "Automatic recovery exhausted");
                    self.notifier.notify(Notification::reload_required(attempts));
                }
                return Err(CacheError::RecoveryExhausted { attempts });
            }

            *guard = Some(now + self.config.recovery_settle);
        }

        let attempt = self.recovery_attempts.fetch_add(1, Ordering::AcqRel) + 1;
        info!(attempt, "Starting cache recovery");

        let cleared = store.clear();
        let cancelled = self.cancel_all();
        self.recoveries.fetch_add(1, Ordering::Relaxed);
        self.notifier.notify(Notification::cache_refreshed(attempt));

        info!(attempt, cleared, cancelled, "Cache recovery complete");
        Ok(RecoveryOutcome::Recovered {
            attempt,
            cleared,
            cancelled,
        })
    }

    /// Forget past recovery attempts after an observed success
    pub fn reset_recovery_attempts(&self) {
        if self.recovery_attempts.swap(0, Ordering::AcqRel) > 0 {
            debug!("Recovery attempts reset");
        }
        self.exhausted_notified.store(false, Ordering::Release);
    }

    pub fn recovery_attempts(&self) -> u32 {
        self.recovery_attempts.load(Ordering::Acquire)
    }

    /// Whether automatic recovery has given up
    pub fn is_exhausted(&self) -> bool {
        self.recovery_attempts() >= self.config.max_recovery_attempts
    }

    pub fn stats(&self) -> HealthStats {
        HealthStats {
            pending_operations: self.pending.len(),
            timeouts: self.timeouts.load(Ordering::Relaxed),
            cancelled: self.cancelled.load(Ordering::Relaxed),
            health_checks: self.health_checks.load(Ordering::Relaxed),
            recoveries: self.recoveries.load(Ordering::Relaxed),
            recovery_attempts: self.recovery_attempts(),
            recovery_exhausted: self.is_exhausted(),
            last_report: self.last_report.lock().clone(),
        }
    }
}
