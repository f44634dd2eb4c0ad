//! Corruption Detector
//!
//! Heuristic tracking of suspicious failures per cache key. A key moves through
//! `clean -> suspicious -> corrupted -> recovering -> clean`:
//!
//! - a suspicious error (timeout, network abort, refused connection, explicit
//!   corruption or staleness marker) creates or advances the key's indicator
//! - `failure_threshold` consecutive suspicious failures inside the corruption
//!   window mark the key corrupted
//! - the service marks a corrupted key as recovering while it handles it, and
//!   deletes the indicator when handling ends, whatever the outcome
//! - any reported success deletes the indicator
//!
//! The detector only judges; invalidation, refresh and recovery are driven by
//! [`CacheService`](crate::CacheService) from the returned [`CorruptionVerdict`].

use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Error message fragments that suggest the cached view of a key is unhealthy
pub const SUSPICIOUS_PATTERNS: &[&str] = &[
    "timeout",
    "timed out",
    "network",
    "failed to fetch",
    "fetch failed",
    "abort",
    "connection refused",
    "econnrefused",
    "connection reset",
    "corrupt",
    "stale",
];

/// Whether an error message matches one of [`SUSPICIOUS_PATTERNS`]
#[must_use]
pub fn is_suspicious(message: &str) -> bool {
    let message = message.to_lowercase();
    SUSPICIOUS_PATTERNS
        .iter()
        .any(|pattern| message.contains(pattern))
}

/// Configuration for [`CorruptionDetector`]
#[derive(Debug, Clone)]
pub struct CorruptionConfig {
    /// Consecutive suspicious failures that mark a key corrupted
    pub failure_threshold: u32,
    /// Failures further apart than this do not chain
    pub window: Duration,
    /// More simultaneously corrupted keys than this is a systemic problem
    pub system_wide_threshold: usize,
    /// Error messages kept per indicator
    pub max_error_samples: usize,
    /// How often stale indicators are discarded
    pub cleanup_interval: Duration,
}

impl Default for CorruptionConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            window: Duration::from_secs(300),
            system_wide_threshold: 3,
            max_error_samples: 10,
            cleanup_interval: Duration::from_secs(60),
        }
    }
}

/// Failure history of one key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CorruptionIndicator {
    pub consecutive_failures: u32,
    pub last_failure_at: Instant,
    pub error_samples: Vec<String>,
    pub recovering: bool,
}

/// Health of one key as seen by the detector
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyState {
    Clean,
    Suspicious,
    Corrupted,
    Recovering,
}

/// What a reported error means for the cache
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CorruptionVerdict {
    /// Not a cache-health error; the failure streak was reset
    Ignored,
    /// Counted, still below the threshold
    Suspicious { failures: u32 },
    /// This key crossed the threshold
    Corrupted { key: String },
    /// Too many keys are corrupted at once
    SystemWide { keys: Vec<String> },
    /// The key is already being recovered
    Recovering,
}

impl CorruptionVerdict {
    /// Whether the verdict calls for corruption handling
    #[must_use]
    pub fn needs_handling(&self) -> bool {
        matches!(self, Self::Corrupted { .. } | Self::SystemWide { .. })
    }
}

/// Per-key failure tracker
pub struct CorruptionDetector {
    config: CorruptionConfig,
    indicators: Mutex<HashMap<String, CorruptionIndicator>>,
}

impl CorruptionDetector {
    #[must_use]
    pub fn new(config: CorruptionConfig) -> Self {
        Self {
            config,
            indicators: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &CorruptionConfig {
        &self.config
    }

    fn corrupted_at(&self, indicator: &CorruptionIndicator, now: Instant) -> bool {
        indicator.consecutive_failures >= self.config.failure_threshold
            && now.duration_since(indicator.last_failure_at) < self.config.window
    }

    /// Record a failed operation on `key`
    pub fn report_error(&self, key: &str, message: &str) -> CorruptionVerdict {
        let mut indicators = self.indicators.lock();

        if !is_suspicious(message) {
            if let Some(indicator) = indicators.get_mut(key) {
                if !indicator.recovering {
                    indicator.consecutive_failures = 0;
                }
            }
            return CorruptionVerdict::Ignored;
        }

        let now = Instant::now();
        let indicator = indicators
            .entry(key.to_string())
            .or_insert_with(|| CorruptionIndicator {
                consecutive_failures: 0,
                last_failure_at: now,
                error_samples: Vec::new(),
                recovering: false,
            });

        if now.duration_since(indicator.last_failure_at) >= self.config.window {
            indicator.consecutive_failures = 0;
            indicator.error_samples.clear();
        }
        indicator.consecutive_failures += 1;
        indicator.last_failure_at = now;
        indicator.error_samples.push(message.to_string());
        if indicator.error_samples.len() > self.config.max_error_samples {
            indicator.error_samples.remove(0);
        }

        let failures = indicator.consecutive_failures;
        debug!(key = %key, failures, "Suspicious failure recorded");

        if indicator.recovering {
            return CorruptionVerdict::Recovering;
        }
        if !self.corrupted_at(indicator, now) {
            return CorruptionVerdict::Suspicious { failures };
        }

        let mut corrupted: Vec<String> = indicators
            .iter()
            .filter(|(_, ind)| !ind.recovering && self.corrupted_at(ind, now))
            .map(|(k, _)| k.clone())
            .collect();

        if corrupted.len() > self.config.system_wide_threshold {
            corrupted.sort();
            warn!(keys = corrupted.len(), "System-wide cache corruption detected");
            CorruptionVerdict::SystemWide { keys: corrupted }
        } else {
            warn!(key = %key, failures, "Cache key judged corrupted");
            CorruptionVerdict::Corrupted { key: key.to_string() }
        }
    }

    /// Record a successful operation on `key`; the key starts over clean
    pub fn report_success(&self, key: &str) {
        if self.indicators.lock().remove(key).is_some() {
            debug!(key = %key, "Corruption indicator cleared by success");
        }
    }

    /// Whether `key` has crossed the threshold within the window
    pub fn is_corrupted(&self, key: &str) -> bool {
        let now = Instant::now();
        self.indicators
            .lock()
            .get(key)
            .is_some_and(|ind| self.corrupted_at(ind, now))
    }

    pub fn state(&self, key: &str) -> KeyState {
        let now = Instant::now();
        match self.indicators.lock().get(key) {
            None => KeyState::Clean,
            Some(ind) if ind.recovering => KeyState::Recovering,
            Some(ind) if self.corrupted_at(ind, now) => KeyState::Corrupted,
            Some(ind) if ind.consecutive_failures > 0 => KeyState::Suspicious,
            Some(_) => KeyState::Clean,
        }
    }

    /// Copy of the indicator for `key`
    pub fn indicator(&self, key: &str) -> Option<CorruptionIndicator> {
        self.indicators.lock().get(key).cloned()
    }

    /// Corrupted keys that are not being recovered yet, sorted
    pub fn corrupted_keys(&self) -> Vec<String> {
        let now = Instant::now();
        let mut keys: Vec<String> = self
            .indicators
            .lock()
            .iter()
            .filter(|(_, ind)| !ind.recovering && self.corrupted_at(ind, now))
            .map(|(k, _)| k.clone())
            .collect();
        keys.sort();
        keys
    }

    /// Claim a corrupted key for handling
    ///
    /// Returns `false` if the key is no longer corrupted or already claimed.
    pub fn begin_recovery(&self, key: &str) -> bool {
        let now = Instant::now();
        let mut indicators = self.indicators.lock();
        match indicators.get_mut(key) {
            Some(ind) if !ind.recovering && self.corrupted_at(ind, now) => {
                ind.recovering = true;
                true
            }
            _ => false,
        }
    }

    /// End handling of `key`; the indicator is deleted
    pub fn finish_recovery(&self, key: &str) {
        self.indicators.lock().remove(key);
    }

    /// Delete the indicators of `keys`
    pub fn discard(&self, keys: &[String]) {
        let mut indicators = self.indicators.lock();
        for key in keys {
            indicators.remove(key);
        }
    }

    /// Delete every indicator
    pub fn clear(&self) {
        self.indicators.lock().clear();
    }

    /// Discard indicators whose last failure is older than twice the window
    pub fn cleanup_stale(&self) -> usize {
        let now = Instant::now();
        let max_age = self.config.window * 2;
        let mut indicators = self.indicators.lock();
        let before = indicators.len();
        indicators.retain(|_, ind| {
            ind.recovering || now.duration_since(ind.last_failure_at) < max_age
        });
        let removed = before - indicators.len();
        if removed > 0 {
            debug!(count = removed, "Discarded stale corruption indicators");
        }
        removed
    }

    /// Number of tracked keys
    pub fn len(&self) -> usize {
        self.indicators.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.indicators.lock().is_empty()
    }
}

impl Default for CorruptionDetector {
    fn default() -> Self {
        Self::new(CorruptionConfig::default())
    }
}
