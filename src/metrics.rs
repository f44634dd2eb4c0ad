//! Performance Monitor - hit/miss counters

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Lock-free counters updated on every cache request
#[derive(Debug, Default)]
pub struct PerformanceMonitor {
    requests: AtomicU64,
    hits: AtomicU64,
    stale_hits: AtomicU64,
    misses: AtomicU64,
    coalesced: AtomicU64,
    fetch_errors: AtomicU64,
    timeouts: AtomicU64,
}

/// Point-in-time copy of [`PerformanceMonitor`] counters
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PerformanceStats {
    pub requests: u64,
    pub hits: u64,
    pub stale_hits: u64,
    pub misses: u64,
    /// Requests answered by a fetch another caller already had in flight
    pub coalesced: u64,
    pub fetch_errors: u64,
    pub timeouts: u64,
    /// Fresh and stale hits over requests, in percent
    pub hit_rate: f64,
}

impl PerformanceMonitor {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_request(&self) {
        self.requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_stale_hit(&self) {
        self.stale_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_coalesced(&self) {
        self.coalesced.fetch_add(1, Ordering::Relaxed);
    }

    /// Count a failed fetch attempt; timeouts are also counted separately
    pub fn record_fetch_error(&self, timed_out: bool) {
        self.fetch_errors.fetch_add(1, Ordering::Relaxed);
        if timed_out {
            self.timeouts.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Take a snapshot of all counters
    #[allow(clippy::cast_precision_loss)]
    pub fn snapshot(&self) -> PerformanceStats {
        let requests = self.requests.load(Ordering::Relaxed);
        let hits = self.hits.load(Ordering::Relaxed);
        let stale_hits = self.stale_hits.load(Ordering::Relaxed);

        PerformanceStats {
            requests,
            hits,
            stale_hits,
            misses: self.misses.load(Ordering::Relaxed),
            coalesced: self.coalesced.load(Ordering::Relaxed),
            fetch_errors: self.fetch_errors.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
            hit_rate: if requests > 0 {
                ((hits + stale_hits) as f64 / requests as f64) * 100.0
            } else {
                0.0
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hit_rate_counts_stale_hits() {
        let monitor = PerformanceMonitor::new();
        for _ in 0..4 {
            monitor.record_request();
        }
        monitor.record_hit();
        monitor.record_stale_hit();
        monitor.record_miss();
        monitor.record_miss();
        monitor.record_fetch_error(true);

        let stats = monitor.snapshot();
        assert_eq!(stats.requests, 4);
        assert!((stats.hit_rate - 50.0).abs() < f64::EPSILON);
        assert_eq!(stats.fetch_errors, 1);
        assert_eq!(stats.timeouts, 1);
    }

    #[test]
    fn test_empty_monitor_has_zero_hit_rate() {
        assert_eq!(PerformanceMonitor::new().snapshot(), PerformanceStats::default());
    }
}
