//! Common utilities for integration tests
//!
//! This module provides shared test infrastructure including:
//! - Service setup with background checks disabled
//! - Query functions that count their calls or fail on demand
//! - A notifier recording what the user would have seen
//! - Test data generators

#![allow(dead_code)]

use parking_lot::Mutex;
use self_healing_cache::{
    CacheConfig, CacheService, CacheServiceBuilder, Notification, QueryFn, UserNotifier,
};
use serde_json::Value;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// Notifier that keeps every notification
#[derive(Default)]
pub struct RecordingNotifier {
    notifications: Mutex<Vec<Notification>>,
}

impl RecordingNotifier {
    pub fn notifications(&self) -> Vec<Notification> {
        self.notifications.lock().clone()
    }
}

impl UserNotifier for RecordingNotifier {
    fn notify(&self, notification: Notification) {
        self.notifications.lock().push(notification);
    }
}

/// Configuration for tests: no periodic health check, fast refresh retries
pub fn test_config() -> CacheConfig {
    let mut config = CacheConfig::default();
    config.health.check_interval = None;
    config.refresh.retry_delay = Duration::from_millis(10);
    config
}

/// Build a service with [`test_config`] and a recording notifier
pub fn setup_service() -> (CacheService, Arc<RecordingNotifier>) {
    setup_service_with(test_config())
}

pub fn setup_service_with(config: CacheConfig) -> (CacheService, Arc<RecordingNotifier>) {
    let notifier = Arc::new(RecordingNotifier::default());
    let service = CacheServiceBuilder::new()
        .with_config(config)
        .with_notifier(notifier.clone())
        .build()
        .expect("Failed to build cache service");
    (service, notifier)
}

/// Query returning `value`, counting its calls
pub fn counting_query(value: Value) -> (QueryFn, Arc<AtomicUsize>) {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    let query = QueryFn::new(move || {
        counter.fetch_add(1, Ordering::SeqCst);
        let value = value.clone();
        async move { Ok(value) }
    });
    (query, calls)
}

/// Query that takes `delay` before returning `value`, counting its calls
pub fn slow_query(value: Value, delay: Duration) -> (QueryFn, Arc<AtomicUsize>) {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    let query = QueryFn::new(move || {
        counter.fetch_add(1, Ordering::SeqCst);
        let value = value.clone();
        async move {
            tokio::time::sleep(delay).await;
            Ok(value)
        }
    });
    (query, calls)
}

/// Query that always fails with `message`
pub fn failing_query(message: &'static str) -> (QueryFn, Arc<AtomicUsize>) {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    let query = QueryFn::new(move || {
        counter.fetch_add(1, Ordering::SeqCst);
        async move { Err(anyhow::anyhow!(message)) }
    });
    (query, calls)
}

/// Query that fails `failures` times with `message`, then returns `value`
pub fn flaky_query(message: &'static str, failures: usize, value: Value) -> (QueryFn, Arc<AtomicUsize>) {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    let query = QueryFn::new(move || {
        let call = counter.fetch_add(1, Ordering::SeqCst);
        let value = value.clone();
        async move {
            if call < failures {
                Err(anyhow::anyhow!(message))
            } else {
                Ok(value)
            }
        }
    });
    (query, calls)
}

/// Let spawned tasks run until they are all waiting again
///
/// With a paused clock the runtime only advances time once every task is idle.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(1)).await;
}

/// Generate test data
pub mod test_data {
    use serde::{Deserialize, Serialize};
    use serde_json::{Value, json};

    #[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
    pub struct Account {
        pub id: u64,
        pub name: String,
    }

    impl Account {
        pub fn new(id: u64, name: &str) -> Self {
            Self {
                id,
                name: name.to_string(),
            }
        }
    }

    /// Accounts list as returned by the data source
    pub fn accounts_json() -> Value {
        json!([{"id": 1, "name": "A"}])
    }

    pub fn json_trade(id: u64, user: &str) -> Value {
        json!({
            "id": id,
            "userId": user,
            "symbol": "EURUSD",
            "volume": 1.5,
        })
    }
}
