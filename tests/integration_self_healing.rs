//! Integration tests for corruption handling, refresh and recovery

mod common;

use common::test_data::{Account, accounts_json};
use common::*;
use self_healing_cache::{
    CacheError, CorruptionVerdict, NotificationKind, Priority, QueryOptions, RecoveryOutcome,
    RefreshOutcome, RefreshStrategy,
};
use serde_json::json;
use std::sync::atomic::Ordering;
use std::time::Duration;

fn seed(cache: &self_healing_cache::CacheService, keys: &[&str]) {
    for key in keys {
        cache
            .store()
            .set(key, json!("cached"), Duration::from_secs(60))
            .unwrap();
    }
}

fn corrupt(cache: &self_healing_cache::CacheService, key: &str) -> CorruptionVerdict {
    cache.report_error(key, "timeout");
    cache.report_error(key, "timeout");
    cache.report_error(key, "timeout")
}

/// Three suspicious failures corrupt a key; a success rehabilitates it
#[tokio::test(start_paused = true)]
async fn test_corruption_state_machine() {
    let (cache, _) = setup_service();

    assert_eq!(
        corrupt(&cache, "k"),
        CorruptionVerdict::Corrupted {
            key: "k".to_string()
        }
    );
    assert!(cache.is_corrupted("k"));

    cache.report_success("k");
    assert!(!cache.is_corrupted("k"));
    assert!(cache.detector().indicator("k").is_none());
}

/// A corrupted key is invalidated and refreshed from its strategy
#[tokio::test(start_paused = true)]
async fn test_corrupted_key_is_refreshed() {
    let (cache, notifier) = setup_service();
    let (query, calls) = counting_query(accounts_json());
    cache.register_strategy(RefreshStrategy::new("accounts_u1", query, Priority::High));
    seed(&cache, &["accounts_u1", "profile_u1"]);

    corrupt(&cache, "accounts_u1");
    cache.process_corruption().await;
    settle().await;

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(cache.cached("accounts_u1").unwrap().data, accounts_json());
    assert!(cache.store().contains("profile_u1"), "other keys are untouched");
    assert!(cache.detector().indicator("accounts_u1").is_none());
    assert!(notifier.notifications().is_empty(), "no recovery needed");
}

/// The background worker handles corruption without an explicit call
#[tokio::test(start_paused = true)]
async fn test_corruption_worker_runs_in_background() {
    let (cache, _) = setup_service();
    let (query, calls) = counting_query(accounts_json());
    cache.register_strategy(RefreshStrategy::new("accounts_u1", query, Priority::Medium));

    corrupt(&cache, "accounts_u1");
    settle().await;

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(cache.cached("accounts_u1").unwrap().data, accounts_json());
    assert!(cache.detector().indicator("accounts_u1").is_none());
}

/// More than three corrupted keys clear the whole store once
#[tokio::test(start_paused = true)]
async fn test_system_wide_corruption_clears_everything() {
    let (cache, notifier) = setup_service();
    let (query, calls) = counting_query(json!("fresh"));
    cache.register_strategy(RefreshStrategy::new("*", query, Priority::Medium));
    seed(&cache, &["a", "b", "c", "d", "untouched"]);

    for key in ["a", "b", "c"] {
        corrupt(&cache, key);
    }
    assert!(matches!(
        corrupt(&cache, "d"),
        CorruptionVerdict::SystemWide { keys } if keys.len() == 4
    ));

    cache.process_corruption().await;
    settle().await;

    assert!(cache.store().is_empty());
    assert_eq!(calls.load(Ordering::SeqCst), 0, "no per-key refreshes");
    assert!(cache.detector().is_empty());
    let kinds: Vec<NotificationKind> = notifier.notifications().iter().map(|n| n.kind).collect();
    assert_eq!(kinds, vec![NotificationKind::CacheRefreshed]);
    assert_eq!(cache.health().stats().recoveries, 1);
}

/// A corrupted key whose refresh fails escalates to recovery
#[tokio::test(start_paused = true)]
async fn test_failed_refresh_escalates_to_recovery() {
    let (cache, notifier) = setup_service();
    let (query, calls) = failing_query("connect ECONNREFUSED 10.0.0.5:5432");
    cache.register_strategy(RefreshStrategy::new("trades_", query, Priority::Low));
    seed(&cache, &["trades_u1", "profile_u1"]);

    corrupt(&cache, "trades_u1");
    cache.process_corruption().await;
    settle().await;

    assert_eq!(calls.load(Ordering::SeqCst), 3, "refresh retried up to its bound");
    assert!(cache.store().is_empty());
    assert!(cache.detector().indicator("trades_u1").is_none());
    assert_eq!(notifier.notifications().len(), 1);
}

/// Two rapid recovery requests clear the store only once
#[tokio::test(start_paused = true)]
async fn test_recovery_is_idempotent() {
    let (cache, notifier) = setup_service();
    seed(&cache, &["a"]);

    let first = cache.trigger_recovery().unwrap();
    seed(&cache, &["b"]);
    let second = cache.trigger_recovery().unwrap();

    assert!(matches!(first, RecoveryOutcome::Recovered { attempt: 1, cleared: 1, .. }));
    assert_eq!(second, RecoveryOutcome::AlreadyInProgress);
    assert!(cache.store().contains("b"));
    assert_eq!(notifier.notifications().len(), 1);
}

/// Recovery stops after three attempts until a success is observed
#[tokio::test(start_paused = true)]
async fn test_recovery_exhaustion_prompts_reload() {
    let (cache, notifier) = setup_service();
    for _ in 0..3 {
        assert!(cache.trigger_recovery().is_ok());
        tokio::time::advance(Duration::from_secs(2)).await;
    }

    assert_eq!(
        cache.trigger_recovery(),
        Err(CacheError::RecoveryExhausted { attempts: 3 })
    );
    let last = notifier.notifications().last().cloned().unwrap();
    assert_eq!(last.kind, NotificationKind::ReloadRequired);
    assert!(last.persistent);

    let (query, _) = counting_query(json!(1));
    cache.get_value("k", query, QueryOptions::default()).await;
    assert_eq!(cache.health().recovery_attempts(), 0);
    assert!(cache.trigger_recovery().is_ok());
}

/// Recovery cancels in-flight fetches; their callers see a cancellation error
#[tokio::test(start_paused = true)]
async fn test_recovery_cancels_pending_fetches() {
    let (cache, _) = setup_service();
    let (query, _) = slow_query(json!(1), Duration::from_secs(20));

    let waiter = {
        let cache = cache.clone();
        tokio::spawn(async move {
            cache
                .get_value("slow_u1", query, QueryOptions::default())
                .await
        })
    };
    tokio::task::yield_now().await;
    assert_eq!(cache.health().pending_count(), 1);

    let outcome = cache.trigger_recovery().unwrap();
    assert!(matches!(outcome, RecoveryOutcome::Recovered { cancelled: 1, .. }));

    let state = waiter.await.unwrap();
    assert!(state.error.unwrap().is_cancelled());
    assert!(!cache.store().contains("slow_u1"));
}

/// A queued refresh fills the cache and leaves no indicator behind
#[tokio::test(start_paused = true)]
async fn test_queued_refresh_end_to_end() {
    let (cache, _) = setup_service();
    let (query, _) = counting_query(accounts_json());
    cache.register_strategy(RefreshStrategy::new("accounts_u1", query, Priority::High));
    cache.report_error("accounts_u1", "network error");

    assert!(cache.queue_refresh("accounts_u1"));
    cache.refresh_service().wait_idle().await;

    let (unused, calls) = failing_query("must not be called");
    let state = cache
        .get::<Vec<Account>>("accounts_u1", unused, QueryOptions::default())
        .await;
    assert_eq!(state.data, Some(vec![Account::new(1, "A")]));
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert!(cache.detector().indicator("accounts_u1").is_none());
}

/// Refreshing a scope covers its registered keys only
#[tokio::test(start_paused = true)]
async fn test_refresh_all_for_scope() {
    let (cache, _) = setup_service();
    for key in ["accounts_u1", "profile_u1", "accounts_u2", "accounts_u10"] {
        let (query, _) = counting_query(json!(key));
        cache.register_strategy(RefreshStrategy::new(key, query, Priority::Medium));
    }

    assert_eq!(cache.refresh_all_for("u1").await, 2);
    assert!(cache.store().contains("accounts_u1"));
    assert!(cache.store().contains("profile_u1"));
    assert!(!cache.store().contains("accounts_u2"));
    assert!(!cache.store().contains("accounts_u10"));
    assert_eq!(cache.refresh_service().stats().refreshed, 2);
}

/// Refreshing without a strategy reports it instead of failing
#[tokio::test]
async fn test_refresh_without_strategy() {
    let (cache, _) = setup_service();
    assert_eq!(cache.refresh_now("unknown").await, RefreshOutcome::NoStrategy);
}

/// The periodic health check recovers an unhealthy cache on its own
#[tokio::test(start_paused = true)]
async fn test_periodic_health_check_recovers() {
    let mut config = test_config();
    config.health.check_interval = Some(Duration::from_secs(10));
    config.store.max_entries = 10;
    let (cache, notifier) = setup_service_with(config);
    for i in 0..9 {
        cache
            .store()
            .set(&format!("k{i}"), json!(i), Duration::from_secs(300))
            .unwrap();
    }

    tokio::time::sleep(Duration::from_secs(11)).await;

    assert!(cache.store().is_empty());
    assert_eq!(notifier.notifications().len(), 1);
    let report = cache.health().stats().last_report.unwrap();
    assert!(!report.healthy);
}

/// A corrupted key no strategy can refresh escalates to recovery
#[tokio::test(start_paused = true)]
async fn test_corrupted_key_without_strategy_escalates_to_recovery() {
    let (cache, notifier) = setup_service();
    seed(&cache, &["trades_u1", "profile_u1"]);

    corrupt(&cache, "trades_u1");
    assert_eq!(cache.process_corruption().await, 1);
    settle().await;

    assert_eq!(cache.health().stats().recoveries, 1);
    assert!(cache.store().is_empty());
    assert!(cache.detector().indicator("trades_u1").is_none());
    let kinds: Vec<NotificationKind> = notifier.notifications().iter().map(|n| n.kind).collect();
    assert_eq!(kinds, vec![NotificationKind::CacheRefreshed]);
}

/// Too many pending fetches make the cache unhealthy; recovery cancels them all
#[tokio::test(start_paused = true)]
async fn test_check_and_recover_cancels_pending_fetches() {
    let (cache, notifier) = setup_service();
    let (query, _) = slow_query(json!(1), Duration::from_secs(20));

    let waiters: Vec<_> = (0..11)
        .map(|i| {
            let cache = cache.clone();
            let query = query.clone();
            tokio::spawn(async move {
                cache
                    .get_value(&format!("slow_{i}"), query, QueryOptions::default())
                    .await
            })
        })
        .collect();
    tokio::task::yield_now().await;
    assert_eq!(cache.health().pending_count(), 11);

    let report = cache.check_and_recover();
    assert!(!report.healthy);
    assert!(report.issues[0].contains("11 operations pending"));

    for waiter in waiters {
        assert!(waiter.await.unwrap().error.unwrap().is_cancelled());
    }
    assert_eq!(cache.health().pending_count(), 0);
    assert_eq!(cache.health().stats().cancelled, 11);
    assert_eq!(notifier.notifications().len(), 1);
}

/// Invalidations queued before a recovery are dropped with the store
#[tokio::test(start_paused = true)]
async fn test_recovery_drops_queued_invalidations() {
    let (cache, _) = setup_service();
    seed(&cache, &["trades_u1"]);

    cache.queue_invalidation("trades*");
    cache.trigger_recovery().unwrap();
    seed(&cache, &["trades_u1"]);
    tokio::time::sleep(Duration::from_millis(200)).await;

    assert!(cache.store().contains("trades_u1"));
    assert_eq!(cache.invalidation().queued(), 0);
    assert_eq!(cache.invalidation().stats().batches_processed, 0);
}

/// Every suspicious failure of a monitored operation runs a health check
#[tokio::test(start_paused = true)]
async fn test_suspicious_failures_run_health_checks() {
    let mut config = test_config();
    config.corruption.failure_threshold = 10;
    let (cache, _) = setup_service_with(config);
    let (query, _) = failing_query("connect ECONNREFUSED 10.0.0.5:5432");
    cache.register_strategy(RefreshStrategy::new("trades_u1", query.clone(), Priority::Medium));

    let outcome = cache.refresh_now("trades_u1").await;
    assert!(matches!(outcome, RefreshOutcome::Failed { attempts: 3, .. }));
    assert_eq!(cache.health().stats().health_checks, 3);

    let options = QueryOptions::default().with_retries(1, Duration::from_millis(10));
    cache.get_value("accounts_u1", query, options).await;
    assert_eq!(cache.health().stats().health_checks, 5);

    let (unrelated, _) = failing_query("permission denied for table trades");
    let options = QueryOptions::default().with_retries(0, Duration::from_millis(10));
    cache.get_value("profile_u1", unrelated, options).await;
    assert_eq!(cache.health().stats().health_checks, 5);
}

/// The periodic cleanup drops indicators older than twice the corruption window
#[tokio::test(start_paused = true)]
async fn test_periodic_cleanup_discards_old_indicators() {
    let (cache, _) = setup_service();
    cache.report_error("quotes", "timeout");

    tokio::time::sleep(Duration::from_secs(540)).await;
    assert!(cache.detector().indicator("quotes").is_some());

    tokio::time::sleep(Duration::from_secs(121)).await;
    assert!(cache.detector().indicator("quotes").is_none());
    assert!(cache.detector().is_empty());
}
