//! Integration tests for write-through persistence
//!
//! These tests use a real directory via `FileStorage`.

mod common;

use common::*;
use self_healing_cache::backends::FileStorage;
use self_healing_cache::{CacheService, CacheServiceBuilder, PersistentStorage, QueryOptions};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

fn open_storage() -> (Arc<FileStorage>, TempDir) {
    let temp_dir = TempDir::new().expect("Failed to create temp directory");
    let storage = Arc::new(FileStorage::open(temp_dir.path()).expect("Failed to open storage"));
    (storage, temp_dir)
}

fn build_with(storage: &Arc<FileStorage>) -> CacheService {
    CacheServiceBuilder::new()
        .with_config(test_config())
        .with_storage(storage.clone())
        .build()
        .expect("Failed to build cache service")
}

/// Entries written by one service are restored by the next
#[tokio::test]
async fn test_entries_survive_restart() {
    let (storage, _dir) = open_storage();

    let first = build_with(&storage);
    let (query, _) = counting_query(json!({"theme": "dark"}));
    first
        .get_value("settings_u1", query, QueryOptions::default())
        .await;
    first.shutdown();
    assert!(first.store().is_empty());
    assert_eq!(storage.keys().unwrap(), vec!["app_cache_settings_u1".to_string()]);

    let second = build_with(&storage);
    let (unused, calls) = failing_query("must not be called");
    let state = second
        .get_value("settings_u1", unused, QueryOptions::default())
        .await;
    assert_eq!(state.data, Some(json!({"theme": "dark"})));
    assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 0);
}

/// Invalidation and recovery remove persisted records too
#[tokio::test]
async fn test_removals_write_through() {
    let (storage, _dir) = open_storage();
    let cache = build_with(&storage);
    for key in ["trades_u1", "trades_u2", "profile_u1"] {
        cache
            .store()
            .set(key, json!(key), Duration::from_secs(60))
            .unwrap();
    }
    assert_eq!(storage.keys().unwrap().len(), 3);

    cache.invalidate_pattern("trades*");
    assert_eq!(storage.keys().unwrap(), vec!["app_cache_profile_u1".to_string()]);

    cache.trigger_recovery().unwrap();
    assert!(storage.keys().unwrap().is_empty());
}

/// Expired and undecodable records are dropped on restore
#[tokio::test]
async fn test_restore_discards_bad_records() {
    let (storage, _dir) = open_storage();
    storage
        .save(
            "app_cache_expired",
            br#"{"data":1,"storedAt":1000,"ttl":1000}"#,
        )
        .unwrap();
    storage.save("app_cache_garbage", b"not json").unwrap();
    storage.save("other_app_key", b"ignored").unwrap();

    let cache = build_with(&storage);
    assert!(cache.store().is_empty());

    let mut remaining = storage.keys().unwrap();
    remaining.sort();
    assert_eq!(remaining, vec!["other_app_key".to_string()]);
}

/// A restored entry keeps its remaining lifetime
#[tokio::test]
async fn test_restored_entry_keeps_ttl() {
    let (storage, _dir) = open_storage();
    let first = build_with(&storage);
    first
        .store()
        .set("quotes", json!([1.1, 1.2]), Duration::from_secs(3600))
        .unwrap();
    first.shutdown();

    let second = build_with(&storage);
    let entry = second.cached("quotes").unwrap();
    assert_eq!(entry.ttl, Duration::from_secs(3600));
    assert!(!entry.is_stale);
    assert_eq!(entry.data, json!([1.1, 1.2]));
}
