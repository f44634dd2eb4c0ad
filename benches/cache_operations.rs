//! Benchmarks for basic cache operations
//!
//! This benchmark suite measures the performance of:
//! - Store writes of different data sizes
//! - Store hits and misses
//! - Writes into a full store (eviction)
//! - Service reads served from the cache
//! - Key generation from filter objects

use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use self_healing_cache::{
    CacheConfig, CacheServiceBuilder, CacheStore, QueryFn, QueryOptions, ReadMode, StoreConfig,
    make_key,
};
use serde_json::json;
use std::time::Duration;
use tokio::runtime::Runtime;

/// Generate test data of specified size
fn test_data(size_bytes: usize) -> serde_json::Value {
    let data_string = "x".repeat(size_bytes);
    json!({
        "data": data_string,
        "size": size_bytes,
        "timestamp": "2025-01-01T00:00:00Z"
    })
}

fn large_store() -> CacheStore {
    CacheStore::new(StoreConfig {
        max_entries: 100_000,
        ..StoreConfig::default()
    })
}

/// Benchmark store writes
fn bench_store_set(c: &mut Criterion) {
    let store = large_store();

    let mut group = c.benchmark_group("store_set");
    for size in &[100, 1024, 10240] {
        let data = test_data(*size);
        let mut counter = 0_u64;
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, _| {
            b.iter(|| {
                counter += 1;
                let key = format!("bench_set_{}", counter % 50_000);
                store
                    .set(&key, black_box(data.clone()), Duration::from_secs(300))
                    .unwrap_or_else(|_| panic!("Failed to set entry"));
            });
        });
    }
    group.finish();
}

/// Benchmark store reads
fn bench_store_get(c: &mut Criterion) {
    let store = large_store();
    for i in 0..1000 {
        store
            .set(&format!("bench_get_{i}"), test_data(256), Duration::from_secs(300))
            .unwrap_or_else(|_| panic!("Failed to set entry"));
    }

    let mut group = c.benchmark_group("store_get");
    group.bench_function("hit", |b| {
        b.iter(|| black_box(store.get("bench_get_500", ReadMode::Strict)));
    });
    group.bench_function("miss", |b| {
        b.iter(|| black_box(store.get("bench_get_missing", ReadMode::Strict)));
    });
    group.finish();
}

/// Benchmark writes that force an eviction pass
fn bench_eviction(c: &mut Criterion) {
    let store = CacheStore::new(StoreConfig::default());
    let mut counter = 0_u64;

    c.bench_function("store_set_with_eviction", |b| {
        b.iter(|| {
            counter += 1;
            store
                .set(&format!("evict_{counter}"), json!(counter), Duration::from_secs(300))
                .unwrap_or_else(|_| panic!("Failed to set entry"));
        });
    });
}

/// Benchmark service reads answered from a fresh entry
fn bench_service_hit(c: &mut Criterion) {
    let rt = Runtime::new().unwrap_or_else(|_| panic!("Failed to create runtime"));
    let mut config = CacheConfig::default();
    config.health.check_interval = None;

    let cache = rt.block_on(async {
        CacheServiceBuilder::new()
            .with_config(config)
            .build()
            .unwrap_or_else(|_| panic!("Failed to build cache service"))
    });
    let query = QueryFn::new(|| async { Ok(json!([{"id": 1, "name": "A"}])) });
    rt.block_on(cache.get_value("accounts_u1", query.clone(), QueryOptions::default()));

    c.bench_function("service_get_hit", |b| {
        b.iter(|| {
            rt.block_on(async {
                black_box(
                    cache
                        .get_value("accounts_u1", query.clone(), QueryOptions::default())
                        .await,
                )
            })
        });
    });
}

/// Benchmark key generation
fn bench_make_key(c: &mut Criterion) {
    let filters = json!({
        "userId": "u1",
        "status": ["open", "closed", "pending"],
        "range": {"from": "2025-01-01", "to": "2025-02-01"},
        "symbol": "EURUSD",
    });

    c.bench_function("make_key", |b| {
        b.iter(|| black_box(make_key("trades", black_box(&filters))));
    });
}

criterion_group!(
    benches,
    bench_store_set,
    bench_store_get,
    bench_eviction,
    bench_service_hit,
    bench_make_key
);
criterion_main!(benches);
