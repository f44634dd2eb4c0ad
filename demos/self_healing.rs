//! Self-Healing Example
//!
//! Demonstrates cached reads, pattern invalidation after a write, corruption
//! handling and automatic recovery against a simulated data source.
//!
//! Run with: cargo run --example `self_healing`

use self_healing_cache::{
    CacheConfig, CacheServiceBuilder, Mutation, Priority, QueryFn, QueryOptions, RefreshStrategy,
    make_key,
};
use serde_json::json;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    println!("=== Self-Healing Cache ===\n");

    let mut config = CacheConfig::from_env()?;
    config.refresh.retry_delay = Duration::from_millis(50);
    let cache = CacheServiceBuilder::new().with_config(config).build()?;

    // Simulated data source: counts calls and can be switched offline
    let calls = Arc::new(AtomicU64::new(0));
    let offline = Arc::new(AtomicBool::new(false));
    let accounts = {
        let calls = Arc::clone(&calls);
        let offline = Arc::clone(&offline);
        QueryFn::new(move || {
            let call = calls.fetch_add(1, Ordering::SeqCst) + 1;
            let offline = offline.load(Ordering::SeqCst);
            async move {
                tokio::time::sleep(Duration::from_millis(20)).await;
                if offline {
                    anyhow::bail!("network error: connection refused");
                }
                Ok(json!([{"id": 1, "name": "Alice", "version": call}]))
            }
        })
    };

    // 1. Cached reads
    let key = make_key("accounts", &json!({"userId": "u1"}));
    let options = QueryOptions::default()
        .with_ttl(Duration::from_secs(30))
        .with_retries(1, Duration::from_millis(50));
    for _ in 0..3 {
        let state = cache.get_value(&key, accounts.clone(), options.clone()).await;
        println!("read {key}: {:?}", state.data);
    }
    println!("data source calls: {}\n", calls.load(Ordering::SeqCst));

    // 2. A write invalidates the user's reads
    cache.invalidate_for_mutation(&Mutation::update("accounts", Some("u1")));
    let removed = cache.process_batch_async().await;
    println!("write to accounts invalidated {removed} pattern(s)");
    let state = cache.get_value(&key, accounts.clone(), options.clone()).await;
    println!("after write: {:?}\n", state.data);

    // 3. Corruption: repeated network failures mark the key for refresh
    cache.register_strategy(RefreshStrategy::new(key.clone(), accounts.clone(), Priority::High));
    offline.store(true, Ordering::SeqCst);
    for _ in 0..3 {
        let verdict = cache.report_error(&key, "network error: request timed out");
        println!("verdict: {verdict:?}");
    }
    offline.store(false, Ordering::SeqCst);
    let handled = cache.process_corruption().await;
    println!("corrupted keys handled: {handled}");
    println!("refreshed entry: {:?}\n", cache.cached(&key).map(|e| e.data));

    // 4. Health check and manual recovery
    let report = cache.perform_health_check();
    println!("healthy: {}, issues: {:?}", report.healthy, report.issues);
    let outcome = cache.trigger_recovery()?;
    println!("recovery: {outcome:?}");

    let stats = cache.stats();
    println!("\n=== Statistics ===");
    println!("{}", serde_json::to_string_pretty(&stats.performance)?);
    println!("{}", serde_json::to_string_pretty(&stats.health)?);

    cache.shutdown();
    Ok(())
}
