//! Self-Healing Cache
//!
//! A client-resident query cache for applications talking to a remote data source:
//! - **Cache Store**: bounded TTL map with batch eviction and optional write-through persistence
//! - **Stale-While-Revalidate**: expired data is served at once while a background fetch runs
//! - **Request Coalescing**: concurrent fetches of one key share a single query call
//! - **Pattern Invalidation**: prefix, suffix, contains and glob patterns, with debounced batches
//! - **Refresh Service**: per-key refresh strategies drained sequentially in priority order
//! - **Corruption Detection**: repeated suspicious failures mark keys for invalidation and refresh
//! - **Health Monitoring**: operation timeouts, periodic checks and bounded automatic recovery
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use self_healing_cache::{CacheServiceBuilder, QueryFn, QueryOptions, keys::make_key};
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let cache = CacheServiceBuilder::new().build()?;
//!
//!     let key = make_key("accounts", &json!({"userId": "u1"}));
//!     let accounts = QueryFn::new(|| async { Ok(json!([{"id": 1, "name": "A"}])) });
//!
//!     let state = cache
//!         .get::<serde_json::Value>(&key, accounts, QueryOptions::default())
//!         .await;
//!     tracing::info!(loading = state.loading, "Accounts: {:?}", state.data);
//!
//!     // After a write, drop every cached read it affects
//!     cache.invalidate_pattern("accounts_*");
//!
//!     cache.shutdown();
//!     Ok(())
//! }
//! ```
//!
//! # Architecture
//!
//! ```text
//! get ──► Cache Store ──hit──► data
//!            │ miss / stale
//!            ▼
//!       Health Monitor (timeout) ──► query fn
//!            │ ok ──► store.set, Corruption Detector success
//!            │ err ─► Corruption Detector ──► invalidate + Refresh Service ──► recovery
//! ```

pub mod backends;
pub mod builder;
pub mod codecs;
pub mod config;
pub mod corruption;
pub mod error;
pub mod health;
pub mod invalidation;
pub mod keys;
pub mod metrics;
pub mod notifier;
pub mod query;
pub mod refresh;
pub mod service;
pub mod store;
pub mod traits;

pub use builder::CacheServiceBuilder;
pub use config::CacheConfig;
pub use corruption::{CorruptionConfig, CorruptionDetector, CorruptionIndicator, CorruptionVerdict, KeyState};
pub use error::CacheError;
pub use health::{HealthConfig, HealthMonitor, HealthReport, HealthStats, RecoveryOutcome};
pub use invalidation::{
    InvalidationConfig, InvalidationEvent, InvalidationManager, InvalidationStats, Mutation,
    MutationKind,
};
pub use keys::{KeyPattern, make_key};
pub use metrics::{PerformanceMonitor, PerformanceStats};
pub use notifier::{Notification, NotificationKind, NotificationLevel, TracingNotifier};
pub use query::{QueryFn, QueryOptions, QueryState};
pub use refresh::{Priority, RefreshConfig, RefreshOutcome, RefreshService, RefreshStrategy};
pub use service::{CacheService, ServiceStats};
pub use store::{CacheLookup, CacheStats, CacheStore, EntryInfo, ReadMode, StoreConfig};
pub use traits::{CacheCodec, PersistentStorage, UserNotifier};
