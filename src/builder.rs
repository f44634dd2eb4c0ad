//! Cache Service Builder
//!
//! Wires configuration, an optional persistence backend and an optional user
//! notifier into a running [`CacheService`].
//!
//! # Example: Defaults
//!
//! ```rust,no_run
//! use self_healing_cache::CacheServiceBuilder;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let cache = CacheServiceBuilder::new().build()?;
//!     Ok(())
//! }
//! ```
//!
//! # Example: Persistent Storage and Custom Notifier
//!
//! ```rust,ignore
//! use self_healing_cache::{CacheConfig, CacheServiceBuilder};
//! use self_healing_cache::backends::FileStorage;
//! use std::sync::Arc;
//!
//! let cache = CacheServiceBuilder::new()
//!     .with_config(CacheConfig::from_env()?)
//!     .with_storage(Arc::new(FileStorage::open("/var/lib/app/cache")?))
//!     .with_notifier(Arc::new(MyToastNotifier::new()))
//!     .build()?;
//! ```

use std::sync::Arc;
use tracing::info;

use crate::config::CacheConfig;
use crate::error::CacheError;
use crate::notifier::TracingNotifier;
use crate::service::CacheService;
use crate::store::CacheStore;
use crate::traits::{PersistentStorage, UserNotifier};

/// Builder for [`CacheService`]
///
/// # Default Behavior
///
/// - **Configuration**: [`CacheConfig::default`]
/// - **Storage**: none, entries live in memory only
/// - **Notifier**: [`TracingNotifier`], notifications become log events
#[derive(Default)]
pub struct CacheServiceBuilder {
    config: CacheConfig,
    storage: Option<Arc<dyn PersistentStorage>>,
    notifier: Option<Arc<dyn UserNotifier>>,
}

impl CacheServiceBuilder {
    /// Create a builder with default configuration
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Use `config` instead of the defaults
    #[must_use]
    pub fn with_config(mut self, config: CacheConfig) -> Self {
        self.config = config;
        self
    }

    /// Write entries through to `storage` and restore them at build time
    #[must_use]
    pub fn with_storage(mut self, storage: Arc<dyn PersistentStorage>) -> Self {
        self.storage = Some(storage);
        self
    }

    /// Deliver user-facing notifications to `notifier`
    #[must_use]
    pub fn with_notifier(mut self, notifier: Arc<dyn UserNotifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    /// Build the service and start its background tasks
    ///
    /// Entries persisted by a previous run are restored before this returns.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Config`] if the configuration is invalid or if
    /// called outside a tokio runtime.
    pub fn build(self) -> Result<CacheService, CacheError> {
        self.config.validate()?;
        tokio::runtime::Handle::try_current().map_err(|_| {
            CacheError::Config("the cache service must be built inside a tokio runtime".to_string())
        })?;

        let store = match self.storage {
            Some(storage) => {
                let store = CacheStore::with_storage(self.config.store.clone(), storage);
                let restored = store.restore();
                info!(restored, "Restored cache from persistent storage");
                store
            }
            None => CacheStore::new(self.config.store.clone()),
        };
        let notifier = self
            .notifier
            .unwrap_or_else(|| Arc::new(TracingNotifier));

        Ok(CacheService::start(self.config, Arc::new(store), notifier))
    }
}
