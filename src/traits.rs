//! Extension Traits
//!
//! Seams where application code plugs into the cache service.
//!
//! # Architecture
//!
//! - `CacheCodec`: serialization of persisted entries
//! - `PersistentStorage`: durable key/value storage behind the cache store
//! - `UserNotifier`: user-facing notifications raised by recovery
//!
//! # Example: Custom Storage
//!
//! ```rust,ignore
//! use self_healing_cache::PersistentStorage;
//! use anyhow::Result;
//!
//! struct BrowserStorage {
//!     // Your implementation
//! }
//!
//! impl PersistentStorage for BrowserStorage {
//!     fn load(&self, key: &str) -> Result<Option<Vec<u8>>> {
//!         // Your implementation
//!     }
//!
//!     fn save(&self, key: &str, bytes: &[u8]) -> Result<()> {
//!         // Your implementation
//!     }
//!
//!     fn remove(&self, key: &str) -> Result<()> {
//!         // Your implementation
//!     }
//!
//!     fn keys(&self) -> Result<Vec<String>> {
//!         // Your implementation
//!     }
//! }
//! ```

use anyhow::Result;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::fmt::Debug;

use crate::notifier::Notification;

/// Trait for persisted value serialization/deserialization
///
/// # Thread Safety
///
/// Implementations must be `Send + Sync + Debug` so that the store can be shared
/// across tasks.
pub trait CacheCodec: Send + Sync + Debug {
    /// Serialize a value to bytes
    fn serialize<T: Serialize + ?Sized>(&self, value: &T) -> Result<Vec<u8>>;

    /// Deserialize bytes to a value
    fn deserialize<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T>;

    /// Codec name used in log events
    fn name(&self) -> &'static str;
}

/// Durable key/value storage behind the cache store
///
/// The store writes through on every insert and removal, and reads everything
/// back once at start-up via [`CacheStore::restore`](crate::store::CacheStore::restore).
/// Operations are synchronous, like browser local storage: they run while the
/// store lock is held and must not block for long.
///
/// Keys passed in already carry the configured prefix.
pub trait PersistentStorage: Send + Sync {
    /// Load the raw record stored under `key`
    ///
    /// # Returns
    ///
    /// * `Ok(Some(bytes))` - Record found
    /// * `Ok(None)` - No record for this key
    /// * `Err(e)` - Storage could not be read
    fn load(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Store `bytes` under `key`, replacing any previous record
    fn save(&self, key: &str, bytes: &[u8]) -> Result<()>;

    /// Remove the record stored under `key` (no error if absent)
    fn remove(&self, key: &str) -> Result<()>;

    /// List every stored key
    fn keys(&self) -> Result<Vec<String>>;

    /// Storage name used in log events
    fn name(&self) -> &'static str {
        "unknown"
    }
}

/// Receiver of user-facing notifications
///
/// Recovery informs the user that cached data was refreshed, and asks them to
/// reload or sign in again once automatic recovery is exhausted.
pub trait UserNotifier: Send + Sync {
    /// Deliver a notification
    fn notify(&self, notification: Notification);
}
