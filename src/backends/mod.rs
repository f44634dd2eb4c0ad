//! Persistent Storage Backends
//!
//! Implementations of [`PersistentStorage`](crate::traits::PersistentStorage)
//! that the cache store can write through to.
//!
//! # Available Backends
//!
//! - **`MemoryStorage`** - Concurrent in-memory map, nothing survives the process
//! - **`FileStorage`** - One JSON file per record in a directory
//!
//! # Usage
//!
//! ```rust,no_run
//! use self_healing_cache::CacheServiceBuilder;
//! use self_healing_cache::backends::FileStorage;
//! use std::sync::Arc;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let storage = Arc::new(FileStorage::open("/tmp/app-cache")?);
//! let cache = CacheServiceBuilder::new().with_storage(storage).build()?;
//! # Ok(())
//! # }
//! ```

pub mod file_storage;
pub mod memory_storage;

pub use file_storage::FileStorage;
pub use memory_storage::MemoryStorage;
