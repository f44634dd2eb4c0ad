//! Codecs for persisted cache entries
//!
//! Built-in implementations of the [`CacheCodec`](crate::traits::CacheCodec) trait.

mod json;
pub use json::JsonCodec;
