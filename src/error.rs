//! Error taxonomy for cache operations
//!
//! Query functions and storage backends report failures as `anyhow::Error`;
//! those are converted into [`CacheError`] at the boundary so that callers,
//! the corruption detector and the health monitor all see the same variants.

use std::time::Duration;
use thiserror::Error;

/// Errors surfaced by the cache service and its components
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CacheError {
    /// The wrapped operation exceeded its allotted time
    #[error("operation '{name}' timed out after {timeout:?}")]
    Timeout { name: String, timeout: Duration },

    /// The query function itself failed (remote rejected the request, etc.)
    #[error("query failed: {0}")]
    Source(String),

    /// A pending operation was abandoned because recovery cancelled it
    #[error("operation '{name}' cancelled due to recovery")]
    Cancelled { name: String },

    /// Automatic recovery was attempted repeatedly and did not resolve the problem
    #[error("automatic recovery exhausted after {attempts} attempts, reload or sign in again")]
    RecoveryExhausted { attempts: u32 },

    /// Entries must live for a non-zero duration
    #[error("invalid ttl for key '{key}': ttl must be greater than zero")]
    InvalidTtl { key: String },

    /// Cached data could not be converted to or from the requested type
    #[error("serialization failed: {0}")]
    Serialization(String),

    /// Rejected configuration value
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl CacheError {
    /// Wrap a query function failure, keeping the whole context chain
    pub fn from_source(err: &anyhow::Error) -> Self {
        Self::Source(format!("{err:#}"))
    }

    /// Whether this error is a timeout
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    /// Whether this error came from recovery cancelling the operation
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }
}

impl From<serde_json::Error> for CacheError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_keeps_context_chain() {
        let err = anyhow::anyhow!("connection refused").context("loading trades");
        let cache_err = CacheError::from_source(&err);
        assert_eq!(
            cache_err.to_string(),
            "query failed: loading trades: connection refused"
        );
    }

    #[test]
    fn test_timeout_message_mentions_timeout() {
        let err = CacheError::Timeout {
            name: "trades_u1".to_string(),
            timeout: Duration::from_secs(30),
        };
        assert!(err.is_timeout());
        assert!(err.to_string().contains("timed out"));
    }
}
