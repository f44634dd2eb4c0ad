//! Service configuration
//!
//! [`CacheConfig`] aggregates the per-component configurations. Defaults are
//! usable as-is; [`CacheConfig::from_env`] overlays a few environment variables:
//!
//! | variable                   | field                          |
//! |----------------------------|--------------------------------|
//! | `CACHE_MAX_ENTRIES`        | `store.max_entries`            |
//! | `CACHE_DEFAULT_TTL_MS`     | `store.default_ttl`            |
//! | `CACHE_HEALTH_INTERVAL_MS` | `health.check_interval` (`0` disables) |
//! | `CACHE_PERSIST_PREFIX`     | `store.persist_prefix`         |

use std::str::FromStr;
use std::time::Duration;
use tracing::debug;

use crate::corruption::CorruptionConfig;
use crate::error::CacheError;
use crate::health::HealthConfig;
use crate::invalidation::InvalidationConfig;
use crate::refresh::RefreshConfig;
use crate::store::StoreConfig;

/// Configuration of every cache component
#[derive(Debug, Clone, Default)]
pub struct CacheConfig {
    pub store: StoreConfig,
    pub invalidation: InvalidationConfig,
    pub refresh: RefreshConfig,
    pub corruption: CorruptionConfig,
    pub health: HealthConfig,
}

fn check(ok: bool, message: &str) -> Result<(), CacheError> {
    if ok {
        Ok(())
    } else {
        Err(CacheError::Config(message.to_string()))
    }
}

fn is_ratio(value: f64) -> bool {
    value > 0.0 && value <= 1.0
}

impl CacheConfig {
    /// Defaults overlaid with the `CACHE_*` environment variables
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Config`] if a variable does not parse or the
    /// result fails [`validate`](Self::validate).
    pub fn from_env() -> Result<Self, CacheError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup<L>(lookup: L) -> Result<Self, CacheError>
    where
        L: Fn(&str) -> Option<String>,
    {
        fn parse<T: FromStr>(name: &str, raw: &str) -> Result<T, CacheError> {
            raw.trim()
                .parse()
                .map_err(|_| CacheError::Config(format!("{name}={raw:?} is not a valid number")))
        }

        let mut config = Self::default();
        if let Some(raw) = lookup("CACHE_MAX_ENTRIES") {
            config.store.max_entries = parse("CACHE_MAX_ENTRIES", &raw)?;
        }
        if let Some(raw) = lookup("CACHE_DEFAULT_TTL_MS") {
            config.store.default_ttl = Duration::from_millis(parse("CACHE_DEFAULT_TTL_MS", &raw)?);
        }
        if let Some(raw) = lookup("CACHE_HEALTH_INTERVAL_MS") {
            let millis: u64 = parse("CACHE_HEALTH_INTERVAL_MS", &raw)?;
            config.health.check_interval = (millis > 0).then(|| Duration::from_millis(millis));
        }
        if let Some(prefix) = lookup("CACHE_PERSIST_PREFIX") {
            config.store.persist_prefix = prefix;
        }
        debug!(?config, "Loaded cache configuration from environment");

        config.validate()?;
        Ok(config)
    }

    /// Reject values the components cannot work with
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Config`] naming the first offending field.
    pub fn validate(&self) -> Result<(), CacheError> {
        check(self.store.max_entries > 0, "store.max_entries must be greater than zero")?;
        check(
            (1..=100).contains(&self.store.eviction_percent),
            "store.eviction_percent must be between 1 and 100",
        )?;
        check(!self.store.default_ttl.is_zero(), "store.default_ttl must be greater than zero")?;

        check(
            self.invalidation.channel_capacity > 0,
            "invalidation.channel_capacity must be greater than zero",
        )?;

        check(self.refresh.max_retries > 0, "refresh.max_retries must be greater than zero")?;

        check(
            self.corruption.failure_threshold > 0,
            "corruption.failure_threshold must be greater than zero",
        )?;
        check(!self.corruption.window.is_zero(), "corruption.window must be greater than zero")?;
        check(
            !self.corruption.cleanup_interval.is_zero(),
            "corruption.cleanup_interval must be greater than zero",
        )?;
        check(
            self.corruption.max_error_samples > 0,
            "corruption.max_error_samples must be greater than zero",
        )?;

        check(
            self.health.check_interval.is_none_or(|interval| !interval.is_zero()),
            "health.check_interval must be greater than zero when set",
        )?;
        check(
            !self.health.default_timeout.is_zero(),
            "health.default_timeout must be greater than zero",
        )?;
        check(
            self.health.max_pending_operations > 0,
            "health.max_pending_operations must be greater than zero",
        )?;
        check(
            self.health.max_recovery_attempts > 0,
            "health.max_recovery_attempts must be greater than zero",
        )?;
        check(
            is_ratio(self.health.slow_operation_ratio)
                && is_ratio(self.health.capacity_warning_ratio)
                && is_ratio(self.health.stale_ratio_threshold),
            "health ratios must be in (0, 1]",
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn test_defaults_are_valid() {
        let config = CacheConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.store.max_entries, 100);
        assert_eq!(config.corruption.failure_threshold, 3);
        assert_eq!(config.health.check_interval, Some(Duration::from_secs(10)));
    }

    #[test]
    fn test_environment_overlay() {
        let config = CacheConfig::from_lookup(env(&[
            ("CACHE_MAX_ENTRIES", "250"),
            ("CACHE_DEFAULT_TTL_MS", "60000"),
            ("CACHE_HEALTH_INTERVAL_MS", "0"),
            ("CACHE_PERSIST_PREFIX", "crm_"),
        ]))
        .unwrap();

        assert_eq!(config.store.max_entries, 250);
        assert_eq!(config.store.default_ttl, Duration::from_secs(60));
        assert_eq!(config.health.check_interval, None);
        assert_eq!(config.store.persist_prefix, "crm_");
    }

    #[test]
    fn test_bad_values_are_rejected() {
        assert!(matches!(
            CacheConfig::from_lookup(env(&[("CACHE_MAX_ENTRIES", "lots")])),
            Err(CacheError::Config(_))
        ));
        assert!(CacheConfig::from_lookup(env(&[("CACHE_DEFAULT_TTL_MS", "0")])).is_err());

        let mut config = CacheConfig::default();
        config.health.stale_ratio_threshold = 1.5;
        assert!(config.validate().is_err());
    }
}
