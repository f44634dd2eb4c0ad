//! Query functions, per-call options and query results
//!
//! A query function is the only thing the cache knows about the remote data
//! source: a zero-argument async closure resolving to a JSON value or an error.

use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use crate::error::CacheError;

/// Future returned by a [`QueryFn`]
pub type QueryFuture = BoxFuture<'static, anyhow::Result<Value>>;

/// Shareable zero-argument fetch function
///
/// # Example
///
/// ```rust
/// use self_healing_cache::QueryFn;
/// use serde_json::json;
///
/// let accounts = QueryFn::new(|| async { Ok(json!([{"id": 1, "name": "A"}])) });
/// ```
#[derive(Clone)]
pub struct QueryFn(Arc<dyn Fn() -> QueryFuture + Send + Sync>);

impl QueryFn {
    /// Wrap a closure returning JSON
    pub fn new<F, Fut>(f: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
    {
        Self(Arc::new(move || f().boxed()))
    }

    /// Wrap a closure returning any serializable type
    pub fn typed<T, F, Fut>(f: F) -> Self
    where
        T: Serialize,
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        Self::new(move || {
            let fut = f();
            async move {
                let value = fut.await?;
                Ok::<Value, anyhow::Error>(serde_json::to_value(value)?)
            }
        })
    }

    /// Invoke the query, converting failures into [`CacheError::Source`]
    pub(crate) fn call(&self) -> BoxFuture<'static, Result<Value, CacheError>> {
        (self.0)().map(|res| res.map_err(|e| CacheError::from_source(&e))).boxed()
    }
}

impl fmt::Debug for QueryFn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("QueryFn")
    }
}

/// Options for a single cache read
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryOptions {
    /// How long a fetched value stays fresh
    pub ttl: Duration,
    /// Serve expired data immediately and refresh it in the background
    pub stale_while_revalidate: bool,
    /// Re-fetch when the application regains focus
    pub refetch_on_focus: bool,
    /// Re-fetch periodically in the background
    pub refetch_interval: Option<Duration>,
    /// Time allowed for one query attempt
    pub timeout: Duration,
    /// Retries after the first failed attempt
    pub retry_attempts: u32,
    /// Base delay of the exponential backoff between attempts
    pub retry_delay: Duration,
}

impl Default for QueryOptions {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(300),
            stale_while_revalidate: true,
            refetch_on_focus: false,
            refetch_interval: None,
            timeout: Duration::from_secs(30),
            retry_attempts: 3,
            retry_delay: Duration::from_secs(1),
        }
    }
}

impl QueryOptions {
    #[must_use]
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    #[must_use]
    pub fn with_stale_while_revalidate(mut self, enabled: bool) -> Self {
        self.stale_while_revalidate = enabled;
        self
    }

    #[must_use]
    pub fn with_refetch_on_focus(mut self, enabled: bool) -> Self {
        self.refetch_on_focus = enabled;
        self
    }

    #[must_use]
    pub fn with_refetch_interval(mut self, interval: Duration) -> Self {
        self.refetch_interval = Some(interval);
        self
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_retries(mut self, attempts: u32, delay: Duration) -> Self {
        self.retry_attempts = attempts;
        self.retry_delay = delay;
        self
    }
}

/// Delay before retry number `attempt + 1`: `base * 2^attempt`
#[must_use]
pub fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    base.saturating_mul(2u32.saturating_pow(attempt))
}

/// Outcome of a cache read
#[derive(Debug, Clone, PartialEq)]
pub struct QueryState<T> {
    /// Fresh, stale, or freshly fetched data
    pub data: Option<T>,
    /// A background revalidation is running for the returned data
    pub loading: bool,
    /// Final error after retries, when no data could be served
    pub error: Option<CacheError>,
    /// The returned data is past its TTL
    pub is_stale: bool,
}

impl<T> QueryState<T> {
    pub(crate) fn fresh(data: T) -> Self {
        Self {
            data: Some(data),
            loading: false,
            error: None,
            is_stale: false,
        }
    }

    pub(crate) fn revalidating(data: T) -> Self {
        Self {
            data: Some(data),
            loading: true,
            error: None,
            is_stale: true,
        }
    }

    pub(crate) fn failed(error: CacheError) -> Self {
        Self {
            data: None,
            loading: false,
            error: Some(error),
            is_stale: false,
        }
    }

    /// Convert into a `Result`, dropping the metadata
    ///
    /// # Errors
    ///
    /// Returns the query error if no data was served.
    pub fn into_result(self) -> Result<Option<T>, CacheError> {
        match self.error {
            Some(error) => Err(error),
            None => Ok(self.data),
        }
    }
}

impl QueryState<Value> {
    /// Deserialize the data into `T`
    pub(crate) fn decode<T: DeserializeOwned>(self) -> QueryState<T> {
        let data = match self.data.map(serde_json::from_value::<T>).transpose() {
            Ok(data) => data,
            Err(e) => return QueryState::failed(e.into()),
        };
        QueryState {
            data,
            loading: self.loading,
            error: self.error,
            is_stale: self.is_stale,
        }
    }
}
