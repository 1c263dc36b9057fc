//! The caching [`Transport`] decorator.

use crate::condition::{Condition, PredicateCondition};
use crate::entry::{CacheEntry, CacheKey};
use ajaxkit_core::transport::{
    Completion, DataType, Form, RequestData, RequestHandle, RequestOptions, Transport,
};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

type Entries = Arc<Mutex<HashMap<CacheKey, CacheEntry>>>;

fn lock(entries: &Entries) -> MutexGuard<'_, HashMap<CacheKey, CacheEntry>> {
    entries.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Configuration for a [`CacheBackend`].
///
/// # Default Values
///
/// - `condition`: [`PredicateCondition::always`] (every lookup refetches, so
///   nothing is served from the cache until a condition is configured)
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Expiry policy.
    pub condition: Arc<dyn Condition>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            condition: Arc::new(PredicateCondition::always()),
        }
    }
}

impl CacheConfig {
    /// Create a new config builder.
    #[must_use]
    pub fn builder() -> CacheConfigBuilder {
        CacheConfigBuilder::default()
    }

    /// Set the expiry policy.
    #[must_use]
    pub fn with_condition(mut self, condition: impl Condition + 'static) -> Self {
        self.condition = Arc::new(condition);
        self
    }
}

/// Builder for [`CacheConfig`].
#[derive(Debug, Clone, Default)]
pub struct CacheConfigBuilder {
    condition: Option<Arc<dyn Condition>>,
}

impl CacheConfigBuilder {
    /// Set the expiry policy.
    #[must_use]
    pub fn condition(mut self, condition: impl Condition + 'static) -> Self {
        self.condition = Some(Arc::new(condition));
        self
    }

    /// Set an already shared expiry policy.
    #[must_use]
    pub fn shared_condition(mut self, condition: Arc<dyn Condition>) -> Self {
        self.condition = Some(condition);
        self
    }

    /// Build the config.
    #[must_use]
    pub fn build(self) -> CacheConfig {
        self.condition
            .map_or_else(CacheConfig::default, |condition| CacheConfig { condition })
    }
}

/// Transport decorator memoizing successful GET responses.
///
/// - A lookup hits when an entry exists for `(url, data, data_type)`, the request
///   is not `forcecache`, and the condition does not report it expired. Hits
///   resolve synchronously and never reach the wrapped transport.
/// - Misses delegate to the wrapped transport. Successes create or overwrite the
///   entry before the caller's completion runs; failures leave the cache untouched.
/// - POST requests and form submissions are passed through.
///
/// Entries are never evicted; [`CacheBackend::reset`] clears them all.
///
/// # Example
///
/// ```
/// use ajaxkit_cache::{CacheBackend, CacheConfig, PredicateCondition};
/// use ajaxkit_core::transport::{Method, RequestData, RequestOptions, Transport};
/// use ajaxkit_testing::{MockTransport, numbered};
/// use std::sync::Arc;
///
/// let mock = Arc::new(MockTransport::new().with_sync(true));
/// mock.route_fn(Method::Get, "/news", numbered("edition %d"));
///
/// let cache = CacheBackend::with_config(
///     Arc::clone(&mock),
///     CacheConfig::builder().condition(PredicateCondition::never()).build(),
/// );
///
/// for _ in 0..2 {
///     cache.get("/news", &RequestData::new(), &RequestOptions::default(), Box::new(|outcome| {
///         assert_eq!(outcome.unwrap().as_text(), Some("edition 1"));
///     }));
/// }
/// assert_eq!(mock.call_count(), 1);
/// ```
pub struct CacheBackend<T> {
    transport: T,
    condition: Arc<dyn Condition>,
    entries: Entries,
}

impl<T: Transport> CacheBackend<T> {
    /// Wrap `transport` with the default config.
    pub fn new(transport: T) -> Self {
        Self::with_config(transport, CacheConfig::default())
    }

    /// Wrap `transport` with `config`.
    pub fn with_config(transport: T, config: CacheConfig) -> Self {
        Self {
            transport,
            condition: config.condition,
            entries: Arc::default(),
        }
    }

    /// The wrapped transport.
    #[must_use]
    pub const fn transport(&self) -> &T {
        &self.transport
    }

    /// The expiry policy.
    #[must_use]
    pub fn condition(&self) -> &Arc<dyn Condition> {
        &self.condition
    }

    /// Snapshot of every entry.
    #[must_use]
    pub fn entries(&self) -> Vec<CacheEntry> {
        lock(&self.entries).values().cloned().collect()
    }

    /// The entry stored for a request, whether or not it is expired.
    #[must_use]
    pub fn entry(&self, url: &str, data: &RequestData, data_type: DataType) -> Option<CacheEntry> {
        let key = CacheKey::new(url, data, data_type).ok()?;
        lock(&self.entries).get(&key).cloned()
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        lock(&self.entries).len()
    }

    /// Whether nothing is cached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        lock(&self.entries).is_empty()
    }

    /// Drop every entry.
    pub fn reset(&self) {
        let mut entries = lock(&self.entries);
        tracing::debug!(entries = entries.len(), "Resetting response cache");
        entries.clear();
    }

    fn fetch(
        &self,
        key: CacheKey,
        url: &str,
        data: &RequestData,
        options: &RequestOptions,
        on_complete: Completion,
    ) -> RequestHandle {
        let entries = Arc::clone(&self.entries);
        let condition = Arc::clone(&self.condition);
        let stored_data = data.clone();

        self.transport.get(
            url,
            data,
            options,
            Box::new(move |outcome| {
                match &outcome {
                    Ok(body) => {
                        tracing::debug!(url = %key.url, data_type = %key.data_type, "Storing response in cache");
                        let entry = CacheEntry {
                            url: key.url.clone(),
                            data: stored_data,
                            data_type: key.data_type,
                            response: body.clone(),
                            state: condition.stamp(),
                        };
                        lock(&entries).insert(key, entry);
                    },
                    Err(failure) => {
                        tracing::debug!(
                            url = %key.url,
                            status = failure.status,
                            "Request failed, cache left untouched"
                        );
                    },
                }
                on_complete(outcome);
            }),
        )
    }
}

impl<T: fmt::Debug> fmt::Debug for CacheBackend<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheBackend")
            .field("transport", &self.transport)
            .field("condition", &self.condition)
            .field("entries", &lock(&self.entries).len())
            .finish()
    }
}

impl<T: Transport> Transport for CacheBackend<T> {
    fn get(
        &self,
        url: &str,
        data: &RequestData,
        options: &RequestOptions,
        on_complete: Completion,
    ) -> RequestHandle {
        let key = match CacheKey::new(url, data, options.data_type) {
            Ok(key) => key,
            Err(error) => {
                tracing::warn!(url, %error, "Request data not serializable, bypassing cache");
                return self.transport.get(url, data, options, on_complete);
            },
        };

        if !options.forcecache {
            // The condition runs unlocked: it may inspect this cache.
            let cached = lock(&self.entries).get(&key).cloned();
            let hit = cached
                .filter(|entry| !self.condition.expired(entry))
                .map(|entry| entry.response);

            if let Some(response) = hit {
                tracing::trace!(url, data_type = %options.data_type, "Cache hit");
                on_complete(Ok(response));
                return RequestHandle::completed();
            }
        }

        tracing::trace!(url, forcecache = options.forcecache, "Cache miss");
        self.fetch(key, url, data, options, on_complete)
    }

    fn post(
        &self,
        url: &str,
        data: &RequestData,
        options: &RequestOptions,
        on_complete: Completion,
    ) -> RequestHandle {
        self.transport.post(url, data, options, on_complete)
    }

    fn submit(
        &self,
        form: &Form,
        options: &RequestOptions,
        on_complete: Completion,
    ) -> RequestHandle {
        self.transport.submit(form, options, on_complete)
    }
}
