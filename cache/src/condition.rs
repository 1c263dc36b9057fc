//! Expiry policies for cached entries.
//!
//! A [`Condition`] decides whether an entry must be refetched, and stamps the
//! [`EntryState`] stored alongside each freshly populated entry. Expiry is pulled
//! on every lookup; nothing runs in the background.
//!
//! An entry without state is always expired, whatever the condition.

use crate::entry::{CacheEntry, EntryState};
use ajaxkit_core::environment::{Clock, SystemClock};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Policy answering "is this cache entry expired?".
pub trait Condition: Send + Sync + fmt::Debug {
    /// Whether `entry` must be treated as stale.
    fn expired(&self, entry: &CacheEntry) -> bool;

    /// State recorded on an entry when it is (re)populated.
    fn stamp(&self) -> Option<EntryState>;
}

/// Condition driven by a zero-argument predicate.
///
/// Useful for tests and for externally driven invalidation: the predicate is
/// evaluated on every lookup.
///
/// ```
/// use ajaxkit_cache::PredicateCondition;
/// use std::sync::Arc;
/// use std::sync::atomic::{AtomicBool, Ordering};
///
/// let stale = Arc::new(AtomicBool::new(false));
/// let flag = Arc::clone(&stale);
/// let condition = PredicateCondition::new(move || flag.load(Ordering::SeqCst));
/// # let _ = condition;
/// stale.store(true, Ordering::SeqCst); // invalidate every entry
/// ```
#[derive(Clone)]
pub struct PredicateCondition {
    predicate: Arc<dyn Fn() -> bool + Send + Sync>,
}

impl PredicateCondition {
    /// Entries are expired whenever `predicate` returns `true`.
    pub fn new<F>(predicate: F) -> Self
    where
        F: Fn() -> bool + Send + Sync + 'static,
    {
        Self {
            predicate: Arc::new(predicate),
        }
    }

    /// Never serve from the cache.
    #[must_use]
    pub fn always() -> Self {
        Self::new(|| true)
    }

    /// Serve populated entries forever.
    #[must_use]
    pub fn never() -> Self {
        Self::new(|| false)
    }
}

impl fmt::Debug for PredicateCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PredicateCondition").finish_non_exhaustive()
    }
}

impl Condition for PredicateCondition {
    fn expired(&self, entry: &CacheEntry) -> bool {
        entry.state.is_none() || (self.predicate)()
    }

    fn stamp(&self) -> Option<EntryState> {
        Some(EntryState::Populated)
    }
}

/// Entries expire a fixed duration after they were populated.
///
/// An entry is expired iff `now - populated_at >= timeout`.
#[derive(Clone)]
pub struct TimeoutCondition {
    timeout: Duration,
    clock: Arc<dyn Clock>,
}

impl TimeoutCondition {
    /// Expire entries after `timeout`, measured with the system clock.
    #[must_use]
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            clock: Arc::new(SystemClock),
        }
    }

    /// Measure time with `clock` instead.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Configured timeout.
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        self.timeout
    }
}

impl fmt::Debug for TimeoutCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TimeoutCondition")
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl Condition for TimeoutCondition {
    fn expired(&self, entry: &CacheEntry) -> bool {
        let Some(populated_at) = entry.populated_at() else {
            return true;
        };

        // A negative age (clock moved backwards) counts as fresh.
        (self.clock.now() - populated_at)
            .to_std()
            .is_ok_and(|age| age >= self.timeout)
    }

    fn stamp(&self) -> Option<EntryState> {
        Some(EntryState::Timestamp(self.clock.now()))
    }
}
