//! # Ajaxkit Testing
//!
//! Test doubles for the ajaxkit crates.
//!
//! This crate provides:
//! - [`MockTransport`]: a scriptable, counting [`Transport`](ajaxkit_core::Transport)
//! - [`FixedClock`] and [`ManualClock`]: deterministic time for expiry policies
//!
//! ## Example
//!
//! ```
//! use ajaxkit_core::transport::{Method, RequestData, RequestOptions, Transport};
//! use ajaxkit_testing::{MockResponse, MockTransport};
//!
//! let mock = MockTransport::new().with_sync(true);
//! mock.route(Method::Get, "/ping", MockResponse::ok("pong"));
//!
//! mock.get("/ping", &RequestData::new(), &RequestOptions::default(), Box::new(|outcome| {
//!     assert_eq!(outcome.unwrap().as_text(), Some("pong"));
//! }));
//!
//! assert_eq!(mock.count(Method::Get), 1);
//! ```

use ajaxkit_core::environment::Clock;
use chrono::{DateTime, Utc};

/// Scriptable in-memory transport
pub mod transport;

/// Mock implementations for testing.
pub mod mocks {
    use super::{Clock, DateTime, Utc};
    use std::sync::{Mutex, PoisonError};
    use std::time::Duration;

    /// Fixed clock for deterministic tests
    ///
    /// Always returns the same time, making tests reproducible.
    ///
    /// # Example
    ///
    /// ```
    /// use ajaxkit_testing::mocks::FixedClock;
    /// use ajaxkit_core::environment::Clock;
    /// use chrono::Utc;
    ///
    /// let clock = FixedClock::new(Utc::now());
    /// let time1 = clock.now();
    /// let time2 = clock.now();
    /// assert_eq!(time1, time2); // Always the same!
    /// ```
    #[derive(Debug, Clone)]
    pub struct FixedClock {
        time: DateTime<Utc>,
    }

    impl FixedClock {
        /// Create a new fixed clock with the given time
        #[must_use]
        pub const fn new(time: DateTime<Utc>) -> Self {
            Self { time }
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.time
        }
    }

    /// Clock that only moves when told to.
    ///
    /// Lets expiry tests jump past a timeout without sleeping.
    ///
    /// ```
    /// use ajaxkit_testing::mocks::ManualClock;
    /// use ajaxkit_core::environment::Clock;
    /// use std::time::Duration;
    ///
    /// let clock = ManualClock::starting_at(chrono::Utc::now());
    /// let before = clock.now();
    /// clock.advance(Duration::from_secs(5));
    /// assert_eq!((clock.now() - before).num_seconds(), 5);
    /// ```
    #[derive(Debug)]
    pub struct ManualClock {
        time: Mutex<DateTime<Utc>>,
    }

    impl ManualClock {
        /// Create a clock frozen at `time`.
        #[must_use]
        pub const fn starting_at(time: DateTime<Utc>) -> Self {
            Self {
                time: Mutex::new(time),
            }
        }

        /// Move the clock forward.
        pub fn advance(&self, by: Duration) {
            let mut time = self.time.lock().unwrap_or_else(PoisonError::into_inner);
            *time = chrono::Duration::from_std(by)
                .ok()
                .and_then(|by| time.checked_add_signed(by))
                .unwrap_or(DateTime::<Utc>::MAX_UTC);
        }

        /// Jump to `time`.
        pub fn set(&self, time: DateTime<Utc>) {
            *self.time.lock().unwrap_or_else(PoisonError::into_inner) = time;
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> DateTime<Utc> {
            *self.time.lock().unwrap_or_else(PoisonError::into_inner)
        }
    }

    /// Create a default fixed clock for tests (2025-01-01 00:00:00 UTC)
    ///
    /// # Panics
    ///
    /// This function will panic if the hardcoded timestamp fails to parse,
    /// which should never happen in practice.
    #[must_use]
    pub fn test_clock() -> FixedClock {
        FixedClock::new(test_epoch())
    }

    /// A manual clock starting at the same instant as [`test_clock`].
    #[must_use]
    pub fn manual_clock() -> ManualClock {
        ManualClock::starting_at(test_epoch())
    }

    #[allow(clippy::expect_used)]
    fn test_epoch() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2025-01-01T00:00:00Z")
            .expect("hardcoded timestamp should always parse")
            .with_timezone(&Utc)
    }
}

// Re-export commonly used items
pub use mocks::{FixedClock, ManualClock, manual_clock, test_clock};
pub use transport::{MockRequest, MockResponse, MockTransport, numbered};
