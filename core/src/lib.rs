//! # Ajaxkit Core
//!
//! Cooperative, cancellable actions and the request plumbing built on them.
//!
//! This crate provides the small asynchronous layer every higher-level widget
//! (listviews, dialogs, reloaders, forms) sits on:
//!
//! ## Core Concepts
//!
//! - **[`EventHandler`](event::EventHandler)**: keyed multi-listener dispatch, synchronous and ordered
//! - **[`Action`](action::Action)**: single-shot, cancellable work with exactly one terminal outcome
//! - **[`Transport`](transport::Transport)**: the `get`/`post`/`submit` capability
//! - **[`Query`](query::Query)**: an action bound to one transport call
//! - **[`Clock`](environment::Clock)**: injected time source
//!
//! ## Data Flow
//!
//! ```text
//! application ──▶ Query ──▶ Transport (possibly a cache decorator) ──▶ Completion
//!                   ▲                                                     │
//!                   └──────── done / fail / cancel / complete ◀───────────┘
//! ```
//!
//! ## Architecture Principles
//!
//! - Composition over inheritance: a query *has* a transport, decorators *wrap* one
//! - Dependency injection: transports and clocks are passed in, never global
//! - No hidden retries: re-issuing a request is always the caller's decision
//! - Fail loud: listener panics are not swallowed
//!
//! ## Example
//!
//! ```
//! use ajaxkit_core::action::{Action, Options};
//!
//! let action = Action::<String, String>::new(|action, options: &Options| {
//!     match options.get("name").and_then(|name| name.as_str()) {
//!         Some(name) => action.done(format!("hello {name}")),
//!         None => action.cancel(),
//!     };
//! });
//!
//! action.on_done(|_, greeting| assert_eq!(greeting, "hello ada"));
//!
//! let mut options = Options::new();
//! options.insert("name".to_string(), "ada".into());
//! action.start_with(&options).unwrap();
//! ```

/// Single-shot cancellable actions
pub mod action;

/// Keyed, ordered event dispatch
pub mod event;

/// Transport-bound queries
pub mod query;

/// Request transport contract
pub mod transport;

/// Environment module - Dependency injection traits
///
/// External dependencies the core needs at runtime are abstracted behind
/// traits and passed in explicitly.
pub mod environment {
    use chrono::{DateTime, Utc};

    /// Clock trait - abstracts time operations for testability
    ///
    /// # Examples
    ///
    /// ```ignore
    /// // Production - uses system clock
    /// let clock = SystemClock;
    ///
    /// // Test - fixed time for deterministic tests
    /// struct FixedClock { time: DateTime<Utc> }
    /// impl Clock for FixedClock {
    ///     fn now(&self) -> DateTime<Utc> {
    ///         self.time
    ///     }
    /// }
    /// ```
    pub trait Clock: Send + Sync {
        /// Get the current time
        fn now(&self) -> DateTime<Utc>;
    }

    /// Wall-clock time.
    #[derive(Debug, Clone, Copy, Default)]
    pub struct SystemClock;

    impl Clock for SystemClock {
        fn now(&self) -> DateTime<Utc> {
            Utc::now()
        }
    }
}

// Re-export commonly used types
pub use action::{Action, ActionError, ActionEvent, ActionState, Options};
pub use chrono::{DateTime, Utc};
pub use event::{EventHandler, Listener};
pub use query::{Query, RequestError};
pub use transport::{Body, DataType, Failure, Method, RequestData, RequestOptions, Transport};
