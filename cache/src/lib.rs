//! # Ajaxkit Cache
//!
//! A [`Transport`](ajaxkit_core::Transport) decorator that memoizes successful GET
//! responses under a pluggable expiry [`Condition`].
//!
//! ```text
//! Query ──▶ CacheBackend ──hit──▶ stored response (no transport call)
//!                 │
//!                 └──miss / expired / forcecache──▶ wrapped Transport ──2xx──▶ store + deliver
//!                                                                   └─error──▶ deliver only
//! ```
//!
//! Failed responses are never stored, so a failing endpoint is always retried
//! against the wrapped transport.

/// Caching transport decorator and its configuration
pub mod backend;

/// Expiry policies
pub mod condition;

/// Cache keys and entries
pub mod entry;

pub use backend::{CacheBackend, CacheConfig, CacheConfigBuilder};
pub use condition::{Condition, PredicateCondition, TimeoutCondition};
pub use entry::{CacheEntry, CacheKey, EntryState};
