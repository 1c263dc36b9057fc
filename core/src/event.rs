//! Keyed, ordered, multi-listener event dispatch.
//!
//! [`EventHandler`] is the pub/sub register every [`Action`](crate::action::Action)
//! uses for its lifecycle events. It maps an event name to an ordered sequence of
//! [`Listener`]s and dispatches synchronously, in registration order.
//!
//! # Semantics
//!
//! - Binding is a cross product: every event name × every listener is appended.
//! - No de-duplication: binding the same listener twice calls it twice.
//! - Unbinding something that was never bound is a no-op.
//! - Dispatch runs over a snapshot taken when [`EventHandler::trigger`] starts, so
//!   listeners may bind, unbind or trigger re-entrantly.
//! - No error isolation: a panicking listener unwinds out of `trigger` and the
//!   remaining listeners of that dispatch are skipped.
//!
//! # Example
//!
//! ```
//! use ajaxkit_core::event::{EventHandler, Listener};
//! use std::sync::{Arc, Mutex};
//!
//! let handler = EventHandler::<i32>::new();
//! let seen = Arc::new(Mutex::new(Vec::new()));
//!
//! let log = Arc::clone(&seen);
//! let listener = Listener::new(move |event: &str, value: &i32| {
//!     log.lock().unwrap().push(format!("{event}:{value}"));
//! });
//!
//! handler.bind(["open", "close"], &listener);
//! handler.trigger("open", &1);
//! handler.trigger("close", &2);
//!
//! assert_eq!(*seen.lock().unwrap(), vec!["open:1", "close:2"]);
//! ```

use smallvec::SmallVec;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

type Callback<A> = dyn Fn(&str, &A) + Send + Sync;

/// A cloneable listener callback.
///
/// Identity is the identity of the shared closure: clones of one `Listener` are
/// the same listener for [`EventHandler::unbind`], while two listeners built from
/// identical closures are not.
pub struct Listener<A> {
    callback: Arc<Callback<A>>,
}

impl<A> Listener<A> {
    /// Wrap a closure receiving the event name and the dispatched arguments.
    pub fn new<F>(callback: F) -> Self
    where
        F: Fn(&str, &A) + Send + Sync + 'static,
    {
        Self {
            callback: Arc::new(callback),
        }
    }

    /// Invoke the listener directly.
    pub fn call(&self, event: &str, args: &A) {
        (self.callback)(event, args);
    }

    /// Whether both handles point at the same closure.
    #[must_use]
    pub fn same_as(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.callback, &other.callback)
    }
}

impl<A> Clone for Listener<A> {
    fn clone(&self) -> Self {
        Self {
            callback: Arc::clone(&self.callback),
        }
    }
}

impl<A> PartialEq for Listener<A> {
    fn eq(&self, other: &Self) -> bool {
        self.same_as(other)
    }
}

impl<A> fmt::Debug for Listener<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Listener")
            .field("callback", &Arc::as_ptr(&self.callback).cast::<()>())
            .finish()
    }
}

/// One or more event names.
///
/// Lets [`EventHandler::bind`] and friends accept `"name"` as well as
/// `["a", "b"]` or a `Vec<String>`.
pub trait EventKeys {
    /// Collect the event names.
    fn into_keys(self) -> SmallVec<[String; 4]>;
}

impl EventKeys for &str {
    fn into_keys(self) -> SmallVec<[String; 4]> {
        smallvec::smallvec![self.to_string()]
    }
}

impl EventKeys for String {
    fn into_keys(self) -> SmallVec<[String; 4]> {
        smallvec::smallvec![self]
    }
}

impl EventKeys for &String {
    fn into_keys(self) -> SmallVec<[String; 4]> {
        smallvec::smallvec![self.clone()]
    }
}

impl EventKeys for &[&str] {
    fn into_keys(self) -> SmallVec<[String; 4]> {
        self.iter().map(|key| (*key).to_string()).collect()
    }
}

impl<const N: usize> EventKeys for [&str; N] {
    fn into_keys(self) -> SmallVec<[String; 4]> {
        self.iter().map(|key| (*key).to_string()).collect()
    }
}

impl EventKeys for Vec<&str> {
    fn into_keys(self) -> SmallVec<[String; 4]> {
        self.into_iter().map(str::to_string).collect()
    }
}

impl EventKeys for Vec<String> {
    fn into_keys(self) -> SmallVec<[String; 4]> {
        self.into_iter().collect()
    }
}

/// One or more listeners.
pub trait IntoListeners<A> {
    /// Collect the listeners, preserving order.
    fn into_listeners(self) -> SmallVec<[Listener<A>; 4]>;
}

impl<A> IntoListeners<A> for Listener<A> {
    fn into_listeners(self) -> SmallVec<[Listener<A>; 4]> {
        smallvec::smallvec![self]
    }
}

impl<A> IntoListeners<A> for &Listener<A> {
    fn into_listeners(self) -> SmallVec<[Listener<A>; 4]> {
        smallvec::smallvec![self.clone()]
    }
}

impl<A> IntoListeners<A> for &[Listener<A>] {
    fn into_listeners(self) -> SmallVec<[Listener<A>; 4]> {
        self.iter().cloned().collect()
    }
}

impl<A, const N: usize> IntoListeners<A> for [Listener<A>; N] {
    fn into_listeners(self) -> SmallVec<[Listener<A>; 4]> {
        self.into_iter().collect()
    }
}

impl<A> IntoListeners<A> for Vec<Listener<A>> {
    fn into_listeners(self) -> SmallVec<[Listener<A>; 4]> {
        self.into_iter().collect()
    }
}

struct Binding<A> {
    listener: Listener<A>,
    once: bool,
}

/// Ordered multi-listener register keyed by event name.
///
/// `A` is the argument type handed to every listener on dispatch.
pub struct EventHandler<A> {
    bindings: Mutex<HashMap<String, Vec<Binding<A>>>>,
}

impl<A> EventHandler<A> {
    /// Create an empty handler.
    #[must_use]
    pub fn new() -> Self {
        Self {
            bindings: Mutex::new(HashMap::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Vec<Binding<A>>>> {
        self.bindings.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn insert(&self, events: impl EventKeys, listeners: impl IntoListeners<A>, once: bool) {
        let keys = events.into_keys();
        let listeners = listeners.into_listeners();
        let mut bindings = self.lock();

        for key in keys {
            let sequence = bindings.entry(key).or_default();
            sequence.extend(listeners.iter().map(|listener| Binding {
                listener: listener.clone(),
                once,
            }));
        }
    }

    /// Append every listener to every event's sequence.
    pub fn bind(&self, events: impl EventKeys, listeners: impl IntoListeners<A>) -> &Self {
        self.insert(events, listeners, false);
        self
    }

    /// Like [`bind`](Self::bind), but each binding is dropped right before its
    /// first dispatch.
    pub fn one(&self, events: impl EventKeys, listeners: impl IntoListeners<A>) -> &Self {
        self.insert(events, listeners, true);
        self
    }

    /// Remove the given listeners from the given events.
    ///
    /// Pairs that were never bound are ignored.
    pub fn unbind(&self, events: impl EventKeys, listeners: impl IntoListeners<A>) -> &Self {
        let keys = events.into_keys();
        let listeners = listeners.into_listeners();
        let mut bindings = self.lock();

        for key in keys {
            let emptied = bindings.get_mut(key.as_str()).is_some_and(|sequence| {
                sequence.retain(|binding| {
                    !listeners
                        .iter()
                        .any(|listener| listener.same_as(&binding.listener))
                });
                sequence.is_empty()
            });

            if emptied {
                bindings.remove(key.as_str());
            }
        }

        self
    }

    /// Clear every listener bound to the given events.
    pub fn unbind_all(&self, events: impl EventKeys) -> &Self {
        let mut bindings = self.lock();
        for key in events.into_keys() {
            bindings.remove(key.as_str());
        }
        self
    }

    /// Current listeners of `event`, in dispatch order. Empty for unknown events.
    #[must_use]
    pub fn listeners(&self, event: &str) -> Vec<Listener<A>> {
        self.lock()
            .get(event)
            .map(|sequence| {
                sequence
                    .iter()
                    .map(|binding| binding.listener.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Whether at least one listener is bound to `event`.
    #[must_use]
    pub fn is_bound(&self, event: &str) -> bool {
        self.lock().get(event).is_some_and(|sequence| !sequence.is_empty())
    }

    /// Call every listener bound to `event`, in registration order.
    pub fn trigger(&self, event: &str, args: &A) {
        let snapshot: SmallVec<[Listener<A>; 4]> = {
            let mut bindings = self.lock();
            let mut emptied = false;

            let snapshot = match bindings.get_mut(event) {
                Some(sequence) => {
                    let snapshot: SmallVec<[Listener<A>; 4]> = sequence
                        .iter()
                        .map(|binding| binding.listener.clone())
                        .collect();
                    sequence.retain(|binding| !binding.once);
                    emptied = sequence.is_empty();
                    snapshot
                },
                None => SmallVec::new(),
            };

            if emptied {
                bindings.remove(event);
            }

            snapshot
        };

        tracing::trace!(event, listeners = snapshot.len(), "Dispatching event");

        for listener in &snapshot {
            listener.call(event, args);
        }
    }
}

impl<A> Default for EventHandler<A> {
    fn default() -> Self {
        Self::new()
    }
}

impl<A> fmt::Debug for EventHandler<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let bindings = self.lock();
        let mut map = f.debug_map();
        for (event, sequence) in bindings.iter() {
            map.entry(event, &sequence.len());
        }
        map.finish()
    }
}
