//! Cancellable units of asynchronous work with exactly one terminal outcome.
//!
//! An [`Action`] wraps a runner function. [`Action::start`] moves it from
//! `Idle` to `Running` and invokes the runner, which is responsible for eventually
//! calling exactly one of [`Action::done`], [`Action::fail`] or [`Action::cancel`].
//!
//! ```text
//! Idle ──start()──▶ Running ──done(result)──▶ Done
//!                      │ ──fail(error)───▶ Fail
//!                      └ ──cancel()──────▶ Cancel
//! ```
//!
//! Each terminal transition dispatches its specific event (`done`, `fail`,
//! `cancel`) and then `complete`, both carrying the same [`ActionEvent`].
//!
//! # Semantics worth knowing
//!
//! - The first terminal transition wins. Later `done`/`fail`/`cancel` calls are
//!   ignored and return `false`; no listener fires twice.
//! - Listeners attached after the action settled get **no replay**. An action is
//!   a one-shot result channel, not a promise.
//! - Actions are single-shot by default: `start()` on a terminal action returns
//!   [`ActionError::Terminated`]. Reusable actions (see
//!   [`ActionBuilder::reusable`]) start a fresh run instead, keeping listeners.
//!
//! # Example
//!
//! ```
//! use ajaxkit_core::action::{Action, ActionState, Options};
//! use std::sync::{Arc, Mutex};
//!
//! let action = Action::<i32, String>::new(|action, _options: &Options| {
//!     action.done(42);
//! });
//!
//! let seen = Arc::new(Mutex::new(None));
//! let sink = Arc::clone(&seen);
//! action.on_done(move |_event, value| *sink.lock().unwrap() = Some(*value));
//!
//! action.start().unwrap();
//!
//! assert_eq!(action.state(), ActionState::Done);
//! assert_eq!(*seen.lock().unwrap(), Some(42));
//! ```

use crate::event::{EventHandler, Listener};
use futures::FutureExt;
use futures::future::{self, BoxFuture};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use thiserror::Error;
use tokio::sync::oneshot;

/// Loosely typed action configuration, merged per call.
pub type Options = Map<String, Value>;

/// Merge `overrides` over `base`; keys in `overrides` win.
#[must_use]
pub fn merge_options(base: &Options, overrides: &Options) -> Options {
    let mut merged = base.clone();
    for (key, value) in overrides {
        merged.insert(key.clone(), value.clone());
    }
    merged
}

/// Lifecycle event names dispatched by an [`Action`].
pub mod events {
    /// Fired on successful completion.
    pub const DONE: &str = "done";
    /// Fired on failure.
    pub const FAIL: &str = "fail";
    /// Fired on cancellation.
    pub const CANCEL: &str = "cancel";
    /// Fired after any of the three above.
    pub const COMPLETE: &str = "complete";
}

/// State of an [`Action`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionState {
    /// Created, never started.
    Idle,
    /// Started, waiting for the runner to settle.
    Running,
    /// Settled successfully.
    Done,
    /// Settled with an error.
    Fail,
    /// Settled by cancellation.
    Cancel,
}

impl ActionState {
    /// Whether the state is one of `Done`, `Fail` or `Cancel`.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Fail | Self::Cancel)
    }

    /// Name of the state as used in logs and serialized forms.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Running => "running",
            Self::Done => "done",
            Self::Fail => "fail",
            Self::Cancel => "cancel",
        }
    }
}

impl fmt::Display for ActionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Payload dispatched to action listeners.
///
/// The `complete` event receives the same value as the specific terminal event
/// that preceded it.
#[derive(Debug, Clone, PartialEq)]
pub enum ActionEvent<T, E> {
    /// Successful result.
    Done(T),
    /// Failure payload.
    Fail(E),
    /// Cancellation.
    Cancel,
}

impl<T, E> ActionEvent<T, E> {
    /// Terminal state this event settles into.
    #[must_use]
    pub const fn state(&self) -> ActionState {
        match self {
            Self::Done(_) => ActionState::Done,
            Self::Fail(_) => ActionState::Fail,
            Self::Cancel => ActionState::Cancel,
        }
    }

    /// Name of the specific event dispatched before `complete`.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Done(_) => events::DONE,
            Self::Fail(_) => events::FAIL,
            Self::Cancel => events::CANCEL,
        }
    }
}

/// Errors returned when an action cannot be started.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionError {
    /// `start()` was called while a run is still pending.
    #[error("Action is already running")]
    AlreadyRunning,

    /// `start()` was called on a single-shot action that already settled.
    #[error("Action already settled with state '{0}'")]
    Terminated(ActionState),
}

type Runner<T, E> = dyn Fn(&Action<T, E>, &Options) + Send + Sync;

struct Slot<T, E> {
    state: ActionState,
    result: Option<T>,
    error: Option<E>,
}

struct Inner<T, E> {
    runner: Box<Runner<T, E>>,
    options: Options,
    reusable: bool,
    slot: Mutex<Slot<T, E>>,
    events: EventHandler<ActionEvent<T, E>>,
}

impl<T, E> Inner<T, E> {
    fn slot(&self) -> MutexGuard<'_, Slot<T, E>> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Builder for [`Action`].
pub struct ActionBuilder<T, E> {
    runner: Box<Runner<T, E>>,
    options: Options,
    reusable: bool,
}

impl<T, E> ActionBuilder<T, E>
where
    T: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    /// Construction-time options, merged under per-call options on `start`.
    #[must_use]
    pub fn options(mut self, options: Options) -> Self {
        self.options = options;
        self
    }

    /// Set a single construction-time option.
    #[must_use]
    pub fn option(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.options.insert(key.into(), value.into());
        self
    }

    /// Allow `start()` after the action settled (defaults to `false`).
    #[must_use]
    pub const fn reusable(mut self, reusable: bool) -> Self {
        self.reusable = reusable;
        self
    }

    /// Build the [`Action`] in the `Idle` state.
    #[must_use]
    pub fn build(self) -> Action<T, E> {
        Action {
            inner: Arc::new(Inner {
                runner: self.runner,
                options: self.options,
                reusable: self.reusable,
                slot: Mutex::new(Slot {
                    state: ActionState::Idle,
                    result: None,
                    error: None,
                }),
                events: EventHandler::new(),
            }),
        }
    }
}

/// A cancellable unit of asynchronous work.
///
/// Cloning an `Action` yields another handle to the same action, which is how a
/// runner hands it to the continuation that eventually settles it.
pub struct Action<T, E> {
    inner: Arc<Inner<T, E>>,
}

impl<T, E> Action<T, E>
where
    T: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    /// Create a single-shot action with no construction-time options.
    pub fn new<F>(runner: F) -> Self
    where
        F: Fn(&Self, &Options) + Send + Sync + 'static,
    {
        Self::builder(runner).build()
    }

    /// Start building an action around `runner`.
    pub fn builder<F>(runner: F) -> ActionBuilder<T, E>
    where
        F: Fn(&Self, &Options) + Send + Sync + 'static,
    {
        ActionBuilder {
            runner: Box::new(runner),
            options: Options::new(),
            reusable: false,
        }
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> ActionState {
        self.inner.slot().state
    }

    /// Result of the last successful run.
    #[must_use]
    pub fn result(&self) -> Option<T> {
        self.inner.slot().result.clone()
    }

    /// Error of the last failed run.
    #[must_use]
    pub fn error(&self) -> Option<E> {
        self.inner.slot().error.clone()
    }

    /// Construction-time options.
    #[must_use]
    pub fn options(&self) -> &Options {
        &self.inner.options
    }

    /// Whether `start()` is allowed after the action settled.
    #[must_use]
    pub fn is_reusable(&self) -> bool {
        self.inner.reusable
    }

    /// Whether a run is pending.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.state() == ActionState::Running
    }

    /// Whether the action settled with `done`.
    #[must_use]
    pub fn is_done(&self) -> bool {
        self.state() == ActionState::Done
    }

    /// Whether the action settled with `fail`.
    #[must_use]
    pub fn is_failed(&self) -> bool {
        self.state() == ActionState::Fail
    }

    /// Whether the action settled with `cancel`.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.state() == ActionState::Cancel
    }

    /// The underlying handler, for raw `bind`/`unbind`.
    #[must_use]
    pub fn events(&self) -> &EventHandler<ActionEvent<T, E>> {
        &self.inner.events
    }

    /// Start with the construction-time options.
    ///
    /// # Errors
    ///
    /// See [`start_with`](Self::start_with).
    pub fn start(&self) -> Result<&Self, ActionError> {
        self.start_with(&Options::new())
    }

    /// Start with `overrides` merged over the construction-time options.
    ///
    /// The runner is invoked before this returns; a runner that settles
    /// synchronously has already dispatched its events by then.
    ///
    /// # Errors
    ///
    /// - [`ActionError::AlreadyRunning`] if a run is pending.
    /// - [`ActionError::Terminated`] if a single-shot action already settled.
    pub fn start_with(&self, overrides: &Options) -> Result<&Self, ActionError> {
        {
            let mut slot = self.inner.slot();
            match slot.state {
                ActionState::Running => return Err(ActionError::AlreadyRunning),
                state if state.is_terminal() && !self.inner.reusable => {
                    return Err(ActionError::Terminated(state));
                },
                _ => {},
            }
            slot.state = ActionState::Running;
            slot.result = None;
            slot.error = None;
        }

        let options = merge_options(&self.inner.options, overrides);
        tracing::debug!(options = options.len(), "Action started");

        (self.inner.runner)(self, &options);
        Ok(self)
    }

    /// Settle successfully. Returns `false` if the action was not running.
    pub fn done(&self, result: T) -> bool {
        self.settle(ActionEvent::Done(result))
    }

    /// Settle with an error. Returns `false` if the action was not running.
    pub fn fail(&self, error: E) -> bool {
        self.settle(ActionEvent::Fail(error))
    }

    /// Cancel a pending run. Returns `false` if the action was not running.
    ///
    /// Cancellation is cooperative: it does not interrupt whatever the runner
    /// started, it only makes any later `done`/`fail` a no-op.
    pub fn cancel(&self) -> bool {
        self.settle(ActionEvent::Cancel)
    }

    fn settle(&self, event: ActionEvent<T, E>) -> bool {
        {
            let mut slot = self.inner.slot();
            if slot.state != ActionState::Running {
                tracing::trace!(
                    state = %slot.state,
                    ignored = event.name(),
                    "Ignoring transition on a non-running action"
                );
                return false;
            }

            slot.state = event.state();
            match &event {
                ActionEvent::Done(result) => slot.result = Some(result.clone()),
                ActionEvent::Fail(error) => slot.error = Some(error.clone()),
                ActionEvent::Cancel => {},
            }
        }

        tracing::debug!(state = %event.state(), "Action settled");

        self.inner.events.trigger(event.name(), &event);
        self.inner.events.trigger(events::COMPLETE, &event);
        true
    }

    /// Listen for `done`.
    pub fn on_done<F>(&self, listener: F) -> &Self
    where
        F: Fn(&str, &T) + Send + Sync + 'static,
    {
        self.inner.events.bind(
            events::DONE,
            Listener::new(move |event: &str, payload: &ActionEvent<T, E>| {
                if let ActionEvent::Done(result) = payload {
                    listener(event, result);
                }
            }),
        );
        self
    }

    /// Listen for `fail`.
    pub fn on_fail<F>(&self, listener: F) -> &Self
    where
        F: Fn(&str, &E) + Send + Sync + 'static,
    {
        self.inner.events.bind(
            events::FAIL,
            Listener::new(move |event: &str, payload: &ActionEvent<T, E>| {
                if let ActionEvent::Fail(error) = payload {
                    listener(event, error);
                }
            }),
        );
        self
    }

    /// Listen for `cancel`.
    pub fn on_cancel<F>(&self, listener: F) -> &Self
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.inner.events.bind(
            events::CANCEL,
            Listener::new(move |event: &str, _: &ActionEvent<T, E>| listener(event)),
        );
        self
    }

    /// Listen for `complete`, fired after any terminal event.
    pub fn on_complete<F>(&self, listener: F) -> &Self
    where
        F: Fn(&str, &ActionEvent<T, E>) + Send + Sync + 'static,
    {
        self.inner.events.bind(events::COMPLETE, Listener::new(listener));
        self
    }

    /// Future resolving with the outcome of the next terminal transition.
    ///
    /// Resolves to `None` right away when a single-shot action already settled:
    /// past outcomes are never replayed.
    #[must_use]
    pub fn outcome(&self) -> BoxFuture<'static, Option<ActionEvent<T, E>>> {
        // Holding the slot lock while binding orders this against `settle`.
        let slot = self.inner.slot();
        if slot.state.is_terminal() && !self.inner.reusable {
            return future::ready(None).boxed();
        }

        let (tx, rx) = oneshot::channel();
        let sender = Mutex::new(Some(tx));
        self.inner.events.one(
            events::COMPLETE,
            Listener::new(move |_: &str, payload: &ActionEvent<T, E>| {
                let tx = sender.lock().unwrap_or_else(PoisonError::into_inner).take();
                if let Some(tx) = tx {
                    let _ = tx.send(payload.clone());
                }
            }),
        );
        drop(slot);

        rx.map(Result::ok).boxed()
    }
}

impl<T, E> Clone for Action<T, E> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T, E> fmt::Debug for Action<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Action")
            .field("state", &self.inner.slot().state)
            .field("reusable", &self.inner.reusable)
            .field("options", &self.inner.options)
            .field("events", &self.inner.events)
            .finish_non_exhaustive()
    }
}
