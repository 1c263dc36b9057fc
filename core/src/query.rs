//! Actions bound to a single transport call.
//!
//! A [`Query`] is a reusable [`Action`] whose runner sends one request through a
//! [`Transport`]:
//!
//! - 2xx: the action settles `done` with the response [`Body`].
//! - anything else: it settles `fail` with a [`RequestError`].
//! - empty URL: it settles `cancel` without touching the transport. An empty
//!   URL means "nothing to do", not "the request failed".
//!
//! The URL can be a fixed string or a closure evaluated on every call, so one
//! query object can always target the current endpoint. Base data set with
//! [`Query::set_data`] is merged under the data passed to [`Query::get`] /
//! [`Query::post`]; per-call keys win.
//!
//! # Example
//!
//! ```ignore
//! use ajaxkit_core::query::Query;
//! use ajaxkit_core::transport::RequestData;
//!
//! let query = Query::new(backend);
//! query
//!     .set_url("/contacts/list")
//!     .on_done(|_, body| render(body))
//!     .on_fail(|_, error| show_error(error.status, &error.message));
//!
//! query.get(RequestData::new())?;
//! ```

use crate::action::{Action, ActionError, ActionEvent, ActionState, Options};
use crate::transport::{Body, Failure, Method, RequestData, RequestHandle, RequestOptions, Transport};
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use thiserror::Error;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Where a query takes its URL from.
#[derive(Clone)]
pub enum UrlSource {
    /// A fixed URL.
    Static(String),
    /// A closure re-evaluated on every call.
    Dynamic(Arc<dyn Fn() -> String + Send + Sync>),
}

impl UrlSource {
    /// The URL this source currently points at.
    #[must_use]
    pub fn resolve(&self) -> String {
        match self {
            Self::Static(url) => url.clone(),
            Self::Dynamic(compute) => compute(),
        }
    }
}

impl Default for UrlSource {
    fn default() -> Self {
        Self::Static(String::new())
    }
}

impl fmt::Debug for UrlSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Static(url) => f.debug_tuple("Static").field(url).finish(),
            Self::Dynamic(_) => f.write_str("Dynamic(<fn>)"),
        }
    }
}

/// The request a failure belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestInfo {
    /// Method the request was sent with.
    pub method: Method,
    /// Resolved URL.
    pub url: String,
}

impl fmt::Display for RequestInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.method, self.url)
    }
}

/// Failure payload of a [`Query`].
///
/// `status` is `0` with an empty `message` when nothing answered; an unknown
/// route answers with its own status (typically 404) and an empty `message`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Request '{request}' failed with status {status}: {message}")]
pub struct RequestError {
    /// HTTP status, or `0` for a non-response.
    pub status: u16,
    /// Status message.
    pub message: String,
    /// The request that failed.
    pub request: RequestInfo,
    /// Body of the error response.
    pub body: Body,
}

impl RequestError {
    /// Kind tag shared by every request failure.
    pub const KIND: &'static str = "request";

    /// Attach a transport failure to the request that produced it.
    #[must_use]
    pub fn from_failure(request: RequestInfo, failure: Failure) -> Self {
        Self {
            status: failure.status,
            message: failure.message,
            request,
            body: failure.body,
        }
    }

    /// Always [`RequestError::KIND`].
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        Self::KIND
    }

    /// Whether nothing answered at all.
    #[must_use]
    pub const fn is_unreachable(&self) -> bool {
        self.status == 0
    }
}

struct Call {
    method: Method,
    data: RequestData,
}

struct Shared {
    backend: Arc<dyn Transport>,
    options: RequestOptions,
    url: Mutex<UrlSource>,
    data: Mutex<RequestData>,
    pending: Mutex<Option<Call>>,
    handle: Mutex<RequestHandle>,
    // Bumped by every run and every cancel; completions of older runs are dropped.
    generation: Arc<AtomicU64>,
}

impl Shared {
    fn url(&self) -> String {
        // Resolve outside the lock: a dynamic source may read the query itself.
        let source = lock(&self.url).clone();
        source.resolve()
    }

    fn send(&self, action: &Action<Body, RequestError>) {
        let run = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let call = lock(&self.pending).take().unwrap_or(Call {
            method: Method::Get,
            data: RequestData::new(),
        });

        let url = self.url();
        if url.is_empty() {
            tracing::debug!(method = %call.method, "Query has no URL, cancelling");
            action.cancel();
            return;
        }

        let mut data = lock(&self.data).clone();
        data.extend(call.data);

        let request = RequestInfo {
            method: call.method,
            url,
        };
        tracing::debug!(request = %request, fields = data.len(), "Sending query");

        let settle = action.clone();
        let info = request.clone();
        let generation = Arc::clone(&self.generation);
        let handle = self.backend.send(
            request.method,
            &request.url,
            &data,
            &self.options,
            Box::new(move |outcome| {
                if generation.load(Ordering::SeqCst) != run {
                    tracing::debug!(request = %info, "Dropping response of a superseded query run");
                    return;
                }
                match outcome {
                    Ok(body) => {
                        settle.done(body);
                    },
                    Err(failure) => {
                        tracing::debug!(request = %info, status = failure.status, "Query failed");
                        settle.fail(RequestError::from_failure(info, failure));
                    },
                }
            }),
        );

        // A listener may already have started a newer run with its own handle.
        let mut current = lock(&self.handle);
        if self.generation.load(Ordering::SeqCst) == run {
            *current = handle;
        }
    }
}

/// A reusable action performing one transport call per run.
pub struct Query {
    shared: Arc<Shared>,
    action: Action<Body, RequestError>,
}

impl Query {
    /// Create a query with default request options and no URL.
    #[must_use]
    pub fn new(backend: Arc<dyn Transport>) -> Self {
        Self::with_options(backend, RequestOptions::default())
    }

    /// Create a query sending every request with `options`.
    #[must_use]
    pub fn with_options(backend: Arc<dyn Transport>, options: RequestOptions) -> Self {
        let shared = Arc::new(Shared {
            backend,
            options,
            url: Mutex::new(UrlSource::default()),
            data: Mutex::new(RequestData::new()),
            pending: Mutex::new(None),
            handle: Mutex::new(RequestHandle::completed()),
            generation: Arc::new(AtomicU64::new(0)),
        });

        let runner = Arc::clone(&shared);
        let action = Action::builder(move |action: &Action<Body, RequestError>, _: &Options| {
            runner.send(action);
        })
        .reusable(true)
        .build();

        Self { shared, action }
    }

    /// The URL the next call would target.
    #[must_use]
    pub fn url(&self) -> String {
        self.shared.url()
    }

    /// Target a fixed URL.
    pub fn set_url(&self, url: impl Into<String>) -> &Self {
        *lock(&self.shared.url) = UrlSource::Static(url.into());
        self
    }

    /// Target whatever `compute` returns at call time.
    pub fn set_url_fn<F>(&self, compute: F) -> &Self
    where
        F: Fn() -> String + Send + Sync + 'static,
    {
        *lock(&self.shared.url) = UrlSource::Dynamic(Arc::new(compute));
        self
    }

    /// Base payload sent with every request.
    #[must_use]
    pub fn data(&self) -> RequestData {
        lock(&self.shared.data).clone()
    }

    /// Replace the base payload.
    pub fn set_data(&self, data: RequestData) -> &Self {
        *lock(&self.shared.data) = data;
        self
    }

    /// Options every request is sent with.
    #[must_use]
    pub fn options(&self) -> &RequestOptions {
        &self.shared.options
    }

    /// The transport requests go through.
    #[must_use]
    pub fn backend(&self) -> &Arc<dyn Transport> {
        &self.shared.backend
    }

    /// The underlying action.
    #[must_use]
    pub const fn action(&self) -> &Action<Body, RequestError> {
        &self.action
    }

    fn send(&self, method: Method, data: RequestData) -> Result<&Self, ActionError> {
        *lock(&self.shared.pending) = Some(Call { method, data });

        match self.action.start() {
            Ok(_) => Ok(self),
            Err(error) => {
                lock(&self.shared.pending).take();
                Err(error)
            },
        }
    }

    /// Send a GET request with `data` merged over the base payload.
    ///
    /// # Errors
    ///
    /// Returns [`ActionError::AlreadyRunning`] while a previous call is pending.
    pub fn get(&self, data: RequestData) -> Result<&Self, ActionError> {
        self.send(Method::Get, data)
    }

    /// Send a POST request with `data` merged over the base payload.
    ///
    /// # Errors
    ///
    /// Returns [`ActionError::AlreadyRunning`] while a previous call is pending.
    pub fn post(&self, data: RequestData) -> Result<&Self, ActionError> {
        self.send(Method::Post, data)
    }

    /// Send a GET request with the base payload only.
    ///
    /// # Errors
    ///
    /// Returns [`ActionError::AlreadyRunning`] while a previous call is pending.
    pub fn start(&self) -> Result<&Self, ActionError> {
        self.send(Method::Get, RequestData::new())
    }

    /// Cancel the pending call, aborting it when the transport supports that.
    ///
    /// Returns `false` if nothing was pending.
    pub fn cancel(&self) -> bool {
        if !self.action.is_running() {
            return false;
        }
        self.shared.generation.fetch_add(1, Ordering::SeqCst);
        lock(&self.shared.handle).abort();
        self.action.cancel()
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> ActionState {
        self.action.state()
    }

    /// Whether a call is pending.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.action.is_running()
    }

    /// Body of the last successful call.
    #[must_use]
    pub fn result(&self) -> Option<Body> {
        self.action.result()
    }

    /// Error of the last failed call.
    #[must_use]
    pub fn error(&self) -> Option<RequestError> {
        self.action.error()
    }

    /// Listen for `done`.
    pub fn on_done<F>(&self, listener: F) -> &Self
    where
        F: Fn(&str, &Body) + Send + Sync + 'static,
    {
        self.action.on_done(listener);
        self
    }

    /// Listen for `fail`.
    pub fn on_fail<F>(&self, listener: F) -> &Self
    where
        F: Fn(&str, &RequestError) + Send + Sync + 'static,
    {
        self.action.on_fail(listener);
        self
    }

    /// Listen for `cancel`.
    pub fn on_cancel<F>(&self, listener: F) -> &Self
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.action.on_cancel(listener);
        self
    }

    /// Listen for `complete`.
    pub fn on_complete<F>(&self, listener: F) -> &Self
    where
        F: Fn(&str, &ActionEvent<Body, RequestError>) + Send + Sync + 'static,
    {
        self.action.on_complete(listener);
        self
    }

    /// Outcome of the next call to settle.
    #[must_use]
    pub fn outcome(&self) -> BoxFuture<'static, Option<ActionEvent<Body, RequestError>>> {
        self.action.outcome()
    }
}

impl fmt::Debug for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Query")
            .field("url", &*lock(&self.shared.url))
            .field("data", &*lock(&self.shared.data))
            .field("options", &self.shared.options)
            .field("action", &self.action)
            .finish_non_exhaustive()
    }
}
