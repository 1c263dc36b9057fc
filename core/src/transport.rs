//! The request-sending capability consumed by queries and cache decorators.
//!
//! A [`Transport`] exposes `get`, `post` and `submit`. Each call takes a
//! [`Completion`] continuation that receives either the response [`Body`] or a
//! [`Failure`], and returns an implementation-defined [`RequestHandle`].
//!
//! Transports may resolve synchronously (the continuation runs before the call
//! returns, see [`RequestOptions::sync`]) or later from another task. Callers must
//! handle both.
//!
//! Decorators such as a response cache implement `Transport` themselves and wrap
//! another one, so the trait is also implemented for `Arc<T>` and `Box<T>`.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::task::AbortHandle;

/// Request payload. Ordered so that its serialized form is canonical.
pub type RequestData = BTreeMap<String, Value>;

/// HTTP method of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
    /// `GET`
    Get,
    /// `POST`
    Post,
}

impl Method {
    /// Upper-case method name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Expected response format; decides how a successful body is parsed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    /// HTML fragment, kept as text.
    #[default]
    Html,
    /// Plain text.
    Text,
    /// JSON document, parsed into a [`Value`].
    Json,
}

impl DataType {
    /// Lower-case name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Html => "html",
            Self::Text => "text",
            Self::Json => "json",
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-request transport options.
///
/// Deserializable with defaults, so partial configurations such as
/// `{"dataType": "json"}` are accepted.
///
/// # Default Values
///
/// - `sync`: `false`
/// - `data_type`: [`DataType::Html`]
/// - `forcecache`: `false`
/// - `delay`: none
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RequestOptions {
    /// Resolve before the transport call returns.
    pub sync: bool,
    /// Expected response format.
    pub data_type: DataType,
    /// Bypass any response cache and overwrite it with the fresh response.
    pub forcecache: bool,
    /// Artificial delay before resolution, honoured by transports that support it.
    /// Serialized as whole milliseconds.
    #[serde(with = "delay_millis")]
    pub delay: Option<Duration>,
}

impl RequestOptions {
    /// Create options with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the `sync` flag.
    #[must_use]
    pub const fn with_sync(mut self, sync: bool) -> Self {
        self.sync = sync;
        self
    }

    /// Set the expected response format.
    #[must_use]
    pub const fn with_data_type(mut self, data_type: DataType) -> Self {
        self.data_type = data_type;
        self
    }

    /// Set the `forcecache` flag.
    #[must_use]
    pub const fn with_forcecache(mut self, forcecache: bool) -> Self {
        self.forcecache = forcecache;
        self
    }

    /// Set the resolution delay.
    #[must_use]
    pub const fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}

mod delay_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    #[allow(clippy::ref_option)] // Signature required by `serde(with)`
    pub fn serialize<S: Serializer>(delay: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error> {
        delay
            .map(|delay| u64::try_from(delay.as_millis()).unwrap_or(u64::MAX))
            .serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Duration>, D::Error> {
        Ok(Option::<u64>::deserialize(deserializer)?.map(Duration::from_millis))
    }
}

/// Error raised when a body does not match its [`DataType`].
#[derive(Error, Debug)]
#[error("Invalid {data_type} response body: {source}")]
pub struct BodyParseError {
    /// Format the body was parsed as.
    pub data_type: DataType,
    /// Underlying parser error.
    #[source]
    pub source: serde_json::Error,
}

/// A response body, already parsed according to the request's [`DataType`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Body {
    /// Raw text (HTML or plain text responses).
    Text(String),
    /// Parsed JSON document.
    Json(Value),
}

impl Body {
    /// Parse a raw response body as `data_type`.
    ///
    /// # Errors
    ///
    /// Returns [`BodyParseError`] when `data_type` is JSON and `raw` is not valid JSON.
    pub fn parse(data_type: DataType, raw: String) -> Result<Self, BodyParseError> {
        match data_type {
            DataType::Html | DataType::Text => Ok(Self::Text(raw)),
            DataType::Json => serde_json::from_str(&raw)
                .map(Self::Json)
                .map_err(|source| BodyParseError { data_type, source }),
        }
    }

    /// Empty text body.
    #[must_use]
    pub const fn empty() -> Self {
        Self::Text(String::new())
    }

    /// The text, if this is a text body.
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            Self::Json(_) => None,
        }
    }

    /// The document, if this is a JSON body.
    #[must_use]
    pub const fn as_json(&self) -> Option<&Value> {
        match self {
            Self::Json(value) => Some(value),
            Self::Text(_) => None,
        }
    }
}

impl Default for Body {
    fn default() -> Self {
        Self::empty()
    }
}

impl From<&str> for Body {
    fn from(text: &str) -> Self {
        Self::Text(text.to_string())
    }
}

impl From<String> for Body {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

impl From<Value> for Body {
    fn from(value: Value) -> Self {
        Self::Json(value)
    }
}

impl fmt::Display for Body {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text(text) => f.write_str(text),
            Self::Json(value) => write!(f, "{value}"),
        }
    }
}

/// An unsuccessful response: the body plus its status information.
///
/// `status` is `0` when no response was received at all (network-level error).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Request failed with status {status}: {message}")]
pub struct Failure {
    /// Body of the error response, if any.
    pub body: Body,
    /// HTTP status, or `0` for a non-response.
    pub status: u16,
    /// Status message; empty for unknown or unreachable endpoints.
    pub message: String,
}

impl Failure {
    /// Build a failure from its parts.
    pub fn new(status: u16, message: impl Into<String>, body: Body) -> Self {
        Self {
            body,
            status,
            message: message.into(),
        }
    }

    /// No response at all (status `0`, empty message).
    #[must_use]
    pub const fn unreachable() -> Self {
        Self {
            body: Body::empty(),
            status: 0,
            message: String::new(),
        }
    }
}

/// Whether `status` is in the 2xx range.
#[must_use]
pub const fn is_success(status: u16) -> bool {
    status >= 200 && status < 300
}

/// Continuation invoked exactly once with the outcome of a transport call.
pub type Completion = Box<dyn FnOnce(Result<Body, Failure>) + Send + 'static>;

/// Handle returned by a transport call.
///
/// Only transports that run requests on a spawned task can abort them; for
/// synchronous resolutions the handle is already finished.
#[derive(Debug, Clone, Default)]
pub struct RequestHandle {
    task: Option<AbortHandle>,
}

impl RequestHandle {
    /// Handle of a request that already resolved.
    #[must_use]
    pub const fn completed() -> Self {
        Self { task: None }
    }

    /// Handle of a request running on a spawned task.
    #[must_use]
    pub fn spawned(task: AbortHandle) -> Self {
        Self { task: Some(task) }
    }

    /// Whether the request can no longer resolve.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.task.as_ref().is_none_or(AbortHandle::is_finished)
    }

    /// Abort a request still in flight. Its completion will never run.
    pub fn abort(&self) {
        if let Some(task) = &self.task {
            task.abort();
        }
    }
}

/// A form submission target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Form {
    /// Submission URL.
    pub action: String,
    /// Submission method.
    pub method: Method,
    /// Field values.
    pub fields: RequestData,
}

impl Form {
    /// A POST form with no fields.
    pub fn new(action: impl Into<String>) -> Self {
        Self {
            action: action.into(),
            method: Method::Post,
            fields: RequestData::new(),
        }
    }

    /// Set a field value.
    #[must_use]
    pub fn field(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }
}

/// Request-sending capability.
///
/// Implementations call `on_complete` exactly once, unless the request is
/// aborted through its [`RequestHandle`].
pub trait Transport: Send + Sync {
    /// Send a GET request.
    fn get(
        &self,
        url: &str,
        data: &RequestData,
        options: &RequestOptions,
        on_complete: Completion,
    ) -> RequestHandle;

    /// Send a POST request.
    fn post(
        &self,
        url: &str,
        data: &RequestData,
        options: &RequestOptions,
        on_complete: Completion,
    ) -> RequestHandle;

    /// Submit a form.
    fn submit(
        &self,
        form: &Form,
        options: &RequestOptions,
        on_complete: Completion,
    ) -> RequestHandle;

    /// Dispatch on `method`.
    fn send(
        &self,
        method: Method,
        url: &str,
        data: &RequestData,
        options: &RequestOptions,
        on_complete: Completion,
    ) -> RequestHandle {
        match method {
            Method::Get => self.get(url, data, options, on_complete),
            Method::Post => self.post(url, data, options, on_complete),
        }
    }
}

impl<T: Transport + ?Sized> Transport for Arc<T> {
    fn get(
        &self,
        url: &str,
        data: &RequestData,
        options: &RequestOptions,
        on_complete: Completion,
    ) -> RequestHandle {
        (**self).get(url, data, options, on_complete)
    }

    fn post(
        &self,
        url: &str,
        data: &RequestData,
        options: &RequestOptions,
        on_complete: Completion,
    ) -> RequestHandle {
        (**self).post(url, data, options, on_complete)
    }

    fn submit(
        &self,
        form: &Form,
        options: &RequestOptions,
        on_complete: Completion,
    ) -> RequestHandle {
        (**self).submit(form, options, on_complete)
    }
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn get(
        &self,
        url: &str,
        data: &RequestData,
        options: &RequestOptions,
        on_complete: Completion,
    ) -> RequestHandle {
        (**self).get(url, data, options, on_complete)
    }

    fn post(
        &self,
        url: &str,
        data: &RequestData,
        options: &RequestOptions,
        on_complete: Completion,
    ) -> RequestHandle {
        (**self).post(url, data, options, on_complete)
    }

    fn submit(
        &self,
        form: &Form,
        options: &RequestOptions,
        on_complete: Completion,
    ) -> RequestHandle {
        (**self).submit(form, options, on_complete)
    }
}
