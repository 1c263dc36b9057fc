//! Scriptable in-memory [`Transport`].
//!
//! [`MockTransport`] answers requests from registered routes, counts calls per
//! method and keeps a log of every request it received, so tests can assert
//! exactly when a decorator or query reached the "network".
//!
//! - Unregistered routes answer `404` with an empty body.
//! - [`MockResponse::unreachable`] answers status `0` (nothing responded).
//! - 2xx bodies are parsed according to the request's [`DataType`]; a JSON parse
//!   error becomes a `500` failure.
//! - Non-2xx responses fail with the body as message.
//!
//! Resolution is synchronous when the transport or the request says `sync`;
//! otherwise it runs on a spawned tokio task, after the configured delay.

use ajaxkit_core::transport::{
    Body, Completion, DataType, Failure, Form, Method, RequestData, RequestHandle,
    RequestOptions, Transport, is_success,
};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A scripted raw response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockResponse {
    /// HTTP status; `0` means no response.
    pub status: u16,
    /// Raw body text.
    pub body: String,
}

impl MockResponse {
    /// A `200` response.
    pub fn ok(body: impl Into<String>) -> Self {
        Self::with_status(200, body)
    }

    /// A response with an arbitrary status.
    pub fn with_status(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    /// `404` with an empty body, the answer of unregistered routes.
    #[must_use]
    pub const fn not_found() -> Self {
        Self {
            status: 404,
            body: String::new(),
        }
    }

    /// Nothing answered (status `0`, empty body).
    #[must_use]
    pub const fn unreachable() -> Self {
        Self {
            status: 0,
            body: String::new(),
        }
    }

    /// Turn the raw response into what a transport hands to its completion.
    ///
    /// # Errors
    ///
    /// Returns a [`Failure`] for non-2xx statuses, and a `500` failure when a 2xx
    /// body does not parse as `data_type`.
    pub fn into_outcome(self, data_type: DataType) -> Result<Body, Failure> {
        if !is_success(self.status) {
            return Err(Failure::new(self.status, self.body.clone(), Body::Text(self.body)));
        }

        let raw = self.body.clone();
        Body::parse(data_type, self.body)
            .map_err(|error| Failure::new(500, error.to_string(), Body::Text(raw)))
    }
}

/// A request as received by the mock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockRequest {
    /// Request method.
    pub method: Method,
    /// Request URL.
    pub url: String,
    /// Request payload.
    pub data: RequestData,
    /// Options the request was sent with.
    pub options: RequestOptions,
}

type Responder = Arc<dyn Fn(&MockRequest) -> MockResponse + Send + Sync>;

/// Responder answering `template` with `%d` replaced by the call number (from 1).
///
/// ```
/// use ajaxkit_testing::transport::{MockRequest, numbered};
/// use ajaxkit_core::transport::{Method, RequestData, RequestOptions};
///
/// let respond = numbered("message %d");
/// let request = MockRequest {
///     method: Method::Get,
///     url: "/".to_string(),
///     data: RequestData::new(),
///     options: RequestOptions::default(),
/// };
/// assert_eq!(respond(&request).body, "message 1");
/// assert_eq!(respond(&request).body, "message 2");
/// ```
pub fn numbered(
    template: impl Into<String>,
) -> impl Fn(&MockRequest) -> MockResponse + Send + Sync + 'static {
    let template = template.into();
    let counter = AtomicUsize::new(0);
    move |_: &MockRequest| {
        let call = counter.fetch_add(1, Ordering::SeqCst) + 1;
        MockResponse::ok(template.replace("%d", &call.to_string()))
    }
}

/// Scriptable, counting transport.
pub struct MockTransport {
    routes: Mutex<HashMap<(Method, String), Responder>>,
    requests: Mutex<Vec<MockRequest>>,
    sync: bool,
    delay: Option<Duration>,
}

impl MockTransport {
    /// Asynchronous mock with no routes.
    #[must_use]
    pub fn new() -> Self {
        Self {
            routes: Mutex::new(HashMap::new()),
            requests: Mutex::new(Vec::new()),
            sync: false,
            delay: None,
        }
    }

    /// Resolve every request synchronously, regardless of its options.
    #[must_use]
    pub const fn with_sync(mut self, sync: bool) -> Self {
        self.sync = sync;
        self
    }

    /// Default delay for asynchronous resolutions; a request's own delay wins.
    #[must_use]
    pub const fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Answer `method url` with a fixed response.
    pub fn route(&self, method: Method, url: impl Into<String>, response: MockResponse) -> &Self {
        self.route_fn(method, url, move |_: &MockRequest| response.clone())
    }

    /// Answer `method url` with whatever `respond` computes per call.
    pub fn route_fn<F>(&self, method: Method, url: impl Into<String>, respond: F) -> &Self
    where
        F: Fn(&MockRequest) -> MockResponse + Send + Sync + 'static,
    {
        lock(&self.routes).insert((method, url.into()), Arc::new(respond));
        self
    }

    /// Number of requests received with `method`.
    #[must_use]
    pub fn count(&self, method: Method) -> usize {
        lock(&self.requests)
            .iter()
            .filter(|request| request.method == method)
            .count()
    }

    /// Number of requests received.
    #[must_use]
    pub fn call_count(&self) -> usize {
        lock(&self.requests).len()
    }

    /// Every request received so far, oldest first.
    #[must_use]
    pub fn requests(&self) -> Vec<MockRequest> {
        lock(&self.requests).clone()
    }

    /// Forget received requests (routes are kept).
    pub fn clear_requests(&self) {
        lock(&self.requests).clear();
    }

    fn respond(&self, request: MockRequest, on_complete: Completion) -> RequestHandle {
        let responder = lock(&self.routes)
            .get(&(request.method, request.url.clone()))
            .cloned();
        lock(&self.requests).push(request.clone());

        let response = responder.map_or_else(MockResponse::not_found, |respond| respond(&request));
        tracing::trace!(
            method = %request.method,
            url = %request.url,
            status = response.status,
            "Mock transport answering"
        );
        let outcome = response.into_outcome(request.options.data_type);

        if !(self.sync || request.options.sync) {
            match tokio::runtime::Handle::try_current() {
                Ok(runtime) => {
                    let delay = request.options.delay.or(self.delay);
                    let task = runtime.spawn(async move {
                        if let Some(delay) = delay {
                            tokio::time::sleep(delay).await;
                        }
                        on_complete(outcome);
                    });
                    return RequestHandle::spawned(task.abort_handle());
                },
                Err(_) => {
                    tracing::warn!("No tokio runtime available, resolving mock request synchronously");
                },
            }
        }

        on_complete(outcome);
        RequestHandle::completed()
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for MockTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MockTransport")
            .field("routes", &lock(&self.routes).len())
            .field("requests", &lock(&self.requests).len())
            .field("sync", &self.sync)
            .field("delay", &self.delay)
            .finish()
    }
}

impl Transport for MockTransport {
    fn get(
        &self,
        url: &str,
        data: &RequestData,
        options: &RequestOptions,
        on_complete: Completion,
    ) -> RequestHandle {
        self.respond(
            MockRequest {
                method: Method::Get,
                url: url.to_string(),
                data: data.clone(),
                options: options.clone(),
            },
            on_complete,
        )
    }

    fn post(
        &self,
        url: &str,
        data: &RequestData,
        options: &RequestOptions,
        on_complete: Completion,
    ) -> RequestHandle {
        self.respond(
            MockRequest {
                method: Method::Post,
                url: url.to_string(),
                data: data.clone(),
                options: options.clone(),
            },
            on_complete,
        )
    }

    fn submit(
        &self,
        form: &Form,
        options: &RequestOptions,
        on_complete: Completion,
    ) -> RequestHandle {
        self.respond(
            MockRequest {
                method: form.method,
                url: form.action.clone(),
                data: form.fields.clone(),
                options: options.clone(),
            },
            on_complete,
        )
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)] // Test code can unwrap
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::sync::oneshot;

    type Outcomes = Arc<Mutex<Vec<Result<Body, Failure>>>>;

    fn collect(outcomes: &Outcomes) -> Completion {
        let outcomes = Arc::clone(outcomes);
        Box::new(move |outcome| outcomes.lock().unwrap().push(outcome))
    }

    fn sync_mock() -> MockTransport {
        MockTransport::new().with_sync(true)
    }

    #[test]
    fn registered_route_answers() {
        let mock = sync_mock();
        mock.route(Method::Get, "/hello", MockResponse::ok("world"));
        let outcomes = Outcomes::default();

        let handle = mock.get("/hello", &RequestData::new(), &RequestOptions::default(), collect(&outcomes));

        assert!(handle.is_finished());
        assert_eq!(*outcomes.lock().unwrap(), vec![Ok(Body::from("world"))]);
        assert_eq!(mock.count(Method::Get), 1);
        assert_eq!(mock.count(Method::Post), 0);
    }

    #[test]
    fn unknown_route_is_404_with_empty_message() {
        let mock = sync_mock();
        let outcomes = Outcomes::default();

        mock.post("/missing", &RequestData::new(), &RequestOptions::default(), collect(&outcomes));

        let failure = outcomes.lock().unwrap()[0].clone().unwrap_err();
        assert_eq!(failure.status, 404);
        assert_eq!(failure.message, "");
    }

    #[test]
    fn error_status_uses_body_as_message() {
        let mock = sync_mock();
        mock.route(Method::Get, "/broken", MockResponse::with_status(500, "HTTP - Error 500"));
        let outcomes = Outcomes::default();

        mock.get("/broken", &RequestData::new(), &RequestOptions::default(), collect(&outcomes));

        let failure = outcomes.lock().unwrap()[0].clone().unwrap_err();
        assert_eq!(failure.status, 500);
        assert_eq!(failure.message, "HTTP - Error 500");
        assert_eq!(failure.body, Body::from("HTTP - Error 500"));
    }

    #[test]
    fn json_bodies_are_parsed() {
        let mock = sync_mock();
        mock.route(Method::Get, "/json", MockResponse::ok(r#"{"a": [1, 2]}"#));
        mock.route(Method::Get, "/garbage", MockResponse::ok("<div>"));
        let options = RequestOptions::new().with_data_type(DataType::Json);
        let outcomes = Outcomes::default();

        mock.get("/json", &RequestData::new(), &options, collect(&outcomes));
        mock.get("/garbage", &RequestData::new(), &options, collect(&outcomes));

        let outcomes = outcomes.lock().unwrap().clone();
        assert_eq!(outcomes[0], Ok(Body::Json(json!({"a": [1, 2]}))));
        assert_eq!(outcomes[1].clone().unwrap_err().status, 500);
    }

    #[test]
    fn submit_uses_form_target() {
        let mock = sync_mock();
        mock.route(Method::Post, "/form", MockResponse::ok("saved"));
        let outcomes = Outcomes::default();

        let form = Form::new("/form").field("name", "Ada");
        mock.submit(&form, &RequestOptions::default(), collect(&outcomes));

        assert_eq!(*outcomes.lock().unwrap(), vec![Ok(Body::from("saved"))]);
        let requests = mock.requests();
        assert_eq!(requests[0].url, "/form");
        assert_eq!(requests[0].data.get("name"), Some(&json!("Ada")));
    }

    #[test]
    fn numbered_responses_count_real_calls() {
        let mock = sync_mock();
        mock.route_fn(Method::Get, "/n", numbered("call %d"));
        let outcomes = Outcomes::default();

        for _ in 0..3 {
            mock.get("/n", &RequestData::new(), &RequestOptions::default(), collect(&outcomes));
        }

        let bodies: Vec<_> = outcomes
            .lock()
            .unwrap()
            .iter()
            .map(|outcome| outcome.clone().unwrap().to_string())
            .collect();
        assert_eq!(bodies, vec!["call 1", "call 2", "call 3"]);
        assert_eq!(mock.call_count(), 3);

        mock.clear_requests();
        assert_eq!(mock.call_count(), 0);
    }

    #[test]
    fn without_runtime_async_requests_resolve_inline() {
        let mock = MockTransport::new();
        mock.route(Method::Get, "/x", MockResponse::ok("x"));
        let outcomes = Outcomes::default();

        mock.get("/x", &RequestData::new(), &RequestOptions::default(), collect(&outcomes));

        assert_eq!(outcomes.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn async_requests_resolve_later() {
        let mock = MockTransport::new().with_delay(Duration::from_millis(10));
        mock.route(Method::Get, "/slow", MockResponse::ok("done"));
        let (tx, rx) = oneshot::channel();

        let handle = mock.get(
            "/slow",
            &RequestData::new(),
            &RequestOptions::default(),
            Box::new(move |outcome| {
                let _ = tx.send(outcome);
            }),
        );

        assert!(!handle.is_finished());
        assert_eq!(rx.await.unwrap(), Ok(Body::from("done")));
    }

    #[tokio::test]
    async fn request_sync_option_overrides_async_mock() {
        let mock = MockTransport::new();
        mock.route(Method::Get, "/now", MockResponse::ok("now"));
        let outcomes = Outcomes::default();

        mock.get("/now", &RequestData::new(), &RequestOptions::new().with_sync(true), collect(&outcomes));

        assert_eq!(outcomes.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn aborted_requests_never_complete() {
        let mock = MockTransport::new().with_delay(Duration::from_millis(50));
        mock.route(Method::Get, "/slow", MockResponse::ok("late"));
        let outcomes = Outcomes::default();

        let handle = mock.get("/slow", &RequestData::new(), &RequestOptions::default(), collect(&outcomes));
        handle.abort();
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert!(outcomes.lock().unwrap().is_empty());
        assert!(handle.is_finished());
    }
}
