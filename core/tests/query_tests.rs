//! Query lifecycle against a scripted transport.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)] // Tests can unwrap

use ajaxkit_core::transport::{
    Body, Completion, DataType, Form, Method, RequestData, RequestHandle, RequestOptions, Transport,
};
use ajaxkit_core::{ActionError, ActionEvent, ActionState, Query, RequestError};
use ajaxkit_testing::{MockResponse, MockTransport, numbered};
use serde_json::json;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("ajaxkit_core=debug")
        .with_test_writer()
        .try_init();
}

fn data(value: serde_json::Value) -> RequestData {
    serde_json::from_value(value).unwrap()
}

/// Counts every event a query dispatches, by name.
#[derive(Default)]
struct Tally {
    done: AtomicUsize,
    fail: AtomicUsize,
    cancel: AtomicUsize,
    complete: AtomicUsize,
}

impl Tally {
    fn watch(query: &Query) -> Arc<Self> {
        let tally = Arc::new(Self::default());
        let (done, fail, cancel, complete) = (
            Arc::clone(&tally),
            Arc::clone(&tally),
            Arc::clone(&tally),
            Arc::clone(&tally),
        );
        query
            .on_done(move |_, _| {
                done.done.fetch_add(1, Ordering::SeqCst);
            })
            .on_fail(move |_, _| {
                fail.fail.fetch_add(1, Ordering::SeqCst);
            })
            .on_cancel(move |_| {
                cancel.cancel.fetch_add(1, Ordering::SeqCst);
            })
            .on_complete(move |_, _| {
                complete.complete.fetch_add(1, Ordering::SeqCst);
            });
        tally
    }

    fn counts(&self) -> [usize; 4] {
        [
            self.done.load(Ordering::SeqCst),
            self.fail.load(Ordering::SeqCst),
            self.cancel.load(Ordering::SeqCst),
            self.complete.load(Ordering::SeqCst),
        ]
    }
}

fn sync_query(mock: &Arc<MockTransport>) -> Query {
    Query::new(Arc::clone(mock) as Arc<dyn Transport>)
}

fn last_error(query: &Query) -> RequestError {
    query.error().expect("query should have failed")
}

#[test]
fn empty_url_cancels_without_reaching_the_transport() {
    init_tracing();
    let mock = Arc::new(MockTransport::new().with_sync(true));
    let query = sync_query(&mock);
    let tally = Tally::watch(&query);

    query.get(RequestData::new()).unwrap();

    assert_eq!(query.state(), ActionState::Cancel);
    assert_eq!(tally.counts(), [0, 0, 1, 1]);
    assert_eq!(mock.call_count(), 0);

    query.post(data(json!({"a": 1}))).unwrap();
    assert_eq!(tally.counts(), [0, 0, 2, 2]);
    assert_eq!(mock.call_count(), 0);
}

#[test]
fn dynamic_url_resolving_empty_cancels() {
    let mock = Arc::new(MockTransport::new().with_sync(true));
    mock.route(Method::Get, "/items/7", MockResponse::ok("item"));
    let query = sync_query(&mock);
    let id = Arc::new(Mutex::new(None::<u32>));
    let current = Arc::clone(&id);
    query.set_url_fn(move || {
        current
            .lock()
            .unwrap()
            .map_or_else(String::new, |id| format!("/items/{id}"))
    });
    let tally = Tally::watch(&query);

    query.start().unwrap();
    assert_eq!(query.state(), ActionState::Cancel);

    *id.lock().unwrap() = Some(7);
    query.start().unwrap();

    assert_eq!(query.state(), ActionState::Done);
    assert_eq!(query.result(), Some(Body::from("item")));
    assert_eq!(tally.counts(), [1, 0, 1, 2]);
}

#[test]
fn successful_json_response() {
    let mock = Arc::new(MockTransport::new().with_sync(true));
    mock.route(Method::Get, "/contacts", MockResponse::ok(r#"[{"id": 1}]"#));
    let query = Query::with_options(
        Arc::clone(&mock) as Arc<dyn Transport>,
        RequestOptions::new().with_data_type(DataType::Json),
    );
    query.set_url("/contacts");
    let tally = Tally::watch(&query);

    query.get(RequestData::new()).unwrap();

    assert_eq!(query.state(), ActionState::Done);
    assert_eq!(query.result(), Some(Body::Json(json!([{"id": 1}]))));
    assert_eq!(tally.counts(), [1, 0, 0, 1]);
}

#[test]
fn unknown_url_fails_with_404_and_empty_message() {
    let mock = Arc::new(MockTransport::new().with_sync(true));
    let query = sync_query(&mock);
    query.set_url("/nowhere");
    let tally = Tally::watch(&query);

    query.get(RequestData::new()).unwrap();

    let error = last_error(&query);
    assert_eq!(error.kind(), "request");
    assert_eq!(error.status, 404);
    assert_eq!(error.message, "");
    assert_eq!(error.request.method, Method::Get);
    assert_eq!(error.request.url, "/nowhere");
    assert_eq!(tally.counts(), [0, 1, 0, 1]);
}

#[test]
fn unreachable_endpoint_fails_with_status_zero() {
    let mock = Arc::new(MockTransport::new().with_sync(true));
    mock.route(Method::Post, "/offline", MockResponse::unreachable());
    let query = sync_query(&mock);
    query.set_url("/offline");

    query.post(RequestData::new()).unwrap();

    let error = last_error(&query);
    assert!(error.is_unreachable());
    assert_eq!(error.message, "");
}

#[test]
fn server_error_carries_status_and_message() {
    let mock = Arc::new(MockTransport::new().with_sync(true));
    mock.route(Method::Get, "/broken", MockResponse::with_status(500, "HTTP - Error 500"));
    let query = sync_query(&mock);
    query.set_url("/broken");
    let messages = Arc::new(Mutex::new(Vec::new()));
    let seen = Arc::clone(&messages);
    query.on_fail(move |event, error| {
        seen.lock().unwrap().push(format!("{event}: {} {}", error.status, error.message));
    });

    query.get(RequestData::new()).unwrap();

    assert_eq!(*messages.lock().unwrap(), vec!["fail: 500 HTTP - Error 500"]);
    assert_eq!(last_error(&query).body, Body::from("HTTP - Error 500"));
}

#[test]
fn call_data_wins_over_base_data() {
    let mock = Arc::new(MockTransport::new().with_sync(true));
    mock.route(Method::Post, "/save", MockResponse::ok("saved"));
    let query = sync_query(&mock);
    query
        .set_url("/save")
        .set_data(data(json!({"id": 3, "mode": "draft"})));

    query.post(data(json!({"mode": "final", "extra": true}))).unwrap();

    let requests = mock.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].method, Method::Post);
    assert_eq!(
        requests[0].data,
        data(json!({"id": 3, "mode": "final", "extra": true}))
    );
    // The base payload is left as it was.
    assert_eq!(query.data(), data(json!({"id": 3, "mode": "draft"})));
}

#[test]
fn query_is_reusable_and_resets_previous_outcome() {
    let mock = Arc::new(MockTransport::new().with_sync(true));
    mock.route_fn(Method::Get, "/n", numbered("run %d"));
    let query = sync_query(&mock);
    query.set_url("/n");

    query.start().unwrap();
    assert_eq!(query.result(), Some(Body::from("run 1")));

    query.set_url("/missing");
    query.start().unwrap();
    assert_eq!(query.result(), None);
    assert_eq!(last_error(&query).status, 404);

    query.set_url("/n");
    query.start().unwrap();
    assert_eq!(query.result(), Some(Body::from("run 2")));
    assert_eq!(query.error(), None);
}

#[tokio::test]
async fn async_transport_resolves_after_start_returns() {
    init_tracing();
    let mock = Arc::new(MockTransport::new().with_delay(Duration::from_millis(5)));
    mock.route(Method::Get, "/slow", MockResponse::ok("eventually"));
    let query = sync_query(&mock);
    query.set_url("/slow");
    let tally = Tally::watch(&query);

    let outcome = query.outcome();
    query.get(RequestData::new()).unwrap();
    assert!(query.is_running());
    assert_eq!(tally.counts(), [0, 0, 0, 0]);

    assert_eq!(query.get(RequestData::new()).unwrap_err(), ActionError::AlreadyRunning);

    match outcome.await {
        Some(ActionEvent::Done(body)) => assert_eq!(body, Body::from("eventually")),
        other => panic!("unexpected outcome: {other:?}"),
    }
    assert_eq!(tally.counts(), [1, 0, 0, 1]);
    assert_eq!(mock.call_count(), 1);
}

#[tokio::test]
async fn cancel_aborts_the_request_in_flight() {
    let mock = Arc::new(MockTransport::new().with_delay(Duration::from_millis(50)));
    mock.route(Method::Get, "/slow", MockResponse::ok("too late"));
    let query = sync_query(&mock);
    query.set_url("/slow");
    let tally = Tally::watch(&query);

    let outcome = query.outcome();
    query.get(RequestData::new()).unwrap();
    assert!(query.cancel());
    assert!(!query.cancel());

    assert!(matches!(outcome.await, Some(ActionEvent::Cancel)));
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert_eq!(query.state(), ActionState::Cancel);
    assert_eq!(query.result(), None);
    assert_eq!(tally.counts(), [0, 0, 1, 1]);
}

/// Holds completions until the test delivers them; requests cannot be aborted.
#[derive(Default)]
struct Deferred {
    parked: Mutex<Vec<(String, Completion)>>,
}

impl Deferred {
    fn deliver(&self, url: &str) {
        let completion = {
            let mut parked = self.parked.lock().unwrap();
            let index = parked.iter().position(|(parked, _)| parked == url).unwrap();
            parked.remove(index).1
        };
        completion(Ok(Body::from(format!("response of {url}"))));
    }
}

impl Transport for Deferred {
    fn get(
        &self,
        url: &str,
        _: &RequestData,
        _: &RequestOptions,
        on_complete: Completion,
    ) -> RequestHandle {
        self.parked.lock().unwrap().push((url.to_string(), on_complete));
        RequestHandle::completed()
    }

    fn post(
        &self,
        url: &str,
        data: &RequestData,
        options: &RequestOptions,
        on_complete: Completion,
    ) -> RequestHandle {
        self.get(url, data, options, on_complete)
    }

    fn submit(&self, form: &Form, options: &RequestOptions, on_complete: Completion) -> RequestHandle {
        self.get(&form.action, &form.fields, options, on_complete)
    }
}

#[test]
fn late_response_of_cancelled_run_is_ignored() {
    let transport = Arc::new(Deferred::default());
    let query = Query::new(Arc::clone(&transport) as Arc<dyn Transport>);
    let tally = Tally::watch(&query);

    query.set_url("/first").get(RequestData::new()).unwrap();
    assert!(query.cancel());

    query.set_url("/second").get(RequestData::new()).unwrap();
    transport.deliver("/first");

    assert!(query.is_running());
    assert_eq!(query.result(), None);
    assert_eq!(tally.counts(), [0, 0, 1, 1]);

    transport.deliver("/second");
    assert_eq!(query.state(), ActionState::Done);
    assert_eq!(query.result(), Some(Body::from("response of /second")));
    assert_eq!(tally.counts(), [1, 0, 1, 2]);
}

#[test]
fn late_response_after_cancel_leaves_query_cancelled() {
    let transport = Arc::new(Deferred::default());
    let query = Query::new(Arc::clone(&transport) as Arc<dyn Transport>);
    let tally = Tally::watch(&query);

    query.set_url("/slow").get(RequestData::new()).unwrap();
    query.cancel();
    transport.deliver("/slow");

    assert_eq!(query.state(), ActionState::Cancel);
    assert_eq!(query.result(), None);
    assert_eq!(tally.counts(), [0, 0, 1, 1]);
}

/// Resolves `/now` inline and everything else later, recording real deliveries.
struct Split {
    now: MockTransport,
    later: MockTransport,
    delivered: Arc<AtomicBool>,
}

impl Transport for Split {
    fn get(
        &self,
        url: &str,
        data: &RequestData,
        options: &RequestOptions,
        on_complete: Completion,
    ) -> RequestHandle {
        if url == "/now" {
            return self.now.get(url, data, options, on_complete);
        }
        let delivered = Arc::clone(&self.delivered);
        self.later.get(
            url,
            data,
            options,
            Box::new(move |outcome| {
                delivered.store(true, Ordering::SeqCst);
                on_complete(outcome);
            }),
        )
    }

    fn post(
        &self,
        url: &str,
        data: &RequestData,
        options: &RequestOptions,
        on_complete: Completion,
    ) -> RequestHandle {
        self.get(url, data, options, on_complete)
    }

    fn submit(&self, form: &Form, options: &RequestOptions, on_complete: Completion) -> RequestHandle {
        self.get(&form.action, &form.fields, options, on_complete)
    }
}

#[tokio::test]
async fn run_started_from_done_listener_stays_cancellable() {
    let now = MockTransport::new().with_sync(true);
    now.route(Method::Get, "/now", MockResponse::ok("now"));
    let later = MockTransport::new().with_delay(Duration::from_millis(50));
    later.route(Method::Get, "/later", MockResponse::ok("later"));
    let delivered = Arc::new(AtomicBool::new(false));
    let query = Arc::new(Query::new(Arc::new(Split {
        now,
        later,
        delivered: Arc::clone(&delivered),
    })));

    let chained = Arc::new(AtomicBool::new(false));
    let weak = Arc::downgrade(&query);
    query.on_done(move |_, _| {
        if chained.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(query) = weak.upgrade() {
            query.set_url("/later").get(RequestData::new()).unwrap();
        }
    });

    query.set_url("/now").get(RequestData::new()).unwrap();
    assert!(query.is_running());

    assert!(query.cancel());
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert!(!delivered.load(Ordering::SeqCst));
    assert_eq!(query.state(), ActionState::Cancel);
}
