//! Server-Sent Events client: framing over a real HTTP body, resumption and
//! backoff timing.

use async_trait::async_trait;
use futures::StreamExt;
use mockito::Matcher;
use ocxp_client::client::config::ResolvedOptions;
use ocxp_client::client::interceptors::RequestInterceptor;
use ocxp_client::client::transport::HttpTransport;
use ocxp_client::client::validation::ResponseValidator;
use ocxp_client::shared::sse::{create_sse_client, SseRequest};
use ocxp_client::{
    Client, ClientConfig, Error, RequestOptions, SseData, SseOptions, StreamEvent, TransportError,
};
use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Transport that always fails and records when it was called.
#[derive(Debug, Default)]
struct FlakyTransport {
    calls: Mutex<Vec<Instant>>,
}

#[async_trait]
impl HttpTransport for FlakyTransport {
    async fn execute(
        &self,
        _request: reqwest::Request,
    ) -> Result<reqwest::Response, TransportError> {
        self.calls.lock().push(Instant::now());
        Err(TransportError::ConnectionClosed)
    }
}

struct NonNegative;

#[async_trait]
impl ResponseValidator for NonNegative {
    async fn validate_response(&self, data: &Value) -> ocxp_client::Result<()> {
        match data["n"].as_i64() {
            Some(n) if n < 0 => Err(Error::validation("negative")),
            _ => Ok(()),
        }
    }
}

struct Trace;

#[async_trait]
impl RequestInterceptor for Trace {
    async fn on_request(
        &self,
        mut request: reqwest::Request,
        _options: &ResolvedOptions,
    ) -> ocxp_client::Result<reqwest::Request> {
        request
            .headers_mut()
            .insert("x-trace", "sse".parse().unwrap());
        Ok(request)
    }
}

#[tokio::test]
async fn frames_are_yielded_in_order() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("GET", "/api/acme/events")
        .match_header("x-trace", "sse")
        .with_status(200)
        .with_header("content-type", "text/event-stream")
        .with_body("data: {\"a\":1}\n\nid: 5\n\r\nevent: note\r\ndata: plain\r\ndata: text\r\n\r\n")
        .create_async()
        .await;

    let client = Client::new(ClientConfig::new().base_url(format!("{}/api", server.url())));
    client.interceptors().write().request.add(Arc::new(Trace));

    let events: Arc<Mutex<Vec<StreamEvent>>> = Arc::default();
    let seen = events.clone();
    let stream = client
        .sse(
            RequestOptions::new("/{workspace}/events").path(json!({"workspace": "acme"})),
            SseOptions::default().on_event(move |event| seen.lock().push(event.clone())),
        )
        .await
        .unwrap();

    let items: Vec<SseData> = stream.collect().await;
    mock.assert_async().await;
    assert_eq!(
        items,
        vec![
            SseData::Json(json!({"a": 1})),
            SseData::Text("plain\ntext".to_string()),
        ]
    );

    let events = events.lock();
    assert_eq!(events.len(), 3);
    assert_eq!(events[1].data, None);
    assert_eq!(events[1].id.as_deref(), Some("5"));
    assert_eq!(events[2].event.as_deref(), Some("note"));
    assert_eq!(events[2].id.as_deref(), Some("5"));
}

#[tokio::test]
async fn reconnect_resumes_from_last_event_id() {
    let mut server = mockito::Server::new_async().await;
    let first = server
        .mock("GET", "/stream")
        .match_header("last-event-id", Matcher::Missing)
        .with_status(200)
        .with_header("content-type", "text/event-stream")
        .with_body("id: 1\ndata: {\"n\":1}\n\nid: 2\ndata: {\"n\":-1}\n\n")
        .create_async()
        .await;
    let resumed = server
        .mock("GET", "/stream")
        .match_header("last-event-id", "2")
        .with_status(200)
        .with_header("content-type", "text/event-stream")
        .with_body("id: 3\ndata: {\"n\":3}\n\n")
        .create_async()
        .await;

    let errors = Arc::new(AtomicUsize::new(0));
    let counted = errors.clone();
    let url = format!("{}/stream", server.url()).parse().unwrap();
    let stream = create_sse_client(
        SseRequest::new(url),
        SseOptions::default()
            .default_retry_delay(Duration::from_millis(10))
            .response_validator(Arc::new(NonNegative))
            .on_error(move |error| {
                assert!(matches!(error, Error::Validation(_)));
                counted.fetch_add(1, Ordering::SeqCst);
            }),
    );

    let items: Vec<Value> = stream
        .filter_map(|item| async move { item.as_json().cloned() })
        .collect()
        .await;
    first.assert_async().await;
    resumed.assert_async().await;
    assert_eq!(items, vec![json!({"n": 1}), json!({"n": 3})]);
    assert_eq!(errors.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn bad_status_is_retried_until_the_limit() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("GET", "/down")
        .with_status(503)
        .expect(3)
        .create_async()
        .await;

    let messages: Arc<Mutex<Vec<String>>> = Arc::default();
    let seen = messages.clone();
    let url = format!("{}/down", server.url()).parse().unwrap();
    let stream = create_sse_client(
        SseRequest::new(url),
        SseOptions::default()
            .default_retry_delay(Duration::from_millis(5))
            .max_retry_attempts(3)
            .on_error(move |error| seen.lock().push(error.to_string())),
    );

    assert_eq!(stream.count().await, 0);
    mock.assert_async().await;
    let messages = messages.lock();
    assert_eq!(messages.len(), 3);
    assert!(messages[0].contains("SSE failed: 503"));
}

#[tokio::test(start_paused = true)]
async fn backoff_doubles_up_to_the_cap() {
    let transport = Arc::new(FlakyTransport::default());
    let request = SseRequest::new("http://ocxp.invalid/events".parse().unwrap())
        .transport(transport.clone());
    let stream = create_sse_client(request, SseOptions::default().max_retry_attempts(6));

    assert_eq!(stream.count().await, 0);

    let calls = transport.calls.lock();
    let delays: Vec<u128> = calls
        .windows(2)
        .map(|pair| (pair[1] - pair[0]).as_millis())
        .collect();
    assert_eq!(delays, vec![3000, 6000, 12000, 24000, 30000]);
}

#[tokio::test(start_paused = true)]
async fn cancellation_stops_a_pending_backoff() {
    let transport = Arc::new(FlakyTransport::default());
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    let request = SseRequest::new("http://ocxp.invalid/events".parse().unwrap())
        .transport(transport.clone());
    let mut stream = create_sse_client(
        request,
        SseOptions::default()
            .cancel_token(cancel)
            .on_error(move |_| trigger.cancel()),
    );

    let started = Instant::now();
    assert_eq!(stream.next().await, None);
    assert_eq!(transport.calls.lock().len(), 1);
    assert!(started.elapsed() < Duration::from_millis(3000));
}
