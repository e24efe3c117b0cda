//! Server-Sent Events client with automatic reconnection.
//!
//! [`create_sse_client`] returns a pull-based [`SseStream`]. Each poll drives
//! the connection forward: opening the request, reading and framing the body,
//! and on failure reporting the error, backing off and reconnecting with the
//! last seen event ID. The stream itself never yields an error; it simply ends
//! when the server closes it, when the retry limit is reached, or when the
//! cancellation token fires.

use crate::client::response::{byte_stream, ByteStream};
use crate::client::transport::HttpTransport;
use crate::client::validation::{ResponseTransformer, ResponseValidator};
use crate::error::{Error, Result, TransportError};
use crate::shared::http_constants::LAST_EVENT_ID;
use crate::shared::sse_parser::{SseFrame, SseParser};
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{self, BoxStream, Stream, StreamExt};
use pin_project::pin_project;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::Method;
use serde_json::Value;
use std::collections::VecDeque;
use std::fmt;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

/// Initial reconnection delay.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_millis(3000);

/// Upper bound on the reconnection delay.
pub const DEFAULT_MAX_RETRY_DELAY: Duration = Duration::from_millis(30000);

/// Backoff before reconnection attempt `attempt + 1`:
/// `min(retry_delay * 2^(attempt - 1), max_retry_delay)`.
///
/// # Examples
///
/// ```rust
/// use ocxp_client::shared::sse::retry_backoff;
/// use std::time::Duration;
///
/// let base = Duration::from_secs(3);
/// let max = Duration::from_secs(30);
/// assert_eq!(retry_backoff(base, 1, max), Duration::from_secs(3));
/// assert_eq!(retry_backoff(base, 3, max), Duration::from_secs(12));
/// assert_eq!(retry_backoff(base, 5, max), Duration::from_secs(30));
/// ```
pub fn retry_backoff(retry_delay: Duration, attempt: u32, max_retry_delay: Duration) -> Duration {
    let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
    retry_delay.saturating_mul(factor).min(max_retry_delay)
}

/// Data of one event: parsed JSON when the payload parses, raw text otherwise.
#[derive(Debug, Clone, PartialEq)]
pub enum SseData {
    /// Payload parsed as JSON (after validation and transformation)
    Json(Value),
    /// Payload that is not valid JSON
    Text(String),
}

impl SseData {
    /// JSON value, if the payload parsed.
    pub fn as_json(&self) -> Option<&Value> {
        match self {
            Self::Json(value) => Some(value),
            Self::Text(_) => None,
        }
    }

    /// Raw text, if the payload did not parse.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Json(_) => None,
            Self::Text(text) => Some(text),
        }
    }
}

/// Payload of the event callback, fired once per framed chunk.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamEvent {
    /// Event data, if the chunk had any `data:` line
    pub data: Option<SseData>,
    /// `event:` field of the chunk
    pub event: Option<String>,
    /// Last event ID seen on the stream
    pub id: Option<String>,
    /// Current reconnection delay
    pub retry: Duration,
}

/// Callback fired for every framed chunk.
pub type EventCallback = dyn Fn(&StreamEvent) + Send + Sync;

/// Callback fired for every connection or stream failure.
pub type ErrorCallback = dyn Fn(&Error) + Send + Sync;

/// Hook applied to the request before each connection attempt.
#[async_trait]
pub trait SseRequestHook: Send + Sync {
    /// Inspect or replace the outgoing request.
    async fn prepare(&self, request: reqwest::Request) -> Result<reqwest::Request>;
}

/// The request an event stream is opened with.
#[derive(Debug, Clone)]
pub struct SseRequest {
    /// HTTP method
    pub method: Method,
    /// Stream URL
    pub url: Url,
    /// Request headers
    pub headers: HeaderMap,
    /// Serialized request body
    pub body: Option<String>,
    /// HTTP transport
    pub transport: Arc<dyn HttpTransport>,
}

impl SseRequest {
    /// GET request to `url` over a default `reqwest` client.
    pub fn new(url: Url) -> Self {
        Self {
            method: Method::GET,
            url,
            headers: HeaderMap::new(),
            body: None,
            transport: Arc::new(reqwest::Client::new()),
        }
    }

    /// Set the HTTP method.
    pub fn method(mut self, method: Method) -> Self {
        self.method = method;
        self
    }

    /// Set one header.
    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Set the request body.
    pub fn body(mut self, body: impl Into<String>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Set the HTTP transport.
    pub fn transport(mut self, transport: Arc<dyn HttpTransport>) -> Self {
        self.transport = transport;
        self
    }
}

/// Reconnection and callback settings of an event stream.
#[derive(Clone)]
pub struct SseOptions {
    /// Initial reconnection delay; replaced by the server's `retry:` field
    pub default_retry_delay: Duration,
    /// Upper bound on the reconnection delay
    pub max_retry_delay: Duration,
    /// Stop after this many failed attempts; unlimited when `None`
    pub max_retry_attempts: Option<u32>,
    /// Cancels the stream and any pending read or backoff
    pub cancel: CancellationToken,
    /// Fired for every framed chunk
    pub on_event: Option<Arc<EventCallback>>,
    /// Fired for every failure
    pub on_error: Option<Arc<ErrorCallback>>,
    /// Applied to the request before each attempt
    pub on_request: Option<Arc<dyn SseRequestHook>>,
    /// Runs on parsed JSON payloads
    pub response_validator: Option<Arc<dyn ResponseValidator>>,
    /// Runs on parsed JSON payloads after validation
    pub response_transformer: Option<Arc<dyn ResponseTransformer>>,
}

impl Default for SseOptions {
    fn default() -> Self {
        Self {
            default_retry_delay: DEFAULT_RETRY_DELAY,
            max_retry_delay: DEFAULT_MAX_RETRY_DELAY,
            max_retry_attempts: None,
            cancel: CancellationToken::new(),
            on_event: None,
            on_error: None,
            on_request: None,
            response_validator: None,
            response_transformer: None,
        }
    }
}

impl SseOptions {
    /// Set the initial reconnection delay.
    pub fn default_retry_delay(mut self, delay: Duration) -> Self {
        self.default_retry_delay = delay;
        self
    }

    /// Set the maximum reconnection delay.
    pub fn max_retry_delay(mut self, delay: Duration) -> Self {
        self.max_retry_delay = delay;
        self
    }

    /// Limit the number of attempts.
    pub fn max_retry_attempts(mut self, attempts: u32) -> Self {
        self.max_retry_attempts = Some(attempts);
        self
    }

    /// Use an external cancellation token.
    pub fn cancel_token(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Set the event callback.
    pub fn on_event<F>(mut self, f: F) -> Self
    where
        F: Fn(&StreamEvent) + Send + Sync + 'static,
    {
        self.on_event = Some(Arc::new(f));
        self
    }

    /// Set the error callback.
    pub fn on_error<F>(mut self, f: F) -> Self
    where
        F: Fn(&Error) + Send + Sync + 'static,
    {
        self.on_error = Some(Arc::new(f));
        self
    }

    /// Set the request hook.
    pub fn on_request(mut self, hook: Arc<dyn SseRequestHook>) -> Self {
        self.on_request = Some(hook);
        self
    }

    /// Set the payload validator.
    pub fn response_validator(mut self, validator: Arc<dyn ResponseValidator>) -> Self {
        self.response_validator = Some(validator);
        self
    }

    /// Set the payload transformer.
    pub fn response_transformer(mut self, transformer: Arc<dyn ResponseTransformer>) -> Self {
        self.response_transformer = Some(transformer);
        self
    }
}

impl fmt::Debug for SseOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SseOptions")
            .field("default_retry_delay", &self.default_retry_delay)
            .field("max_retry_delay", &self.max_retry_delay)
            .field("max_retry_attempts", &self.max_retry_attempts)
            .field("cancelled", &self.cancel.is_cancelled())
            .field("on_event", &self.on_event.is_some())
            .field("on_error", &self.on_error.is_some())
            .field("on_request", &self.on_request.is_some())
            .finish_non_exhaustive()
    }
}

/// Stream of event payloads.
#[pin_project]
pub struct SseStream {
    #[pin]
    inner: BoxStream<'static, SseData>,
    cancel: CancellationToken,
}

impl SseStream {
    /// Stop the stream; any pending read or backoff is abandoned.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }
}

impl Stream for SseStream {
    type Item = SseData;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<SseData>> {
        self.project().inner.poll_next(cx)
    }
}

impl fmt::Debug for SseStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SseStream")
            .field("cancelled", &self.cancel.is_cancelled())
            .finish_non_exhaustive()
    }
}

/// Open an event stream.
///
/// Nothing is sent until the stream is first polled.
pub fn create_sse_client(request: SseRequest, options: SseOptions) -> SseStream {
    let cancel = options.cancel.clone();
    let state = SseState::new(request, options);
    let inner = stream::unfold(state, |mut state| async move {
        state.next_item().await.map(|item| (item, state))
    });
    SseStream {
        inner: inner.boxed(),
        cancel,
    }
}

/// Decode UTF-8 across chunk boundaries, carrying an incomplete trailing
/// sequence over to the next chunk.
fn decode_utf8(carry: &mut Vec<u8>, chunk: &[u8]) -> String {
    carry.extend_from_slice(chunk);
    match std::str::from_utf8(carry) {
        Ok(text) => {
            let text = text.to_string();
            carry.clear();
            text
        },
        Err(e) if e.error_len().is_none() => {
            let valid = e.valid_up_to();
            let text = String::from_utf8_lossy(&carry[..valid]).into_owned();
            carry.drain(..valid);
            text
        },
        Err(_) => {
            let text = String::from_utf8_lossy(carry).into_owned();
            carry.clear();
            text
        },
    }
}

async fn open(
    request: &SseRequest,
    options: &SseOptions,
    last_event_id: Option<&str>,
    attempt: u32,
) -> Result<ByteStream> {
    let mut outgoing = reqwest::Request::new(request.method.clone(), request.url.clone());
    *outgoing.headers_mut() = request.headers.clone();
    if let Some(id) = last_event_id {
        let value = HeaderValue::from_str(id)
            .map_err(|e| Error::stream(format!("Invalid event id '{}': {}", id, e)))?;
        outgoing
            .headers_mut()
            .insert(HeaderName::from_static(LAST_EVENT_ID), value);
    }
    if let Some(body) = &request.body {
        *outgoing.body_mut() = Some(body.clone().into());
    }
    if let Some(hook) = &options.on_request {
        outgoing = hook.prepare(outgoing).await?;
    }

    debug!("Opening SSE stream {} (attempt {})", outgoing.url(), attempt);
    let response = request.transport.execute(outgoing).await?;
    let status = response.status();
    if !status.is_success() {
        return Err(Error::stream(format!(
            "SSE failed: {} {}",
            status.as_u16(),
            status.canonical_reason().unwrap_or("")
        )));
    }

    Ok(byte_stream(response))
}

async fn decode_payload(options: &SseOptions, text: String) -> Result<SseData> {
    let Ok(mut value) = serde_json::from_str::<Value>(&text) else {
        return Ok(SseData::Text(text));
    };
    if let Some(validator) = &options.response_validator {
        validator.validate_response(&value).await?;
    }
    if let Some(transformer) = &options.response_transformer {
        value = transformer.transform_response(value).await?;
    }
    Ok(SseData::Json(value))
}

enum Read {
    Cancelled,
    Chunk(Option<std::result::Result<Bytes, TransportError>>),
}

struct SseState {
    request: SseRequest,
    options: SseOptions,
    parser: SseParser,
    carry: Vec<u8>,
    body: Option<ByteStream>,
    pending: VecDeque<SseData>,
    failure: Option<Error>,
    last_event_id: Option<String>,
    retry_delay: Duration,
    attempt: u32,
    finished: bool,
}

impl SseState {
    fn new(request: SseRequest, options: SseOptions) -> Self {
        let retry_delay = options.default_retry_delay;
        Self {
            request,
            options,
            parser: SseParser::new(),
            carry: Vec::new(),
            body: None,
            pending: VecDeque::new(),
            failure: None,
            last_event_id: None,
            retry_delay,
            attempt: 0,
            finished: false,
        }
    }

    async fn next_item(&mut self) -> Option<SseData> {
        let cancel = self.options.cancel.clone();

        loop {
            if let Some(item) = self.pending.pop_front() {
                return Some(item);
            }
            if self.finished {
                return None;
            }
            if cancel.is_cancelled() {
                debug!("SSE stream cancelled");
                self.body = None;
                self.finished = true;
                continue;
            }
            if let Some(error) = self.failure.take() {
                self.retry_after(error).await;
                continue;
            }

            if self.body.is_none() {
                self.attempt += 1;
                let opened = tokio::select! {
                    biased;
                    () = cancel.cancelled() => None,
                    result = open(
                        &self.request,
                        &self.options,
                        self.last_event_id.as_deref(),
                        self.attempt,
                    ) => Some(result),
                };
                match opened {
                    None => {},
                    Some(Ok(body)) => {
                        info!("SSE stream connected to {}", self.request.url);
                        self.parser.reset();
                        self.carry.clear();
                        self.body = Some(body);
                    },
                    Some(Err(error)) => self.failure = Some(error),
                }
                continue;
            }

            let Some(body) = self.body.as_mut() else {
                continue;
            };
            let read = tokio::select! {
                biased;
                () = cancel.cancelled() => Read::Cancelled,
                chunk = body.next() => Read::Chunk(chunk),
            };

            match read {
                Read::Cancelled => {},
                Read::Chunk(None) => {
                    debug!("SSE stream closed by server");
                    self.body = None;
                    self.finished = true;
                },
                Read::Chunk(Some(Err(e))) => {
                    self.body = None;
                    self.failure = Some(Error::from(e));
                },
                Read::Chunk(Some(Ok(bytes))) => {
                    let text = decode_utf8(&mut self.carry, &bytes);
                    for frame in self.parser.feed(&text) {
                        if let Err(error) = self.handle_frame(frame).await {
                            self.body = None;
                            self.failure = Some(error);
                            break;
                        }
                    }
                },
            }
        }
    }

    async fn handle_frame(&mut self, frame: SseFrame) -> Result<()> {
        let text = frame.data_text();
        if let Some(id) = frame.id {
            self.last_event_id = Some(id);
        }
        if let Some(retry) = frame.retry {
            self.retry_delay = Duration::from_millis(retry);
        }

        let data = match text {
            Some(text) => Some(decode_payload(&self.options, text).await?),
            None => None,
        };

        let event = StreamEvent {
            data: data.clone(),
            event: frame.event,
            id: self.last_event_id.clone(),
            retry: self.retry_delay,
        };
        if let Some(on_event) = &self.options.on_event {
            on_event(&event);
        }
        if let Some(data) = data {
            self.pending.push_back(data);
        }
        Ok(())
    }

    async fn retry_after(&mut self, error: Error) {
        warn!("SSE attempt {} failed: {}", self.attempt, error);
        if let Some(on_error) = &self.options.on_error {
            on_error(&error);
        }

        if self
            .options
            .max_retry_attempts
            .is_some_and(|max| self.attempt >= max)
        {
            info!("SSE retry limit reached after {} attempts", self.attempt);
            self.finished = true;
            return;
        }

        let backoff = retry_backoff(self.retry_delay, self.attempt, self.options.max_retry_delay);
        debug!("Reconnecting SSE stream in {:?}", backoff);
        let cancel = self.options.cancel.clone();
        tokio::select! {
            () = tokio::time::sleep(backoff) => {},
            () = cancel.cancelled() => self.finished = true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_and_caps() {
        let base = DEFAULT_RETRY_DELAY;
        let delays: Vec<u64> = (1..=6)
            .map(|attempt| retry_backoff(base, attempt, DEFAULT_MAX_RETRY_DELAY).as_millis() as u64)
            .collect();
        assert_eq!(delays, vec![3000, 6000, 12000, 24000, 30000, 30000]);
        assert_eq!(
            retry_backoff(base, u32::MAX, DEFAULT_MAX_RETRY_DELAY),
            DEFAULT_MAX_RETRY_DELAY
        );
    }

    #[test]
    fn utf8_sequences_split_across_chunks() {
        let mut carry = Vec::new();
        let bytes = "héllo".as_bytes();
        assert_eq!(decode_utf8(&mut carry, &bytes[..2]), "h");
        assert_eq!(carry.len(), 1);
        assert_eq!(decode_utf8(&mut carry, &bytes[2..]), "éllo");
        assert!(carry.is_empty());
    }

    #[test]
    fn invalid_utf8_is_replaced() {
        let mut carry = Vec::new();
        assert_eq!(decode_utf8(&mut carry, b"a\xffb"), "a\u{fffd}b");
        assert!(carry.is_empty());
    }

    #[test]
    fn sse_data_accessors() {
        let json = SseData::Json(serde_json::json!({"a": 1}));
        assert_eq!(json.as_json().unwrap()["a"], 1);
        assert_eq!(SseData::Text("x".into()).as_text(), Some("x"));
    }
}
