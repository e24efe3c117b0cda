//! WebSocket service with automatic reconnection.
//!
//! [`WebSocketService`] owns one logical connection. Every physical
//! connection runs in its own task and is tagged with an epoch; callbacks
//! from a connection that has since been replaced or torn down are ignored.
//! Unexpected closes are retried with exponential backoff until the attempt
//! limit is reached. Only [`WebSocketService::disconnect`] stops reconnection
//! for good.

use crate::client::auth::{AuthProvider, SecurityScheme};
use crate::error::{Error, Result, TransportError};
use crate::shared::http_constants::{CLOSE_ABNORMAL, CLOSE_NORMAL};
use crate::types::{ClientMessage, ServerMessage};
use async_trait::async_trait;
use futures::{Sink, SinkExt, Stream, StreamExt};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::pin::Pin;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use url::Url;

/// Handler key receiving every message regardless of type.
pub const WILDCARD: &str = "*";

/// WebSocket service configuration.
#[derive(Debug, Clone)]
pub struct WebSocketConfig {
    /// Endpoint URL, without the connection query parameters
    pub url: Url,
    /// Workspace sent as the `workspace` query parameter
    pub workspace: String,
    /// Optional `user_id` query parameter
    pub user_id: Option<String>,
    /// Token source for the optional `token` query parameter
    pub token: Option<Arc<dyn AuthProvider>>,
    /// Time allowed for the socket to open
    pub connect_timeout: Duration,
    /// Base reconnection delay (doubles on each attempt)
    pub reconnect_delay: Duration,
    /// Reconnection attempts before giving up
    pub max_reconnect_attempts: u32,
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        Self {
            url: "ws://localhost:8080".parse().expect("Valid default URL"),
            workspace: "default".to_string(),
            user_id: None,
            token: None,
            connect_timeout: Duration::from_secs(10),
            reconnect_delay: Duration::from_secs(1),
            max_reconnect_attempts: 5,
        }
    }
}

impl WebSocketConfig {
    /// Configuration for `url` and `workspace` with default timings.
    pub fn new(url: Url, workspace: impl Into<String>) -> Self {
        Self {
            url,
            workspace: workspace.into(),
            ..Default::default()
        }
    }

    /// URL of a connection attempt, with `workspace`, `user_id` and `token`
    /// query parameters.
    pub async fn connection_url(&self) -> Result<Url> {
        let token = match &self.token {
            Some(provider) => {
                provider
                    .get_access_token(&SecurityScheme::api_key_query("token"))
                    .await?
            },
            None => None,
        };

        let mut url = self.url.clone();
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("workspace", &self.workspace);
            if let Some(user_id) = &self.user_id {
                query.append_pair("user_id", user_id);
            }
            if let Some(token) = token.as_deref().filter(|t| !t.is_empty()) {
                query.append_pair("token", token);
            }
        }
        Ok(url)
    }

    /// Delay before reconnection attempt `attempts + 1`.
    pub fn reconnect_backoff(&self, attempts: u32) -> Duration {
        self.reconnect_delay
            .saturating_mul(2u32.saturating_pow(attempts))
    }
}

/// Connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// No connection and none pending
    Disconnected,
    /// Socket is opening
    Connecting,
    /// Socket is open
    Connected,
    /// Waiting to retry after an unexpected close
    Reconnecting,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Reconnecting => "reconnecting",
        })
    }
}

/// Frame received from a socket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WsInbound {
    /// Text frame
    Text(String),
    /// Close frame with its code
    Close(u16),
}

/// Frame sent to a socket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WsOutbound {
    /// Text frame
    Text(String),
    /// Close frame with its code
    Close(u16),
}

/// Outbound half of a socket.
pub type WsSink = Pin<Box<dyn Sink<WsOutbound, Error = TransportError> + Send>>;

/// Inbound half of a socket.
pub type WsSource =
    Pin<Box<dyn Stream<Item = std::result::Result<WsInbound, TransportError>> + Send>>;

/// An open socket.
pub struct WsConnection {
    /// Outbound frames
    pub sink: WsSink,
    /// Inbound frames; ending without a close frame counts as an abnormal close
    pub stream: WsSource,
}

impl fmt::Debug for WsConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WsConnection").finish_non_exhaustive()
    }
}

/// Opens sockets.
#[async_trait]
pub trait WsConnector: Send + Sync + fmt::Debug {
    /// Open a socket to `url`.
    async fn connect(&self, url: &Url) -> Result<WsConnection>;
}

/// Connector built on `tokio-tungstenite`.
#[cfg(feature = "websocket")]
#[derive(Debug, Clone, Copy, Default)]
pub struct TungsteniteConnector;

#[cfg(feature = "websocket")]
#[async_trait]
impl WsConnector for TungsteniteConnector {
    async fn connect(&self, url: &Url) -> Result<WsConnection> {
        use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
        use tokio_tungstenite::tungstenite::protocol::CloseFrame;
        use tokio_tungstenite::tungstenite::Message;

        // RFC 6455 code for a close frame without a status code
        const CLOSE_NO_STATUS: u16 = 1005;

        let (socket, _) = tokio_tungstenite::connect_async(url.as_str())
            .await
            .map_err(TransportError::from)?;
        let (sink, stream) = socket.split();

        let sink = sink
            .sink_map_err(TransportError::from)
            .with(|frame: WsOutbound| {
                futures::future::ready(Ok::<_, TransportError>(match frame {
                    WsOutbound::Text(text) => Message::Text(text.into()),
                    WsOutbound::Close(code) => Message::Close(Some(CloseFrame {
                        code: CloseCode::from(code),
                        reason: String::new().into(),
                    })),
                }))
            });

        let stream = stream.filter_map(|message| {
            futures::future::ready(match message {
                Ok(Message::Text(text)) => Some(Ok(WsInbound::Text(text.as_str().to_owned()))),
                Ok(Message::Close(frame)) => Some(Ok(WsInbound::Close(
                    frame.map_or(CLOSE_NO_STATUS, |f| u16::from(f.code)),
                ))),
                Ok(_) => None,
                Err(e) => Some(Err(TransportError::from(e))),
            })
        });

        Ok(WsConnection {
            sink: Box::pin(sink),
            stream: Box::pin(stream),
        })
    }
}

/// Message handler.
pub type MessageHandler = dyn Fn(&ServerMessage) + Send + Sync;

/// State-change handler.
pub type StateHandler = dyn Fn(ConnectionState) + Send + Sync;

struct StateNotice {
    handlers: Vec<Arc<StateHandler>>,
    state: ConnectionState,
}

impl StateNotice {
    fn fire(self) {
        for handler in self.handlers {
            handler(self.state);
        }
    }
}

struct Inner {
    state: ConnectionState,
    should_reconnect: bool,
    attempts: u32,
    epoch: u64,
    outbound: Option<mpsc::UnboundedSender<WsOutbound>>,
    waiters: Vec<oneshot::Sender<Result<()>>>,
    connection_task: Option<JoinHandle<()>>,
    reconnect_timer: Option<JoinHandle<()>>,
    handlers: HashMap<String, Vec<Arc<MessageHandler>>>,
    state_handlers: Vec<Arc<StateHandler>>,
}

impl Inner {
    fn set_state(&mut self, state: ConnectionState) -> Option<StateNotice> {
        if self.state == state {
            return None;
        }
        debug!("WebSocket state {} -> {}", self.state, state);
        self.state = state;
        Some(StateNotice {
            handlers: self.state_handlers.clone(),
            state,
        })
    }

    fn reject_waiters(&mut self, error: Error) {
        let mut waiters = std::mem::take(&mut self.waiters).into_iter();
        let message = error.to_string();
        if let Some(first) = waiters.next() {
            let _ = first.send(Err(error));
        }
        for waiter in waiters {
            let _ = waiter.send(Err(Error::connection(message.clone())));
        }
    }
}

struct Shared {
    config: WebSocketConfig,
    connector: Arc<dyn WsConnector>,
    inner: Mutex<Inner>,
}

impl Shared {
    /// Start a connection attempt. Caller holds the lock.
    fn start_attempt(self: &Arc<Self>, inner: &mut Inner) -> Option<StateNotice> {
        if let Some(timer) = inner.reconnect_timer.take() {
            timer.abort();
        }
        inner.epoch += 1;
        let epoch = inner.epoch;
        let shared = Arc::clone(self);
        inner.connection_task = Some(tokio::spawn(async move {
            shared.run_connection(epoch).await;
        }));
        inner.set_state(ConnectionState::Connecting)
    }

    async fn run_connection(self: Arc<Self>, epoch: u64) {
        info!("Connecting to WebSocket at {}", self.config.url);

        let opened = match self.config.connection_url().await {
            Ok(url) => tokio::time::timeout(self.config.connect_timeout, self.connector.connect(&url))
                .await
                .unwrap_or_else(|_| {
                    Err(Error::ConnectionTimeout(
                        self.config.connect_timeout.as_millis() as u64,
                    ))
                }),
            Err(e) => Err(e),
        };
        let WsConnection {
            mut sink,
            mut stream,
        } = match opened {
            Ok(connection) => connection,
            Err(error) => {
                warn!("WebSocket connection failed: {}", error);
                self.on_connect_failed(epoch, error);
                return;
            },
        };

        let (tx, mut rx) = mpsc::unbounded_channel();
        if !self.on_open(epoch, tx) {
            let _ = sink.send(WsOutbound::Close(CLOSE_NORMAL)).await;
            return;
        }

        let code = loop {
            tokio::select! {
                outbound = rx.recv() => match outbound {
                    Some(frame) => {
                        let closing = matches!(frame, WsOutbound::Close(_));
                        if let Err(e) = sink.send(frame).await {
                            warn!("WebSocket send failed: {}", e);
                            break CLOSE_ABNORMAL;
                        }
                        if closing {
                            break CLOSE_NORMAL;
                        }
                    },
                    None => break CLOSE_NORMAL,
                },
                inbound = stream.next() => match inbound {
                    Some(Ok(WsInbound::Text(text))) => self.dispatch(epoch, &text),
                    Some(Ok(WsInbound::Close(code))) => break code,
                    Some(Err(e)) => {
                        warn!("WebSocket error: {}", e);
                        break CLOSE_ABNORMAL;
                    },
                    None => break CLOSE_ABNORMAL,
                },
            }
        };

        self.on_close(epoch, code);
    }

    fn on_open(self: &Arc<Self>, epoch: u64, outbound: mpsc::UnboundedSender<WsOutbound>) -> bool {
        let notice = {
            let mut inner = self.inner.lock();
            if inner.epoch != epoch {
                return false;
            }
            info!("WebSocket connected to {}", self.config.url);
            inner.attempts = 0;
            inner.outbound = Some(outbound);
            for waiter in std::mem::take(&mut inner.waiters) {
                let _ = waiter.send(Ok(()));
            }
            inner.set_state(ConnectionState::Connected)
        };
        if let Some(notice) = notice {
            notice.fire();
        }
        true
    }

    fn on_connect_failed(self: &Arc<Self>, epoch: u64, error: Error) {
        let notice = {
            let mut inner = self.inner.lock();
            if inner.epoch != epoch {
                return;
            }
            inner.reject_waiters(error);
            self.handle_close(&mut inner, CLOSE_ABNORMAL)
        };
        if let Some(notice) = notice {
            notice.fire();
        }
    }

    fn on_close(self: &Arc<Self>, epoch: u64, code: u16) {
        let notice = {
            let mut inner = self.inner.lock();
            if inner.epoch != epoch {
                return;
            }
            info!("WebSocket closed with code {}", code);
            inner.outbound = None;
            inner.reject_waiters(Error::connection(format!(
                "Connection closed with code {}",
                code
            )));
            self.handle_close(&mut inner, code)
        };
        if let Some(notice) = notice {
            notice.fire();
        }
    }

    /// Reconnect-or-settle after a close. Caller holds the lock.
    fn handle_close(self: &Arc<Self>, inner: &mut Inner, code: u16) -> Option<StateNotice> {
        inner.connection_task = None;

        if !inner.should_reconnect || code == CLOSE_NORMAL {
            return inner.set_state(ConnectionState::Disconnected);
        }
        if inner.attempts >= self.config.max_reconnect_attempts {
            warn!(
                "WebSocket reconnection abandoned after {} attempts",
                inner.attempts
            );
            return inner.set_state(ConnectionState::Disconnected);
        }

        let delay = self.config.reconnect_backoff(inner.attempts);
        inner.attempts += 1;
        warn!(
            "WebSocket reconnecting in {:?} (attempt {}/{})",
            delay, inner.attempts, self.config.max_reconnect_attempts
        );

        let shared = Arc::clone(self);
        inner.reconnect_timer = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            shared.on_reconnect_timer();
        }));
        inner.set_state(ConnectionState::Reconnecting)
    }

    fn on_reconnect_timer(self: &Arc<Self>) {
        let notice = {
            let mut inner = self.inner.lock();
            // The timer's own handle; dropping it does not abort the task.
            inner.reconnect_timer = None;
            if !inner.should_reconnect || inner.state != ConnectionState::Reconnecting {
                return;
            }
            self.start_attempt(&mut inner)
        };
        if let Some(notice) = notice {
            notice.fire();
        }
    }

    /// Stop reconnecting, close the socket with a normal closure and settle
    /// into `Disconnected`.
    fn shutdown(&self) {
        let notice = {
            let mut inner = self.inner.lock();
            inner.should_reconnect = false;
            inner.attempts = 0;
            inner.epoch += 1;
            if let Some(timer) = inner.reconnect_timer.take() {
                timer.abort();
            }
            let task = inner.connection_task.take();
            match inner.outbound.take() {
                Some(outbound) => {
                    let _ = outbound.send(WsOutbound::Close(CLOSE_NORMAL));
                },
                None => {
                    if let Some(task) = task {
                        task.abort();
                    }
                },
            }
            inner.reject_waiters(Error::connection("Disconnected"));
            inner.set_state(ConnectionState::Disconnected)
        };
        if let Some(notice) = notice {
            info!("WebSocket disconnected");
            notice.fire();
        }
    }

    fn dispatch(&self, epoch: u64, text: &str) {
        let Ok(value) = serde_json::from_str::<Value>(text) else {
            debug!("Dropping unparseable WebSocket frame");
            return;
        };
        let Some(message) = ServerMessage::from_value(value) else {
            debug!("Dropping WebSocket frame without a type");
            return;
        };

        let handlers: Vec<Arc<MessageHandler>> = {
            let inner = self.inner.lock();
            if inner.epoch != epoch {
                return;
            }
            [message.kind(), WILDCARD]
                .iter()
                .filter_map(|key| inner.handlers.get(*key))
                .flatten()
                .cloned()
                .collect()
        };
        for handler in handlers {
            handler(&message);
        }
    }
}

enum SubscriptionTarget {
    Message {
        kind: String,
        handler: Arc<MessageHandler>,
    },
    State(Arc<StateHandler>),
}

/// Handle returned by [`WebSocketService::on`] and
/// [`WebSocketService::on_state_change`].
pub struct Subscription {
    shared: Weak<Shared>,
    target: SubscriptionTarget,
}

impl Subscription {
    /// Remove the handler. Removing twice is harmless.
    pub fn unsubscribe(&self) {
        let Some(shared) = self.shared.upgrade() else {
            return;
        };
        let mut inner = shared.inner.lock();
        match &self.target {
            SubscriptionTarget::Message { kind, handler } => {
                if let Some(handlers) = inner.handlers.get_mut(kind) {
                    handlers.retain(|h| !Arc::ptr_eq(h, handler));
                    if handlers.is_empty() {
                        inner.handlers.remove(kind);
                    }
                }
            },
            SubscriptionTarget::State(handler) => {
                inner.state_handlers.retain(|h| !Arc::ptr_eq(h, handler));
            },
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let target = match &self.target {
            SubscriptionTarget::Message { kind, .. } => kind.as_str(),
            SubscriptionTarget::State(_) => "<state>",
        };
        f.debug_struct("Subscription")
            .field("target", &target)
            .finish_non_exhaustive()
    }
}

/// Shuts the connection down once the last service handle is dropped.
///
/// The connection and reconnect tasks hold their own references to the
/// shared state, so it cannot do this itself.
struct ServiceGuard {
    shared: Arc<Shared>,
}

impl Drop for ServiceGuard {
    fn drop(&mut self) {
        self.shared.shutdown();
    }
}

/// Reconnecting WebSocket client.
///
/// Cloning is cheap; clones share the same connection. Dropping the last
/// clone disconnects.
///
/// # Examples
///
/// ```rust,no_run
/// use ocxp_client::shared::websocket::{WebSocketConfig, WebSocketService};
/// use ocxp_client::types::ServerMessage;
///
/// # async fn example() -> ocxp_client::Result<()> {
/// let config = WebSocketConfig::new("wss://ocxp.example.com/ws".parse().unwrap(), "acme");
/// let service = WebSocketService::new(config);
///
/// let subscription = service.on("stream_chunk", |message: &ServerMessage| {
///     println!("chunk: {:?}", message);
/// });
/// service.connect().await?;
/// service.subscribe(Some("mission"), Some("m-1"), None)?;
///
/// subscription.unsubscribe();
/// service.disconnect();
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct WebSocketService {
    shared: Arc<Shared>,
    _guard: Arc<ServiceGuard>,
}

impl WebSocketService {
    /// Create a service using the `tokio-tungstenite` connector.
    #[cfg(feature = "websocket")]
    pub fn new(config: WebSocketConfig) -> Self {
        Self::with_connector(config, Arc::new(TungsteniteConnector))
    }

    /// Create a service with a custom connector.
    pub fn with_connector(config: WebSocketConfig, connector: Arc<dyn WsConnector>) -> Self {
        let shared = Arc::new(Shared {
            config,
            connector,
            inner: Mutex::new(Inner {
                state: ConnectionState::Disconnected,
                should_reconnect: false,
                attempts: 0,
                epoch: 0,
                outbound: None,
                waiters: Vec::new(),
                connection_task: None,
                reconnect_timer: None,
                handlers: HashMap::new(),
                state_handlers: Vec::new(),
            }),
        });
        Self {
            _guard: Arc::new(ServiceGuard {
                shared: Arc::clone(&shared),
            }),
            shared,
        }
    }

    /// Service configuration.
    pub fn config(&self) -> &WebSocketConfig {
        &self.shared.config
    }

    /// Open the connection.
    ///
    /// Resolves immediately when already connected and joins the pending
    /// attempt when one is in flight. Fails if the socket cannot be opened
    /// within the connect timeout; automatic reconnection still proceeds in
    /// the background in that case.
    pub async fn connect(&self) -> Result<()> {
        let (receiver, notice) = {
            let mut inner = self.shared.inner.lock();
            if inner.state == ConnectionState::Connected {
                return Ok(());
            }
            inner.should_reconnect = true;
            let (sender, receiver) = oneshot::channel();
            inner.waiters.push(sender);
            let notice = if inner.state == ConnectionState::Connecting {
                None
            } else {
                self.shared.start_attempt(&mut inner)
            };
            (receiver, notice)
        };
        if let Some(notice) = notice {
            notice.fire();
        }

        receiver
            .await
            .map_err(|_| Error::connection("Connection attempt abandoned"))?
    }

    /// Close the connection and stop reconnecting.
    pub fn disconnect(&self) {
        self.shared.shutdown();
    }

    /// Send a JSON message.
    ///
    /// Returns `Ok(false)` without sending when the socket is not open;
    /// nothing is queued.
    pub fn send<T: Serialize + ?Sized>(&self, message: &T) -> Result<bool> {
        let text = serde_json::to_string(message)?;
        let inner = self.shared.inner.lock();
        match (&inner.outbound, inner.state) {
            (Some(outbound), ConnectionState::Connected) => {
                Ok(outbound.send(WsOutbound::Text(text)).is_ok())
            },
            _ => {
                warn!("WebSocket not connected, dropping message");
                Ok(false)
            },
        }
    }

    /// Subscribe to a resource or topic.
    pub fn subscribe(
        &self,
        kind: Option<&str>,
        id: Option<&str>,
        topic: Option<&str>,
    ) -> Result<bool> {
        self.send(&ClientMessage::Subscribe {
            kind: kind.map(str::to_owned),
            id: id.map(str::to_owned),
            topic: topic.map(str::to_owned),
        })
    }

    /// Send a keepalive ping.
    pub fn ping(&self) -> Result<bool> {
        self.send(&ClientMessage::Ping)
    }

    /// Register a handler for messages of `kind`, or every message with
    /// [`WILDCARD`].
    pub fn on<F>(&self, kind: &str, handler: F) -> Subscription
    where
        F: Fn(&ServerMessage) + Send + Sync + 'static,
    {
        self.on_handler(kind, Arc::new(handler))
    }

    /// Register a shared handler. Registering the same `Arc` twice for one
    /// kind keeps a single entry.
    pub fn on_handler(&self, kind: &str, handler: Arc<MessageHandler>) -> Subscription {
        {
            let mut inner = self.shared.inner.lock();
            let handlers = inner.handlers.entry(kind.to_string()).or_default();
            if !handlers.iter().any(|h| Arc::ptr_eq(h, &handler)) {
                handlers.push(Arc::clone(&handler));
            }
        }
        Subscription {
            shared: Arc::downgrade(&self.shared),
            target: SubscriptionTarget::Message {
                kind: kind.to_string(),
                handler,
            },
        }
    }

    /// Register a state-change handler.
    pub fn on_state_change<F>(&self, handler: F) -> Subscription
    where
        F: Fn(ConnectionState) + Send + Sync + 'static,
    {
        let handler: Arc<StateHandler> = Arc::new(handler);
        self.shared
            .inner
            .lock()
            .state_handlers
            .push(Arc::clone(&handler));
        Subscription {
            shared: Arc::downgrade(&self.shared),
            target: SubscriptionTarget::State(handler),
        }
    }

    /// Current state.
    pub fn state(&self) -> ConnectionState {
        self.shared.inner.lock().state
    }

    /// Whether the socket is open.
    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }
}

impl fmt::Debug for WebSocketService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.shared.inner.lock();
        f.debug_struct("WebSocketService")
            .field("url", &self.shared.config.url.as_str())
            .field("state", &inner.state)
            .field("attempts", &inner.attempts)
            .finish_non_exhaustive()
    }
}
