//! Components shared by the HTTP client, the SSE client and the WebSocket
//! service.

pub mod headers;
pub mod http_constants;
pub mod logging;
pub mod params;
pub mod sse;
pub mod sse_parser;
pub mod url;
pub mod websocket;

// Re-export commonly used types
pub use headers::{merge_headers, HeaderSource};
pub use logging::{init_logging, LogConfig, LogFormat, LogLevel};
pub use params::{date_param, ParamStyle};
pub use sse::{create_sse_client, SseData, SseOptions, SseRequest, SseStream, StreamEvent};
pub use sse_parser::{SseFrame, SseParser};
pub use self::url::{get_url, QuerySerializer, QuerySerializerOptions};
pub use websocket::{ConnectionState, Subscription, WebSocketConfig, WebSocketService, WsConnector};

#[cfg(feature = "websocket")]
pub use websocket::TungsteniteConnector;
