//! Error types for the OCXP client.
//!
//! This module provides a single error type that covers every failure mode of
//! the request engine, the SSE client and the WebSocket service.

use reqwest::StatusCode;
use thiserror::Error;

/// Result type alias for OCXP operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for OCXP operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Non-2xx HTTP response
    #[error("Protocol error: HTTP {status} - {body}")]
    Protocol {
        /// Response status
        status: StatusCode,
        /// Response body, JSON-parsed when possible, otherwise the raw text
        body: serde_json::Value,
    },

    /// Transport-level errors
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// Serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Request or response validator rejected a value
    #[error("Validation error: {0}")]
    Validation(String),

    /// Unsupported serialization shape or invalid client configuration
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// SSE failure mid-stream
    #[error("Stream error: {0}")]
    Stream(String),

    /// WebSocket connect timed out
    #[error("Connection timed out after {0}ms")]
    ConnectionTimeout(u64),

    /// WebSocket connect failed
    #[error("Connection error: {0}")]
    Connection(String),

    /// Error value suppressed by an error interceptor
    #[error("Unspecified error")]
    Unspecified,

    /// Other errors
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Transport-specific errors.
#[derive(Error, Debug)]
pub enum TransportError {
    /// IO error
    #[error("IO error: {0}")]
    Io(String),

    /// Connection closed
    #[error("Connection closed")]
    ConnectionClosed,

    /// Invalid message format
    #[error("Invalid message format: {0}")]
    InvalidMessage(String),

    /// Request error
    #[error("Request error: {0}")]
    Request(String),

    /// Send error
    #[error("Send error: {0}")]
    Send(String),

    /// HTTP client error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// WebSocket error (when feature enabled)
    #[cfg(feature = "websocket")]
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
}

impl From<std::io::Error> for TransportError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        Self::Transport(TransportError::Http(err))
    }
}

impl Error {
    /// Create a protocol error from a response status and body.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use ocxp_client::Error;
    /// use reqwest::StatusCode;
    /// use serde_json::json;
    ///
    /// let err = Error::protocol(StatusCode::NOT_FOUND, json!({"message": "missing"}));
    /// assert_eq!(err.status(), Some(StatusCode::NOT_FOUND));
    /// assert_eq!(err.body().unwrap()["message"], "missing");
    /// ```
    pub fn protocol(status: StatusCode, body: serde_json::Value) -> Self {
        Self::Protocol { status, body }
    }

    /// Create a validation error.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use ocxp_client::Error;
    ///
    /// fn require_title(title: &str) -> Result<(), Error> {
    ///     if title.is_empty() {
    ///         return Err(Error::validation("title is required"));
    ///     }
    ///     Ok(())
    /// }
    ///
    /// assert!(require_title("").is_err());
    /// ```
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Create a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    /// Create a stream error.
    pub fn stream(message: impl Into<String>) -> Self {
        Self::Stream(message.into())
    }

    /// Create a connection error.
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection(message.into())
    }

    /// Create a transport error from a request failure message.
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport(TransportError::Request(message.into()))
    }

    /// Check if this error happened before any HTTP response was obtained.
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Transport(_))
    }

    /// Get the HTTP status if this is a protocol error.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use ocxp_client::Error;
    ///
    /// assert_eq!(Error::validation("bad").status(), None);
    /// ```
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Self::Protocol { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Get the response body if this is a protocol error.
    pub fn body(&self) -> Option<&serde_json::Value> {
        match self {
            Self::Protocol { body, .. } => Some(body),
            _ => None,
        }
    }
}
