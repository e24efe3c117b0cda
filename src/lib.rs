//! # OCXP client core
//!
//! Async client for the OCXP content protocol.
//!
//! This crate provides the pieces every OCXP endpoint wrapper sits on:
//! - An HTTP request engine with config merging, OpenAPI-style path and query
//!   serialization, credential injection and interceptor chains
//! - Content-type driven response parsing with a typed OCXP envelope
//! - A Server-Sent Events client with `Last-Event-ID` resumption and capped
//!   exponential backoff
//! - A WebSocket service with typed message dispatch and automatic
//!   reconnection
//!
//! ## Quick Start
//!
//! ### HTTP
//!
//! ```rust,no_run
//! use ocxp_client::{Client, ClientConfig, RequestOptions};
//! use serde_json::json;
//!
//! # async fn example() -> ocxp_client::Result<()> {
//! let client = Client::new(ClientConfig::new().base_url("https://ocxp.example.com/api/v1"));
//!
//! let outcome = client
//!     .post(RequestOptions::new("/{workspace}/missions").path(json!({"workspace": "acme"}))
//!         .body(json!({"title": "Launch"})))
//!     .await?;
//! if let Some(error) = outcome.error() {
//!     eprintln!("create failed: {}", error);
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ### Server-Sent Events
//!
//! ```rust,no_run
//! use futures::StreamExt;
//! use ocxp_client::{Client, ClientConfig, RequestOptions, SseOptions};
//!
//! # async fn example() -> ocxp_client::Result<()> {
//! let client = Client::new(ClientConfig::new().base_url("https://ocxp.example.com/api/v1"));
//! let mut events = client
//!     .sse(RequestOptions::new("/acme/events"), SseOptions::default().max_retry_attempts(5))
//!     .await?;
//! while let Some(event) = events.next().await {
//!     println!("{:?}", event);
//! }
//! # Ok(())
//! # }
//! ```

#![warn(
    missing_docs,
    missing_debug_implementations,
    rust_2018_idioms,
    unreachable_pub
)]
#![deny(unsafe_code)]
#![cfg_attr(docsrs, feature(doc_cfg))]
// Allow certain clippy lints that are too pedantic for this codebase
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::return_self_not_must_use)]
#![allow(clippy::multiple_crate_versions)]
#![allow(clippy::result_large_err)]

pub mod client;
pub mod error;
pub mod shared;
pub mod types;

// Re-export commonly used types
pub use client::{
    create_config, merge_configs, AuthProvider, BodySerializer, Client, ClientConfig, ParseAs,
    RequestOptions, RequestOutcome, RequestResult, ResponseData, ResponseStyle, SecurityScheme,
    StaticToken,
};
pub use error::{Error, Result, TransportError};
pub use shared::{
    ConnectionState, SseData, SseOptions, SseStream, StreamEvent, WebSocketConfig,
    WebSocketService,
};
pub use types::{ApiEnvelope, ClientMessage, EnvelopeError, ServerMessage};

// Re-export async_trait for convenience
pub use async_trait::async_trait;
