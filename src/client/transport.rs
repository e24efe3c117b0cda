//! HTTP transport abstraction.
//!
//! The request engine and the SSE client never talk to the network directly;
//! they hand a prepared [`reqwest::Request`] to an [`HttpTransport`]. The
//! default transport is a plain [`reqwest::Client`], tests substitute their own.

use crate::error::TransportError;
use async_trait::async_trait;
use std::fmt::Debug;

/// Executes HTTP requests.
#[async_trait]
pub trait HttpTransport: Send + Sync + Debug {
    /// Send a request and return the response head with a streaming body.
    async fn execute(
        &self,
        request: reqwest::Request,
    ) -> std::result::Result<reqwest::Response, TransportError>;
}

#[async_trait]
impl HttpTransport for reqwest::Client {
    async fn execute(
        &self,
        request: reqwest::Request,
    ) -> std::result::Result<reqwest::Response, TransportError> {
        reqwest::Client::execute(self, request)
            .await
            .map_err(TransportError::from)
    }
}
