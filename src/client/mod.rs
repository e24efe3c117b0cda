//! OCXP HTTP client.
//!
//! [`Client`] runs one request per call through a fixed pipeline: the call's
//! [`RequestOptions`] are merged over the client's [`ClientConfig`], headers
//! are merged and credentials attached, the body is serialized and the URL
//! built. Request interceptors may then rewrite the outgoing request before
//! the transport sends it. Response interceptors see the response head, and
//! the body is parsed according to the effective [`ParseAs`] mode. Failures
//! (transport errors and non-2xx statuses) pass through the error
//! interceptors and are either returned as `Err` or carried in the result,
//! depending on `throw_on_error`.
//!
//! The engine never retries; a call is exactly one transport attempt.

use crate::error::{Error, Result};
use crate::shared::headers::{merge_headers, HeaderSource};
use crate::shared::sse::{create_sse_client, SseOptions, SseRequest, SseRequestHook, SseStream};
use crate::shared::url::{get_url, QuerySerializer};
use async_trait::async_trait;
use parking_lot::RwLock;
use reqwest::header::CONTENT_TYPE;
use reqwest::Method;
use std::fmt;
use std::iter;
use std::sync::Arc;
use tracing::{debug, warn};
use url::Url;

pub mod auth;
pub mod config;
pub mod interceptors;
pub mod response;
pub mod transport;
pub mod validation;

pub use auth::{AuthProvider, SecurityScheme, StaticToken};
pub use config::{
    create_config, merge_configs, BodySerializer, ClientConfig, ParseAs, RequestOptions,
    ResolvedOptions, ResponseStyle,
};
pub use interceptors::{
    ClientInterceptors, ErrorInterceptor, InterceptorId, Interceptors, RequestInterceptor,
    ResponseInterceptor,
};
pub use response::{
    FormData, RequestOutcome, RequestResult, RequestSnapshot, ResponseData, ResponseSnapshot,
};
pub use transport::HttpTransport;
pub use validation::{RequestValidator, ResponseTransformer, ResponseValidator};

use auth::set_auth_params;
use config::object_or_empty;
use response::{empty_data, error_body, is_empty_body, read_data, resolve_parse_as};

/// Options after the building phase, ready to be turned into a request.
struct Prepared {
    resolved: ResolvedOptions,
    transport: Arc<dyn HttpTransport>,
    response_validator: Option<Arc<dyn ResponseValidator>>,
    response_transformer: Option<Arc<dyn ResponseTransformer>>,
}

/// OCXP HTTP client.
///
/// Cloning is cheap; clones share configuration and interceptors.
///
/// # Examples
///
/// ```rust,no_run
/// use ocxp_client::{Client, ClientConfig, RequestOptions, SecurityScheme, StaticToken};
/// use serde_json::json;
/// use std::sync::Arc;
///
/// # async fn example() -> ocxp_client::Result<()> {
/// let client = Client::new(
///     ClientConfig::new()
///         .base_url("https://ocxp.example.com/api/v1")
///         .auth(Arc::new(StaticToken::new("secret")))
///         .throw_on_error(true),
/// );
///
/// let outcome = client
///     .get(
///         RequestOptions::new("/{workspace}/missions/{id}")
///             .path(json!({"workspace": "acme", "id": "m-1"}))
///             .security(SecurityScheme::bearer()),
///     )
///     .await?;
/// let result = outcome.into_fields().expect("fields-shaped by default");
/// let envelope = result.envelope::<serde_json::Value>()?;
/// println!("mission: {:?}", envelope.data);
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Client {
    config: Arc<RwLock<Arc<ClientConfig>>>,
    interceptors: Arc<RwLock<ClientInterceptors>>,
    default_transport: Arc<dyn HttpTransport>,
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("config", &*self.config.read())
            .field("interceptors", &*self.interceptors.read())
            .finish_non_exhaustive()
    }
}

impl Default for Client {
    fn default() -> Self {
        Self::new(ClientConfig::default())
    }
}

impl Client {
    /// Create a client. `config` is merged over [`create_config`].
    pub fn new(config: ClientConfig) -> Self {
        Self {
            config: Arc::new(RwLock::new(Arc::new(merge_configs(&create_config(), config)))),
            interceptors: Arc::new(RwLock::new(ClientInterceptors::default())),
            default_transport: Arc::new(reqwest::Client::new()),
        }
    }

    /// Current configuration.
    pub fn config(&self) -> Arc<ClientConfig> {
        Arc::clone(&self.config.read())
    }

    /// Merge `config` over the current configuration and return the result.
    ///
    /// Calls already in flight keep the configuration they started with.
    pub fn set_config(&self, config: ClientConfig) -> Arc<ClientConfig> {
        let mut current = self.config.write();
        let merged = Arc::new(merge_configs(&current, config));
        *current = Arc::clone(&merged);
        merged
    }

    /// Interceptor registries shared by every clone of this client.
    ///
    /// ```rust
    /// use ocxp_client::client::interceptors::RequestInterceptor;
    /// use ocxp_client::client::config::ResolvedOptions;
    /// use ocxp_client::Client;
    /// use std::sync::Arc;
    ///
    /// struct Tag;
    ///
    /// #[async_trait::async_trait]
    /// impl RequestInterceptor for Tag {
    ///     async fn on_request(
    ///         &self,
    ///         mut request: reqwest::Request,
    ///         _options: &ResolvedOptions,
    ///     ) -> ocxp_client::Result<reqwest::Request> {
    ///         request.headers_mut().insert("x-client", "ocxp".parse().unwrap());
    ///         Ok(request)
    ///     }
    /// }
    ///
    /// let client = Client::default();
    /// let id = client.interceptors().write().request.add(Arc::new(Tag));
    /// assert!(client.interceptors().read().request.exists(id));
    /// ```
    pub fn interceptors(&self) -> &Arc<RwLock<ClientInterceptors>> {
        &self.interceptors
    }

    /// URL a request with `options` would be sent to, without credentials.
    pub fn build_url(&self, options: &RequestOptions) -> Result<String> {
        let config = self.config();
        let path = object_or_empty(options.path.clone(), "Path")?;
        let query = object_or_empty(options.query.clone(), "Query")?;
        let serializer = options
            .query_serializer
            .clone()
            .or_else(|| config.query_serializer.clone())
            .unwrap_or_default();
        let base_url = options.base_url.as_deref().or(config.base_url.as_deref());
        get_url(base_url, &options.url, Some(&path), Some(&query), &serializer)
    }

    /// Run one request.
    pub async fn request(&self, options: RequestOptions) -> Result<RequestOutcome> {
        let Prepared {
            resolved,
            transport,
            response_validator,
            response_transformer,
        } = self.prepare(options).await?;

        let mut request = outbound_request(&resolved)?;
        request = self.run_request_interceptors(request, &resolved).await?;
        let request_snapshot = response::RequestSnapshot::of(&request);

        debug!("{} {}", request_snapshot.method, request_snapshot.url);
        let mut response = match transport.execute(request).await {
            Ok(response) => response,
            Err(e) => {
                warn!("Request to {} failed: {}", request_snapshot.url, e);
                let error = self
                    .run_error_interceptors(Error::from(e), None, &request_snapshot, &resolved)
                    .await;
                return finish_with_error(&resolved, error, request_snapshot, None);
            },
        };

        let response_chain = self.interceptors.read().response.snapshot();
        for interceptor in response_chain {
            response = interceptor
                .on_response(response, &request_snapshot, &resolved)
                .await?;
        }
        let response_snapshot = ResponseSnapshot::of(&response);
        let status = response.status();
        debug!("{} {} -> {}", request_snapshot.method, request_snapshot.url, status);

        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            let error = Error::protocol(status, error_body(text));
            let error = self
                .run_error_interceptors(
                    error,
                    Some(&response_snapshot),
                    &request_snapshot,
                    &resolved,
                )
                .await;
            return finish_with_error(
                &resolved,
                error,
                request_snapshot,
                Some(response_snapshot),
            );
        }

        let mode = resolve_parse_as(resolved.parse_as, response.headers());
        let data = if is_empty_body(status, response.headers()) {
            empty_data(mode, response)
        } else {
            match read_data(mode, response).await? {
                ResponseData::Json(mut value) => {
                    if let Some(validator) = &response_validator {
                        validator.validate_response(&value).await?;
                    }
                    if let Some(transformer) = &response_transformer {
                        value = transformer.transform_response(value).await?;
                    }
                    ResponseData::Json(value)
                },
                other => other,
            }
        };

        Ok(RequestOutcome::shape(
            resolved.response_style,
            Some(data),
            None,
            request_snapshot,
            Some(response_snapshot),
        ))
    }

    /// Run a GET request.
    pub async fn get(&self, options: RequestOptions) -> Result<RequestOutcome> {
        self.request(options.method(Method::GET)).await
    }

    /// Run a POST request.
    pub async fn post(&self, options: RequestOptions) -> Result<RequestOutcome> {
        self.request(options.method(Method::POST)).await
    }

    /// Run a PUT request.
    pub async fn put(&self, options: RequestOptions) -> Result<RequestOutcome> {
        self.request(options.method(Method::PUT)).await
    }

    /// Run a PATCH request.
    pub async fn patch(&self, options: RequestOptions) -> Result<RequestOutcome> {
        self.request(options.method(Method::PATCH)).await
    }

    /// Run a DELETE request.
    pub async fn delete(&self, options: RequestOptions) -> Result<RequestOutcome> {
        self.request(options.method(Method::DELETE)).await
    }

    /// Run a HEAD request.
    pub async fn head(&self, options: RequestOptions) -> Result<RequestOutcome> {
        self.request(options.method(Method::HEAD)).await
    }

    /// Run an OPTIONS request.
    pub async fn options(&self, options: RequestOptions) -> Result<RequestOutcome> {
        self.request(options.method(Method::OPTIONS)).await
    }

    /// Open a Server-Sent Events stream.
    ///
    /// The request is built exactly like [`Client::request`] builds one, and
    /// request interceptors run before every connection attempt, ahead of any
    /// hook already set in `sse_options`. Response validator and transformer
    /// from `options` apply to each JSON payload unless `sse_options` sets
    /// its own.
    pub async fn sse(&self, options: RequestOptions, sse_options: SseOptions) -> Result<SseStream> {
        let Prepared {
            resolved,
            transport,
            response_validator,
            response_transformer,
        } = self.prepare(options).await?;

        let url = parse_url(&resolved.url)?;
        let request = SseRequest {
            method: resolved.method.clone(),
            url,
            headers: resolved.headers.clone(),
            body: resolved.serialized_body.clone(),
            transport,
        };

        let mut sse_options = sse_options;
        let hook = InterceptorHook {
            interceptors: Arc::clone(&self.interceptors),
            options: resolved,
            next: sse_options.on_request.take(),
        };
        sse_options.on_request = Some(Arc::new(hook));
        if sse_options.response_validator.is_none() {
            sse_options.response_validator = response_validator;
        }
        if sse_options.response_transformer.is_none() {
            sse_options.response_transformer = response_transformer;
        }

        Ok(create_sse_client(request, sse_options))
    }

    /// Building phase: merge options over the configuration, attach
    /// credentials, validate, serialize the body and build the URL.
    async fn prepare(&self, options: RequestOptions) -> Result<Prepared> {
        let config = self.config();

        let mut headers = merge_headers(
            iter::once(HeaderSource::Map(config.headers.clone())).chain(options.headers),
        )?;
        let path = object_or_empty(options.path, "Path")?;
        let mut query = object_or_empty(options.query, "Query")?;

        if !options.security.is_empty() {
            let auth = options.auth.or_else(|| config.auth.clone());
            set_auth_params(&options.security, &mut headers, &mut query, auth.as_deref()).await?;
        }

        let mut resolved = ResolvedOptions {
            method: options.method,
            template: options.url,
            url: String::new(),
            base_url: options.base_url.or_else(|| config.base_url.clone()),
            headers,
            path,
            query,
            body: options.body,
            serialized_body: None,
            security: options.security,
            parse_as: options.parse_as.or(config.parse_as).unwrap_or_default(),
            response_style: options
                .response_style
                .or(config.response_style)
                .unwrap_or_default(),
            throw_on_error: options
                .throw_on_error
                .or(config.throw_on_error)
                .unwrap_or(false),
        };

        if let Some(validator) = &options.request_validator {
            validator.validate_request(&resolved).await?;
        }

        if let Some(body) = &resolved.body {
            let serializer = options
                .body_serializer
                .as_ref()
                .or(config.body_serializer.as_ref());
            resolved.serialized_body = match serializer {
                Some(serializer) => Some(serializer.serialize(body)?),
                None => None,
            };
        }
        if resolved.serialized_body.as_deref().map_or(true, str::is_empty) {
            resolved.headers.remove(CONTENT_TYPE);
        }

        let query_serializer = options
            .query_serializer
            .or_else(|| config.query_serializer.clone())
            .unwrap_or_default();
        resolved.url = get_url(
            resolved.base_url.as_deref(),
            &resolved.template,
            Some(&resolved.path),
            Some(&resolved.query),
            &query_serializer,
        )?;

        let transport = options
            .transport
            .or_else(|| config.transport.clone())
            .unwrap_or_else(|| Arc::clone(&self.default_transport));

        Ok(Prepared {
            resolved,
            transport,
            response_validator: options.response_validator,
            response_transformer: options.response_transformer,
        })
    }

    async fn run_request_interceptors(
        &self,
        request: reqwest::Request,
        options: &ResolvedOptions,
    ) -> Result<reqwest::Request> {
        run_request_chain(&self.interceptors, request, options).await
    }

    async fn run_error_interceptors(
        &self,
        mut error: Error,
        response: Option<&ResponseSnapshot>,
        request: &RequestSnapshot,
        options: &ResolvedOptions,
    ) -> Error {
        let chain = self.interceptors.read().error.snapshot();
        for interceptor in chain {
            error = interceptor
                .on_error(error, response, request, options)
                .await
                .unwrap_or(Error::Unspecified);
        }
        error
    }
}

async fn run_request_chain(
    interceptors: &RwLock<ClientInterceptors>,
    mut request: reqwest::Request,
    options: &ResolvedOptions,
) -> Result<reqwest::Request> {
    let chain = interceptors.read().request.snapshot();
    for interceptor in chain {
        request = interceptor.on_request(request, options).await?;
    }
    Ok(request)
}

fn parse_url(url: &str) -> Result<Url> {
    Url::parse(url).map_err(|e| Error::configuration(format!("Invalid request URL '{}': {}", url, e)))
}

fn outbound_request(resolved: &ResolvedOptions) -> Result<reqwest::Request> {
    let mut request = reqwest::Request::new(resolved.method.clone(), parse_url(&resolved.url)?);
    *request.headers_mut() = resolved.headers.clone();
    if let Some(body) = &resolved.serialized_body {
        *request.body_mut() = Some(body.clone().into());
    }
    Ok(request)
}

fn finish_with_error(
    resolved: &ResolvedOptions,
    error: Error,
    request: RequestSnapshot,
    response: Option<ResponseSnapshot>,
) -> Result<RequestOutcome> {
    if resolved.throw_on_error {
        return Err(error);
    }
    Ok(RequestOutcome::shape(
        resolved.response_style,
        None,
        Some(error),
        request,
        response,
    ))
}

/// Runs the client's request interceptors before each SSE connection.
struct InterceptorHook {
    interceptors: Arc<RwLock<ClientInterceptors>>,
    options: ResolvedOptions,
    next: Option<Arc<dyn SseRequestHook>>,
}

#[async_trait]
impl SseRequestHook for InterceptorHook {
    async fn prepare(&self, request: reqwest::Request) -> Result<reqwest::Request> {
        let request = run_request_chain(&self.interceptors, request, &self.options).await?;
        match &self.next {
            Some(next) => next.prepare(request).await,
            None => Ok(request),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn build_url_uses_configured_base() {
        let client = Client::new(ClientConfig::new().base_url("https://api.example.com/v1/"));
        let url = client
            .build_url(
                &RequestOptions::new("/items/{id}")
                    .path(json!({"id": "x y"}))
                    .query(json!({"tags": ["a", "b"], "skip": null})),
            )
            .unwrap();
        assert_eq!(url, "https://api.example.com/v1/items/x%20y?tags=a&tags=b");
    }

    #[test]
    fn set_config_merges_over_current() {
        let client = Client::new(ClientConfig::new().base_url("http://a"));
        client.set_config(ClientConfig::new().throw_on_error(true));
        let config = client.config();
        assert_eq!(config.base_url.as_deref(), Some("http://a"));
        assert_eq!(config.throw_on_error, Some(true));
        assert_eq!(config.headers.get("content-type").unwrap(), "application/json");
    }

    #[tokio::test]
    async fn content_type_is_dropped_without_body() {
        let client = Client::new(ClientConfig::new().base_url("http://h"));
        let prepared = client.prepare(RequestOptions::new("/a")).await.unwrap();
        assert!(prepared.resolved.headers.get("content-type").is_none());

        let prepared = client
            .prepare(RequestOptions::new("/a").body(json!({"k": 1})))
            .await
            .unwrap();
        assert_eq!(prepared.resolved.serialized_body.as_deref(), Some(r#"{"k":1}"#));
        assert_eq!(
            prepared.resolved.headers.get("content-type").unwrap(),
            "application/json"
        );
    }

    #[tokio::test]
    async fn invalid_url_is_a_configuration_error() {
        let client = Client::default();
        let err = client.request(RequestOptions::new("relative")).await.unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }
}
