//! Client configuration and per-request options.

use crate::client::auth::{AuthProvider, SecurityScheme};
use crate::client::transport::HttpTransport;
use crate::client::validation::{RequestValidator, ResponseTransformer, ResponseValidator};
use crate::error::{Error, Result};
use crate::shared::headers::{overlay_headers, HeaderSource};
use crate::shared::http_constants::APPLICATION_JSON;
use crate::shared::url::QuerySerializer;
use reqwest::header::{self, HeaderMap, HeaderName, HeaderValue};
use reqwest::Method;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::sync::Arc;

/// How a successful response body is read.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ParseAs {
    /// Pick from the `Content-Type` header
    #[default]
    Auto,
    /// Parse as JSON
    Json,
    /// Read as UTF-8 text
    Text,
    /// Read raw bytes
    Blob,
    /// Read raw bytes
    ArrayBuffer,
    /// Parse form fields (urlencoded or multipart)
    FormData,
    /// Hand back the unread body stream
    Stream,
}

/// Shape of a successful call's return value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ResponseStyle {
    /// Result record with data or error plus request and response
    #[default]
    Fields,
    /// Parsed data only
    Data,
}

/// Custom body serializer function.
pub type BodySerializerFn = dyn Fn(&Value) -> Result<String> + Send + Sync;

/// Turns a request body into its wire form.
#[derive(Clone)]
pub enum BodySerializer {
    /// `JSON.stringify`-style serialization
    Json,
    /// `application/x-www-form-urlencoded`; arrays repeat their key and
    /// non-string values are JSON-stringified
    FormUrlEncoded,
    /// Caller-supplied serializer
    Custom(Arc<BodySerializerFn>),
}

impl BodySerializer {
    /// Wrap a custom serializer function.
    pub fn custom<F>(f: F) -> Self
    where
        F: Fn(&Value) -> Result<String> + Send + Sync + 'static,
    {
        Self::Custom(Arc::new(f))
    }

    /// Serialize a body value.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use ocxp_client::client::config::BodySerializer;
    /// use serde_json::json;
    ///
    /// let body = json!({"tag": ["a", "b"], "n": 1, "skip": null});
    /// assert_eq!(BodySerializer::FormUrlEncoded.serialize(&body).unwrap(), "tag=a&tag=b&n=1");
    /// assert_eq!(BodySerializer::Json.serialize(&json!({"n": 1})).unwrap(), r#"{"n":1}"#);
    /// ```
    pub fn serialize(&self, body: &Value) -> Result<String> {
        match self {
            Self::Json => Ok(serde_json::to_string(body)?),
            Self::FormUrlEncoded => {
                let fields = body.as_object().ok_or_else(|| {
                    Error::configuration("Form-urlencoded bodies must be JSON objects")
                })?;
                let mut form = url::form_urlencoded::Serializer::new(String::new());
                for (key, value) in fields {
                    match value {
                        Value::Null => {},
                        Value::Array(items) => {
                            for item in items {
                                form.append_pair(key, &form_text(item));
                            }
                        },
                        other => {
                            form.append_pair(key, &form_text(other));
                        },
                    }
                }
                Ok(form.finish())
            },
            Self::Custom(f) => f(body),
        }
    }
}

fn form_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

impl fmt::Debug for BodySerializer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Json => f.write_str("Json"),
            Self::FormUrlEncoded => f.write_str("FormUrlEncoded"),
            Self::Custom(_) => f.write_str("Custom(<fn>)"),
        }
    }
}

/// Client-wide configuration.
///
/// Fields left as `None` are unset; when two configurations are merged with
/// [`merge_configs`] the right-hand side wins for every field it sets.
/// [`create_config`] returns the defaults a [`Client`](crate::Client) starts
/// from.
///
/// # Examples
///
/// ```rust
/// use ocxp_client::client::config::{create_config, merge_configs, ClientConfig, ResponseStyle};
///
/// let config = merge_configs(
///     &create_config(),
///     ClientConfig::default()
///         .base_url("https://api.example.com/")
///         .response_style(ResponseStyle::Data),
/// );
/// assert_eq!(config.base_url.as_deref(), Some("https://api.example.com"));
/// assert_eq!(config.headers.get("content-type").unwrap(), "application/json");
/// ```
#[derive(Clone, Default)]
pub struct ClientConfig {
    /// Prefix for every request URL; never ends with `/` once merged
    pub base_url: Option<String>,
    /// Headers sent with every request
    pub headers: HeaderMap,
    /// Headers this config deletes from the one it is merged over
    pub removed_headers: Vec<HeaderName>,
    /// Body serializer
    pub body_serializer: Option<BodySerializer>,
    /// Query serializer
    pub query_serializer: Option<QuerySerializer>,
    /// Response parse mode
    pub parse_as: Option<ParseAs>,
    /// Return shape
    pub response_style: Option<ResponseStyle>,
    /// Return errors as `Err` instead of inside the result record
    pub throw_on_error: Option<bool>,
    /// HTTP transport
    pub transport: Option<Arc<dyn HttpTransport>>,
    /// Token source for declared security schemes
    pub auth: Option<Arc<dyn AuthProvider>>,
}

impl ClientConfig {
    /// Empty configuration; every field unset.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the base URL.
    pub fn base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    /// Set one default header.
    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Overlay a set of default headers.
    pub fn headers(mut self, headers: HeaderMap) -> Self {
        overlay_headers(&mut self.headers, &headers);
        self
    }

    /// Delete a default header, including one inherited when this config is
    /// merged over another.
    pub fn remove_header(mut self, name: HeaderName) -> Self {
        self.headers.remove(&name);
        self.removed_headers.push(name);
        self
    }

    /// Set the body serializer.
    pub fn body_serializer(mut self, serializer: BodySerializer) -> Self {
        self.body_serializer = Some(serializer);
        self
    }

    /// Set the query serializer.
    pub fn query_serializer(mut self, serializer: impl Into<QuerySerializer>) -> Self {
        self.query_serializer = Some(serializer.into());
        self
    }

    /// Set the response parse mode.
    pub fn parse_as(mut self, parse_as: ParseAs) -> Self {
        self.parse_as = Some(parse_as);
        self
    }

    /// Set the return shape.
    pub fn response_style(mut self, style: ResponseStyle) -> Self {
        self.response_style = Some(style);
        self
    }

    /// Return errors as `Err`.
    pub fn throw_on_error(mut self, throw: bool) -> Self {
        self.throw_on_error = Some(throw);
        self
    }

    /// Set the HTTP transport.
    pub fn transport(mut self, transport: Arc<dyn HttpTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Set the token source.
    pub fn auth(mut self, auth: Arc<dyn AuthProvider>) -> Self {
        self.auth = Some(auth);
        self
    }
}

impl fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientConfig")
            .field("base_url", &self.base_url)
            .field("headers", &self.headers)
            .field("removed_headers", &self.removed_headers)
            .field("body_serializer", &self.body_serializer)
            .field("query_serializer", &self.query_serializer)
            .field("parse_as", &self.parse_as)
            .field("response_style", &self.response_style)
            .field("throw_on_error", &self.throw_on_error)
            .field("transport", &self.transport)
            .field("auth", &self.auth)
            .finish()
    }
}

/// Default client configuration: JSON content type, JSON body serializer,
/// default query serializer, automatic parse mode, fields-shaped results and
/// errors returned inside the result.
pub fn create_config() -> ClientConfig {
    ClientConfig::new()
        .header(header::CONTENT_TYPE, HeaderValue::from_static(APPLICATION_JSON))
        .body_serializer(BodySerializer::Json)
        .query_serializer(QuerySerializer::default())
        .parse_as(ParseAs::Auto)
        .response_style(ResponseStyle::Fields)
        .throw_on_error(false)
}

/// Shallow-merge two configurations.
///
/// Every field set in `b` replaces the one in `a`, except headers: names in
/// `b.removed_headers` are deleted from `a`, then `b`'s headers are overlaid
/// key by key. Trailing slashes are stripped from the base URL.
pub fn merge_configs(a: &ClientConfig, b: ClientConfig) -> ClientConfig {
    let mut headers = a.headers.clone();
    for name in &b.removed_headers {
        headers.remove(name);
    }
    overlay_headers(&mut headers, &b.headers);

    ClientConfig {
        base_url: b
            .base_url
            .or_else(|| a.base_url.clone())
            .map(|url| url.trim_end_matches('/').to_string()),
        headers,
        removed_headers: Vec::new(),
        body_serializer: b.body_serializer.or_else(|| a.body_serializer.clone()),
        query_serializer: b.query_serializer.or_else(|| a.query_serializer.clone()),
        parse_as: b.parse_as.or(a.parse_as),
        response_style: b.response_style.or(a.response_style),
        throw_on_error: b.throw_on_error.or(a.throw_on_error),
        transport: b.transport.or_else(|| a.transport.clone()),
        auth: b.auth.or_else(|| a.auth.clone()),
    }
}

/// Options for a single request.
///
/// Unset fields fall back to the client configuration.
///
/// # Examples
///
/// ```rust
/// use ocxp_client::client::config::{RequestOptions, ResponseStyle};
/// use reqwest::Method;
/// use serde_json::json;
///
/// let options = RequestOptions::new("/missions/{id}")
///     .method(Method::PATCH)
///     .path(json!({"id": "m-1"}))
///     .body(json!({"title": "Renamed"}))
///     .header("X-Request-Id", "r-1")
///     .response_style(ResponseStyle::Data);
/// assert_eq!(options.url, "/missions/{id}");
/// ```
#[derive(Clone)]
pub struct RequestOptions {
    /// HTTP method (defaults to GET)
    pub method: Method,
    /// URL template, relative to the base URL
    pub url: String,
    /// Path parameters (JSON object)
    pub path: Option<Value>,
    /// Query parameters (JSON object)
    pub query: Option<Value>,
    /// Request body before serialization
    pub body: Option<Value>,
    /// Header overrides, merged over the configured headers in order
    pub headers: Vec<HeaderSource>,
    /// Declared security schemes
    pub security: Vec<SecurityScheme>,
    /// Overrides the configured token source
    pub auth: Option<Arc<dyn AuthProvider>>,
    /// Overrides the configured base URL
    pub base_url: Option<String>,
    /// Overrides the configured body serializer
    pub body_serializer: Option<BodySerializer>,
    /// Overrides the configured query serializer
    pub query_serializer: Option<QuerySerializer>,
    /// Overrides the configured parse mode
    pub parse_as: Option<ParseAs>,
    /// Overrides the configured return shape
    pub response_style: Option<ResponseStyle>,
    /// Overrides the configured error mode
    pub throw_on_error: Option<bool>,
    /// Overrides the configured transport
    pub transport: Option<Arc<dyn HttpTransport>>,
    /// Runs on the built options before body serialization
    pub request_validator: Option<Arc<dyn RequestValidator>>,
    /// Runs on parsed JSON data
    pub response_validator: Option<Arc<dyn ResponseValidator>>,
    /// Runs on parsed JSON data after validation
    pub response_transformer: Option<Arc<dyn ResponseTransformer>>,
}

impl RequestOptions {
    /// Options for a GET request to `url`.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            method: Method::GET,
            url: url.into(),
            path: None,
            query: None,
            body: None,
            headers: Vec::new(),
            security: Vec::new(),
            auth: None,
            base_url: None,
            body_serializer: None,
            query_serializer: None,
            parse_as: None,
            response_style: None,
            throw_on_error: None,
            transport: None,
            request_validator: None,
            response_validator: None,
            response_transformer: None,
        }
    }

    /// Set the HTTP method.
    pub fn method(mut self, method: Method) -> Self {
        self.method = method;
        self
    }

    /// Set path parameters.
    pub fn path(mut self, path: Value) -> Self {
        self.path = Some(path);
        self
    }

    /// Set query parameters.
    pub fn query(mut self, query: Value) -> Self {
        self.query = Some(query);
        self
    }

    /// Set the request body.
    pub fn body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    /// Set one header. A later `null` record entry can still delete it.
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        let mut record = Map::new();
        record.insert(name.into(), Value::String(value.into()));
        self.headers.push(HeaderSource::Record(record));
        self
    }

    /// Merge a header source over the current ones.
    pub fn headers(mut self, headers: impl Into<HeaderSource>) -> Self {
        self.headers.push(headers.into());
        self
    }

    /// Add a declared security scheme.
    pub fn security(mut self, scheme: SecurityScheme) -> Self {
        self.security.push(scheme);
        self
    }

    /// Override the token source.
    pub fn auth(mut self, auth: Arc<dyn AuthProvider>) -> Self {
        self.auth = Some(auth);
        self
    }

    /// Override the base URL.
    pub fn base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    /// Override the body serializer.
    pub fn body_serializer(mut self, serializer: BodySerializer) -> Self {
        self.body_serializer = Some(serializer);
        self
    }

    /// Override the query serializer.
    pub fn query_serializer(mut self, serializer: impl Into<QuerySerializer>) -> Self {
        self.query_serializer = Some(serializer.into());
        self
    }

    /// Override the parse mode.
    pub fn parse_as(mut self, parse_as: ParseAs) -> Self {
        self.parse_as = Some(parse_as);
        self
    }

    /// Override the return shape.
    pub fn response_style(mut self, style: ResponseStyle) -> Self {
        self.response_style = Some(style);
        self
    }

    /// Override the error mode.
    pub fn throw_on_error(mut self, throw: bool) -> Self {
        self.throw_on_error = Some(throw);
        self
    }

    /// Override the transport.
    pub fn transport(mut self, transport: Arc<dyn HttpTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Set the request validator.
    pub fn request_validator(mut self, validator: Arc<dyn RequestValidator>) -> Self {
        self.request_validator = Some(validator);
        self
    }

    /// Set the response validator.
    pub fn response_validator(mut self, validator: Arc<dyn ResponseValidator>) -> Self {
        self.response_validator = Some(validator);
        self
    }

    /// Set the response transformer.
    pub fn response_transformer(mut self, transformer: Arc<dyn ResponseTransformer>) -> Self {
        self.response_transformer = Some(transformer);
        self
    }
}

impl fmt::Debug for RequestOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestOptions")
            .field("method", &self.method)
            .field("url", &self.url)
            .field("path", &self.path)
            .field("query", &self.query)
            .field("body", &self.body)
            .field("headers", &self.headers)
            .field("security", &self.security)
            .field("parse_as", &self.parse_as)
            .field("response_style", &self.response_style)
            .field("throw_on_error", &self.throw_on_error)
            .finish_non_exhaustive()
    }
}

/// Request options after merging with the client configuration.
///
/// This is what interceptors and validators see.
#[derive(Debug, Clone)]
pub struct ResolvedOptions {
    /// HTTP method
    pub method: Method,
    /// URL template as given
    pub template: String,
    /// Final URL; empty until building completes
    pub url: String,
    /// Effective base URL
    pub base_url: Option<String>,
    /// Merged headers including injected credentials
    pub headers: HeaderMap,
    /// Path parameters
    pub path: Map<String, Value>,
    /// Query parameters including injected credentials
    pub query: Map<String, Value>,
    /// Body before serialization
    pub body: Option<Value>,
    /// Body in wire form
    pub serialized_body: Option<String>,
    /// Declared security schemes
    pub security: Vec<SecurityScheme>,
    /// Effective parse mode
    pub parse_as: ParseAs,
    /// Effective return shape
    pub response_style: ResponseStyle,
    /// Effective error mode
    pub throw_on_error: bool,
}

pub(crate) fn object_or_empty(value: Option<Value>, what: &str) -> Result<Map<String, Value>> {
    match value {
        None | Some(Value::Null) => Ok(Map::new()),
        Some(Value::Object(map)) => Ok(map),
        Some(other) => Err(Error::configuration(format!(
            "{} parameters must be a JSON object, got {}",
            what, other
        ))),
    }
}
