//! Response parsing and result shapes.

use crate::client::config::{ParseAs, ResponseStyle};
use crate::error::{Error, Result, TransportError};
use crate::shared::http_constants::MULTIPART_FORM_DATA;
use crate::types::ApiEnvelope;
use bytes::Bytes;
use futures::stream::{Stream, StreamExt};
use reqwest::header::{HeaderMap, CONTENT_LENGTH, CONTENT_TYPE};
use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use std::fmt;
use std::pin::Pin;
use url::Url;

/// Unread response body.
pub type ByteStream = Pin<Box<dyn Stream<Item = std::result::Result<Bytes, TransportError>> + Send>>;

/// Parsed form fields, in wire order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FormData(Vec<(String, String)>);

impl FormData {
    /// First value of a field.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    /// Every value of a field.
    pub fn get_all<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.0
            .iter()
            .filter(move |(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    /// All fields.
    pub fn entries(&self) -> &[(String, String)] {
        &self.0
    }

    /// Whether there are no fields.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    fn parse(content_type: Option<&str>, body: &[u8]) -> Self {
        match content_type.and_then(multipart_boundary) {
            Some(boundary) => Self::parse_multipart(&String::from_utf8_lossy(body), &boundary),
            None => Self(
                url::form_urlencoded::parse(body)
                    .map(|(k, v)| (k.into_owned(), v.into_owned()))
                    .collect(),
            ),
        }
    }

    // Text fields only; file parts are kept as their raw text.
    fn parse_multipart(body: &str, boundary: &str) -> Self {
        let delimiter = format!("--{}", boundary);
        let mut fields = Vec::new();

        for part in body.split(delimiter.as_str()).skip(1) {
            if part.starts_with("--") {
                break;
            }
            let part = part.strip_prefix("\r\n").unwrap_or(part);
            let Some((head, value)) = part.split_once("\r\n\r\n") else {
                continue;
            };
            let name = head.lines().find_map(|line| {
                let (key, rest) = line.split_once(':')?;
                if !key.trim().eq_ignore_ascii_case("content-disposition") {
                    return None;
                }
                rest.split(';')
                    .filter_map(|param| param.trim().strip_prefix("name="))
                    .map(|name| name.trim_matches('"').to_string())
                    .next()
            });
            if let Some(name) = name {
                let value = value.strip_suffix("\r\n").unwrap_or(value);
                fields.push((name, value.to_string()));
            }
        }

        Self(fields)
    }
}

fn multipart_boundary(content_type: &str) -> Option<String> {
    let mut parts = content_type.split(';');
    if parts.next()?.trim() != MULTIPART_FORM_DATA {
        return None;
    }
    parts
        .filter_map(|param| param.trim().strip_prefix("boundary="))
        .map(|b| b.trim_matches('"').to_string())
        .next()
}

/// Parsed response body.
pub enum ResponseData {
    /// Parsed JSON
    Json(Value),
    /// UTF-8 text
    Text(String),
    /// Raw bytes (`blob` and `arrayBuffer` modes)
    Bytes(Bytes),
    /// Form fields
    FormData(FormData),
    /// Unread body
    Stream(ByteStream),
}

impl ResponseData {
    /// JSON value, if the body was parsed as JSON.
    pub fn as_json(&self) -> Option<&Value> {
        match self {
            Self::Json(value) => Some(value),
            _ => None,
        }
    }

    /// Text, if the body was read as text.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            _ => None,
        }
    }

    /// Bytes, if the body was read as raw bytes.
    pub fn as_bytes(&self) -> Option<&Bytes> {
        match self {
            Self::Bytes(bytes) => Some(bytes),
            _ => None,
        }
    }

    /// Form fields, if the body was parsed as form data.
    pub fn as_form_data(&self) -> Option<&FormData> {
        match self {
            Self::FormData(form) => Some(form),
            _ => None,
        }
    }

    /// Take the unread body stream.
    pub fn into_stream(self) -> Option<ByteStream> {
        match self {
            Self::Stream(body) => Some(body),
            _ => None,
        }
    }

    /// Deserialize JSON data into a typed value.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        let value = self
            .as_json()
            .ok_or_else(|| Error::validation("Response data is not JSON"))?;
        Ok(T::deserialize(value)?)
    }
}

impl fmt::Debug for ResponseData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Json(value) => f.debug_tuple("Json").field(value).finish(),
            Self::Text(text) => f.debug_tuple("Text").field(text).finish(),
            Self::Bytes(bytes) => f.debug_tuple("Bytes").field(bytes).finish(),
            Self::FormData(form) => f.debug_tuple("FormData").field(form).finish(),
            Self::Stream(_) => f.write_str("Stream(<body>)"),
        }
    }
}

/// The request as it was sent, after request interceptors.
#[derive(Debug, Clone)]
pub struct RequestSnapshot {
    /// HTTP method
    pub method: Method,
    /// Request URL
    pub url: Url,
    /// Request headers
    pub headers: HeaderMap,
}

impl RequestSnapshot {
    pub(crate) fn of(request: &reqwest::Request) -> Self {
        Self {
            method: request.method().clone(),
            url: request.url().clone(),
            headers: request.headers().clone(),
        }
    }
}

/// Response head, after response interceptors.
#[derive(Debug, Clone)]
pub struct ResponseSnapshot {
    /// Status code
    pub status: StatusCode,
    /// Final URL
    pub url: Url,
    /// Response headers
    pub headers: HeaderMap,
}

impl ResponseSnapshot {
    pub(crate) fn of(response: &reqwest::Response) -> Self {
        Self {
            status: response.status(),
            url: response.url().clone(),
            headers: response.headers().clone(),
        }
    }

    /// Whether the status is 2xx.
    pub fn ok(&self) -> bool {
        self.status.is_success()
    }
}

/// Result record returned in [`ResponseStyle::Fields`] mode.
///
/// Exactly one of `data` and `error` is set. `response` is absent when the
/// request failed before any response was obtained.
#[derive(Debug)]
pub struct RequestResult {
    /// Parsed data on success
    pub data: Option<ResponseData>,
    /// Error on failure
    pub error: Option<Error>,
    /// The sent request
    pub request: RequestSnapshot,
    /// The received response head, absent on transport failure
    pub response: Option<ResponseSnapshot>,
}

impl RequestResult {
    /// Convert into a `Result`, dropping the request and response heads.
    pub fn into_result(self) -> Result<Option<ResponseData>> {
        match self.error {
            Some(error) => Err(error),
            None => Ok(self.data),
        }
    }

    /// Deserialize JSON data into a typed value.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        match (&self.data, &self.error) {
            (_, Some(error)) => Err(Error::validation(format!("Request failed: {}", error))),
            (Some(data), None) => data.json(),
            (None, None) => Err(Error::validation("Response carried no data")),
        }
    }

    /// Decode JSON data as an OCXP envelope.
    pub fn envelope<T: DeserializeOwned>(&self) -> Result<ApiEnvelope<T>> {
        self.json()
    }
}

/// Return value of a request; its shape follows [`ResponseStyle`].
#[derive(Debug)]
pub enum RequestOutcome {
    /// Full result record
    Fields(RequestResult),
    /// Data only; `None` on a non-throwing failure
    Data(Option<ResponseData>),
}

impl RequestOutcome {
    /// Parsed data, whichever the shape.
    pub fn data(&self) -> Option<&ResponseData> {
        match self {
            Self::Fields(result) => result.data.as_ref(),
            Self::Data(data) => data.as_ref(),
        }
    }

    /// Take the parsed data.
    pub fn into_data(self) -> Option<ResponseData> {
        match self {
            Self::Fields(result) => result.data,
            Self::Data(data) => data,
        }
    }

    /// Error carried by a fields-shaped outcome.
    pub fn error(&self) -> Option<&Error> {
        match self {
            Self::Fields(result) => result.error.as_ref(),
            Self::Data(_) => None,
        }
    }

    /// Full result record, if the outcome is fields-shaped.
    pub fn into_fields(self) -> Option<RequestResult> {
        match self {
            Self::Fields(result) => Some(result),
            Self::Data(_) => None,
        }
    }

    pub(crate) fn shape(
        style: ResponseStyle,
        data: Option<ResponseData>,
        error: Option<Error>,
        request: RequestSnapshot,
        response: Option<ResponseSnapshot>,
    ) -> Self {
        match style {
            ResponseStyle::Data => Self::Data(data),
            ResponseStyle::Fields => Self::Fields(RequestResult {
                data,
                error,
                request,
                response,
            }),
        }
    }
}

/// Parse mode implied by a `Content-Type` header.
///
/// A missing header selects [`ParseAs::Stream`]; an unrecognized one yields
/// `None`, which callers treat as JSON.
///
/// # Examples
///
/// ```rust
/// use ocxp_client::client::config::ParseAs;
/// use ocxp_client::client::response::detect_parse_as;
///
/// assert_eq!(detect_parse_as(Some("application/json; charset=utf-8")), Some(ParseAs::Json));
/// assert_eq!(detect_parse_as(Some("application/problem+json")), Some(ParseAs::Json));
/// assert_eq!(detect_parse_as(Some("image/png")), Some(ParseAs::Blob));
/// assert_eq!(detect_parse_as(Some("text/csv")), Some(ParseAs::Text));
/// assert_eq!(detect_parse_as(None), Some(ParseAs::Stream));
/// assert_eq!(detect_parse_as(Some("weird/thing")), None);
/// ```
pub fn detect_parse_as(content_type: Option<&str>) -> Option<ParseAs> {
    let Some(content_type) = content_type else {
        return Some(ParseAs::Stream);
    };
    let clean = content_type.split(';').next().unwrap_or("").trim();
    if clean.is_empty() {
        return None;
    }
    if clean.starts_with("application/json") || clean.ends_with("+json") {
        return Some(ParseAs::Json);
    }
    if clean == MULTIPART_FORM_DATA {
        return Some(ParseAs::FormData);
    }
    if ["application/", "audio/", "image/", "video/"]
        .iter()
        .any(|prefix| clean.starts_with(prefix))
    {
        return Some(ParseAs::Blob);
    }
    if clean.starts_with("text/") {
        return Some(ParseAs::Text);
    }
    None
}

fn header_str<'a>(headers: &'a HeaderMap, name: reqwest::header::HeaderName) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

/// Effective parse mode for a response.
pub(crate) fn resolve_parse_as(requested: ParseAs, headers: &HeaderMap) -> ParseAs {
    let mode = match requested {
        ParseAs::Auto => detect_parse_as(header_str(headers, CONTENT_TYPE)),
        other => Some(other),
    };
    mode.unwrap_or(ParseAs::Json)
}

/// Whether a response is known to have no body.
pub(crate) fn is_empty_body(status: StatusCode, headers: &HeaderMap) -> bool {
    status == StatusCode::NO_CONTENT || header_str(headers, CONTENT_LENGTH) == Some("0")
}

pub(crate) fn byte_stream(response: reqwest::Response) -> ByteStream {
    Box::pin(
        response
            .bytes_stream()
            .map(|chunk| chunk.map_err(TransportError::from)),
    )
}

/// Read a body known to be empty, shaped to the parse mode.
pub(crate) fn empty_data(mode: ParseAs, response: reqwest::Response) -> ResponseData {
    match mode {
        ParseAs::Text => ResponseData::Text(String::new()),
        ParseAs::Blob | ParseAs::ArrayBuffer => ResponseData::Bytes(Bytes::new()),
        ParseAs::FormData => ResponseData::FormData(FormData::default()),
        ParseAs::Stream => ResponseData::Stream(byte_stream(response)),
        ParseAs::Json | ParseAs::Auto => ResponseData::Json(Value::Object(Map::new())),
    }
}

/// Read a non-empty body according to the parse mode.
pub(crate) async fn read_data(mode: ParseAs, response: reqwest::Response) -> Result<ResponseData> {
    Ok(match mode {
        ParseAs::Stream => ResponseData::Stream(byte_stream(response)),
        ParseAs::Text => ResponseData::Text(response.text().await?),
        ParseAs::Blob | ParseAs::ArrayBuffer => ResponseData::Bytes(response.bytes().await?),
        ParseAs::FormData => {
            let content_type = header_str(response.headers(), CONTENT_TYPE).map(str::to_owned);
            let body = response.bytes().await?;
            ResponseData::FormData(FormData::parse(content_type.as_deref(), &body))
        },
        ParseAs::Json | ParseAs::Auto => {
            let body = response.bytes().await?;
            ResponseData::Json(serde_json::from_slice(&body)?)
        },
    })
}

/// Error body of a failed response: JSON when it parses, raw text otherwise,
/// and an empty object when there is no body at all.
pub(crate) fn error_body(text: String) -> Value {
    if text.is_empty() {
        return Value::Object(Map::new());
    }
    serde_json::from_str(&text).unwrap_or(Value::String(text))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn urlencoded_form_parses_in_order() {
        let form = FormData::parse(
            Some("application/x-www-form-urlencoded"),
            b"a=1&b=two+words&a=3",
        );
        assert_eq!(form.get("a"), Some("1"));
        assert_eq!(form.get("b"), Some("two words"));
        assert_eq!(form.get_all("a").collect::<Vec<_>>(), vec!["1", "3"]);
    }

    #[test]
    fn multipart_text_fields_parse() {
        let body = "--XyZ\r\n\
                    Content-Disposition: form-data; name=\"title\"\r\n\r\n\
                    Launch\r\n\
                    --XyZ\r\n\
                    Content-Disposition: form-data; name=\"notes\"\r\n\r\n\
                    line one\r\nline two\r\n\
                    --XyZ--\r\n";
        let form = FormData::parse(Some("multipart/form-data; boundary=XyZ"), body.as_bytes());
        assert_eq!(
            form.entries(),
            &[
                ("title".to_string(), "Launch".to_string()),
                ("notes".to_string(), "line one\r\nline two".to_string()),
            ]
        );
    }

    #[test]
    fn error_bodies() {
        assert_eq!(error_body(String::new()), json!({}));
        assert_eq!(error_body(r#"{"code":"E1"}"#.to_string()), json!({"code": "E1"}));
        assert_eq!(error_body("boom".to_string()), json!("boom"));
    }

    #[test]
    fn explicit_parse_mode_wins_over_content_type() {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, "application/json".parse().unwrap());
        assert_eq!(resolve_parse_as(ParseAs::Text, &headers), ParseAs::Text);
        assert_eq!(resolve_parse_as(ParseAs::Auto, &headers), ParseAs::Json);

        headers.insert(CONTENT_TYPE, "weird/thing".parse().unwrap());
        assert_eq!(resolve_parse_as(ParseAs::Auto, &headers), ParseAs::Json);
    }

    #[test]
    fn empty_body_detection() {
        let mut headers = HeaderMap::new();
        assert!(is_empty_body(StatusCode::NO_CONTENT, &headers));
        assert!(!is_empty_body(StatusCode::OK, &headers));
        headers.insert(CONTENT_LENGTH, "0".parse().unwrap());
        assert!(is_empty_body(StatusCode::OK, &headers));
    }
}
