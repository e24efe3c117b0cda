//! Authentication helpers for OCXP clients.
//!
//! Security schemes declare where a credential goes (header, query parameter
//! or cookie) and how it is formatted. [`set_auth_params`] resolves tokens
//! through an [`AuthProvider`] and attaches them to an outgoing request.

use crate::error::{Error, Result};
use crate::shared::http_constants::{AUTHORIZATION, COOKIE};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use reqwest::header::{self, HeaderMap, HeaderName, HeaderValue};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use tracing::debug;

/// Kind of security scheme.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SchemeKind {
    /// HTTP authentication (`bearer`, `basic`)
    Http,
    /// API key passed verbatim
    ApiKey,
}

/// HTTP authentication scheme used to format a token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HttpScheme {
    /// `Bearer <token>`
    Bearer,
    /// `Basic <base64(token)>`
    Basic,
}

/// Where a credential is placed on the request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthLocation {
    /// Request header
    #[default]
    Header,
    /// Query parameter
    Query,
    /// `Cookie` header entry
    Cookie,
}

/// Declared security requirement of an endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityScheme {
    /// Scheme kind
    #[serde(rename = "type")]
    pub kind: SchemeKind,
    /// Token formatting for HTTP schemes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scheme: Option<HttpScheme>,
    /// Credential location
    #[serde(rename = "in", default)]
    pub location: AuthLocation,
    /// Header, query parameter or cookie name (defaults to `Authorization`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl SecurityScheme {
    /// `Authorization: Bearer <token>`
    pub fn bearer() -> Self {
        Self {
            kind: SchemeKind::Http,
            scheme: Some(HttpScheme::Bearer),
            location: AuthLocation::Header,
            name: None,
        }
    }

    /// `Authorization: Basic <base64(token)>`
    pub fn basic() -> Self {
        Self {
            kind: SchemeKind::Http,
            scheme: Some(HttpScheme::Basic),
            location: AuthLocation::Header,
            name: None,
        }
    }

    /// Raw API key in the named header.
    pub fn api_key_header(name: impl Into<String>) -> Self {
        Self::api_key(AuthLocation::Header, name)
    }

    /// Raw API key in the named query parameter.
    pub fn api_key_query(name: impl Into<String>) -> Self {
        Self::api_key(AuthLocation::Query, name)
    }

    /// Raw API key as the named cookie.
    pub fn api_key_cookie(name: impl Into<String>) -> Self {
        Self::api_key(AuthLocation::Cookie, name)
    }

    fn api_key(location: AuthLocation, name: impl Into<String>) -> Self {
        Self {
            kind: SchemeKind::ApiKey,
            scheme: None,
            location,
            name: Some(name.into()),
        }
    }

    /// Name the credential is stored under.
    pub fn effective_name(&self) -> &str {
        self.name.as_deref().unwrap_or(AUTHORIZATION)
    }

    /// Format a raw token for this scheme.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use ocxp_client::client::auth::SecurityScheme;
    ///
    /// assert_eq!(SecurityScheme::bearer().format_token("abc"), "Bearer abc");
    /// assert_eq!(SecurityScheme::basic().format_token("user:pass"), "Basic dXNlcjpwYXNz");
    /// assert_eq!(SecurityScheme::api_key_header("X-Key").format_token("abc"), "abc");
    /// ```
    pub fn format_token(&self, token: &str) -> String {
        match self.scheme {
            Some(HttpScheme::Bearer) => format!("Bearer {}", token),
            Some(HttpScheme::Basic) => format!("Basic {}", STANDARD.encode(token)),
            None => token.to_string(),
        }
    }
}

/// A trait for providing authentication tokens.
#[async_trait]
pub trait AuthProvider: Send + Sync + fmt::Debug {
    /// Returns the raw token for `scheme`, or `None` when no credential is available.
    async fn get_access_token(&self, scheme: &SecurityScheme) -> Result<Option<String>>;
}

/// Auth provider returning the same token for every scheme.
#[derive(Clone)]
pub struct StaticToken(String);

impl StaticToken {
    /// Create a static token provider.
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }
}

impl fmt::Debug for StaticToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("StaticToken").field(&"<redacted>").finish()
    }
}

#[async_trait]
impl AuthProvider for StaticToken {
    async fn get_access_token(&self, _scheme: &SecurityScheme) -> Result<Option<String>> {
        Ok(Some(self.0.clone()))
    }
}

fn credential_present(headers: &HeaderMap, query: &Map<String, Value>, name: &str) -> bool {
    if headers.contains_key(name) {
        return true;
    }
    match query.get(name) {
        None | Some(Value::Null) => {},
        Some(Value::String(s)) if s.is_empty() => {},
        Some(_) => return true,
    }
    let cookie_entry = format!("{}=", name);
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .any(|cookie| cookie.contains(&cookie_entry))
}

/// Attach credentials for every declared security scheme.
///
/// A scheme whose target location already carries a value under its name is
/// skipped; existing credentials are never overwritten. Query credentials set
/// the named parameter, cookie credentials append a `Cookie` entry, and header
/// credentials set the named header.
pub async fn set_auth_params(
    security: &[SecurityScheme],
    headers: &mut HeaderMap,
    query: &mut Map<String, Value>,
    provider: Option<&dyn AuthProvider>,
) -> Result<()> {
    for scheme in security {
        let name = scheme.effective_name();
        if credential_present(headers, query, name) {
            debug!("Credential '{}' already present, skipping", name);
            continue;
        }

        let Some(provider) = provider else {
            continue;
        };
        let token = match provider.get_access_token(scheme).await? {
            Some(token) if !token.is_empty() => token,
            _ => continue,
        };
        let value = scheme.format_token(&token);

        match scheme.location {
            AuthLocation::Query => {
                query.insert(name.to_string(), Value::String(value));
            },
            AuthLocation::Cookie => {
                let cookie = HeaderValue::from_str(&format!("{}={}", name, value))
                    .map_err(|e| Error::configuration(format!("Invalid cookie value: {}", e)))?;
                headers.append(header::COOKIE, cookie);
            },
            AuthLocation::Header => {
                let header_name = HeaderName::from_bytes(name.as_bytes())
                    .map_err(|e| Error::configuration(format!("Invalid header name: {}", e)))?;
                let header_value = HeaderValue::from_str(&value)
                    .map_err(|e| Error::configuration(format!("Invalid header value: {}", e)))?;
                headers.insert(header_name, header_value);
            },
        }
    }

    Ok(())
}
