//! End-to-end tests of the request pipeline against a mock HTTP server.

use async_trait::async_trait;
use mockito::Matcher;
use ocxp_client::client::config::ResolvedOptions;
use ocxp_client::client::interceptors::{
    ErrorInterceptor, RequestInterceptor, ResponseInterceptor,
};
use ocxp_client::client::response::{RequestSnapshot, ResponseSnapshot};
use ocxp_client::client::transport::HttpTransport;
use ocxp_client::client::validation::{RequestValidator, ResponseTransformer, ResponseValidator};
use ocxp_client::{
    BodySerializer, Client, ClientConfig, Error, ParseAs, RequestOptions, RequestOutcome,
    ResponseData, ResponseStyle, SecurityScheme, StaticToken, TransportError,
};
use pretty_assertions::assert_eq;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

fn client_for(server: &mockito::ServerGuard) -> Client {
    Client::new(ClientConfig::new().base_url(format!("{}/api/", server.url())))
}

#[derive(Debug)]
struct RefusingTransport;

#[async_trait]
impl HttpTransport for RefusingTransport {
    async fn execute(
        &self,
        _request: reqwest::Request,
    ) -> Result<reqwest::Response, TransportError> {
        Err(TransportError::ConnectionClosed)
    }
}

struct TraceHeader;

#[async_trait]
impl RequestInterceptor for TraceHeader {
    async fn on_request(
        &self,
        mut request: reqwest::Request,
        _options: &ResolvedOptions,
    ) -> ocxp_client::Result<reqwest::Request> {
        request
            .headers_mut()
            .insert("x-trace", "t-1".parse().unwrap());
        Ok(request)
    }
}

#[derive(Default)]
struct StatusCounter {
    seen: AtomicUsize,
}

#[async_trait]
impl ResponseInterceptor for StatusCounter {
    async fn on_response(
        &self,
        response: reqwest::Response,
        _request: &RequestSnapshot,
        _options: &ResolvedOptions,
    ) -> ocxp_client::Result<reqwest::Response> {
        self.seen.fetch_add(1, Ordering::SeqCst);
        Ok(response)
    }
}

struct Suppress;

#[async_trait]
impl ErrorInterceptor for Suppress {
    async fn on_error(
        &self,
        _error: Error,
        _response: Option<&ResponseSnapshot>,
        _request: &RequestSnapshot,
        _options: &ResolvedOptions,
    ) -> Option<Error> {
        None
    }
}

/// Rewrites errors and records whether a response head was available.
#[derive(Default)]
struct Rewrite {
    had_response: AtomicUsize,
}

#[async_trait]
impl ErrorInterceptor for Rewrite {
    async fn on_error(
        &self,
        error: Error,
        response: Option<&ResponseSnapshot>,
        _request: &RequestSnapshot,
        _options: &ResolvedOptions,
    ) -> Option<Error> {
        if response.is_some() {
            self.had_response.fetch_add(1, Ordering::SeqCst);
        }
        Some(Error::validation(format!("rewritten: {}", error)))
    }
}

/// Counts every error it sees and passes it on unchanged.
#[derive(Default)]
struct CountErrors {
    seen: AtomicUsize,
}

#[async_trait]
impl ErrorInterceptor for CountErrors {
    async fn on_error(
        &self,
        error: Error,
        _response: Option<&ResponseSnapshot>,
        _request: &RequestSnapshot,
        _options: &ResolvedOptions,
    ) -> Option<Error> {
        self.seen.fetch_add(1, Ordering::SeqCst);
        Some(error)
    }
}

/// Rejects requests that carry no body.
struct RequireBody;

#[async_trait]
impl RequestValidator for RequireBody {
    async fn validate_request(&self, options: &ResolvedOptions) -> ocxp_client::Result<()> {
        match options.body {
            Some(_) => Ok(()),
            None => Err(Error::validation(format!("{} needs a body", options.template))),
        }
    }
}

struct RequireId;

#[async_trait]
impl ResponseValidator for RequireId {
    async fn validate_response(&self, data: &Value) -> ocxp_client::Result<()> {
        if data.get("id").is_some() {
            Ok(())
        } else {
            Err(Error::validation("missing id"))
        }
    }
}

struct Unwrap;

#[async_trait]
impl ResponseTransformer for Unwrap {
    async fn transform_response(&self, data: Value) -> ocxp_client::Result<Value> {
        Ok(data["data"].clone())
    }
}

#[tokio::test]
async fn get_with_path_query_and_bearer_token() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("GET", "/api/acme/missions/m%201")
        .match_query(Matcher::AllOf(vec![
            Matcher::UrlEncoded("limit".into(), "10".into()),
            Matcher::UrlEncoded("tag".into(), "a".into()),
        ]))
        .match_header("authorization", "Bearer s3cr3t")
        .match_header("content-type", Matcher::Missing)
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"success": true, "data": {"id": "m 1", "title": "Launch"}}"#)
        .create_async()
        .await;

    let client = client_for(&server);
    let outcome = client
        .get(
            RequestOptions::new("/{workspace}/missions/{id}")
                .path(json!({"workspace": "acme", "id": "m 1"}))
                .query(json!({"limit": 10, "tag": ["a"], "cursor": null}))
                .security(SecurityScheme::bearer())
                .auth(Arc::new(StaticToken::new("s3cr3t"))),
        )
        .await
        .unwrap();

    mock.assert_async().await;
    let result = outcome.into_fields().unwrap();
    assert!(result.error.is_none());
    assert_eq!(result.response.as_ref().unwrap().status.as_u16(), 200);

    let envelope = result.envelope::<Value>().unwrap();
    assert!(envelope.success);
    assert_eq!(envelope.into_result().unwrap().unwrap()["title"], "Launch");
}

#[tokio::test]
async fn protocol_error_is_returned_in_the_result() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("GET", "/api/missing")
        .with_status(404)
        .with_header("content-type", "application/json")
        .with_body(r#"{"error": {"code": "NOT_FOUND"}}"#)
        .create_async()
        .await;

    let outcome = client_for(&server)
        .get(RequestOptions::new("missing"))
        .await
        .unwrap();

    let result = outcome.into_fields().unwrap();
    assert!(result.data.is_none());
    assert_eq!(result.response.unwrap().status.as_u16(), 404);
    let error = result.error.unwrap();
    assert_eq!(error.status().unwrap().as_u16(), 404);
    assert_eq!(error.body().unwrap()["error"]["code"], "NOT_FOUND");
}

#[tokio::test]
async fn throw_on_error_returns_raw_text_bodies() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("DELETE", "/api/missions/1")
        .with_status(500)
        .with_body("upstream exploded")
        .create_async()
        .await;

    let err = client_for(&server)
        .delete(RequestOptions::new("/missions/1").throw_on_error(true))
        .await
        .unwrap_err();
    assert_eq!(err.body(), Some(&json!("upstream exploded")));
}

#[tokio::test]
async fn data_style_failure_yields_none() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("GET", "/api/x")
        .with_status(400)
        .create_async()
        .await;

    let outcome = client_for(&server)
        .get(RequestOptions::new("/x").response_style(ResponseStyle::Data))
        .await
        .unwrap();
    assert!(matches!(outcome, RequestOutcome::Data(None)));
}

#[tokio::test]
async fn no_content_parses_to_an_empty_object() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("PUT", "/api/missions/1")
        .match_body(r#"{"title":"New"}"#)
        .match_header("content-type", "application/json")
        .with_status(204)
        .create_async()
        .await;

    let outcome = client_for(&server)
        .put(
            RequestOptions::new("/missions/1")
                .body(json!({"title": "New"}))
                .parse_as(ParseAs::Json)
                .response_validator(Arc::new(RequireId)),
        )
        .await
        .unwrap();
    // Empty bodies skip the validator.
    assert_eq!(outcome.data().unwrap().as_json(), Some(&json!({})));
}

#[tokio::test]
async fn content_type_selects_the_parse_mode() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("GET", "/api/readme")
        .with_status(200)
        .with_header("content-type", "text/markdown; charset=utf-8")
        .with_body("# Title")
        .create_async()
        .await;
    server
        .mock("GET", "/api/logo")
        .with_status(200)
        .with_header("content-type", "image/png")
        .with_body([0x89u8, b'P', b'N', b'G'])
        .create_async()
        .await;

    let client = client_for(&server);
    let text = client.get(RequestOptions::new("/readme")).await.unwrap();
    assert_eq!(text.data().unwrap().as_text(), Some("# Title"));

    let blob = client.get(RequestOptions::new("/logo")).await.unwrap();
    assert_eq!(blob.data().unwrap().as_bytes().unwrap().as_ref(), b"\x89PNG");
}

#[tokio::test]
async fn form_bodies_and_header_overrides() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/api/login")
        .match_header("content-type", "application/x-www-form-urlencoded")
        .match_body("user=ada&scope=read&scope=write")
        .with_status(200)
        .with_header("content-type", "application/x-www-form-urlencoded")
        .with_body("session=abc&ttl=60")
        .create_async()
        .await;

    let outcome = client_for(&server)
        .post(
            RequestOptions::new("/login")
                .header("Content-Type", "application/x-www-form-urlencoded")
                .body_serializer(BodySerializer::FormUrlEncoded)
                .body(json!({"user": "ada", "scope": ["read", "write"]}))
                .parse_as(ParseAs::FormData),
        )
        .await
        .unwrap();

    mock.assert_async().await;
    let form = outcome.data().unwrap().as_form_data().unwrap();
    assert_eq!(form.get("session"), Some("abc"));
    assert_eq!(form.get("ttl"), Some("60"));
}

#[tokio::test]
async fn validator_and_transformer_run_on_json() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("GET", "/api/ok")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"id": "1", "data": [1, 2]}"#)
        .create_async()
        .await;
    server
        .mock("GET", "/api/bad")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"data": []}"#)
        .create_async()
        .await;

    let client = client_for(&server);
    let outcome = client
        .get(
            RequestOptions::new("/ok")
                .response_validator(Arc::new(RequireId))
                .response_transformer(Arc::new(Unwrap))
                .response_style(ResponseStyle::Data),
        )
        .await
        .unwrap();
    assert_eq!(outcome.into_data().unwrap().as_json(), Some(&json!([1, 2])));

    let err = client
        .get(RequestOptions::new("/bad").response_validator(Arc::new(RequireId)))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Validation(_)));
}

#[tokio::test]
async fn interceptors_run_in_order_and_can_be_ejected() {
    let mut server = mockito::Server::new_async().await;
    let traced = server
        .mock("GET", "/api/ping")
        .match_header("x-trace", "t-1")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body("{}")
        .expect(1)
        .create_async()
        .await;

    let client = client_for(&server);
    let counter = Arc::new(StatusCounter::default());
    let trace = client.interceptors().write().request.add(Arc::new(TraceHeader));
    client.interceptors().write().response.add(counter.clone());

    client.get(RequestOptions::new("/ping")).await.unwrap();
    traced.assert_async().await;

    client.interceptors().write().request.eject(trace);
    let untraced = server
        .mock("GET", "/api/ping")
        .match_header("x-trace", Matcher::Missing)
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body("{}")
        .create_async()
        .await;
    client.get(RequestOptions::new("/ping")).await.unwrap();
    untraced.assert_async().await;
    assert_eq!(counter.seen.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn transport_failures_reach_error_interceptors() {
    let client = Client::new(
        ClientConfig::new()
            .base_url("http://ocxp.invalid")
            .transport(Arc::new(RefusingTransport)),
    );
    let rewrite = Arc::new(Rewrite::default());
    client.interceptors().write().error.add(rewrite.clone());

    let result = client
        .get(RequestOptions::new("/anything"))
        .await
        .unwrap()
        .into_fields()
        .unwrap();
    assert!(result.response.is_none());
    assert_eq!(result.request.url.as_str(), "http://ocxp.invalid/anything");
    let error = result.error.unwrap();
    assert!(error.to_string().contains("rewritten"));
    assert_eq!(rewrite.had_response.load(Ordering::SeqCst), 0);

    let err = client
        .get(RequestOptions::new("/anything").throw_on_error(true))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Validation(_)));
}

#[tokio::test]
async fn suppressed_errors_become_unspecified() {
    let client = Client::new(
        ClientConfig::new()
            .base_url("http://ocxp.invalid")
            .transport(Arc::new(RefusingTransport))
            .throw_on_error(true),
    );
    client.interceptors().write().error.add(Arc::new(Suppress));

    let err = client.get(RequestOptions::new("/")).await.unwrap_err();
    assert!(matches!(err, Error::Unspecified));
}

#[tokio::test]
async fn existing_credentials_are_kept() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("GET", "/api/me")
        .match_header("authorization", "Bearer caller")
        .match_query(Matcher::UrlEncoded("api_key".into(), "k".into()))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body("{}")
        .create_async()
        .await;

    let client = Client::new(
        ClientConfig::new()
            .base_url(format!("{}/api", server.url()))
            .auth(Arc::new(StaticToken::new("configured"))),
    );
    client
        .get(
            RequestOptions::new("/me")
                .header("Authorization", "Bearer caller")
                .security(SecurityScheme::bearer())
                .security(SecurityScheme::api_key_query("api_key"))
                .query(json!({"api_key": "k"})),
        )
        .await
        .unwrap();
    mock.assert_async().await;
}

#[tokio::test]
async fn stream_mode_hands_back_the_body() {
    use futures::StreamExt;

    let mut server = mockito::Server::new_async().await;
    server
        .mock("GET", "/api/export")
        .with_status(200)
        .with_header("content-type", "application/octet-stream")
        .with_body("chunked-bytes")
        .create_async()
        .await;

    let outcome = client_for(&server)
        .get(RequestOptions::new("/export").parse_as(ParseAs::Stream))
        .await
        .unwrap();
    let Some(ResponseData::Stream(mut body)) = outcome.into_data() else {
        panic!("expected a stream");
    };
    let mut collected = Vec::new();
    while let Some(chunk) = body.next().await {
        collected.extend_from_slice(&chunk.unwrap());
    }
    assert_eq!(collected, b"chunked-bytes");
}

#[tokio::test]
async fn rejected_requests_are_never_sent() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/api/missions")
        .with_status(201)
        .with_header("content-type", "application/json")
        .with_body(r#"{"id": "m-1"}"#)
        .expect(1)
        .create_async()
        .await;

    let client = client_for(&server);
    let errors = Arc::new(CountErrors::default());
    client.interceptors().write().error.add(errors.clone());

    let err = client
        .post(RequestOptions::new("/missions").request_validator(Arc::new(RequireBody)))
        .await
        .unwrap_err();
    assert!(matches!(&err, Error::Validation(message) if message == "/missions needs a body"));
    assert_eq!(errors.seen.load(Ordering::SeqCst), 0);

    let outcome = client
        .post(
            RequestOptions::new("/missions")
                .body(json!({"title": "t"}))
                .request_validator(Arc::new(RequireBody)),
        )
        .await
        .unwrap();
    assert_eq!(outcome.data().and_then(|d| d.as_json()), Some(&json!({"id": "m-1"})));
    mock.assert_async().await;
    assert_eq!(errors.seen.load(Ordering::SeqCst), 0);
}
