//! Constants for HTTP headers and content types used by the OCXP client.

// Header Names
/// SSE Last-Event-ID header name for resumption
pub const LAST_EVENT_ID: &str = "last-event-id";

/// HTTP Authorization header name
pub const AUTHORIZATION: &str = "Authorization";

/// HTTP Cookie header name
pub const COOKIE: &str = "Cookie";

// Content Types
/// JSON content type value
pub const APPLICATION_JSON: &str = "application/json";

/// Multipart form content type value
pub const MULTIPART_FORM_DATA: &str = "multipart/form-data";

// WebSocket close codes
/// Normal closure; never triggers reconnection
pub const CLOSE_NORMAL: u16 = 1000;

/// Connection dropped without a close frame
pub const CLOSE_ABNORMAL: u16 = 1006;
