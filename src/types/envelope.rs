//! The OCXP response envelope.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Error block of a failed envelope.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EnvelopeError {
    /// Machine-readable error code
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    /// Human-readable message
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Additional details
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

/// Wrapper every OCXP API response is expected to use.
///
/// # Examples
///
/// ```rust
/// use ocxp_client::types::ApiEnvelope;
/// use serde_json::json;
///
/// let envelope: ApiEnvelope<Vec<String>> = serde_json::from_value(json!({
///     "success": true,
///     "data": ["m-1", "m-2"],
///     "meta": {"total": 2}
/// }))
/// .unwrap();
/// assert_eq!(envelope.into_result().unwrap(), Some(vec!["m-1".to_string(), "m-2".to_string()]));
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiEnvelope<T = Value> {
    /// Whether the call succeeded
    pub success: bool,
    /// Payload of a successful call
    #[serde(default = "Option::default", skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    /// Error of a failed call
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<EnvelopeError>,
    /// Paging and timing metadata
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<Value>,
    /// Side-channel notifications
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub notifications: Vec<Value>,
}

impl<T> ApiEnvelope<T> {
    /// Payload on success, error block on failure.
    pub fn into_result(self) -> std::result::Result<Option<T>, EnvelopeError> {
        if self.success {
            Ok(self.data)
        } else {
            Err(self.error.unwrap_or_default())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn failed_envelope_yields_its_error() {
        let envelope: ApiEnvelope = serde_json::from_value(json!({
            "success": false,
            "error": {"code": "NOT_FOUND", "message": "No such mission"}
        }))
        .unwrap();
        let err = envelope.into_result().unwrap_err();
        assert_eq!(err.code.as_deref(), Some("NOT_FOUND"));
        assert_eq!(err.message.as_deref(), Some("No such mission"));
    }

    #[test]
    fn failed_envelope_without_error_block() {
        let envelope: ApiEnvelope = serde_json::from_value(json!({"success": false})).unwrap();
        assert_eq!(envelope.into_result().unwrap_err(), EnvelopeError::default());
    }
}
