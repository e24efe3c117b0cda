//! Per-request validation and transformation hooks.

use crate::client::config::ResolvedOptions;
use crate::error::Result;
use async_trait::async_trait;
use serde_json::Value;

#[cfg(feature = "validation")]
use crate::error::Error;
#[cfg(feature = "validation")]
use std::fmt;

/// Validates built request options before the body is serialized.
#[async_trait]
pub trait RequestValidator: Send + Sync {
    /// Reject the request by returning an error.
    async fn validate_request(&self, options: &ResolvedOptions) -> Result<()>;
}

/// Validates parsed JSON response data.
#[async_trait]
pub trait ResponseValidator: Send + Sync {
    /// Reject the data by returning an error.
    async fn validate_response(&self, data: &Value) -> Result<()>;
}

/// Rewrites parsed JSON response data after validation.
#[async_trait]
pub trait ResponseTransformer: Send + Sync {
    /// Produce the data handed to the caller.
    async fn transform_response(&self, data: Value) -> Result<Value>;
}

/// Response validator backed by a JSON Schema.
#[cfg(feature = "validation")]
pub struct JsonSchemaValidator {
    validator: jsonschema::Validator,
}

#[cfg(feature = "validation")]
impl JsonSchemaValidator {
    /// Compile a schema.
    pub fn new(schema: &Value) -> Result<Self> {
        let validator = jsonschema::validator_for(schema)
            .map_err(|e| Error::configuration(format!("Invalid JSON schema: {}", e)))?;
        Ok(Self { validator })
    }
}

#[cfg(feature = "validation")]
impl fmt::Debug for JsonSchemaValidator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JsonSchemaValidator").finish_non_exhaustive()
    }
}

#[cfg(feature = "validation")]
#[async_trait]
impl ResponseValidator for JsonSchemaValidator {
    async fn validate_response(&self, data: &Value) -> Result<()> {
        let errors: Vec<String> = self
            .validator
            .iter_errors(data)
            .map(|e| e.to_string())
            .collect();
        if errors.is_empty() {
            Ok(())
        } else {
            Err(Error::validation(errors.join("; ")))
        }
    }
}

#[cfg(all(test, feature = "validation"))]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn schema_validator_accepts_and_rejects() {
        let validator = JsonSchemaValidator::new(&json!({
            "type": "object",
            "required": ["id"],
            "properties": {"id": {"type": "string"}}
        }))
        .unwrap();

        assert!(validator.validate_response(&json!({"id": "m-1"})).await.is_ok());
        let err = validator.validate_response(&json!({"id": 5})).await.unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[test]
    fn invalid_schema_is_a_configuration_error() {
        let err = JsonSchemaValidator::new(&json!({"type": 12})).unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }
}
