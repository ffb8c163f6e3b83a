//! Error Types for VIGIL API
//!
//! This module defines error handling for the API layer, including:
//! - ApiError struct for structured error responses
//! - ErrorCode enum for categorizing errors
//! - IntoResponse implementation for Axum HTTP responses
//!
//! Every error is rendered as a JSON object with `success: false`, a
//! machine-readable `code`, a human-readable `error`, and any route-specific
//! empty payload fields flattened alongside.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use vigil_core::{ConfigError, ConnectionError, ResolveError, UpstreamError, VigilError};

// ============================================================================
// ERROR CODE ENUM
// ============================================================================

/// Error codes for API responses.
///
/// Each error code maps to a specific HTTP status code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // ========================================================================
    // Client Errors (400, 404)
    // ========================================================================
    /// Request contains invalid input data
    InvalidInput,

    /// Requested artifact does not exist
    ArtifactNotFound,

    // ========================================================================
    // Upstream Errors (502, 503, 504)
    // ========================================================================
    /// An upstream call failed or returned something unusable
    UpstreamUnavailable,

    /// An upstream call exceeded its deadline
    UpstreamTimeout,

    /// The service cannot reach its upstream at all
    ServiceUnavailable,

    // ========================================================================
    // Server Errors (500)
    // ========================================================================
    /// Configuration is missing or invalid
    InvalidConfiguration,

    /// Unexpected internal error
    InternalError,
}

impl ErrorCode {
    /// Get the HTTP status code for this error code.
    pub fn status_code(&self) -> StatusCode {
        match self {
            ErrorCode::InvalidInput => StatusCode::BAD_REQUEST,
            ErrorCode::ArtifactNotFound => StatusCode::NOT_FOUND,
            ErrorCode::UpstreamUnavailable => StatusCode::BAD_GATEWAY,
            ErrorCode::UpstreamTimeout => StatusCode::GATEWAY_TIMEOUT,
            ErrorCode::ServiceUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            ErrorCode::InvalidConfiguration | ErrorCode::InternalError => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Get a default message for this error code.
    pub fn default_message(&self) -> &'static str {
        match self {
            ErrorCode::InvalidInput => "Invalid input",
            ErrorCode::ArtifactNotFound => "Artifact not found",
            ErrorCode::UpstreamUnavailable => "Upstream request failed",
            ErrorCode::UpstreamTimeout => "Upstream request timed out",
            ErrorCode::ServiceUnavailable => "Service temporarily unavailable",
            ErrorCode::InvalidConfiguration => "Invalid configuration",
            ErrorCode::InternalError => "Internal server error",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

// ============================================================================
// API ERROR STRUCT
// ============================================================================

/// Structured API error.
///
/// `details`, when it is a JSON object, is merged into the top level of the
/// response body so a failed route still carries its empty payload fields
/// (`tx_logs: []`, `images: []`, ...).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ApiError {
    pub code: ErrorCode,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

impl ApiError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
        }
    }

    pub fn from_code(code: ErrorCode) -> Self {
        Self::new(code, code.default_message())
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn status_code(&self) -> StatusCode {
        self.code.status_code()
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidInput, message)
    }

    pub fn artifact_not_found(name: impl fmt::Display) -> Self {
        Self::new(
            ErrorCode::ArtifactNotFound,
            format!("Image {} not found", name),
        )
    }

    pub fn upstream(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::UpstreamUnavailable, message)
    }

    pub fn service_unavailable(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ServiceUnavailable, message)
    }

    pub fn invalid_configuration(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidConfiguration, message)
    }

    pub fn internal_error(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InternalError, message)
    }

    /// The JSON body sent to clients.
    pub fn body(&self) -> Value {
        let mut body = Map::new();
        body.insert("success".to_string(), Value::Bool(false));
        body.insert("code".to_string(), Value::String(self.code.to_string()));
        body.insert("error".to_string(), Value::String(self.message.clone()));

        match &self.details {
            Some(Value::Object(extra)) => {
                for (key, value) in extra {
                    body.entry(key.clone()).or_insert_with(|| value.clone());
                }
            }
            Some(other) => {
                body.insert("details".to_string(), other.clone());
            }
            None => {}
        }
        Value::Object(body)
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for ApiError {}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::warn!(code = %self.code, error = %self.message, "Request failed");
        } else {
            tracing::debug!(code = %self.code, error = %self.message, "Request rejected");
        }
        (status, Json(self.body())).into_response()
    }
}

// ============================================================================
// CONVERSIONS
// ============================================================================

impl From<UpstreamError> for ApiError {
    fn from(err: UpstreamError) -> Self {
        let code = if err.is_timeout() {
            ErrorCode::UpstreamTimeout
        } else {
            ErrorCode::UpstreamUnavailable
        };
        Self::new(code, err.to_string())
    }
}

impl From<ResolveError> for ApiError {
    fn from(err: ResolveError) -> Self {
        match err {
            ResolveError::NotFound { name } => Self::artifact_not_found(name),
            ResolveError::InvalidName { .. } => Self::invalid_input(err.to_string()),
            ResolveError::Io { .. } => Self::internal_error(err.to_string()),
            ResolveError::Upstream(inner) => inner.into(),
        }
    }
}

impl From<ConnectionError> for ApiError {
    fn from(err: ConnectionError) -> Self {
        match err {
            ConnectionError::InvalidEndpoint { .. } => Self::invalid_configuration(err.to_string()),
            ConnectionError::RetriesExhausted { .. } => Self::service_unavailable(err.to_string()),
        }
    }
}

impl From<ConfigError> for ApiError {
    fn from(err: ConfigError) -> Self {
        Self::invalid_configuration(err.to_string())
    }
}

impl From<VigilError> for ApiError {
    fn from(err: VigilError) -> Self {
        match err {
            VigilError::Upstream(e) => e.into(),
            VigilError::Connection(e) => e.into(),
            VigilError::Resolve(e) => e.into(),
            VigilError::Config(e) => e.into(),
        }
    }
}

/// Result type for API operations.
pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;

    #[test]
    fn test_error_code_status_mapping() {
        assert_eq!(ErrorCode::InvalidInput.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(ErrorCode::ArtifactNotFound.status_code(), StatusCode::NOT_FOUND);
        assert_eq!(ErrorCode::UpstreamUnavailable.status_code(), StatusCode::BAD_GATEWAY);
        assert_eq!(ErrorCode::UpstreamTimeout.status_code(), StatusCode::GATEWAY_TIMEOUT);
        assert_eq!(
            ErrorCode::ServiceUnavailable.status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            ErrorCode::InternalError.status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_error_code_serializes_screaming_snake() {
        let value = serde_json::to_value(ErrorCode::ArtifactNotFound).unwrap();
        assert_eq!(value, json!("ARTIFACT_NOT_FOUND"));
    }

    #[test]
    fn test_body_flattens_details() {
        let err = ApiError::upstream("node unreachable").with_details(json!({
            "anomaly_count": 0,
            "tx_logs": [],
            "cached": false,
        }));
        let body = err.body();
        assert_eq!(body["success"], json!(false));
        assert_eq!(body["code"], json!("UpstreamUnavailable"));
        assert_eq!(body["error"], json!("node unreachable"));
        assert_eq!(body["anomaly_count"], json!(0));
        assert_eq!(body["tx_logs"], json!([]));
        assert!(body.get("details").is_none());
    }

    #[test]
    fn test_details_cannot_override_envelope() {
        let err = ApiError::upstream("boom").with_details(json!({"success": true}));
        assert_eq!(err.body()["success"], json!(false));
    }

    #[test]
    fn test_upstream_timeout_maps_to_504() {
        let err: ApiError = UpstreamError::timeout("getAnomalyCount", Duration::from_secs(10)).into();
        assert_eq!(err.code, ErrorCode::UpstreamTimeout);
        assert_eq!(err.status_code(), StatusCode::GATEWAY_TIMEOUT);

        let err: ApiError = UpstreamError::transport("getAnomalyCount", "reset").into();
        assert_eq!(err.status_code(), StatusCode::BAD_GATEWAY);
    }

    #[test]
    fn test_resolve_errors_map_to_client_statuses() {
        let err: ApiError = ResolveError::not_found("missing.jpg").into();
        assert_eq!(err.status_code(), StatusCode::NOT_FOUND);
        assert!(err.message.contains("missing.jpg"));

        let err: ApiError = ResolveError::InvalidName {
            name: "../x.jpg".to_string(),
            reason: "path separator".to_string(),
        }
        .into();
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_connection_error_is_unavailable() {
        let err: ApiError = ConnectionError::RetriesExhausted {
            endpoint: "http://node".to_string(),
            attempts: 5,
            last_error: "refused".to_string(),
        }
        .into();
        assert_eq!(err.status_code(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
