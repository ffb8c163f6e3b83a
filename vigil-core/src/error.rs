//! Error types for VIGIL operations

use std::time::Duration;
use thiserror::Error;

/// A single upstream call failed after a connection was established.
///
/// Recoverable: the failure is surfaced to the caller of that call and the
/// next poll is free to retry. Cloneable so that callers waiting on a shared
/// cache refresh can all receive the same outcome.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum UpstreamError {
    #[error("Transport error during {operation}: {reason}")]
    Transport { operation: String, reason: String },

    #[error("{operation} timed out after {timeout:?}")]
    Timeout { operation: String, timeout: Duration },

    #[error("Upstream returned HTTP {status} for {operation}")]
    Status { operation: String, status: u16 },

    #[error("RPC error {code} during {operation}: {message}")]
    Rpc {
        operation: String,
        code: i64,
        message: String,
    },

    #[error("Upstream rejected {operation}: {reason}")]
    Rejected { operation: String, reason: String },

    #[error("Failed to decode {operation} response: {reason}")]
    Decode { operation: String, reason: String },

    #[error("I/O error during {operation}: {reason}")]
    Io { operation: String, reason: String },

    #[error("Upstream connection closed")]
    Closed,
}

impl UpstreamError {
    pub fn transport(operation: impl Into<String>, reason: impl ToString) -> Self {
        Self::Transport {
            operation: operation.into(),
            reason: reason.to_string(),
        }
    }

    pub fn timeout(operation: impl Into<String>, timeout: Duration) -> Self {
        Self::Timeout {
            operation: operation.into(),
            timeout,
        }
    }

    pub fn decode(operation: impl Into<String>, reason: impl ToString) -> Self {
        Self::Decode {
            operation: operation.into(),
            reason: reason.to_string(),
        }
    }

    pub fn io(operation: impl Into<String>, reason: impl ToString) -> Self {
        Self::Io {
            operation: operation.into(),
            reason: reason.to_string(),
        }
    }

    /// Timeouts propagate like any other upstream failure but are labelled
    /// separately in responses and metrics.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

/// The connector exhausted its retries. Fatal at startup.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConnectionError {
    #[error("Invalid endpoint {endpoint}: {reason}")]
    InvalidEndpoint { endpoint: String, reason: String },

    #[error("Failed to connect to {endpoint} after {attempts} attempts: {last_error}")]
    RetriesExhausted {
        endpoint: String,
        attempts: u32,
        last_error: String,
    },
}

/// Artifact resolution errors.
///
/// `NotFound` is an expected outcome rather than a fault; callers report it
/// as a structured result and do not log it as an error.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ResolveError {
    #[error("Artifact not found: {name}")]
    NotFound { name: String },

    #[error("Invalid artifact name {name:?}: {reason}")]
    InvalidName { name: String, reason: String },

    #[error("Failed to read artifact {name}: {reason}")]
    Io { name: String, reason: String },

    #[error(transparent)]
    Upstream(#[from] UpstreamError),
}

impl ResolveError {
    pub fn not_found(name: impl Into<String>) -> Self {
        Self::NotFound { name: name.into() }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required configuration field: {field}")]
    MissingRequired { field: String },

    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },
}

/// Master error type for VIGIL operations.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum VigilError {
    #[error(transparent)]
    Upstream(#[from] UpstreamError),

    #[error(transparent)]
    Connection(#[from] ConnectionError),

    #[error(transparent)]
    Resolve(#[from] ResolveError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Result type for VIGIL operations.
pub type VigilResult<T> = Result<T, VigilError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upstream_error_display() {
        let err = UpstreamError::timeout("getAnomalyCount", Duration::from_secs(10));
        assert!(err.is_timeout());
        assert_eq!(err.to_string(), "getAnomalyCount timed out after 10s");

        let err = UpstreamError::transport("eth_call", "connection refused");
        assert!(!err.is_timeout());
        assert!(err.to_string().contains("connection refused"));
    }

    #[test]
    fn test_resolve_error_wraps_upstream() {
        let err: ResolveError = UpstreamError::Closed.into();
        assert!(!err.is_not_found());
        assert_eq!(err.to_string(), "Upstream connection closed");
        assert!(ResolveError::not_found("a.jpg").is_not_found());
    }

    #[test]
    fn test_vigil_error_conversions() {
        let err: VigilError = ConnectionError::RetriesExhausted {
            endpoint: "ws://node".to_string(),
            attempts: 3,
            last_error: "refused".to_string(),
        }
        .into();
        assert!(matches!(err, VigilError::Connection(_)));
        assert!(err.to_string().contains("after 3 attempts"));
    }
}
