//! Error types for the RPC protocol.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Error codes returned in RPC error responses.
///
/// These codes are stable and used for automation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// Malformed JSON, missing required fields, or invalid field values.
    InvalidRequest,
    /// Protocol version is outside the supported range.
    UnsupportedProtocol,
    /// Unknown operation requested.
    UnknownOperation,
    /// The run identifier is not known to the coordinator.
    RunNotFound,
    /// The caller may not read this run's logs.
    PermissionDenied,
    /// The response would exceed the negotiated maximum message size.
    MessageTooLarge,
    /// The coordinator is temporarily unable to serve; retry later.
    Unavailable,
}

impl ErrorCode {
    /// Whether a client may retry the same request after this error.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Unavailable)
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidRequest => write!(f, "INVALID_REQUEST"),
            Self::UnsupportedProtocol => write!(f, "UNSUPPORTED_PROTOCOL"),
            Self::UnknownOperation => write!(f, "UNKNOWN_OPERATION"),
            Self::RunNotFound => write!(f, "RUN_NOT_FOUND"),
            Self::PermissionDenied => write!(f, "PERMISSION_DENIED"),
            Self::MessageTooLarge => write!(f, "MESSAGE_TOO_LARGE"),
            Self::Unavailable => write!(f, "UNAVAILABLE"),
        }
    }
}

/// RPC error response payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcError {
    /// Error code from the registry.
    pub code: ErrorCode,
    /// Human-readable, single-line error message.
    pub message: String,
    /// Optional machine-readable details.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl RpcError {
    /// Create a new RPC error.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    /// Create a new RPC error with additional data.
    pub fn with_data(code: ErrorCode, message: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            code,
            message: message.into(),
            data: Some(data),
        }
    }

    /// Create an INVALID_REQUEST error.
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidRequest, message)
    }

    /// Create an UNSUPPORTED_PROTOCOL error.
    pub fn unsupported_protocol(version: i32, min: i32, max: i32) -> Self {
        Self::with_data(
            ErrorCode::UnsupportedProtocol,
            format!("protocol_version {} is outside supported range [{}, {}]", version, min, max),
            serde_json::json!({
                "requested": version,
                "min": min,
                "max": max
            }),
        )
    }

    /// Create a RUN_NOT_FOUND error.
    pub fn run_not_found(run_id: u64) -> Self {
        Self::with_data(
            ErrorCode::RunNotFound,
            format!("run {} not found", run_id),
            serde_json::json!({ "run_id": run_id }),
        )
    }

    /// Create a PERMISSION_DENIED error.
    pub fn permission_denied(run_id: u64) -> Self {
        Self::with_data(
            ErrorCode::PermissionDenied,
            format!("not permitted to read logs of run {}", run_id),
            serde_json::json!({ "run_id": run_id }),
        )
    }

    /// Create a MESSAGE_TOO_LARGE error.
    pub fn message_too_large(size: u64, max: u64) -> Self {
        Self::with_data(
            ErrorCode::MessageTooLarge,
            format!("message size {} exceeds maximum {}", size, max),
            serde_json::json!({ "size": size, "max_bytes": max }),
        )
    }

    /// Create an UNAVAILABLE error.
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Unavailable, message)
    }

    /// Read an unsigned integer field from `data`.
    pub fn data_u64(&self, key: &str) -> Option<u64> {
        self.data.as_ref().and_then(|d| d.get(key)).and_then(|v| v.as_u64())
    }
}

impl fmt::Display for RpcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for RpcError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_code_wire_names() {
        let json = serde_json::to_string(&ErrorCode::RunNotFound).unwrap();
        assert_eq!(json, "\"RUN_NOT_FOUND\"");
        assert_eq!(ErrorCode::MessageTooLarge.to_string(), "MESSAGE_TOO_LARGE");
    }

    #[test]
    fn test_only_unavailable_is_retryable() {
        assert!(ErrorCode::Unavailable.is_retryable());
        assert!(!ErrorCode::RunNotFound.is_retryable());
        assert!(!ErrorCode::MessageTooLarge.is_retryable());
    }

    #[test]
    fn test_message_too_large_data() {
        let err = RpcError::message_too_large(2048, 1024);
        assert_eq!(err.data_u64("size"), Some(2048));
        assert_eq!(err.data_u64("max_bytes"), Some(1024));
        assert_eq!(err.to_string(), "MESSAGE_TOO_LARGE: message size 2048 exceeds maximum 1024");
    }
}
