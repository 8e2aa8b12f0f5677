//! Coordinator replies.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::RpcError;
use crate::request::RpcRequest;

/// One reply from the coordinator.
///
/// A well-formed reply carries exactly one of `payload` (when `ok`) or
/// `error` (when not). [`RpcResponse::into_payload`] enforces that.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcResponse {
    /// Version the request was sent with; 0 for `probe`.
    pub protocol_version: i32,
    /// Identifies the request being answered.
    pub request_id: String,
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
}

/// Why a reply yielded no payload.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ResponseError {
    /// The coordinator reported a failure.
    #[error("coordinator error: {0}")]
    Remote(RpcError),
    /// `ok` disagrees with the fields present.
    #[error("malformed response: {0}")]
    Malformed(&'static str),
}

impl RpcResponse {
    /// Successful reply to `request`.
    pub fn success(request: &RpcRequest, payload: Value) -> Self {
        Self {
            protocol_version: request.protocol_version,
            request_id: request.request_id.clone(),
            ok: true,
            payload: Some(payload),
            error: None,
        }
    }

    /// Failed reply to `request`.
    pub fn failure(request: &RpcRequest, error: RpcError) -> Self {
        Self {
            protocol_version: request.protocol_version,
            request_id: request.request_id.clone(),
            ok: false,
            payload: None,
            error: Some(error),
        }
    }

    /// Whether this reply answers `request`.
    pub fn answers(&self, request: &RpcRequest) -> bool {
        self.request_id == request.request_id
    }

    /// Take the payload of a successful reply.
    pub fn into_payload(self) -> Result<Value, ResponseError> {
        match (self.ok, self.payload, self.error) {
            (true, Some(payload), None) => Ok(payload),
            (true, None, _) => Err(ResponseError::Malformed("ok reply without payload")),
            (true, Some(_), Some(_)) => Err(ResponseError::Malformed("ok reply carries an error")),
            (false, _, Some(error)) => Err(ResponseError::Remote(error)),
            (false, _, None) => Err(ResponseError::Malformed("failed reply without error details")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;
    use crate::request::Operation;
    use serde_json::json;

    fn fetch_request() -> RpcRequest {
        RpcRequest {
            protocol_version: 1,
            op: Operation::FetchLogs,
            request_id: "req-7".to_string(),
            payload: json!({"run_id": 7}),
        }
    }

    #[test]
    fn test_success_echoes_request() {
        let request = fetch_request();
        let response = RpcResponse::success(&request, json!({"log_lines": []}));

        assert!(response.answers(&request));
        assert_eq!(response.protocol_version, 1);
        assert_eq!(response.into_payload().unwrap(), json!({"log_lines": []}));
    }

    #[test]
    fn test_failure_yields_remote_error() {
        let response = RpcResponse::failure(&fetch_request(), RpcError::run_not_found(7));
        match response.into_payload() {
            Err(ResponseError::Remote(e)) => assert_eq!(e.code, ErrorCode::RunNotFound),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_inconsistent_replies_are_malformed() {
        let decode = |text: &str| serde_json::from_str::<RpcResponse>(text).unwrap().into_payload();

        assert!(matches!(
            decode(r#"{"protocol_version":1,"request_id":"r","ok":true}"#),
            Err(ResponseError::Malformed(_))
        ));
        assert!(matches!(
            decode(r#"{"protocol_version":1,"request_id":"r","ok":false}"#),
            Err(ResponseError::Malformed(_))
        ));
        assert!(matches!(
            decode(r#"{"protocol_version":1,"request_id":"r","ok":true,"payload":{},"error":{"code":"UNAVAILABLE","message":"x"}}"#),
            Err(ResponseError::Malformed(_))
        ));
    }

    #[test]
    fn test_wire_omits_absent_fields() {
        let response = RpcResponse::success(&fetch_request(), json!({}));
        let text = serde_json::to_string(&response).unwrap();
        assert!(!text.contains("\"error\""));
    }
}
