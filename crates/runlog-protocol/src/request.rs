//! RPC request types.

use serde::{Deserialize, Serialize};

/// Supported RPC operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    /// Returns protocol range, features and limits.
    /// MUST be sent with protocol_version 0.
    Probe,
    /// Returns the next chunk of a run's log.
    FetchLogs,
}

impl Operation {
    /// Returns true if this operation accepts protocol_version 0.
    pub fn accepts_version_zero(&self) -> bool {
        matches!(self, Operation::Probe)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Probe => "probe",
            Operation::FetchLogs => "fetch_logs",
        }
    }
}

/// RPC request envelope.
///
/// One request per frame; the client never has two in flight on a channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcRequest {
    /// Protocol version (selected after probe).
    /// For probe requests, this MUST be 0.
    pub protocol_version: i32,
    /// Operation to perform.
    pub op: Operation,
    /// Caller-chosen request ID for correlation.
    pub request_id: String,
    /// Operation-specific payload.
    #[serde(default)]
    pub payload: serde_json::Value,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operation_wire_names() {
        assert_eq!(serde_json::to_string(&Operation::FetchLogs).unwrap(), "\"fetch_logs\"");
        assert_eq!(Operation::FetchLogs.as_str(), "fetch_logs");
    }

    #[test]
    fn test_payload_defaults_to_null() {
        let req: RpcRequest = serde_json::from_str(
            r#"{"protocol_version":0,"op":"probe","request_id":"r1"}"#,
        )
        .unwrap();
        assert_eq!(req.op, Operation::Probe);
        assert!(req.payload.is_null());
    }
}
