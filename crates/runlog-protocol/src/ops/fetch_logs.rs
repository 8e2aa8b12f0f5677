//! Fetch-logs operation types.
//!
//! Cursor-based retrieval of a run's accumulated log lines.

use serde::{Deserialize, Serialize};

use crate::run_id::RunId;

/// Fetch-logs request payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FetchLogsRequest {
    /// The run whose log is requested.
    pub run_id: RunId,
    /// Cursor from a previous response (absent to start from the beginning).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cursor: Option<String>,
}

/// Fetch-logs response payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FetchLogsResponse {
    /// The run these lines belong to.
    pub run_id: RunId,
    /// Log lines in production order.
    #[serde(default)]
    pub log_lines: Vec<String>,
    /// Resumption point for the next request.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<String>,
    /// More lines are already available beyond this chunk.
    #[serde(default)]
    pub has_more: bool,
}

impl FetchLogsResponse {
    pub fn is_empty(&self) -> bool {
        self.log_lines.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_omits_absent_cursor() {
        let req = FetchLogsRequest {
            run_id: RunId::try_from(42u64).unwrap(),
            cursor: None,
        };
        assert_eq!(serde_json::to_value(&req).unwrap(), json!({"run_id": 42}));
    }

    #[test]
    fn test_response_defaults() {
        let res: FetchLogsResponse = serde_json::from_value(json!({"run_id": 3})).unwrap();
        assert!(res.is_empty());
        assert!(res.next_cursor.is_none());
        assert!(!res.has_more);
    }
}
