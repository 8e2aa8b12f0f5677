//! In-process transport backed by a [`MockCoordinator`]

use std::thread;
use std::time::{Duration, Instant};

use runlog_protocol::{RpcRequest, RpcResponse};

use super::coordinator::{MockCoordinator, Reply};
use crate::channel::transport::{Connection, Transport, TransportError};

/// Transport that dispatches requests straight to a mock coordinator
#[derive(Debug, Clone)]
pub struct MockTransport {
    coordinator: MockCoordinator,
    max_message_bytes: usize,
}

impl MockTransport {
    pub fn new(coordinator: MockCoordinator) -> Self {
        Self {
            coordinator,
            max_message_bytes: runlog_protocol::DEFAULT_MAX_MESSAGE_BYTES,
        }
    }
}

impl Transport for MockTransport {
    fn target(&self) -> String {
        "mock://coordinator".to_string()
    }

    fn connect(&self, _timeout: Duration) -> Result<Box<dyn Connection>, TransportError> {
        self.coordinator.accept_connection().map_err(TransportError::ConnectFailed)?;
        Ok(Box::new(MockConnection {
            coordinator: self.coordinator.clone(),
            pending: None,
            max_message_bytes: self.max_message_bytes,
            closed: false,
        }))
    }
}

enum Pending {
    Response { response: RpcResponse, ready_at: Instant },
    Disconnect,
}

/// One mock connection; replies are produced when the request is sent
pub struct MockConnection {
    coordinator: MockCoordinator,
    pending: Option<Pending>,
    max_message_bytes: usize,
    closed: bool,
}

impl MockConnection {
    fn check_size<T: serde::Serialize>(&self, message: &T) -> Result<(), TransportError> {
        let size = serde_json::to_vec(message)
            .map_err(|e| TransportError::Protocol(e.to_string()))?
            .len();
        if size > self.max_message_bytes {
            return Err(TransportError::MessageTooLarge {
                size,
                max: self.max_message_bytes,
            });
        }
        Ok(())
    }
}

impl Connection for MockConnection {
    fn send(&mut self, request: &RpcRequest) -> Result<(), TransportError> {
        if self.closed {
            return Err(TransportError::Closed);
        }
        self.check_size(request)?;

        self.pending = Some(match self.coordinator.handle_request(request) {
            Reply::Respond { response, delay } => Pending::Response {
                response,
                ready_at: Instant::now() + delay.unwrap_or_default(),
            },
            Reply::Disconnect => Pending::Disconnect,
        });
        Ok(())
    }

    fn recv(&mut self, timeout: Duration) -> Result<Option<RpcResponse>, TransportError> {
        if self.closed {
            return Err(TransportError::Closed);
        }

        let ready_at = match &self.pending {
            None => {
                thread::sleep(timeout);
                return Ok(None);
            }
            Some(Pending::Disconnect) => {
                self.pending = None;
                self.closed = true;
                return Err(TransportError::Closed);
            }
            Some(Pending::Response { ready_at, .. }) => *ready_at,
        };

        let wait = ready_at.saturating_duration_since(Instant::now());
        if wait > timeout {
            thread::sleep(timeout);
            return Ok(None);
        }
        thread::sleep(wait);

        match self.pending.take() {
            Some(Pending::Response { response, .. }) => {
                if let Err(e) = self.check_size(&response) {
                    self.closed = true;
                    return Err(e);
                }
                Ok(Some(response))
            }
            _ => Ok(None),
        }
    }

    fn set_max_message_bytes(&mut self, max_bytes: usize) {
        self.max_message_bytes = max_bytes;
    }

    fn close(&mut self) {
        self.closed = true;
        self.pending = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::FailureConfig;
    use runlog_protocol::Operation;
    use serde_json::json;

    fn fetch(run_id: u64) -> RpcRequest {
        RpcRequest {
            protocol_version: 1,
            op: Operation::FetchLogs,
            request_id: "req-1".to_string(),
            payload: json!({ "run_id": run_id }),
        }
    }

    #[test]
    fn test_delayed_reply_times_out_then_arrives() {
        let coordinator = MockCoordinator::new();
        coordinator.add_run(1, ["line"]);
        coordinator.inject(Operation::FetchLogs, FailureConfig::delay(Duration::from_millis(50)));
        let mut conn = MockTransport::new(coordinator).connect(Duration::from_secs(1)).unwrap();

        conn.send(&fetch(1)).unwrap();
        assert!(conn.recv(Duration::from_millis(5)).unwrap().is_none());
        let response = conn.recv(Duration::from_secs(1)).unwrap().unwrap();
        assert!(response.ok);
    }

    #[test]
    fn test_oversized_response_is_rejected() {
        let coordinator = MockCoordinator::new();
        coordinator.add_run(1, vec!["x".repeat(512)]);
        let mut conn = MockTransport::new(coordinator).connect(Duration::from_secs(1)).unwrap();
        conn.set_max_message_bytes(256);

        conn.send(&fetch(1)).unwrap();
        let err = conn.recv(Duration::from_secs(1)).unwrap_err();
        assert!(matches!(err, TransportError::MessageTooLarge { max: 256, .. }));
    }

    #[test]
    fn test_disconnect_closes_connection() {
        let coordinator = MockCoordinator::new();
        coordinator.add_run(1, ["line"]);
        coordinator.inject(Operation::FetchLogs, FailureConfig::disconnect());
        let mut conn = MockTransport::new(coordinator).connect(Duration::from_secs(1)).unwrap();

        conn.send(&fetch(1)).unwrap();
        assert!(matches!(conn.recv(Duration::from_secs(1)), Err(TransportError::Closed)));
        assert!(matches!(conn.send(&fetch(1)), Err(TransportError::Closed)));
    }

    #[test]
    fn test_unreachable_refuses_connect() {
        let coordinator = MockCoordinator::new();
        coordinator.set_reachable(false);
        let result = MockTransport::new(coordinator.clone()).connect(Duration::from_secs(1));
        assert!(matches!(result, Err(TransportError::ConnectFailed(_))));
        assert_eq!(coordinator.connections(), 0);
    }
}
