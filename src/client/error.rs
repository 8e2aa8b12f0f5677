//! Client-facing fetch errors

use runlog_protocol::{ErrorCode, RunId};

use crate::channel::{ChannelError, TransportError};

/// Failure kind for exit code mapping
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Coordinator unreachable or channel dropped (exit code 20)
    ChannelUnavailable = 20,
    /// Run unknown to the coordinator (exit code 30)
    InvalidRun = 30,
    /// Run exists but may not be read (exit code 31)
    PermissionDenied = 31,
    /// Frame over the negotiated limit (exit code 40)
    MessageTooLarge = 40,
    /// Malformed or mismatched exchange (exit code 50)
    Protocol = 50,
}

/// Terminal error yielded by a log stream
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FetchError {
    #[error("coordinator at {target} unavailable: {reason}")]
    ChannelUnavailable { target: String, reason: String },

    #[error("run {run_id} not found")]
    InvalidRun { run_id: RunId },

    #[error("permission denied for run {run_id}")]
    PermissionDenied { run_id: RunId },

    #[error("message of {size} bytes exceeds maximum message size {max}")]
    MessageTooLarge { size: u64, max: u64 },

    #[error("protocol error: {0}")]
    Protocol(String),
}

impl FetchError {
    /// Classify a channel error for `run_id`
    pub fn from_channel(error: ChannelError, target: &str, run_id: RunId) -> Self {
        let unavailable = |reason: String| Self::ChannelUnavailable {
            target: target.to_string(),
            reason,
        };

        match error {
            ChannelError::Transport(TransportError::MessageTooLarge { size, max }) => Self::MessageTooLarge {
                size: size as u64,
                max: max as u64,
            },
            ChannelError::Transport(TransportError::Protocol(message)) => Self::Protocol(message),
            ChannelError::Transport(e) => unavailable(e.to_string()),
            e @ (ChannelError::SetupTimeout(_) | ChannelError::RequestTimeout(_)) => unavailable(e.to_string()),
            ChannelError::Shutdown | ChannelError::Cancelled => unavailable("channel shut down".to_string()),
            ChannelError::Protocol(message) => Self::Protocol(message),
            ChannelError::Remote(e) => match e.code {
                ErrorCode::RunNotFound => Self::InvalidRun { run_id },
                ErrorCode::PermissionDenied => Self::PermissionDenied { run_id },
                ErrorCode::MessageTooLarge => Self::MessageTooLarge {
                    size: e.data_u64("size").unwrap_or_default(),
                    max: e.data_u64("max_bytes").unwrap_or_default(),
                },
                ErrorCode::Unavailable => unavailable(e.message),
                ErrorCode::InvalidRequest | ErrorCode::UnsupportedProtocol | ErrorCode::UnknownOperation => {
                    Self::Protocol(e.to_string())
                }
            },
        }
    }

    pub fn failure_kind(&self) -> FailureKind {
        match self {
            FetchError::ChannelUnavailable { .. } => FailureKind::ChannelUnavailable,
            FetchError::InvalidRun { .. } => FailureKind::InvalidRun,
            FetchError::PermissionDenied { .. } => FailureKind::PermissionDenied,
            FetchError::MessageTooLarge { .. } => FailureKind::MessageTooLarge,
            FetchError::Protocol(_) => FailureKind::Protocol,
        }
    }

    /// Get exit code for this error
    pub fn exit_code(&self) -> i32 {
        self.failure_kind() as i32
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use runlog_protocol::RpcError;
    use std::time::Duration;

    fn run(id: u64) -> RunId {
        RunId::try_from(id).unwrap()
    }

    #[test]
    fn test_remote_codes_map_to_kinds() {
        let err = FetchError::from_channel(ChannelError::Remote(RpcError::run_not_found(999)), "t", run(999));
        assert_eq!(err, FetchError::InvalidRun { run_id: run(999) });
        assert_eq!(err.exit_code(), 30);

        let err = FetchError::from_channel(ChannelError::Remote(RpcError::permission_denied(3)), "t", run(3));
        assert_eq!(err.failure_kind(), FailureKind::PermissionDenied);
        assert_eq!(err.exit_code(), 31);

        let err = FetchError::from_channel(ChannelError::Remote(RpcError::message_too_large(900, 512)), "t", run(1));
        assert_eq!(err, FetchError::MessageTooLarge { size: 900, max: 512 });
        assert_eq!(err.exit_code(), 40);
    }

    #[test]
    fn test_transport_failures_are_unavailable() {
        let err = FetchError::from_channel(TransportError::ConnectTimeout.into(), "10.0.0.5:9093", run(1));
        assert!(matches!(err, FetchError::ChannelUnavailable { ref target, .. } if target == "10.0.0.5:9093"));
        assert_eq!(err.exit_code(), 20);

        let err = FetchError::from_channel(ChannelError::SetupTimeout(Duration::from_secs(10)), "t", run(1));
        assert_eq!(err.failure_kind(), FailureKind::ChannelUnavailable);
    }

    #[test]
    fn test_oversize_frame_keeps_sizes() {
        let err = FetchError::from_channel(
            TransportError::MessageTooLarge { size: 2048, max: 1024 }.into(),
            "t",
            run(1),
        );
        assert_eq!(err.to_string(), "message of 2048 bytes exceeds maximum message size 1024");
    }

    #[test]
    fn test_protocol_errors() {
        let err = FetchError::from_channel(ChannelError::Protocol("bad frame".into()), "t", run(1));
        assert_eq!(err.exit_code(), 50);

        let err = FetchError::from_channel(
            ChannelError::Remote(RpcError::unsupported_protocol(2, 1, 1)),
            "t",
            run(1),
        );
        assert_eq!(err.failure_kind(), FailureKind::Protocol);
    }
}
