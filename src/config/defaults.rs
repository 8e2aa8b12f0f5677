//! Built-in client defaults (layer 1)

use runlog_protocol::{DEFAULT_COORDINATOR_ADDRESS, DEFAULT_MAX_MESSAGE_BYTES};
use serde_json::{json, Value};

/// Connect + probe handshake window.
pub const CONNECT_TIMEOUT_MS: u64 = 10_000;

/// Upper bound on waiting for a single response.
pub const REQUEST_TIMEOUT_MS: u64 = 30_000;

/// Interval between follow-mode polls.
pub const POLL_INTERVAL_MS: u64 = 1_000;

/// Backoff floor after a transient failure.
pub const RETRY_INITIAL_DELAY_MS: u64 = 2_000;

/// Backoff cap.
pub const RETRY_MAX_DELAY_MS: u64 = 30_000;

/// Coordinator-side command speaking framed RPC on stdio.
pub const SSH_REMOTE_COMMAND: &str = "runlog-coordinator serve --stdio";

/// Built-in defaults as a mergeable layer.
pub fn builtin_layer() -> Value {
    json!({
        "address": DEFAULT_COORDINATOR_ADDRESS,
        "transport": "tcp",
        "max_message_bytes": DEFAULT_MAX_MESSAGE_BYTES,
        "connect_timeout_ms": CONNECT_TIMEOUT_MS,
        "request_timeout_ms": REQUEST_TIMEOUT_MS,
        "poll_interval_ms": POLL_INTERVAL_MS,
        "retry_initial_delay_ms": RETRY_INITIAL_DELAY_MS,
        "retry_max_delay_ms": RETRY_MAX_DELAY_MS,
        "max_reconnect_attempts": null,
        "ssh": {
            "user": "runlog",
            "port": 22,
            "connect_timeout_seconds": 10,
            "remote_command": SSH_REMOTE_COMMAND
        }
    })
}
