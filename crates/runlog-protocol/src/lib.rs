//! Runlog Protocol Types
//!
//! Defines the JSON RPC envelope and framing for client↔coordinator communication.

pub mod error;
pub mod frame;
pub mod ops;
pub mod request;
pub mod response;
pub mod run_id;

pub use error::{ErrorCode, RpcError};
pub use frame::{FrameError, FrameReader};
pub use request::{Operation, RpcRequest};
pub use response::{ResponseError, RpcResponse};
pub use run_id::{InvalidRunId, RunId};

/// Protocol version used for probe requests (sentinel value).
pub const PROTOCOL_VERSION_PROBE: i32 = 0;

/// Minimum protocol version supported by this implementation.
pub const PROTOCOL_MIN: i32 = 1;

/// Maximum protocol version supported by this implementation.
pub const PROTOCOL_MAX: i32 = 1;

/// Default upper bound for a single frame in either direction (512 MiB).
pub const DEFAULT_MAX_MESSAGE_BYTES: usize = 536_870_912;

/// Default coordinator endpoint.
pub const DEFAULT_COORDINATOR_ADDRESS: &str = "127.0.0.1:9093";

/// Feature names advertised in probe responses.
pub mod features {
    /// The coordinator serves `fetch_logs`.
    pub const FETCH_LOGS: &str = "fetch_logs";
    /// `fetch_logs` honors `cursor` and returns `next_cursor`.
    pub const CURSOR: &str = "cursor";
}
