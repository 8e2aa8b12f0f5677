//! Operation-specific types.

pub mod fetch_logs;
pub mod probe;

pub use fetch_logs::{FetchLogsRequest, FetchLogsResponse};
pub use probe::ProbeResponse;
