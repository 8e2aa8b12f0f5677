//! runlog - remote run-log retrieval
//!
//! Fetches the accumulated log output of a run from a coordinator and
//! optionally follows it as new lines arrive, surviving channel drops.

pub mod cancel;
pub mod channel;
pub mod client;
pub mod config;
pub mod logging;
pub mod mock;
pub mod output;
pub mod signal;

pub use cancel::CancelToken;
pub use channel::{Channel, ChannelError, ChannelState, ConnectivityObserver, Session};
pub use client::{Backoff, FailureKind, FetchError, LogFetchClient, LogStream, ResumeMode};
pub use config::{ClientConfig, ConfigError, ConfigSources, LogsArgs, TransportKind};
pub use output::LogPrinter;
pub use runlog_protocol::ops::{FetchLogsRequest, FetchLogsResponse};
pub use runlog_protocol::RunId;
pub use signal::SignalHandler;
