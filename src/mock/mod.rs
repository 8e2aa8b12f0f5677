//! Mock Coordinator
//!
//! A configurable in-process coordinator for exercising the client without a
//! real coordinator process.
//!
//! # Usage Modes
//!
//! - **In-process**: [`MockTransport`] hands out connections that call the
//!   coordinator directly
//! - **TCP**: [`MockServer`] serves the coordinator over real framing on a
//!   local socket
//!
//! # Operations
//!
//! - `probe`: configurable protocol range, features and frame limit
//! - `fetch_logs`: paged log lines with decimal line-offset cursors
//!
//! Failures (coordinator errors, delays, dropped connections) are injected per
//! operation through [`FailureInjector`].

mod coordinator;
mod failure;
mod server;
mod transport;

use std::sync::{Arc, Mutex};

use crate::channel::{ChannelState, ConnectivityObserver};

pub use coordinator::{MockCoordinator, Reply};
pub use failure::{FailureConfig, FailureInjector};
pub use server::MockServer;
pub use transport::{MockConnection, MockTransport};

/// Observer that records every transition it sees
#[derive(Debug, Default)]
pub struct RecordingObserver {
    states: Mutex<Vec<ChannelState>>,
}

impl RecordingObserver {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn states(&self) -> Vec<ChannelState> {
        self.states.lock().map(|s| s.clone()).unwrap_or_default()
    }
}

impl ConnectivityObserver for RecordingObserver {
    fn on_state_change(&self, state: ChannelState) {
        if let Ok(mut states) = self.states.lock() {
            states.push(state);
        }
    }
}
