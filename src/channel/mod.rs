//! Coordinator channel
//!
//! A [`Channel`] owns at most one transport connection at a time and drives
//! the connectivity state machine:
//!
//! ```text
//! IDLE -> CONNECTING -> READY
//! CONNECTING | READY --(transport error)--> TRANSIENT_FAILURE -> CONNECTING ...
//! any --(shutdown)--> SHUTDOWN
//! ```
//!
//! Reaching READY means the transport connected and the `probe` handshake
//! negotiated a protocol version. Every transition is logged at debug level
//! and reported to subscribed [`ConnectivityObserver`]s. Observers are held
//! weakly and never influence retrieval.

pub mod transport;

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use runlog_protocol::ops::ProbeResponse;
use runlog_protocol::{
    features, Operation, ResponseError, RpcError, RpcRequest, PROTOCOL_MAX, PROTOCOL_MIN, PROTOCOL_VERSION_PROBE,
};
use serde_json::{json, Value};
use tracing::{debug, info};

use crate::cancel::CancelToken;

pub use transport::{Connection, Transport, TransportError};

/// Longest uninterrupted wait inside the channel; bounds cancellation latency.
pub const CANCEL_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Connectivity state of a channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelState {
    Idle,
    Connecting,
    Ready,
    TransientFailure,
    Shutdown,
}

impl fmt::Display for ChannelState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "IDLE"),
            Self::Connecting => write!(f, "CONNECTING"),
            Self::Ready => write!(f, "READY"),
            Self::TransientFailure => write!(f, "TRANSIENT_FAILURE"),
            Self::Shutdown => write!(f, "SHUTDOWN"),
        }
    }
}

/// Receives channel state transitions
pub trait ConnectivityObserver: Send + Sync {
    fn on_state_change(&self, state: ChannelState);
}

impl<F> ConnectivityObserver for F
where
    F: Fn(ChannelState) + Send + Sync,
{
    fn on_state_change(&self, state: ChannelState) {
        self(state)
    }
}

/// Channel errors
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("channel did not become ready within {0:?}")]
    SetupTimeout(Duration),

    #[error("no response within {0:?}")]
    RequestTimeout(Duration),

    #[error("coordinator error: {0}")]
    Remote(RpcError),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("channel shut down")]
    Shutdown,

    #[error("cancelled")]
    Cancelled,
}

impl ChannelError {
    /// Whether reconnecting and retrying may succeed
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport(e) => e.is_transient(),
            Self::SetupTimeout(_) | Self::RequestTimeout(_) => true,
            Self::Remote(e) => e.code.is_retryable(),
            Self::Protocol(_) | Self::Shutdown | Self::Cancelled => false,
        }
    }
}

/// What the probe handshake agreed on
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub protocol_version: i32,
    /// Effective frame limit: the smaller of ours and the coordinator's
    pub max_message_bytes: usize,
    pub features: Vec<String>,
}

impl Session {
    pub fn has_feature(&self, name: &str) -> bool {
        self.features.iter().any(|f| f == name)
    }
}

/// A connectivity-managed link to the coordinator
pub struct Channel {
    transport: Arc<dyn Transport>,
    connection: Option<Box<dyn Connection>>,
    session: Option<Session>,
    state: ChannelState,
    observers: Vec<Weak<dyn ConnectivityObserver>>,
    max_message_bytes: usize,
    request_counter: AtomicU64,
}

impl Channel {
    pub fn new(transport: Arc<dyn Transport>, max_message_bytes: usize) -> Self {
        Self {
            transport,
            connection: None,
            session: None,
            state: ChannelState::Idle,
            observers: Vec::new(),
            max_message_bytes,
            request_counter: AtomicU64::new(0),
        }
    }

    /// Report future transitions to `observer` without keeping it alive
    pub fn subscribe(&mut self, observer: &Arc<dyn ConnectivityObserver>) {
        self.observers.push(Arc::downgrade(observer));
    }

    pub fn state(&self) -> ChannelState {
        self.state
    }

    pub fn target(&self) -> String {
        self.transport.target()
    }

    /// Connect and handshake unless already READY
    pub fn ensure_ready(&mut self, window: Duration, cancel: &CancelToken) -> Result<&Session, ChannelError> {
        if self.state == ChannelState::Shutdown {
            return Err(ChannelError::Shutdown);
        }
        if self.state == ChannelState::Ready && self.connection.is_some() {
            return self.session.as_ref().ok_or(ChannelError::Shutdown);
        }
        if cancel.is_cancelled() {
            return Err(ChannelError::Cancelled);
        }

        self.set_state(ChannelState::Connecting);
        let deadline = deadline_after(window);

        let connection = match self.transport.connect(window) {
            Ok(connection) => connection,
            Err(e) => return Err(self.fail(e.into())),
        };
        self.connection = Some(connection);

        match self.handshake(deadline, window, cancel) {
            Ok(session) => {
                debug!(
                    endpoint = %self.transport.target(),
                    protocol_version = session.protocol_version,
                    max_message_bytes = session.max_message_bytes,
                    "channel ready"
                );
                if let Some(connection) = self.connection.as_mut() {
                    connection.set_max_message_bytes(session.max_message_bytes);
                }
                self.session = Some(session);
                self.set_state(ChannelState::Ready);
                self.session.as_ref().ok_or(ChannelError::Shutdown)
            }
            Err(e) => Err(self.fail(e)),
        }
    }

    /// Send one request and wait for its response payload
    pub fn call(
        &mut self,
        op: Operation,
        payload: Value,
        timeout: Duration,
        cancel: &CancelToken,
    ) -> Result<Value, ChannelError> {
        let version = match (&self.session, self.state) {
            (Some(session), ChannelState::Ready) => session.protocol_version,
            (_, ChannelState::Shutdown) => return Err(ChannelError::Shutdown),
            _ => return Err(ChannelError::Protocol("channel is not ready".to_string())),
        };

        let request = RpcRequest {
            protocol_version: version,
            op,
            request_id: self.next_request_id(),
            payload,
        };

        match self.exchange(&request, deadline_after(timeout), timeout, cancel) {
            Ok(payload) => Ok(payload),
            Err(e) => Err(self.fail(e)),
        }
    }

    /// Release the connection. Idempotent.
    pub fn shutdown(&mut self) {
        if let Some(mut connection) = self.connection.take() {
            connection.close();
        }
        self.session = None;
        if self.state != ChannelState::Shutdown {
            info!(endpoint = %self.transport.target(), "channel released");
        }
        self.set_state(ChannelState::Shutdown);
    }

    fn handshake(&mut self, deadline: Instant, window: Duration, cancel: &CancelToken) -> Result<Session, ChannelError> {
        let request = RpcRequest {
            protocol_version: PROTOCOL_VERSION_PROBE,
            op: Operation::Probe,
            request_id: self.next_request_id(),
            payload: json!({}),
        };

        let payload = self.exchange(&request, deadline, window, cancel).map_err(|e| match e {
            ChannelError::RequestTimeout(_) => ChannelError::SetupTimeout(window),
            other => other,
        })?;

        let probe: ProbeResponse = serde_json::from_value(payload)
            .map_err(|e| ChannelError::Protocol(format!("invalid probe response: {}", e)))?;

        let protocol_version = probe.negotiate(PROTOCOL_MIN, PROTOCOL_MAX).ok_or_else(|| {
            ChannelError::Protocol(format!(
                "no common protocol version: client [{}, {}] vs coordinator [{}, {}]",
                PROTOCOL_MIN, PROTOCOL_MAX, probe.protocol_min, probe.protocol_max
            ))
        })?;

        if !probe.has_feature(features::FETCH_LOGS) {
            return Err(ChannelError::Protocol("coordinator does not serve fetch_logs".to_string()));
        }

        let max_message_bytes = probe
            .max_message_bytes
            .map(|theirs| usize::try_from(theirs).unwrap_or(usize::MAX).min(self.max_message_bytes))
            .unwrap_or(self.max_message_bytes);

        Ok(Session {
            protocol_version,
            max_message_bytes,
            features: probe.features,
        })
    }

    fn exchange(
        &mut self,
        request: &RpcRequest,
        deadline: Instant,
        timeout: Duration,
        cancel: &CancelToken,
    ) -> Result<Value, ChannelError> {
        let connection = self.connection.as_mut().ok_or(ChannelError::Shutdown)?;
        connection.send(request)?;

        let response = loop {
            if cancel.is_cancelled() {
                return Err(ChannelError::Cancelled);
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(ChannelError::RequestTimeout(timeout));
            }
            if let Some(response) = connection.recv(remaining.min(CANCEL_POLL_INTERVAL))? {
                break response;
            }
        };

        // A response that arrived together with cancellation is discarded
        if cancel.is_cancelled() {
            return Err(ChannelError::Cancelled);
        }

        if !response.answers(request) {
            return Err(ChannelError::Protocol(format!(
                "response request_id '{}' does not match '{}'",
                response.request_id, request.request_id
            )));
        }

        response.into_payload().map_err(|e| match e {
            ResponseError::Remote(error) => ChannelError::Remote(error),
            ResponseError::Malformed(reason) => {
                ChannelError::Protocol(format!("{} response: {}", request.op.as_str(), reason))
            }
        })
    }

    /// Record a failed exchange and pass the error through.
    ///
    /// Transport-level failures drop the connection; coordinator-reported
    /// errors leave a healthy connection in place.
    fn fail(&mut self, error: ChannelError) -> ChannelError {
        match &error {
            ChannelError::Remote(_) => {}
            ChannelError::Cancelled => self.shutdown(),
            _ => {
                if let Some(mut connection) = self.connection.take() {
                    connection.close();
                }
                self.session = None;
                if self.state != ChannelState::Shutdown {
                    self.set_state(ChannelState::TransientFailure);
                }
            }
        }
        error
    }

    fn set_state(&mut self, state: ChannelState) {
        if self.state == state {
            return;
        }
        debug!(from = %self.state, to = %state, "channel state");
        self.state = state;

        self.observers.retain(|observer| match observer.upgrade() {
            Some(observer) => {
                observer.on_state_change(state);
                true
            }
            None => false,
        });
    }

    /// Generate a unique request ID
    fn next_request_id(&self) -> String {
        let counter = self.request_counter.fetch_add(1, Ordering::SeqCst);
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis())
            .unwrap_or_default();
        format!("req-{:x}-{:08x}", timestamp, counter)
    }
}

/// `now + timeout`, saturating at a year out
pub(crate) fn deadline_after(timeout: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(timeout)
        .unwrap_or_else(|| now + Duration::from_secs(365 * 24 * 60 * 60))
}

impl Drop for Channel {
    fn drop(&mut self) {
        self.shutdown();
    }
}
