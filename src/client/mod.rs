//! Log retrieval client
//!
//! [`LogFetchClient::fetch`] returns a [`LogStream`]: a lazy iterator of
//! fetch responses for one run. A one-shot stream sends a single request;
//! a follow stream keeps polling with the last delivered cursor until it is
//! cancelled or fails terminally.
//!
//! Transient channel failures in follow mode are retried after a backoff
//! delay. The cursor only advances when a response is handed to the caller,
//! so a retried poll never skips lines.

mod backoff;
mod error;

use std::sync::Arc;
use std::time::Duration;

use runlog_protocol::ops::{FetchLogsRequest, FetchLogsResponse};
use runlog_protocol::{features, Operation, RunId};
use tracing::{debug, info, warn};

use crate::cancel::CancelToken;
use crate::channel::transport::{self, Transport};
use crate::channel::{Channel, ChannelError, ChannelState, ConnectivityObserver, Session};
use crate::config::ClientConfig;

pub use backoff::Backoff;
pub use error::{FailureKind, FetchError};

/// How follow polls resume after the previous response
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResumeMode {
    /// Each poll carries the last delivered cursor; responses hold only new lines
    Cursor,
    /// The coordinator has no cursors; every response is the full log so far
    Snapshot,
}

/// Entry point for retrieving run logs
pub struct LogFetchClient {
    config: ClientConfig,
    transport: Arc<dyn Transport>,
    observers: Vec<Arc<dyn ConnectivityObserver>>,
}

impl LogFetchClient {
    /// Client using the transport selected by `config`
    pub fn new(config: ClientConfig) -> Self {
        let transport = transport::from_config(&config);
        Self::with_transport(config, transport)
    }

    pub fn with_transport(config: ClientConfig, transport: Arc<dyn Transport>) -> Self {
        Self {
            config,
            transport,
            observers: Vec::new(),
        }
    }

    /// Report channel state transitions of every stream to `observer`
    pub fn with_observer(mut self, observer: Arc<dyn ConnectivityObserver>) -> Self {
        self.observers.push(observer);
        self
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Start retrieving logs for `run_id`.
    ///
    /// Nothing is sent until the stream is first polled.
    pub fn fetch(&self, run_id: RunId, follow: bool, cancel: CancelToken) -> LogStream {
        let mut channel = Channel::new(Arc::clone(&self.transport), self.config.max_message_bytes);
        for observer in &self.observers {
            channel.subscribe(observer);
        }

        LogStream {
            channel,
            _observers: self.observers.clone(),
            run_id,
            follow,
            cancel,
            connect_timeout: self.config.connect_timeout(),
            request_timeout: self.config.request_timeout(),
            poll_interval: self.config.poll_interval(),
            max_reconnect_attempts: self.config.max_reconnect_attempts,
            backoff: Backoff::new(
                Duration::from_millis(self.config.retry_initial_delay_ms),
                Duration::from_millis(self.config.retry_max_delay_ms),
            ),
            cursor: None,
            resume_mode: None,
            next_poll: NextPoll::Immediate,
            done: false,
        }
    }

    /// Connect, handshake and report what the coordinator offers
    pub fn probe(&self, cancel: &CancelToken) -> Result<Session, FetchError> {
        let mut channel = Channel::new(Arc::clone(&self.transport), self.config.max_message_bytes);
        for observer in &self.observers {
            channel.subscribe(observer);
        }

        let target = channel.target();
        let result = channel
            .ensure_ready(self.config.connect_timeout(), cancel)
            .map(Session::clone)
            .map_err(|e| FetchError::from_channel(e, &target, RunId::default()));
        channel.shutdown();
        result
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NextPoll {
    Immediate,
    AfterInterval,
}

/// Responses for one run, pulled one at a time
///
/// Owns its channel exclusively; dropping the stream releases it.
pub struct LogStream {
    channel: Channel,
    // Caller-supplied observers stay alive for the stream's lifetime
    _observers: Vec<Arc<dyn ConnectivityObserver>>,
    run_id: RunId,
    follow: bool,
    cancel: CancelToken,
    connect_timeout: Duration,
    request_timeout: Duration,
    poll_interval: Duration,
    max_reconnect_attempts: Option<u32>,
    backoff: Backoff,
    cursor: Option<String>,
    resume_mode: Option<ResumeMode>,
    next_poll: NextPoll,
    done: bool,
}

impl LogStream {
    /// Known once the first handshake completed
    pub fn resume_mode(&self) -> Option<ResumeMode> {
        self.resume_mode
    }

    /// Cursor of the last delivered response
    pub fn cursor(&self) -> Option<&str> {
        self.cursor.as_deref()
    }

    pub fn channel_state(&self) -> ChannelState {
        self.channel.state()
    }

    /// Release the channel; the stream yields nothing afterwards. Idempotent.
    pub fn close(&mut self) {
        self.done = true;
        self.channel.shutdown();
    }

    fn terminate(&mut self, error: ChannelError) -> Option<Result<FetchLogsResponse, FetchError>> {
        let target = self.channel.target();
        let error = FetchError::from_channel(error, &target, self.run_id);
        debug!(run_id = %self.run_id, error = %error, "log retrieval failed");
        self.close();
        Some(Err(error))
    }

    fn poll_once(&mut self) -> Result<FetchLogsResponse, ChannelError> {
        let session = self.channel.ensure_ready(self.connect_timeout, &self.cancel)?;
        let mode = if session.has_feature(features::CURSOR) {
            ResumeMode::Cursor
        } else {
            ResumeMode::Snapshot
        };
        if self.resume_mode != Some(mode) {
            if mode == ResumeMode::Snapshot && self.follow {
                warn!(run_id = %self.run_id, "coordinator does not support cursors; following full snapshots");
            }
            self.resume_mode = Some(mode);
        }

        let request = FetchLogsRequest {
            run_id: self.run_id,
            cursor: match mode {
                ResumeMode::Cursor => self.cursor.clone(),
                ResumeMode::Snapshot => None,
            },
        };
        debug!(run_id = %self.run_id, cursor = ?request.cursor, "fetch_logs");

        let payload = serde_json::to_value(&request)
            .map_err(|e| ChannelError::Protocol(format!("failed to encode fetch_logs request: {}", e)))?;
        let payload = self
            .channel
            .call(Operation::FetchLogs, payload, self.request_timeout, &self.cancel)?;

        let response: FetchLogsResponse = serde_json::from_value(payload)
            .map_err(|e| ChannelError::Protocol(format!("invalid fetch_logs response: {}", e)))?;
        if response.run_id != self.run_id {
            return Err(ChannelError::Protocol(format!(
                "response for run {} to a request for run {}",
                response.run_id, self.run_id
            )));
        }
        Ok(response)
    }

    /// Backoff delay for a transient failure, or None once reconnects are exhausted
    fn schedule_retry(&mut self, error: &ChannelError) -> Option<Duration> {
        let attempts = self.backoff.attempts() + 1;
        if let Some(max) = self.max_reconnect_attempts {
            if attempts > max {
                warn!(run_id = %self.run_id, attempts = max, "giving up after reconnect attempts");
                return None;
            }
        }

        let delay = self.backoff.next_delay();
        warn!(
            run_id = %self.run_id,
            attempt = attempts,
            ?delay,
            error = %error,
            "channel unavailable, retrying"
        );
        Some(delay)
    }
}

impl Iterator for LogStream {
    type Item = Result<FetchLogsResponse, FetchError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.done {
                return None;
            }
            if self.cancel.is_cancelled() {
                info!(run_id = %self.run_id, "log retrieval cancelled");
                self.close();
                return None;
            }

            if self.next_poll == NextPoll::AfterInterval && self.cancel.wait_timeout(self.poll_interval) {
                continue;
            }

            let error = match self.poll_once() {
                Ok(response) => {
                    // Undelivered responses are dropped on cancellation
                    if self.cancel.is_cancelled() {
                        continue;
                    }
                    self.backoff.reset();

                    if !self.follow {
                        self.close();
                        return Some(Ok(response));
                    }

                    if self.resume_mode == Some(ResumeMode::Cursor) {
                        if let Some(cursor) = &response.next_cursor {
                            self.cursor = Some(cursor.clone());
                        }
                    }
                    // Without a cursor an immediate re-poll returns the same page
                    self.next_poll = match (self.resume_mode, response.has_more) {
                        (Some(ResumeMode::Cursor), true) => NextPoll::Immediate,
                        _ => NextPoll::AfterInterval,
                    };
                    return Some(Ok(response));
                }
                Err(error) => error,
            };

            match error {
                ChannelError::Cancelled => continue,
                error if self.follow && error.is_transient() => {
                    let Some(delay) = self.schedule_retry(&error) else {
                        return self.terminate(error);
                    };
                    if self.cancel.wait_timeout(delay) {
                        continue;
                    }
                    self.next_poll = NextPoll::Immediate;
                }
                error => return self.terminate(error),
            }
        }
    }
}

impl Drop for LogStream {
    fn drop(&mut self) {
        self.close();
    }
}
