//! Mock coordinator state and request handling

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use runlog_protocol::ops::{FetchLogsRequest, FetchLogsResponse, ProbeResponse};
use runlog_protocol::{
    features, Operation, RpcError, RpcRequest, RpcResponse, PROTOCOL_MAX, PROTOCOL_MIN, PROTOCOL_VERSION_PROBE,
};

use super::failure::{FailureConfig, FailureInjector};

/// What the coordinator does with one request
#[derive(Debug, Clone)]
pub enum Reply {
    /// Send `response`, optionally after a delay
    Respond { response: RpcResponse, delay: Option<Duration> },
    /// Drop the connection without answering
    Disconnect,
}

#[derive(Debug, Default)]
struct RunLog {
    lines: Vec<String>,
    denied: bool,
}

#[derive(Debug)]
struct CoordinatorState {
    runs: HashMap<u64, RunLog>,
    page_limit: usize,
    cursor_support: bool,
    reachable: bool,
    connect_failures: u32,
    protocol_min: i32,
    protocol_max: i32,
    max_message_bytes: Option<u64>,
    failures: FailureInjector,
    requests: Vec<RpcRequest>,
    connections: u32,
}

impl Default for CoordinatorState {
    fn default() -> Self {
        Self {
            runs: HashMap::new(),
            page_limit: 100,
            cursor_support: true,
            reachable: true,
            connect_failures: 0,
            protocol_min: PROTOCOL_MIN,
            protocol_max: PROTOCOL_MAX,
            max_message_bytes: None,
            failures: FailureInjector::new(),
            requests: Vec::new(),
            connections: 0,
        }
    }
}

/// Shared handle to an in-process coordinator
///
/// Clones share state, so a test keeps one handle for configuration and
/// assertions while transports hold others.
#[derive(Debug, Clone, Default)]
pub struct MockCoordinator {
    state: Arc<Mutex<CoordinatorState>>,
}

impl MockCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, CoordinatorState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // === Configuration ===

    /// Register a run with its accumulated lines
    pub fn add_run<I, S>(&self, run_id: u64, lines: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let lines = lines.into_iter().map(Into::into).collect();
        self.lock().runs.insert(run_id, RunLog { lines, denied: false });
    }

    /// Append freshly produced lines to a run
    pub fn append_lines<I, S>(&self, run_id: u64, lines: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut state = self.lock();
        let run = state.runs.entry(run_id).or_default();
        run.lines.extend(lines.into_iter().map(Into::into));
    }

    /// Make a run visible but unreadable
    pub fn deny_run(&self, run_id: u64) {
        self.lock().runs.entry(run_id).or_default().denied = true;
    }

    /// Maximum lines per fetch_logs response
    pub fn set_page_limit(&self, limit: usize) {
        self.lock().page_limit = limit.max(1);
    }

    /// Advertise and honor cursors (default true)
    pub fn set_cursor_support(&self, enabled: bool) {
        self.lock().cursor_support = enabled;
    }

    /// Refuse all connections while false
    pub fn set_reachable(&self, reachable: bool) {
        self.lock().reachable = reachable;
    }

    /// Refuse the next `count` connection attempts
    pub fn fail_next_connects(&self, count: u32) {
        self.lock().connect_failures = count;
    }

    pub fn set_protocol_range(&self, min: i32, max: i32) {
        let mut state = self.lock();
        state.protocol_min = min;
        state.protocol_max = max;
    }

    /// Frame limit advertised in probe responses
    pub fn set_max_message_bytes(&self, max: Option<u64>) {
        self.lock().max_message_bytes = max;
    }

    pub fn inject(&self, op: Operation, config: FailureConfig) {
        self.lock().failures.inject(op, config);
    }

    // === Inspection ===

    /// Decoded fetch_logs payloads, in arrival order
    pub fn fetch_requests(&self) -> Vec<FetchLogsRequest> {
        self.lock()
            .requests
            .iter()
            .filter(|r| r.op == Operation::FetchLogs)
            .filter_map(|r| serde_json::from_value(r.payload.clone()).ok())
            .collect()
    }

    /// Number of accepted connections
    pub fn connections(&self) -> u32 {
        self.lock().connections
    }

    // === Serving ===

    /// Admit a new connection, or refuse it with a reason
    pub fn accept_connection(&self) -> Result<(), String> {
        let mut state = self.lock();
        if !state.reachable {
            return Err("coordinator unreachable".to_string());
        }
        if state.connect_failures > 0 {
            state.connect_failures -= 1;
            return Err("connection refused".to_string());
        }
        state.connections += 1;
        Ok(())
    }

    /// Handle one request
    pub fn handle_request(&self, request: &RpcRequest) -> Reply {
        let mut state = self.lock();
        state.requests.push(request.clone());

        let version_ok = if request.op.accepts_version_zero() {
            request.protocol_version == PROTOCOL_VERSION_PROBE
        } else {
            (state.protocol_min..=state.protocol_max).contains(&request.protocol_version)
        };
        if !version_ok {
            let error = RpcError::unsupported_protocol(request.protocol_version, state.protocol_min, state.protocol_max);
            return respond(request, Err(error), None);
        }

        let failure = state.failures.check(request.op);
        let mut delay = None;
        if let Some(failure) = failure {
            if failure.disconnect {
                return Reply::Disconnect;
            }
            if let Some(error) = failure.error {
                return respond(request, Err(error), failure.delay);
            }
            delay = failure.delay;
        }

        let result = match request.op {
            Operation::Probe => handle_probe(&state),
            Operation::FetchLogs => handle_fetch_logs(&state, request),
        };
        respond(request, result, delay)
    }
}

fn respond(request: &RpcRequest, result: Result<serde_json::Value, RpcError>, delay: Option<Duration>) -> Reply {
    let response = match result {
        Ok(payload) => RpcResponse::success(request, payload),
        Err(error) => RpcResponse::failure(request, error),
    };
    Reply::Respond { response, delay }
}

fn handle_probe(state: &CoordinatorState) -> Result<serde_json::Value, RpcError> {
    let mut advertised = vec![features::FETCH_LOGS.to_string()];
    if state.cursor_support {
        advertised.push(features::CURSOR.to_string());
    }

    let probe = ProbeResponse {
        protocol_min: state.protocol_min,
        protocol_max: state.protocol_max,
        features: advertised,
        max_message_bytes: state.max_message_bytes,
    };
    serde_json::to_value(probe).map_err(|e| RpcError::invalid_request(format!("failed to serialize probe: {}", e)))
}

fn handle_fetch_logs(state: &CoordinatorState, request: &RpcRequest) -> Result<serde_json::Value, RpcError> {
    let req: FetchLogsRequest = serde_json::from_value(request.payload.clone())
        .map_err(|e| RpcError::invalid_request(format!("invalid fetch_logs request: {}", e)))?;

    let run_id = req.run_id.get();
    let run = state.runs.get(&run_id).ok_or_else(|| RpcError::run_not_found(run_id))?;
    if run.denied {
        return Err(RpcError::permission_denied(run_id));
    }

    let response = if state.cursor_support {
        let start = match req.cursor.as_deref() {
            Some(cursor) => cursor
                .parse::<usize>()
                .map_err(|_| RpcError::invalid_request(format!("invalid cursor '{}'", cursor)))?,
            None => 0,
        }
        .min(run.lines.len());

        let end = (start + state.page_limit).min(run.lines.len());
        FetchLogsResponse {
            run_id: req.run_id,
            log_lines: run.lines[start..end].to_vec(),
            next_cursor: Some(end.to_string()),
            has_more: end < run.lines.len(),
        }
    } else {
        // Pages without cursors always start at the beginning
        let end = state.page_limit.min(run.lines.len());
        FetchLogsResponse {
            run_id: req.run_id,
            log_lines: run.lines[..end].to_vec(),
            next_cursor: None,
            has_more: end < run.lines.len(),
        }
    };

    serde_json::to_value(response)
        .map_err(|e| RpcError::invalid_request(format!("failed to serialize response: {}", e)))
}
