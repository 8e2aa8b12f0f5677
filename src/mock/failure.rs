//! Failure Injection for Mock Coordinator
//!
//! Supports configurable failure injection for testing error paths.

use std::collections::HashMap;
use std::time::Duration;

use runlog_protocol::{ErrorCode, Operation, RpcError};

/// Failure configuration for an operation
#[derive(Debug, Clone)]
pub struct FailureConfig {
    /// Error to return (if any)
    pub error: Option<RpcError>,
    /// Drop the connection instead of responding
    pub disconnect: bool,
    /// Delay to add before responding
    pub delay: Option<Duration>,
    /// Calls to let through before the failure starts
    pub after_calls: u32,
    /// Number of times to fail before succeeding (None = always fail)
    pub fail_count: Option<u32>,
}

impl FailureConfig {
    fn base() -> Self {
        Self {
            error: None,
            disconnect: false,
            delay: None,
            after_calls: 0,
            fail_count: None,
        }
    }

    /// Create a config that returns an error
    pub fn error(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            error: Some(RpcError::new(code, message)),
            ..Self::base()
        }
    }

    /// Create a config that drops the connection
    pub fn disconnect() -> Self {
        Self {
            disconnect: true,
            ..Self::base()
        }
    }

    /// Create a config that just adds delay
    pub fn delay(duration: Duration) -> Self {
        Self {
            delay: Some(duration),
            ..Self::base()
        }
    }

    /// Let `calls` requests through before failing
    pub fn after(mut self, calls: u32) -> Self {
        self.after_calls = calls;
        self
    }

    /// Set the number of times to fail before succeeding
    pub fn with_fail_count(mut self, count: u32) -> Self {
        self.fail_count = Some(count);
        self
    }
}

/// Failure injector for the mock coordinator
#[derive(Debug, Default)]
pub struct FailureInjector {
    /// Per-operation failure configs
    configs: HashMap<Operation, FailureConfig>,
    /// Call counts per operation
    call_counts: HashMap<Operation, u32>,
}

impl FailureInjector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inject a failure for an operation
    pub fn inject(&mut self, op: Operation, config: FailureConfig) {
        self.configs.insert(op, config);
        self.call_counts.insert(op, 0);
    }

    /// Clear all failure injections
    pub fn clear(&mut self) {
        self.configs.clear();
        self.call_counts.clear();
    }

    /// Count a call to `op` and return the failure to apply, if any
    pub fn check(&mut self, op: Operation) -> Option<FailureConfig> {
        let config = self.configs.get(&op)?;
        let count = self.call_counts.entry(op).or_insert(0);
        *count += 1;

        if *count <= config.after_calls {
            return None;
        }
        if let Some(limit) = config.fail_count {
            if *count - config.after_calls > limit {
                return None;
            }
        }
        Some(config.clone())
    }
}
