//! Client configuration
//!
//! Configuration is merged from up to four layers, later layers winning:
//! 1. Built-in defaults
//! 2. User config (`$HOME/.config/runlog/client.toml`)
//! 3. Explicit config file (`--config`)
//! 4. CLI flags
//!
//! The merged value is deserialized into [`ClientConfig`] and validated.

mod defaults;
mod merge;

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use runlog_protocol::RunId;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

pub use defaults::builtin_layer;
pub use merge::{deep_merge, merge_layers};

/// Errors raised while loading or validating configuration
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {message}")]
    Parse { path: PathBuf, message: String },

    #[error("invalid configuration: {0}")]
    Invalid(String),

    #[error("invalid value for {field}: {message}")]
    OutOfBounds { field: &'static str, message: String },
}

/// How the channel reaches the coordinator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// Plain TCP to `address` (insecure)
    Tcp,
    /// Frames tunnelled through one long-lived `ssh` session
    Ssh,
}

/// SSH tunnel settings (used when `transport = "ssh"`)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SshSettings {
    /// SSH user
    pub user: String,
    /// SSH host; defaults to the host part of `address`
    #[serde(default)]
    pub host: Option<String>,
    /// SSH port
    pub port: u16,
    /// Path to SSH private key
    #[serde(default)]
    pub key_path: Option<String>,
    /// Passed to ssh as `ConnectTimeout`
    pub connect_timeout_seconds: u32,
    /// Command run on the coordinator host that speaks framed RPC on stdio
    pub remote_command: String,
}

/// Effective client configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Coordinator endpoint, `host:port`
    pub address: String,
    pub transport: TransportKind,
    /// Client-side frame limit; the effective limit is the minimum of this and
    /// what the coordinator advertises
    pub max_message_bytes: usize,
    /// Window for the channel to reach READY (connect + probe)
    pub connect_timeout_ms: u64,
    /// Upper bound on waiting for one response
    pub request_timeout_ms: u64,
    /// Delay between follow-mode polls when no more lines are pending
    pub poll_interval_ms: u64,
    pub retry_initial_delay_ms: u64,
    pub retry_max_delay_ms: u64,
    /// Consecutive failed reconnects tolerated in follow mode (None = unlimited)
    #[serde(default)]
    pub max_reconnect_attempts: Option<u32>,
    pub ssh: SshSettings,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            address: runlog_protocol::DEFAULT_COORDINATOR_ADDRESS.to_string(),
            transport: TransportKind::Tcp,
            max_message_bytes: runlog_protocol::DEFAULT_MAX_MESSAGE_BYTES,
            connect_timeout_ms: defaults::CONNECT_TIMEOUT_MS,
            request_timeout_ms: defaults::REQUEST_TIMEOUT_MS,
            poll_interval_ms: defaults::POLL_INTERVAL_MS,
            retry_initial_delay_ms: defaults::RETRY_INITIAL_DELAY_MS,
            retry_max_delay_ms: defaults::RETRY_MAX_DELAY_MS,
            max_reconnect_attempts: None,
            ssh: SshSettings {
                user: "runlog".to_string(),
                host: None,
                port: 22,
                key_path: None,
                connect_timeout_seconds: 10,
                remote_command: defaults::SSH_REMOTE_COMMAND.to_string(),
            },
        }
    }
}

/// Inputs for [`ClientConfig::load`]
#[derive(Debug, Clone, Default)]
pub struct ConfigSources {
    /// User-level file; skipped when absent on disk
    pub user_file: Option<PathBuf>,
    /// File named on the command line; must exist
    pub explicit_file: Option<PathBuf>,
    /// CLI flag overrides, already shaped like the config tree
    pub cli_overrides: Option<Value>,
}

impl ConfigSources {
    /// Sources with the default user config location
    pub fn with_default_user_file() -> Self {
        Self {
            user_file: default_user_config_path(),
            ..Default::default()
        }
    }
}

/// `$HOME/.config/runlog/client.toml`
pub fn default_user_config_path() -> Option<PathBuf> {
    std::env::var_os("HOME").map(|home| PathBuf::from(home).join(".config/runlog/client.toml"))
}

impl ClientConfig {
    /// Merge all layers and validate the result
    pub fn load(sources: &ConfigSources) -> Result<Self, ConfigError> {
        let mut layers = vec![builtin_layer()];

        if let Some(path) = sources.user_file.as_deref() {
            if path.exists() {
                debug!(path = %path.display(), "loading user config");
                layers.push(load_toml_file(path)?);
            }
        }

        if let Some(path) = sources.explicit_file.as_deref() {
            debug!(path = %path.display(), "loading config file");
            layers.push(load_toml_file(path)?);
        }

        if let Some(cli) = sources.cli_overrides.clone() {
            layers.push(cli);
        }

        Self::from_value(merge_layers(layers))
    }

    /// Deserialize and validate an already-merged config tree
    pub fn from_value(value: Value) -> Result<Self, ConfigError> {
        let config: ClientConfig =
            serde_json::from_value(value).map_err(|e| ConfigError::Invalid(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate bounds and cross-field constraints
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.address.trim().is_empty() {
            return Err(ConfigError::Invalid("address must not be empty".to_string()));
        }
        if self.transport == TransportKind::Tcp && split_host_port(&self.address).is_none() {
            return Err(ConfigError::Invalid(format!(
                "address '{}' is not of the form host:port",
                self.address
            )));
        }

        // Frames hold at least a response envelope
        if self.max_message_bytes < 1024 {
            return Err(ConfigError::OutOfBounds {
                field: "max_message_bytes",
                message: format!("{} is below the minimum of 1024", self.max_message_bytes),
            });
        }

        for (field, value) in [
            ("connect_timeout_ms", self.connect_timeout_ms),
            ("request_timeout_ms", self.request_timeout_ms),
            ("poll_interval_ms", self.poll_interval_ms),
            ("retry_initial_delay_ms", self.retry_initial_delay_ms),
        ] {
            if value == 0 {
                return Err(ConfigError::OutOfBounds {
                    field,
                    message: "must be greater than zero".to_string(),
                });
            }
        }

        if self.retry_max_delay_ms < self.retry_initial_delay_ms {
            return Err(ConfigError::OutOfBounds {
                field: "retry_max_delay_ms",
                message: format!(
                    "{} is below retry_initial_delay_ms {}",
                    self.retry_max_delay_ms, self.retry_initial_delay_ms
                ),
            });
        }

        if self.transport == TransportKind::Ssh {
            if self.ssh.user.is_empty() {
                return Err(ConfigError::Invalid("ssh.user must not be empty".to_string()));
            }
            if self.ssh.remote_command.trim().is_empty() {
                return Err(ConfigError::Invalid("ssh.remote_command must not be empty".to_string()));
            }
        }

        Ok(())
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Host the SSH session connects to
    pub fn ssh_host(&self) -> String {
        match &self.ssh.host {
            Some(host) => host.clone(),
            None => split_host_port(&self.address)
                .map(|(host, _)| host.to_string())
                .unwrap_or_else(|| self.address.clone()),
        }
    }
}

/// Split `host:port`, accepting bracketed IPv6 hosts.
pub fn split_host_port(address: &str) -> Option<(&str, u16)> {
    let (host, port) = address.rsplit_once(':')?;
    let port = port.parse().ok()?;
    let host = host.strip_prefix('[').and_then(|h| h.strip_suffix(']')).unwrap_or(host);
    (!host.is_empty()).then_some((host, port))
}

fn load_toml_file(path: &Path) -> Result<Value, ConfigError> {
    let contents = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    let toml_value: toml::Value = toml::from_str(&contents).map_err(|e| ConfigError::Parse {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;

    serde_json::to_value(toml_value).map_err(|e| ConfigError::Parse {
        path: path.to_path_buf(),
        message: e.to_string(),
    })
}

/// The validated inputs of one `logs` invocation
///
/// Fixed for the lifetime of the invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogsArgs {
    pub run_id: RunId,
    pub follow: bool,
}

impl LogsArgs {
    pub fn new(run_id: i64, follow: bool) -> Result<Self, ConfigError> {
        let run_id = RunId::try_from(run_id).map_err(|e| ConfigError::OutOfBounds {
            field: "run_id",
            message: e.to_string(),
        })?;
        Ok(Self { run_id, follow })
    }
}
