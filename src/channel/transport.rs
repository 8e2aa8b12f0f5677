//! Transport layer for the coordinator channel
//!
//! - [`Transport`]: opens connections to the coordinator
//! - [`Connection`]: one open, framed, bidirectional link
//! - [`TcpTransport`]: plain TCP to `host:port` (insecure)
//! - [`SshTransport`]: one long-lived `ssh` session running the coordinator's
//!   stdio RPC command (transport-secured)
//!
//! Both real transports read frames on a dedicated thread so that the caller
//! can wait for a response with a timeout and give up on cancellation.

use std::io::{self, BufRead, BufReader, BufWriter, Read, Write};
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::process::{Child, Command, Stdio};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use runlog_protocol::frame::{write_frame, FrameError, FrameReader};
use runlog_protocol::{RpcRequest, RpcResponse};
use tracing::{debug, trace};

use crate::config::{ClientConfig, TransportKind};

/// Opens connections to the coordinator
pub trait Transport: Send + Sync {
    /// Human-readable target, used in diagnostics and errors
    fn target(&self) -> String;

    /// Open a new connection, giving up after `timeout`
    fn connect(&self, timeout: Duration) -> Result<Box<dyn Connection>, TransportError>;
}

/// One open link to the coordinator
///
/// Requests and responses strictly alternate; the channel never sends a
/// second request before the previous response arrived.
pub trait Connection: Send {
    /// Write one request frame
    fn send(&mut self, request: &RpcRequest) -> Result<(), TransportError>;

    /// Wait up to `timeout` for the next response frame.
    ///
    /// Returns `Ok(None)` if nothing arrived in time.
    fn recv(&mut self, timeout: Duration) -> Result<Option<RpcResponse>, TransportError>;

    /// Apply a new frame size limit in both directions
    fn set_max_message_bytes(&mut self, max_bytes: usize);

    /// Release the underlying link. Idempotent.
    fn close(&mut self);
}

/// Transport errors
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("connection failed: {0}")]
    ConnectFailed(String),

    #[error("connection timeout")]
    ConnectTimeout,

    #[error("connection closed by peer")]
    Closed,

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("message of {size} bytes exceeds maximum message size {max}")]
    MessageTooLarge { size: usize, max: usize },

    #[error("malformed frame: {0}")]
    Protocol(String),

    #[error("SSH error: {0}")]
    Ssh(String),
}

impl TransportError {
    /// Whether reconnecting may clear the error
    pub fn is_transient(&self) -> bool {
        !matches!(self, Self::MessageTooLarge { .. } | Self::Protocol(_))
    }
}

impl From<FrameError> for TransportError {
    fn from(err: FrameError) -> Self {
        match err {
            FrameError::Io(e) => Self::Io(e),
            FrameError::TooLarge { size, max } => Self::MessageTooLarge { size, max },
            FrameError::Truncated { .. } => Self::Closed,
            FrameError::Json(e) => Self::Protocol(e.to_string()),
        }
    }
}

/// Build the transport selected by `config`
pub fn from_config(config: &ClientConfig) -> Arc<dyn Transport> {
    match config.transport {
        TransportKind::Tcp => Arc::new(TcpTransport::new(config.address.clone(), config.max_message_bytes)),
        TransportKind::Ssh => Arc::new(SshTransport::new(SshConfig::from_client_config(config))),
    }
}

/// A decoded response and the raw length of its frame
type Frame = Result<(RpcResponse, usize), TransportError>;

/// A connection whose responses are decoded by a background reader thread
///
/// The reader only bounds frames by the limit the connection was opened
/// with. The current, possibly negotiated, limit is applied when a frame is
/// handed out by [`Connection::recv`], so a change takes effect for the very
/// next response.
pub struct FramedConnection {
    writer: Box<dyn Write + Send>,
    frames: Receiver<Frame>,
    max_message_bytes: usize,
    closer: Option<Box<dyn FnOnce() + Send>>,
}

impl FramedConnection {
    /// Start the reader thread over `reader`.
    ///
    /// `closer` must unblock the reader (shut the socket, kill the process).
    pub fn spawn<R>(
        name: &str,
        reader: R,
        writer: Box<dyn Write + Send>,
        closer: Box<dyn FnOnce() + Send>,
        max_message_bytes: usize,
    ) -> io::Result<Self>
    where
        R: Read + Send + 'static,
    {
        let (tx, rx) = mpsc::channel();

        thread::Builder::new()
            .name(format!("{}-reader", name))
            .spawn(move || {
                let mut frames = FrameReader::new(BufReader::new(reader), max_message_bytes);
                loop {
                    let frame = match frames.read_frame() {
                        Ok(Some(raw)) => serde_json::from_slice::<RpcResponse>(raw)
                            .map(|response| (response, raw.len()))
                            .map_err(|e| TransportError::Protocol(e.to_string())),
                        Ok(None) => Err(TransportError::Closed),
                        Err(e) => Err(TransportError::from(e)),
                    };
                    let last = frame.is_err();
                    if tx.send(frame).is_err() || last {
                        break;
                    }
                }
                trace!("reader thread exiting");
            })?;

        Ok(Self {
            writer,
            frames: rx,
            max_message_bytes,
            closer: Some(closer),
        })
    }
}

impl Connection for FramedConnection {
    fn send(&mut self, request: &RpcRequest) -> Result<(), TransportError> {
        write_frame(&mut self.writer, request, self.max_message_bytes)?;
        Ok(())
    }

    fn recv(&mut self, timeout: Duration) -> Result<Option<RpcResponse>, TransportError> {
        match self.frames.recv_timeout(timeout) {
            Ok(Ok((_, size))) if size > self.max_message_bytes => Err(TransportError::MessageTooLarge {
                size,
                max: self.max_message_bytes,
            }),
            Ok(frame) => frame.map(|(response, _)| Some(response)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(TransportError::Closed),
        }
    }

    fn set_max_message_bytes(&mut self, max_bytes: usize) {
        self.max_message_bytes = max_bytes;
    }

    fn close(&mut self) {
        if let Some(closer) = self.closer.take() {
            closer();
        }
    }
}

impl Drop for FramedConnection {
    fn drop(&mut self) {
        self.close();
    }
}

/// Plain TCP transport
pub struct TcpTransport {
    address: String,
    max_message_bytes: usize,
}

impl TcpTransport {
    pub fn new(address: impl Into<String>, max_message_bytes: usize) -> Self {
        Self {
            address: address.into(),
            max_message_bytes,
        }
    }

    fn open_stream(&self, timeout: Duration) -> Result<TcpStream, TransportError> {
        let deadline = super::deadline_after(timeout);
        let addrs = self
            .address
            .to_socket_addrs()
            .map_err(|e| TransportError::ConnectFailed(format!("cannot resolve {}: {}", self.address, e)))?;

        let mut last_error = None;
        for addr in addrs {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(TransportError::ConnectTimeout);
            }
            match TcpStream::connect_timeout(&addr, remaining) {
                Ok(stream) => return Ok(stream),
                Err(e) if e.kind() == io::ErrorKind::TimedOut => {
                    last_error = Some(TransportError::ConnectTimeout);
                }
                Err(e) => {
                    debug!(%addr, error = %e, "connect attempt failed");
                    last_error = Some(TransportError::ConnectFailed(format!("{}: {}", addr, e)));
                }
            }
        }

        Err(last_error.unwrap_or_else(|| {
            TransportError::ConnectFailed(format!("{} resolved to no addresses", self.address))
        }))
    }
}

impl Transport for TcpTransport {
    fn target(&self) -> String {
        format!("tcp://{}", self.address)
    }

    fn connect(&self, timeout: Duration) -> Result<Box<dyn Connection>, TransportError> {
        let stream = self.open_stream(timeout)?;
        stream.set_nodelay(true)?;

        let reader = stream.try_clone()?;
        let shutdown = stream.try_clone()?;

        let connection = FramedConnection::spawn(
            "tcp",
            reader,
            Box::new(BufWriter::new(stream)),
            Box::new(move || {
                let _ = shutdown.shutdown(Shutdown::Both);
            }),
            self.max_message_bytes,
        )?;

        Ok(Box::new(connection))
    }
}

/// SSH transport configuration
#[derive(Debug, Clone)]
pub struct SshConfig {
    /// Remote host
    pub host: String,
    /// SSH user
    pub user: String,
    /// SSH port (default 22)
    pub port: u16,
    /// Path to SSH private key
    pub key_path: Option<String>,
    /// Connection timeout in seconds
    pub connect_timeout_seconds: u32,
    /// Command that speaks framed RPC on stdio
    pub remote_command: String,
    /// Client-side frame limit
    pub max_message_bytes: usize,
}

impl SshConfig {
    pub fn from_client_config(config: &ClientConfig) -> Self {
        Self {
            host: config.ssh_host(),
            user: config.ssh.user.clone(),
            port: config.ssh.port,
            key_path: config.ssh.key_path.clone(),
            connect_timeout_seconds: config.ssh.connect_timeout_seconds,
            remote_command: config.ssh.remote_command.clone(),
            max_message_bytes: config.max_message_bytes,
        }
    }
}

/// SSH transport
///
/// Keeps one `ssh` process per connection; frames flow over its stdin and
/// stdout for the lifetime of the connection.
pub struct SshTransport {
    config: SshConfig,
}

impl SshTransport {
    pub fn new(config: SshConfig) -> Self {
        Self { config }
    }

    /// Build SSH command arguments
    fn build_ssh_args(&self, timeout: Duration) -> Vec<String> {
        let connect_timeout = u32::try_from(timeout.as_secs())
            .unwrap_or(u32::MAX)
            .clamp(1, self.config.connect_timeout_seconds.max(1));

        let mut args = vec![
            "-o".to_string(),
            format!("ConnectTimeout={}", connect_timeout),
            "-o".to_string(),
            "ServerAliveInterval=15".to_string(),
            "-o".to_string(),
            "ServerAliveCountMax=2".to_string(),
            "-o".to_string(),
            "BatchMode=yes".to_string(),
            "-p".to_string(),
            self.config.port.to_string(),
        ];

        if let Some(ref key_path) = self.config.key_path {
            args.push("-i".to_string());
            args.push(key_path.clone());
        }

        args.push(format!("{}@{}", self.config.user, self.config.host));
        args.extend(self.config.remote_command.split_whitespace().map(String::from));

        args
    }
}

impl Transport for SshTransport {
    fn target(&self) -> String {
        format!("ssh://{}@{}:{}", self.config.user, self.config.host, self.config.port)
    }

    fn connect(&self, timeout: Duration) -> Result<Box<dyn Connection>, TransportError> {
        let mut child = Command::new("ssh")
            .args(self.build_ssh_args(timeout))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| TransportError::Ssh(format!("failed to spawn ssh: {}", e)))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| TransportError::Ssh("ssh stdin unavailable".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| TransportError::Ssh("ssh stdout unavailable".to_string()))?;

        if let Some(stderr) = child.stderr.take() {
            forward_stderr(stderr);
        }

        let child = Arc::new(Mutex::new(child));
        let closer_child = Arc::clone(&child);

        let connection = FramedConnection::spawn(
            "ssh",
            stdout,
            Box::new(stdin),
            Box::new(move || {
                if let Ok(mut child) = closer_child.lock() {
                    kill_child(&mut child);
                }
            }),
            self.config.max_message_bytes,
        )?;

        Ok(Box::new(connection))
    }
}

fn kill_child(child: &mut Child) {
    let _ = child.kill();
    let _ = child.wait();
}

/// Relay ssh diagnostics onto the tracing stream
fn forward_stderr<R: Read + Send + 'static>(stderr: R) {
    let spawned = thread::Builder::new().name("ssh-stderr".to_string()).spawn(move || {
        for line in BufReader::new(stderr).lines().map_while(Result::ok) {
            debug!(target: "runlog::ssh", "{}", line);
        }
    });
    if let Err(e) = spawned {
        debug!(error = %e, "could not forward ssh stderr");
    }
}
