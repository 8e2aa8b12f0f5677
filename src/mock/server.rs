//! TCP front end for a [`MockCoordinator`]
//!
//! Serves the same newline-delimited JSON frames a real coordinator does,
//! so the TCP transport can be exercised end to end.

use std::io::{self, BufReader};
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};

use runlog_protocol::frame::{write_frame, FrameReader};
use runlog_protocol::{RpcRequest, DEFAULT_MAX_MESSAGE_BYTES};
use tracing::{debug, warn};

use super::coordinator::{MockCoordinator, Reply};

/// A mock coordinator listening on a loopback port
pub struct MockServer {
    addr: SocketAddr,
    stopping: Arc<AtomicBool>,
    streams: Arc<Mutex<Vec<TcpStream>>>,
    accept_thread: Option<JoinHandle<()>>,
}

impl MockServer {
    /// Bind `127.0.0.1:0` and start accepting
    pub fn start(coordinator: MockCoordinator) -> io::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0")?;
        let addr = listener.local_addr()?;
        let stopping = Arc::new(AtomicBool::new(false));
        let streams: Arc<Mutex<Vec<TcpStream>>> = Arc::new(Mutex::new(Vec::new()));

        let thread_stopping = Arc::clone(&stopping);
        let thread_streams = Arc::clone(&streams);
        let accept_thread = thread::Builder::new().name("mock-accept".to_string()).spawn(move || {
            for stream in listener.incoming() {
                if thread_stopping.load(Ordering::SeqCst) {
                    break;
                }
                let stream = match stream {
                    Ok(stream) => stream,
                    Err(e) => {
                        warn!(error = %e, "mock accept failed");
                        continue;
                    }
                };
                if coordinator.accept_connection().is_err() {
                    let _ = stream.shutdown(Shutdown::Both);
                    continue;
                }
                if let Ok(clone) = stream.try_clone() {
                    thread_streams.lock().unwrap_or_else(PoisonError::into_inner).push(clone);
                }
                let coordinator = coordinator.clone();
                let spawned = thread::Builder::new()
                    .name("mock-conn".to_string())
                    .spawn(move || serve_connection(coordinator, stream));
                if let Err(e) = spawned {
                    warn!(error = %e, "failed to spawn mock connection thread");
                }
            }
        })?;

        Ok(Self {
            addr,
            stopping,
            streams,
            accept_thread: Some(accept_thread),
        })
    }

    /// `host:port` suitable for the client's address setting
    pub fn address(&self) -> String {
        self.addr.to_string()
    }

    /// Stop accepting and sever open connections
    pub fn shutdown(&mut self) {
        if self.stopping.swap(true, Ordering::SeqCst) {
            return;
        }
        // Wake the blocking accept
        let _ = TcpStream::connect(self.addr);
        if let Some(handle) = self.accept_thread.take() {
            let _ = handle.join();
        }
        for stream in self.streams.lock().unwrap_or_else(PoisonError::into_inner).drain(..) {
            let _ = stream.shutdown(Shutdown::Both);
        }
    }
}

impl Drop for MockServer {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn serve_connection(coordinator: MockCoordinator, stream: TcpStream) {
    let mut writer = match stream.try_clone() {
        Ok(writer) => writer,
        Err(e) => {
            warn!(error = %e, "failed to clone mock stream");
            return;
        }
    };
    let mut frames = FrameReader::new(BufReader::new(stream), DEFAULT_MAX_MESSAGE_BYTES);

    loop {
        let request = match frames.read_message::<RpcRequest>() {
            Ok(Some(request)) => request,
            Ok(None) => break,
            Err(e) => {
                debug!(error = %e, "mock connection read failed");
                break;
            }
        };

        match coordinator.handle_request(&request) {
            Reply::Respond { response, delay } => {
                if let Some(delay) = delay {
                    thread::sleep(delay);
                }
                if let Err(e) = write_frame(&mut writer, &response, DEFAULT_MAX_MESSAGE_BYTES) {
                    debug!(error = %e, "mock connection write failed");
                    break;
                }
            }
            Reply::Disconnect => break,
        }
    }

    let _ = writer.shutdown(Shutdown::Both);
}
