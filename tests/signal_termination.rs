//! Termination signal tests
//!
//! Kept in their own test binary: a process installs its handler once.

#![cfg(unix)]

use std::process::Command;
use std::time::Duration;

use runlog::{CancelToken, SignalHandler};

#[test]
fn test_sigterm_cancels_instead_of_killing() {
    let cancel = CancelToken::new();
    let handler = SignalHandler::new(cancel.clone());
    handler.install().unwrap();

    let status = Command::new("kill")
        .args(["-TERM", &std::process::id().to_string()])
        .status()
        .unwrap();
    assert!(status.success());

    assert!(cancel.wait_timeout(Duration::from_secs(5)), "SIGTERM did not cancel the token");
    assert_eq!(handler.state().signal_count(), 1);
}
