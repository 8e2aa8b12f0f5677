//! Follow-mode tests
//!
//! Reconnects, cursor resumption, cancellation and backoff against the
//! in-process mock coordinator.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use runlog::channel::ConnectivityObserver;
use runlog::mock::{FailureConfig, MockCoordinator, MockTransport, RecordingObserver};
use runlog::{CancelToken, ChannelState, ClientConfig, FailureKind, LogFetchClient, ResumeMode, RunId};
use runlog_protocol::Operation;

fn test_config() -> ClientConfig {
    ClientConfig {
        connect_timeout_ms: 1_000,
        request_timeout_ms: 1_000,
        poll_interval_ms: 10,
        retry_initial_delay_ms: 10,
        retry_max_delay_ms: 40,
        ..ClientConfig::default()
    }
}

fn client_with(coordinator: &MockCoordinator, config: ClientConfig) -> LogFetchClient {
    LogFetchClient::with_transport(config, Arc::new(MockTransport::new(coordinator.clone())))
}

fn run(id: u64) -> RunId {
    RunId::try_from(id).unwrap()
}

// =============================================================================
// Test 1: a dropped channel resumes from the last delivered cursor
// =============================================================================

#[test]
fn test_drop_after_first_chunk_resumes_without_duplicates() {
    let coordinator = MockCoordinator::new();
    coordinator.add_run(7, ["step 1", "step 2"]);
    coordinator.inject(Operation::FetchLogs, FailureConfig::disconnect().after(1).with_fail_count(1));

    let recorder = RecordingObserver::new();
    let observer: Arc<dyn ConnectivityObserver> = recorder.clone();
    let client = client_with(&coordinator, test_config()).with_observer(observer);
    let mut stream = client.fetch(run(7), true, CancelToken::new());

    let first = stream.next().unwrap().unwrap();
    assert_eq!(first.log_lines, vec!["step 1", "step 2"]);

    coordinator.append_lines(7, ["step 3"]);
    let second = stream.next().unwrap().unwrap();
    assert_eq!(second.log_lines, vec!["step 3"], "resumed chunk must not repeat delivered lines");

    let cursors: Vec<Option<String>> = coordinator.fetch_requests().into_iter().map(|r| r.cursor).collect();
    assert_eq!(cursors, vec![None, Some("2".to_string()), Some("2".to_string())]);
    assert_eq!(coordinator.connections(), 2);

    let states = recorder.states();
    let failure_at = states
        .iter()
        .position(|s| *s == ChannelState::TransientFailure)
        .expect("TRANSIENT_FAILURE must be observed");
    assert_eq!(
        &states[failure_at..],
        &[ChannelState::TransientFailure, ChannelState::Connecting, ChannelState::Ready]
    );
}

#[test]
fn test_refused_reconnects_are_retried() {
    let coordinator = MockCoordinator::new();
    coordinator.add_run(7, ["a"]);
    coordinator.fail_next_connects(3);

    let mut stream = client_with(&coordinator, test_config()).fetch(run(7), true, CancelToken::new());
    let first = stream.next().unwrap().unwrap();

    assert_eq!(first.log_lines, vec!["a"]);
    assert_eq!(coordinator.connections(), 1);
}

// =============================================================================
// Test 2: no silent gaps while the coordinator keeps producing
// =============================================================================

#[test]
fn test_no_gaps_across_drops() {
    let coordinator = MockCoordinator::new();
    coordinator.add_run(11, Vec::<String>::new());
    coordinator.set_page_limit(3);
    coordinator.inject(Operation::FetchLogs, FailureConfig::disconnect().after(2).with_fail_count(3));

    let produced: Vec<String> = (0..40).map(|i| format!("line {}", i)).collect();
    let producer = {
        let coordinator = coordinator.clone();
        let produced = produced.clone();
        thread::spawn(move || {
            for batch in produced.chunks(4) {
                coordinator.append_lines(11, batch.to_vec());
                thread::sleep(Duration::from_millis(5));
            }
        })
    };

    let cancel = CancelToken::new();
    let mut stream = client_with(&coordinator, test_config()).fetch(run(11), true, cancel.clone());
    let deadline = Instant::now() + Duration::from_secs(10);
    let mut delivered = Vec::new();
    while delivered.len() < produced.len() {
        assert!(Instant::now() < deadline, "follow stream stalled at {} lines", delivered.len());
        let response = stream.next().unwrap().unwrap();
        delivered.extend(response.log_lines);
    }
    cancel.cancel();
    producer.join().unwrap();

    assert_eq!(delivered, produced);
    assert!(stream.next().is_none());
}

// =============================================================================
// Test 3: cancellation
// =============================================================================

#[test]
fn test_cancel_during_poll_interval() {
    let coordinator = MockCoordinator::new();
    coordinator.add_run(2, ["a"]);
    let config = ClientConfig {
        poll_interval_ms: 60_000,
        ..test_config()
    };

    let recorder = RecordingObserver::new();
    let observer: Arc<dyn ConnectivityObserver> = recorder.clone();
    let cancel = CancelToken::new();
    let mut stream = client_with(&coordinator, config)
        .with_observer(observer)
        .fetch(run(2), true, cancel.clone());
    stream.next().unwrap().unwrap();

    let canceller = {
        let cancel = cancel.clone();
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            cancel.cancel();
        })
    };

    let start = Instant::now();
    assert!(stream.next().is_none());
    assert!(start.elapsed() < Duration::from_secs(2), "cancel took {:?}", start.elapsed());
    canceller.join().unwrap();

    assert_eq!(recorder.states().last(), Some(&ChannelState::Shutdown));
    assert!(stream.next().is_none(), "no responses after cancellation");
}

#[test]
fn test_cancel_while_awaiting_response() {
    let coordinator = MockCoordinator::new();
    coordinator.add_run(2, ["a"]);
    coordinator.inject(Operation::FetchLogs, FailureConfig::delay(Duration::from_secs(30)));
    let config = ClientConfig {
        request_timeout_ms: 60_000,
        ..test_config()
    };

    let cancel = CancelToken::new();
    let mut stream = client_with(&coordinator, config).fetch(run(2), true, cancel.clone());

    let canceller = {
        let cancel = cancel.clone();
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            cancel.cancel();
        })
    };

    let start = Instant::now();
    assert!(stream.next().is_none());
    assert!(start.elapsed() < Duration::from_secs(2));
    canceller.join().unwrap();
    assert_eq!(stream.channel_state(), ChannelState::Shutdown);
}

#[test]
fn test_cancel_during_backoff() {
    let coordinator = MockCoordinator::new();
    coordinator.set_reachable(false);
    let config = ClientConfig {
        retry_initial_delay_ms: 60_000,
        retry_max_delay_ms: 60_000,
        ..test_config()
    };

    let cancel = CancelToken::new();
    let mut stream = client_with(&coordinator, config).fetch(run(2), true, cancel.clone());
    let canceller = {
        let cancel = cancel.clone();
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            cancel.cancel();
        })
    };

    let start = Instant::now();
    assert!(stream.next().is_none());
    assert!(start.elapsed() < Duration::from_secs(2));
    canceller.join().unwrap();
}

#[test]
fn test_cancelled_before_first_poll() {
    let coordinator = MockCoordinator::new();
    coordinator.add_run(2, ["a"]);
    let cancel = CancelToken::new();
    cancel.cancel();

    let mut stream = client_with(&coordinator, test_config()).fetch(run(2), true, cancel);
    assert!(stream.next().is_none());
    assert_eq!(coordinator.connections(), 0);
}

#[test]
fn test_dropping_stream_releases_channel() {
    let coordinator = MockCoordinator::new();
    coordinator.add_run(2, ["a"]);
    let recorder = RecordingObserver::new();
    let observer: Arc<dyn ConnectivityObserver> = recorder.clone();

    let mut stream = client_with(&coordinator, test_config())
        .with_observer(observer)
        .fetch(run(2), true, CancelToken::new());
    stream.next().unwrap().unwrap();
    drop(stream);

    assert_eq!(recorder.states().last(), Some(&ChannelState::Shutdown));
}

// =============================================================================
// Test 4: backoff and permanent failure
// =============================================================================

#[test]
fn test_backoff_grows_until_attempts_exhausted() {
    let coordinator = MockCoordinator::new();
    coordinator.set_reachable(false);
    let config = ClientConfig {
        retry_initial_delay_ms: 20,
        retry_max_delay_ms: 80,
        max_reconnect_attempts: Some(4),
        ..test_config()
    };

    let start = Instant::now();
    let mut stream = client_with(&coordinator, config).fetch(run(2), true, CancelToken::new());
    let err = stream.next().unwrap().unwrap_err();
    let elapsed = start.elapsed();

    // 20 + 40 + 80 + 80 ms of backoff before giving up
    assert!(elapsed >= Duration::from_millis(220), "gave up after {:?}", elapsed);
    assert_eq!(err.failure_kind(), FailureKind::ChannelUnavailable);
    assert_eq!(err.exit_code(), 20);
    assert!(stream.next().is_none());
}

#[test]
fn test_success_resets_reconnect_budget() {
    let coordinator = MockCoordinator::new();
    coordinator.add_run(2, ["a"]);
    let config = ClientConfig {
        max_reconnect_attempts: Some(2),
        ..test_config()
    };

    let mut stream = client_with(&coordinator, config).fetch(run(2), true, CancelToken::new());
    for round in 0..3 {
        coordinator.inject(Operation::FetchLogs, FailureConfig::disconnect().with_fail_count(2));
        coordinator.append_lines(2, [format!("round {}", round)]);
        let response = stream.next().unwrap().unwrap();
        assert_eq!(response.log_lines.last(), Some(&format!("round {}", round)));
    }
}

// =============================================================================
// Test 5: coordinators without cursors
// =============================================================================

#[test]
fn test_snapshot_mode_follows_full_log() {
    let coordinator = MockCoordinator::new();
    coordinator.add_run(4, ["a", "b"]);
    coordinator.set_cursor_support(false);

    let mut stream = client_with(&coordinator, test_config()).fetch(run(4), true, CancelToken::new());
    let first = stream.next().unwrap().unwrap();
    coordinator.append_lines(4, ["c"]);
    let second = stream.next().unwrap().unwrap();

    assert_eq!(stream.resume_mode(), Some(ResumeMode::Snapshot));
    assert_eq!(first.log_lines, vec!["a", "b"]);
    assert_eq!(second.log_lines, vec!["a", "b", "c"]);
    assert_eq!(stream.cursor(), None);
}
