//! End-to-end session tests against the scripted mock transport.
//!
//! Each test drives a full `CommandSession` with events delivered from
//! other threads, as a real Bluetooth stack would.

use std::sync::Arc;
use std::time::{Duration, Instant};

use blecmd_core::{
    CommandSession, ConnectBehavior, DiscoveredService, DiscoveryBehavior, FailureReason,
    GattStatus, LinkState, MockTransport, PeripheralAddress, SessionConfig, SessionResult,
    TransportEvent, WriteBehavior, uuids,
};
use blecmd_types::{CommandDescriptor, WriteMode};
use tokio_util::sync::CancellationToken;

const DEADLINE: Duration = Duration::from_millis(300);
const GRACE: Duration = Duration::from_millis(100);
/// Scheduling slack on top of deadline + grace.
const SLACK: Duration = Duration::from_millis(250);

fn address() -> PeripheralAddress {
    PeripheralAddress::new("AA:BB:CC:DD:EE:FF").unwrap()
}

fn config() -> SessionConfig {
    SessionConfig::default()
        .deadline(DEADLINE)
        .teardown_grace(GRACE)
}

fn session(transport: &Arc<MockTransport>) -> CommandSession {
    CommandSession::new(
        transport.clone(),
        address(),
        CommandDescriptor::machine_sleep(),
    )
    .with_config(config())
}

/// Per connection attempt: at most one disconnect, exactly one release.
fn assert_torn_down_once(transport: &MockTransport) {
    assert!(transport.disconnect_count() <= 1, "disconnect called twice");
    assert_eq!(transport.release_count(), transport.connect_count());
    assert_eq!(transport.open_links(), 0);
}

// =============================================================================
// Happy path and failure classification
// =============================================================================

#[tokio::test]
async fn test_happy_path_disconnects_after_success() {
    let transport = Arc::new(MockTransport::machine());
    let report = session(&transport).run().await;

    assert_eq!(report.result, SessionResult::Success);
    assert!(report.disconnect_requested);
    assert!(report.released);
    assert_eq!(transport.connect_count(), 1);
    assert_eq!(transport.disconnect_count(), 1);
    assert_torn_down_once(&transport);

    let writes = transport.writes();
    assert_eq!(writes.len(), 1);
    assert_eq!(writes[0].request.service, uuids::MACHINE_SERVICE);
    assert_eq!(writes[0].request.payload.as_ref(), &[0x00]);
}

#[tokio::test]
async fn test_missing_characteristic() {
    let transport = Arc::new(
        MockTransport::builder()
            .services(vec![DiscoveredService::new(
                uuids::MACHINE_SERVICE,
                [uuids::MACHINE_VERSION],
            )])
            .build(),
    );
    let result = session(&transport).execute().await;

    assert_eq!(
        result,
        SessionResult::Failure(FailureReason::CharacteristicNotFound {
            characteristic: uuids::MACHINE_REQUESTED_STATE,
        })
    );
    assert_eq!(transport.disconnect_count(), 1);
    assert!(transport.writes().is_empty());
    assert_torn_down_once(&transport);
}

#[tokio::test]
async fn test_missing_service() {
    let transport = Arc::new(
        MockTransport::builder()
            .services(vec![DiscoveredService::new(uuids::GAP_SERVICE, [])])
            .build(),
    );
    let result = session(&transport).execute().await;

    assert_eq!(result.label(), "service-not-found");
    assert_eq!(transport.disconnect_count(), 1);
    assert_torn_down_once(&transport);
}

#[tokio::test]
async fn test_discovery_failure_status() {
    let transport = Arc::new(
        MockTransport::builder()
            .discovery(DiscoveryBehavior::Report(GattStatus::FAILURE))
            .build(),
    );
    let result = session(&transport).execute().await;

    assert_eq!(
        result,
        SessionResult::Failure(FailureReason::DiscoveryFailed {
            status: GattStatus::FAILURE
        })
    );
    assert_torn_down_once(&transport);
}

#[tokio::test]
async fn test_discovery_request_rejected() {
    let transport = Arc::new(
        MockTransport::builder()
            .discovery(DiscoveryBehavior::Reject)
            .build(),
    );
    let result = session(&transport).execute().await;

    assert_eq!(result.label(), "discovery-failed");
    assert_eq!(transport.disconnect_count(), 1);
    assert_torn_down_once(&transport);
}

#[tokio::test]
async fn test_write_failure_status_still_disconnects() {
    let transport = Arc::new(
        MockTransport::builder()
            .write(WriteBehavior::Complete(GattStatus::WRITE_NOT_PERMITTED))
            .build(),
    );
    let result = session(&transport).execute().await;

    assert_eq!(
        result,
        SessionResult::Failure(FailureReason::WriteFailed {
            status: Some(GattStatus::WRITE_NOT_PERMITTED)
        })
    );
    assert_eq!(transport.disconnect_count(), 1);
    assert_torn_down_once(&transport);
}

#[tokio::test]
async fn test_write_rejected_by_stack() {
    let transport = Arc::new(
        MockTransport::builder()
            .write(WriteBehavior::Reject)
            .build(),
    );
    let result = session(&transport).execute().await;

    assert_eq!(
        result,
        SessionResult::Failure(FailureReason::WriteFailed { status: None })
    );
    assert_eq!(transport.disconnect_count(), 1);
    assert_torn_down_once(&transport);
}

#[tokio::test]
async fn test_connect_initiation_error() {
    let transport = Arc::new(
        MockTransport::builder()
            .connect(ConnectBehavior::Refuse("adapter unavailable".into()))
            .build(),
    );
    let started = Instant::now();
    let result = session(&transport).execute().await;

    match result {
        SessionResult::Failure(FailureReason::ConnectError { message }) => {
            assert!(message.contains("adapter unavailable"));
        }
        other => panic!("expected connect-error, got {other}"),
    }
    // Resolves immediately, not at the deadline.
    assert!(started.elapsed() < DEADLINE);
    assert_eq!(transport.disconnect_count(), 0);
    assert_eq!(transport.release_count(), 0);
}

#[tokio::test]
async fn test_connect_error_status() {
    let transport = Arc::new(
        MockTransport::builder()
            .connect(ConnectBehavior::Status(GattStatus::FAILURE))
            .build(),
    );
    let result = session(&transport).execute().await;

    assert_eq!(result.label(), "connect-error");
    assert_torn_down_once(&transport);
}

#[tokio::test]
async fn test_link_dropped_while_connecting() {
    let transport = Arc::new(
        MockTransport::builder()
            .connect(ConnectBehavior::DropLink)
            .build(),
    );
    let report = session(&transport).run().await;

    assert_eq!(
        report.result,
        SessionResult::Failure(FailureReason::DisconnectedEarly)
    );
    // Link already down: release only.
    assert!(!report.disconnect_requested);
    assert_eq!(transport.disconnect_count(), 0);
    assert_torn_down_once(&transport);
}

#[tokio::test]
async fn test_link_dropped_while_awaiting_write() {
    let transport = Arc::new(MockTransport::builder().write(WriteBehavior::Silent).build());
    let session = session(&transport);

    let handle = tokio::spawn(session.run());
    tokio::time::sleep(Duration::from_millis(60)).await;
    assert_eq!(transport.writes().len(), 1);

    let write_handle = transport.writes()[0].handle;
    assert!(transport.inject(TransportEvent::ConnectionStateChanged {
        handle: write_handle,
        status: GattStatus::SUCCESS,
        state: LinkState::Disconnected,
    }));

    let report = handle.await.unwrap();
    assert_eq!(
        report.result,
        SessionResult::Failure(FailureReason::DisconnectedEarly)
    );
    assert_torn_down_once(&transport);
}

// =============================================================================
// Deadline, termination and teardown
// =============================================================================

#[tokio::test]
async fn test_timeout_under_silence() {
    let transport = Arc::new(MockTransport::silent());
    let started = Instant::now();
    let report = session(&transport).run().await;

    assert_eq!(report.result, SessionResult::Timeout);
    assert!(started.elapsed() >= DEADLINE);
    assert!(started.elapsed() < DEADLINE + GRACE + SLACK);
    assert!(report.disconnect_requested);
    assert!(report.released);
    assert_eq!(transport.disconnect_count(), 1);
    assert_torn_down_once(&transport);
}

#[tokio::test]
async fn test_zero_deadline_times_out_without_connecting() {
    let transport = Arc::new(MockTransport::builder().build());
    let report = CommandSession::new(transport.clone(), address(), CommandDescriptor::machine_sleep())
        .with_config(config().deadline(Duration::ZERO))
        .run()
        .await;

    assert_eq!(report.result, SessionResult::Timeout);
    assert!(report.elapsed < SLACK);
    assert!(!report.disconnect_requested);
    assert!(!report.released);
    assert_eq!(transport.connect_count(), 0);
    assert_eq!(transport.disconnect_count(), 0);
    assert_eq!(transport.open_links(), 0);
}

#[tokio::test]
async fn test_always_terminates_when_every_stage_is_silent() {
    let scripts = [
        MockTransport::builder().connect(ConnectBehavior::Silent).build(),
        MockTransport::builder()
            .discovery(DiscoveryBehavior::Silent)
            .build(),
        MockTransport::builder().write(WriteBehavior::Silent).build(),
        // Link never reports down after the write: grace expires.
        MockTransport::builder().disconnect_reports(0).build(),
    ];

    for transport in scripts {
        let transport = Arc::new(transport);
        let started = Instant::now();
        let report = session(&transport).run().await;

        assert!(
            started.elapsed() < DEADLINE + GRACE + SLACK,
            "took {:?}",
            started.elapsed()
        );
        assert!(report.released);
        assert_torn_down_once(&transport);
    }
}

#[tokio::test]
async fn test_success_released_after_grace_when_link_silent() {
    let transport = Arc::new(MockTransport::builder().disconnect_reports(0).build());
    let started = Instant::now();
    let report = session(&transport).run().await;

    assert_eq!(report.result, SessionResult::Success);
    assert!(started.elapsed() < DEADLINE);
    assert!(report.released);
    assert_torn_down_once(&transport);
}

#[tokio::test]
async fn test_duplicate_disconnect_events_release_once() {
    let transport = Arc::new(MockTransport::builder().disconnect_reports(4).build());
    let result = session(&transport).execute().await;

    assert_eq!(result, SessionResult::Success);
    assert_eq!(transport.disconnect_count(), 1);
    assert_eq!(transport.release_count(), 1);
}

#[tokio::test]
async fn test_late_success_after_timeout_is_ignored() {
    let transport = Arc::new(
        MockTransport::builder()
            .write_latency(DEADLINE * 2)
            .build(),
    );
    let report = session(&transport).run().await;
    assert_eq!(report.result, SessionResult::Timeout);
    assert_eq!(transport.disconnect_count(), 1);
    assert_eq!(transport.release_count(), 1);

    // Let the late write-complete land on the released handle.
    tokio::time::sleep(DEADLINE * 2).await;
    assert_eq!(transport.writes().len(), 1);
    assert_eq!(transport.disconnect_count(), 1);
    assert_eq!(transport.release_count(), 1);
    assert_eq!(transport.open_links(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_race_between_deadline_and_success() {
    let deadline = Duration::from_millis(40);
    let mut successes = 0u32;
    let mut timeouts = 0u32;

    // Write latencies from well before the deadline to well after it.
    let latencies = [5u64, 5, 5, 30, 34, 38, 40, 42, 46, 50, 120, 120, 120];
    for write_latency in latencies {
        let transport = Arc::new(
            MockTransport::builder()
                .latency(Duration::from_millis(2))
                .write_latency(Duration::from_millis(write_latency))
                .build(),
        );
        let result = CommandSession::new(
            transport.clone(),
            address(),
            CommandDescriptor::machine_sleep(),
        )
        .with_config(config().deadline(deadline))
        .execute()
        .await;

        match result {
            SessionResult::Success => successes += 1,
            SessionResult::Timeout => timeouts += 1,
            other => panic!("unexpected result {other}"),
        }
        assert_eq!(transport.writes().len(), 1);
        assert_torn_down_once(&transport);
    }

    assert_eq!(successes + timeouts, latencies.len() as u32);
    assert!(successes > 0, "no write beat the deadline");
    assert!(timeouts > 0, "deadline never won");
}

// =============================================================================
// Cancellation and capabilities
// =============================================================================

#[tokio::test]
async fn test_cancellation_competes_at_the_gate() {
    let transport = Arc::new(MockTransport::silent());
    let token = CancellationToken::new();
    let cancel = token.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(30)).await;
        cancel.cancel();
    });

    let started = Instant::now();
    let result = session(&transport).execute_with_cancel(token).await;

    assert_eq!(result, SessionResult::Failure(FailureReason::Cancelled));
    assert!(started.elapsed() < DEADLINE);
    assert_torn_down_once(&transport);
}

#[tokio::test]
async fn test_cancel_after_success_does_not_change_result() {
    let transport = Arc::new(MockTransport::machine());
    let token = CancellationToken::new();
    let report = session(&transport).run_with_cancel(token.clone()).await;
    token.cancel();

    assert_eq!(report.result, SessionResult::Success);
}

#[tokio::test]
async fn test_legacy_stack_writes_without_acknowledgement() {
    let transport = Arc::new(
        MockTransport::builder()
            .legacy_writes()
            .write(WriteBehavior::Complete(GattStatus::WRITE_NOT_PERMITTED))
            .build(),
    );
    let result = session(&transport).execute().await;

    // Completion only means the stack took the bytes.
    assert_eq!(result, SessionResult::Success);
    let writes = transport.writes();
    assert_eq!(writes[0].request.mode, WriteMode::Default);
    assert!(!writes[0].acknowledged);
}

#[tokio::test]
async fn test_no_response_mode_on_modern_stack() {
    let transport = Arc::new(MockTransport::machine());
    let command = CommandDescriptor::machine_sleep().with_write_mode(WriteMode::NoResponse);
    let result = CommandSession::new(transport.clone(), address(), command)
        .with_config(config())
        .execute()
        .await;

    assert_eq!(result, SessionResult::Success);
    assert!(!transport.writes()[0].acknowledged);
}
