//! End-to-end checkpoint sessions: frames in, operator commands in, views out.

#![allow(clippy::unwrap_used)]

use checkpoint::acquisition::{
    AcquisitionConfig, AcquisitionState, CameraError, ChannelSource, ScannerControl, ScriptedSource,
};
use checkpoint::controller::CheckpointStore;
use checkpoint::presentation::{ResultDisplay, ResultView, Severity};
use checkpoint::session::{CheckpointState, Phase};
use async_trait::async_trait;
use checkpoint::store::{InMemoryTicketStore, TicketStore, TicketStoreError, UpdateOutcome};
use checkpoint::{
    CheckpointController, CheckpointError, OperatorCommand, OutcomeKind, Ticket, TicketId,
    TicketStatus, TicketUpdate, ValidationEngine,
};
use gatecheck_testing::test_clock;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

const FAST: AcquisitionConfig = AcquisitionConfig {
    samples_per_second: 100,
    region_size: 250,
};

/// What the operator saw, in order.
#[derive(Clone, Debug, PartialEq, Eq)]
enum View {
    Scanner,
    Validating(String),
    Result(Severity, String),
}

#[derive(Default)]
struct RecordingDisplay {
    views: Mutex<Vec<View>>,
}

impl RecordingDisplay {
    fn views(&self) -> Vec<View> {
        self.views.lock().unwrap().clone()
    }

    fn push(&self, view: View) {
        self.views.lock().unwrap().push(view);
    }
}

impl ResultDisplay for RecordingDisplay {
    fn show_validating(&self, code: &str) {
        self.push(View::Validating(code.to_string()));
    }

    fn show_result(&self, view: &ResultView) {
        self.push(View::Result(view.severity, view.headline.clone()));
    }

    fn show_scanner(&self) {
        self.push(View::Scanner);
    }
}

async fn ticket_store() -> InMemoryTicketStore {
    let store = InMemoryTicketStore::new(Arc::new(test_clock()));
    store
        .insert(Ticket::new(TicketId::parse("ABC123").unwrap(), TicketStatus::Valid, "Ana"))
        .await;
    store
        .insert(Ticket::new(TicketId::parse("XYZ789").unwrap(), TicketStatus::Cancelled, "Bia"))
        .await;
    store
}

async fn wait_for<F>(store: &CheckpointStore, what: &str, check: F)
where
    F: Fn(&CheckpointState) -> bool,
{
    let mut satisfied = false;
    for _ in 0..300 {
        if store.state(|s| check(s)).await {
            satisfied = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(satisfied, "timed out waiting for {what}");
}

async fn wait_for_scanner(scanner: &impl ScannerControl, expected: AcquisitionState) {
    let mut reached = false;
    for _ in 0..300 {
        if scanner.state() == expected {
            reached = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(reached, "scanner never reached {expected:?}");
}

fn shown(kind: OutcomeKind) -> impl Fn(&CheckpointState) -> bool {
    move |s| s.phase == Phase::ResultShown { kind }
}

#[tokio::test]
async fn one_scan_one_result_until_scan_next() {
    let store = ticket_store().await;
    let display = Arc::new(RecordingDisplay::default());
    let (frames, source) = ChannelSource::channel();

    let controller = CheckpointController::start(
        source,
        FAST,
        ValidationEngine::new(Arc::new(store.clone())),
        display.clone(),
        Some("Gate A".to_string()),
    )
    .await
    .unwrap();
    let session = controller.store();
    let scanner = controller.acquisition();
    let (commands, command_rx) = mpsc::channel(4);
    let running = tokio::spawn(controller.run(command_rx));

    frames.send(Some("ABC123".to_string())).unwrap();
    wait_for(&session, "admission", shown(OutcomeKind::Admitted)).await;
    assert_eq!(scanner.state(), AcquisitionState::Paused);

    // The code stays in frame: no second validation while the result is up
    tokio::time::sleep(Duration::from_millis(80)).await;
    assert_eq!(session.state(|s| s.tally.total()).await, 1);

    // Dismissing re-arms, but the same presentation does not fire again
    commands.send(OperatorCommand::ScanNext).await.unwrap();
    wait_for(&session, "idle", |s| s.phase.is_idle()).await;
    wait_for_scanner(&scanner, AcquisitionState::Scanning).await;
    tokio::time::sleep(Duration::from_millis(80)).await;
    assert!(session.state(|s| s.phase.is_idle()).await);

    // Taking the ticket away and presenting it again is a new presentation
    frames.send(None).unwrap();
    frames.send(Some("ABC123".to_string())).unwrap();
    wait_for(&session, "duplicate", shown(OutcomeKind::AlreadyUsed)).await;
    let last = session.state(|s| s.last_outcome.clone()).await.unwrap();
    assert_eq!(last.detail, "Checked in at 20:15:30 by Gate A");

    commands.send(OperatorCommand::Quit).await.unwrap();
    let tally = running.await.unwrap().unwrap();
    assert_eq!(tally.admitted, 1);
    assert_eq!(tally.duplicates, 1);
    assert_eq!(tally.total(), 2);

    assert_eq!(
        display.views(),
        vec![
            View::Scanner,
            View::Validating("ABC123".to_string()),
            View::Result(Severity::Success, "Entry Granted".to_string()),
            View::Scanner,
            View::Validating("ABC123".to_string()),
            View::Result(Severity::Warning, "Ticket Already Used".to_string()),
        ]
    );
}

#[tokio::test]
async fn system_error_waits_for_operator_before_retry() {
    let store = ticket_store().await;
    store.set_outage(true);
    let display = Arc::new(RecordingDisplay::default());
    let (frames, source) = ChannelSource::channel();

    let controller = CheckpointController::start(
        source,
        FAST,
        ValidationEngine::new(Arc::new(store.clone())),
        display.clone(),
        None,
    )
    .await
    .unwrap();
    let session = controller.store();
    let scanner = controller.acquisition();
    let (commands, command_rx) = mpsc::channel(4);
    let running = tokio::spawn(controller.run(command_rx));

    frames.send(Some("ABC123".to_string())).unwrap();
    wait_for(&session, "system error", shown(OutcomeKind::SystemError)).await;

    // No automatic retry, even once the store is back
    store.set_outage(false);
    frames.send(None).unwrap();
    frames.send(Some("ABC123".to_string())).unwrap();
    tokio::time::sleep(Duration::from_millis(80)).await;
    assert!(session.state(|s| s.phase.is_result_shown()).await);
    assert_eq!(scanner.state(), AcquisitionState::Paused);

    // The code presented while paused was never emitted, so re-arming picks it up
    commands.send(OperatorCommand::ScanNext).await.unwrap();
    wait_for(&session, "admission on retry", shown(OutcomeKind::Admitted)).await;

    commands.send(OperatorCommand::Quit).await.unwrap();
    let tally = running.await.unwrap().unwrap();
    assert_eq!(tally.system_errors, 1);
    assert_eq!(tally.admitted, 1);
}

/// Ticket store whose reads take a while, so a validation is still in flight when the
/// operator quits.
struct SlowReads {
    inner: InMemoryTicketStore,
    delay: Duration,
}

#[async_trait]
impl TicketStore for SlowReads {
    async fn get(&self, id: &TicketId) -> Result<Option<Ticket>, TicketStoreError> {
        tokio::time::sleep(self.delay).await;
        self.inner.get(id).await
    }

    async fn conditional_update(
        &self,
        id: &TicketId,
        expected: &TicketStatus,
        update: &TicketUpdate,
    ) -> Result<UpdateOutcome, TicketStoreError> {
        self.inner.conditional_update(id, expected, update).await
    }
}

#[tokio::test]
async fn quitting_mid_validation_still_counts_the_check_in() {
    let store = ticket_store().await;
    let display = Arc::new(RecordingDisplay::default());
    let (frames, source) = ChannelSource::channel();
    let slow = SlowReads {
        inner: store.clone(),
        delay: Duration::from_millis(200),
    };

    let controller = CheckpointController::start(
        source,
        FAST,
        ValidationEngine::new(Arc::new(slow)),
        display.clone(),
        None,
    )
    .await
    .unwrap();
    let session = controller.store();
    let (commands, command_rx) = mpsc::channel(4);
    let running = tokio::spawn(controller.run(command_rx));

    frames.send(Some("ABC123".to_string())).unwrap();
    wait_for(&session, "validation in flight", |s| s.phase.is_validating()).await;

    commands.send(OperatorCommand::Quit).await.unwrap();
    let tally = running.await.unwrap().unwrap();

    let ticket = store.snapshot(&TicketId::parse("ABC123").unwrap()).await.unwrap();
    assert_eq!(ticket.status, TicketStatus::CheckedIn);
    assert_eq!(tally.admitted, 1);
    assert_eq!(tally.total(), 1);
    assert_eq!(
        display.views().last(),
        Some(&View::Result(Severity::Success, "Entry Granted".to_string()))
    );
}

#[tokio::test]
async fn revoked_ticket_shows_error_bucket() {
    let store = ticket_store().await;
    let display = Arc::new(RecordingDisplay::default());
    let (frames, source) = ChannelSource::channel();

    let controller = CheckpointController::start(
        source,
        FAST,
        ValidationEngine::new(Arc::new(store)),
        display.clone(),
        None,
    )
    .await
    .unwrap();
    let session = controller.store();
    let (commands, command_rx) = mpsc::channel(4);
    let running = tokio::spawn(controller.run(command_rx));

    frames.send(Some("  XYZ789 ".to_string())).unwrap();
    wait_for(&session, "revocation", shown(OutcomeKind::Revoked)).await;

    commands.send(OperatorCommand::Quit).await.unwrap();
    let tally = running.await.unwrap().unwrap();
    assert_eq!(tally.rejected, 1);
    assert!(display
        .views()
        .contains(&View::Result(Severity::Error, "Ticket Cancelled".to_string())));
}

#[tokio::test]
async fn repeated_scan_next_is_a_no_op() {
    let store = ticket_store().await;
    let display = Arc::new(RecordingDisplay::default());
    let (_frames, source) = ChannelSource::channel();

    let controller = CheckpointController::start(
        source,
        FAST,
        ValidationEngine::new(Arc::new(store)),
        display.clone(),
        None,
    )
    .await
    .unwrap();
    let session = controller.store();
    let scanner = controller.acquisition();
    let (commands, command_rx) = mpsc::channel(4);
    let running = tokio::spawn(controller.run(command_rx));

    commands.send(OperatorCommand::ScanNext).await.unwrap();
    commands.send(OperatorCommand::ScanNext).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert!(session.state(|s| s.phase.is_idle()).await);
    assert_eq!(scanner.state(), AcquisitionState::Scanning);

    commands.send(OperatorCommand::Quit).await.unwrap();
    let tally = running.await.unwrap().unwrap();
    assert_eq!(tally.total(), 0);
    assert_eq!(display.views(), vec![View::Scanner]);
}

#[tokio::test]
async fn camera_permission_denied_ends_before_session() {
    let store = ticket_store().await;

    let result = CheckpointController::start(
        ScriptedSource::failing_open(CameraError::PermissionDenied),
        FAST,
        ValidationEngine::new(Arc::new(store)),
        Arc::new(RecordingDisplay::default()),
        None,
    )
    .await;

    assert!(matches!(
        result,
        Err(CheckpointError::Camera(CameraError::PermissionDenied))
    ));
}

#[tokio::test]
async fn device_failure_mid_session_is_reported() {
    let store = ticket_store().await;
    let source = ScriptedSource::new([None::<&str>, Some("ABC123"), None])
        .then_fail(CameraError::Device("unplugged".to_string()));
    let (_commands, command_rx) = mpsc::channel(4);

    let controller = CheckpointController::start(
        source,
        FAST,
        ValidationEngine::new(Arc::new(store.clone())),
        Arc::new(RecordingDisplay::default()),
        None,
    )
    .await
    .unwrap();

    let result = controller.run(command_rx).await;

    assert!(matches!(
        result,
        Err(CheckpointError::Camera(CameraError::Device(ref reason))) if reason == "unplugged"
    ));
    // The decode that came before the failure was still validated
    let ticket = store.snapshot(&TicketId::parse("ABC123").unwrap()).await.unwrap();
    assert_eq!(ticket.status, TicketStatus::CheckedIn);
}
