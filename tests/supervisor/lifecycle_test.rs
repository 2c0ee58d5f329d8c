//! Start, stop, restart, and reconcile against a scripted process table.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use overseer::supervisor::{ServerState, Supervisor, SupervisorError};

use crate::fakes::{fast_settings, FakeHost, FakeProber, RecordingNotifier};

struct Rig {
    host: Arc<FakeHost>,
    notifier: Arc<RecordingNotifier>,
    supervisor: Supervisor,
    dir: tempfile::TempDir,
}

fn rig(host: FakeHost) -> Rig {
    let dir = tempfile::tempdir().expect("tempdir");
    let host = Arc::new(host);
    let notifier = Arc::new(RecordingNotifier::default());
    let supervisor = Supervisor::new(fast_settings(dir.path()), host.clone(), notifier.clone());
    Rig {
        host,
        notifier,
        supervisor,
        dir,
    }
}

#[tokio::test]
async fn start_without_prober_goes_online() {
    let rig = rig(FakeHost::default());

    let report = rig.supervisor.start().await.expect("start");
    assert_eq!(report.state, ServerState::Online);
    assert_eq!(rig.supervisor.state(), ServerState::Online);
    assert_eq!(rig.host.launches(), 1);

    let transitions = rig.notifier.wait_for_transitions(2).await;
    assert_eq!(transitions.len(), 2);
    assert!(transitions.contains(&(ServerState::Offline, ServerState::Starting)));
    assert!(transitions.contains(&(ServerState::Starting, ServerState::Online)));
}

#[tokio::test]
async fn unresponsive_server_stays_starting() {
    let dir = tempfile::tempdir().expect("tempdir");
    let host = Arc::new(FakeHost::default());
    let prober = Arc::new(FakeProber::default());
    let supervisor = Supervisor::new(
        fast_settings(dir.path()),
        host.clone(),
        Arc::new(RecordingNotifier::default()),
    )
    .with_prober(prober.clone());

    let report = supervisor.start().await.expect("alive counts as started");
    assert_eq!(report.state, ServerState::Starting);

    prober.responsive.store(true, Ordering::SeqCst);
    assert_eq!(supervisor.reconcile().await, ServerState::Online);
}

#[tokio::test]
async fn start_refuses_second_instance() {
    let rig = rig(FakeHost::running());
    let err = rig.supervisor.start().await.expect_err("already running");
    assert!(matches!(err, SupervisorError::AlreadyRunning));
    assert_eq!(rig.host.launches(), 0);
}

#[tokio::test]
async fn failed_launch_returns_offline_and_notifies() {
    let host = FakeHost::default();
    host.launch_fails.store(true, Ordering::SeqCst);
    let rig = rig(host);

    let err = rig.supervisor.start().await.expect_err("launch fails");
    assert!(matches!(err, SupervisorError::StartFailed(_)));
    assert_eq!(rig.supervisor.state(), ServerState::Offline);
    assert!(rig
        .notifier
        .messages()
        .iter()
        .any(|m| m.starts_with("Server start failed")));
}

#[tokio::test]
async fn missing_working_dir_is_config_error() {
    let rig = rig(FakeHost::default());
    let mut settings = (*rig.supervisor.settings()).clone();
    settings.server.working_dir = rig.dir.path().join("missing");
    rig.supervisor.reconfigure(settings);

    let err = rig.supervisor.start().await.expect_err("bad dir");
    assert!(matches!(err, SupervisorError::Config(_)));
}

#[tokio::test]
async fn stop_with_nothing_running_succeeds() {
    let rig = rig(FakeHost::default());
    let report = rig.supervisor.stop(true).await.expect("stop");
    assert!(!report.was_running);
    assert_eq!(rig.supervisor.state(), ServerState::Offline);
}

#[tokio::test]
async fn stop_terminates_and_goes_offline() {
    let rig = rig(FakeHost::running());
    rig.supervisor.detect_initial().await;

    let report = rig.supervisor.stop(true).await.expect("stop");
    assert!(report.was_running);
    assert!(!report.graceful_exit);
    assert_eq!(report.terminated, 1);
    assert_eq!(rig.supervisor.state(), ServerState::Offline);
}

fn graceful_rig(host: Arc<FakeHost>, prober: Arc<FakeProber>) -> (Supervisor, tempfile::TempDir) {
    let dir = tempfile::tempdir().expect("tempdir");
    let supervisor = Supervisor::new(
        fast_settings(dir.path()),
        host,
        Arc::new(RecordingNotifier::default()),
    )
    .with_prober(prober);
    (supervisor, dir)
}

#[tokio::test]
async fn accepted_shutdown_exits_without_termination() {
    let host = Arc::new(FakeHost::running());
    let prober = Arc::new(FakeProber::accepting(Some(host.clone())));
    let (supervisor, _dir) = graceful_rig(host.clone(), prober.clone());

    let report = supervisor.stop(true).await.expect("stop");
    assert!(report.was_running);
    assert!(report.graceful_exit);
    assert_eq!(report.terminated, 0);
    assert_eq!(prober.shutdown_requests(), 1);
    assert_eq!(host.terminations.load(Ordering::SeqCst), 0);
    assert_eq!(supervisor.state(), ServerState::Offline);
}

#[tokio::test]
async fn lingering_server_is_terminated_after_graceful_window() {
    let host = Arc::new(FakeHost::running());
    let prober = Arc::new(FakeProber::accepting(None));
    let (supervisor, _dir) = graceful_rig(host.clone(), prober.clone());

    let report = supervisor.stop(true).await.expect("stop");
    assert!(report.was_running);
    assert!(!report.graceful_exit);
    assert_eq!(report.terminated, 1);
    assert_eq!(prober.shutdown_requests(), 1);
    assert_eq!(host.terminations.load(Ordering::SeqCst), 1);
    assert!(!host.running.load(Ordering::SeqCst));
}

#[tokio::test]
async fn forced_stop_skips_the_shutdown_request() {
    let host = Arc::new(FakeHost::running());
    let prober = Arc::new(FakeProber::accepting(Some(host.clone())));
    let (supervisor, _dir) = graceful_rig(host.clone(), prober.clone());

    let report = supervisor.stop(false).await.expect("stop");
    assert!(!report.graceful_exit);
    assert_eq!(report.terminated, 1);
    assert_eq!(prober.shutdown_requests(), 0);
}

#[tokio::test]
async fn restart_aborts_when_process_survives() {
    let host = FakeHost::running();
    host.immortal.store(true, Ordering::SeqCst);
    let rig = rig(host);
    rig.supervisor.detect_initial().await;

    let err = rig.supervisor.restart(true).await.expect_err("stop fails");
    assert!(matches!(err, SupervisorError::RestartAborted(_)));
    assert_eq!(rig.host.launches(), 0);
    assert_eq!(rig.supervisor.state(), ServerState::Offline);
    assert!(rig
        .notifier
        .messages()
        .iter()
        .any(|m| m.starts_with("Restart aborted")));
}

#[tokio::test]
async fn restart_relaunches_once() {
    let rig = rig(FakeHost::running());
    rig.supervisor.detect_initial().await;

    let report = rig.supervisor.restart(true).await.expect("restart");
    assert_eq!(report.state, ServerState::Online);
    assert_eq!(rig.host.launches(), 1);
}

#[tokio::test]
async fn initial_detection_is_silent() {
    let rig = rig(FakeHost::running());
    assert_eq!(rig.supervisor.detect_initial().await, ServerState::Online);

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(rig.notifier.transitions().is_empty());
}

#[tokio::test]
async fn online_never_survives_a_missing_process() {
    let rig = rig(FakeHost::running());
    rig.supervisor.detect_initial().await;
    assert_eq!(rig.supervisor.state(), ServerState::Online);

    rig.host.set_running(false);
    assert_eq!(rig.supervisor.reconcile().await, ServerState::Offline);
}

#[tokio::test]
async fn unexpected_process_is_adopted() {
    let rig = rig(FakeHost::default());
    rig.supervisor.detect_initial().await;
    assert_eq!(rig.supervisor.state(), ServerState::Offline);

    rig.host.set_running(true);
    assert_eq!(rig.supervisor.reconcile().await, ServerState::Starting);
    assert_eq!(rig.supervisor.reconcile().await, ServerState::Online);
}

#[tokio::test]
async fn overlapping_actions_report_busy() {
    let host = FakeHost::default();
    *host.launch_delay.lock().expect("delay lock") = Duration::from_millis(300);
    let rig = rig(host);
    let supervisor = Arc::new(rig.supervisor);

    let starter = {
        let supervisor = Arc::clone(&supervisor);
        tokio::spawn(async move { supervisor.start().await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;

    let err = supervisor.stop(false).await.expect_err("lock is held");
    assert!(matches!(err, SupervisorError::Busy));
    assert_eq!(supervisor.reconcile().await, ServerState::Starting);

    let report = starter.await.expect("join").expect("start");
    assert_eq!(report.state, ServerState::Online);
}

#[tokio::test]
async fn lock_file_of_live_process_blocks_actions() {
    let dir = tempfile::tempdir().expect("tempdir");
    let lock_path = dir.path().join("overseer.lock");
    std::fs::write(&lock_path, "999").expect("write lock");

    let host = Arc::new(FakeHost::default());
    host.alive_pids.lock().expect("pids lock").push(999);
    let supervisor = Supervisor::new(
        fast_settings(dir.path()),
        host.clone(),
        Arc::new(RecordingNotifier::default()),
    )
    .with_lock_file(lock_path.clone());

    let err = supervisor.start().await.expect_err("held elsewhere");
    assert!(matches!(err, SupervisorError::Busy));

    host.alive_pids.lock().expect("pids lock").clear();
    supervisor.start().await.expect("stale lock is reclaimed");
    assert!(!lock_path.exists());
}

#[tokio::test]
async fn empty_lock_file_being_written_blocks_actions() {
    let rig = rig(FakeHost::default());
    let lock_path = rig.dir.path().join("overseer.lock");
    std::fs::write(&lock_path, "").expect("write lock");
    let supervisor = Supervisor::new(
        fast_settings(rig.dir.path()),
        rig.host.clone(),
        rig.notifier.clone(),
    )
    .with_lock_file(lock_path.clone());

    let err = supervisor.start().await.expect_err("holder still writing");
    assert!(matches!(err, SupervisorError::Busy));
    assert_eq!(rig.host.launches(), 0);
    assert!(lock_path.exists());
}
