//! Restart slot arithmetic and countdown cycles under paused time.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{Local, NaiveDate, NaiveDateTime};
use tokio::sync::watch;

use overseer::config::ScheduleConfig;
use overseer::supervisor::scheduler::{
    countdown_message, countdown_steps, effective_interval_minutes, next_restart_after,
    Announcer, CycleOutcome, RestartScheduler, RestartTarget,
};
use overseer::supervisor::{ServerState, StartReport, SupervisorError};

fn at(hour: u32, minute: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2026, 3, 14)
        .and_then(|d| d.and_hms_opt(hour, minute, 0))
        .expect("valid time")
}

#[test]
fn restarts_land_on_interval_multiples() {
    assert_eq!(next_restart_after(at(4, 10), 180), at(6, 0));
    assert_eq!(next_restart_after(at(0, 50), 45), at(1, 30));
}

#[test]
fn exact_slot_moves_to_the_next_one() {
    assert_eq!(next_restart_after(at(3, 0), 180), at(6, 0));
}

#[test]
fn last_slot_is_capped_at_midnight() {
    let midnight = NaiveDate::from_ymd_opt(2026, 3, 15)
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .expect("valid time");
    assert_eq!(next_restart_after(at(22, 30), 180), midnight);
    assert_eq!(next_restart_after(at(23, 0), 420), midnight);
}

#[test]
fn short_intervals_use_the_fallback() {
    assert_eq!(effective_interval_minutes(9), 180);
    assert_eq!(effective_interval_minutes(0), 180);
    assert_eq!(effective_interval_minutes(10), 10);
    assert_eq!(next_restart_after(at(1, 0), 5), at(3, 0));
}

#[test]
fn countdown_skips_thresholds_already_passed() {
    assert_eq!(countdown_steps(&[60, 1800, 0, 60], 100), vec![60, 0]);
    assert_eq!(countdown_message(120), "Server restart in 2 minutes");
    assert_eq!(countdown_message(60), "Server restart in 1 minute");
    assert_eq!(countdown_message(30), "Server restart in 30 seconds");
    assert_eq!(countdown_message(0), "Server is restarting now");
}

/// Records announcements; optionally disables the scheduler when a
/// message containing the trigger text goes out.
#[derive(Default)]
struct RecordingAnnouncer {
    messages: Mutex<Vec<String>>,
    disable_on: Mutex<Option<(String, Arc<RestartScheduler>)>>,
}

impl RecordingAnnouncer {
    fn messages(&self) -> Vec<String> {
        self.messages.lock().expect("messages lock").clone()
    }
}

#[async_trait]
impl Announcer for RecordingAnnouncer {
    async fn announce(&self, message: &str) -> anyhow::Result<()> {
        self.messages
            .lock()
            .expect("messages lock")
            .push(message.to_owned());
        let hook = self.disable_on.lock().expect("hook lock").clone();
        if let Some((trigger, scheduler)) = hook {
            if message.contains(&trigger) {
                scheduler.set_enabled(false);
            }
        }
        Ok(())
    }
}

struct FakeTarget {
    state: ServerState,
    restarts: AtomicUsize,
}

impl FakeTarget {
    fn new(state: ServerState) -> Self {
        Self {
            state,
            restarts: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl RestartTarget for FakeTarget {
    fn server_state(&self) -> ServerState {
        self.state
    }

    async fn scheduled_restart(&self) -> Result<StartReport, SupervisorError> {
        self.restarts.fetch_add(1, Ordering::SeqCst);
        Ok(StartReport {
            pid: 1,
            state: ServerState::Online,
        })
    }
}

fn schedule(thresholds: Vec<u64>) -> ScheduleConfig {
    ScheduleConfig {
        enabled: true,
        interval_minutes: 180,
        announce_thresholds: thresholds,
    }
}

fn build(
    thresholds: Vec<u64>,
    state: ServerState,
) -> (Arc<RestartScheduler>, Arc<RecordingAnnouncer>, Arc<FakeTarget>) {
    let announcer = Arc::new(RecordingAnnouncer::default());
    let target = Arc::new(FakeTarget::new(state));
    let scheduler = Arc::new(RestartScheduler::new(
        &schedule(thresholds),
        announcer.clone(),
        target.clone(),
    ));
    (scheduler, announcer, target)
}

#[tokio::test(start_paused = true)]
async fn cycle_announces_each_threshold_then_restarts() {
    let (scheduler, announcer, target) = build(vec![300, 60, 0], ServerState::Online);
    let (_tx, mut rx) = watch::channel(false);

    let outcome = scheduler
        .run_cycle(Local::now(), Duration::from_secs(600), &mut rx)
        .await;

    assert_eq!(outcome, CycleOutcome::Restarted);
    assert_eq!(
        announcer.messages(),
        vec![
            "Server restart in 5 minutes",
            "Server restart in 1 minute",
            "Server is restarting now",
        ]
    );
    assert_eq!(target.restarts.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn disabling_mid_countdown_cancels_the_restart() {
    let (scheduler, announcer, target) = build(vec![300, 60, 0], ServerState::Online);
    *announcer.disable_on.lock().expect("hook lock") =
        Some(("1 minute".to_owned(), Arc::clone(&scheduler)));
    let (_tx, mut rx) = watch::channel(false);

    let outcome = scheduler
        .run_cycle(Local::now(), Duration::from_secs(600), &mut rx)
        .await;

    assert_eq!(outcome, CycleOutcome::Cancelled);
    assert_eq!(
        announcer.messages(),
        vec!["Server restart in 5 minutes", "Server restart in 1 minute"]
    );
    assert_eq!(target.restarts.load(Ordering::SeqCst), 0);
    assert!(scheduler.next_restart().is_none());

    // Break the announcer -> scheduler cycle.
    announcer.disable_on.lock().expect("hook lock").take();
}

#[tokio::test(start_paused = true)]
async fn disabling_before_the_window_cancels_silently() {
    let (scheduler, announcer, target) = build(vec![60], ServerState::Online);
    let (_tx, mut rx) = watch::channel(false);

    let cycle = {
        let scheduler = Arc::clone(&scheduler);
        tokio::spawn(async move {
            scheduler
                .run_cycle(Local::now(), Duration::from_secs(3600), &mut rx)
                .await
        })
    };
    tokio::time::sleep(Duration::from_secs(120)).await;
    scheduler.set_enabled(false);

    assert_eq!(cycle.await.expect("join"), CycleOutcome::Cancelled);
    assert!(announcer.messages().is_empty());
    assert_eq!(target.restarts.load(Ordering::SeqCst), 0);
}

#[tokio::test(start_paused = true)]
async fn offline_server_is_not_restarted() {
    let (scheduler, announcer, target) = build(vec![60, 0], ServerState::Offline);
    let (_tx, mut rx) = watch::channel(false);

    let outcome = scheduler
        .run_cycle(Local::now(), Duration::from_secs(300), &mut rx)
        .await;

    assert_eq!(outcome, CycleOutcome::SkippedOffline);
    assert!(announcer.messages().is_empty());
    assert_eq!(target.restarts.load(Ordering::SeqCst), 0);
}

#[tokio::test(start_paused = true)]
async fn shutdown_interrupts_the_cycle() {
    let (scheduler, _announcer, target) = build(vec![60], ServerState::Online);
    let (tx, mut rx) = watch::channel(false);
    tx.send(true).expect("receiver alive");

    let outcome = scheduler
        .run_cycle(Local::now(), Duration::from_secs(600), &mut rx)
        .await;

    assert_eq!(outcome, CycleOutcome::Shutdown);
    assert_eq!(target.restarts.load(Ordering::SeqCst), 0);
}

#[test]
fn reconfigure_applies_interval_and_toggle() {
    let (scheduler, _announcer, _target) = build(vec![60], ServerState::Online);
    scheduler.reconfigure(&ScheduleConfig {
        enabled: false,
        interval_minutes: 5,
        announce_thresholds: vec![30],
    });
    assert!(!scheduler.is_enabled());
    assert_eq!(scheduler.interval_minutes(), 180);
}
