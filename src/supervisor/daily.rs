//! Daily shutdown and startup at fixed wall-clock times.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use chrono::{Local, NaiveDate, NaiveDateTime, NaiveTime, TimeDelta};
use tokio::sync::watch;
use tracing::{info, warn};

use super::scheduler::Announcer;
use super::{ServerState, Supervisor, SupervisorError};

/// Seconds after the configured minute during which a trigger may still fire.
pub const FIRE_WINDOW_SECS: i64 = 120;

const POLL_INTERVAL: Duration = Duration::from_secs(30);

/// Parse `HH:MM`.
///
/// # Errors
///
/// Returns an error if the value is not a valid 24-hour time.
pub fn parse_hhmm(value: &str) -> anyhow::Result<NaiveTime> {
    NaiveTime::parse_from_str(value.trim(), "%H:%M")
        .with_context(|| format!("invalid HH:MM time {value:?}"))
}

/// Fires at most once per calendar day inside `[at, at + 2 min)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DailyTrigger {
    at: NaiveTime,
    last_fired: Option<NaiveDate>,
}

impl DailyTrigger {
    /// Trigger at `at` every day.
    pub fn new(at: NaiveTime) -> Self {
        Self {
            at,
            last_fired: None,
        }
    }

    /// Trigger time.
    pub fn at(&self) -> NaiveTime {
        self.at
    }

    /// Whether to fire now. Records the firing so the same day never fires
    /// twice.
    pub fn should_fire(&mut self, now: NaiveDateTime) -> bool {
        let since = now.time().signed_duration_since(self.at);
        let in_window = since >= TimeDelta::zero() && since < TimeDelta::seconds(FIRE_WINDOW_SECS);
        let today = now.date();
        if !in_window || self.last_fired == Some(today) {
            return false;
        }
        self.last_fired = Some(today);
        true
    }
}

/// Stop the server every day at the trigger time, after a warning.
pub async fn run_daily_shutdown(
    supervisor: Arc<Supervisor>,
    announcer: Arc<dyn Announcer>,
    mut trigger: DailyTrigger,
    pre_announce: Duration,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    info!(at = %trigger.at().format("%H:%M"), "daily shutdown armed");
    loop {
        if trigger.should_fire(Local::now().naive_local()) {
            if supervisor.state() == ServerState::Offline {
                info!("daily shutdown time reached but server already offline");
            } else {
                let message = format!(
                    "Server shutting down for the night in {} seconds",
                    pre_announce.as_secs()
                );
                if let Err(e) = announcer.announce(&message).await {
                    warn!(error = %e, "daily shutdown announcement failed");
                }
                if wait_or_shutdown(pre_announce, &mut shutdown_rx).await {
                    break;
                }
                match supervisor.stop(true).await {
                    Ok(report) => info!(?report, "daily shutdown complete"),
                    Err(SupervisorError::Busy) => {
                        warn!("daily shutdown skipped, another action is running");
                    }
                    Err(e) => warn!(error = %e, "daily shutdown failed"),
                }
            }
        }
        if wait_or_shutdown(POLL_INTERVAL, &mut shutdown_rx).await {
            break;
        }
    }
    info!("daily shutdown task exiting");
}

/// Start the server every day at the trigger time if it is offline.
pub async fn run_daily_startup(
    supervisor: Arc<Supervisor>,
    mut trigger: DailyTrigger,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    info!(at = %trigger.at().format("%H:%M"), "daily startup armed");
    loop {
        if trigger.should_fire(Local::now().naive_local()) {
            if supervisor.state() == ServerState::Offline && !supervisor.is_running().await {
                match supervisor.start().await {
                    Ok(report) => info!(pid = report.pid, state = %report.state, "daily startup complete"),
                    Err(e) => warn!(error = %e, "daily startup failed"),
                }
            } else {
                info!("daily startup time reached but server is not offline");
            }
        }
        if wait_or_shutdown(POLL_INTERVAL, &mut shutdown_rx).await {
            break;
        }
    }
    info!("daily startup task exiting");
}

async fn wait_or_shutdown(duration: Duration, shutdown_rx: &mut watch::Receiver<bool>) -> bool {
    tokio::select! {
        () = tokio::time::sleep(duration) => false,
        result = shutdown_rx.changed() => result.is_err() || *shutdown_rx.borrow(),
    }
}
