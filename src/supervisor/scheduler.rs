//! Periodic restart scheduling aligned to local midnight.
//!
//! Restarts land on multiples of the interval counted from midnight, so a
//! 180-minute interval restarts at 00:00, 03:00, 06:00 and so on. Players
//! get announcements at each countdown threshold. Disabling the schedule
//! aborts a pending restart at the next sub-sleep boundary.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Local, NaiveDateTime, TimeDelta, TimeZone};
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::{ServerState, StartReport, Supervisor, SupervisorError};
use crate::config::ScheduleConfig;
use crate::rcon::GameAdmin;

/// Shortest accepted interval.
pub const MIN_INTERVAL_MINUTES: u64 = 10;

/// Interval used when the configured one is too short.
pub const FALLBACK_INTERVAL_MINUTES: u64 = 180;

/// Longest single sleep before the flag is checked again.
const MAX_SLEEP_CHUNK: Duration = Duration::from_secs(60);

const SECONDS_PER_DAY: u64 = 86_400;

/// Player-facing announcement channel.
#[async_trait]
pub trait Announcer: Send + Sync {
    /// Broadcast `message` in game.
    ///
    /// # Errors
    ///
    /// Returns an error if no channel accepted the message.
    async fn announce(&self, message: &str) -> anyhow::Result<()>;
}

#[async_trait]
impl Announcer for GameAdmin {
    async fn announce(&self, message: &str) -> anyhow::Result<()> {
        self.broadcast(message).await?;
        Ok(())
    }
}

/// The thing being restarted.
#[async_trait]
pub trait RestartTarget: Send + Sync {
    /// Current lifecycle state.
    fn server_state(&self) -> ServerState;

    /// Perform a graceful restart.
    ///
    /// # Errors
    ///
    /// Returns the supervisor failure.
    async fn scheduled_restart(&self) -> Result<StartReport, SupervisorError>;
}

#[async_trait]
impl RestartTarget for Supervisor {
    fn server_state(&self) -> ServerState {
        self.state()
    }

    async fn scheduled_restart(&self) -> Result<StartReport, SupervisorError> {
        self.restart(true).await
    }
}

/// Replace intervals under [`MIN_INTERVAL_MINUTES`] with the fallback.
pub fn effective_interval_minutes(minutes: u64) -> u64 {
    if minutes < MIN_INTERVAL_MINUTES {
        warn!(
            configured = minutes,
            fallback = FALLBACK_INTERVAL_MINUTES,
            "restart interval below minimum, using fallback"
        );
        FALLBACK_INTERVAL_MINUTES
    } else {
        minutes
    }
}

/// Smallest multiple of the interval after midnight that is strictly later
/// than `now`, capped at the next midnight.
pub fn next_restart_after(now: NaiveDateTime, interval_minutes: u64) -> NaiveDateTime {
    let interval_secs = effective_interval_minutes(interval_minutes).saturating_mul(60);
    let midnight = now.date().and_hms_opt(0, 0, 0).unwrap_or(now);
    let elapsed = u64::try_from(now.signed_duration_since(midnight).num_seconds()).unwrap_or(0);

    let slots = elapsed
        .checked_div(interval_secs)
        .unwrap_or(0)
        .saturating_add(1);
    let offset = slots.saturating_mul(interval_secs).min(SECONDS_PER_DAY);

    let offset = i64::try_from(offset).unwrap_or(i64::MAX);
    midnight
        .checked_add_signed(TimeDelta::seconds(offset))
        .unwrap_or(now)
}

/// [`next_restart_after`] in local time.
///
/// Falls back to `now + interval` when the computed wall-clock time does not
/// exist (DST gap).
pub fn next_restart_local(now: DateTime<Local>, interval_minutes: u64) -> DateTime<Local> {
    let naive = next_restart_after(now.naive_local(), interval_minutes);
    Local.from_local_datetime(&naive).earliest().unwrap_or_else(|| {
        let minutes = i64::try_from(effective_interval_minutes(interval_minutes)).unwrap_or(0);
        now.checked_add_signed(TimeDelta::minutes(minutes))
            .unwrap_or(now)
    })
}

/// Thresholds still ahead when `remaining_secs` are left, longest first.
pub fn countdown_steps(thresholds: &[u64], remaining_secs: u64) -> Vec<u64> {
    let mut steps: Vec<u64> = thresholds
        .iter()
        .copied()
        .filter(|t| *t <= remaining_secs)
        .collect();
    steps.sort_unstable_by(|a, b| b.cmp(a));
    steps.dedup();
    steps
}

/// Player-facing countdown text.
pub fn countdown_message(seconds_left: u64) -> String {
    match seconds_left {
        0 => "Server is restarting now".to_owned(),
        60 => "Server restart in 1 minute".to_owned(),
        s if s % 60 == 0 => format!("Server restart in {} minutes", s / 60),
        s => format!("Server restart in {s} seconds"),
    }
}

/// How one scheduling cycle ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    /// The restart ran and succeeded.
    Restarted,
    /// The restart ran and failed.
    RestartFailed(String),
    /// The schedule was disabled before the restart fired.
    Cancelled,
    /// The server was offline; nothing to restart.
    SkippedOffline,
    /// Shutdown was signalled.
    Shutdown,
}

/// Long-running restart scheduler.
pub struct RestartScheduler {
    enabled: AtomicBool,
    interval_minutes: AtomicU64,
    thresholds: Mutex<Vec<u64>>,
    next: Mutex<Option<DateTime<Local>>>,
    announcer: Arc<dyn Announcer>,
    target: Arc<dyn RestartTarget>,
}

impl std::fmt::Debug for RestartScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RestartScheduler")
            .field("enabled", &self.is_enabled())
            .field("interval_minutes", &self.interval_minutes())
            .field("next", &self.next_restart())
            .finish_non_exhaustive()
    }
}

impl RestartScheduler {
    /// Build a scheduler from config.
    pub fn new(
        config: &ScheduleConfig,
        announcer: Arc<dyn Announcer>,
        target: Arc<dyn RestartTarget>,
    ) -> Self {
        Self {
            enabled: AtomicBool::new(config.enabled),
            interval_minutes: AtomicU64::new(effective_interval_minutes(config.interval_minutes)),
            thresholds: Mutex::new(config.announce_thresholds.clone()),
            next: Mutex::new(None),
            announcer,
            target,
        }
    }

    /// Turn automatic restarts on or off. Takes effect at the next
    /// sub-sleep boundary.
    pub fn set_enabled(&self, enabled: bool) {
        let was = self.enabled.swap(enabled, Ordering::SeqCst);
        if was != enabled {
            info!(enabled, "automatic restarts toggled");
        }
        if !enabled {
            self.set_next(None);
        }
    }

    /// Whether automatic restarts are on.
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    /// Effective interval in minutes.
    pub fn interval_minutes(&self) -> u64 {
        self.interval_minutes.load(Ordering::Relaxed)
    }

    /// Apply a reloaded schedule. The interval applies from the next cycle.
    pub fn reconfigure(&self, config: &ScheduleConfig) {
        self.interval_minutes.store(
            effective_interval_minutes(config.interval_minutes),
            Ordering::Relaxed,
        );
        *self.thresholds.lock().unwrap_or_else(PoisonError::into_inner) =
            config.announce_thresholds.clone();
        self.set_enabled(config.enabled);
    }

    /// Pending restart time, `None` when disabled or not yet computed.
    pub fn next_restart(&self) -> Option<DateTime<Local>> {
        *self.next.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_next(&self, next: Option<DateTime<Local>>) {
        *self.next.lock().unwrap_or_else(PoisonError::into_inner) = next;
    }

    fn thresholds(&self) -> Vec<u64> {
        self.thresholds
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Run cycles until shutdown.
    pub async fn run(self: Arc<Self>, mut shutdown_rx: watch::Receiver<bool>) {
        info!(
            enabled = self.is_enabled(),
            interval_minutes = self.interval_minutes(),
            "restart scheduler started"
        );
        loop {
            if !self.is_enabled() {
                if sleep_or_shutdown(MAX_SLEEP_CHUNK, &mut shutdown_rx).await {
                    break;
                }
                continue;
            }

            let now = Local::now();
            let target = next_restart_local(now, self.interval_minutes());
            let remaining = target
                .signed_duration_since(now)
                .to_std()
                .unwrap_or(Duration::ZERO);

            match self.run_cycle(target, remaining, &mut shutdown_rx).await {
                CycleOutcome::Shutdown => break,
                outcome => debug!(?outcome, "restart cycle finished"),
            }
        }
        info!("restart scheduler shutting down");
    }

    /// Sleep toward `target` (which is `remaining` away), announce at each
    /// threshold, then restart unless disabled along the way.
    pub async fn run_cycle(
        &self,
        target: DateTime<Local>,
        remaining: Duration,
        shutdown_rx: &mut watch::Receiver<bool>,
    ) -> CycleOutcome {
        self.set_next(Some(target));
        info!(at = %target.format("%Y-%m-%d %H:%M:%S"), "next restart scheduled");

        let start = Instant::now();
        let deadline = start.checked_add(remaining).unwrap_or(start);
        let left = || deadline.saturating_duration_since(Instant::now());

        let thresholds = self.thresholds();
        let window = Duration::from_secs(thresholds.iter().copied().max().unwrap_or(0));

        // Pre-window sleep, in chunks so a toggle is noticed promptly.
        while left() > window {
            let chunk = left().saturating_sub(window).min(MAX_SLEEP_CHUNK);
            if sleep_or_shutdown(chunk, shutdown_rx).await {
                return CycleOutcome::Shutdown;
            }
            if !self.is_enabled() {
                info!("automatic restarts disabled, dropping pending restart");
                return CycleOutcome::Cancelled;
            }
        }

        if self.target.server_state() == ServerState::Offline {
            info!("server offline, skipping scheduled restart");
            self.sleep_until(deadline, shutdown_rx).await;
            return CycleOutcome::SkippedOffline;
        }

        let left_secs = left().saturating_add(Duration::from_millis(999)).as_secs();
        for threshold in countdown_steps(&thresholds, left_secs) {
            let wait = left().saturating_sub(Duration::from_secs(threshold));
            if !wait.is_zero() && sleep_or_shutdown(wait, shutdown_rx).await {
                return CycleOutcome::Shutdown;
            }
            if !self.is_enabled() {
                info!(threshold, "automatic restarts disabled mid-countdown, aborting");
                return CycleOutcome::Cancelled;
            }
            if let Err(e) = self.announcer.announce(&countdown_message(threshold)).await {
                warn!(error = %e, threshold, "restart announcement failed");
            }
        }

        if self.sleep_until(deadline, shutdown_rx).await {
            return CycleOutcome::Shutdown;
        }
        if !self.is_enabled() {
            info!("automatic restarts disabled before restart fired, aborting");
            return CycleOutcome::Cancelled;
        }

        info!("running scheduled restart");
        match self.target.scheduled_restart().await {
            Ok(report) => {
                info!(state = %report.state, "scheduled restart complete");
                CycleOutcome::Restarted
            }
            Err(e) => {
                warn!(error = %e, "scheduled restart failed");
                CycleOutcome::RestartFailed(e.to_string())
            }
        }
    }

    /// Returns true if shutdown was signalled.
    async fn sleep_until(&self, deadline: Instant, shutdown_rx: &mut watch::Receiver<bool>) -> bool {
        let wait = deadline.saturating_duration_since(Instant::now());
        !wait.is_zero() && sleep_or_shutdown(wait, shutdown_rx).await
    }
}

/// Sleep for `duration` unless shutdown arrives first. Returns true on
/// shutdown.
async fn sleep_or_shutdown(duration: Duration, shutdown_rx: &mut watch::Receiver<bool>) -> bool {
    if *shutdown_rx.borrow() {
        return true;
    }
    let sleep = tokio::time::sleep(duration);
    tokio::pin!(sleep);
    loop {
        tokio::select! {
            () = &mut sleep => return false,
            result = shutdown_rx.changed() => {
                if result.is_err() || *shutdown_rx.borrow() {
                    return true;
                }
            }
        }
    }
}
