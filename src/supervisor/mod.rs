//! Process supervisor for the game server.
//!
//! Owns the [`ServerState`] machine, drives start/stop/restart, and runs the
//! background loop that reconciles state with what the OS and the status
//! endpoint report. Restart scheduling and daily triggers live in
//! [`scheduler`] and [`daily`].

pub mod daily;
pub mod lock;
pub mod process;
pub mod scheduler;
pub mod state;

use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::config::{OverseerConfig, SupervisorConfig, TimingsConfig};
use crate::prober::StatusProber;
use crate::rcon::GameAdmin;
use crate::sinks::NotificationSink;

pub use lock::ActionLock;
pub use process::{LaunchSpec, ProcessHost, SysinfoHost};
pub use state::{ServerState, StateCell, StateListener};

/// Why a supervisor action did not complete.
#[derive(Debug, thiserror::Error)]
pub enum SupervisorError {
    /// Another start/stop/restart holds the action lock.
    #[error("another supervisor action is in progress")]
    Busy,

    /// Missing directory, program, or other setup problem.
    #[error("configuration error: {0}")]
    Config(String),

    /// `start` found the server already running.
    #[error("server is already running")]
    AlreadyRunning,

    /// Launch failed or the process did not come up.
    #[error("start failed: {0}")]
    StartFailed(String),

    /// The process could not be confirmed gone.
    #[error("stop failed: {0}")]
    StopFailed(String),

    /// A restart stopped short; no second instance was launched.
    #[error("restart aborted: {0}")]
    RestartAborted(String),
}

/// The parts of [`OverseerConfig`] the supervisor reads.
#[derive(Debug, Clone, PartialEq)]
pub struct SupervisorSettings {
    /// Process definition.
    pub server: SupervisorConfig,
    /// Intervals and timeouts.
    pub timings: TimingsConfig,
}

impl SupervisorSettings {
    /// Extract supervisor settings from the full config.
    pub fn from_config(config: &OverseerConfig) -> Self {
        Self {
            server: config.server.clone(),
            timings: config.timings.clone(),
        }
    }

    fn poll_step(&self) -> Duration {
        Duration::from_millis(self.timings.poll_step_ms.max(1))
    }
}

/// Outcome of a successful start.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StartReport {
    /// PID of the launched child.
    pub pid: u32,
    /// `Online`, or `Starting` if the status endpoint never answered but the
    /// process is alive.
    pub state: ServerState,
}

/// Outcome of a successful stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StopReport {
    /// Whether a process was running when the stop began.
    pub was_running: bool,
    /// Whether the process exited on its own after the graceful request.
    pub graceful_exit: bool,
    /// Processes force-terminated afterwards.
    pub terminated: usize,
}

struct CachedScan {
    at: Instant,
    running: bool,
}

/// Forwards every transition to the notification sink.
struct NotifyTransitions {
    sink: Arc<dyn NotificationSink>,
}

#[async_trait]
impl StateListener for NotifyTransitions {
    async fn on_transition(&self, old: ServerState, new: ServerState) -> anyhow::Result<()> {
        self.sink.notify_state_change(old, new).await
    }
}

/// Lifecycle manager for one game server process.
pub struct Supervisor {
    settings: RwLock<Arc<SupervisorSettings>>,
    state: Arc<StateCell>,
    host: Arc<dyn ProcessHost>,
    prober: Option<Arc<dyn StatusProber>>,
    admin: Option<Arc<GameAdmin>>,
    notifier: Arc<dyn NotificationSink>,
    lock: ActionLock,
    cache: Mutex<Option<CachedScan>>,
}

impl std::fmt::Debug for Supervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Supervisor")
            .field("state", &self.state.get())
            .field("has_prober", &self.prober.is_some())
            .field("has_admin", &self.admin.is_some())
            .finish_non_exhaustive()
    }
}

impl Supervisor {
    /// Create a supervisor in the `Offline` state.
    ///
    /// Every transition is forwarded to `notifier`. Call
    /// [`detect_initial`](Self::detect_initial) before relying on the state.
    pub fn new(
        settings: SupervisorSettings,
        host: Arc<dyn ProcessHost>,
        notifier: Arc<dyn NotificationSink>,
    ) -> Self {
        let state = Arc::new(StateCell::new(ServerState::Offline));
        state.register(Arc::new(NotifyTransitions {
            sink: Arc::clone(&notifier),
        }));
        Self {
            settings: RwLock::new(Arc::new(settings)),
            state,
            host,
            prober: None,
            admin: None,
            notifier,
            lock: ActionLock::new(None),
            cache: Mutex::new(None),
        }
    }

    /// Use a status endpoint for responsiveness and graceful shutdown.
    /// Ignored if the prober reports itself unconfigured.
    #[must_use]
    pub fn with_prober(mut self, prober: Arc<dyn StatusProber>) -> Self {
        if prober.is_configured() {
            self.prober = Some(prober);
        }
        self
    }

    /// Use RCON for graceful shutdown when no status endpoint is present.
    #[must_use]
    pub fn with_admin(mut self, admin: Arc<GameAdmin>) -> Self {
        self.admin = Some(admin);
        self
    }

    /// Back the action lock with a PID file shared across processes.
    #[must_use]
    pub fn with_lock_file(mut self, path: PathBuf) -> Self {
        self.lock = ActionLock::new(Some(path));
        self
    }

    /// Current settings snapshot.
    pub fn settings(&self) -> Arc<SupervisorSettings> {
        Arc::clone(&self.settings.read().unwrap_or_else(PoisonError::into_inner))
    }

    /// Replace settings. Takes effect on the next loop iteration or action.
    pub fn reconfigure(&self, settings: SupervisorSettings) {
        *self.settings.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(settings);
        self.invalidate_cache();
        info!("supervisor reconfigured");
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ServerState {
        self.state.get()
    }

    /// Shared state cell, for registering listeners or subscribing.
    pub fn state_cell(&self) -> &Arc<StateCell> {
        &self.state
    }

    /// Whether the server process exists. Scans are cached briefly.
    pub async fn is_running(&self) -> bool {
        match self.scan(false).await {
            Ok(running) => running,
            Err(e) => {
                warn!(error = %e, "process scan failed");
                false
            }
        }
    }

    fn invalidate_cache(&self) {
        *self.cache.lock().unwrap_or_else(PoisonError::into_inner) = None;
    }

    async fn scan(&self, fresh: bool) -> anyhow::Result<bool> {
        let settings = self.settings();
        let ttl = Duration::from_millis(settings.timings.process_cache_ms);
        if !fresh {
            let cache = self.cache.lock().unwrap_or_else(PoisonError::into_inner);
            if let Some(cached) = cache.as_ref() {
                if cached.at.elapsed() < ttl {
                    return Ok(cached.running);
                }
            }
        }

        let host = Arc::clone(&self.host);
        let names = settings.server.process_names.clone();
        let pids = tokio::task::spawn_blocking(move || host.find(&names))
            .await
            .map_err(|e| anyhow::anyhow!("process scan task panicked: {e}"))?;
        let running = !pids.is_empty();

        *self.cache.lock().unwrap_or_else(PoisonError::into_inner) = Some(CachedScan {
            at: Instant::now(),
            running,
        });
        Ok(running)
    }

    async fn responsive(&self) -> bool {
        match &self.prober {
            Some(prober) => prober.is_responsive().await,
            None => true,
        }
    }

    async fn notify(&self, text: &str) {
        if let Err(e) = self.notifier.notify(text).await {
            warn!(error = %e, "failed to deliver notification");
        }
    }

    /// Determine the state at startup from the process table and prober.
    ///
    /// This is a detection, not a transition: listeners are not notified.
    pub async fn detect_initial(&self) -> ServerState {
        let detected = match self.scan(true).await {
            Ok(true) => {
                if self.responsive().await {
                    ServerState::Online
                } else {
                    ServerState::Starting
                }
            }
            Ok(false) => ServerState::Offline,
            Err(e) => {
                warn!(error = %e, "initial process scan failed, assuming offline");
                ServerState::Offline
            }
        };
        info!(state = %detected, "initial server state detected");
        self.state.seed(detected);
        detected
    }

    /// Re-evaluate the state once.
    ///
    /// Skipped while a start/stop/restart is running; that action owns the
    /// state until it finishes.
    pub async fn reconcile(&self) -> ServerState {
        if self.lock.is_held() {
            debug!("supervisor action in progress, skipping reconcile");
            return self.state();
        }
        let running = match self.scan(false).await {
            Ok(running) => running,
            Err(e) => {
                warn!(error = %e, "process scan failed, keeping current state");
                return self.state();
            }
        };

        let current = self.state.get();
        let next = match (current, running) {
            (ServerState::Offline, true) => {
                info!("server process appeared without a start request");
                ServerState::Starting
            }
            (_, false) => ServerState::Offline,
            (ServerState::Starting, true) => {
                if self.responsive().await {
                    ServerState::Online
                } else {
                    ServerState::Starting
                }
            }
            (ServerState::Online, true) => {
                if self.prober.is_some() && !self.responsive().await {
                    debug!("server process alive but status endpoint unresponsive");
                }
                ServerState::Online
            }
            (ServerState::Stopping, true) => ServerState::Stopping,
        };

        if next != current && !self.lock.is_held() {
            self.state.set_if(current, next);
        }
        self.state()
    }

    /// Reconcile state every `monitor_interval_secs` until shutdown.
    pub async fn run_monitor(self: Arc<Self>, mut shutdown_rx: watch::Receiver<bool>) {
        info!("supervisor monitor started");
        loop {
            let period = Duration::from_secs(self.settings().timings.monitor_interval_secs.max(1));
            tokio::select! {
                () = tokio::time::sleep(period) => {
                    self.reconcile().await;
                }
                result = shutdown_rx.changed() => {
                    if result.is_err() || *shutdown_rx.borrow() {
                        info!("supervisor monitor shutting down");
                        break;
                    }
                }
            }
        }
    }

    /// Launch the server and wait for it to come up.
    ///
    /// # Errors
    ///
    /// [`SupervisorError::Busy`] if another action runs,
    /// [`SupervisorError::Config`] for a missing directory or program,
    /// [`SupervisorError::AlreadyRunning`], or [`SupervisorError::StartFailed`].
    pub async fn start(&self) -> Result<StartReport, SupervisorError> {
        let _guard = self.lock.try_acquire(self.host.as_ref())?;
        self.start_locked().await
    }

    /// Stop the server, gracefully first if asked and possible.
    ///
    /// Succeeds immediately if nothing is running.
    ///
    /// # Errors
    ///
    /// [`SupervisorError::Busy`] if another action runs, or
    /// [`SupervisorError::StopFailed`] if the process survives termination.
    pub async fn stop(&self, graceful: bool) -> Result<StopReport, SupervisorError> {
        let _guard = self.lock.try_acquire(self.host.as_ref())?;
        self.stop_locked(graceful).await
    }

    /// Stop, wait the restart buffer, start.
    ///
    /// A failed stop aborts before anything is launched.
    ///
    /// # Errors
    ///
    /// [`SupervisorError::Busy`] if another action runs, otherwise
    /// [`SupervisorError::RestartAborted`] describing the failed step.
    pub async fn restart(&self, graceful: bool) -> Result<StartReport, SupervisorError> {
        let _guard = self.lock.try_acquire(self.host.as_ref())?;

        if let Err(e) = self.stop_locked(graceful).await {
            let reason = format!("{e}; not launching a new instance");
            error!(%reason, "restart aborted");
            self.notify(&format!("Restart aborted: {reason}")).await;
            return Err(SupervisorError::RestartAborted(reason));
        }

        let buffer = Duration::from_secs(self.settings().timings.restart_buffer_secs);
        info!(buffer_secs = buffer.as_secs(), "waiting before relaunch");
        tokio::time::sleep(buffer).await;

        self.start_locked()
            .await
            .map_err(|e| SupervisorError::RestartAborted(e.to_string()))
    }

    async fn start_locked(&self) -> Result<StartReport, SupervisorError> {
        let settings = self.settings();
        let spec = launch_spec(&settings.server)?;

        match self.scan(true).await {
            Ok(true) => return Err(SupervisorError::AlreadyRunning),
            Ok(false) => {}
            Err(e) => return Err(SupervisorError::StartFailed(e.to_string())),
        }

        self.state.set(ServerState::Starting);
        info!(program = %spec.program.display(), "launching server");

        let host = Arc::clone(&self.host);
        let launch = spec.clone();
        let pid = match tokio::task::spawn_blocking(move || host.launch(&launch)).await {
            Ok(Ok(pid)) => pid,
            Ok(Err(e)) => {
                return Err(self
                    .start_failed(format!("failed to launch {}: {e}", spec.program.display()))
                    .await)
            }
            Err(e) => return Err(self.start_failed(format!("launch task panicked: {e}")).await),
        };
        self.invalidate_cache();

        let appear = Duration::from_secs(settings.timings.appear_timeout_secs);
        if !self.wait_for_presence(true, appear, settings.poll_step()).await {
            return Err(self
                .start_failed(format!(
                    "process did not appear within {}s",
                    appear.as_secs()
                ))
                .await);
        }
        info!(pid, "server process detected");

        let Some(prober) = &self.prober else {
            self.state.set(ServerState::Online);
            return Ok(StartReport {
                pid,
                state: ServerState::Online,
            });
        };

        let responsive_timeout = Duration::from_secs(settings.timings.responsive_timeout_secs);
        let step = settings.poll_step();
        let outcome = tokio::time::timeout(responsive_timeout, async {
            loop {
                if prober.is_responsive().await {
                    return true;
                }
                if !self.scan(true).await.unwrap_or(true) {
                    return false;
                }
                tokio::time::sleep(step).await;
            }
        })
        .await;

        match outcome {
            Ok(true) => {
                self.state.set(ServerState::Online);
                Ok(StartReport {
                    pid,
                    state: ServerState::Online,
                })
            }
            Ok(false) => Err(self
                .start_failed("process exited during startup".to_owned())
                .await),
            Err(_) if self.scan(true).await.unwrap_or(false) => {
                warn!(
                    timeout_secs = responsive_timeout.as_secs(),
                    "server alive but not yet responsive, leaving STARTING"
                );
                Ok(StartReport {
                    pid,
                    state: ServerState::Starting,
                })
            }
            Err(_) => Err(self
                .start_failed("process exited before becoming responsive".to_owned())
                .await),
        }
    }

    async fn start_failed(&self, reason: String) -> SupervisorError {
        self.state.set(ServerState::Offline);
        error!(%reason, "server start failed");
        self.notify(&format!("Server start failed: {reason}")).await;
        SupervisorError::StartFailed(reason)
    }

    async fn stop_locked(&self, graceful: bool) -> Result<StopReport, SupervisorError> {
        let settings = self.settings();

        let running = self
            .scan(true)
            .await
            .map_err(|e| SupervisorError::StopFailed(e.to_string()))?;
        if !running {
            self.state.set(ServerState::Offline);
            return Ok(StopReport {
                was_running: false,
                graceful_exit: false,
                terminated: 0,
            });
        }

        self.state.set(ServerState::Stopping);
        let step = settings.poll_step();

        let mut graceful_exit = false;
        if graceful && settings.server.graceful_shutdown && self.request_graceful(&settings).await
        {
            let window = Duration::from_secs(
                settings
                    .timings
                    .graceful_exit_timeout_secs
                    .saturating_add(settings.server.shutdown_delay_secs),
            );
            info!(window_secs = window.as_secs(), "waiting for graceful exit");
            graceful_exit = self.wait_for_presence(false, window, step).await;
            if !graceful_exit {
                warn!("server did not exit gracefully, forcing termination");
            }
        }

        let host = Arc::clone(&self.host);
        let names = settings.server.all_process_names();
        let terminated = tokio::task::spawn_blocking(move || host.terminate(&names))
            .await
            .unwrap_or_else(|e| {
                warn!(error = %e, "terminate task panicked");
                0
            });
        self.invalidate_cache();

        let kill_wait = Duration::from_secs(settings.timings.kill_wait_secs);
        let gone = self.wait_for_presence(false, kill_wait.max(step), step).await;

        // Offline either way; a survivor is picked up by the monitor as an
        // unexpected appearance.
        self.state.set(ServerState::Offline);

        if gone {
            info!(graceful_exit, terminated, "server stopped");
            Ok(StopReport {
                was_running: true,
                graceful_exit,
                terminated,
            })
        } else {
            let reason = "server process still present after forced termination".to_owned();
            error!(%reason, "server stop failed");
            self.notify(&format!("Server stop failed: {reason}")).await;
            Err(SupervisorError::StopFailed(reason))
        }
    }

    /// Save, warn, and request shutdown through whichever channel exists.
    /// Returns whether a shutdown request was accepted.
    async fn request_graceful(&self, settings: &SupervisorSettings) -> bool {
        let message = &settings.server.shutdown_message;
        let delay = settings.server.shutdown_delay_secs;

        if let Some(prober) = &self.prober {
            if !prober.save().await {
                warn!("save via status endpoint failed");
            }
            prober.announce(message).await;
            if prober.request_shutdown(delay, message).await {
                return true;
            }
            warn!("shutdown via status endpoint failed, trying rcon");
            if let Some(admin) = self.admin.as_ref().filter(|a| a.has_rcon()) {
                return match admin.request_shutdown(delay, message).await {
                    Ok(()) => true,
                    Err(e) => {
                        warn!(error = %e, "shutdown via rcon failed");
                        false
                    }
                };
            }
            return false;
        }

        let Some(admin) = self.admin.as_ref().filter(|a| a.has_rcon()) else {
            debug!("no graceful shutdown channel configured");
            return false;
        };
        if let Err(e) = admin.save().await {
            warn!(error = %e, "save via rcon failed");
        }
        if let Err(e) = admin.broadcast(message).await {
            warn!(error = %e, "shutdown warning broadcast failed");
        }
        match admin.request_shutdown(delay, message).await {
            Ok(()) => true,
            Err(e) => {
                warn!(error = %e, "shutdown via rcon failed");
                false
            }
        }
    }

    /// Poll until the process is (or is not) present. Returns whether the
    /// condition was met within `within`.
    async fn wait_for_presence(&self, present: bool, within: Duration, step: Duration) -> bool {
        tokio::time::timeout(within, async {
            loop {
                match self.scan(true).await {
                    Ok(running) if running == present => return,
                    Ok(_) => {}
                    Err(e) => warn!(error = %e, "process scan failed while waiting"),
                }
                tokio::time::sleep(step).await;
            }
        })
        .await
        .is_ok()
    }
}

/// Check paths and resolve the program relative to the working directory.
fn launch_spec(server: &SupervisorConfig) -> Result<LaunchSpec, SupervisorError> {
    if !server.working_dir.is_dir() {
        return Err(SupervisorError::Config(format!(
            "working directory {} does not exist",
            server.working_dir.display()
        )));
    }
    let program = server.launch_program.trim();
    if program.is_empty() {
        return Err(SupervisorError::Config(
            "server.launch_program is not set".to_owned(),
        ));
    }

    let candidate = server.working_dir.join(program);
    let bare_name = PathBuf::from(program).components().count() == 1;
    let program = if candidate.exists() {
        std::fs::canonicalize(&candidate).map_err(|e| {
            SupervisorError::Config(format!("cannot resolve {}: {e}", candidate.display()))
        })?
    } else if bare_name {
        // Left to PATH lookup.
        PathBuf::from(program)
    } else {
        return Err(SupervisorError::Config(format!(
            "launch program {} does not exist",
            candidate.display()
        )));
    };

    Ok(LaunchSpec {
        program,
        args: server.launch_args.clone(),
        working_dir: server.working_dir.clone(),
    })
}
