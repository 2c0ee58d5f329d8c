//! Scripted process host, notifier, and prober.

use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use overseer::config::{SupervisorConfig, TimingsConfig};
use overseer::prober::StatusProber;
use overseer::sinks::NotificationSink;
use overseer::supervisor::{LaunchSpec, ProcessHost, ServerState, SupervisorSettings};

pub const SERVER_PID: u32 = 4242;

/// Process table with one optional server process.
#[derive(Debug, Default)]
pub struct FakeHost {
    pub running: AtomicBool,
    /// `terminate` reports success but the process stays.
    pub immortal: AtomicBool,
    pub launch_fails: AtomicBool,
    pub launches: AtomicUsize,
    pub terminations: AtomicUsize,
    /// Blocking pause inside `launch`.
    pub launch_delay: Mutex<Duration>,
    /// PIDs reported alive by `is_alive`.
    pub alive_pids: Mutex<Vec<u32>>,
}

impl FakeHost {
    pub fn running() -> Self {
        let host = Self::default();
        host.running.store(true, Ordering::SeqCst);
        host
    }

    pub fn set_running(&self, running: bool) {
        self.running.store(running, Ordering::SeqCst);
    }

    pub fn launches(&self) -> usize {
        self.launches.load(Ordering::SeqCst)
    }
}

impl ProcessHost for FakeHost {
    fn find(&self, _names: &[String]) -> Vec<u32> {
        if self.running.load(Ordering::SeqCst) {
            vec![SERVER_PID]
        } else {
            Vec::new()
        }
    }

    fn terminate(&self, _names: &[String]) -> usize {
        if !self.running.load(Ordering::SeqCst) {
            return 0;
        }
        self.terminations.fetch_add(1, Ordering::SeqCst);
        if !self.immortal.load(Ordering::SeqCst) {
            self.running.store(false, Ordering::SeqCst);
        }
        1
    }

    fn launch(&self, _spec: &LaunchSpec) -> std::io::Result<u32> {
        let delay = *self.launch_delay.lock().expect("delay lock");
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }
        if self.launch_fails.load(Ordering::SeqCst) {
            return Err(std::io::Error::other("exec format error"));
        }
        self.launches.fetch_add(1, Ordering::SeqCst);
        self.running.store(true, Ordering::SeqCst);
        Ok(SERVER_PID)
    }

    fn is_alive(&self, pid: u32) -> bool {
        self.alive_pids.lock().expect("pids lock").contains(&pid)
    }
}

/// Records every notification and transition.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    pub messages: Mutex<Vec<String>>,
    pub transitions: Mutex<Vec<(ServerState, ServerState)>>,
}

impl RecordingNotifier {
    pub fn messages(&self) -> Vec<String> {
        self.messages.lock().expect("messages lock").clone()
    }

    pub fn transitions(&self) -> Vec<(ServerState, ServerState)> {
        self.transitions.lock().expect("transitions lock").clone()
    }

    /// Wait until at least `count` transitions arrived; listeners run on
    /// their own tasks.
    pub async fn wait_for_transitions(&self, count: usize) -> Vec<(ServerState, ServerState)> {
        for _ in 0..100 {
            let seen = self.transitions();
            if seen.len() >= count {
                return seen;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        self.transitions()
    }
}

#[async_trait]
impl NotificationSink for RecordingNotifier {
    async fn notify(&self, text: &str) -> anyhow::Result<()> {
        self.messages.lock().expect("messages lock").push(text.to_owned());
        Ok(())
    }

    async fn notify_state_change(&self, old: ServerState, new: ServerState) -> anyhow::Result<()> {
        self.transitions
            .lock()
            .expect("transitions lock")
            .push((old, new));
        Ok(())
    }
}

/// Status endpoint whose readiness is toggled by the test.
#[derive(Debug, Default)]
pub struct FakeProber {
    pub responsive: AtomicBool,
    /// `request_shutdown` reports the request as accepted.
    pub accept_shutdown: AtomicBool,
    pub shutdown_requests: AtomicUsize,
    /// Process that exits when an accepted shutdown arrives.
    pub exits_on_shutdown: Mutex<Option<Arc<FakeHost>>>,
}

impl FakeProber {
    /// Accepts shutdown requests; `host` exits on each one when given.
    pub fn accepting(host: Option<Arc<FakeHost>>) -> Self {
        let prober = Self::default();
        prober.accept_shutdown.store(true, Ordering::SeqCst);
        *prober.exits_on_shutdown.lock().expect("host lock") = host;
        prober
    }

    pub fn shutdown_requests(&self) -> usize {
        self.shutdown_requests.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StatusProber for FakeProber {
    fn is_configured(&self) -> bool {
        true
    }

    async fn is_responsive(&self) -> bool {
        self.responsive.load(Ordering::SeqCst)
    }

    async fn announce(&self, _text: &str) -> bool {
        true
    }

    async fn request_shutdown(&self, _delay_secs: u64, _message: &str) -> bool {
        self.shutdown_requests.fetch_add(1, Ordering::SeqCst);
        if !self.accept_shutdown.load(Ordering::SeqCst) {
            return false;
        }
        if let Some(host) = self.exits_on_shutdown.lock().expect("host lock").as_ref() {
            host.set_running(false);
        }
        true
    }

    async fn save(&self) -> bool {
        true
    }
}

/// Settings with second-scale timeouts and no scan caching.
pub fn fast_settings(working_dir: &Path) -> SupervisorSettings {
    SupervisorSettings {
        server: SupervisorConfig {
            working_dir: working_dir.to_path_buf(),
            launch_program: "GameServer".to_owned(),
            shutdown_delay_secs: 0,
            ..SupervisorConfig::default()
        },
        timings: TimingsConfig {
            monitor_interval_secs: 1,
            appear_timeout_secs: 1,
            responsive_timeout_secs: 1,
            graceful_exit_timeout_secs: 1,
            kill_wait_secs: 1,
            restart_buffer_secs: 0,
            poll_step_ms: 10,
            process_cache_ms: 0,
        },
    }
}
