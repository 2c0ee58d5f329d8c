//! OS process enumeration, termination, and detached launch.
//!
//! Every [`ProcessHost`] method blocks; async callers go through
//! `spawn_blocking`.

use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::sync::{Mutex, PoisonError};

use sysinfo::{Pid, ProcessStatus, ProcessesToUpdate, System};
use tracing::{debug, info, warn};

/// What to run and where.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchSpec {
    /// Script or executable.
    pub program: PathBuf,
    /// Arguments.
    pub args: Vec<String>,
    /// Working directory for the child.
    pub working_dir: PathBuf,
}

/// Access to the OS process table.
pub trait ProcessHost: Send + Sync {
    /// PIDs of live processes whose executable matches any of `names`.
    fn find(&self, names: &[String]) -> Vec<u32>;

    /// Forcefully terminate every process matching `names`. Returns how many
    /// were signalled.
    fn terminate(&self, names: &[String]) -> usize;

    /// Spawn a detached child and return its PID.
    ///
    /// # Errors
    ///
    /// Returns the spawn error.
    fn launch(&self, spec: &LaunchSpec) -> std::io::Result<u32>;

    /// Whether a process with this PID exists.
    fn is_alive(&self, pid: u32) -> bool;
}

/// Compare executable names ignoring case and a trailing `.exe`.
pub fn name_matches(actual: &str, wanted: &str) -> bool {
    fn stem(name: &str) -> String {
        let lower = name.to_lowercase();
        match lower.strip_suffix(".exe") {
            Some(s) => s.to_owned(),
            None => lower,
        }
    }
    !wanted.is_empty() && stem(actual) == stem(wanted)
}

/// [`ProcessHost`] backed by `sysinfo`.
pub struct SysinfoHost {
    system: Mutex<System>,
}

impl Default for SysinfoHost {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for SysinfoHost {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SysinfoHost").finish_non_exhaustive()
    }
}

impl SysinfoHost {
    /// Create a host with an empty process snapshot.
    pub fn new() -> Self {
        Self {
            system: Mutex::new(System::new()),
        }
    }

    fn with_refreshed<T>(&self, f: impl FnOnce(&System) -> T) -> T {
        let mut sys = self.system.lock().unwrap_or_else(PoisonError::into_inner);
        sys.refresh_processes(ProcessesToUpdate::All, true);
        f(&sys)
    }
}

fn is_live(status: ProcessStatus) -> bool {
    !matches!(status, ProcessStatus::Zombie | ProcessStatus::Dead)
}

impl ProcessHost for SysinfoHost {
    fn find(&self, names: &[String]) -> Vec<u32> {
        self.with_refreshed(|sys| {
            sys.processes()
                .values()
                .filter(|p| is_live(p.status()))
                .filter(|p| {
                    let actual = p.name().to_string_lossy();
                    names.iter().any(|n| name_matches(&actual, n))
                })
                .map(|p| p.pid().as_u32())
                .collect()
        })
    }

    fn terminate(&self, names: &[String]) -> usize {
        self.with_refreshed(|sys| {
            let mut signalled: usize = 0;
            for process in sys.processes().values() {
                if !is_live(process.status()) {
                    continue;
                }
                let actual = process.name().to_string_lossy();
                if !names.iter().any(|n| name_matches(&actual, n)) {
                    continue;
                }
                let pid = process.pid().as_u32();
                if process.kill() {
                    info!(pid, name = %actual, "terminated process");
                    signalled = signalled.saturating_add(1);
                } else {
                    warn!(pid, name = %actual, "failed to signal process");
                }
            }
            signalled
        })
    }

    fn launch(&self, spec: &LaunchSpec) -> std::io::Result<u32> {
        let mut command = Command::new(&spec.program);
        command
            .args(&spec.args)
            .current_dir(&spec.working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());

        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            command.process_group(0);
        }

        let mut child = command.spawn()?;
        let pid = child.id();
        debug!(pid, program = %spec.program.display(), "child spawned");

        // Reap on exit so the child never lingers as a zombie.
        std::thread::spawn(move || {
            let _ = child.wait();
        });
        Ok(pid)
    }

    fn is_alive(&self, pid: u32) -> bool {
        let pid = Pid::from_u32(pid);
        let mut sys = self.system.lock().unwrap_or_else(PoisonError::into_inner);
        sys.refresh_processes(ProcessesToUpdate::Some(&[pid]), true);
        sys.process(pid).is_some_and(|p| is_live(p.status()))
    }
}
