//! Advisory lock around start/stop/restart.
//!
//! Two layers: an in-process mutex so the scheduler and a chat command
//! cannot overlap, and an optional PID lock file so a one-shot CLI action
//! cannot overlap with the daemon. A second caller gets
//! [`SupervisorError::Busy`] instead of queueing.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, warn};

use super::process::ProcessHost;
use super::SupervisorError;

/// How long an empty or unreadable lock file is treated as mid-write.
const UNREADABLE_GRACE: Duration = Duration::from_secs(10);

/// Non-blocking advisory lock.
#[derive(Debug)]
pub struct ActionLock {
    inner: Mutex<()>,
    file: Option<PathBuf>,
}

/// Held for the duration of one supervisor action.
#[derive(Debug)]
pub struct ActionGuard<'a> {
    _inner: MutexGuard<'a, ()>,
    file: Option<PathBuf>,
}

impl Drop for ActionGuard<'_> {
    fn drop(&mut self) {
        let Some(path) = &self.file else { return };
        if read_holder(path) != Some(std::process::id()) {
            warn!(path = %path.display(), "lock file no longer ours, leaving it");
            return;
        }
        if let Err(e) = std::fs::remove_file(path) {
            if e.kind() != ErrorKind::NotFound {
                warn!(error = %e, path = %path.display(), "failed to remove lock file");
            }
        }
    }
}

impl ActionLock {
    /// Create a lock, optionally backed by a PID file at `file`.
    pub fn new(file: Option<PathBuf>) -> Self {
        Self {
            inner: Mutex::new(()),
            file,
        }
    }

    /// Whether an action is running in this process.
    pub fn is_held(&self) -> bool {
        self.inner.try_lock().is_err()
    }

    /// Take the lock or report busy.
    ///
    /// A lock file left by a dead process is removed and retaken. An empty
    /// or unreadable lock file counts as held until it is older than
    /// [`UNREADABLE_GRACE`].
    ///
    /// # Errors
    ///
    /// Returns [`SupervisorError::Busy`] if another action holds the lock,
    /// or [`SupervisorError::Config`] if the lock file cannot be managed.
    pub fn try_acquire(&self, host: &dyn ProcessHost) -> Result<ActionGuard<'_>, SupervisorError> {
        let inner = self.inner.try_lock().map_err(|_| SupervisorError::Busy)?;
        if let Some(path) = &self.file {
            claim_file(path, host)?;
        }
        Ok(ActionGuard {
            _inner: inner,
            file: self.file.clone(),
        })
    }
}

fn read_holder(path: &Path) -> Option<u32> {
    std::fs::read_to_string(path)
        .ok()
        .and_then(|s| s.trim().parse::<u32>().ok())
}

fn config_error(action: &str, path: &Path, e: &std::io::Error) -> SupervisorError {
    SupervisorError::Config(format!("cannot {action} {}: {e}", path.display()))
}

/// Write our PID to a private file and hard-link it into place, so the lock
/// file is never visible without its owner.
fn publish(path: &Path, own_pid: u32) -> Result<bool, SupervisorError> {
    let mut staging = path.as_os_str().to_owned();
    staging.push(format!(".{own_pid}.tmp"));
    let staging = PathBuf::from(staging);

    std::fs::write(&staging, own_pid.to_string())
        .map_err(|e| config_error("write", &staging, &e))?;
    let linked = std::fs::hard_link(&staging, path);
    if let Err(e) = std::fs::remove_file(&staging) {
        warn!(error = %e, path = %staging.display(), "failed to remove staging lock file");
    }
    match linked {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == ErrorKind::AlreadyExists => Ok(false),
        Err(e) => Err(config_error("create", path, &e)),
    }
}

fn is_recent(path: &Path) -> bool {
    std::fs::metadata(path)
        .and_then(|m| m.modified())
        .ok()
        .and_then(|modified| SystemTime::now().duration_since(modified).ok())
        .map_or(true, |age| age < UNREADABLE_GRACE)
}

fn claim_file(path: &Path, host: &dyn ProcessHost) -> Result<(), SupervisorError> {
    let own_pid = std::process::id();
    for _ in 0..2 {
        if publish(path, own_pid)? {
            debug!(path = %path.display(), "lock file claimed");
            return Ok(());
        }
        let holder = read_holder(path);
        match holder {
            Some(pid) if pid != own_pid && host.is_alive(pid) => return Err(SupervisorError::Busy),
            None if path.exists() && is_recent(path) => return Err(SupervisorError::Busy),
            _ => {
                warn!(path = %path.display(), ?holder, "removing stale lock file");
                match std::fs::remove_file(path) {
                    Ok(()) => {}
                    Err(e) if e.kind() == ErrorKind::NotFound => {}
                    Err(e) => return Err(config_error("remove stale", path, &e)),
                }
            }
        }
    }
    Err(SupervisorError::Busy)
}
