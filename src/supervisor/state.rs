//! Server lifecycle state with transition listeners.
//!
//! Only the [`Supervisor`](super::Supervisor) writes the state. Everyone else
//! reads it through [`StateCell::get`] or a [`watch`] subscription.

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Lifecycle state of the supervised server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ServerState {
    /// No server process.
    Offline,
    /// Process launched or detected but not yet confirmed responsive.
    Starting,
    /// Process running and responsive.
    Online,
    /// Shutdown in progress.
    Stopping,
}

impl ServerState {
    /// Upper-case label used in notifications and channel titles.
    pub fn label(self) -> &'static str {
        match self {
            Self::Offline => "OFFLINE",
            Self::Starting => "STARTING",
            Self::Online => "ONLINE",
            Self::Stopping => "STOPPING",
        }
    }

    /// Coloured indicator for chat surfaces.
    pub fn icon(self) -> &'static str {
        match self {
            Self::Offline => "\u{1f534}",
            Self::Starting | Self::Stopping => "\u{1f7e1}",
            Self::Online => "\u{1f7e2}",
        }
    }
}

impl fmt::Display for ServerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Side effect run after every state transition.
///
/// Listeners run on their own task; errors are logged and dropped.
#[async_trait]
pub trait StateListener: Send + Sync {
    /// Called once per transition with the previous and new state.
    ///
    /// # Errors
    ///
    /// Any error is logged by the caller and otherwise ignored.
    async fn on_transition(&self, old: ServerState, new: ServerState) -> anyhow::Result<()>;
}

/// Shared, observable server state.
pub struct StateCell {
    tx: watch::Sender<ServerState>,
    listeners: Mutex<Vec<Arc<dyn StateListener>>>,
}

impl StateCell {
    /// Create a cell holding `initial`.
    pub fn new(initial: ServerState) -> Self {
        let (tx, _rx) = watch::channel(initial);
        Self {
            tx,
            listeners: Mutex::new(Vec::new()),
        }
    }

    /// Current state.
    pub fn get(&self) -> ServerState {
        *self.tx.borrow()
    }

    /// Receiver that observes every subsequent change.
    pub fn subscribe(&self) -> watch::Receiver<ServerState> {
        self.tx.subscribe()
    }

    /// Register a transition listener.
    pub fn register(&self, listener: Arc<dyn StateListener>) {
        self.listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(listener);
    }

    /// Write a new state and dispatch listeners.
    ///
    /// Returns the previous state. Writing the current state again is a no-op.
    pub(crate) fn set(&self, new: ServerState) -> ServerState {
        self.write(None, new)
    }

    /// Overwrite the state without running listeners. Subscribers still see
    /// the new value.
    pub(crate) fn seed(&self, state: ServerState) {
        self.tx.send_replace(state);
    }

    /// Write `new` only if the state is still `expected`.
    ///
    /// Returns whether the state now equals `new`.
    pub(crate) fn set_if(&self, expected: ServerState, new: ServerState) -> bool {
        self.write(Some(expected), new) == expected || self.get() == new
    }

    fn write(&self, expected: Option<ServerState>, new: ServerState) -> ServerState {
        let mut old = new;
        let changed = self.tx.send_if_modified(|current| {
            old = *current;
            if *current == new || expected.is_some_and(|e| e != *current) {
                false
            } else {
                *current = new;
                true
            }
        });

        if !changed {
            debug!(state = %old, requested = %new, "state unchanged");
            return old;
        }

        info!(from = %old, to = %new, "server state changed");
        self.dispatch(old, new);
        old
    }

    fn dispatch(&self, old: ServerState, new: ServerState) {
        let listeners: Vec<Arc<dyn StateListener>> = self
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();

        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            warn!("no async runtime, skipping state listeners");
            return;
        };

        for listener in listeners {
            handle.spawn(async move {
                if let Err(e) = listener.on_transition(old, new).await {
                    warn!(error = %e, from = %old, to = %new, "state listener failed");
                }
            });
        }
    }
}

impl fmt::Debug for StateCell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StateCell")
            .field("state", &self.get())
            .finish_non_exhaustive()
    }
}
