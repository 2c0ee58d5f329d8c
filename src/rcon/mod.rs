//! Remote administration (RCON) client.
//!
//! Every call opens a fresh TCP connection, authenticates, executes one
//! command, and closes. Calls are serialised process-wide: the game server
//! handles one command at a time and misbehaves under overlap.

pub mod admin;
pub mod frame;

use std::sync::atomic::{AtomicI32, Ordering};
use std::time::Duration;

use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::config::RconConfig;

pub use admin::{
    classify_grant, classify_message, CommandOutcome, DeliveryReport, GameAdmin, ItemDelivery,
    MessageRoute,
};
pub use frame::{RconRequest, RconResponse, RequestKind};

use frame::{AUTH_FAILED_ID, SERVERDATA_AUTH_RESPONSE, SERVERDATA_RESPONSE_VALUE};

/// Held for the whole of every call, including the post-call delay.
static CALL_GATE: Mutex<()> = Mutex::const_new(());

/// Frames skipped while waiting for a matching reply.
const MAX_STRAY_FRAMES: usize = 4;

/// Coarse classification of an [`RconError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RconErrorKind {
    /// The call or the connect exceeded its deadline.
    Timeout,
    /// The TCP connection could not be established.
    Connect,
    /// The connection failed mid-call.
    Io,
    /// The peer sent a malformed or unexpected frame.
    Decode,
    /// The server rejected the password.
    AuthFailed,
    /// RCON is disabled or missing credentials.
    NotConfigured,
    /// The server answered but refused the command.
    Rejected,
}

/// Structured failure of an RCON call. Never a panic.
#[derive(Debug, thiserror::Error)]
pub enum RconError {
    /// The call or the connect exceeded its deadline.
    #[error("rcon call timed out after {0:?}")]
    Timeout(Duration),

    /// The TCP connection could not be established.
    #[error("rcon connect to {addr} failed: {source}")]
    Connect {
        /// Target address.
        addr: String,
        /// Underlying socket error.
        #[source]
        source: std::io::Error,
    },

    /// The connection failed mid-call.
    #[error("rcon i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// The peer sent a malformed or unexpected frame.
    #[error("rcon protocol error: {0}")]
    Decode(String),

    /// The server answered the auth request with id -1.
    #[error("rcon authentication rejected")]
    AuthFailed,

    /// RCON is disabled or missing credentials.
    #[error("rcon not configured: {0}")]
    NotConfigured(String),

    /// The command reached the server and was refused.
    #[error("rcon command rejected: {0}")]
    Rejected(String),
}

impl RconError {
    /// Coarse classification for callers that branch on failure type.
    pub fn kind(&self) -> RconErrorKind {
        match self {
            Self::Timeout(_) => RconErrorKind::Timeout,
            Self::Connect { .. } => RconErrorKind::Connect,
            Self::Io(_) => RconErrorKind::Io,
            Self::Decode(_) => RconErrorKind::Decode,
            Self::AuthFailed => RconErrorKind::AuthFailed,
            Self::NotConfigured(_) => RconErrorKind::NotConfigured,
            Self::Rejected(_) => RconErrorKind::Rejected,
        }
    }
}

/// Connection parameters resolved from config and environment.
#[derive(Clone)]
pub struct RconSettings {
    /// `host:port` of the administration port.
    pub addr: String,
    /// Shared secret.
    pub password: String,
    /// Deadline for the TCP connect.
    pub connect_timeout: Duration,
    /// Deadline for a whole call.
    pub call_timeout: Duration,
    /// Pause held inside the gate after each call.
    pub post_call_delay: Duration,
}

impl std::fmt::Debug for RconSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RconSettings")
            .field("addr", &self.addr)
            .field("password", &"[REDACTED]")
            .field("connect_timeout", &self.connect_timeout)
            .field("call_timeout", &self.call_timeout)
            .field("post_call_delay", &self.post_call_delay)
            .finish()
    }
}

impl RconSettings {
    /// Resolve settings from config, reading the password from the named
    /// environment variable.
    ///
    /// # Errors
    ///
    /// Returns [`RconError::NotConfigured`] if the port is zero or the
    /// password variable is unset.
    pub fn from_config(config: &RconConfig) -> Result<Self, RconError> {
        if config.port == 0 {
            return Err(RconError::NotConfigured("rcon.port is 0".to_owned()));
        }
        let password = std::env::var(&config.password_env).map_err(|_| {
            RconError::NotConfigured(format!("{} is not set", config.password_env))
        })?;
        Ok(Self {
            addr: format!("{}:{}", config.host, config.port),
            password,
            connect_timeout: Duration::from_secs(config.connect_timeout_secs),
            call_timeout: Duration::from_secs(config.call_timeout_secs),
            post_call_delay: Duration::from_millis(config.post_call_delay_ms),
        })
    }
}

/// One-shot-per-call RCON client.
#[derive(Debug)]
pub struct RconClient {
    settings: RconSettings,
    next_id: AtomicI32,
}

impl RconClient {
    /// Create a client. No connection is made until the first call.
    pub fn new(settings: RconSettings) -> Self {
        Self {
            settings,
            next_id: AtomicI32::new(1),
        }
    }

    /// Target address.
    pub fn addr(&self) -> &str {
        &self.settings.addr
    }

    /// Run one command and return the response body.
    ///
    /// Blocks until no other call is in flight anywhere in the process. The
    /// whole call, connect included, is bounded by the call timeout; on
    /// timeout the connection is dropped and the gate released.
    ///
    /// # Errors
    ///
    /// Returns [`RconError::AuthFailed`] for a rejected password, distinct
    /// from [`RconError::Timeout`] and from an `Ok` with an empty body.
    pub async fn execute(&self, command: &str) -> Result<String, RconError> {
        let _gate = CALL_GATE.lock().await;

        let result =
            match tokio::time::timeout(self.settings.call_timeout, self.call(command)).await {
                Ok(result) => result,
                Err(_) => Err(RconError::Timeout(self.settings.call_timeout)),
            };

        match &result {
            Ok(body) => debug!(command, bytes = body.len(), "rcon call complete"),
            Err(e) => warn!(command, error = %e, "rcon call failed"),
        }

        if !self.settings.post_call_delay.is_zero() {
            tokio::time::sleep(self.settings.post_call_delay).await;
        }
        result
    }

    fn allocate_id(&self) -> i32 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        if id <= 0 {
            // Wrapped; -1 is reserved for auth failure.
            self.next_id.store(2, Ordering::Relaxed);
            1
        } else {
            id
        }
    }

    async fn call(&self, command: &str) -> Result<String, RconError> {
        let mut stream = self.connect().await?;

        let auth_id = self.allocate_id();
        frame::write_frame(
            &mut stream,
            &RconRequest {
                id: auth_id,
                kind: RequestKind::Auth,
                body: self.settings.password.clone(),
            },
        )
        .await?;
        self.await_auth(&mut stream, auth_id).await?;

        let exec_id = self.allocate_id();
        frame::write_frame(
            &mut stream,
            &RconRequest {
                id: exec_id,
                kind: RequestKind::Exec,
                body: command.to_owned(),
            },
        )
        .await?;

        for _ in 0..MAX_STRAY_FRAMES {
            let response = frame::read_frame(&mut stream).await?;
            if response.id == AUTH_FAILED_ID {
                return Err(RconError::AuthFailed);
            }
            if response.id == exec_id {
                return Ok(response.body);
            }
            debug!(
                expected = exec_id,
                got = response.id,
                "skipping unrelated rcon frame"
            );
        }
        Err(RconError::Decode(format!(
            "no response for request {exec_id}"
        )))
    }

    async fn connect(&self) -> Result<TcpStream, RconError> {
        let addr = &self.settings.addr;
        match tokio::time::timeout(self.settings.connect_timeout, TcpStream::connect(addr)).await
        {
            Ok(Ok(stream)) => Ok(stream),
            Ok(Err(source)) => Err(RconError::Connect {
                addr: addr.clone(),
                source,
            }),
            Err(_) => Err(RconError::Timeout(self.settings.connect_timeout)),
        }
    }

    /// Some servers send an empty RESPONSE_VALUE before the auth reply.
    async fn await_auth(&self, stream: &mut TcpStream, auth_id: i32) -> Result<(), RconError> {
        for _ in 0..MAX_STRAY_FRAMES {
            let response = frame::read_frame(stream).await?;
            if response.id == AUTH_FAILED_ID {
                return Err(RconError::AuthFailed);
            }
            match response.packet_type {
                SERVERDATA_AUTH_RESPONSE if response.id == auth_id => return Ok(()),
                SERVERDATA_RESPONSE_VALUE => continue,
                other => {
                    return Err(RconError::Decode(format!(
                        "unexpected auth reply: id {} type {other}",
                        response.id
                    )))
                }
            }
        }
        Err(RconError::Decode("no auth reply".to_owned()))
    }
}
