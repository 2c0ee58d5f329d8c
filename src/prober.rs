//! Optional HTTP status endpoint exposed by a server-side plugin.
//!
//! The prober answers "is the game actually accepting players" rather than
//! "does the process exist", and offers announce/save/shutdown hooks that
//! are preferred over RCON when present.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tracing::{debug, warn};

use crate::config::StatusConfig;

/// Error talking to the status endpoint. Logged, never surfaced past the
/// [`StatusProber`] boundary.
#[derive(Debug, thiserror::Error)]
pub enum StatusError {
    /// Transport failure or timeout.
    #[error("status request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// Non-2xx response.
    #[error("status endpoint returned HTTP {0}")]
    HttpStatus(u16),
}

/// Health and control endpoint for the running game.
///
/// Every method reports plain success; transport failures read as `false`.
#[async_trait]
pub trait StatusProber: Send + Sync {
    /// Whether an endpoint is configured at all.
    fn is_configured(&self) -> bool;

    /// Whether the game reports itself ready.
    async fn is_responsive(&self) -> bool;

    /// Broadcast a message to players.
    async fn announce(&self, text: &str) -> bool;

    /// Ask the game to shut itself down after `delay_secs`.
    async fn request_shutdown(&self, delay_secs: u64, message: &str) -> bool;

    /// Ask the game to save the world.
    async fn save(&self) -> bool;
}

/// [`StatusProber`] backed by a small REST API.
#[derive(Debug, Clone)]
pub struct HttpStatusProber {
    client: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

impl HttpStatusProber {
    /// Build a prober from config. The bearer token, if any, is read from
    /// the environment variable named by `token_env`.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be constructed.
    pub fn from_config(config: &StatusConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        let token = config
            .token_env
            .as_deref()
            .and_then(|name| std::env::var(name).ok())
            .filter(|t| !t.is_empty());
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_owned(),
            token,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{path}", self.base_url)
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn get_ok(&self, path: &str) -> Result<(), StatusError> {
        let response = self.authorize(self.client.get(self.url(path))).send().await?;
        check_status(response.status())
    }

    async fn post_ok(&self, path: &str, body: serde_json::Value) -> Result<(), StatusError> {
        let response = self
            .authorize(self.client.post(self.url(path)))
            .json(&body)
            .send()
            .await?;
        check_status(response.status())
    }
}

fn check_status(status: reqwest::StatusCode) -> Result<(), StatusError> {
    if status.is_success() {
        Ok(())
    } else {
        Err(StatusError::HttpStatus(status.as_u16()))
    }
}

fn report(action: &str, result: Result<(), StatusError>) -> bool {
    match result {
        Ok(()) => true,
        Err(e) => {
            warn!(action, error = %e, "status endpoint call failed");
            false
        }
    }
}

#[async_trait]
impl StatusProber for HttpStatusProber {
    fn is_configured(&self) -> bool {
        !self.base_url.is_empty()
    }

    async fn is_responsive(&self) -> bool {
        if !self.is_configured() {
            return false;
        }
        match self.get_ok("status").await {
            Ok(()) => true,
            Err(e) => {
                debug!(error = %e, "server not responsive");
                false
            }
        }
    }

    async fn announce(&self, text: &str) -> bool {
        if !self.is_configured() {
            return false;
        }
        report(
            "announce",
            self.post_ok("announce", json!({ "message": text })).await,
        )
    }

    async fn request_shutdown(&self, delay_secs: u64, message: &str) -> bool {
        if !self.is_configured() {
            return false;
        }
        report(
            "shutdown",
            self.post_ok(
                "shutdown",
                json!({ "delay_seconds": delay_secs, "message": message }),
            )
            .await,
        )
    }

    async fn save(&self) -> bool {
        if !self.is_configured() {
            return false;
        }
        report("save", self.post_ok("save", json!({})).await)
    }
}
