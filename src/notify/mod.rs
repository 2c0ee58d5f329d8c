//! Operator notification sinks.

pub mod telegram;

use async_trait::async_trait;
use tracing::info;

pub use telegram::{run_relay_listener, TelegramNotifier};

use crate::sinks::NotificationSink;
use crate::supervisor::ServerState;

/// Writes notifications to the log only. Used when no chat platform is
/// configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

#[async_trait]
impl NotificationSink for LogNotifier {
    async fn notify(&self, text: &str) -> anyhow::Result<()> {
        info!(target: "overseer::notify", text, "notification");
        Ok(())
    }

    async fn notify_state_change(&self, old: ServerState, new: ServerState) -> anyhow::Result<()> {
        info!(target: "overseer::notify", %old, %new, "server state changed");
        Ok(())
    }

    async fn relay_chat(&self, author: &str, text: &str) -> anyhow::Result<()> {
        info!(target: "overseer::notify", author, text, "chat");
        Ok(())
    }
}

/// Escape text for Telegram's HTML parse mode.
pub fn html_escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}
