//! Telegram notifications and the inbound side of the chat relay.
//!
//! The notifier uses the teloxide `Bot` directly (send-only). The relay
//! listener runs a dispatcher filtered to the relay chat.

use std::sync::Arc;

use async_trait::async_trait;
use teloxide::dispatching::UpdateFilterExt;
use teloxide::prelude::*;
use teloxide::types::ParseMode;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use super::html_escape;
use crate::config::TelegramConfig;
use crate::pipeline::ChatRelay;
use crate::rcon::GameAdmin;
use crate::sinks::NotificationSink;
use crate::supervisor::ServerState;

/// Read the bot token named by the config, if set.
pub fn bot_token(config: &TelegramConfig) -> Option<String> {
    std::env::var(&config.bot_token_env)
        .ok()
        .map(|t| t.trim().to_owned())
        .filter(|t| !t.is_empty())
}

/// Telegram-backed [`NotificationSink`].
pub struct TelegramNotifier {
    bot: Bot,
    operator_chats: Vec<i64>,
    relay_chat: Option<i64>,
    status_chat: Option<i64>,
    prefix: String,
}

impl std::fmt::Debug for TelegramNotifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelegramNotifier")
            .field("operator_chats", &self.operator_chats)
            .field("relay_chat", &self.relay_chat)
            .field("status_chat", &self.status_chat)
            .finish_non_exhaustive()
    }
}

impl TelegramNotifier {
    /// Create a notifier for the configured chats.
    pub fn new(bot_token: &str, config: &TelegramConfig) -> Self {
        Self {
            bot: Bot::new(bot_token),
            operator_chats: config.operator_chats.clone(),
            relay_chat: config.relay_chat,
            status_chat: config.status_chat,
            prefix: config.prefix.clone(),
        }
    }

    /// Build from config and the token environment variable. `None` when
    /// the token is unset or no chat is configured.
    pub fn from_config(config: &TelegramConfig) -> Option<Self> {
        let token = bot_token(config)?;
        if config.operator_chats.is_empty() && config.relay_chat.is_none() {
            return None;
        }
        Some(Self::new(&token, config))
    }

    fn format(&self, text: &str) -> String {
        format!("<b>{}</b>\n{}", html_escape(&self.prefix), html_escape(text))
    }

    async fn send_to_all(&self, text: &str) -> anyhow::Result<()> {
        if self.operator_chats.is_empty() {
            return Ok(());
        }
        let mut any_sent = false;
        for &chat_id in &self.operator_chats {
            match self
                .bot
                .send_message(ChatId(chat_id), text)
                .parse_mode(ParseMode::Html)
                .await
            {
                Ok(_) => any_sent = true,
                Err(e) => warn!(chat_id, error = %e, "failed to send Telegram message"),
            }
        }
        if !any_sent {
            anyhow::bail!("failed to send Telegram message to any operator chat");
        }
        Ok(())
    }
}

#[async_trait]
impl NotificationSink for TelegramNotifier {
    async fn notify(&self, text: &str) -> anyhow::Result<()> {
        self.send_to_all(&self.format(text)).await
    }

    async fn notify_state_change(&self, old: ServerState, new: ServerState) -> anyhow::Result<()> {
        if let Some(chat_id) = self.status_chat {
            let title = format!("{} Server {}", new.icon(), new.label());
            if let Err(e) = self.bot.set_chat_title(ChatId(chat_id), title).await {
                warn!(chat_id, error = %e, "failed to update status chat title");
            }
        }
        let line = format!("{} Server {} \u{2192} {}", new.icon(), old.label(), new.label());
        self.send_to_all(&self.format(&line)).await
    }

    async fn relay_chat(&self, author: &str, text: &str) -> anyhow::Result<()> {
        let Some(chat_id) = self.relay_chat else {
            debug!("no relay chat configured, dropping chat line");
            return Ok(());
        };
        let body = format!("<b>{}</b>: {}", html_escape(author), html_escape(text));
        self.bot
            .send_message(ChatId(chat_id), body)
            .parse_mode(ParseMode::Html)
            .await?;
        Ok(())
    }
}

/// Dependencies injected into the relay handler via `dptree::deps!`.
#[derive(Clone)]
struct RelayState {
    relay_chat: ChatId,
    relay: Arc<ChatRelay>,
    admin: Arc<GameAdmin>,
}

/// Forward messages from the relay chat into the game until shutdown.
pub async fn run_relay_listener(
    bot_token: &str,
    relay_chat: i64,
    relay: Arc<ChatRelay>,
    admin: Arc<GameAdmin>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let bot = Bot::new(bot_token);
    let state = RelayState {
        relay_chat: ChatId(relay_chat),
        relay,
        admin,
    };

    let handler = dptree::entry().branch(Update::filter_message().endpoint(handle_relay_message));
    let mut dispatcher = Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![state])
        .build();

    let token = dispatcher.shutdown_token();
    tokio::spawn(async move {
        loop {
            if shutdown_rx.changed().await.is_err() || *shutdown_rx.borrow() {
                break;
            }
        }
        if let Ok(done) = token.shutdown() {
            done.await;
        }
    });

    info!(relay_chat, "telegram relay listener starting");
    dispatcher.dispatch().await;
    info!("telegram relay listener stopped");
}

async fn handle_relay_message(msg: Message, state: RelayState) -> ResponseResult<()> {
    if msg.chat.id != state.relay_chat {
        return Ok(());
    }
    let Some(text) = msg.text() else {
        return Ok(());
    };
    let Some(user) = msg.from.as_ref() else {
        return Ok(());
    };
    if user.is_bot {
        return Ok(());
    }
    let author = user
        .username
        .clone()
        .unwrap_or_else(|| user.first_name.clone());

    let Some(tagged) = state.relay.inbound(&author, text) else {
        debug!(%author, "relay chat message not forwarded");
        return Ok(());
    };
    let admin = Arc::clone(&state.admin);
    tokio::spawn(async move {
        if let Err(e) = admin.broadcast(&tagged).await {
            warn!(error = %e, "failed to relay chat into game");
        }
    });
    Ok(())
}
