//! High-level administrative operations built on [`RconClient`].
//!
//! Commands are rendered from the configurable [`CommandSet`] templates and
//! responses are interpreted by one classifier per command family, so a
//! different server variant only needs a different token list.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, LazyLock};

use regex::{Captures, Regex};
use tracing::{debug, info, warn};

use super::{RconClient, RconError};
use crate::config::CommandSet;
use crate::prober::StatusProber;
use crate::sinks::Player;

const PM_PRIMARY: u8 = 0;
const PM_ALTERNATE: u8 = 1;
const PM_UNSUPPORTED: u8 = 2;

/// Interpretation of a free-text command response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandOutcome {
    /// A positive token matched, or nothing negative did.
    Succeeded,
    /// A negative token matched; carries the response text.
    Failed(String),
    /// The server does not know the command.
    UnknownCommand,
}

impl CommandOutcome {
    /// Whether the command took effect.
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded)
    }
}

fn contains_any(haystack: &str, tokens: &[String]) -> bool {
    tokens
        .iter()
        .any(|t| !t.is_empty() && haystack.contains(&t.to_lowercase()))
}

/// Classify the response to an item, currency, or experience grant.
///
/// Unknown-command tokens win, then positive tokens, then negative tokens.
/// An empty or unrecognised body counts as success since many servers
/// answer grants silently.
pub fn classify_grant(response: &str, commands: &CommandSet) -> CommandOutcome {
    let lower = response.to_lowercase();
    if contains_any(&lower, &commands.unknown_command_tokens) {
        return CommandOutcome::UnknownCommand;
    }
    if contains_any(&lower, &commands.success_tokens) {
        return CommandOutcome::Succeeded;
    }
    if contains_any(&lower, &commands.failure_tokens) {
        return CommandOutcome::Failed(response.trim().to_owned());
    }
    CommandOutcome::Succeeded
}

/// Classify the response to a private message or broadcast.
///
/// Messages have no positive confirmation; only negative tokens count.
pub fn classify_message(response: &str, commands: &CommandSet) -> CommandOutcome {
    let lower = response.to_lowercase();
    if contains_any(&lower, &commands.unknown_command_tokens) {
        CommandOutcome::UnknownCommand
    } else if contains_any(&lower, &commands.failure_tokens) {
        CommandOutcome::Failed(response.trim().to_owned())
    } else {
        CommandOutcome::Succeeded
    }
}

static PLACEHOLDER: LazyLock<Option<Regex>> = LazyLock::new(|| Regex::new(r"\{(\w+)\}").ok());

/// Substitute `{key}` placeholders in one pass over the template.
///
/// Substituted values are never rescanned, so a player name or message
/// containing `{message}` stays literal. Unknown placeholders are kept.
pub fn render(template: &str, values: &[(&str, &str)]) -> String {
    let Some(placeholder) = PLACEHOLDER.as_ref() else {
        return template.to_owned();
    };
    placeholder
        .replace_all(template, |caps: &Captures<'_>| {
            values
                .iter()
                .find(|(key, _)| *key == &caps[1])
                .map_or_else(|| caps[0].to_owned(), |(_, value)| (*value).to_owned())
        })
        .into_owned()
}

/// How a player-targeted message was delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageRoute {
    /// Via the primary private-message command.
    Private,
    /// Via the alternate private-message spelling.
    PrivateAlternate,
    /// As a broadcast addressed to the player.
    Broadcast,
}

/// One line of a multi-item delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemDelivery {
    /// Item identifier.
    pub item: String,
    /// Quantity requested.
    pub amount: u32,
    /// Outcome, or the transport error text.
    pub outcome: Result<CommandOutcome, String>,
}

/// Per-item report for a multi-item delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryReport {
    /// One entry per requested item, in request order.
    pub items: Vec<ItemDelivery>,
    /// True only if every item succeeded.
    pub success: bool,
}

/// Game administration façade.
pub struct GameAdmin {
    rcon: Option<Arc<RconClient>>,
    commands: CommandSet,
    prober: Option<Arc<dyn StatusProber>>,
    pm_mode: AtomicU8,
}

impl std::fmt::Debug for GameAdmin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GameAdmin")
            .field("rcon", &self.rcon)
            .field("has_prober", &self.prober.is_some())
            .field("pm_mode", &self.pm_mode.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl GameAdmin {
    /// Combine an RCON client (if configured), command vocabulary, and
    /// optional HTTP prober.
    pub fn new(
        rcon: Option<Arc<RconClient>>,
        commands: CommandSet,
        prober: Option<Arc<dyn StatusProber>>,
    ) -> Self {
        Self {
            rcon,
            commands,
            prober: prober.filter(|p| p.is_configured()),
            pm_mode: AtomicU8::new(PM_PRIMARY),
        }
    }

    /// Whether RCON is available.
    pub fn has_rcon(&self) -> bool {
        self.rcon.is_some()
    }

    /// Whether private messages have been given up on.
    pub fn private_messages_unsupported(&self) -> bool {
        self.pm_mode.load(Ordering::Relaxed) == PM_UNSUPPORTED
    }

    /// Command vocabulary in use.
    pub fn commands(&self) -> &CommandSet {
        &self.commands
    }

    /// Send one raw command and return the body.
    ///
    /// # Errors
    ///
    /// Returns [`RconError::NotConfigured`] without RCON, or the call failure.
    pub async fn raw(&self, command: &str) -> Result<String, RconError> {
        let rcon = self
            .rcon
            .as_ref()
            .ok_or_else(|| RconError::NotConfigured("rcon is disabled".to_owned()))?;
        rcon.execute(command).await
    }

    /// Grant an item.
    ///
    /// # Errors
    ///
    /// Returns the RCON failure; a rejected grant is `Ok(Failed)`.
    pub async fn give_item(
        &self,
        player: &Player,
        item: &str,
        amount: u32,
    ) -> Result<CommandOutcome, RconError> {
        let amount = amount.to_string();
        let command = render(
            &self.commands.give_item,
            &[("player", &player.id), ("name", &player.name), ("item", item), ("amount", &amount)],
        );
        let response = self.raw(&command).await?;
        Ok(classify_grant(&response, &self.commands))
    }

    /// Grant the in-game currency equivalent.
    ///
    /// # Errors
    ///
    /// Returns the RCON failure; a rejected grant is `Ok(Failed)`.
    pub async fn give_currency(
        &self,
        player: &Player,
        amount: i64,
    ) -> Result<CommandOutcome, RconError> {
        let amount = amount.to_string();
        let command = render(
            &self.commands.give_currency,
            &[("player", &player.id), ("name", &player.name), ("amount", &amount)],
        );
        let response = self.raw(&command).await?;
        Ok(classify_grant(&response, &self.commands))
    }

    /// Grant experience.
    ///
    /// # Errors
    ///
    /// Returns the RCON failure; a rejected grant is `Ok(Failed)`.
    pub async fn give_experience(
        &self,
        player: &Player,
        amount: i64,
    ) -> Result<CommandOutcome, RconError> {
        let amount = amount.to_string();
        let command = render(
            &self.commands.give_experience,
            &[("player", &player.id), ("name", &player.name), ("amount", &amount)],
        );
        let response = self.raw(&command).await?;
        Ok(classify_grant(&response, &self.commands))
    }

    /// Grant several items, reporting each one.
    ///
    /// Transport errors on one item do not stop the rest.
    pub async fn deliver_items(&self, player: &Player, items: &[(String, u32)]) -> DeliveryReport {
        let mut delivered = Vec::with_capacity(items.len());
        for (item, amount) in items {
            let outcome = self
                .give_item(player, item, *amount)
                .await
                .map_err(|e| e.to_string());
            delivered.push(ItemDelivery {
                item: item.clone(),
                amount: *amount,
                outcome,
            });
        }
        let success = delivered
            .iter()
            .all(|d| matches!(&d.outcome, Ok(o) if o.is_success()));
        if !success {
            warn!(player = %player.id, "item delivery incomplete");
        }
        DeliveryReport {
            items: delivered,
            success,
        }
    }

    /// Message one player.
    ///
    /// Tries the primary command; on an unknown-command reply, tries the
    /// alternate spelling once. If that fails too, private messages are
    /// disabled for the life of this value and every later call becomes a
    /// broadcast prefixed with `@name:`.
    ///
    /// # Errors
    ///
    /// Returns the RCON failure of the final attempt.
    pub async fn private_message(
        &self,
        player: &Player,
        message: &str,
    ) -> Result<MessageRoute, RconError> {
        match self.pm_mode.load(Ordering::Relaxed) {
            PM_UNSUPPORTED => self.addressed_broadcast(player, message).await,
            PM_ALTERNATE => {
                let template = self
                    .commands
                    .private_message_alt
                    .as_deref()
                    .unwrap_or(&self.commands.private_message);
                self.send_private(template, player, message).await?;
                Ok(MessageRoute::PrivateAlternate)
            }
            _ => {
                let outcome = self
                    .send_private(&self.commands.private_message, player, message)
                    .await?;
                if outcome != CommandOutcome::UnknownCommand {
                    return Ok(MessageRoute::Private);
                }
                self.fallback_private(player, message).await
            }
        }
    }

    async fn fallback_private(
        &self,
        player: &Player,
        message: &str,
    ) -> Result<MessageRoute, RconError> {
        if let Some(alt) = self.commands.private_message_alt.as_deref() {
            match self.send_private(alt, player, message).await {
                Ok(CommandOutcome::Succeeded) => {
                    info!("switching to alternate private message command");
                    self.pm_mode.store(PM_ALTERNATE, Ordering::Relaxed);
                    return Ok(MessageRoute::PrivateAlternate);
                }
                Ok(outcome) => debug!(?outcome, "alternate private message failed"),
                Err(e) => {
                    debug!(error = %e, "alternate private message call failed");
                    return Err(e);
                }
            }
        }
        warn!("private messages unsupported, falling back to addressed broadcasts");
        self.pm_mode.store(PM_UNSUPPORTED, Ordering::Relaxed);
        self.addressed_broadcast(player, message).await
    }

    async fn send_private(
        &self,
        template: &str,
        player: &Player,
        message: &str,
    ) -> Result<CommandOutcome, RconError> {
        let command = render(
            template,
            &[("player", &player.id), ("name", &player.name), ("message", message)],
        );
        let response = self.raw(&command).await?;
        Ok(classify_message(&response, &self.commands))
    }

    async fn addressed_broadcast(
        &self,
        player: &Player,
        message: &str,
    ) -> Result<MessageRoute, RconError> {
        self.broadcast(&format!("@{}: {message}", player.name)).await?;
        Ok(MessageRoute::Broadcast)
    }

    /// Message every player.
    ///
    /// Uses the HTTP announce hook when available and falls back to RCON
    /// if it is absent or fails.
    ///
    /// # Errors
    ///
    /// Returns the RCON failure when the fallback is used and fails, or
    /// [`RconError::Rejected`] when the server refuses the broadcast.
    pub async fn broadcast(&self, message: &str) -> Result<(), RconError> {
        if let Some(prober) = &self.prober {
            if prober.announce(message).await {
                return Ok(());
            }
            debug!("announce endpoint failed, using rcon broadcast");
        }
        let command = render(&self.commands.broadcast, &[("message", message)]);
        let response = self.raw(&command).await?;
        match classify_message(&response, &self.commands) {
            CommandOutcome::Succeeded => Ok(()),
            CommandOutcome::Failed(text) => {
                warn!(response = %text, "broadcast rejected by server");
                Err(RconError::Rejected(text))
            }
            CommandOutcome::UnknownCommand => {
                warn!(command = %command, "broadcast command unknown to server");
                Err(RconError::Rejected(format!("unknown command: {command}")))
            }
        }
    }

    /// Ask the server to save the world via RCON.
    ///
    /// # Errors
    ///
    /// Returns [`RconError::NotConfigured`] if no save command is configured.
    pub async fn save(&self) -> Result<(), RconError> {
        let command = self
            .commands
            .save
            .as_deref()
            .ok_or_else(|| RconError::NotConfigured("no save command".to_owned()))?;
        self.raw(command).await.map(drop)
    }

    /// Ask the server to shut down after `delay_secs` via RCON.
    ///
    /// # Errors
    ///
    /// Returns [`RconError::NotConfigured`] if no shutdown command is configured.
    pub async fn request_shutdown(&self, delay_secs: u64, message: &str) -> Result<(), RconError> {
        let template = self
            .commands
            .shutdown
            .as_deref()
            .ok_or_else(|| RconError::NotConfigured("no shutdown command".to_owned()))?;
        let delay = delay_secs.to_string();
        let command = render(template, &[("delay", &delay), ("message", message)]);
        self.raw(&command).await.map(drop)
    }
}
