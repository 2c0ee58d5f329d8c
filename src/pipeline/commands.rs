//! `!` commands typed into in-game chat.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::rcon::{GameAdmin, MessageRoute};
use crate::sinks::{Player, PlayerProfile, RewardSink};

/// Recognised in-game command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InGameCommand {
    /// `!balance` / `!bal`.
    Balance,
    /// `!profile` / `!stats`.
    Profile,
}

/// Whether `message` is command-shaped (starts with `prefix`).
pub fn is_command(message: &str, prefix: &str) -> bool {
    !prefix.is_empty() && message.trim_start().starts_with(prefix)
}

/// Parse a command. Unknown words yield `None`.
pub fn parse_command(message: &str, prefix: &str) -> Option<InGameCommand> {
    if !is_command(message, prefix) {
        return None;
    }
    let rest = message.trim_start().strip_prefix(prefix)?;
    let word = rest.split_whitespace().next()?.to_lowercase();
    match word.as_str() {
        "balance" | "bal" => Some(InGameCommand::Balance),
        "profile" | "stats" => Some(InGameCommand::Profile),
        _ => None,
    }
}

/// Reply text for a command.
pub fn render_reply(command: InGameCommand, profile: Option<&PlayerProfile>) -> String {
    let Some(p) = profile else {
        return "No record yet. Play to start earning!".to_owned();
    };
    match command {
        InGameCommand::Balance => format!("Balance: {} coins", p.balance),
        InGameCommand::Profile => format!(
            "{}: level {} {} | {} xp | {} coins | {}-day streak",
            p.name, p.level, p.rank, p.experience, p.balance, p.streak
        ),
    }
}

/// Look up the player's standing and reply privately.
///
/// # Errors
///
/// Returns an error if the ledger query or the reply fails.
pub async fn handle_command(
    command: InGameCommand,
    player: &Player,
    sink: &Arc<dyn RewardSink>,
    admin: &GameAdmin,
) -> anyhow::Result<()> {
    let profile = sink.profile(&player.id).await?;
    let reply = render_reply(command, profile.as_ref());
    let route = admin.private_message(player, &reply).await?;
    if route == MessageRoute::Broadcast {
        warn!(player = %player.id, ?command, "command reply sent as broadcast");
    } else {
        debug!(player = %player.id, ?command, ?route, "command answered");
    }
    Ok(())
}
