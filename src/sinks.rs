//! Interfaces to the external collaborators: the player ledger and the
//! operator-facing notification channel.

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::supervisor::ServerState;

/// A player as identified in the server log.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Player {
    /// Platform id (e.g. a 17-digit account number).
    pub id: String,
    /// Display name at the time of the event.
    pub name: String,
}

impl Player {
    /// Build a player from id and name.
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
        }
    }
}

/// Result of crediting experience.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExperienceOutcome {
    /// Whether the credit crossed a level boundary.
    pub leveled_up: bool,
    /// Level after the credit.
    pub new_level: u32,
}

/// Last recorded login for streak tracking.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoginRecord {
    /// Calendar day of the last login.
    pub day: NaiveDate,
    /// Consecutive-day streak as of that day.
    pub streak: u32,
}

/// Snapshot of a player's standing, used by in-game lookups.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlayerProfile {
    /// Display name.
    pub name: String,
    /// Currency balance.
    pub balance: i64,
    /// Total experience.
    pub experience: i64,
    /// Current level.
    pub level: u32,
    /// Current rank name.
    pub rank: String,
    /// Current login streak.
    pub streak: u32,
}

/// Player ledger that persists currency and experience.
///
/// Implementations must be safe under concurrent calls for the same player:
/// two credits racing on one balance must both land.
#[async_trait]
pub trait RewardSink: Send + Sync {
    /// Add `amount` currency to the player's balance and record why.
    ///
    /// # Errors
    ///
    /// Returns an error if the credit could not be persisted.
    async fn credit_currency(&self, player: &Player, amount: i64, reason: &str)
        -> anyhow::Result<()>;

    /// Add experience and report whether the player levelled up.
    ///
    /// # Errors
    ///
    /// Returns an error if the credit could not be persisted.
    async fn credit_experience(
        &self,
        player: &Player,
        amount: i64,
    ) -> anyhow::Result<ExperienceOutcome>;

    /// Current rank name for the player.
    ///
    /// # Errors
    ///
    /// Returns an error if the ledger cannot be queried.
    async fn player_rank(&self, player_id: &str) -> anyhow::Result<String>;

    /// Most recent login, if any.
    ///
    /// # Errors
    ///
    /// Returns an error if the ledger cannot be queried.
    async fn last_login(&self, player_id: &str) -> anyhow::Result<Option<LoginRecord>>;

    /// Persist a login and its streak.
    ///
    /// # Errors
    ///
    /// Returns an error if the record could not be persisted.
    async fn store_login(&self, player: &Player, record: LoginRecord) -> anyhow::Result<()>;

    /// Full standing for a player, `None` if unknown.
    ///
    /// # Errors
    ///
    /// Returns an error if the ledger cannot be queried.
    async fn profile(&self, player_id: &str) -> anyhow::Result<Option<PlayerProfile>>;
}

/// Operator-facing message channel.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    /// Post a human-readable message.
    ///
    /// # Errors
    ///
    /// Returns an error if the message could not be delivered anywhere.
    async fn notify(&self, text: &str) -> anyhow::Result<()>;

    /// Report a server state transition.
    ///
    /// # Errors
    ///
    /// Returns an error if the update could not be delivered.
    async fn notify_state_change(&self, old: ServerState, new: ServerState)
        -> anyhow::Result<()>;

    /// Relay an in-game chat message to the chat platform.
    ///
    /// # Errors
    ///
    /// Returns an error if the message could not be delivered.
    async fn relay_chat(&self, author: &str, text: &str) -> anyhow::Result<()> {
        self.notify(&format!("{author}: {text}")).await
    }
}
