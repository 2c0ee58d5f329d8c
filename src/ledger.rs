//! Bundled player ledger backed by SQLite.
//!
//! A ready-to-use [`RewardSink`] for deployments without their own economy
//! service. Balance changes are single `UPDATE ... SET balance = balance + ?`
//! statements inside a transaction with the history insert, so concurrent
//! credits for one player never lose updates.

use std::path::Path;

use anyhow::Context;
use async_trait::async_trait;
use chrono::NaiveDate;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Sqlite, SqlitePool, Transaction};
use tracing::debug;

use crate::sinks::{ExperienceOutcome, LoginRecord, Player, PlayerProfile, RewardSink};

/// Experience per level step; level = 1 + floor(sqrt(xp / 100)).
const XP_PER_LEVEL_UNIT: i64 = 100;

const DAY_FORMAT: &str = "%Y-%m-%d";

/// Rank ladder as (minimum level, rank name), highest first.
const RANKS: &[(u32, &str)] = &[
    (35, "legend"),
    (20, "warlord"),
    (10, "raider"),
    (5, "scavenger"),
    (1, "survivor"),
];

/// Level for a total experience amount.
pub fn level_for(experience: i64) -> u32 {
    let units = u64::try_from(experience.max(0).checked_div(XP_PER_LEVEL_UNIT).unwrap_or(0))
        .unwrap_or(0);
    u32::try_from(integer_sqrt(units))
        .unwrap_or(u32::MAX)
        .saturating_add(1)
}

/// Rank name for a level.
pub fn rank_for_level(level: u32) -> &'static str {
    RANKS
        .iter()
        .find(|(min, _)| level >= *min)
        .map_or("survivor", |(_, name)| *name)
}

fn integer_sqrt(n: u64) -> u64 {
    // Largest r with r * r <= n.
    let (mut lo, mut hi) = (0u64, n.min(u64::from(u32::MAX)).saturating_add(1));
    while hi.saturating_sub(lo) > 1 {
        let mid = lo.saturating_add(hi.saturating_sub(lo) / 2);
        if mid.saturating_mul(mid) <= n {
            lo = mid;
        } else {
            hi = mid;
        }
    }
    lo
}

/// SQLite-backed [`RewardSink`].
#[derive(Debug, Clone)]
pub struct SqliteLedger {
    pool: SqlitePool,
}

impl SqliteLedger {
    /// Open (or create) the ledger at `path` and apply the schema.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or migration fails.
    pub async fn open(path: &Path) -> anyhow::Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("failed to create ledger directory {}", parent.display())
            })?;
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .busy_timeout(std::time::Duration::from_secs(5))
            .pragma("trusted_schema", "OFF")
            .pragma("foreign_keys", "ON");

        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await
            .with_context(|| format!("failed to open ledger at {}", path.display()))?;

        sqlx::raw_sql(include_str!("../migrations/001_ledger.sql"))
            .execute(&pool)
            .await
            .context("failed to apply ledger schema migration")?;

        Ok(Self { pool })
    }

    /// Current balance, `None` for an unknown player.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn balance(&self, player_id: &str) -> anyhow::Result<Option<i64>> {
        sqlx::query_scalar::<_, i64>("SELECT balance FROM players WHERE id = ?1")
            .bind(player_id)
            .fetch_optional(&self.pool)
            .await
            .context("failed to read balance")
    }

    /// Number of history rows for a player.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn transaction_count(&self, player_id: &str) -> anyhow::Result<i64> {
        sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM transactions WHERE player_id = ?1")
            .bind(player_id)
            .fetch_one(&self.pool)
            .await
            .context("failed to count transactions")
    }
}

async fn upsert_player(tx: &mut Transaction<'_, Sqlite>, player: &Player) -> anyhow::Result<()> {
    sqlx::query(
        r"INSERT INTO players (id, name) VALUES (?1, ?2)
          ON CONFLICT(id) DO UPDATE SET name = excluded.name",
    )
    .bind(&player.id)
    .bind(&player.name)
    .execute(&mut **tx)
    .await
    .context("failed to upsert player")?;
    Ok(())
}

#[async_trait]
impl RewardSink for SqliteLedger {
    async fn credit_currency(
        &self,
        player: &Player,
        amount: i64,
        reason: &str,
    ) -> anyhow::Result<()> {
        let mut tx = self.pool.begin().await.context("failed to begin transaction")?;
        upsert_player(&mut tx, player).await?;

        let balance_after = sqlx::query_scalar::<_, i64>(
            r"UPDATE players SET balance = balance + ?2, updated_at = datetime('now')
              WHERE id = ?1 RETURNING balance",
        )
        .bind(&player.id)
        .bind(amount)
        .fetch_one(&mut *tx)
        .await
        .context("failed to update balance")?;

        sqlx::query(
            "INSERT INTO transactions (player_id, amount, reason, balance_after) VALUES (?1, ?2, ?3, ?4)",
        )
        .bind(&player.id)
        .bind(amount)
        .bind(reason)
        .bind(balance_after)
        .execute(&mut *tx)
        .await
        .context("failed to record transaction")?;

        tx.commit().await.context("failed to commit credit")?;
        debug!(player = %player.id, amount, balance_after, reason, "currency credited");
        Ok(())
    }

    async fn credit_experience(
        &self,
        player: &Player,
        amount: i64,
    ) -> anyhow::Result<ExperienceOutcome> {
        let mut tx = self.pool.begin().await.context("failed to begin transaction")?;
        upsert_player(&mut tx, player).await?;

        let after = sqlx::query_scalar::<_, i64>(
            r"UPDATE players SET experience = experience + ?2, updated_at = datetime('now')
              WHERE id = ?1 RETURNING experience",
        )
        .bind(&player.id)
        .bind(amount)
        .fetch_one(&mut *tx)
        .await
        .context("failed to update experience")?;
        tx.commit().await.context("failed to commit experience")?;

        let before = after.saturating_sub(amount);
        let new_level = level_for(after);
        Ok(ExperienceOutcome {
            leveled_up: new_level > level_for(before),
            new_level,
        })
    }

    async fn player_rank(&self, player_id: &str) -> anyhow::Result<String> {
        let experience =
            sqlx::query_scalar::<_, i64>("SELECT experience FROM players WHERE id = ?1")
                .bind(player_id)
                .fetch_optional(&self.pool)
                .await
                .context("failed to read experience")?
                .unwrap_or(0);
        Ok(rank_for_level(level_for(experience)).to_owned())
    }

    async fn last_login(&self, player_id: &str) -> anyhow::Result<Option<LoginRecord>> {
        let row = sqlx::query_as::<_, (Option<String>, i64)>(
            "SELECT last_login_day, login_streak FROM players WHERE id = ?1",
        )
        .bind(player_id)
        .fetch_optional(&self.pool)
        .await
        .context("failed to read last login")?;

        let Some((Some(day), streak)) = row else {
            return Ok(None);
        };
        let day = NaiveDate::parse_from_str(&day, DAY_FORMAT)
            .with_context(|| format!("corrupt login day {day:?} for {player_id}"))?;
        Ok(Some(LoginRecord {
            day,
            streak: u32::try_from(streak).unwrap_or(0),
        }))
    }

    async fn store_login(&self, player: &Player, record: LoginRecord) -> anyhow::Result<()> {
        let mut tx = self.pool.begin().await.context("failed to begin transaction")?;
        upsert_player(&mut tx, player).await?;
        sqlx::query(
            r"UPDATE players SET last_login_day = ?2, login_streak = ?3, updated_at = datetime('now')
              WHERE id = ?1",
        )
        .bind(&player.id)
        .bind(record.day.format(DAY_FORMAT).to_string())
        .bind(i64::from(record.streak))
        .execute(&mut *tx)
        .await
        .context("failed to store login")?;
        tx.commit().await.context("failed to commit login")?;
        Ok(())
    }

    async fn profile(&self, player_id: &str) -> anyhow::Result<Option<PlayerProfile>> {
        let row = sqlx::query_as::<_, (String, i64, i64, i64)>(
            "SELECT name, balance, experience, login_streak FROM players WHERE id = ?1",
        )
        .bind(player_id)
        .fetch_optional(&self.pool)
        .await
        .context("failed to read profile")?;

        Ok(row.map(|(name, balance, experience, streak)| {
            let level = level_for(experience);
            PlayerProfile {
                name,
                balance,
                experience,
                level,
                rank: rank_for_level(level).to_owned(),
                streak: u32::try_from(streak).unwrap_or(0),
            }
        }))
    }
}
