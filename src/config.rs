//! Configuration loading, validation, and hot reload.
//!
//! Loads `overseer.toml` with per-section defaults. Every section is
//! `#[serde(default)]` so a minimal or empty config file is valid. Secrets
//! are never read from the file; sections name the environment variables
//! that hold them.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::Context;
use notify::{Config as NotifyConfig, RecommendedWatcher, RecursiveMode, Watcher};
use serde::Deserialize;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

/// Environment variable that overrides the config file location.
pub const CONFIG_PATH_ENV: &str = "OVERSEER_CONFIG";

/// Top-level configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct OverseerConfig {
    /// Child process definition and shutdown behaviour.
    #[serde(default)]
    pub server: SupervisorConfig,

    /// Supervisor polling intervals and timeouts.
    #[serde(default)]
    pub timings: TimingsConfig,

    /// Periodic restart scheduling.
    #[serde(default)]
    pub schedule: ScheduleConfig,

    /// Daily shutdown and startup times.
    #[serde(default)]
    pub daily: DailyConfig,

    /// Remote administration (RCON) connection and command vocabulary.
    #[serde(default)]
    pub rcon: RconConfig,

    /// Optional HTTP status endpoint.
    #[serde(default)]
    pub status: StatusConfig,

    /// Log tailing and event pattern settings.
    #[serde(default)]
    pub logs: LogsConfig,

    /// Reward tables and multipliers.
    #[serde(default)]
    pub rewards: RewardsConfig,

    /// Bidirectional chat relay.
    #[serde(default)]
    pub relay: RelayConfig,

    /// Telegram operator and relay chats.
    #[serde(default)]
    pub telegram: TelegramConfig,

    /// Bundled SQLite ledger.
    #[serde(default)]
    pub ledger: LedgerConfig,

    /// Filesystem locations for Overseer's own state.
    #[serde(default)]
    pub paths: PathsConfig,
}

/// How to launch, detect, and shut down the game server process.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SupervisorConfig {
    /// Working directory the server is launched from.
    #[serde(default = "default_working_dir")]
    pub working_dir: PathBuf,

    /// Program (script or executable) that starts the server.
    #[serde(default)]
    pub launch_program: String,

    /// Arguments passed to the launch program.
    #[serde(default)]
    pub launch_args: Vec<String>,

    /// Executable names that identify a running server (any variant matches).
    #[serde(default = "default_process_names")]
    pub process_names: Vec<String>,

    /// Intermediate launcher/wrapper executables killed alongside the server.
    #[serde(default)]
    pub launcher_names: Vec<String>,

    /// Whether stop/restart attempt the save-and-warn sequence first.
    #[serde(default = "default_true")]
    pub graceful_shutdown: bool,

    /// In-server delay requested before shutting down, in seconds.
    #[serde(default = "default_shutdown_delay_secs")]
    pub shutdown_delay_secs: u64,

    /// Warning broadcast to players before a graceful shutdown.
    #[serde(default = "default_shutdown_message")]
    pub shutdown_message: String,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            working_dir: default_working_dir(),
            launch_program: String::new(),
            launch_args: Vec::new(),
            process_names: default_process_names(),
            launcher_names: Vec::new(),
            graceful_shutdown: true,
            shutdown_delay_secs: default_shutdown_delay_secs(),
            shutdown_message: default_shutdown_message(),
        }
    }
}

impl SupervisorConfig {
    /// All executable names terminated on a forced stop: server and launchers.
    pub fn all_process_names(&self) -> Vec<String> {
        self.process_names
            .iter()
            .chain(self.launcher_names.iter())
            .cloned()
            .collect()
    }
}

/// Supervisor polling intervals and timeouts.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TimingsConfig {
    /// Seconds between background state re-evaluations.
    #[serde(default = "default_monitor_interval_secs")]
    pub monitor_interval_secs: u64,

    /// Seconds to wait for the process to appear after launch.
    #[serde(default = "default_appear_timeout_secs")]
    pub appear_timeout_secs: u64,

    /// Seconds to wait for the status endpoint to report responsive.
    #[serde(default = "default_responsive_timeout_secs")]
    pub responsive_timeout_secs: u64,

    /// Seconds to wait for a graceful exit before forcing termination.
    #[serde(default = "default_graceful_exit_timeout_secs")]
    pub graceful_exit_timeout_secs: u64,

    /// Seconds to wait for OS cleanup after forced termination.
    #[serde(default = "default_kill_wait_secs")]
    pub kill_wait_secs: u64,

    /// Safety buffer between stop and start during a restart.
    #[serde(default = "default_restart_buffer_secs")]
    pub restart_buffer_secs: u64,

    /// Poll granularity used by start/stop wait loops, in milliseconds.
    #[serde(default = "default_poll_step_ms")]
    pub poll_step_ms: u64,

    /// How long a process scan result is reused, in milliseconds.
    #[serde(default = "default_process_cache_ms")]
    pub process_cache_ms: u64,
}

impl Default for TimingsConfig {
    fn default() -> Self {
        Self {
            monitor_interval_secs: default_monitor_interval_secs(),
            appear_timeout_secs: default_appear_timeout_secs(),
            responsive_timeout_secs: default_responsive_timeout_secs(),
            graceful_exit_timeout_secs: default_graceful_exit_timeout_secs(),
            kill_wait_secs: default_kill_wait_secs(),
            restart_buffer_secs: default_restart_buffer_secs(),
            poll_step_ms: default_poll_step_ms(),
            process_cache_ms: default_process_cache_ms(),
        }
    }
}

/// Periodic restart scheduling.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ScheduleConfig {
    /// Whether automatic restarts are enabled at startup.
    #[serde(default)]
    pub enabled: bool,

    /// Restart interval in minutes, aligned to local midnight.
    #[serde(default = "default_interval_minutes")]
    pub interval_minutes: u64,

    /// Countdown announcement thresholds in seconds before the restart.
    #[serde(default = "default_announce_thresholds")]
    pub announce_thresholds: Vec<u64>,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            interval_minutes: default_interval_minutes(),
            announce_thresholds: default_announce_thresholds(),
        }
    }
}

/// Daily shutdown and startup times (`HH:MM`, local time).
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct DailyConfig {
    /// Time of day to shut the server down, if any.
    #[serde(default)]
    pub shutdown_at: Option<String>,

    /// Time of day to start the server, if any.
    #[serde(default)]
    pub startup_at: Option<String>,

    /// Seconds between the shutdown announcement and the stop.
    #[serde(default = "default_pre_announce_secs")]
    pub pre_announce_secs: u64,
}

impl Default for DailyConfig {
    fn default() -> Self {
        Self {
            shutdown_at: None,
            startup_at: None,
            pre_announce_secs: default_pre_announce_secs(),
        }
    }
}

/// RCON connection settings.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RconConfig {
    /// Host of the remote administration port.
    #[serde(default = "default_rcon_host")]
    pub host: String,

    /// Remote administration port. Zero disables RCON.
    #[serde(default = "default_rcon_port")]
    pub port: u16,

    /// Environment variable holding the RCON password.
    #[serde(default = "default_rcon_password_env")]
    pub password_env: String,

    /// Seconds allowed for the TCP connect.
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,

    /// Seconds allowed for a whole call (connect, auth, exec).
    #[serde(default = "default_call_timeout_secs")]
    pub call_timeout_secs: u64,

    /// Pause after every call before the next caller may proceed.
    #[serde(default = "default_post_call_delay_ms")]
    pub post_call_delay_ms: u64,

    /// Server-specific command vocabulary.
    #[serde(default)]
    pub commands: CommandSet,
}

impl Default for RconConfig {
    fn default() -> Self {
        Self {
            host: default_rcon_host(),
            port: default_rcon_port(),
            password_env: default_rcon_password_env(),
            connect_timeout_secs: default_connect_timeout_secs(),
            call_timeout_secs: default_call_timeout_secs(),
            post_call_delay_ms: default_post_call_delay_ms(),
            commands: CommandSet::default(),
        }
    }
}

/// Command templates and response tokens for a particular server variant.
///
/// Templates use `{player}`, `{item}`, `{amount}`, `{message}` and `{delay}`
/// placeholders.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CommandSet {
    /// Grants an item.
    #[serde(default = "default_give_item")]
    pub give_item: String,

    /// Grants the in-game currency equivalent.
    #[serde(default = "default_give_currency")]
    pub give_currency: String,

    /// Grants experience.
    #[serde(default = "default_give_experience")]
    pub give_experience: String,

    /// Sends a private message to one player.
    #[serde(default = "default_private_message")]
    pub private_message: String,

    /// Alternate private message spelling tried once on "unknown command".
    #[serde(default = "default_private_message_alt")]
    pub private_message_alt: Option<String>,

    /// Broadcasts to every player.
    #[serde(default = "default_broadcast")]
    pub broadcast: String,

    /// Saves the world, used by graceful stop without a status endpoint.
    #[serde(default = "default_save")]
    pub save: Option<String>,

    /// Requests a delayed shutdown, used by graceful stop without a status endpoint.
    #[serde(default = "default_shutdown")]
    pub shutdown: Option<String>,

    /// Case-insensitive tokens indicating success.
    #[serde(default = "default_success_tokens")]
    pub success_tokens: Vec<String>,

    /// Case-insensitive tokens indicating failure.
    #[serde(default = "default_failure_tokens")]
    pub failure_tokens: Vec<String>,

    /// Case-insensitive tokens indicating the command itself is unknown.
    #[serde(default = "default_unknown_command_tokens")]
    pub unknown_command_tokens: Vec<String>,
}

impl Default for CommandSet {
    fn default() -> Self {
        Self {
            give_item: default_give_item(),
            give_currency: default_give_currency(),
            give_experience: default_give_experience(),
            private_message: default_private_message(),
            private_message_alt: default_private_message_alt(),
            broadcast: default_broadcast(),
            save: default_save(),
            shutdown: default_shutdown(),
            success_tokens: default_success_tokens(),
            failure_tokens: default_failure_tokens(),
            unknown_command_tokens: default_unknown_command_tokens(),
        }
    }
}

/// HTTP status endpoint settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct StatusConfig {
    /// Base URL of the status endpoint. Empty disables the prober.
    #[serde(default)]
    pub base_url: String,

    /// Environment variable holding an optional bearer token.
    #[serde(default)]
    pub token_env: Option<String>,

    /// Per-request timeout in seconds.
    #[serde(default = "default_status_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for StatusConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            token_env: None,
            timeout_secs: default_status_timeout_secs(),
        }
    }
}

/// Log tailing settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LogsConfig {
    /// Whether the log pipeline runs at all.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Directory containing the server's rotating log files.
    #[serde(default = "default_log_dir")]
    pub dir: PathBuf,

    /// File extensions considered log files.
    #[serde(default = "default_log_extensions")]
    pub extensions: Vec<String>,

    /// Milliseconds between tail ticks.
    #[serde(default = "default_log_poll_ms")]
    pub poll_interval_ms: u64,

    /// Number of recent line hashes remembered to skip re-reads.
    #[serde(default = "default_seen_capacity")]
    pub seen_capacity: usize,

    /// Per-category pattern overrides.
    #[serde(default)]
    pub patterns: PatternsConfig,
}

impl Default for LogsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            dir: default_log_dir(),
            extensions: default_log_extensions(),
            poll_interval_ms: default_log_poll_ms(),
            seen_capacity: default_seen_capacity(),
            patterns: PatternsConfig::default(),
        }
    }
}

/// Regular expression overrides per event category.
///
/// `None` keeps the built-in pattern for that category.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct PatternsConfig {
    /// Player joined.
    #[serde(default)]
    pub login: Option<String>,
    /// Player left.
    #[serde(default)]
    pub logout: Option<String>,
    /// Structure placed.
    #[serde(default)]
    pub building: Option<String>,
    /// Item crafted.
    #[serde(default)]
    pub crafting: Option<String>,
    /// Technology unlocked.
    #[serde(default)]
    pub tech: Option<String>,
    /// Chat message.
    #[serde(default)]
    pub chat: Option<String>,
    /// Damage dealt.
    #[serde(default)]
    pub combat: Option<String>,
    /// Kill.
    #[serde(default)]
    pub kill: Option<String>,
    /// Chest looted.
    #[serde(default)]
    pub chest: Option<String>,
    /// Oil rig raid completed.
    #[serde(default)]
    pub raid: Option<String>,
}

/// Currency and experience pair as written in config.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub struct RewardValue {
    /// Currency amount.
    #[serde(default)]
    pub currency: i64,
    /// Experience amount.
    #[serde(default)]
    pub experience: i64,
}

impl RewardValue {
    const fn new(currency: i64, experience: i64) -> Self {
        Self {
            currency,
            experience,
        }
    }
}

/// A reward keyed by a case-insensitive substring of an item or material name.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RewardRule {
    /// Substring matched against the name.
    pub key: String,
    /// Currency amount.
    #[serde(default)]
    pub currency: i64,
    /// Experience amount.
    #[serde(default)]
    pub experience: i64,
}

impl RewardRule {
    fn new(key: &str, currency: i64, experience: i64) -> Self {
        Self {
            key: key.to_owned(),
            currency,
            experience,
        }
    }
}

/// Streak length that earns a one-off bonus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct StreakTier {
    /// Consecutive days required.
    pub days: u32,
    /// Bonus currency.
    pub currency: i64,
}

/// Known oil rig location used by the position classifier.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RigPosition {
    /// `small` or `large`.
    pub tier: String,
    /// Centre x coordinate.
    pub x: f64,
    /// Centre z coordinate.
    pub z: f64,
    /// Match radius.
    #[serde(default = "default_rig_radius")]
    pub radius: f64,
}

/// Reward tables and multipliers.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RewardsConfig {
    /// Building rewards keyed by material.
    #[serde(default = "default_building_rules")]
    pub building: Vec<RewardRule>,
    /// Building reward when no material rule matches.
    #[serde(default = "default_building_fallback")]
    pub building_default: RewardValue,

    /// Crafting rewards keyed by item name.
    #[serde(default = "default_crafting_rules")]
    pub crafting: Vec<RewardRule>,
    /// Crafting reward when no item rule matches.
    #[serde(default = "default_crafting_fallback")]
    pub crafting_default: RewardValue,

    /// Chest rewards keyed by chest type.
    #[serde(default = "default_chest_rules")]
    pub chest: Vec<RewardRule>,
    /// Chest reward when no chest rule matches.
    #[serde(default = "default_chest_fallback")]
    pub chest_default: RewardValue,

    /// Technology unlock reward.
    #[serde(default = "default_tech_reward")]
    pub tech: RewardValue,
    /// Kill reward.
    #[serde(default = "default_kill_reward")]
    pub kill: RewardValue,
    /// Chat message reward.
    #[serde(default = "default_chat_reward")]
    pub chat: RewardValue,
    /// Minimum seconds between chat rewards for one player.
    #[serde(default = "default_chat_cooldown_secs")]
    pub chat_cooldown_secs: u64,
    /// First-login-of-the-day reward.
    #[serde(default = "default_login_reward")]
    pub login: RewardValue,
    /// Streak bonus tiers.
    #[serde(default = "default_streak_tiers")]
    pub streak_tiers: Vec<StreakTier>,

    /// Small oil rig reward.
    #[serde(default = "default_rig_small")]
    pub rig_small: RewardValue,
    /// Large oil rig reward.
    #[serde(default = "default_rig_large")]
    pub rig_large: RewardValue,
    /// Oil rig reward when the tier cannot be determined.
    #[serde(default = "default_rig_unknown")]
    pub rig_unknown: RewardValue,
    /// Known rig locations for the position classifier.
    #[serde(default)]
    pub rig_positions: Vec<RigPosition>,

    /// Currency multiplier per player rank (lower-case rank names).
    #[serde(default = "default_rank_multipliers")]
    pub rank_multipliers: HashMap<String, f64>,
}

impl Default for RewardsConfig {
    fn default() -> Self {
        Self {
            building: default_building_rules(),
            building_default: default_building_fallback(),
            crafting: default_crafting_rules(),
            crafting_default: default_crafting_fallback(),
            chest: default_chest_rules(),
            chest_default: default_chest_fallback(),
            tech: default_tech_reward(),
            kill: default_kill_reward(),
            chat: default_chat_reward(),
            chat_cooldown_secs: default_chat_cooldown_secs(),
            login: default_login_reward(),
            streak_tiers: default_streak_tiers(),
            rig_small: default_rig_small(),
            rig_large: default_rig_large(),
            rig_unknown: default_rig_unknown(),
            rig_positions: Vec::new(),
            rank_multipliers: default_rank_multipliers(),
        }
    }
}

/// Chat relay settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RelayConfig {
    /// Whether chat is relayed in either direction.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Marker prepended to messages relayed into the game.
    #[serde(default = "default_relay_marker")]
    pub marker: String,

    /// Capacity of the recently-relayed set.
    #[serde(default = "default_relay_capacity")]
    pub capacity: usize,

    /// Prefix that marks a chat line as a command rather than a message.
    #[serde(default = "default_command_prefix")]
    pub command_prefix: String,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            marker: default_relay_marker(),
            capacity: default_relay_capacity(),
            command_prefix: default_command_prefix(),
        }
    }
}

/// Telegram notification targets.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TelegramConfig {
    /// Environment variable holding the bot token.
    #[serde(default = "default_bot_token_env")]
    pub bot_token_env: String,

    /// Chats receiving operator notifications.
    #[serde(default)]
    pub operator_chats: Vec<i64>,

    /// Chat bridged with in-game chat.
    #[serde(default)]
    pub relay_chat: Option<i64>,

    /// Chat whose title mirrors the server state.
    #[serde(default)]
    pub status_chat: Option<i64>,

    /// Prefix for operator messages.
    #[serde(default = "default_telegram_prefix")]
    pub prefix: String,
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            bot_token_env: default_bot_token_env(),
            operator_chats: Vec::new(),
            relay_chat: None,
            status_chat: None,
            prefix: default_telegram_prefix(),
        }
    }
}

/// Bundled ledger location.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct LedgerConfig {
    /// SQLite file path; defaults to `<data_dir>/ledger.db`.
    #[serde(default)]
    pub path: Option<PathBuf>,
}

/// Overseer's own state directory.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct PathsConfig {
    /// Root for logs and the ledger; defaults to `~/.overseer`.
    #[serde(default)]
    pub data_dir: Option<PathBuf>,
}

/// Resolved filesystem locations.
#[derive(Debug, Clone)]
pub struct RuntimePaths {
    /// Data root.
    pub root: PathBuf,
    /// Directory for Overseer's own JSON logs.
    pub logs_dir: PathBuf,
    /// SQLite ledger file.
    pub ledger_db: PathBuf,
}

impl OverseerConfig {
    /// Validate that configuration values are within sane bounds.
    ///
    /// # Errors
    ///
    /// Returns the first configuration problem found.
    pub fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(
            !self.server.process_names.is_empty(),
            "server.process_names must list at least one executable name"
        );
        anyhow::ensure!(
            self.timings.monitor_interval_secs >= 1,
            "timings.monitor_interval_secs must be >= 1"
        );
        anyhow::ensure!(
            self.timings.poll_step_ms >= 1,
            "timings.poll_step_ms must be >= 1"
        );
        anyhow::ensure!(self.relay.capacity >= 1, "relay.capacity must be >= 1");
        anyhow::ensure!(
            self.logs.seen_capacity >= 1,
            "logs.seen_capacity must be >= 1"
        );
        anyhow::ensure!(
            self.logs.poll_interval_ms >= 1,
            "logs.poll_interval_ms must be >= 1"
        );
        for (rank, multiplier) in &self.rewards.rank_multipliers {
            anyhow::ensure!(
                multiplier.is_finite() && *multiplier > 0.0,
                "rewards.rank_multipliers.{rank} must be a positive number"
            );
        }
        for rig in &self.rewards.rig_positions {
            anyhow::ensure!(
                rig.tier.eq_ignore_ascii_case("small") || rig.tier.eq_ignore_ascii_case("large"),
                "rewards.rig_positions tier must be 'small' or 'large', got {:?}",
                rig.tier
            );
        }
        if let Some(at) = &self.daily.shutdown_at {
            validate_hhmm(at).context("daily.shutdown_at")?;
        }
        if let Some(at) = &self.daily.startup_at {
            validate_hhmm(at).context("daily.startup_at")?;
        }
        if !self.status.base_url.is_empty() {
            anyhow::ensure!(
                self.status.base_url.starts_with("http://")
                    || self.status.base_url.starts_with("https://"),
                "status.base_url must start with http:// or https://"
            );
        }
        Ok(())
    }

    /// Resolve data, log, and ledger paths.
    ///
    /// # Errors
    ///
    /// Returns an error if no data directory is configured and the home
    /// directory cannot be determined.
    pub fn runtime_paths(&self) -> anyhow::Result<RuntimePaths> {
        let root = match &self.paths.data_dir {
            Some(dir) => dir.clone(),
            None => config_dir()?,
        };
        let ledger_db = self
            .ledger
            .path
            .clone()
            .unwrap_or_else(|| root.join("ledger.db"));
        Ok(RuntimePaths {
            logs_dir: root.join("logs"),
            ledger_db,
            root,
        })
    }
}

fn validate_hhmm(value: &str) -> anyhow::Result<()> {
    let parts: Vec<&str> = value.split(':').collect();
    anyhow::ensure!(
        parts.len() == 2
            && parts[0].len() == 2
            && parts[1].len() == 2
            && parts[0].parse::<u32>().is_ok_and(|h| h < 24)
            && parts[1].parse::<u32>().is_ok_and(|m| m < 60),
        "must be HH:MM format (00:00 - 23:59), got {value:?}"
    );
    Ok(())
}

/// Load and validate configuration from a TOML file.
///
/// A missing file yields the defaults.
///
/// # Errors
///
/// Returns an error if the file cannot be read, parsed, or fails validation.
pub fn load_config(path: &Path) -> anyhow::Result<OverseerConfig> {
    let config = match std::fs::read_to_string(path) {
        Ok(contents) => {
            debug!(path = %path.display(), "loading config from file");
            toml::from_str::<OverseerConfig>(&contents)
                .with_context(|| format!("failed to parse config at {}", path.display()))?
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            info!(path = %path.display(), "no config file found, using defaults");
            OverseerConfig::default()
        }
        Err(e) => {
            return Err(e).with_context(|| format!("failed to read config at {}", path.display()))
        }
    };
    config.validate()?;
    Ok(config)
}

/// Resolve the config file path: explicit flag, then `$OVERSEER_CONFIG`,
/// then `./overseer.toml`.
pub fn resolve_config_path(explicit: Option<PathBuf>) -> PathBuf {
    explicit
        .or_else(|| std::env::var(CONFIG_PATH_ENV).ok().map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from("overseer.toml"))
}

/// Resolve the default data directory (`~/.overseer/`).
///
/// # Errors
///
/// Returns an error if the home directory cannot be determined.
pub fn config_dir() -> anyhow::Result<PathBuf> {
    let home = directories::BaseDirs::new()
        .ok_or_else(|| anyhow::anyhow!("cannot determine home directory"))?;
    Ok(home.home_dir().join(".overseer"))
}

/// Watch the config file and send every successfully reloaded config.
///
/// Watches the parent directory so editor-style atomic saves (write-new +
/// rename) are caught. Invalid reloads are logged and skipped. Returns when
/// shutdown is signalled or the receiver is dropped.
pub async fn watch_config(
    path: PathBuf,
    tx: mpsc::Sender<OverseerConfig>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let (event_tx, mut event_rx) = mpsc::channel::<notify::Event>(16);

    let mut watcher = match RecommendedWatcher::new(
        move |res: notify::Result<notify::Event>| {
            if let Ok(event) = res {
                let _ = event_tx.blocking_send(event);
            }
        },
        NotifyConfig::default(),
    ) {
        Ok(w) => w,
        Err(e) => {
            warn!(error = %e, "failed to create config watcher");
            return;
        }
    };

    let watch_dir = match path.parent() {
        Some(d) if !d.as_os_str().is_empty() => d.to_path_buf(),
        _ => PathBuf::from("."),
    };

    if let Err(e) = watcher.watch(&watch_dir, RecursiveMode::NonRecursive) {
        warn!(error = %e, dir = %watch_dir.display(), "failed to watch config directory");
        return;
    }

    let file_name = path.file_name().map(ToOwned::to_owned);

    loop {
        tokio::select! {
            event = event_rx.recv() => {
                let Some(event) = event else { break };
                let affects_config = event
                    .paths
                    .iter()
                    .any(|p| p.file_name().map(ToOwned::to_owned) == file_name);
                let is_write = matches!(
                    event.kind,
                    notify::EventKind::Create(_) | notify::EventKind::Modify(_)
                );
                if !(affects_config && is_write) {
                    continue;
                }
                match load_config(&path) {
                    Ok(config) => {
                        info!(path = %path.display(), "config reloaded");
                        if tx.send(config).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => warn!(error = %e, "config reload rejected"),
                }
            }
            result = shutdown_rx.changed() => {
                if result.is_err() || *shutdown_rx.borrow() {
                    break;
                }
            }
        }
    }
}

// Default value functions for serde.

fn default_true() -> bool {
    true
}
fn default_working_dir() -> PathBuf {
    PathBuf::from(".")
}
fn default_process_names() -> Vec<String> {
    vec!["GameServer".to_owned(), "GameServer.exe".to_owned()]
}
fn default_shutdown_delay_secs() -> u64 {
    10
}
fn default_shutdown_message() -> String {
    "Server is shutting down for maintenance".to_owned()
}
fn default_monitor_interval_secs() -> u64 {
    15
}
fn default_appear_timeout_secs() -> u64 {
    20
}
fn default_responsive_timeout_secs() -> u64 {
    120
}
fn default_graceful_exit_timeout_secs() -> u64 {
    30
}
fn default_kill_wait_secs() -> u64 {
    5
}
fn default_restart_buffer_secs() -> u64 {
    30
}
fn default_poll_step_ms() -> u64 {
    1000
}
fn default_process_cache_ms() -> u64 {
    2000
}
fn default_interval_minutes() -> u64 {
    180
}
fn default_announce_thresholds() -> Vec<u64> {
    vec![1800, 600, 300, 60, 0]
}
fn default_pre_announce_secs() -> u64 {
    60
}
fn default_rcon_host() -> String {
    "127.0.0.1".to_owned()
}
fn default_rcon_port() -> u16 {
    28016
}
fn default_rcon_password_env() -> String {
    "OVERSEER_RCON_PASSWORD".to_owned()
}
fn default_connect_timeout_secs() -> u64 {
    5
}
fn default_call_timeout_secs() -> u64 {
    10
}
fn default_post_call_delay_ms() -> u64 {
    500
}
fn default_give_item() -> String {
    "giveitem {player} {item} {amount}".to_owned()
}
fn default_give_currency() -> String {
    "giveitem {player} coins {amount}".to_owned()
}
fn default_give_experience() -> String {
    "givexp {player} {amount}".to_owned()
}
fn default_private_message() -> String {
    "pm {player} {message}".to_owned()
}
fn default_private_message_alt() -> Option<String> {
    Some("tell {player} {message}".to_owned())
}
fn default_broadcast() -> String {
    "say {message}".to_owned()
}
fn default_save() -> Option<String> {
    Some("save".to_owned())
}
fn default_shutdown() -> Option<String> {
    Some("shutdown {delay} {message}".to_owned())
}
fn default_success_tokens() -> Vec<String> {
    ["success", "gave", "given", "sent", "added"]
        .iter()
        .map(|s| (*s).to_owned())
        .collect()
}
fn default_failure_tokens() -> Vec<String> {
    ["fail", "error", "not found", "invalid", "no player", "offline"]
        .iter()
        .map(|s| (*s).to_owned())
        .collect()
}
fn default_unknown_command_tokens() -> Vec<String> {
    ["unknown command", "command not found", "no such command"]
        .iter()
        .map(|s| (*s).to_owned())
        .collect()
}
fn default_status_timeout_secs() -> u64 {
    5
}
fn default_log_dir() -> PathBuf {
    PathBuf::from("logs")
}
fn default_log_extensions() -> Vec<String> {
    vec!["log".to_owned(), "txt".to_owned()]
}
fn default_log_poll_ms() -> u64 {
    1000
}
fn default_seen_capacity() -> usize {
    1000
}
fn default_building_rules() -> Vec<RewardRule> {
    vec![
        RewardRule::new("armored", 40, 40),
        RewardRule::new("metal", 20, 20),
        RewardRule::new("stone", 10, 10),
        RewardRule::new("wood", 5, 5),
    ]
}
fn default_building_fallback() -> RewardValue {
    RewardValue::new(2, 2)
}
fn default_crafting_rules() -> Vec<RewardRule> {
    vec![
        RewardRule::new("ingot", 4, 6),
        RewardRule::new("rifle", 15, 20),
        RewardRule::new("ammo", 2, 3),
        RewardRule::new("med", 5, 5),
    ]
}
fn default_crafting_fallback() -> RewardValue {
    RewardValue::new(1, 2)
}
fn default_chest_rules() -> Vec<RewardRule> {
    vec![
        RewardRule::new("elite", 30, 30),
        RewardRule::new("military", 15, 15),
    ]
}
fn default_chest_fallback() -> RewardValue {
    RewardValue::new(5, 5)
}
fn default_tech_reward() -> RewardValue {
    RewardValue::new(25, 50)
}
fn default_kill_reward() -> RewardValue {
    RewardValue::new(10, 15)
}
fn default_chat_reward() -> RewardValue {
    RewardValue::new(1, 1)
}
fn default_chat_cooldown_secs() -> u64 {
    60
}
fn default_login_reward() -> RewardValue {
    RewardValue::new(10, 10)
}
fn default_streak_tiers() -> Vec<StreakTier> {
    [(3, 25), (7, 75), (14, 150), (30, 500)]
        .iter()
        .map(|&(days, currency)| StreakTier { days, currency })
        .collect()
}
fn default_rig_small() -> RewardValue {
    RewardValue::new(100, 150)
}
fn default_rig_large() -> RewardValue {
    RewardValue::new(250, 300)
}
fn default_rig_unknown() -> RewardValue {
    RewardValue::new(100, 100)
}
fn default_rig_radius() -> f64 {
    150.0
}
fn default_rank_multipliers() -> HashMap<String, f64> {
    [
        ("survivor", 1.0),
        ("scavenger", 1.1),
        ("raider", 1.25),
        ("warlord", 1.5),
        ("legend", 2.0),
    ]
    .iter()
    .map(|&(rank, m)| (rank.to_owned(), m))
    .collect()
}
fn default_relay_marker() -> String {
    "[TG]".to_owned()
}
fn default_relay_capacity() -> usize {
    100
}
fn default_command_prefix() -> String {
    "!".to_owned()
}
fn default_bot_token_env() -> String {
    "OVERSEER_TELEGRAM_TOKEN".to_owned()
}
fn default_telegram_prefix() -> String {
    "Overseer".to_owned()
}
