//! Log-driven event pipeline.
//!
//! Each tick reads newly appended lines from the newest server log, matches
//! them against the event table, posts rewards to the [`RewardSink`], relays
//! chat, answers `!` commands, and fans out operator and in-game messages.
//! Side messages are dispatched on their own tasks and never hold up the
//! tail.

pub mod commands;
pub mod events;
pub mod relay;
pub mod rewards;
pub mod tailer;

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use chrono::Local;
use sha2::{Digest, Sha256};
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, info, warn};

pub use events::{EventDetail, EventKind, EventTable, ExtractedEvent, GameEvent};
pub use relay::{ChatRelay, DedupeKey, DedupeSet, OutboundDecision};
pub use rewards::{advance_streak, Reward, RewardTable, RigResolution, RigTier, StreakUpdate};
pub use tailer::{LogCursor, LogTailer};

use crate::config::OverseerConfig;
use crate::rcon::GameAdmin;
use crate::sinks::{LoginRecord, NotificationSink, Player, RewardSink};

use self::commands::{handle_command, is_command, parse_command};
use self::rewards::Cooldowns;

/// Pause after a failed tick.
const ERROR_BACKOFF: Duration = Duration::from_secs(5);

/// Bounded memory of recently processed line hashes.
#[derive(Debug)]
struct SeenLines {
    capacity: usize,
    order: VecDeque<String>,
    members: HashSet<String>,
}

impl SeenLines {
    fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            order: VecDeque::new(),
            members: HashSet::new(),
        }
    }

    /// Returns false if the line was already seen.
    fn insert(&mut self, line: &str) -> bool {
        let hash = hex::encode(Sha256::digest(line.as_bytes()));
        if self.members.contains(&hash) {
            return false;
        }
        while self.order.len() >= self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.members.remove(&oldest);
            }
        }
        self.members.insert(hash.clone());
        self.order.push_back(hash);
        true
    }
}

/// Extra facts about a processed event, used when rendering messages.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Annotations {
    /// New level when the reward crossed a level boundary.
    pub level_up: Option<u32>,
    /// New rank when the level-up changed it.
    pub rank_up: Option<String>,
    /// Login streak on a first login of the day.
    pub streak: Option<u32>,
    /// Streak bonus currency included in the reward.
    pub streak_bonus: i64,
    /// Oil rig classification.
    pub rig: Option<RigResolution>,
}

/// Messages produced for one event. Either may be absent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventMessages {
    /// Rich text for the operator channel.
    pub notification: Option<String>,
    /// Short player-facing in-game broadcast.
    pub broadcast: Option<String>,
}

/// Render the operator notification and in-game broadcast for an event.
pub fn render_messages(event: &GameEvent, notes: &Annotations) -> EventMessages {
    let name = &event.player.name;
    let coins = event.reward.currency;
    let gained = if coins == 0 {
        String::new()
    } else {
        format!(" (+{coins} coins)")
    };

    let mut messages = match &event.detail {
        EventDetail::Login => match notes.streak {
            Some(streak) => {
                let bonus = if notes.streak_bonus > 0 {
                    format!(" {streak}-day streak bonus!")
                } else {
                    String::new()
                };
                EventMessages {
                    notification: Some(format!("🟢 {name} joined, day {streak} streak{gained}")),
                    broadcast: (coins != 0).then(|| {
                        format!("Welcome back {name}! Day {streak}: +{coins} coins.{bonus}")
                    }),
                }
            }
            None => EventMessages {
                notification: Some(format!("🟢 {name} joined")),
                broadcast: None,
            },
        },
        EventDetail::Logout
        | EventDetail::Building { .. }
        | EventDetail::Crafting { .. }
        | EventDetail::Chat { .. }
        | EventDetail::ChestLoot { .. } => EventMessages::default(),
        EventDetail::TechUnlock { tech } => EventMessages {
            notification: Some(format!("🔬 {name} unlocked {tech}{gained}")),
            broadcast: Some(format!("{name} unlocked {tech}!")),
        },
        EventDetail::Combat {
            target,
            damage,
            weapon,
        } => EventMessages {
            notification: Some(match weapon {
                Some(weapon) => format!("⚔️ {name} hit {target} for {damage} with {weapon}"),
                None => format!("⚔️ {name} hit {target} for {damage}"),
            }),
            broadcast: None,
        },
        EventDetail::Kill { victim, weapon, .. } => EventMessages {
            notification: Some(match weapon {
                Some(weapon) => format!("💀 {name} killed {victim} with {weapon}{gained}"),
                None => format!("💀 {name} killed {victim}{gained}"),
            }),
            broadcast: Some(format!("{name} killed {victim}")),
        },
        EventDetail::OilRigRaid { .. } => {
            let tier = notes
                .rig
                .and_then(|r| r.tier)
                .map_or("oil rig", |t| match t {
                    RigTier::Small => "small oil rig",
                    RigTier::Large => "large oil rig",
                });
            let mut notification = format!("🛢️ {name} completed the {tier}{gained}");
            if let Some((by_tag, by_position)) = notes.rig.and_then(|r| r.mismatch) {
                notification.push_str(&format!(
                    "\n⚠️ Tier mismatch: tag says {}, position says {}. Paid {}, please review.",
                    by_tag.label(),
                    by_position.label(),
                    by_tag.min(by_position).label()
                ));
            }
            EventMessages {
                notification: Some(notification),
                broadcast: Some(format!("{name} completed the {tier}! +{coins} coins")),
            }
        }
    };

    if let Some(level) = notes.level_up {
        let line = match &notes.rank_up {
            Some(rank) => format!("⬆️ {name} reached level {level} and is now a {rank}"),
            None => format!("⬆️ {name} reached level {level}"),
        };
        messages.notification = Some(match messages.notification.take() {
            Some(text) => format!("{text}\n{line}"),
            None => line,
        });
        let cheer = match &notes.rank_up {
            Some(rank) => format!("{name} is now level {level} ({rank})!"),
            None => format!("{name} is now level {level}!"),
        };
        messages.broadcast = Some(match messages.broadcast.take() {
            Some(text) => format!("{text} {cheer}"),
            None => cheer,
        });
    }
    messages
}

/// Ledger reason recorded with a currency credit.
pub fn reward_reason(detail: &EventDetail) -> String {
    match detail {
        EventDetail::Login => "login".to_owned(),
        EventDetail::Logout => "logout".to_owned(),
        EventDetail::Building { item, .. } => format!("building {item}"),
        EventDetail::Crafting { item, count } => format!("crafting {item} x{count}"),
        EventDetail::TechUnlock { tech } => format!("tech {tech}"),
        EventDetail::Chat { .. } => "chat".to_owned(),
        EventDetail::Combat { target, .. } => format!("combat {target}"),
        EventDetail::Kill { victim, .. } => format!("kill {victim}"),
        EventDetail::ChestLoot { chest } => format!("chest {chest}"),
        EventDetail::OilRigRaid { .. } => "oil rig".to_owned(),
    }
}

/// Tails the server log and turns lines into rewards and messages.
pub struct LogPipeline {
    tailer: Arc<std::sync::Mutex<LogTailer>>,
    table: EventTable,
    rewards: RewardTable,
    relay: Arc<ChatRelay>,
    seen: SeenLines,
    chat_cooldown: Cooldowns,
    command_prefix: String,
    poll_interval: Duration,
    sink: Arc<dyn RewardSink>,
    notifier: Arc<dyn NotificationSink>,
    admin: Option<Arc<GameAdmin>>,
}

impl std::fmt::Debug for LogPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogPipeline")
            .field("tailer", &self.tailer)
            .field("table", &self.table)
            .field("has_admin", &self.admin.is_some())
            .finish_non_exhaustive()
    }
}

impl LogPipeline {
    /// Build a pipeline from config.
    ///
    /// `admin` is optional: without it, in-game broadcasts and command
    /// replies are skipped.
    ///
    /// # Errors
    ///
    /// Returns an error if an event pattern fails to compile.
    pub fn new(
        config: &OverseerConfig,
        relay: Arc<ChatRelay>,
        sink: Arc<dyn RewardSink>,
        notifier: Arc<dyn NotificationSink>,
        admin: Option<Arc<GameAdmin>>,
    ) -> anyhow::Result<Self> {
        let rewards = RewardTable::new(config.rewards.clone());
        Ok(Self {
            tailer: Arc::new(std::sync::Mutex::new(LogTailer::new(
                config.logs.dir.clone(),
                config.logs.extensions.clone(),
            ))),
            table: EventTable::from_config(&config.logs.patterns)?,
            chat_cooldown: Cooldowns::new(rewards.chat_cooldown()),
            rewards,
            relay,
            seen: SeenLines::new(config.logs.seen_capacity),
            command_prefix: config.relay.command_prefix.clone(),
            poll_interval: Duration::from_millis(config.logs.poll_interval_ms),
            sink,
            notifier,
            admin,
        })
    }

    /// Read new lines and process each one.
    ///
    /// File reads run on the blocking pool.
    ///
    /// # Errors
    ///
    /// Returns an error if the log directory or file cannot be read.
    pub async fn tick(&mut self) -> anyhow::Result<Vec<GameEvent>> {
        let tailer = Arc::clone(&self.tailer);
        let lines = tokio::task::spawn_blocking(move || {
            let mut tailer = tailer
                .lock()
                .map_err(|_| anyhow::anyhow!("log tailer lock poisoned"))?;
            tailer.poll()
        })
        .await
        .context("log tailer task failed")??;
        let mut processed = Vec::new();
        for line in lines {
            if let Some(event) = self.process_line(&line).await {
                processed.push(event);
            }
        }
        Ok(processed)
    }

    /// Process one complete log line.
    ///
    /// Returns the event when the line matched and was not suppressed
    /// (repeat line, command, or relay echo).
    pub async fn process_line(&mut self, line: &str) -> Option<GameEvent> {
        if !self.seen.insert(line) {
            debug!("skipping previously processed line");
            return None;
        }
        let ExtractedEvent { player, detail } = self.table.extract(line)?;
        debug!(kind = detail.kind().label(), player = %player.id, "event matched");

        let mut notes = Annotations::default();
        let base = match &detail {
            EventDetail::Chat { message } => {
                if is_command(message, &self.command_prefix) {
                    self.dispatch_command(&player, message);
                    return None;
                }
                match self.relay.outbound(&player.name, message) {
                    OutboundDecision::LoopMarker => return None,
                    OutboundDecision::Relay => self.forward_chat(&player, message),
                    OutboundDecision::Duplicate | OutboundDecision::Disabled => {}
                }
                if self.chat_cooldown.try_claim(&player.id, Instant::now()) {
                    self.rewards.base_reward(&detail)
                } else {
                    Reward::default()
                }
            }
            EventDetail::Login => self.login_reward(&player, &mut notes).await,
            EventDetail::OilRigRaid { tag, position } => {
                let resolution = self.rewards.resolve_rig(tag.as_deref(), *position);
                if let Some((by_tag, by_position)) = resolution.mismatch {
                    warn!(
                        player = %player.id,
                        by_tag = by_tag.label(),
                        by_position = by_position.label(),
                        "oil rig tier mismatch, paying lower tier"
                    );
                }
                notes.rig = Some(resolution);
                self.rewards.rig_reward(resolution.tier)
            }
            other => self.rewards.base_reward(other),
        };

        let reward = self.post_reward(&player, &detail, base, &mut notes).await;
        let event = GameEvent {
            player,
            detail,
            reward,
        };
        self.fan_out(&event, &notes);
        Some(event)
    }

    /// Run ticks until shutdown. Failed ticks are logged and retried after
    /// a short backoff.
    pub async fn run(mut self, mut shutdown_rx: watch::Receiver<bool>) {
        info!(interval = ?self.poll_interval, "log pipeline started");
        loop {
            let wait = match self.tick().await {
                Ok(_) => self.poll_interval,
                Err(e) => {
                    warn!(error = %e, "log tick failed");
                    ERROR_BACKOFF
                }
            };
            tokio::select! {
                () = tokio::time::sleep(wait) => {}
                result = shutdown_rx.changed() => {
                    if result.is_err() || *shutdown_rx.borrow() {
                        break;
                    }
                }
            }
        }
        info!("log pipeline stopped");
    }

    async fn login_reward(&self, player: &Player, notes: &mut Annotations) -> Reward {
        let today = Local::now().date_naive();
        let previous = match self.sink.last_login(&player.id).await {
            Ok(previous) => previous,
            Err(e) => {
                warn!(player = %player.id, error = %e, "failed to read last login");
                return Reward::default();
            }
        };
        let update = advance_streak(previous, today);
        if !update.first_today {
            return Reward::default();
        }
        let record = LoginRecord {
            day: today,
            streak: update.streak,
        };
        if let Err(e) = self.sink.store_login(player, record).await {
            warn!(player = %player.id, error = %e, "failed to store login");
        }
        notes.streak = Some(update.streak);
        notes.streak_bonus = self.rewards.streak_bonus(update.streak);
        self.rewards
            .login_reward()
            .plus(Reward::new(notes.streak_bonus, 0))
    }

    async fn post_reward(
        &self,
        player: &Player,
        detail: &EventDetail,
        base: Reward,
        notes: &mut Annotations,
    ) -> Reward {
        if base.is_zero() {
            return base;
        }
        let rank = match self.sink.player_rank(&player.id).await {
            Ok(rank) => Some(rank),
            Err(e) => {
                warn!(player = %player.id, error = %e, "rank lookup failed, using base rate");
                None
            }
        };
        let multiplier = rank.as_deref().map_or(1.0, |r| self.rewards.multiplier(r));
        let reward = base.with_multiplier(multiplier);

        if reward.currency != 0 {
            let reason = reward_reason(detail);
            if let Err(e) = self
                .sink
                .credit_currency(player, reward.currency, &reason)
                .await
            {
                warn!(player = %player.id, amount = reward.currency, error = %e, "currency credit failed");
            }
        }
        if reward.experience != 0 {
            match self.sink.credit_experience(player, reward.experience).await {
                Ok(outcome) if outcome.leveled_up => {
                    notes.level_up = Some(outcome.new_level);
                    if let Ok(new_rank) = self.sink.player_rank(&player.id).await {
                        if rank
                            .as_deref()
                            .is_some_and(|old| !old.eq_ignore_ascii_case(&new_rank))
                        {
                            notes.rank_up = Some(new_rank);
                        }
                    }
                }
                Ok(_) => {}
                Err(e) => {
                    warn!(player = %player.id, amount = reward.experience, error = %e, "experience credit failed");
                }
            }
        }
        reward
    }

    fn fan_out(&self, event: &GameEvent, notes: &Annotations) {
        let messages = render_messages(event, notes);
        if let Some(text) = messages.notification {
            let notifier = Arc::clone(&self.notifier);
            tokio::spawn(async move {
                if let Err(e) = notifier.notify(&text).await {
                    warn!(error = %e, "event notification failed");
                }
            });
        }
        if let (Some(text), Some(admin)) = (messages.broadcast, &self.admin) {
            let admin = Arc::clone(admin);
            tokio::spawn(async move {
                if let Err(e) = admin.broadcast(&text).await {
                    warn!(error = %e, "event broadcast failed");
                }
            });
        }
    }

    fn forward_chat(&self, player: &Player, message: &str) {
        let notifier = Arc::clone(&self.notifier);
        let author = player.name.clone();
        let text = message.to_owned();
        tokio::spawn(async move {
            if let Err(e) = notifier.relay_chat(&author, &text).await {
                warn!(error = %e, "chat relay failed");
            }
        });
    }

    fn dispatch_command(&self, player: &Player, message: &str) {
        let Some(command) = parse_command(message, &self.command_prefix) else {
            debug!(player = %player.id, "ignoring unknown command");
            return;
        };
        let Some(admin) = self.admin.clone() else {
            debug!(?command, "no admin channel for command reply");
            return;
        };
        let sink = Arc::clone(&self.sink);
        let player = player.clone();
        tokio::spawn(async move {
            if let Err(e) = handle_command(command, &player, &sink, &admin).await {
                warn!(player = %player.id, error = %e, "in-game command failed");
            }
        });
    }
}
