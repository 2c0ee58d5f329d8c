//! Reward computation: table lookups, login streaks, rank multipliers, and
//! oil rig tier resolution.

use std::collections::HashMap;
use std::time::Duration;

use chrono::NaiveDate;
use tokio::time::Instant;

use crate::config::{RewardRule, RewardValue, RewardsConfig, RigPosition};
use crate::sinks::LoginRecord;

use super::events::EventDetail;

/// Currency and experience granted for one event.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Reward {
    /// Currency amount.
    pub currency: i64,
    /// Experience amount.
    pub experience: i64,
}

impl Reward {
    /// Build a reward.
    pub const fn new(currency: i64, experience: i64) -> Self {
        Self {
            currency,
            experience,
        }
    }

    /// Whether nothing is granted.
    pub fn is_zero(self) -> bool {
        self.currency == 0 && self.experience == 0
    }

    /// Scale both parts by `count`.
    pub fn times(self, count: u32) -> Self {
        Self {
            currency: self.currency.saturating_mul(i64::from(count)),
            experience: self.experience.saturating_mul(i64::from(count)),
        }
    }

    /// Scale currency by a rank multiplier, rounding to the nearest integer.
    /// Experience is unchanged.
    #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation)]
    pub fn with_multiplier(self, multiplier: f64) -> Self {
        if !multiplier.is_finite() || multiplier <= 0.0 {
            return self;
        }
        Self {
            currency: (self.currency as f64 * multiplier).round() as i64,
            experience: self.experience,
        }
    }

    /// Add another reward.
    pub fn plus(self, other: Self) -> Self {
        Self {
            currency: self.currency.saturating_add(other.currency),
            experience: self.experience.saturating_add(other.experience),
        }
    }
}

impl From<RewardValue> for Reward {
    fn from(value: RewardValue) -> Self {
        Self::new(value.currency, value.experience)
    }
}

/// Oil rig tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum RigTier {
    /// Small rig.
    Small,
    /// Large rig.
    Large,
}

impl RigTier {
    fn parse(value: &str) -> Option<Self> {
        let value = value.to_lowercase();
        if value.contains("large") || value.contains("big") {
            Some(Self::Large)
        } else if value.contains("small") {
            Some(Self::Small)
        } else {
            None
        }
    }

    /// Lower-case name.
    pub fn label(self) -> &'static str {
        match self {
            Self::Small => "small",
            Self::Large => "large",
        }
    }
}

/// Outcome of combining the tag and position classifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RigResolution {
    /// Tier paid, `None` when neither classifier decided.
    pub tier: Option<RigTier>,
    /// `(from tag, from position)` when the classifiers disagree.
    pub mismatch: Option<(RigTier, RigTier)>,
}

/// Tier from the free-form log tag.
pub fn classify_rig_tag(tag: Option<&str>) -> Option<RigTier> {
    tag.and_then(RigTier::parse)
}

/// Tier from the nearest configured rig centre within its radius.
pub fn classify_rig_position(
    position: Option<(f64, f64, f64)>,
    rigs: &[RigPosition],
) -> Option<RigTier> {
    let (x, _, z) = position?;
    rigs.iter()
        .filter_map(|rig| {
            let distance = (x - rig.x).hypot(z - rig.z);
            (distance <= rig.radius).then_some((distance, rig))
        })
        .min_by(|a, b| a.0.total_cmp(&b.0))
        .and_then(|(_, rig)| RigTier::parse(&rig.tier))
}

/// Combine both classifiers. On disagreement the lower tier is paid.
pub fn resolve_rig_tier(by_tag: Option<RigTier>, by_position: Option<RigTier>) -> RigResolution {
    match (by_tag, by_position) {
        (Some(tag), Some(pos)) if tag != pos => RigResolution {
            tier: Some(tag.min(pos)),
            mismatch: Some((tag, pos)),
        },
        (Some(tier), _) | (None, Some(tier)) => RigResolution {
            tier: Some(tier),
            mismatch: None,
        },
        (None, None) => RigResolution {
            tier: None,
            mismatch: None,
        },
    }
}

/// Streak state after a login.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreakUpdate {
    /// Whether this is the first login of `today`.
    pub first_today: bool,
    /// Streak after the login.
    pub streak: u32,
}

/// Advance a login streak.
///
/// A login on the day after the previous one extends the streak; any larger
/// gap resets it to 1. A second login on the same day changes nothing.
pub fn advance_streak(previous: Option<LoginRecord>, today: NaiveDate) -> StreakUpdate {
    let Some(previous) = previous else {
        return StreakUpdate {
            first_today: true,
            streak: 1,
        };
    };
    let gap = today.signed_duration_since(previous.day).num_days();
    match gap {
        i64::MIN..=0 => StreakUpdate {
            first_today: false,
            streak: previous.streak.max(1),
        },
        1 => StreakUpdate {
            first_today: true,
            streak: previous.streak.saturating_add(1),
        },
        _ => StreakUpdate {
            first_today: true,
            streak: 1,
        },
    }
}

/// Reward tables built from config.
#[derive(Debug, Clone)]
pub struct RewardTable {
    config: RewardsConfig,
}

impl RewardTable {
    /// Wrap a rewards config.
    pub fn new(config: RewardsConfig) -> Self {
        Self { config }
    }

    /// Underlying config.
    pub fn config(&self) -> &RewardsConfig {
        &self.config
    }

    /// Base reward for an event before streaks, cooldowns and multipliers.
    ///
    /// Login and logout yield nothing here; oil rigs need
    /// [`RewardTable::rig_reward`].
    pub fn base_reward(&self, detail: &EventDetail) -> Reward {
        match detail {
            EventDetail::Login | EventDetail::Logout | EventDetail::Combat { .. } => {
                Reward::default()
            }
            EventDetail::Building { item, material } => {
                let by_material = material
                    .as_deref()
                    .and_then(|m| lookup(&self.config.building, m));
                by_material
                    .or_else(|| lookup(&self.config.building, item))
                    .unwrap_or_else(|| self.config.building_default.into())
            }
            EventDetail::Crafting { item, count } => lookup(&self.config.crafting, item)
                .unwrap_or_else(|| self.config.crafting_default.into())
                .times((*count).max(1)),
            EventDetail::TechUnlock { .. } => self.config.tech.into(),
            EventDetail::Chat { .. } => self.config.chat.into(),
            EventDetail::Kill { .. } => self.config.kill.into(),
            EventDetail::ChestLoot { chest } => lookup(&self.config.chest, chest)
                .unwrap_or_else(|| self.config.chest_default.into()),
            EventDetail::OilRigRaid { tag, position } => {
                self.rig_reward(self.resolve_rig(tag.as_deref(), *position).tier)
            }
        }
    }

    /// Run both rig classifiers against this table's rig positions.
    pub fn resolve_rig(&self, tag: Option<&str>, position: Option<(f64, f64, f64)>) -> RigResolution {
        resolve_rig_tier(
            classify_rig_tag(tag),
            classify_rig_position(position, &self.config.rig_positions),
        )
    }

    /// Reward for a rig tier, `None` meaning unknown.
    pub fn rig_reward(&self, tier: Option<RigTier>) -> Reward {
        match tier {
            Some(RigTier::Small) => self.config.rig_small.into(),
            Some(RigTier::Large) => self.config.rig_large.into(),
            None => self.config.rig_unknown.into(),
        }
    }

    /// First-login-of-the-day reward.
    pub fn login_reward(&self) -> Reward {
        self.config.login.into()
    }

    /// Bonus currency for a streak that lands exactly on a tier.
    pub fn streak_bonus(&self, streak: u32) -> i64 {
        self.config
            .streak_tiers
            .iter()
            .find(|tier| tier.days == streak)
            .map_or(0, |tier| tier.currency)
    }

    /// Currency multiplier for a rank; unknown ranks use 1.0.
    pub fn multiplier(&self, rank: &str) -> f64 {
        self.config
            .rank_multipliers
            .get(&rank.to_lowercase())
            .copied()
            .unwrap_or(1.0)
    }

    /// Minimum time between chat rewards for one player.
    pub fn chat_cooldown(&self) -> Duration {
        Duration::from_secs(self.config.chat_cooldown_secs)
    }
}

fn lookup(rules: &[RewardRule], name: &str) -> Option<Reward> {
    let name = name.to_lowercase();
    rules
        .iter()
        .find(|rule| !rule.key.is_empty() && name.contains(&rule.key.to_lowercase()))
        .map(|rule| Reward::new(rule.currency, rule.experience))
}

/// Per-player cooldown tracker.
#[derive(Debug)]
pub struct Cooldowns {
    period: Duration,
    last: HashMap<String, Instant>,
}

impl Cooldowns {
    const PRUNE_AT: usize = 1024;

    /// Tracker with the given period.
    pub fn new(period: Duration) -> Self {
        Self {
            period,
            last: HashMap::new(),
        }
    }

    /// Claim the slot for `player_id` at `now`. Returns false while the
    /// previous claim is still cooling down.
    pub fn try_claim(&mut self, player_id: &str, now: Instant) -> bool {
        if let Some(last) = self.last.get(player_id) {
            if now.saturating_duration_since(*last) < self.period {
                return false;
            }
        }
        if self.last.len() >= Self::PRUNE_AT {
            let period = self.period;
            self.last
                .retain(|_, at| now.saturating_duration_since(*at) < period);
        }
        self.last.insert(player_id.to_owned(), now);
        true
    }
}
