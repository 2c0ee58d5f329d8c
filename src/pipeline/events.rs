//! Ordered regex table that turns log lines into game events.
//!
//! Matchers are tried in a fixed priority order and the first hit wins.
//! Each matcher pairs a compiled pattern with a pure extraction function, so
//! a new category is one more row in the table.

use anyhow::Context;
use regex::{Captures, Regex};

use crate::config::PatternsConfig;
use crate::sinks::Player;

use super::rewards::Reward;

/// Zero or more bracketed prefixes such as `[2026-03-01 12:00:00]`.
const PREFIX: &str = r"^(?:\[[^\]]*\]\s*)*";

/// Player name then platform id in parentheses.
const WHO: &str = r"(?P<name>[^()\[\]:]+?) \((?P<id>[^()\s]+)\)";

/// Event category, in matching priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// Player joined.
    Login,
    /// Player left.
    Logout,
    /// Structure placed.
    Building,
    /// Item crafted.
    Crafting,
    /// Technology unlocked.
    TechUnlock,
    /// Chat message.
    Chat,
    /// Damage dealt.
    Combat,
    /// Kill.
    Kill,
    /// Chest looted.
    ChestLoot,
    /// Oil rig raid completed.
    OilRigRaid,
}

impl EventKind {
    /// All kinds in priority order.
    pub const ALL: [Self; 10] = [
        Self::Login,
        Self::Logout,
        Self::Building,
        Self::Crafting,
        Self::TechUnlock,
        Self::Chat,
        Self::Combat,
        Self::Kill,
        Self::ChestLoot,
        Self::OilRigRaid,
    ];

    /// Short lower-case label used in logs and ledger reasons.
    pub fn label(self) -> &'static str {
        match self {
            Self::Login => "login",
            Self::Logout => "logout",
            Self::Building => "building",
            Self::Crafting => "crafting",
            Self::TechUnlock => "tech",
            Self::Chat => "chat",
            Self::Combat => "combat",
            Self::Kill => "kill",
            Self::ChestLoot => "chest",
            Self::OilRigRaid => "raid",
        }
    }

    fn default_pattern(self) -> String {
        match self {
            Self::Login => format!(r"{PREFIX}Player {WHO} has joined the game\s*$"),
            Self::Logout => format!(r"{PREFIX}Player {WHO} has left the game\s*$"),
            Self::Building => format!(
                r"{PREFIX}{WHO} built (?P<item>[^\[\]]+?)(?: \[(?P<material>[^\]]+)\])?\s*$"
            ),
            Self::Crafting => {
                format!(r"{PREFIX}{WHO} crafted (?P<count>\d+)x (?P<item>\S.*?)\s*$")
            }
            Self::TechUnlock => format!(r"{PREFIX}{WHO} unlocked technology (?P<tech>.+?)\s*$"),
            Self::Chat => format!(r"{PREFIX}\[CHAT\] {WHO}: (?P<message>.*?)\s*$"),
            Self::Combat => format!(
                r"{PREFIX}{WHO} dealt (?P<damage>\d+(?:\.\d+)?) damage to (?P<target>.+?)(?: with (?P<weapon>.+?))?\s*$"
            ),
            Self::Kill => format!(
                r"{PREFIX}{WHO} killed (?P<victim>[^()\[\]:]+?)(?: \((?P<victim_id>[^()\s]+)\))?(?: with (?P<weapon>.+?))?\s*$"
            ),
            Self::ChestLoot => format!(r"{PREFIX}{WHO} looted (?P<chest>.+?) chest\s*$"),
            Self::OilRigRaid => format!(
                r"{PREFIX}{WHO} completed oil rig(?: \[(?P<tag>[^\]]+)\])?(?: at \((?P<x>-?\d+(?:\.\d+)?), (?P<y>-?\d+(?:\.\d+)?), (?P<z>-?\d+(?:\.\d+)?)\))?\s*$"
            ),
        }
    }

    fn override_pattern(self, patterns: &PatternsConfig) -> Option<&str> {
        let value = match self {
            Self::Login => &patterns.login,
            Self::Logout => &patterns.logout,
            Self::Building => &patterns.building,
            Self::Crafting => &patterns.crafting,
            Self::TechUnlock => &patterns.tech,
            Self::Chat => &patterns.chat,
            Self::Combat => &patterns.combat,
            Self::Kill => &patterns.kill,
            Self::ChestLoot => &patterns.chest,
            Self::OilRigRaid => &patterns.raid,
        };
        value.as_deref()
    }
}

/// Category-specific event payload.
#[derive(Debug, Clone, PartialEq)]
pub enum EventDetail {
    /// Player joined.
    Login,
    /// Player left.
    Logout,
    /// Structure placed.
    Building {
        /// Structure name.
        item: String,
        /// Material, when logged.
        material: Option<String>,
    },
    /// Item crafted.
    Crafting {
        /// Item name.
        item: String,
        /// Units crafted (at least 1).
        count: u32,
    },
    /// Technology unlocked.
    TechUnlock {
        /// Technology name.
        tech: String,
    },
    /// Chat message.
    Chat {
        /// Message text.
        message: String,
    },
    /// Damage dealt.
    Combat {
        /// What was hit.
        target: String,
        /// Damage as logged.
        damage: String,
        /// Weapon, when logged.
        weapon: Option<String>,
    },
    /// Kill.
    Kill {
        /// Victim name.
        victim: String,
        /// Victim id when the victim is a player.
        victim_id: Option<String>,
        /// Weapon, when logged.
        weapon: Option<String>,
    },
    /// Chest looted.
    ChestLoot {
        /// Chest type.
        chest: String,
    },
    /// Oil rig raid completed.
    OilRigRaid {
        /// Free-form tier tag from the log.
        tag: Option<String>,
        /// Position `(x, y, z)` when logged.
        position: Option<(f64, f64, f64)>,
    },
}

impl EventDetail {
    /// Category of this payload.
    pub fn kind(&self) -> EventKind {
        match self {
            Self::Login => EventKind::Login,
            Self::Logout => EventKind::Logout,
            Self::Building { .. } => EventKind::Building,
            Self::Crafting { .. } => EventKind::Crafting,
            Self::TechUnlock { .. } => EventKind::TechUnlock,
            Self::Chat { .. } => EventKind::Chat,
            Self::Combat { .. } => EventKind::Combat,
            Self::Kill { .. } => EventKind::Kill,
            Self::ChestLoot { .. } => EventKind::ChestLoot,
            Self::OilRigRaid { .. } => EventKind::OilRigRaid,
        }
    }
}

/// A line that matched a pattern, before rewards are computed.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractedEvent {
    /// Acting player.
    pub player: Player,
    /// Payload.
    pub detail: EventDetail,
}

/// A processed event with its computed reward.
#[derive(Debug, Clone, PartialEq)]
pub struct GameEvent {
    /// Acting player.
    pub player: Player,
    /// Payload.
    pub detail: EventDetail,
    /// Reward after the rank multiplier.
    pub reward: Reward,
}

struct Matcher {
    kind: EventKind,
    regex: Regex,
}

/// Ordered pattern table.
pub struct EventTable {
    matchers: Vec<Matcher>,
}

impl std::fmt::Debug for EventTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.matchers.iter().map(|m| m.kind))
            .finish()
    }
}

impl EventTable {
    /// Built-in patterns only.
    ///
    /// # Errors
    ///
    /// Returns an error if a pattern fails to compile.
    pub fn with_defaults() -> anyhow::Result<Self> {
        Self::from_config(&PatternsConfig::default())
    }

    /// Built-in patterns with per-category overrides.
    ///
    /// # Errors
    ///
    /// Returns an error naming the category whose pattern fails to compile.
    pub fn from_config(patterns: &PatternsConfig) -> anyhow::Result<Self> {
        let matchers = EventKind::ALL
            .iter()
            .map(|&kind| {
                let source = kind
                    .override_pattern(patterns)
                    .map_or_else(|| kind.default_pattern(), ToOwned::to_owned);
                let regex = Regex::new(&source)
                    .with_context(|| format!("invalid {} pattern", kind.label()))?;
                Ok(Matcher { kind, regex })
            })
            .collect::<anyhow::Result<Vec<_>>>()?;
        Ok(Self { matchers })
    }

    /// First matching event for `line`, if any.
    pub fn extract(&self, line: &str) -> Option<ExtractedEvent> {
        self.matchers.iter().find_map(|matcher| {
            let caps = matcher.regex.captures(line)?;
            let player = Player::new(group(&caps, "id")?, group(&caps, "name")?);
            let detail = extract_detail(matcher.kind, &caps)?;
            Some(ExtractedEvent { player, detail })
        })
    }
}

fn group(caps: &Captures<'_>, name: &str) -> Option<String> {
    caps.name(name)
        .map(|m| m.as_str().trim())
        .filter(|s| !s.is_empty())
        .map(ToOwned::to_owned)
}

fn number(caps: &Captures<'_>, name: &str) -> Option<f64> {
    caps.name(name).and_then(|m| m.as_str().parse().ok())
}

fn extract_detail(kind: EventKind, caps: &Captures<'_>) -> Option<EventDetail> {
    let detail = match kind {
        EventKind::Login => EventDetail::Login,
        EventKind::Logout => EventDetail::Logout,
        EventKind::Building => EventDetail::Building {
            item: group(caps, "item")?,
            material: group(caps, "material"),
        },
        EventKind::Crafting => EventDetail::Crafting {
            item: group(caps, "item")?,
            count: group(caps, "count")
                .and_then(|c| c.parse::<u32>().ok())
                .unwrap_or(1)
                .max(1),
        },
        EventKind::TechUnlock => EventDetail::TechUnlock {
            tech: group(caps, "tech")?,
        },
        EventKind::Chat => EventDetail::Chat {
            message: group(caps, "message")?,
        },
        EventKind::Combat => EventDetail::Combat {
            target: group(caps, "target")?,
            damage: group(caps, "damage").unwrap_or_else(|| "0".to_owned()),
            weapon: group(caps, "weapon"),
        },
        EventKind::Kill => EventDetail::Kill {
            victim: group(caps, "victim")?,
            victim_id: group(caps, "victim_id"),
            weapon: group(caps, "weapon"),
        },
        EventKind::ChestLoot => EventDetail::ChestLoot {
            chest: group(caps, "chest")?,
        },
        EventKind::OilRigRaid => {
            let position = match (number(caps, "x"), number(caps, "y"), number(caps, "z")) {
                (Some(x), Some(y), Some(z)) => Some((x, y, z)),
                _ => None,
            };
            EventDetail::OilRigRaid {
                tag: group(caps, "tag"),
                position,
            }
        }
    };
    Some(detail)
}
