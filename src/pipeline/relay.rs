//! Bidirectional chat relay between the game and the chat platform.
//!
//! Two guards keep messages from bouncing: a marker prefixed to everything
//! sent into the game, and a bounded insertion-ordered set of
//! `(author, content hash)` pairs already relayed in either direction.

use std::collections::{HashSet, VecDeque};
use std::sync::{Mutex, PoisonError};

use sha2::{Digest, Sha256};
use tracing::debug;

use crate::config::RelayConfig;

/// Identity of a relayed message.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DedupeKey {
    author: String,
    content_hash: String,
}

impl DedupeKey {
    /// Key for `content` by `author`. Author case and surrounding
    /// whitespace are ignored.
    pub fn new(author: &str, content: &str) -> Self {
        let digest = Sha256::digest(content.trim().as_bytes());
        Self {
            author: author.trim().to_lowercase(),
            content_hash: hex::encode(digest),
        }
    }
}

/// Bounded set that evicts its oldest entry when full.
#[derive(Debug, Clone)]
pub struct DedupeSet {
    capacity: usize,
    order: VecDeque<DedupeKey>,
    members: HashSet<DedupeKey>,
}

impl DedupeSet {
    /// Empty set holding at most `capacity` entries (minimum 1).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            order: VecDeque::with_capacity(capacity),
            members: HashSet::with_capacity(capacity),
        }
    }

    /// Whether `key` is present.
    pub fn contains(&self, key: &DedupeKey) -> bool {
        self.members.contains(key)
    }

    /// Insert `key`. Returns false if it was already present.
    pub fn insert(&mut self, key: DedupeKey) -> bool {
        if self.members.contains(&key) {
            return false;
        }
        while self.order.len() >= self.capacity {
            match self.order.pop_front() {
                Some(oldest) => {
                    self.members.remove(&oldest);
                }
                None => break,
            }
        }
        self.members.insert(key.clone());
        self.order.push_back(key);
        true
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.order.len()
    }

    /// Whether the set is empty.
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

/// Decision for a chat line seen in the game log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutboundDecision {
    /// Send it to the chat platform.
    Relay,
    /// It carries the relay marker, so it came from the chat platform.
    LoopMarker,
    /// The same author already sent the same text.
    Duplicate,
    /// Relaying is turned off.
    Disabled,
}

/// Shared relay state used by the log pipeline and the chat listener.
#[derive(Debug)]
pub struct ChatRelay {
    enabled: bool,
    marker: String,
    command_prefix: String,
    seen: Mutex<DedupeSet>,
}

impl ChatRelay {
    /// Build a relay from config.
    pub fn new(config: &RelayConfig) -> Self {
        Self {
            enabled: config.enabled,
            marker: config.marker.clone(),
            command_prefix: config.command_prefix.clone(),
            seen: Mutex::new(DedupeSet::new(config.capacity)),
        }
    }

    /// Marker prefixed to inbound messages.
    pub fn marker(&self) -> &str {
        &self.marker
    }

    /// Decide whether a game chat line goes to the chat platform, and
    /// remember it if so.
    pub fn outbound(&self, author: &str, message: &str) -> OutboundDecision {
        if !self.enabled {
            return OutboundDecision::Disabled;
        }
        if !self.marker.is_empty() && message.contains(&self.marker) {
            debug!(author, "chat line carries relay marker, not echoing");
            return OutboundDecision::LoopMarker;
        }
        let key = DedupeKey::new(author, message);
        let mut seen = self.seen.lock().unwrap_or_else(PoisonError::into_inner);
        if seen.insert(key) {
            OutboundDecision::Relay
        } else {
            debug!(author, "chat line already relayed");
            OutboundDecision::Duplicate
        }
    }

    /// Accept a chat-platform message for the game.
    ///
    /// Returns the marker-tagged text to broadcast, or `None` for commands,
    /// empty text, or when relaying is off. Accepted messages are remembered
    /// so the copy that shows up in the game log is not sent back.
    pub fn inbound(&self, author: &str, text: &str) -> Option<String> {
        let text = text.trim();
        if !self.enabled || text.is_empty() {
            return None;
        }
        if !self.command_prefix.is_empty() && text.starts_with(&self.command_prefix) {
            return None;
        }
        let tagged = if self.marker.is_empty() {
            format!("{author}: {text}")
        } else {
            format!("{} {author}: {text}", self.marker)
        };

        let mut seen = self.seen.lock().unwrap_or_else(PoisonError::into_inner);
        seen.insert(DedupeKey::new(author, text));
        seen.insert(DedupeKey::new(author, &tagged));
        Some(tagged)
    }

    /// Entries currently remembered.
    pub fn remembered(&self) -> usize {
        self.seen.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}
