//! Channel registry: the joined-channel set, in join order.
//!
//! A channel absent from the registry is not joined. The registry also
//! remembers the *active* channel that `Write` records are addressed to.

use std::time::SystemTime;

use tracing::debug;

/// Every channel name starts with this sigil.
pub const CHANNEL_SIGIL: char = '#';

/// Longest accepted channel name in bytes (RFC 2812).
pub const MAX_CHANNEL_LEN: usize = 50;

/// Whether `name` is acceptable as a channel to join.
///
/// Besides the sigil and length, rejects characters that would split or
/// corrupt the JOIN line: whitespace, commas, BEL and other controls.
pub fn is_valid_channel_name(name: &str) -> bool {
    name.starts_with(CHANNEL_SIGIL)
        && name.len() > CHANNEL_SIGIL.len_utf8()
        && name.len() <= MAX_CHANNEL_LEN
        && !name
            .chars()
            .any(|c| c.is_whitespace() || c.is_control() || c == ',')
}

/// One joined channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Channel {
    pub name: String,
    /// Monotonic join sequence number within this registry.
    pub order: u64,
    pub joined_at: SystemTime,
}

/// Result of [`ChannelRegistry::add`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddOutcome {
    Added,
    AlreadyPresent,
}

/// Result of [`ChannelRegistry::remove`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoveOutcome {
    Removed,
    NotFound,
}

/// Ordered set of joined channels with unique names.
#[derive(Debug, Default)]
pub struct ChannelRegistry {
    channels: Vec<Channel>,
    active: Option<String>,
    next_order: u64,
}

impl ChannelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `name` if absent. Re-adding is a no-op.
    pub fn add(&mut self, name: &str) -> AddOutcome {
        if self.contains(name) {
            return AddOutcome::AlreadyPresent;
        }
        self.channels.push(Channel {
            name: name.to_string(),
            order: self.next_order,
            joined_at: SystemTime::now(),
        });
        self.next_order += 1;
        debug!(channel = name, count = self.channels.len(), "channel added");
        AddOutcome::Added
    }

    /// Remove `name`. If it was active, the most recently joined remaining
    /// channel becomes active.
    pub fn remove(&mut self, name: &str) -> RemoveOutcome {
        let Some(idx) = self.channels.iter().position(|c| c.name == name) else {
            return RemoveOutcome::NotFound;
        };
        self.channels.remove(idx);
        if self.active.as_deref() == Some(name) {
            self.active = self.channels.last().map(|c| c.name.clone());
        }
        debug!(channel = name, count = self.channels.len(), "channel removed");
        RemoveOutcome::Removed
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn get(&self, name: &str) -> Option<&Channel> {
        self.channels.iter().find(|c| c.name == name)
    }

    /// All channels in join order.
    pub fn all(&self) -> &[Channel] {
        &self.channels
    }

    /// Channel names in join order.
    pub fn names(&self) -> Vec<String> {
        self.channels.iter().map(|c| c.name.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    /// Make a joined channel the target of `Write`. Returns false if `name`
    /// is not in the registry.
    pub fn select(&mut self, name: &str) -> bool {
        if !self.contains(name) {
            return false;
        }
        self.active = Some(name.to_string());
        true
    }

    pub fn active(&self) -> Option<&str> {
        self.active.as_deref()
    }

    /// Forget every channel, as when the server session ends.
    pub fn clear(&mut self) {
        if !self.channels.is_empty() {
            debug!(count = self.channels.len(), "clearing channel registry");
        }
        self.channels.clear();
        self.active = None;
    }
}
