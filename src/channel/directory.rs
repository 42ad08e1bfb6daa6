//! Local directory of known channels and their unread counters.

use std::collections::HashMap;
use std::sync::RwLock;

use crate::gateway::protocol::ChannelInfo;

#[derive(Default)]
struct Entries {
    channels: HashMap<String, ChannelInfo>,
    unread: HashMap<String, u32>,
}

/// Channels the client already knows about
#[derive(Default)]
pub struct ChannelDirectory {
    entries: RwLock<Entries>,
}

impl ChannelDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the directory, e.g. from a channel list fetched at login.
    pub fn with_channels(channels: impl IntoIterator<Item = ChannelInfo>) -> Self {
        let directory = Self::new();
        for channel in channels {
            directory.insert(channel);
        }
        directory
    }

    pub fn get(&self, channel_id: &str) -> Option<ChannelInfo> {
        self.read().channels.get(channel_id).cloned()
    }

    pub fn insert(&self, channel: ChannelInfo) {
        self.write().channels.insert(channel.id.clone(), channel);
    }

    pub fn contains(&self, channel_id: &str) -> bool {
        self.read().channels.contains_key(channel_id)
    }

    pub fn len(&self) -> usize {
        self.read().channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn unread(&self, channel_id: &str) -> u32 {
        self.read().unread.get(channel_id).copied().unwrap_or(0)
    }

    /// Overwrite the unread count, as reported by a badge push.
    pub fn set_unread(&self, channel_id: &str, count: u32) {
        self.write().unread.insert(channel_id.to_string(), count);
    }

    pub fn reset_unread(&self, channel_id: &str) {
        self.write().unread.remove(channel_id);
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Entries> {
        self.entries.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, Entries> {
        self.entries.write().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn channel(id: &str) -> ChannelInfo {
        ChannelInfo {
            id: id.to_string(),
            name: format!("#{}", id),
            world_id: None,
            archived: false,
        }
    }

    #[test]
    fn lookup_and_unread() {
        let directory = ChannelDirectory::with_channels([channel("a"), channel("b")]);
        assert_eq!(directory.len(), 2);
        assert_eq!(directory.get("a").map(|c| c.name), Some("#a".to_string()));
        assert!(directory.get("z").is_none());

        directory.set_unread("a", 4);
        assert_eq!(directory.unread("a"), 4);
        directory.reset_unread("a");
        assert_eq!(directory.unread("a"), 0);
    }
}
