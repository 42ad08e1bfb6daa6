//! Permission cache warmed on every channel switch
//!
//! Same moka async cache as elsewhere: Send + Sync with TTL-based eviction.

use moka::future::Cache;
use std::time::Duration;

use crate::gateway::protocol::ChannelPermissions;

/// Per-channel permission sets
#[derive(Clone)]
pub struct PermissionCache {
    entries: Cache<String, ChannelPermissions>,
}

impl PermissionCache {
    /// Create a cache with default settings
    pub fn new() -> Self {
        Self::with_ttl(Duration::from_secs(5 * 60))
    }

    pub fn with_ttl(ttl: Duration) -> Self {
        PermissionCache {
            entries: Cache::builder().max_capacity(256).time_to_live(ttl).build(),
        }
    }

    pub async fn get(&self, channel_id: &str) -> Option<ChannelPermissions> {
        self.entries.get(channel_id).await
    }

    pub async fn put(&self, channel_id: &str, permissions: ChannelPermissions) {
        self.entries.insert(channel_id.to_string(), permissions).await;
    }

    pub async fn invalidate(&self, channel_id: &str) {
        self.entries.invalidate(channel_id).await;
    }

    /// Drop every entry, e.g. after the account changed
    pub fn invalidate_all(&self) {
        self.entries.invalidate_all();
    }
}

impl Default for PermissionCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_permission_cache() {
        let cache = PermissionCache::new();
        assert!(cache.get("c-1").await.is_none());

        cache
            .put(
                "c-1",
                ChannelPermissions {
                    permissions: vec!["message.send".to_string()],
                },
            )
            .await;

        let cached = cache.get("c-1").await;
        assert!(cached.is_some_and(|p| p.allows("message.send")));

        cache.invalidate("c-1").await;
        assert!(cache.get("c-1").await.is_none());
    }
}
