//! Remote steps of a channel switch.

use async_trait::async_trait;
use serde_json::json;

use crate::error::Result;
use crate::gateway::api::ApiClient;
use crate::gateway::protocol::{ChannelIdentities, ChannelInfo, ChannelPermissions, EnterChannelReply};

/// API names used by [`GatewayChannelBackend`]
pub mod apis {
    pub const CHANNEL_INFO: &str = "channel.info";
    pub const CHANNEL_ENTER: &str = "channel.enter";
    pub const MEMBER_LIST: &str = "channel.member.list";
    pub const PERMISSION_LIST: &str = "channel.permission.list";
}

/// Server operations the channel session machine depends on
#[async_trait]
pub trait ChannelBackend: Send + Sync {
    /// Fetch a channel the local directory does not know.
    async fn fetch_channel(&self, channel_id: &str) -> Result<ChannelInfo>;

    /// Enter the channel; the reply carries no member when access is gone.
    async fn enter(&self, channel_id: &str) -> Result<EnterChannelReply>;

    async fn load_identities(&self, channel_id: &str) -> Result<ChannelIdentities>;

    async fn fetch_permissions(&self, channel_id: &str) -> Result<ChannelPermissions>;
}

/// [`ChannelBackend`] over correlated gateway calls
#[derive(Clone)]
pub struct GatewayChannelBackend {
    api: ApiClient,
}

impl GatewayChannelBackend {
    pub fn new(api: ApiClient) -> Self {
        Self { api }
    }
}

#[async_trait]
impl ChannelBackend for GatewayChannelBackend {
    async fn fetch_channel(&self, channel_id: &str) -> Result<ChannelInfo> {
        self.api
            .send_api_as(apis::CHANNEL_INFO, json!({ "channel_id": channel_id }))
            .await
    }

    async fn enter(&self, channel_id: &str) -> Result<EnterChannelReply> {
        self.api
            .send_api_as(apis::CHANNEL_ENTER, json!({ "channel_id": channel_id }))
            .await
    }

    async fn load_identities(&self, channel_id: &str) -> Result<ChannelIdentities> {
        self.api
            .send_api_as(apis::MEMBER_LIST, json!({ "channel_id": channel_id }))
            .await
    }

    async fn fetch_permissions(&self, channel_id: &str) -> Result<ChannelPermissions> {
        self.api
            .send_api_as(apis::PERMISSION_LIST, json!({ "channel_id": channel_id }))
            .await
    }
}
