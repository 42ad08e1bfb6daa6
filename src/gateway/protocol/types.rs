//! Gateway protocol types
//!
//! Control frame bodies, pushed event payloads, and the records exchanged by
//! the channel API calls.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

// ============================================================================
// Control bodies
// ============================================================================

/// Identify frame body, sent right after the socket opens
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentifyBody {
    /// Credentials token
    pub token: String,
    /// Read-only observer session
    pub observer: bool,
}

/// Heartbeat frame body
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeartbeatBody {
    /// Credentials token
    pub token: String,
    /// Whether the local client has focus
    pub focused: bool,
    /// Wall clock at send, milliseconds since the Unix epoch
    pub client_sent_at: i64,
    /// Last accepted round trip in milliseconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latency: Option<u64>,
}

/// Latency probe body; the server echoes it back unchanged in the ack
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LatencyProbeBody {
    /// Probe id
    pub id: String,
    /// Wall clock at send, milliseconds since the Unix epoch
    pub client_sent_at: i64,
}

/// Ready frame body
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadyBody {
    /// Authenticated user, absent for observer sessions
    #[serde(default)]
    pub user_id: Option<String>,
    /// Server-assigned connection id
    #[serde(default)]
    pub connection_id: Option<String>,
}

// ============================================================================
// Pushed events
// ============================================================================

/// Pushed event names
pub mod events {
    /// New or edited message
    pub const MESSAGE: &str = "message";
    /// Member presence change
    pub const PRESENCE: &str = "presence";
    /// Unread badge update
    pub const BADGE: &str = "badge";
    /// Reaction added or removed
    pub const REACTION: &str = "reaction";
}

/// Message event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessagePush {
    /// Channel the message belongs to
    pub channel_id: String,
    /// Message id
    pub message_id: String,
    /// Author
    #[serde(default)]
    pub sender_id: Option<String>,
    /// Message text
    #[serde(default)]
    pub content: String,
    /// Creation time, milliseconds since the Unix epoch
    #[serde(default)]
    pub created_at: Option<i64>,
}

/// Presence event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PresencePush {
    /// User whose presence changed
    pub user_id: String,
    /// Whether the user has an open session
    #[serde(default)]
    pub online: bool,
    /// Whether their client is focused
    #[serde(default)]
    pub focused: bool,
    /// Reported latency, if any
    #[serde(default)]
    pub latency: Option<u64>,
}

/// Unread badge event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BadgePush {
    /// Channel the count applies to
    pub channel_id: String,
    /// Unread messages in that channel
    pub unread: u32,
}

/// Reaction event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReactionPush {
    /// Channel of the reacted message
    pub channel_id: String,
    /// Reacted message
    pub message_id: String,
    /// Reacting user
    pub user_id: String,
    /// Emoji or reaction key
    pub emoji: String,
    /// `true` when added, `false` when removed
    #[serde(default = "default_true")]
    pub added: bool,
}

fn default_true() -> bool {
    true
}

// ============================================================================
// Channel API records
// ============================================================================

/// Channel descriptor, from the local directory or `channel.info`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelInfo {
    /// Channel id
    pub id: String,
    /// Display name
    #[serde(default)]
    pub name: String,
    /// World the channel belongs to
    #[serde(default)]
    pub world_id: Option<String>,
    /// Archived channels are fetched on demand rather than listed
    #[serde(default)]
    pub archived: bool,
}

/// Caller's membership in a channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemberRecord {
    /// Member id
    pub id: String,
    /// User id
    #[serde(default)]
    pub user_id: Option<String>,
    /// Per-channel nickname
    #[serde(default)]
    pub nickname: Option<String>,
    /// Remaining fields are kept verbatim
    #[serde(flatten)]
    pub extra: HashMap<String, Value>,
}

/// Reply to `channel.enter`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EnterChannelReply {
    /// Absent when access was revoked
    #[serde(default)]
    pub member: Option<MemberRecord>,
    /// First unread message id, if any
    #[serde(default)]
    pub first_unread_message_id: Option<String>,
}

/// Identity/role entry for one member of a channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdentityRecord {
    /// User id
    pub user_id: String,
    /// Display name in this channel
    #[serde(default)]
    pub display_name: Option<String>,
    /// Role keys held in this channel
    #[serde(default)]
    pub roles: Vec<String>,
}

/// Reply to `channel.member.list`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChannelIdentities {
    /// Members with their roles
    #[serde(default)]
    pub items: Vec<IdentityRecord>,
}

/// Reply to `channel.permission.list`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChannelPermissions {
    /// Permission keys granted to the caller
    #[serde(default)]
    pub permissions: Vec<String>,
}

impl ChannelPermissions {
    /// Whether the caller holds `key`
    pub fn allows(&self, key: &str) -> bool {
        self.permissions.iter().any(|p| p == key)
    }
}
