//! Connection configuration types
//!
//! Where the gateway lives, who we are, and how long to wait between retries.

use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Connection configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Gateway WebSocket URL
    #[serde(default = "default_url")]
    pub url: String,
    /// Credentials token sent in the identify frame
    #[serde(skip_serializing, default = "default_secret")]
    pub token: SecretString,
    /// Read-only session bound to one world/channel pair
    #[serde(default)]
    pub observer: bool,
    /// Fixed delay before a reconnect attempt
    #[serde(with = "humantime_serde", default = "default_reconnect_delay")]
    pub reconnect_delay: Duration,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        ConnectionConfig {
            url: default_url(),
            token: default_secret(),
            observer: false,
            reconnect_delay: default_reconnect_delay(),
        }
    }
}

impl ConnectionConfig {
    /// Reconnect delay rounded down to whole seconds, as shown in the countdown
    pub fn reconnect_delay_secs(&self) -> u64 {
        self.reconnect_delay.as_secs()
    }
}

fn default_url() -> String {
    "ws://127.0.0.1:3212/ws/seal".to_string()
}

fn default_secret() -> SecretString {
    SecretString::from(String::new())
}

fn default_reconnect_delay() -> Duration {
    Duration::from_secs(5)
}
