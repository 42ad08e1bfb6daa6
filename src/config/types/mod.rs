//! Configuration types module
//!
//! One section per gateway concern, all defaulted so an empty file is valid.

pub mod connection;
pub mod guard;
pub mod presence;

use serde::{Deserialize, Serialize};

/// Main client configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GatewayClientConfig {
    /// Socket endpoint and identity
    #[serde(default)]
    pub connection: connection::ConnectionConfig,

    /// Heartbeat and latency probing
    #[serde(default)]
    pub presence: presence::PresenceConfig,

    /// Channel switch anti-thrash guard
    #[serde(default)]
    pub guard: guard::GuardConfig,

    /// Logging output
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl GatewayClientConfig {
    /// Load configuration from the default file location plus environment
    /// overrides.
    pub fn from_env() -> crate::error::Result<Self> {
        crate::config::load_config()
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter directive when `RUST_LOG` is unset
    #[serde(default = "default_level")]
    pub level: String,
    /// Emit JSON lines instead of human-readable output
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            level: default_level(),
            json: false,
        }
    }
}

fn default_level() -> String {
    "chatgate=info".to_string()
}
