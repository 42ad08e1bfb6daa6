//! Presence configuration types

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Heartbeat and latency probe timing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PresenceConfig {
    /// Interval between periodic heartbeats
    #[serde(with = "humantime_serde", default = "default_heartbeat_interval")]
    pub heartbeat_interval: Duration,
    /// Minimum spacing for an explicit "send now" heartbeat
    #[serde(with = "humantime_serde", default = "default_heartbeat_throttle")]
    pub heartbeat_throttle: Duration,
    /// Interval between latency probes
    #[serde(with = "humantime_serde", default = "default_probe_interval")]
    pub probe_interval: Duration,
    /// Unanswered probes older than this are discarded
    #[serde(with = "humantime_serde", default = "default_probe_timeout")]
    pub probe_timeout: Duration,
    /// Largest round trip accepted as a real measurement, in milliseconds
    #[serde(default = "default_max_latency_ms")]
    pub max_latency_ms: u64,
}

impl Default for PresenceConfig {
    fn default() -> Self {
        PresenceConfig {
            heartbeat_interval: default_heartbeat_interval(),
            heartbeat_throttle: default_heartbeat_throttle(),
            probe_interval: default_probe_interval(),
            probe_timeout: default_probe_timeout(),
            max_latency_ms: default_max_latency_ms(),
        }
    }
}

fn default_heartbeat_interval() -> Duration {
    Duration::from_secs(5)
}

fn default_heartbeat_throttle() -> Duration {
    Duration::from_millis(1500)
}

fn default_probe_interval() -> Duration {
    Duration::from_secs(10)
}

fn default_probe_timeout() -> Duration {
    Duration::from_secs(8)
}

fn default_max_latency_ms() -> u64 {
    60_000
}
