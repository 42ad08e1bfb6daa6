//! Channel switch guard configuration types

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Thrash detection thresholds
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuardConfig {
    /// Sliding window over which switches are inspected
    #[serde(with = "humantime_serde", default = "default_window")]
    pub window: Duration,
    /// Number of recorded switches that constitutes thrash
    #[serde(default = "default_min_switches")]
    pub min_switches: usize,
    /// How long switches are refused after a trip
    #[serde(with = "humantime_serde", default = "default_block_for")]
    pub block_for: Duration,
    /// Minimum spacing between two reload signals
    #[serde(with = "humantime_serde", default = "default_reload_cooldown")]
    pub reload_cooldown: Duration,
    /// Terminal action on a trip
    #[serde(default)]
    pub action: ThrashAction,
}

impl Default for GuardConfig {
    fn default() -> Self {
        GuardConfig {
            window: default_window(),
            min_switches: default_min_switches(),
            block_for: default_block_for(),
            reload_cooldown: default_reload_cooldown(),
            action: ThrashAction::default(),
        }
    }
}

/// What the guard escalates to when thrash is detected
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThrashAction {
    /// Block, and signal a full client reload at most once per cooldown
    #[default]
    Reload,
    /// Only block; for hosts where restarting the whole client is not cheap
    BlockOnly,
}

fn default_window() -> Duration {
    Duration::from_millis(1500)
}

fn default_min_switches() -> usize {
    6
}

fn default_block_for() -> Duration {
    Duration::from_millis(1500)
}

fn default_reload_cooldown() -> Duration {
    Duration::from_secs(10)
}
