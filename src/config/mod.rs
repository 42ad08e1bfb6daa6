//! Configuration module
//!
//! - types/mod.rs: root `GatewayClientConfig` and logging section
//! - types/connection.rs: endpoint, identity and reconnect delay
//! - types/presence.rs: heartbeat and latency probe timing
//! - types/guard.rs: channel switch guard thresholds
//! - io.rs: loading, saving and environment overrides
//! - validation.rs: configuration validation
//! - paths.rs: configuration file paths

mod io;
mod paths;
mod types;
mod validation;

pub use types::{GatewayClientConfig, LoggingConfig};
pub use types::connection::ConnectionConfig;
pub use types::guard::{GuardConfig, ThrashAction};
pub use types::presence::PresenceConfig;

pub use io::{apply_env_overrides, load_config, load_config_from_path, save_config};
pub use paths::{config_dir, config_path};
pub use validation::{validate_config, ConfigValidationResult, ValidationIssue};
