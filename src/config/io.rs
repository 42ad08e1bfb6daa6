//! Configuration I/O - Loading and saving configuration
//!
//! Handles reading configuration from files and environment variables.

use std::path::Path;
use std::time::Duration;

use secrecy::SecretString;

use super::types::GatewayClientConfig;
use crate::error::{Error, Result};

/// Load configuration with layered precedence:
/// 1. Config file (config.json / config.toml) if it exists, otherwise defaults
/// 2. Environment variable overrides (includes .env)
pub fn load_config() -> Result<GatewayClientConfig> {
    let config_path = super::paths::config_path();

    let mut config = if config_path.exists() {
        load_config_from_path(&config_path)?
    } else {
        GatewayClientConfig::default()
    };

    apply_env_overrides(&mut config);

    Ok(config)
}

/// Load configuration from a specific path
pub fn load_config_from_path(path: &Path) -> Result<GatewayClientConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        Error::Config(format!("Failed to read config file {}: {}", path.display(), e))
    })?;

    let config: GatewayClientConfig = if path.extension().is_some_and(|ext| ext == "json") {
        json5::from_str(&content).map_err(|e| Error::Config(format!("Invalid JSON config: {}", e)))?
    } else if path.extension().is_some_and(|ext| ext == "toml") {
        toml::from_str(&content).map_err(|e| Error::Config(format!("Invalid TOML config: {}", e)))?
    } else {
        json5::from_str(&content)
            .or_else(|_| toml::from_str(&content).map_err(|e| Error::Config(e.to_string())))
            .map_err(|e| Error::Config(format!("Failed to parse config: {}", e)))?
    };

    Ok(config)
}

/// Apply environment variable overrides to an existing config.
///
/// Loads `.env` first, then overlays any set variables. Env vars have the
/// highest precedence: defaults < file < env.
pub fn apply_env_overrides(config: &mut GatewayClientConfig) {
    dotenvy::dotenv().ok();

    if let Ok(url) = std::env::var("CHATGATE_URL") {
        config.connection.url = url;
    }
    if let Ok(token) = std::env::var("CHATGATE_TOKEN") {
        config.connection.token = SecretString::from(token);
    }
    if let Ok(v) = std::env::var("CHATGATE_OBSERVER") {
        config.connection.observer = v == "true" || v == "1";
    }
    if let Ok(secs) = std::env::var("CHATGATE_RECONNECT_DELAY_SECS") {
        if let Ok(v) = secs.parse() {
            config.connection.reconnect_delay = Duration::from_secs(v);
        }
    }
    if let Ok(v) = std::env::var("CHATGATE_LOG_JSON") {
        config.logging.json = v == "true" || v == "1";
    }
}

/// Save configuration to a file
///
/// The token is never written; it is expected to come from the environment.
pub fn save_config(config: &GatewayClientConfig, path: &Path) -> Result<()> {
    let content = if path.extension().is_some_and(|ext| ext == "toml") {
        toml::to_string_pretty(config)
            .map_err(|e| Error::Config(format!("Failed to serialize config: {}", e)))?
    } else {
        serde_json::to_string_pretty(config)
            .map_err(|e| Error::Config(format!("Failed to serialize config: {}", e)))?
    };

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    std::fs::write(path, content)?;
    Ok(())
}
