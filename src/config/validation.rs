//! Configuration validation
//!
//! Validates configuration and reports issues.

use secrecy::ExposeSecret;

use super::types::GatewayClientConfig;

/// Result of configuration validation
#[derive(Debug, Clone)]
pub struct ConfigValidationResult {
    /// Whether the config is valid
    pub valid: bool,
    /// Validation errors (critical)
    pub errors: Vec<ValidationIssue>,
    /// Validation warnings (non-critical)
    pub warnings: Vec<ValidationIssue>,
}

impl ConfigValidationResult {
    /// Create a valid result
    pub fn valid() -> Self {
        ConfigValidationResult {
            valid: true,
            errors: Vec::new(),
            warnings: Vec::new(),
        }
    }

    /// Add an error
    pub fn with_error(mut self, issue: ValidationIssue) -> Self {
        self.valid = false;
        self.errors.push(issue);
        self
    }

    /// Add a warning
    pub fn with_warning(mut self, issue: ValidationIssue) -> Self {
        self.warnings.push(issue);
        self
    }
}

/// A validation issue
#[derive(Debug, Clone)]
pub struct ValidationIssue {
    /// Path to the config field
    pub path: String,
    /// Issue message
    pub message: String,
    /// Suggested fix
    pub suggestion: Option<String>,
}

impl ValidationIssue {
    /// Create a new issue
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        ValidationIssue {
            path: path.into(),
            message: message.into(),
            suggestion: None,
        }
    }

    /// Add a suggestion
    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = Some(suggestion.into());
        self
    }
}

/// Validate the configuration
pub fn validate_config(config: &GatewayClientConfig) -> ConfigValidationResult {
    let mut result = ConfigValidationResult::valid();

    result = validate_connection_config(config, result);
    result = validate_presence_config(config, result);
    result = validate_guard_config(config, result);

    result
}

fn validate_connection_config(
    config: &GatewayClientConfig,
    mut result: ConfigValidationResult,
) -> ConfigValidationResult {
    match url::Url::parse(&config.connection.url) {
        Ok(url) if url.scheme() == "ws" || url.scheme() == "wss" => {}
        Ok(url) => {
            result = result.with_error(
                ValidationIssue::new(
                    "connection.url",
                    format!("Unsupported scheme '{}'", url.scheme()),
                )
                .with_suggestion("Use a ws:// or wss:// URL"),
            );
        }
        Err(e) => {
            result = result.with_error(ValidationIssue::new(
                "connection.url",
                format!("Invalid URL: {}", e),
            ));
        }
    }

    if !config.connection.observer && config.connection.token.expose_secret().is_empty() {
        result = result.with_warning(
            ValidationIssue::new(
                "connection.token",
                "No token configured for a non-observer session. The server will likely refuse identify.",
            )
            .with_suggestion("Set CHATGATE_TOKEN or enable connection.observer"),
        );
    }

    if config.connection.reconnect_delay.is_zero() {
        result = result.with_error(ValidationIssue::new(
            "connection.reconnect_delay",
            "Reconnect delay must be greater than zero",
        ));
    } else if config.connection.reconnect_delay_secs() == 0 {
        result = result.with_warning(
            ValidationIssue::new(
                "connection.reconnect_delay",
                "Reconnect delay under one second retries without a countdown",
            )
            .with_suggestion("Use whole seconds, e.g. \"5s\""),
        );
    }

    result
}

fn validate_presence_config(
    config: &GatewayClientConfig,
    mut result: ConfigValidationResult,
) -> ConfigValidationResult {
    let presence = &config.presence;

    if presence.heartbeat_interval.is_zero() {
        result = result.with_error(ValidationIssue::new(
            "presence.heartbeat_interval",
            "Heartbeat interval must be greater than zero",
        ));
    }
    if presence.probe_interval.is_zero() {
        result = result.with_error(ValidationIssue::new(
            "presence.probe_interval",
            "Probe interval must be greater than zero",
        ));
    }
    if presence.probe_timeout >= presence.probe_interval {
        result = result.with_warning(
            ValidationIssue::new(
                "presence.probe_timeout",
                "Probe timeout is not shorter than the probe interval; probes may overlap",
            )
            .with_suggestion("Keep probe_timeout below probe_interval"),
        );
    }

    result
}

fn validate_guard_config(
    config: &GatewayClientConfig,
    mut result: ConfigValidationResult,
) -> ConfigValidationResult {
    if config.guard.min_switches < 2 {
        result = result.with_error(ValidationIssue::new(
            "guard.min_switches",
            "At least two switches are needed to detect alternation",
        ));
    }

    result
}
