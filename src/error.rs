//! Error types for Chatgate

use thiserror::Error;

/// Result type alias using Chatgate's Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for Chatgate
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Transport could not be opened or broke while in use
    #[error("Transport error: {0}")]
    Transport(String),

    /// WebSocket protocol error
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// URL parse error
    #[error("Invalid URL: {0}")]
    Url(#[from] url::ParseError),

    /// No socket is open to carry the frame
    #[error("Not connected to the gateway")]
    NotConnected,

    /// The server answered a correlated call with an `err` field
    #[error("API call '{api}' failed: {message}")]
    Api {
        /// API name of the failed call
        api: String,
        /// Error text reported by the server
        message: String,
        /// Reply payload, if the server sent one alongside the error
        data: Option<serde_json::Value>,
    },

    /// Timeout error
    #[error("Timeout: {0}")]
    Timeout(String),

    /// The reply slot or session task went away before settling
    #[error("Gateway channel closed")]
    ChannelClosed,

    /// Resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Generic internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Check if error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::Transport(_)
                | Error::WebSocket(_)
                | Error::NotConnected
                | Error::ChannelClosed
                | Error::Timeout(_)
        )
    }

    /// Check if error is a client error (caller's fault or server refusal)
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Error::InvalidInput(_) | Error::NotFound(_) | Error::Api { .. }
        )
    }

    /// Server-provided error text for a failed correlated call
    pub fn api_message(&self) -> Option<&str> {
        match self {
            Error::Api { message, .. } => Some(message),
            _ => None,
        }
    }
}

impl From<tokio::time::error::Elapsed> for Error {
    fn from(err: tokio::time::error::Elapsed) -> Self {
        Error::Timeout(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_faults_are_retryable() {
        assert!(Error::Transport("reset".into()).is_retryable());
        assert!(Error::NotConnected.is_retryable());
        assert!(!Error::InvalidInput("x".into()).is_retryable());
    }

    #[test]
    fn api_error_exposes_message() {
        let err = Error::Api {
            api: "channel.enter".into(),
            message: "forbidden".into(),
            data: None,
        };
        assert!(err.is_client_error());
        assert_eq!(err.api_message(), Some("forbidden"));
        assert_eq!(err.to_string(), "API call 'channel.enter' failed: forbidden");
    }
}
