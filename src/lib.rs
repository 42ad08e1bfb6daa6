//! # Chatgate
//!
//! Client side of a real-time chat gateway, built on tokio.
//!
//! ## Features
//!
//! - **One socket:** identify handshake, epoch-guarded fixed-delay reconnects
//! - **Correlated calls:** `send_api` over the shared socket, replies matched by tag
//! - **Typed events:** closed `GatewayEvent` enum with per-kind subscriptions
//! - **Presence:** throttled heartbeats and latency probes while connected
//! - **Channel sessions:** last-switch-wins channel switching with thrash protection

pub mod channel;
pub mod config;
pub mod error;
pub mod gateway;

pub use config::GatewayClientConfig;
pub use error::{Error, Result};
pub use gateway::{ConnectionState, EventKind, GatewayEvent, GatewaySession};

/// Application version from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name
pub const NAME: &str = env!("CARGO_PKG_NAME");
