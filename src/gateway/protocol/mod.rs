//! Gateway Protocol - JSON frames over one persistent WebSocket
//!
//! ## Message Types
//!
//! - Control frames (`op` + `body`): identify, heartbeat, latency probe,
//!   and the server's ready / event / acks
//! - Correlated calls (`api` + `data` + `echo`) and their tagged replies

pub mod schema;
pub mod types;

pub use schema::{op, ApiFrame, ClientFrame, ControlFrame, EventFrame, ReplyFrame, ServerFrame};
pub use types::*;
