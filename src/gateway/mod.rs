//! Gateway module - one persistent WebSocket to the chat server
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │                   GatewaySession                      │
//! │  send_api · on/off · switch_to · connection_state     │
//! └───────┬──────────────┬──────────────┬────────────────┘
//!         │              │              │
//!         ▼              ▼              ▼
//!   ┌───────────┐  ┌───────────┐  ┌────────────┐
//!   │ ApiClient │  │ EventBus  │  │  Channel   │
//!   │ + echo    │  │ (typed)   │  │  machine   │
//!   │   table   │  └─────▲─────┘  └────────────┘
//!   └─────┬─────┘        │
//!         ▼              │
//!   ┌──────────────────────────┐   ┌──────────┐
//!   │    ConnectionManager     │◀──│ Presence │
//!   │ epochs · fixed reconnect │   │ hb/probe │
//!   └────────────┬─────────────┘   └──────────┘
//!                ▼
//!          Connector (ws / memory)
//! ```

pub mod api;
pub mod connection;
pub mod correlation;
pub mod epoch;
pub mod events;
pub mod memory;
pub mod presence;
pub mod protocol;
pub mod session;
pub mod transport;

pub use api::ApiClient;
pub use connection::{BeforeConnect, ConnectionManager, ConnectionState};
pub use correlation::CorrelationTable;
pub use epoch::{EpochCounter, EpochToken};
pub use events::{EventBus, EventHandler, EventKind, GatewayEvent, SubscriptionId};
pub use memory::{MemoryConnector, MemoryPeer, MemoryServer};
pub use presence::Presence;
pub use session::GatewaySession;
pub use transport::{Connector, FrameSender, Transport, TransportEvent, WsConnector};
