//! Channel sessions: switching, thrash protection, and local channel state.

pub mod backend;
pub mod cache;
pub mod directory;
pub mod guard;
pub mod state_machine;

pub use backend::{apis, ChannelBackend, GatewayChannelBackend};
pub use cache::PermissionCache;
pub use directory::ChannelDirectory;
pub use guard::{ChannelSwitchGuard, GuardDecision};
pub use state_machine::{ActiveChannelSession, ChannelSessionMachine, SwitchState};
