//! Gateway session: the one object a host application holds.
//!
//! Wires the connection manager, correlation table, event bus, presence
//! loops and channel session machine together and exposes the collaborator
//! surface. Create it once with [`GatewaySession::init`], share the `Arc`,
//! and call [`GatewaySession::teardown`] on logout.

use std::sync::Arc;

use serde_json::Value;
use tokio::sync::watch;
use tracing::info;

use super::api::ApiClient;
use super::connection::{BeforeConnect, ConnectionManager, ConnectionState};
use super::correlation::CorrelationTable;
use super::events::{EventBus, EventKind, GatewayEvent, SubscriptionId};
use super::presence::Presence;
use super::transport::{Connector, WsConnector};
use crate::channel::{
    ActiveChannelSession, ChannelBackend, ChannelDirectory, ChannelSessionMachine,
    GatewayChannelBackend, SwitchState,
};
use crate::config::GatewayClientConfig;
use crate::error::Result;

pub struct GatewaySession {
    bus: Arc<EventBus>,
    calls: Arc<CorrelationTable>,
    presence: Arc<Presence>,
    connection: ConnectionManager,
    api: ApiClient,
    channels: ChannelSessionMachine,
}

impl GatewaySession {
    /// Build a session over `connector`. Nothing is opened until [`connect`](Self::connect).
    pub fn init(config: GatewayClientConfig, connector: Arc<dyn Connector>) -> Arc<Self> {
        let directory = Arc::new(ChannelDirectory::new());
        Self::init_with_directory(config, connector, directory)
    }

    /// Like [`init`](Self::init) with a directory seeded by the host.
    pub fn init_with_directory(
        config: GatewayClientConfig,
        connector: Arc<dyn Connector>,
        directory: Arc<ChannelDirectory>,
    ) -> Arc<Self> {
        let bus = Arc::new(EventBus::new());
        let calls = Arc::new(CorrelationTable::new());
        let presence = Arc::new(Presence::new(
            config.presence.clone(),
            config.connection.token.clone(),
            Arc::clone(&bus),
        ));
        let connection = ConnectionManager::new(
            config.connection.clone(),
            connector,
            Arc::clone(&bus),
            Arc::clone(&calls),
            Arc::clone(&presence),
        );
        let api = ApiClient::new(Arc::clone(&calls), connection.clone());
        let backend: Arc<dyn ChannelBackend> = Arc::new(GatewayChannelBackend::new(api.clone()));

        let badges = Arc::clone(&directory);
        bus.on(EventKind::Badge, move |event| {
            if let GatewayEvent::Badge(badge) = event {
                badges.set_unread(&badge.channel_id, badge.unread);
            }
        });

        let channels = ChannelSessionMachine::new(backend, directory, &config.guard, Arc::clone(&bus));

        Arc::new(Self {
            bus,
            calls,
            presence,
            connection,
            api,
            channels,
        })
    }

    /// [`init`](Self::init) over a real WebSocket.
    pub fn init_ws(config: GatewayClientConfig) -> Arc<Self> {
        Self::init(config, Arc::new(WsConnector::new()))
    }

    /// Disconnect, fail pending calls, forget the active channel and drop all subscriptions.
    pub fn teardown(&self) {
        self.connection.disconnect("session teardown");
        self.calls.clear();
        self.channels.reset();
        self.bus.clear();
        info!("gateway session torn down");
    }

    pub async fn connect(&self) {
        self.connection.connect().await;
    }

    pub fn disconnect(&self, reason: &str) {
        self.connection.disconnect(reason);
    }

    pub async fn wait_connected(&self) -> Result<()> {
        self.connection.wait_connected().await
    }

    pub async fn reconnect_now(&self) {
        self.connection.reconnect_now().await;
    }

    pub fn reconnect_after(&self, seconds: u64, before_connect: Option<BeforeConnect>) {
        self.connection.reconnect_after(seconds, before_connect);
    }

    pub async fn send_api(&self, api: &str, data: Value) -> Result<Value> {
        self.api.send_api(api, data).await
    }

    pub fn api(&self) -> &ApiClient {
        &self.api
    }

    pub fn on<F>(&self, kind: EventKind, handler: F) -> SubscriptionId
    where
        F: Fn(&GatewayEvent) + Send + Sync + 'static,
    {
        self.bus.on(kind, handler)
    }

    pub fn on_all<F>(&self, handler: F) -> SubscriptionId
    where
        F: Fn(&GatewayEvent) + Send + Sync + 'static,
    {
        self.bus.on_all(handler)
    }

    pub fn off(&self, id: SubscriptionId) -> bool {
        self.bus.off(id)
    }

    pub async fn switch_to(&self, channel_id: &str) -> Result<bool> {
        self.channels.switch_to(channel_id).await
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.connection.connection_state()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.connection.subscribe_state()
    }

    /// Seconds until the next reconnect attempt, `None` when none is pending.
    pub fn countdown(&self) -> watch::Receiver<Option<u64>> {
        self.connection.countdown()
    }

    pub fn active_channel_id(&self) -> Option<String> {
        self.channels.active_channel_id()
    }

    pub fn active_session(&self) -> Option<ActiveChannelSession> {
        self.channels.active_session()
    }

    pub fn switch_state(&self) -> SwitchState {
        self.channels.phase()
    }

    pub fn channels(&self) -> &ChannelSessionMachine {
        &self.channels
    }

    /// Last accepted latency probe round trip, in milliseconds.
    pub fn latency(&self) -> Option<u64> {
        self.presence.latency()
    }

    /// Report focus; returns `true` if a heartbeat went out immediately.
    pub fn set_focused(&self, focused: bool) -> bool {
        self.presence.set_focused(focused)
    }
}
