//! Connection manager: one socket, its handshake, and fixed-delay reconnects.
//!
//! Every attempt to hold the socket open gets a fresh connection epoch. All
//! asynchronous work (the reader task, the reconnect countdown, a pending
//! `connect`) remembers the epoch it was started under and checks it, under
//! the link lock, before touching shared state. A slow callback from attempt
//! N therefore cannot clobber what attempt N+1 set up.
//!
//! ```text
//!  Disconnected ──connect──▶ Connecting ──ready──▶ Connected
//!        ▲                     │   ▲                  │
//!        │               fault │   │ countdown   fault│
//!        │                     ▼   │ elapsed          ▼
//!        └──disconnect──── Reconnecting ◀─────────────┘
//! ```

use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::future::BoxFuture;
use secrecy::ExposeSecret;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use super::correlation::CorrelationTable;
use super::epoch::EpochCounter;
use super::events::{EventBus, GatewayEvent};
use super::presence::Presence;
use super::protocol::{ClientFrame, IdentifyBody, ServerFrame};
use super::transport::{Connector, FrameSender, Transport, TransportEvent};
use crate::config::ConnectionConfig;
use crate::error::{Error, Result};

/// Lifecycle of the gateway socket
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    Connecting,
    Connected,
    Disconnected,
    Reconnecting,
}

impl ConnectionState {
    /// Whether moving from `self` to `next` is a legal transition.
    pub fn can_transition_to(self, next: ConnectionState) -> bool {
        use ConnectionState::*;
        matches!(
            (self, next),
            (Disconnected, Connecting)
                | (Reconnecting, Connecting)
                | (Connecting, Connected)
                | (Connecting, Reconnecting)
                | (Connected, Reconnecting)
                | (Connecting, Disconnected)
                | (Connected, Disconnected)
                | (Reconnecting, Disconnected)
        )
    }

    /// Healthy or being established; `connect` is a no-op in these states.
    pub fn is_active(self) -> bool {
        matches!(self, ConnectionState::Connecting | ConnectionState::Connected)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Reconnecting => "reconnecting",
        };
        f.write_str(name)
    }
}

/// Hook run after a reconnect countdown and before the new attempt
pub type BeforeConnect = Box<dyn FnOnce() -> BoxFuture<'static, ()> + Send>;

struct Link {
    state: ConnectionState,
    outgoing: Option<FrameSender>,
    reader: Option<JoinHandle<()>>,
    retry: Option<JoinHandle<()>>,
}

struct Shared {
    config: ConnectionConfig,
    connector: Arc<dyn Connector>,
    bus: Arc<EventBus>,
    calls: Arc<CorrelationTable>,
    presence: Arc<Presence>,
    epochs: EpochCounter,
    link: Mutex<Link>,
    state_tx: watch::Sender<ConnectionState>,
    countdown_tx: watch::Sender<Option<u64>>,
}

/// Owner of the single gateway socket
#[derive(Clone)]
pub struct ConnectionManager {
    shared: Arc<Shared>,
}

impl ConnectionManager {
    pub fn new(
        config: ConnectionConfig,
        connector: Arc<dyn Connector>,
        bus: Arc<EventBus>,
        calls: Arc<CorrelationTable>,
        presence: Arc<Presence>,
    ) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        let (countdown_tx, _) = watch::channel(None);
        Self {
            shared: Arc::new(Shared {
                config,
                connector,
                bus,
                calls,
                presence,
                epochs: EpochCounter::new(),
                link: Mutex::new(Link {
                    state: ConnectionState::Disconnected,
                    outgoing: None,
                    reader: None,
                    retry: None,
                }),
                state_tx,
                countdown_tx,
            }),
        }
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.lock().state
    }

    /// Current connection epoch
    pub fn epoch(&self) -> u64 {
        self.shared.epochs.current()
    }

    /// Watch connection state changes
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state_tx.subscribe()
    }

    /// Watch the reconnect countdown; `None` when no retry is pending
    pub fn countdown(&self) -> watch::Receiver<Option<u64>> {
        self.shared.countdown_tx.subscribe()
    }

    /// Resolve once the connection reaches `Connected`.
    pub async fn wait_connected(&self) -> Result<()> {
        let mut rx = self.shared.state_tx.subscribe();
        rx.wait_for(|state| *state == ConnectionState::Connected)
            .await
            .map(|_| ())
            .map_err(|_| Error::ChannelClosed)
    }

    /// Open the socket unless one is already healthy or being established.
    ///
    /// Transport failures are never returned; they move the connection to
    /// `Reconnecting` and schedule a retry.
    pub async fn connect(&self) {
        self.connect_from(None).await;
    }

    /// Tear the connection down and cancel any scheduled retry.
    pub fn disconnect(&self, reason: &str) {
        let (epoch, changed) = {
            let mut link = self.lock();
            let epoch = self.shared.epochs.advance().epoch();
            link.outgoing = None;
            if let Some(reader) = link.reader.take() {
                reader.abort();
            }
            if let Some(retry) = link.retry.take() {
                retry.abort();
            }
            self.shared.presence.stop();
            let changed = link.state != ConnectionState::Disconnected
                && self.transition(&mut link, ConnectionState::Disconnected);
            (epoch, changed)
        };
        self.shared.countdown_tx.send_replace(None);

        if changed {
            info!(epoch, reason, "gateway disconnected");
            self.announce(ConnectionState::Disconnected, epoch);
        }
    }

    /// Schedule a connect attempt after a visible countdown of `seconds`.
    ///
    /// The countdown belongs to the epoch current at scheduling time; any
    /// connect or disconnect in the meantime cancels it.
    pub fn reconnect_after(&self, seconds: u64, before_connect: Option<BeforeConnect>) {
        let mut link = self.lock();
        let epoch = self.shared.epochs.current();
        let this = self.clone();
        // Spawned under the lock so the task cannot observe `retry` before it is stored.
        let handle = tokio::spawn(async move {
            this.run_countdown(epoch, seconds, before_connect).await;
        });
        if let Some(previous) = link.retry.replace(handle) {
            previous.abort();
        }
        debug!(epoch, seconds, "reconnect scheduled");
    }

    /// Skip the remaining countdown and reconnect immediately.
    pub async fn reconnect_now(&self) {
        let pending = {
            let mut link = self.lock();
            if link.state != ConnectionState::Reconnecting {
                false
            } else {
                if let Some(retry) = link.retry.take() {
                    retry.abort();
                }
                true
            }
        };
        if pending {
            self.connect().await;
        }
    }

    /// Write a raw text frame to the current socket.
    pub fn send_text(&self, text: String) -> Result<()> {
        let link = self.lock();
        match &link.outgoing {
            Some(outgoing) => outgoing.send(text).map_err(|_| Error::NotConnected),
            None => Err(Error::NotConnected),
        }
    }

    pub fn send_frame(&self, frame: &ClientFrame) -> Result<()> {
        self.send_text(frame.encode()?)
    }

    async fn connect_from(&self, expected_epoch: Option<u64>) {
        let epoch = {
            let mut link = self.lock();
            if expected_epoch.is_some_and(|e| e != self.shared.epochs.current()) {
                debug!("scheduled connect superseded");
                return;
            }
            if link.state.is_active() {
                debug!(state = %link.state, "connect ignored; connection active or pending");
                return;
            }

            let epoch = self.shared.epochs.advance().epoch();
            link.outgoing = None;
            if let Some(reader) = link.reader.take() {
                reader.abort();
            }
            if let Some(retry) = link.retry.take() {
                retry.abort();
            }
            self.shared.presence.stop();
            self.transition(&mut link, ConnectionState::Connecting);
            epoch
        };
        self.shared.countdown_tx.send_replace(None);
        self.announce(ConnectionState::Connecting, epoch);
        info!(epoch, url = %self.shared.config.url, "connecting to gateway");

        match self.shared.connector.connect(&self.shared.config.url).await {
            Ok(transport) => self.attach(epoch, transport),
            Err(e) => self.handle_fault(epoch, format!("connect failed: {}", e)),
        }
    }

    /// Adopt a freshly opened transport if its attempt is still current.
    fn attach(&self, epoch: u64, transport: Transport) {
        let Transport { outgoing, incoming } = transport;
        let mut link = self.lock();
        if self.shared.epochs.current() != epoch || link.state != ConnectionState::Connecting {
            debug!(epoch, "transport opened for a superseded attempt; closing it");
            return;
        }

        let identify = ClientFrame::Identify(IdentifyBody {
            token: self.shared.config.token.expose_secret().to_string(),
            observer: self.shared.config.observer,
        });
        match identify.encode() {
            Ok(text) => {
                if outgoing.send(text).is_err() {
                    warn!(epoch, "socket closed before identify could be sent");
                }
            }
            Err(e) => warn!(epoch, error = %e, "failed to encode identify frame"),
        }

        link.outgoing = Some(outgoing);
        let this = self.clone();
        link.reader = Some(tokio::spawn(async move {
            this.read_loop(epoch, incoming).await;
        }));
        debug!(epoch, observer = self.shared.config.observer, "identify sent");
    }

    async fn read_loop(
        &self,
        epoch: u64,
        mut incoming: tokio::sync::mpsc::UnboundedReceiver<TransportEvent>,
    ) {
        while let Some(event) = incoming.recv().await {
            match event {
                TransportEvent::Frame(text) => self.handle_frame(epoch, &text),
                TransportEvent::Error(reason) => {
                    self.handle_fault(epoch, format!("transport error: {}", reason));
                    return;
                }
                TransportEvent::Closed(reason) => {
                    let reason = reason.unwrap_or_else(|| "no reason given".to_string());
                    self.handle_fault(epoch, format!("transport closed: {}", reason));
                    return;
                }
            }
        }
        self.handle_fault(epoch, "transport ended".to_string());
    }

    fn handle_frame(&self, epoch: u64, text: &str) {
        if self.shared.epochs.current() != epoch {
            trace!(epoch, "frame from superseded connection ignored");
            return;
        }

        let frame = match ServerFrame::parse(text) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(epoch, error = %e, "unparseable server frame dropped");
                return;
            }
        };

        match frame {
            ServerFrame::Ready(body) => self.handle_ready(epoch, body),
            ServerFrame::Reply(reply) => {
                self.shared.calls.settle(reply);
            }
            ServerFrame::Event(event) => {
                self.shared.bus.emit(GatewayEvent::from_push(&event.name, event.data));
            }
            ServerFrame::LatencyAck(body) => {
                self.shared.presence.on_latency_ack(&body);
            }
            ServerFrame::HeartbeatAck => trace!(epoch, "heartbeat acknowledged"),
            ServerFrame::Unknown(code) => debug!(epoch, code, "unknown op code ignored"),
        }
    }

    fn handle_ready(&self, epoch: u64, body: super::protocol::ReadyBody) {
        {
            let mut link = self.lock();
            if self.shared.epochs.current() != epoch {
                return;
            }
            if link.state != ConnectionState::Connecting {
                debug!(epoch, state = %link.state, "duplicate ready ignored");
                return;
            }
            if !self.transition(&mut link, ConnectionState::Connected) {
                return;
            }
            if let Some(outgoing) = link.outgoing.clone() {
                self.shared.presence.start(epoch, outgoing);
            }
        }

        info!(epoch, user = ?body.user_id, "gateway ready");
        self.announce(ConnectionState::Connected, epoch);
        self.shared.bus.emit(GatewayEvent::Ready(body));
    }

    /// Transport error or close for attempt `epoch`: schedule the fixed retry.
    fn handle_fault(&self, epoch: u64, reason: String) {
        {
            let mut link = self.lock();
            if self.shared.epochs.current() != epoch {
                debug!(epoch, %reason, "fault from superseded connection ignored");
                return;
            }
            if !link.state.is_active() {
                return;
            }
            link.outgoing = None;
            // The reader may be the caller; detach instead of aborting it.
            drop(link.reader.take());
            self.shared.presence.stop();
            if !self.transition(&mut link, ConnectionState::Reconnecting) {
                return;
            }
        }

        let delay = self.shared.config.reconnect_delay_secs();
        warn!(epoch, %reason, delay, "gateway connection lost; reconnecting");
        self.announce(ConnectionState::Reconnecting, epoch);
        self.reconnect_after(delay, None);
    }

    async fn run_countdown(
        &self,
        epoch: u64,
        seconds: u64,
        before_connect: Option<BeforeConnect>,
    ) {
        for remaining in (1..=seconds).rev() {
            if !self.tick_countdown(epoch, remaining) {
                return;
            }
            tokio::time::sleep(Duration::from_secs(1)).await;
        }
        if !self.tick_countdown(epoch, 0) {
            return;
        }

        {
            let mut link = self.lock();
            if self.shared.epochs.current() != epoch || link.state.is_active() {
                return;
            }
            // Detach ourselves so the connect below does not abort this task.
            drop(link.retry.take());
        }
        self.shared.countdown_tx.send_replace(None);

        if let Some(hook) = before_connect {
            hook().await;
        }
        self.connect_from(Some(epoch)).await;
    }

    fn tick_countdown(&self, epoch: u64, remaining: u64) -> bool {
        if self.shared.epochs.current() != epoch {
            return false;
        }
        self.shared.countdown_tx.send_replace(Some(remaining));
        self.shared.bus.emit(GatewayEvent::ReconnectCountdown { remaining });
        true
    }

    /// Apply `next` if legal; publishes to the state watch.
    fn transition(&self, link: &mut Link, next: ConnectionState) -> bool {
        if !link.state.can_transition_to(next) {
            warn!(from = %link.state, to = %next, "invalid connection state transition refused");
            return false;
        }
        link.state = next;
        self.shared.state_tx.send_replace(next);
        true
    }

    /// Publish a state change on the bus. Called after the link lock is released.
    fn announce(&self, state: ConnectionState, epoch: u64) {
        self.shared
            .bus
            .emit(GatewayEvent::ConnectionStateChanged { state, epoch });
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Link> {
        self.shared.link.lock().unwrap_or_else(|e| e.into_inner())
    }
}
