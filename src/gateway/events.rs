//! Typed event bus between the gateway and its consumers.
//!
//! Pure fan-out: no buffering and no replay, so a handler registered after
//! an event was emitted never sees it. Handlers run on the emitting task and
//! must not block.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use serde_json::Value;
use tracing::debug;

use super::connection::ConnectionState;
use super::protocol::{events, BadgePush, MessagePush, PresencePush, ReactionPush, ReadyBody};

/// Everything the gateway publishes
#[derive(Debug, Clone, PartialEq)]
pub enum GatewayEvent {
    /// Connection state moved
    ConnectionStateChanged { state: ConnectionState, epoch: u64 },
    /// Server signalled readiness
    Ready(ReadyBody),
    /// Seconds left before the next reconnect attempt; ends at 0
    ReconnectCountdown { remaining: u64 },
    /// A latency probe round trip was accepted
    LatencyMeasured { millis: u64 },
    Message(MessagePush),
    Presence(PresencePush),
    Badge(BadgePush),
    Reaction(ReactionPush),
    /// Pushed event without a typed variant
    Other { name: String, data: Value },
    /// `channel.enter` answered; first unread recorded
    ChannelEntered {
        channel_id: String,
        first_unread_message_id: Option<String>,
    },
    /// Channel switch completed and the session is active
    ChannelActivated { channel_id: String },
    /// Enter returned no member record; the previous channel was restored
    ChannelAccessLost {
        channel_id: String,
        restored: Option<String>,
    },
    /// Switch refused by the thrash guard
    SwitchBlocked { channel_id: String },
    /// Thrash recurred; the host should restart the whole client
    ReloadRequested { channel_id: String },
}

/// Subscription filter matching one [`GatewayEvent`] variant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    ConnectionStateChanged,
    Ready,
    ReconnectCountdown,
    LatencyMeasured,
    Message,
    Presence,
    Badge,
    Reaction,
    Other,
    ChannelEntered,
    ChannelActivated,
    ChannelAccessLost,
    SwitchBlocked,
    ReloadRequested,
}

impl GatewayEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            GatewayEvent::ConnectionStateChanged { .. } => EventKind::ConnectionStateChanged,
            GatewayEvent::Ready(_) => EventKind::Ready,
            GatewayEvent::ReconnectCountdown { .. } => EventKind::ReconnectCountdown,
            GatewayEvent::LatencyMeasured { .. } => EventKind::LatencyMeasured,
            GatewayEvent::Message(_) => EventKind::Message,
            GatewayEvent::Presence(_) => EventKind::Presence,
            GatewayEvent::Badge(_) => EventKind::Badge,
            GatewayEvent::Reaction(_) => EventKind::Reaction,
            GatewayEvent::Other { .. } => EventKind::Other,
            GatewayEvent::ChannelEntered { .. } => EventKind::ChannelEntered,
            GatewayEvent::ChannelActivated { .. } => EventKind::ChannelActivated,
            GatewayEvent::ChannelAccessLost { .. } => EventKind::ChannelAccessLost,
            GatewayEvent::SwitchBlocked { .. } => EventKind::SwitchBlocked,
            GatewayEvent::ReloadRequested { .. } => EventKind::ReloadRequested,
        }
    }

    /// Decode a pushed server event into its typed variant.
    ///
    /// Known names with an unexpected payload fall back to `Other` so no
    /// server event is silently lost.
    pub fn from_push(name: &str, data: Value) -> Self {
        fn typed<T: serde::de::DeserializeOwned>(data: &Value) -> Option<T> {
            serde_json::from_value(data.clone()).ok()
        }

        let decoded = match name {
            events::MESSAGE => typed(&data).map(GatewayEvent::Message),
            events::PRESENCE => typed(&data).map(GatewayEvent::Presence),
            events::BADGE => typed(&data).map(GatewayEvent::Badge),
            events::REACTION => typed(&data).map(GatewayEvent::Reaction),
            _ => None,
        };

        decoded.unwrap_or_else(|| GatewayEvent::Other {
            name: name.to_string(),
            data,
        })
    }
}

/// Handle returned by [`EventBus::on`], used to unsubscribe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// Event handler callback
pub type EventHandler = Arc<dyn Fn(&GatewayEvent) + Send + Sync>;

struct Subscription {
    id: SubscriptionId,
    kind: Option<EventKind>,
    handler: EventHandler,
}

/// Publish/subscribe hub
#[derive(Default)]
pub struct EventBus {
    subscriptions: RwLock<Vec<Subscription>>,
    next_id: AtomicU64,
    emit_count: AtomicU64,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to one kind of event.
    pub fn on<F>(&self, kind: EventKind, handler: F) -> SubscriptionId
    where
        F: Fn(&GatewayEvent) + Send + Sync + 'static,
    {
        self.subscribe(Some(kind), Arc::new(handler))
    }

    /// Subscribe to every event.
    pub fn on_all<F>(&self, handler: F) -> SubscriptionId
    where
        F: Fn(&GatewayEvent) + Send + Sync + 'static,
    {
        self.subscribe(None, Arc::new(handler))
    }

    /// Remove a subscription. Returns `false` if it was already gone.
    pub fn off(&self, id: SubscriptionId) -> bool {
        let mut subs = self.subscriptions.write().unwrap_or_else(|e| e.into_inner());
        let before = subs.len();
        subs.retain(|s| s.id != id);
        subs.len() != before
    }

    /// Deliver `event` to every matching handler. Returns how many ran.
    pub fn emit(&self, event: GatewayEvent) -> usize {
        let _ = self.emit_count.fetch_add(1, Ordering::Relaxed);
        let kind = event.kind();

        // Snapshot so handlers may subscribe or unsubscribe while running.
        let handlers: Vec<EventHandler> = {
            let subs = self.subscriptions.read().unwrap_or_else(|e| e.into_inner());
            subs.iter()
                .filter(|s| s.kind.map_or(true, |k| k == kind))
                .map(|s| Arc::clone(&s.handler))
                .collect()
        };

        if handlers.is_empty() {
            debug!(?kind, "event emitted with no subscribers");
        }
        for handler in &handlers {
            handler(&event);
        }
        handlers.len()
    }

    /// Remove every subscription.
    pub fn clear(&self) {
        self.subscriptions
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscriptions
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }

    /// Total events emitted, delivered or not.
    pub fn emit_count(&self) -> u64 {
        self.emit_count.load(Ordering::Relaxed)
    }

    fn subscribe(&self, kind: Option<EventKind>, handler: EventHandler) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.subscriptions
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push(Subscription { id, kind, handler });
        id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Mutex;

    fn recorder() -> (Arc<Mutex<Vec<GatewayEvent>>>, impl Fn(&GatewayEvent) + Send + Sync) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        (seen, move |e: &GatewayEvent| sink.lock().unwrap().push(e.clone()))
    }

    #[test]
    fn emit_with_no_subscribers() {
        let bus = EventBus::new();
        assert_eq!(bus.emit(GatewayEvent::ReconnectCountdown { remaining: 1 }), 0);
        assert_eq!(bus.emit_count(), 1);
    }

    #[test]
    fn handlers_only_see_their_kind() {
        let bus = EventBus::new();
        let (messages, on_message) = recorder();
        let (everything, on_any) = recorder();
        bus.on(EventKind::Message, on_message);
        bus.on_all(on_any);

        bus.emit(GatewayEvent::from_push(
            "message",
            json!({"channel_id": "c1", "message_id": "m1", "content": "hi"}),
        ));
        bus.emit(GatewayEvent::ReconnectCountdown { remaining: 3 });

        assert_eq!(messages.lock().unwrap().len(), 1);
        assert_eq!(everything.lock().unwrap().len(), 2);
    }

    #[test]
    fn no_replay_for_late_subscribers() {
        let bus = EventBus::new();
        bus.emit(GatewayEvent::ReconnectCountdown { remaining: 5 });

        let (seen, handler) = recorder();
        bus.on(EventKind::ReconnectCountdown, handler);
        assert!(seen.lock().unwrap().is_empty());
    }

    #[test]
    fn off_stops_delivery() {
        let bus = EventBus::new();
        let (seen, handler) = recorder();
        let id = bus.on(EventKind::Badge, handler);
        assert!(bus.off(id));
        assert!(!bus.off(id));

        bus.emit(GatewayEvent::Badge(BadgePush {
            channel_id: "c1".into(),
            unread: 2,
        }));
        assert!(seen.lock().unwrap().is_empty());
    }

    #[test]
    fn malformed_known_event_falls_back_to_other() {
        let event = GatewayEvent::from_push("badge", json!({"wrong": true}));
        assert_eq!(event.kind(), EventKind::Other);

        let event = GatewayEvent::from_push("typing", json!({"user_id": "u"}));
        match event {
            GatewayEvent::Other { name, .. } => assert_eq!(name, "typing"),
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn handler_may_unsubscribe_itself() {
        let bus = Arc::new(EventBus::new());
        let slot: Arc<Mutex<Option<SubscriptionId>>> = Arc::new(Mutex::new(None));
        let bus_ref = Arc::clone(&bus);
        let slot_ref = Arc::clone(&slot);
        let id = bus.on(EventKind::Ready, move |_| {
            if let Some(id) = *slot_ref.lock().unwrap() {
                bus_ref.off(id);
            }
        });
        *slot.lock().unwrap() = Some(id);

        assert_eq!(bus.emit(GatewayEvent::Ready(ReadyBody::default())), 1);
        assert_eq!(bus.emit(GatewayEvent::Ready(ReadyBody::default())), 0);
    }
}
