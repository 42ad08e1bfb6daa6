//! Channel session state machine
//!
//! A switch walks `ResolvingChannel → Entering → LoadingIdentities →
//! WarmingPermissions → Active`. Every switch takes a fresh switch epoch; a
//! sequence whose epoch is no longer current stops at its next checkpoint
//! without side effects, so the last requested channel always wins.

use std::sync::{Arc, Mutex};

use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::backend::ChannelBackend;
use super::cache::PermissionCache;
use super::directory::ChannelDirectory;
use super::guard::{ChannelSwitchGuard, GuardDecision};
use crate::config::GuardConfig;
use crate::error::Result;
use crate::gateway::epoch::{EpochCounter, EpochToken};
use crate::gateway::events::{EventBus, GatewayEvent};
use crate::gateway::protocol::{ChannelIdentities, ChannelInfo, ChannelPermissions, MemberRecord};

/// Phase of the current (or last) channel switch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SwitchState {
    Idle,
    ResolvingChannel,
    Entering,
    LoadingIdentities,
    WarmingPermissions,
    Active,
    /// A newer switch took over; the sequence stops here
    Superseded,
}

impl SwitchState {
    /// The step that follows `self` in an uninterrupted switch.
    pub fn next(self) -> Option<SwitchState> {
        match self {
            SwitchState::Idle | SwitchState::Active => Some(SwitchState::ResolvingChannel),
            SwitchState::ResolvingChannel => Some(SwitchState::Entering),
            SwitchState::Entering => Some(SwitchState::LoadingIdentities),
            SwitchState::LoadingIdentities => Some(SwitchState::WarmingPermissions),
            SwitchState::WarmingPermissions => Some(SwitchState::Active),
            SwitchState::Superseded => None,
        }
    }

    pub fn is_switching(self) -> bool {
        matches!(
            self,
            SwitchState::ResolvingChannel
                | SwitchState::Entering
                | SwitchState::LoadingIdentities
                | SwitchState::WarmingPermissions
        )
    }
}

/// Everything known about the channel the user is in
#[derive(Debug, Clone, PartialEq)]
pub struct ActiveChannelSession {
    pub channel: ChannelInfo,
    pub member: MemberRecord,
    pub first_unread_message_id: Option<String>,
    pub identities: ChannelIdentities,
}

struct Inner {
    phase: SwitchState,
    /// Latest requested target while a switch is in flight
    requested: Option<String>,
    active: Option<ActiveChannelSession>,
}

impl Inner {
    fn settle_phase(&mut self) {
        self.requested = None;
        self.phase = if self.active.is_some() {
            SwitchState::Active
        } else {
            SwitchState::Idle
        };
    }

    fn active_id(&self) -> Option<&str> {
        self.active.as_ref().map(|s| s.channel.id.as_str())
    }
}

/// Runs channel switches against a [`ChannelBackend`]
pub struct ChannelSessionMachine {
    backend: Arc<dyn ChannelBackend>,
    directory: Arc<ChannelDirectory>,
    permissions: PermissionCache,
    guard: Mutex<ChannelSwitchGuard>,
    bus: Arc<EventBus>,
    epochs: EpochCounter,
    inner: Mutex<Inner>,
}

impl ChannelSessionMachine {
    pub fn new(
        backend: Arc<dyn ChannelBackend>,
        directory: Arc<ChannelDirectory>,
        guard: &GuardConfig,
        bus: Arc<EventBus>,
    ) -> Self {
        Self {
            backend,
            directory,
            permissions: PermissionCache::new(),
            guard: Mutex::new(ChannelSwitchGuard::new(guard)),
            bus,
            epochs: EpochCounter::new(),
            inner: Mutex::new(Inner {
                phase: SwitchState::Idle,
                requested: None,
                active: None,
            }),
        }
    }

    /// Switch to `channel_id`.
    ///
    /// `Ok(true)` when the channel is active or a newer switch superseded
    /// this one; `Ok(false)` when the guard refused the switch or the server
    /// reported no membership. Backend failures return `Err` and leave the
    /// previous channel in place, unless the failing sequence was already
    /// superseded.
    pub async fn switch_to(&self, channel_id: &str) -> Result<bool> {
        // Every attempt, guarded or not, takes a new epoch.
        let token = self.epochs.advance();
        let current = {
            let inner = self.lock();
            inner
                .requested
                .clone()
                .or_else(|| inner.active_id().map(str::to_string))
        };

        let decision = self
            .guard
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .check(channel_id, current.as_deref(), Instant::now());
        if decision != GuardDecision::Allow {
            {
                let mut inner = self.lock();
                if token.is_current() {
                    inner.settle_phase();
                }
            }
            let channel_id = channel_id.to_string();
            if decision == GuardDecision::Reload {
                self.bus.emit(GatewayEvent::ReloadRequested { channel_id });
            } else {
                debug!(channel_id, "switch blocked");
                self.bus.emit(GatewayEvent::SwitchBlocked { channel_id });
            }
            return Ok(false);
        }

        {
            let mut inner = self.lock();
            if token.is_superseded() {
                return Ok(true);
            }
            if inner.active_id() == Some(channel_id) {
                // Back to the channel we never left; cancels any switch in flight.
                inner.settle_phase();
                return Ok(true);
            }
            inner.requested = Some(channel_id.to_string());
        }
        debug!(channel_id, epoch = token.epoch(), "channel switch started");

        match self.run_switch(&token, channel_id).await {
            Ok(outcome) => Ok(outcome),
            Err(e) if token.is_superseded() => {
                debug!(channel_id, error = %e, "superseded channel switch failed");
                Ok(true)
            }
            Err(e) => {
                {
                    let mut inner = self.lock();
                    if token.is_current() {
                        inner.settle_phase();
                    }
                }
                warn!(channel_id, error = %e, "channel switch failed");
                Err(e)
            }
        }
    }

    async fn run_switch(&self, token: &EpochToken, channel_id: &str) -> Result<bool> {
        if self.enter_phase(token, SwitchState::ResolvingChannel) == SwitchState::Superseded {
            return Ok(true);
        }
        let channel = match self.directory.get(channel_id) {
            Some(channel) => channel,
            None => {
                let channel = self.backend.fetch_channel(channel_id).await?;
                if token.is_superseded() {
                    return Ok(true);
                }
                self.directory.insert(channel.clone());
                channel
            }
        };

        if self.enter_phase(token, SwitchState::Entering) == SwitchState::Superseded {
            return Ok(true);
        }
        let reply = self.backend.enter(channel_id).await?;
        if token.is_superseded() {
            return Ok(true);
        }
        let Some(member) = reply.member else {
            let restored = {
                let mut inner = self.lock();
                if token.is_superseded() {
                    return Ok(true);
                }
                inner.settle_phase();
                inner.active_id().map(str::to_string)
            };
            warn!(channel_id, restored = ?restored, "no membership in channel; staying put");
            self.bus.emit(GatewayEvent::ChannelAccessLost {
                channel_id: channel_id.to_string(),
                restored,
            });
            return Ok(false);
        };
        let first_unread_message_id = reply.first_unread_message_id;
        self.bus.emit(GatewayEvent::ChannelEntered {
            channel_id: channel_id.to_string(),
            first_unread_message_id: first_unread_message_id.clone(),
        });

        if self.enter_phase(token, SwitchState::LoadingIdentities) == SwitchState::Superseded {
            return Ok(true);
        }
        let identities = self.backend.load_identities(channel_id).await?;

        if self.enter_phase(token, SwitchState::WarmingPermissions) == SwitchState::Superseded {
            return Ok(true);
        }
        let permissions = self.backend.fetch_permissions(channel_id).await?;
        if token.is_superseded() {
            return Ok(true);
        }
        self.permissions.put(channel_id, permissions).await;

        {
            let mut inner = self.lock();
            if token.is_superseded() {
                return Ok(true);
            }
            inner.active = Some(ActiveChannelSession {
                channel,
                member,
                first_unread_message_id,
                identities,
            });
            self.directory.reset_unread(channel_id);
            inner.settle_phase();
        }
        info!(channel_id, epoch = token.epoch(), "channel active");
        self.bus.emit(GatewayEvent::ChannelActivated {
            channel_id: channel_id.to_string(),
        });
        Ok(true)
    }

    /// Move to `phase` if `token` still owns the machine.
    ///
    /// Returns the state of the calling sequence: `phase`, or `Superseded`
    /// when a newer switch owns the machine. A superseded sequence leaves
    /// the machine's phase to the newer one.
    fn enter_phase(&self, token: &EpochToken, phase: SwitchState) -> SwitchState {
        let mut inner = self.lock();
        if token.is_superseded() {
            debug!(epoch = token.epoch(), ?phase, "channel switch superseded");
            return SwitchState::Superseded;
        }
        debug_assert!(inner.phase.next() == Some(phase) || phase == SwitchState::ResolvingChannel);
        inner.phase = phase;
        phase
    }

    pub fn phase(&self) -> SwitchState {
        self.lock().phase
    }

    pub fn active_channel_id(&self) -> Option<String> {
        self.lock().active_id().map(str::to_string)
    }

    pub fn active_session(&self) -> Option<ActiveChannelSession> {
        self.lock().active.clone()
    }

    /// Cached permissions for `channel_id`, if warmed and not expired.
    pub async fn permissions(&self, channel_id: &str) -> Option<ChannelPermissions> {
        self.permissions.get(channel_id).await
    }

    pub fn directory(&self) -> &Arc<ChannelDirectory> {
        &self.directory
    }

    /// Cancel any switch in flight and forget the active channel.
    pub fn reset(&self) {
        let _ = self.epochs.advance();
        {
            let mut inner = self.lock();
            inner.active = None;
            inner.settle_phase();
        }
        self.guard.lock().unwrap_or_else(|e| e.into_inner()).reset();
        self.permissions.invalidate_all();
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::gateway::events::EventKind;
    use crate::gateway::protocol::EnterChannelReply;
    use async_trait::async_trait;
    use std::collections::{HashMap, HashSet};
    use std::time::Duration;

    #[derive(Default)]
    struct FakeBackend {
        calls: Mutex<Vec<String>>,
        enter_delay: HashMap<String, Duration>,
        no_member: HashSet<String>,
        failing: HashSet<String>,
    }

    impl FakeBackend {
        fn record(&self, step: &str, channel_id: &str) {
            self.calls
                .lock()
                .unwrap()
                .push(format!("{}:{}", step, channel_id));
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ChannelBackend for FakeBackend {
        async fn fetch_channel(&self, channel_id: &str) -> Result<ChannelInfo> {
            self.record("info", channel_id);
            Ok(ChannelInfo {
                id: channel_id.to_string(),
                name: channel_id.to_uppercase(),
                world_id: None,
                archived: false,
            })
        }

        async fn enter(&self, channel_id: &str) -> Result<EnterChannelReply> {
            self.record("enter", channel_id);
            if let Some(delay) = self.enter_delay.get(channel_id) {
                tokio::time::sleep(*delay).await;
            }
            if self.failing.contains(channel_id) {
                return Err(Error::Api {
                    api: "channel.enter".to_string(),
                    message: "boom".to_string(),
                    data: None,
                });
            }
            if self.no_member.contains(channel_id) {
                return Ok(EnterChannelReply::default());
            }
            Ok(EnterChannelReply {
                member: Some(MemberRecord {
                    id: format!("m-{}", channel_id),
                    user_id: Some("u-1".to_string()),
                    nickname: None,
                    extra: HashMap::new(),
                }),
                first_unread_message_id: Some(format!("{}-m1", channel_id)),
            })
        }

        async fn load_identities(&self, channel_id: &str) -> Result<ChannelIdentities> {
            self.record("identities", channel_id);
            Ok(ChannelIdentities::default())
        }

        async fn fetch_permissions(&self, channel_id: &str) -> Result<ChannelPermissions> {
            self.record("permissions", channel_id);
            Ok(ChannelPermissions {
                permissions: vec!["message.send".to_string()],
            })
        }
    }

    fn machine(backend: FakeBackend) -> (Arc<ChannelSessionMachine>, Arc<FakeBackend>, Arc<EventBus>) {
        let backend = Arc::new(backend);
        let bus = Arc::new(EventBus::new());
        let machine = ChannelSessionMachine::new(
            Arc::clone(&backend) as Arc<dyn ChannelBackend>,
            Arc::new(ChannelDirectory::new()),
            &GuardConfig::default(),
            Arc::clone(&bus),
        );
        (Arc::new(machine), backend, bus)
    }

    fn record_events(bus: &EventBus) -> Arc<Mutex<Vec<GatewayEvent>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        bus.on_all(move |event| sink.lock().unwrap().push(event.clone()));
        seen
    }

    #[test]
    fn phases_follow_in_order() {
        let mut phase = SwitchState::Idle;
        let mut seen = vec![phase];
        while let Some(next) = phase.next() {
            phase = next;
            seen.push(phase);
            if phase == SwitchState::Active {
                break;
            }
        }
        assert_eq!(
            seen,
            vec![
                SwitchState::Idle,
                SwitchState::ResolvingChannel,
                SwitchState::Entering,
                SwitchState::LoadingIdentities,
                SwitchState::WarmingPermissions,
                SwitchState::Active,
            ]
        );
        assert_eq!(SwitchState::Superseded.next(), None);
    }

    #[tokio::test]
    async fn switch_walks_every_step() {
        let (machine, backend, bus) = machine(FakeBackend::default());
        let events = record_events(&bus);
        machine.directory().set_unread("a", 7);

        assert!(machine.switch_to("a").await.unwrap());
        assert_eq!(machine.active_channel_id().as_deref(), Some("a"));
        assert_eq!(machine.phase(), SwitchState::Active);
        assert_eq!(
            backend.calls(),
            vec!["info:a", "enter:a", "identities:a", "permissions:a"]
        );
        assert_eq!(machine.directory().unread("a"), 0);
        assert!(machine
            .permissions("a")
            .await
            .is_some_and(|p| p.allows("message.send")));

        let session = machine.active_session().unwrap();
        assert_eq!(session.first_unread_message_id.as_deref(), Some("a-m1"));
        assert_eq!(
            *events.lock().unwrap(),
            vec![
                GatewayEvent::ChannelEntered {
                    channel_id: "a".to_string(),
                    first_unread_message_id: Some("a-m1".to_string()),
                },
                GatewayEvent::ChannelActivated {
                    channel_id: "a".to_string()
                },
            ]
        );
    }

    #[tokio::test]
    async fn known_channel_skips_fetch_and_same_channel_is_noop() {
        let (machine, backend, _bus) = machine(FakeBackend::default());
        machine.directory().insert(ChannelInfo {
            id: "a".to_string(),
            name: "A".to_string(),
            world_id: None,
            archived: false,
        });

        assert!(machine.switch_to("a").await.unwrap());
        assert!(machine.switch_to("a").await.unwrap());
        assert_eq!(backend.calls(), vec!["enter:a", "identities:a", "permissions:a"]);
    }

    #[tokio::test]
    async fn missing_member_restores_previous_channel() {
        let (machine, _backend, bus) = machine(FakeBackend {
            no_member: HashSet::from(["b".to_string()]),
            ..FakeBackend::default()
        });
        assert!(machine.switch_to("a").await.unwrap());
        let events = record_events(&bus);

        assert!(!machine.switch_to("b").await.unwrap());
        assert_eq!(machine.active_channel_id().as_deref(), Some("a"));
        assert_eq!(machine.phase(), SwitchState::Active);
        assert_eq!(
            *events.lock().unwrap(),
            vec![GatewayEvent::ChannelAccessLost {
                channel_id: "b".to_string(),
                restored: Some("a".to_string()),
            }]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn later_switch_supersedes_earlier() {
        let (machine, backend, bus) = machine(FakeBackend {
            enter_delay: HashMap::from([("a".to_string(), Duration::from_millis(200))]),
            ..FakeBackend::default()
        });
        let activated = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&activated);
        bus.on(EventKind::ChannelActivated, move |event| {
            if let GatewayEvent::ChannelActivated { channel_id } = event {
                sink.lock().unwrap().push(channel_id.clone());
            }
        });

        let slow = tokio::spawn({
            let machine = Arc::clone(&machine);
            async move { machine.switch_to("a").await }
        });
        tokio::task::yield_now().await;
        assert!(machine.switch_to("b").await.unwrap());
        assert!(slow.await.unwrap().unwrap());

        assert_eq!(machine.active_channel_id().as_deref(), Some("b"));
        assert_eq!(*activated.lock().unwrap(), vec!["b".to_string()]);
        let calls = backend.calls();
        assert!(!calls.contains(&"identities:a".to_string()));
        assert!(!calls.contains(&"permissions:a".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn failed_step_of_superseded_switch_is_not_an_error() {
        let (machine, _backend, _bus) = machine(FakeBackend {
            enter_delay: HashMap::from([("a".to_string(), Duration::from_millis(200))]),
            failing: HashSet::from(["a".to_string()]),
            ..FakeBackend::default()
        });

        let slow = tokio::spawn({
            let machine = Arc::clone(&machine);
            async move { machine.switch_to("a").await }
        });
        tokio::task::yield_now().await;
        assert!(machine.switch_to("b").await.unwrap());

        assert!(slow.await.unwrap().unwrap());
        assert_eq!(machine.active_channel_id().as_deref(), Some("b"));
        assert_eq!(machine.phase(), SwitchState::Active);
    }

    #[tokio::test]
    async fn stale_sequence_reports_superseded_and_keeps_fresh_phase() {
        let (machine, _backend, _bus) = machine(FakeBackend::default());
        let stale = machine.epochs.advance();
        assert_eq!(
            machine.enter_phase(&stale, SwitchState::ResolvingChannel),
            SwitchState::ResolvingChannel
        );

        let fresh = machine.epochs.advance();
        assert_eq!(
            machine.enter_phase(&fresh, SwitchState::ResolvingChannel),
            SwitchState::ResolvingChannel
        );
        assert_eq!(
            machine.enter_phase(&stale, SwitchState::Entering),
            SwitchState::Superseded
        );
        assert_eq!(machine.phase(), SwitchState::ResolvingChannel);
    }

    #[tokio::test]
    async fn backend_error_keeps_previous_channel() {
        let (machine, _backend, _bus) = machine(FakeBackend {
            failing: HashSet::from(["b".to_string()]),
            ..FakeBackend::default()
        });
        assert!(machine.switch_to("a").await.unwrap());

        let err = machine.switch_to("b").await.unwrap_err();
        assert_eq!(err.api_message(), Some("boom"));
        assert_eq!(machine.active_channel_id().as_deref(), Some("a"));
        assert_eq!(machine.phase(), SwitchState::Active);
    }

    #[tokio::test(start_paused = true)]
    async fn thrash_requests_reload_then_blocks() {
        let (machine, _backend, bus) = machine(FakeBackend::default());
        let events = record_events(&bus);

        let mut outcomes = Vec::new();
        for target in ["a", "b", "a", "b", "a", "b", "a"] {
            outcomes.push(machine.switch_to(target).await.unwrap());
        }
        assert_eq!(outcomes, vec![true, true, true, true, true, false, false]);
        assert_eq!(machine.active_channel_id().as_deref(), Some("a"));

        let events = events.lock().unwrap();
        assert!(events.contains(&GatewayEvent::ReloadRequested {
            channel_id: "b".to_string()
        }));
        assert!(events.contains(&GatewayEvent::SwitchBlocked {
            channel_id: "a".to_string()
        }));
    }

    #[tokio::test(start_paused = true)]
    async fn refused_switch_cancels_the_one_in_flight() {
        let (machine, backend, bus) = machine(FakeBackend {
            enter_delay: HashMap::from([("a".to_string(), Duration::from_millis(200))]),
            ..FakeBackend::default()
        });
        for target in ["a", "b", "a", "b"] {
            assert!(machine.switch_to(target).await.unwrap());
        }
        let events = record_events(&bus);
        let before = backend.calls().len();

        let fifth = tokio::spawn({
            let machine = Arc::clone(&machine);
            async move { machine.switch_to("a").await }
        });
        tokio::task::yield_now().await;
        assert_eq!(machine.phase(), SwitchState::Entering);

        assert!(!machine.switch_to("b").await.unwrap());
        assert_eq!(machine.phase(), SwitchState::Active);
        assert!(fifth.await.unwrap().unwrap());

        assert_eq!(machine.active_channel_id().as_deref(), Some("b"));
        assert_eq!(backend.calls()[before..].to_vec(), vec!["enter:a".to_string()]);
        assert_eq!(
            *events.lock().unwrap(),
            vec![GatewayEvent::ReloadRequested {
                channel_id: "b".to_string()
            }]
        );
    }
}
