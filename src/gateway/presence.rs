//! Presence heartbeat and latency prober.
//!
//! Both loops run only while the connection is `Connected`. The connection
//! manager calls [`Presence::start`] on ready and [`Presence::stop`] on every
//! disconnect or reconnect; `start` always stops first, so timers never pile
//! up across reconnects.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, trace};

use super::events::{EventBus, GatewayEvent};
use super::protocol::{ClientFrame, HeartbeatBody, LatencyProbeBody};
use super::transport::FrameSender;
use crate::config::PresenceConfig;

/// Wall clock in milliseconds since the Unix epoch
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Spacing rule for explicit heartbeats.
#[derive(Debug, Clone)]
pub struct HeartbeatThrottle {
    min_spacing: Duration,
    last_sent: Option<Instant>,
}

impl HeartbeatThrottle {
    pub fn new(min_spacing: Duration) -> Self {
        Self {
            min_spacing,
            last_sent: None,
        }
    }

    /// Whether an explicit heartbeat may go out at `now`.
    pub fn allows(&self, now: Instant) -> bool {
        self.last_sent
            .map_or(true, |last| now.saturating_duration_since(last) >= self.min_spacing)
    }

    /// Record that a heartbeat (periodic or explicit) went out.
    pub fn record(&mut self, now: Instant) {
        self.last_sent = Some(now);
    }

    pub fn reset(&mut self) {
        self.last_sent = None;
    }
}

/// Outstanding latency probes and the last accepted round trip.
#[derive(Debug, Clone)]
pub struct LatencyTracker {
    probes: HashMap<String, i64>,
    timeout_ms: i64,
    max_latency_ms: u64,
    last: Option<u64>,
}

impl LatencyTracker {
    pub fn new(timeout: Duration, max_latency_ms: u64) -> Self {
        Self {
            probes: HashMap::new(),
            timeout_ms: i64::try_from(timeout.as_millis()).unwrap_or(i64::MAX),
            max_latency_ms,
            last: None,
        }
    }

    /// Register a new probe sent at `now_ms`.
    pub fn begin(&mut self, now_ms: i64) -> LatencyProbeBody {
        self.prune(now_ms);
        let id = uuid::Uuid::new_v4().simple().to_string();
        self.probes.insert(id.clone(), now_ms);
        LatencyProbeBody {
            id,
            client_sent_at: now_ms,
        }
    }

    /// Match an ack for probe `id` received at `now_ms`.
    ///
    /// Returns the round trip only if the probe is still outstanding and the
    /// value falls within `[0, max_latency_ms]`. Out-of-range values are clock
    /// artifacts and are dropped without touching the last measurement.
    pub fn ack(&mut self, id: &str, now_ms: i64) -> Option<u64> {
        self.prune(now_ms);
        let sent_at = self.probes.remove(id)?;
        let rtt = u64::try_from(now_ms - sent_at).ok()?;
        if rtt > self.max_latency_ms {
            return None;
        }
        self.last = Some(rtt);
        Some(rtt)
    }

    /// Drop probes unanswered for longer than the timeout.
    pub fn prune(&mut self, now_ms: i64) {
        let timeout = self.timeout_ms;
        self.probes.retain(|_, sent_at| now_ms - *sent_at <= timeout);
    }

    pub fn clear(&mut self) {
        self.probes.clear();
    }

    pub fn outstanding(&self) -> usize {
        self.probes.len()
    }

    pub fn last(&self) -> Option<u64> {
        self.last
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Beat {
    Sent,
    Throttled,
    Closed,
}

struct PresenceState {
    focused: bool,
    throttle: HeartbeatThrottle,
    latency: LatencyTracker,
    sender: Option<FrameSender>,
    epoch: u64,
    tasks: Vec<JoinHandle<()>>,
}

/// Heartbeat and latency loops for the current connection
pub struct Presence {
    config: PresenceConfig,
    token: SecretString,
    bus: Arc<EventBus>,
    state: Mutex<PresenceState>,
}

impl Presence {
    pub fn new(config: PresenceConfig, token: SecretString, bus: Arc<EventBus>) -> Self {
        let state = PresenceState {
            focused: true,
            throttle: HeartbeatThrottle::new(config.heartbeat_throttle),
            latency: LatencyTracker::new(config.probe_timeout, config.max_latency_ms),
            sender: None,
            epoch: 0,
            tasks: Vec::new(),
        };
        Self {
            config,
            token,
            bus,
            state: Mutex::new(state),
        }
    }

    /// Start both loops for connection `epoch`, writing through `sender`.
    pub fn start(self: &Arc<Self>, epoch: u64, sender: FrameSender) {
        self.stop();
        {
            let mut state = self.lock();
            state.sender = Some(sender);
            state.epoch = epoch;
        }

        let heartbeat = {
            let this = Arc::clone(self);
            let period = self.config.heartbeat_interval;
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(period);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                loop {
                    ticker.tick().await;
                    if this.send_heartbeat(false) == Beat::Closed {
                        break;
                    }
                }
            })
        };

        let prober = {
            let this = Arc::clone(self);
            let period = self.config.probe_interval;
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(period);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                loop {
                    ticker.tick().await;
                    if !this.send_probe() {
                        break;
                    }
                }
            })
        };

        self.lock().tasks = vec![heartbeat, prober];
        debug!(epoch, "presence loops started");
    }

    /// Stop both loops and forget outstanding probes.
    pub fn stop(&self) {
        let mut state = self.lock();
        for task in state.tasks.drain(..) {
            task.abort();
        }
        if state.sender.take().is_some() {
            debug!(epoch = state.epoch, "presence loops stopped");
        }
        state.latency.clear();
        state.throttle.reset();
    }

    pub fn is_running(&self) -> bool {
        self.lock().sender.is_some()
    }

    /// Update focus; sends a heartbeat right away unless throttled.
    pub fn set_focused(&self, focused: bool) -> bool {
        let changed = {
            let mut state = self.lock();
            let changed = state.focused != focused;
            state.focused = focused;
            changed
        };
        changed && self.send_heartbeat(true) == Beat::Sent
    }

    pub fn focused(&self) -> bool {
        self.lock().focused
    }

    /// Explicit heartbeat, suppressed when one went out within the throttle window.
    pub fn send_now(&self) -> bool {
        self.send_heartbeat(true) == Beat::Sent
    }

    /// Handle a latency ack from the server.
    pub fn on_latency_ack(&self, body: &LatencyProbeBody) -> Option<u64> {
        let rtt = self.lock().latency.ack(&body.id, now_millis());
        match rtt {
            Some(millis) => {
                trace!(millis, "latency measured");
                self.bus.emit(GatewayEvent::LatencyMeasured { millis });
            }
            None => debug!(probe = %body.id, "latency ack discarded"),
        }
        rtt
    }

    /// Last accepted round trip in milliseconds
    pub fn latency(&self) -> Option<u64> {
        self.lock().latency.last()
    }

    pub fn outstanding_probes(&self) -> usize {
        self.lock().latency.outstanding()
    }

    fn send_heartbeat(&self, explicit: bool) -> Beat {
        let mut state = self.lock();
        let Some(sender) = state.sender.clone() else {
            return Beat::Closed;
        };
        let now = Instant::now();
        if explicit && !state.throttle.allows(now) {
            trace!("explicit heartbeat throttled");
            return Beat::Throttled;
        }

        let frame = ClientFrame::Heartbeat(HeartbeatBody {
            token: self.token.expose_secret().to_string(),
            focused: state.focused,
            client_sent_at: now_millis(),
            latency: state.latency.last(),
        });
        let Ok(text) = frame.encode() else {
            return Beat::Throttled;
        };
        if sender.send(text).is_err() {
            return Beat::Closed;
        }
        state.throttle.record(now);
        Beat::Sent
    }

    fn send_probe(&self) -> bool {
        let mut state = self.lock();
        let Some(sender) = state.sender.clone() else {
            return false;
        };
        let body = state.latency.begin(now_millis());
        match ClientFrame::LatencyProbe(body).encode() {
            Ok(text) => sender.send(text).is_ok(),
            Err(_) => true,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, PresenceState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;
    use tokio::sync::mpsc;

    fn tracker() -> LatencyTracker {
        LatencyTracker::new(Duration::from_secs(8), 60_000)
    }

    #[test]
    fn ack_within_range_is_recorded() {
        let mut latency = tracker();
        let probe = latency.begin(1_000);
        assert_eq!(latency.ack(&probe.id, 1_120), Some(120));
        assert_eq!(latency.last(), Some(120));
        assert_eq!(latency.outstanding(), 0);
    }

    #[test]
    fn probe_older_than_timeout_never_matches() {
        let mut latency = tracker();
        let probe = latency.begin(0);
        assert_eq!(latency.ack(&probe.id, 8_001), None);
        assert_eq!(latency.last(), None);
    }

    #[test]
    fn stale_probes_are_pruned_when_new_ones_start() {
        let mut latency = tracker();
        latency.begin(0);
        latency.begin(5_000);
        latency.begin(9_000);
        assert_eq!(latency.outstanding(), 2);
    }

    #[test]
    fn negative_round_trip_is_discarded() {
        let mut latency = tracker();
        let probe = latency.begin(10_000);
        assert_eq!(latency.ack(&probe.id, 9_000), None);
        assert_eq!(latency.last(), None);
    }

    #[test]
    fn round_trip_above_ceiling_is_discarded() {
        let mut latency = LatencyTracker::new(Duration::from_secs(120), 60_000);
        let probe = latency.begin(0);
        assert_eq!(latency.ack(&probe.id, 60_001), None);

        let probe = latency.begin(0);
        assert_eq!(latency.ack(&probe.id, 60_000), Some(60_000));
    }

    #[test]
    fn throttle_spacing() {
        let mut throttle = HeartbeatThrottle::new(Duration::from_millis(1500));
        let t0 = Instant::now();
        assert!(throttle.allows(t0));
        throttle.record(t0);
        assert!(!throttle.allows(t0 + Duration::from_millis(1499)));
        assert!(throttle.allows(t0 + Duration::from_millis(1500)));
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<String>) -> Vec<Value> {
        let mut frames = Vec::new();
        while let Ok(text) = rx.try_recv() {
            frames.push(serde_json::from_str(&text).unwrap());
        }
        frames
    }

    #[tokio::test(start_paused = true)]
    async fn loops_tick_and_stop() {
        let presence = Arc::new(Presence::new(
            PresenceConfig::default(),
            SecretString::from("tok".to_string()),
            Arc::new(EventBus::new()),
        ));
        let (tx, mut rx) = mpsc::unbounded_channel();
        presence.start(1, tx);

        // First ticks fire immediately.
        tokio::time::sleep(Duration::from_millis(10)).await;
        let frames = drain(&mut rx);
        assert_eq!(frames.iter().filter(|f| f["op"] == 2).count(), 1);
        assert_eq!(frames.iter().filter(|f| f["op"] == 3).count(), 1);
        let heartbeat = frames.iter().find(|f| f["op"] == 2).unwrap();
        assert_eq!(heartbeat["body"]["token"], "tok");
        assert_eq!(heartbeat["body"]["focused"], true);

        tokio::time::sleep(Duration::from_secs(10)).await;
        let frames = drain(&mut rx);
        assert_eq!(frames.iter().filter(|f| f["op"] == 2).count(), 2);
        assert_eq!(frames.iter().filter(|f| f["op"] == 3).count(), 1);

        presence.stop();
        assert!(!presence.is_running());
        assert_eq!(presence.outstanding_probes(), 0);
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert!(drain(&mut rx).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn restart_does_not_duplicate_timers() {
        let presence = Arc::new(Presence::new(
            PresenceConfig::default(),
            SecretString::from("tok".to_string()),
            Arc::new(EventBus::new()),
        ));
        let (tx, mut rx) = mpsc::unbounded_channel();
        presence.start(1, tx.clone());
        presence.start(2, tx);
        tokio::time::sleep(Duration::from_millis(10)).await;
        drain(&mut rx);

        tokio::time::sleep(Duration::from_secs(5)).await;
        let heartbeats = drain(&mut rx).into_iter().filter(|f| f["op"] == 2).count();
        assert_eq!(heartbeats, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn focus_change_heartbeat_is_throttled() {
        let presence = Arc::new(Presence::new(
            PresenceConfig::default(),
            SecretString::from("tok".to_string()),
            Arc::new(EventBus::new()),
        ));
        let (tx, mut rx) = mpsc::unbounded_channel();
        presence.start(1, tx);
        tokio::time::sleep(Duration::from_millis(10)).await;
        drain(&mut rx);

        // A periodic heartbeat just went out, so the focus change is suppressed.
        assert!(!presence.set_focused(false));
        assert!(drain(&mut rx).is_empty());

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(presence.set_focused(true));
        let frames = drain(&mut rx);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0]["body"]["focused"], true);
    }

    #[tokio::test(start_paused = true)]
    async fn heartbeat_reports_accepted_latency() {
        let presence = Arc::new(Presence::new(
            PresenceConfig::default(),
            SecretString::from("tok".to_string()),
            Arc::new(EventBus::new()),
        ));
        let (tx, mut rx) = mpsc::unbounded_channel();
        presence.start(1, tx);
        tokio::time::sleep(Duration::from_millis(10)).await;
        let frames = drain(&mut rx);
        let probe = frames.iter().find(|f| f["op"] == 3).unwrap();
        let body: LatencyProbeBody = serde_json::from_value(probe["body"].clone()).unwrap();

        let rtt = presence.on_latency_ack(&body).unwrap();
        assert_eq!(presence.latency(), Some(rtt));

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(presence.send_now());
        let frames = drain(&mut rx);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0]["op"], 2);
        assert_eq!(frames[0]["body"]["latency"], rtt);
    }
}
