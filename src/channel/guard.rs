//! Circuit breaker for channel thrash.
//!
//! Watches recent switch targets and trips when the user (or a runaway UI
//! binding) bounces between exactly two channels in quick succession.

use std::collections::VecDeque;
use std::time::Duration;

use tokio::time::Instant;
use tracing::warn;

use crate::config::{GuardConfig, ThrashAction};

/// Outcome of [`ChannelSwitchGuard::check`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardDecision {
    /// Proceed with the switch
    Allow,
    /// Drop the switch; it is not deferred
    Block,
    /// Drop the switch and restart the whole client
    Reload,
}

/// Tracks recent switch targets and detects alternation.
pub struct ChannelSwitchGuard {
    /// (target, requested at) within the window
    recent: VecDeque<(String, Instant)>,
    blocked_until: Option<Instant>,
    last_reload: Option<Instant>,
    window: Duration,
    min_switches: usize,
    block_for: Duration,
    reload_cooldown: Duration,
    action: ThrashAction,
}

impl ChannelSwitchGuard {
    pub fn new(config: &GuardConfig) -> Self {
        Self {
            recent: VecDeque::with_capacity(config.min_switches + 1),
            blocked_until: None,
            last_reload: None,
            window: config.window,
            min_switches: config.min_switches,
            block_for: config.block_for,
            reload_cooldown: config.reload_cooldown,
            action: config.action,
        }
    }

    /// Decide whether a switch from `current` to `target` may proceed.
    pub fn check(&mut self, target: &str, current: Option<&str>, now: Instant) -> GuardDecision {
        if self.is_blocked(now) {
            return GuardDecision::Block;
        }
        if current == Some(target) {
            return GuardDecision::Allow;
        }

        while let Some((_, at)) = self.recent.front() {
            if now.duration_since(*at) > self.window {
                self.recent.pop_front();
            } else {
                break;
            }
        }
        self.recent.push_back((target.to_string(), now));

        if !self.is_thrashing() {
            return GuardDecision::Allow;
        }

        self.recent.clear();
        self.blocked_until = Some(now + self.block_for);

        let cooled = self
            .last_reload
            .map_or(true, |at| now.duration_since(at) >= self.reload_cooldown);
        if self.action == ThrashAction::Reload && cooled {
            self.last_reload = Some(now);
            warn!(channel_id = target, "channel thrash detected; requesting reload");
            GuardDecision::Reload
        } else {
            warn!(channel_id = target, "channel thrash detected; blocking switches");
            GuardDecision::Block
        }
    }

    pub fn is_blocked(&self, now: Instant) -> bool {
        self.blocked_until.is_some_and(|until| now < until)
    }

    /// Forget recorded switches and any open block window.
    pub fn reset(&mut self) {
        self.recent.clear();
        self.blocked_until = None;
    }

    /// Exactly two distinct targets, enough records, strictly alternating.
    fn is_thrashing(&self) -> bool {
        if self.recent.len() < self.min_switches {
            return false;
        }
        let mut targets = self.recent.iter().map(|(t, _)| t.as_str());
        let Some(first) = targets.next() else {
            return false;
        };
        let Some(second) = self.recent.iter().map(|(t, _)| t.as_str()).find(|t| *t != first) else {
            return false;
        };
        let two_targets = self
            .recent
            .iter()
            .all(|(t, _)| t == first || t == second);
        let alternating = self
            .recent
            .iter()
            .zip(self.recent.iter().skip(1))
            .all(|((a, _), (b, _))| a != b);
        two_targets && alternating
    }
}

impl Default for ChannelSwitchGuard {
    fn default() -> Self {
        Self::new(&GuardConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn step(now: &mut Instant) -> Instant {
        *now += Duration::from_millis(100);
        *now
    }

    /// Alternate a/b starting from `current`, returning every decision.
    fn bounce(guard: &mut ChannelSwitchGuard, now: &mut Instant, times: usize) -> Vec<GuardDecision> {
        let mut current = "a";
        (0..times)
            .map(|_| {
                let target = if current == "a" { "b" } else { "a" };
                let decision = guard.check(target, Some(current), step(now));
                if decision == GuardDecision::Allow {
                    current = target;
                }
                decision
            })
            .collect()
    }

    #[test]
    fn sixth_alternating_switch_trips_and_seventh_is_blocked() {
        let mut guard = ChannelSwitchGuard::default();
        let mut now = Instant::now();
        let decisions = bounce(&mut guard, &mut now, 7);
        assert_eq!(&decisions[..5], &[GuardDecision::Allow; 5]);
        assert_eq!(decisions[5], GuardDecision::Reload);
        assert_eq!(decisions[6], GuardDecision::Block);
    }

    #[test]
    fn allowed_again_after_block_window() {
        let mut guard = ChannelSwitchGuard::default();
        let mut now = Instant::now();
        bounce(&mut guard, &mut now, 6);
        assert!(guard.is_blocked(now));

        now += Duration::from_millis(1600);
        assert!(!guard.is_blocked(now));
        assert_eq!(guard.check("c", Some("a"), now), GuardDecision::Allow);
    }

    #[test]
    fn reload_not_reissued_within_cooldown() {
        let mut guard = ChannelSwitchGuard::default();
        let mut now = Instant::now();
        assert_eq!(bounce(&mut guard, &mut now, 6)[5], GuardDecision::Reload);

        now += Duration::from_secs(2);
        assert_eq!(bounce(&mut guard, &mut now, 6)[5], GuardDecision::Block);

        now += Duration::from_secs(10);
        assert_eq!(bounce(&mut guard, &mut now, 6)[5], GuardDecision::Reload);
    }

    #[test]
    fn same_channel_is_never_recorded() {
        let mut guard = ChannelSwitchGuard::default();
        let mut now = Instant::now();
        for _ in 0..20 {
            assert_eq!(guard.check("a", Some("a"), step(&mut now)), GuardDecision::Allow);
        }
        assert!(guard.recent.is_empty());
    }

    #[test]
    fn three_targets_do_not_trip() {
        let mut guard = ChannelSwitchGuard::default();
        let mut now = Instant::now();
        let mut current = "c";
        for target in ["a", "b", "c", "a", "b", "c", "a", "b"] {
            assert_eq!(guard.check(target, Some(current), step(&mut now)), GuardDecision::Allow);
            current = target;
        }
    }

    #[test]
    fn slow_alternation_falls_out_of_window() {
        let mut guard = ChannelSwitchGuard::default();
        let mut now = Instant::now();
        let mut current = "a";
        for _ in 0..10 {
            now += Duration::from_millis(400);
            let target = if current == "a" { "b" } else { "a" };
            assert_eq!(guard.check(target, Some(current), now), GuardDecision::Allow);
            current = target;
        }
    }

    #[test]
    fn block_only_never_reloads() {
        let config = GuardConfig {
            action: ThrashAction::BlockOnly,
            ..GuardConfig::default()
        };
        let mut guard = ChannelSwitchGuard::new(&config);
        let mut now = Instant::now();
        assert_eq!(bounce(&mut guard, &mut now, 6)[5], GuardDecision::Block);
    }
}
