//! Generation counters for cancellation by supersession.
//!
//! An [`EpochCounter`] is advanced whenever a new attempt starts (a connect,
//! a channel switch). Work scheduled for an attempt carries an [`EpochToken`]
//! and checks [`EpochToken::is_current`] at every checkpoint; once a newer
//! attempt exists the old work becomes a no-op instead of being aborted.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Shared, monotonically increasing generation counter.
#[derive(Debug, Clone, Default)]
pub struct EpochCounter {
    current: Arc<AtomicU64>,
}

impl EpochCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a new generation and return a token bound to it.
    pub fn advance(&self) -> EpochToken {
        let epoch = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        EpochToken {
            epoch,
            counter: self.clone(),
        }
    }

    /// Token for the generation that is current right now.
    pub fn token(&self) -> EpochToken {
        EpochToken {
            epoch: self.current(),
            counter: self.clone(),
        }
    }

    pub fn current(&self) -> u64 {
        self.current.load(Ordering::SeqCst)
    }
}

/// The generation a piece of work was scheduled under.
#[derive(Debug, Clone)]
pub struct EpochToken {
    epoch: u64,
    counter: EpochCounter,
}

impl EpochToken {
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// `false` once any newer generation has started.
    pub fn is_current(&self) -> bool {
        self.counter.current() == self.epoch
    }

    pub fn is_superseded(&self) -> bool {
        !self.is_current()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn newer_generation_supersedes_older_tokens() {
        let counter = EpochCounter::new();
        let first = counter.advance();
        assert_eq!(first.epoch(), 1);
        assert!(first.is_current());

        let second = counter.advance();
        assert!(first.is_superseded());
        assert!(second.is_current());
        assert_eq!(counter.current(), 2);
    }

    #[test]
    fn epochs_are_never_reused() {
        let counter = EpochCounter::new();
        let seen: Vec<u64> = (0..5).map(|_| counter.advance().epoch()).collect();
        assert_eq!(seen, vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn clones_share_the_counter() {
        let counter = EpochCounter::new();
        let token = counter.clone().advance();
        counter.advance();
        assert!(token.is_superseded());
    }
}
