//! Debounce deadline bookkeeping.
//!
//! One pending deadline at most. Every qualifying event pushes it back by the
//! full delay; the async side sleeps until [`Debouncer::deadline`].

use std::time::{Duration, Instant};

/// Default delay between the last editor change and the CRDT commit.
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(300);

/// A restartable single deadline.
#[derive(Debug, Clone)]
pub struct Debouncer {
    delay: Duration,
    deadline: Option<Instant>,
}

impl Default for Debouncer {
    fn default() -> Self {
        Self::new(DEFAULT_DEBOUNCE)
    }
}

impl Debouncer {
    /// Create a debouncer with the given delay.
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            deadline: None,
        }
    }

    /// The configured delay.
    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// (Re)start the timer from `now`.
    pub fn schedule(&mut self, now: Instant) -> Instant {
        let deadline = now + self.delay;
        self.deadline = Some(deadline);
        deadline
    }

    /// Pending deadline, if any.
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Whether a deadline is pending.
    pub fn is_pending(&self) -> bool {
        self.deadline.is_some()
    }

    /// Clear the pending deadline. Returns whether one was pending.
    pub fn cancel(&mut self) -> bool {
        self.deadline.take().is_some()
    }

    /// Clear and return true if the deadline has passed at `now`.
    pub fn fire_if_due(&mut self, now: Instant) -> bool {
        match self.deadline {
            Some(deadline) if now >= deadline => {
                self.deadline = None;
                true
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_delay_is_300ms() {
        assert_eq!(Debouncer::default().delay(), Duration::from_millis(300));
    }

    #[test]
    fn schedule_restarts_deadline() {
        let mut debouncer = Debouncer::new(Duration::from_millis(100));
        let t0 = Instant::now();

        let first = debouncer.schedule(t0);
        let second = debouncer.schedule(t0 + Duration::from_millis(50));

        assert!(second > first);
        assert_eq!(debouncer.deadline(), Some(second));
    }

    #[test]
    fn fires_once_when_due() {
        let mut debouncer = Debouncer::new(Duration::from_millis(100));
        let t0 = Instant::now();
        debouncer.schedule(t0);

        assert!(!debouncer.fire_if_due(t0 + Duration::from_millis(99)));
        assert!(debouncer.fire_if_due(t0 + Duration::from_millis(100)));
        assert!(!debouncer.fire_if_due(t0 + Duration::from_millis(200)));
        assert!(!debouncer.is_pending());
    }

    #[test]
    fn cancel_clears() {
        let mut debouncer = Debouncer::default();
        assert!(!debouncer.cancel());

        debouncer.schedule(Instant::now());
        assert!(debouncer.cancel());
        assert!(debouncer.deadline().is_none());
    }
}
