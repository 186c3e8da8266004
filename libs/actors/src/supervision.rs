//! Supervision
//!
//! Directives an actor returns from its failure hooks, plus the restart
//! window bookkeeping that turns repeated restarts into escalation.

use parking_lot::Mutex;
use std::time::{Duration, Instant};

/// Supervision directive for error handling
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorDirective {
    /// Resume processing
    Resume,
    /// Restart the actor (destroy then init on the same instance)
    Restart,
    /// Stop the actor and its subtree
    Stop,
    /// Escalate to parent supervisor
    Escalate,
}

/// What to do after `Actor::init` failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitFailureStrategy {
    /// Try again after the configured `init_retry_delay_ms`
    Retry,
    /// Try again after the delay, while attempts remain
    RetryAfter(Duration),
    /// Give up and stop the actor
    Stop,
}

impl InitFailureStrategy {
    pub fn retry_with_delay(delay: Duration) -> Self {
        InitFailureStrategy::RetryAfter(delay)
    }

    pub fn stop() -> Self {
        InitFailureStrategy::Stop
    }
}

/// Counts restarts within a sliding window
#[derive(Debug)]
pub struct RestartTracker {
    max_restarts: u32,
    window: Duration,
    state: Mutex<RestartWindow>,
}

#[derive(Debug, Default)]
struct RestartWindow {
    started: Option<Instant>,
    count: u32,
}

impl RestartTracker {
    pub fn new(max_restarts: u32, window: Duration) -> Self {
        Self {
            max_restarts,
            window,
            state: Mutex::new(RestartWindow::default()),
        }
    }

    /// Record a restart request; false once the window budget is spent
    pub fn should_restart(&self) -> bool {
        self.should_restart_at(Instant::now())
    }

    fn should_restart_at(&self, now: Instant) -> bool {
        let mut state = self.state.lock();
        match state.started {
            Some(start) if now.duration_since(start) <= self.window => {
                state.count += 1;
                state.count <= self.max_restarts
            }
            _ => {
                // First restart or window expired
                state.started = Some(now);
                state.count = 1;
                self.max_restarts > 0
            }
        }
    }

    /// Restarts counted in the current window
    pub fn restart_count(&self) -> u32 {
        self.state.lock().count
    }

    pub fn max_restarts(&self) -> u32 {
        self.max_restarts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_restart_limit_within_window() {
        let tracker = RestartTracker::new(2, Duration::from_secs(60));
        let now = Instant::now();

        assert!(tracker.should_restart_at(now));
        assert!(tracker.should_restart_at(now + Duration::from_secs(1)));
        assert!(!tracker.should_restart_at(now + Duration::from_secs(2)));
        assert_eq!(tracker.restart_count(), 3);
    }

    #[test]
    fn test_window_reset() {
        let tracker = RestartTracker::new(1, Duration::from_secs(10));
        let now = Instant::now();

        assert!(tracker.should_restart_at(now));
        assert!(!tracker.should_restart_at(now + Duration::from_secs(5)));
        assert!(tracker.should_restart_at(now + Duration::from_secs(11)));
        assert_eq!(tracker.restart_count(), 1);
    }

    #[test]
    fn test_zero_budget_never_restarts() {
        let tracker = RestartTracker::new(0, Duration::from_secs(10));
        assert!(!tracker.should_restart());
    }

    #[test]
    fn test_init_strategy_helpers() {
        assert_eq!(
            InitFailureStrategy::retry_with_delay(Duration::from_millis(5)),
            InitFailureStrategy::RetryAfter(Duration::from_millis(5))
        );
        assert_eq!(InitFailureStrategy::stop(), InitFailureStrategy::Stop);
    }
}
