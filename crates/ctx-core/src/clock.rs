//! Clock abstraction for testable time handling

use std::sync::{Arc, RwLock};
use std::time::Duration;

use crate::Timestamp;

/// A source of the current time
pub trait Clock: Send + Sync {
    fn now(&self) -> Timestamp;
}

/// Thread-safe shared clock
pub type SharedClock = Arc<dyn Clock>;

/// Wall clock
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        Timestamp::now()
    }
}

/// A controllable clock for tests and replays
#[derive(Debug, Clone)]
pub struct ManualClock {
    current: Arc<RwLock<Timestamp>>,
}

impl ManualClock {
    /// Create a clock starting at the given instant
    pub fn at(time: Timestamp) -> Self {
        Self {
            current: Arc::new(RwLock::new(time)),
        }
    }

    /// Set the current time
    pub fn set(&self, time: Timestamp) {
        let mut current = self.current.write().unwrap_or_else(|e| e.into_inner());
        *current = time;
    }

    /// Advance time by a duration
    pub fn advance(&self, duration: Duration) {
        let mut current = self.current.write().unwrap_or_else(|e| e.into_inner());
        *current = current.plus(duration);
    }

    /// Advance time by milliseconds
    pub fn advance_millis(&self, millis: i64) {
        let mut current = self.current.write().unwrap_or_else(|e| e.into_inner());
        *current = current.plus_millis(millis);
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::at(Timestamp::ZERO)
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Timestamp {
        *self.current.read().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manual_clock() {
        let clock = ManualClock::at(Timestamp::from_millis(1000));
        assert_eq!(clock.now().as_millis(), 1000);

        clock.advance(Duration::from_secs(2));
        assert_eq!(clock.now().as_millis(), 3000);

        clock.advance_millis(500);
        assert_eq!(clock.now().as_millis(), 3500);

        clock.set(Timestamp::from_millis(10));
        assert_eq!(clock.now().as_millis(), 10);
    }

    #[test]
    fn test_clones_share_time() {
        let clock = ManualClock::default();
        let shared: SharedClock = Arc::new(clock.clone());
        clock.advance_millis(42);
        assert_eq!(shared.now().as_millis(), 42);
    }

    #[test]
    fn test_system_clock_is_recent() {
        // 2020-01-01 in millis
        assert!(SystemClock.now().as_millis() > 1_577_836_800_000);
    }
}
