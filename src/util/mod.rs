//! Utility module
//!
//! Timing helpers shared by the bridge and the binary.

use std::time::{Duration, Instant};

/// Converts a duration to a floating-point number of milliseconds
pub fn duration_to_millis(duration: Duration) -> f64 {
    duration.as_secs_f64() * 1000.0
}

/// Opens at most once per interval.
///
/// The first call always opens. After that a call opens only once at least
/// `interval` has passed since the last time it opened; calls in between
/// leave the reference point untouched.
#[derive(Debug, Clone)]
pub struct IntervalGate {
    interval: Duration,
    last: Option<Instant>,
}

impl IntervalGate {
    pub fn new(interval: Duration) -> Self {
        IntervalGate {
            interval,
            last: None,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Reports whether the gate opens at `now`, and if so restarts the interval
    pub fn ready(&mut self, now: Instant) -> bool {
        match self.last {
            Some(last) if now.saturating_duration_since(last) < self.interval => false,
            _ => {
                self.last = Some(now);
                true
            }
        }
    }

    /// Time left until the gate opens again
    pub fn remaining(&self, now: Instant) -> Duration {
        match self.last {
            Some(last) => self
                .interval
                .saturating_sub(now.saturating_duration_since(last)),
            None => Duration::ZERO,
        }
    }

    /// Forgets the last opening so the next call opens
    pub fn reset(&mut self) {
        self.last = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duration_to_millis() {
        assert_eq!(duration_to_millis(Duration::from_micros(2500)), 2.5);
    }

    #[test]
    fn test_gate_at_most_once_per_interval() {
        let start = Instant::now();
        let mut gate = IntervalGate::new(Duration::from_millis(10));
        assert!(gate.ready(start));
        for ms in 1..10 {
            assert!(!gate.ready(start + Duration::from_millis(ms)), "opened at {}ms", ms);
        }
        assert!(gate.ready(start + Duration::from_millis(10)));
        assert!(!gate.ready(start + Duration::from_millis(19)));
        assert!(gate.ready(start + Duration::from_millis(25)));
    }

    #[test]
    fn test_gate_remaining_and_reset() {
        let start = Instant::now();
        let mut gate = IntervalGate::new(Duration::from_millis(10));
        assert_eq!(gate.remaining(start), Duration::ZERO);
        gate.ready(start);
        assert_eq!(gate.remaining(start + Duration::from_millis(4)), Duration::from_millis(6));
        gate.reset();
        assert!(gate.ready(start + Duration::from_millis(1)));
    }
}
