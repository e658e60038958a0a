//! Fixed-interval gate throttling calls against the physical bridge.

use std::thread;
use std::time::{Duration, Instant};

use log::debug;

/// Grants one permit per `min_spacing`. Scheduling is separated from
/// sleeping so tests can drive `reserve` with synthetic instants instead of
/// waiting on a real clock.
#[derive(Debug)]
pub struct PollGate {
    min_spacing: Duration,
    next_slot: Option<Instant>,
}

impl PollGate {
    pub fn new(min_spacing: Duration) -> Self {
        PollGate {
            min_spacing,
            next_slot: None,
        }
    }

    /// Reserve the next permit as of `now`, returning how long the caller
    /// must wait before using it. An idle gate grants immediately and starts
    /// a fresh window from `now`.
    pub fn reserve(&mut self, now: Instant) -> Duration {
        let slot = match self.next_slot {
            Some(slot) if slot > now => slot,
            _ => now,
        };
        self.next_slot = Some(slot + self.min_spacing);
        slot - now
    }

    /// Block the calling thread until its permit is usable.
    pub fn wait_turn(&mut self) {
        let wait = self.reserve(Instant::now());
        if !wait.is_zero() {
            debug!("Poll: gating fetch for {:?}", wait);
            thread::sleep(wait);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn burst_of_five_is_spread_one_per_second() {
        let mut gate = PollGate::new(Duration::from_secs(1));
        let now = Instant::now();

        let waits: Vec<Duration> = (0..5).map(|_| gate.reserve(now)).collect();
        assert_eq!(
            waits,
            vec![
                Duration::ZERO,
                Duration::from_secs(1),
                Duration::from_secs(2),
                Duration::from_secs(3),
                Duration::from_secs(4),
            ]
        );

        // No two granted permits land inside the same one-second window.
        let granted: Vec<Instant> = waits.iter().map(|w| now + *w).collect();
        for pair in granted.windows(2) {
            assert!(pair[1] - pair[0] >= Duration::from_secs(1));
        }
    }

    #[test]
    fn idle_gate_grants_immediately_and_restarts_window() {
        let mut gate = PollGate::new(Duration::from_secs(1));
        let t0 = Instant::now();

        assert_eq!(gate.reserve(t0), Duration::ZERO);

        // Well past the window: no residual delay from the earlier permit.
        let t1 = t0 + Duration::from_secs(5);
        assert_eq!(gate.reserve(t1), Duration::ZERO);

        // The fresh window counts from t1, not from the stale slot.
        let t2 = t1 + Duration::from_millis(300);
        assert_eq!(gate.reserve(t2), Duration::from_millis(700));
    }

    #[test]
    fn partial_elapse_waits_the_remainder() {
        let mut gate = PollGate::new(Duration::from_secs(1));
        let t0 = Instant::now();
        gate.reserve(t0);
        assert_eq!(gate.reserve(t0 + Duration::from_millis(400)), Duration::from_millis(600));
    }
}
