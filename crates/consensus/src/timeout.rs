//! Stall detection.
//!
//! Rounds have no timeouts: a round waits until it gathers a quorum. The
//! [`StallMonitor`] only watches for a round that has not moved for a
//! configured number of ticks, so the engine can rebroadcast its own votes
//! and ask peers for blocks it may have missed.

use tracing::debug;

use crate::types::Step;

/// Counts ticks spent at the same `(number, step)`.
#[derive(Debug, Clone)]
pub struct StallMonitor {
    threshold: u32,
    position: (u64, Step),
    idle_ticks: u32,
}

impl StallMonitor {
    /// Monitor that fires after `threshold` unchanged ticks. Zero disables it.
    pub fn new(threshold: u32) -> Self {
        Self {
            threshold,
            position: (0, Step::NewNumber),
            idle_ticks: 0,
        }
    }

    /// Records a tick at `(number, step)`. Returns true when the round has
    /// been idle for `threshold` ticks; the count restarts after firing.
    pub fn observe(&mut self, number: u64, step: Step) -> bool {
        if self.position != (number, step) {
            self.position = (number, step);
            self.idle_ticks = 0;
            return false;
        }
        if self.threshold == 0 {
            return false;
        }
        self.idle_ticks += 1;
        if self.idle_ticks >= self.threshold {
            debug!(number, %step, ticks = self.idle_ticks, "round stalled");
            self.idle_ticks = 0;
            return true;
        }
        false
    }

    /// Ticks spent at the current position.
    pub fn idle_ticks(&self) -> u32 {
        self.idle_ticks
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fires_after_threshold_and_rearms() {
        let mut monitor = StallMonitor::new(3);
        assert!(!monitor.observe(1, Step::Prevote));
        assert!(!monitor.observe(1, Step::Prevote));
        assert!(!monitor.observe(1, Step::Prevote));
        assert!(monitor.observe(1, Step::Prevote));
        assert_eq!(monitor.idle_ticks(), 0);
        assert!(!monitor.observe(1, Step::Prevote));
    }

    #[test]
    fn test_progress_resets_count() {
        let mut monitor = StallMonitor::new(2);
        monitor.observe(1, Step::Prevote);
        monitor.observe(1, Step::Prevote);
        assert!(!monitor.observe(1, Step::Precommit));
        assert_eq!(monitor.idle_ticks(), 0);
    }

    #[test]
    fn test_zero_threshold_never_fires() {
        let mut monitor = StallMonitor::new(0);
        for _ in 0..100 {
            assert!(!monitor.observe(4, Step::Propose));
        }
    }
}
