//! Activation tracking
//!
//! Tracing is active while at least one call to a target routine is on the
//! stack. Entry and exit callbacks move a signed counter; nested and
//! recursive calls simply stack up.

use std::sync::atomic::{AtomicI64, Ordering};

/// Process-wide reentrancy counter for target routines
///
/// The counter may go negative when an exit is observed without its entry
/// (tail calls, unwinding). That is tolerated: tracing stays off until enough
/// entries bring it back above zero.
#[derive(Debug, Default)]
pub struct ActivationTracker {
    depth: AtomicI64,
}

impl ActivationTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record entry into a target routine
    pub fn activate(&self) {
        self.depth.fetch_add(1, Ordering::Relaxed);
    }

    /// Record exit from a target routine
    pub fn deactivate(&self) {
        let prev = self.depth.fetch_sub(1, Ordering::Relaxed);
        if prev <= 0 {
            tracing::trace!(depth = prev - 1, "target exit without matching entry");
        }
    }

    /// Whether memory accesses should currently be recorded
    pub fn is_active(&self) -> bool {
        self.depth() > 0
    }

    /// Current counter value
    pub fn depth(&self) -> i64 {
        self.depth.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_starts_inactive() {
        let tracker = ActivationTracker::new();
        assert!(!tracker.is_active());
        assert_eq!(tracker.depth(), 0);
    }

    #[test]
    fn test_nesting_matches_counter_sign() {
        for n in 0..5i64 {
            for m in 0..5i64 {
                let tracker = ActivationTracker::new();
                (0..n).for_each(|_| tracker.activate());
                (0..m).for_each(|_| tracker.deactivate());
                assert_eq!(tracker.is_active(), n - m > 0, "n={n} m={m}");
            }
        }
    }

    #[test]
    fn test_underflow_is_tolerated() {
        let tracker = ActivationTracker::new();
        tracker.deactivate();
        tracker.deactivate();
        assert_eq!(tracker.depth(), -2);

        tracker.activate();
        tracker.activate();
        assert!(!tracker.is_active());

        tracker.activate();
        assert!(tracker.is_active());
    }
}
