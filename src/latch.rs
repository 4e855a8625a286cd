use std::sync::atomic::{AtomicBool, Ordering};

/// One-shot diagnostic latch for collapsing repeated failure notifications.
///
/// `entered()` returns true only on the transition into the failing state,
/// `cleared()` only on the transition out. Callers log on those edges and
/// stay quiet while the condition persists.
pub struct EdgeLatch {
    failing: AtomicBool,
}

impl EdgeLatch {
    /// Creates a latch in the non-failing state.
    pub const fn new() -> Self {
        Self {
            failing: AtomicBool::new(false),
        }
    }

    /// Marks the condition as failing. Returns true on the ok-to-failing edge.
    pub fn entered(&self) -> bool {
        !self.failing.swap(true, Ordering::Relaxed)
    }

    /// Marks the condition as cleared. Returns true on the failing-to-ok edge.
    pub fn cleared(&self) -> bool {
        self.failing.swap(false, Ordering::Relaxed)
    }

    /// Whether the condition is currently failing.
    pub fn is_failing(&self) -> bool {
        self.failing.load(Ordering::Relaxed)
    }
}

impl Default for EdgeLatch {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entered_fires_once_per_failure_run() {
        let latch = EdgeLatch::new();
        assert!(latch.entered());
        assert!(!latch.entered());
        assert!(!latch.entered());
        assert!(latch.is_failing());
    }

    #[test]
    fn test_cleared_fires_once_per_recovery() {
        let latch = EdgeLatch::new();
        assert!(!latch.cleared());

        latch.entered();
        assert!(latch.cleared());
        assert!(!latch.cleared());
        assert!(!latch.is_failing());
    }

    #[test]
    fn test_latch_rearms_after_recovery() {
        let latch = EdgeLatch::new();
        assert!(latch.entered());
        assert!(latch.cleared());
        assert!(latch.entered());
    }
}
