//! Failure gate: absorbs isolated refresh failures

/// Consecutive failures tolerated before an error is surfaced when stale
/// data is still on screen.
pub const DEFAULT_FAILURE_THRESHOLD: u32 = 2;

/// Decides whether a refresh failure reaches the user.
///
/// With prior data on screen a single missed tick is noise, so surfacing
/// waits for the threshold. On a fresh start there is nothing to show, so
/// the first failure surfaces immediately.
#[derive(Debug, Clone)]
pub struct FailureGate {
    failures: u32,
    threshold: u32,
}

impl FailureGate {
    pub fn new() -> Self {
        Self::with_threshold(DEFAULT_FAILURE_THRESHOLD)
    }

    pub fn with_threshold(threshold: u32) -> Self {
        Self {
            failures: 0,
            threshold: threshold.max(1),
        }
    }

    /// A refresh succeeded; the failure streak ends.
    pub fn record_success(&mut self) {
        self.failures = 0;
    }

    /// Record a failure and decide whether to surface it.
    pub fn should_surface(&mut self, had_prior_data: bool) -> bool {
        self.failures += 1;
        if !had_prior_data {
            return true;
        }
        self.failures >= self.threshold
    }

    pub fn reset(&mut self) {
        self.failures = 0;
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.failures
    }
}

impl Default for FailureGate {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_surfaces_immediately_without_prior_data() {
        let mut gate = FailureGate::new();
        assert!(gate.should_surface(false));
    }

    #[test]
    fn test_suppresses_first_failure_with_prior_data() {
        let mut gate = FailureGate::new();
        assert!(!gate.should_surface(true));
        assert!(gate.should_surface(true));
    }

    #[test]
    fn test_success_resets_streak() {
        let mut gate = FailureGate::new();
        assert!(!gate.should_surface(true));
        gate.record_success();
        assert!(!gate.should_surface(true));
        assert!(gate.should_surface(true));
    }

    #[test]
    fn test_custom_threshold() {
        let mut gate = FailureGate::with_threshold(3);
        assert!(!gate.should_surface(true));
        assert!(!gate.should_surface(true));
        assert!(gate.should_surface(true));
    }
}
