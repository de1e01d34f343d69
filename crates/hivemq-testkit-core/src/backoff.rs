//! Capped exponential backoff for polling loops
//!
//! Readiness and start polling wait `initial * multiplier^(attempt-1)` between
//! probes, never longer than `max`. Nothing in the testkit uses this to retry a
//! failed operation; it only spaces out observations.

use std::time::Duration;

use crate::config::ReadinessSettings;

/// Polling interval policy
#[derive(Debug, Clone, PartialEq)]
pub struct BackoffPolicy {
    /// Delay before the second probe
    pub initial: Duration,
    /// Upper bound for any single delay
    pub max: Duration,
    /// Growth factor per attempt
    pub multiplier: f64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            initial: Duration::from_millis(100),
            max: Duration::from_secs(2),
            multiplier: 2.0,
        }
    }
}

impl BackoffPolicy {
    /// Create a policy; a multiplier below 1.0 is clamped to 1.0 (fixed interval)
    pub fn new(initial: Duration, max: Duration, multiplier: f64) -> Self {
        Self {
            initial,
            max: max.max(initial),
            multiplier: multiplier.max(1.0),
        }
    }

    /// Fixed interval polling
    pub fn fixed(interval: Duration) -> Self {
        Self::new(interval, interval, 1.0)
    }

    /// Build from readiness settings
    pub fn from_settings(settings: &ReadinessSettings) -> Self {
        Self::new(
            Duration::from_millis(settings.initial_interval_ms),
            Duration::from_millis(settings.max_interval_ms),
            settings.backoff_multiplier,
        )
    }

    /// Delay after the given attempt (1-indexed)
    pub fn delay(&self, attempt: u32) -> Duration {
        let attempt_index = attempt.saturating_sub(1);
        let base_ms = self.initial.as_millis() as f64 * self.multiplier.powf(attempt_index as f64);
        let capped_ms = base_ms.min(self.max.as_millis() as f64);
        Duration::from_millis(capped_ms as u64)
    }

    /// Iterator over successive delays
    pub fn delays(&self) -> impl Iterator<Item = Duration> + '_ {
        (1..).map(move |attempt| self.delay(attempt))
    }
}
