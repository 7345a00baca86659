//! Reconnect backoff with jitter.

use std::time::Duration;

/// Share of the base delay added as random jitter at most.
const JITTER_RATIO: f64 = 0.5;

/// Configuration for reconnect backoff.
///
/// `delay = min(base × multiplier^attempt, max)`, then up to half of that
/// again is added as jitter, so no delay exceeds `max × 1.5`.
#[derive(Debug, Clone, PartialEq)]
pub struct BackoffConfig {
    /// Delay before the first reconnect attempt.
    pub base_delay: Duration,
    /// Growth factor per attempt.
    pub multiplier: f64,
    /// Cap on the delay before jitter.
    pub max_delay: Duration,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(1),
            multiplier: 2.0,
            max_delay: Duration::from_secs(30),
        }
    }
}

impl BackoffConfig {
    /// Create a new backoff configuration with custom values.
    #[must_use]
    pub fn new(base_delay: Duration, multiplier: f64, max_delay: Duration) -> Self {
        Self {
            base_delay,
            multiplier,
            max_delay,
        }
    }

    /// Calculate the delay before jitter for a given attempt number (0-indexed).
    #[must_use]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base_ms = self.base_delay.as_secs_f64() * 1000.0;
        let max_ms = self.max_delay.as_secs_f64() * 1000.0;
        if base_ms <= 0.0 {
            return Duration::ZERO;
        }
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let raw_ms = base_ms * self.multiplier.max(1.0).powi(exponent);
        let capped_ms = if raw_ms.is_finite() {
            raw_ms.min(max_ms)
        } else {
            max_ms
        };
        millis_to_duration(capped_ms)
    }

    /// Delay for `attempt` plus jitter, where `unit` in `[0, 1]` picks how
    /// much of the jitter range is used.
    #[must_use]
    pub fn jittered_delay(&self, attempt: u32, unit: f64) -> Duration {
        let delay = self.delay_for_attempt(attempt);
        let unit = if unit.is_finite() {
            unit.clamp(0.0, 1.0)
        } else {
            0.0
        };
        let jitter_ms = delay.as_secs_f64() * 1000.0 * JITTER_RATIO * unit;
        delay + millis_to_duration(jitter_ms)
    }

    /// Delay for `attempt` with random jitter.
    #[must_use]
    pub fn next_delay(&self, attempt: u32) -> Duration {
        self.jittered_delay(attempt, rand::random::<f64>())
    }
}

/// Round to whole microseconds so float noise never shaves a nanosecond off.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn millis_to_duration(ms: f64) -> Duration {
    Duration::from_micros((ms.max(0.0) * 1000.0).round() as u64)
}
