//! Token bucket used to gate outbound requests.

use std::time::Instant;

/// Token bucket rate limiter.
///
/// Allows bursts up to `max_tokens`, refilling continuously at
/// `refill_rate_per_second`. Tokens never exceed `max_tokens` and a denied
/// consumption leaves the balance untouched.
#[derive(Debug, Clone)]
pub struct RateBucket {
    /// Current number of available tokens.
    tokens: f64,
    /// Maximum token capacity (burst limit).
    max_tokens: f64,
    /// Tokens added per second (sustained rate).
    refill_rate_per_second: f64,
    /// Last time tokens were refilled.
    last_refill_at: Instant,
}

impl RateBucket {
    /// Create a full bucket.
    ///
    /// # Arguments
    ///
    /// * `max_tokens` - Maximum number of tokens (burst limit)
    /// * `refill_rate_per_second` - Tokens added per second (sustained rate)
    #[must_use]
    pub fn new(max_tokens: u32, refill_rate_per_second: f64) -> Self {
        Self::new_at(max_tokens, refill_rate_per_second, Instant::now())
    }

    /// Create a full bucket whose refill clock starts at `now`.
    #[must_use]
    pub fn new_at(max_tokens: u32, refill_rate_per_second: f64, now: Instant) -> Self {
        Self {
            tokens: f64::from(max_tokens),
            max_tokens: f64::from(max_tokens),
            refill_rate_per_second: refill_rate_per_second.max(0.0),
            last_refill_at: now,
        }
    }

    /// Try to consume one token. Returns true if allowed, false if rate limited.
    pub fn try_consume(&mut self) -> bool {
        self.try_consume_at(Instant::now())
    }

    /// [`try_consume`](Self::try_consume) against an explicit clock.
    pub fn try_consume_at(&mut self, now: Instant) -> bool {
        self.refill(now);
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    /// Tokens currently available, after refilling up to `now`.
    pub fn available_at(&mut self, now: Instant) -> f64 {
        self.refill(now);
        self.tokens
    }

    /// Burst capacity.
    #[must_use]
    pub fn max_tokens(&self) -> f64 {
        self.max_tokens
    }

    fn refill(&mut self, now: Instant) {
        // A clock that runs backwards refills nothing.
        let elapsed_ms = now.saturating_duration_since(self.last_refill_at).as_secs_f64() * 1000.0;
        let new_tokens = elapsed_ms * self.refill_rate_per_second / 1000.0;
        self.tokens = (self.tokens + new_tokens).min(self.max_tokens);
        if now > self.last_refill_at {
            self.last_refill_at = now;
        }
    }
}
