/// Single-key token bucket
use std::time::Instant;

const SECONDS_PER_MINUTE: f64 = 60.0;

/// Credit pool for one rate limit key.
///
/// Holds `0 <= tokens <= capacity` at all times. The bucket itself is not
/// synchronized; the limiter wraps each one in its own mutex.
#[derive(Debug, Clone)]
pub struct TokenBucket {
    tokens: f64,
    last_update: Instant,
}

impl TokenBucket {
    /// Bucket holding `tokens` credits as of `now`.
    pub fn new(tokens: f64, now: Instant) -> Self {
        Self {
            tokens: tokens.max(0.0),
            last_update: now,
        }
    }

    /// Bucket starting with a full burst allowance.
    pub fn full(capacity: f64, now: Instant) -> Self {
        Self::new(capacity, now)
    }

    pub fn tokens(&self) -> f64 {
        self.tokens
    }

    pub fn last_update(&self) -> Instant {
        self.last_update
    }

    /// Refill for the time elapsed since the last update, then take one token
    /// if at least one is available.
    ///
    /// The refill is kept even when the call is denied. A `now` earlier than
    /// the last update counts as zero elapsed time.
    pub fn try_consume(&mut self, now: Instant, refill_per_minute: f64, capacity: f64) -> bool {
        let elapsed_minutes =
            now.saturating_duration_since(self.last_update).as_secs_f64() / SECONDS_PER_MINUTE;

        self.tokens = (self.tokens + elapsed_minutes * refill_per_minute).min(capacity);
        self.last_update = now;

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}
