//! Exponential backoff shared by discovery and the pairing handshake.
//!
//! Delays double per attempt from a base and are capped:
//! `min(base * 2^(attempt-1), cap)`. There is no jitter; only two peers
//! are involved, so there is no herd to spread out.

use std::time::Duration;

/// Default first retry delay (100 ms).
pub const DEFAULT_BACKOFF_BASE: Duration = Duration::from_millis(100);

/// Default ceiling for a single delay (5 s).
pub const DEFAULT_BACKOFF_CAP: Duration = Duration::from_millis(5000);

/// Exponential backoff policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    base: Duration,
    cap: Duration,
}

impl Backoff {
    /// Create a policy with the given base delay and cap.
    pub const fn new(base: Duration, cap: Duration) -> Self {
        Self { base, cap }
    }

    /// Delay before retry number `attempt` (1-based).
    ///
    /// Attempt 0 means "first try" and has no delay.
    pub fn delay(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let factor = 1u32.checked_shl(attempt - 1).unwrap_or(u32::MAX);
        self.base
            .checked_mul(factor)
            .map_or(self.cap, |d| d.min(self.cap))
    }

    /// Delays for retries `1..=retries`.
    pub fn schedule(&self, retries: u32) -> impl Iterator<Item = Duration> + '_ {
        (1..=retries).map(move |attempt| self.delay(attempt))
    }

    /// The cap.
    pub fn cap(&self) -> Duration {
        self.cap
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(DEFAULT_BACKOFF_BASE, DEFAULT_BACKOFF_CAP)
    }
}

/// Retries performed by one operation, kept for diagnostics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RetryTelemetry {
    /// Number of retries.
    pub retry_count: u32,
    /// Delay waited before each retry, in order.
    pub retry_delays: Vec<Duration>,
}

impl RetryTelemetry {
    /// Record one retry and the delay waited before it.
    pub fn record(&mut self, delay: Duration) {
        self.retry_count += 1;
        self.retry_delays.push(delay);
    }

    /// Total time spent waiting.
    pub fn total_delay(&self) -> Duration {
        self.retry_delays.iter().sum()
    }
}
