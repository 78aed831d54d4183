//! Reconnection Policy
//!
//! Linear backoff for WebSocket reconnection: attempt `k` waits
//! `base_delay * k`, capped at `max_delay`, with optional jitter. After
//! `max_attempts` the policy yields no further delay and the caller gives up.

use std::time::Duration;

use rand::Rng;

/// Configuration for reconnection behavior.
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Delay unit; attempt `k` waits `k` times this.
    pub base_delay: Duration,
    /// Maximum delay between reconnection attempts.
    pub max_delay: Duration,
    /// Jitter factor as a fraction (e.g., 0.1 = ±10% randomization).
    pub jitter_factor: f64,
    /// Maximum number of reconnection attempts (0 = unlimited).
    pub max_attempts: u32,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            jitter_factor: 0.0,
            max_attempts: 5,
        }
    }
}

impl ReconnectConfig {
    /// Create a new configuration with custom values.
    #[must_use]
    pub const fn new(
        base_delay: Duration,
        max_delay: Duration,
        jitter_factor: f64,
        max_attempts: u32,
    ) -> Self {
        Self {
            base_delay,
            max_delay,
            jitter_factor,
            max_attempts,
        }
    }

    /// Create configuration from `BookConfig`.
    #[must_use]
    pub const fn from_book_config(config: &crate::BookConfig) -> Self {
        Self {
            base_delay: config.reconnect_delay,
            max_delay: config.reconnect_delay_max,
            jitter_factor: 0.0,
            max_attempts: config.max_reconnect_attempts,
        }
    }
}

/// Reconnection policy implementing linear backoff with optional jitter.
///
/// # Example
///
/// ```rust
/// use kraken_orderbook::infrastructure::kraken::reconnect::{ReconnectConfig, ReconnectPolicy};
/// use std::time::Duration;
///
/// let mut policy = ReconnectPolicy::new(ReconnectConfig::default());
///
/// assert_eq!(policy.next_delay(), Some(Duration::from_secs(1)));
/// assert_eq!(policy.next_delay(), Some(Duration::from_secs(2)));
///
/// // Simulate successful connection
/// policy.reset();
/// assert_eq!(policy.attempt_count(), 0);
/// ```
#[derive(Debug)]
pub struct ReconnectPolicy {
    config: ReconnectConfig,
    attempt_count: u32,
}

impl ReconnectPolicy {
    /// Create a new reconnection policy.
    #[must_use]
    pub const fn new(config: ReconnectConfig) -> Self {
        Self {
            config,
            attempt_count: 0,
        }
    }

    /// Get the delay before the next attempt.
    ///
    /// Returns `None` if max attempts have been exceeded.
    #[must_use]
    pub fn next_delay(&mut self) -> Option<Duration> {
        if !self.should_retry() {
            return None;
        }

        self.attempt_count += 1;
        let linear = self
            .config
            .base_delay
            .saturating_mul(self.attempt_count)
            .min(self.config.max_delay);

        Some(self.apply_jitter(linear))
    }

    /// Reset the policy after a successful connection.
    pub const fn reset(&mut self) {
        self.attempt_count = 0;
    }

    /// Get the current attempt count.
    #[must_use]
    pub const fn attempt_count(&self) -> u32 {
        self.attempt_count
    }

    /// Configured attempt cap (0 = unlimited).
    #[must_use]
    pub const fn max_attempts(&self) -> u32 {
        self.config.max_attempts
    }

    /// Check if reconnection should continue.
    #[must_use]
    pub const fn should_retry(&self) -> bool {
        self.config.max_attempts == 0 || self.attempt_count < self.config.max_attempts
    }

    /// Apply jitter to a duration.
    fn apply_jitter(&self, duration: Duration) -> Duration {
        if self.config.jitter_factor <= 0.0 {
            return duration;
        }

        #[allow(clippy::cast_precision_loss)]
        let base_millis = duration.as_millis() as f64;
        let jitter_range = base_millis * self.config.jitter_factor;
        let mut rng = rand::rng();
        let jitter: f64 = rng.random_range(-jitter_range..=jitter_range);
        let adjusted_millis = (base_millis + jitter).max(1.0);

        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let adjusted_u64 = adjusted_millis as u64;
        Duration::from_millis(adjusted_u64)
    }
}
