//! Restart backoff for crashed processing attempts.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Growth policy for the delay between consecutive crash restarts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackoffConfig {
    pub initial_delay: Duration,
    pub multiplier: u32,
    pub max_delay: Duration,
}

impl BackoffConfig {
    /// Creates a new backoff policy.
    ///
    /// `multiplier` is clamped to at least 2 so that each delay is strictly
    /// greater than the one before it until `max_delay` is reached.
    pub fn new(initial_delay: Duration, multiplier: u32, max_delay: Duration) -> Self {
        Self {
            initial_delay,
            multiplier: multiplier.max(2),
            max_delay: max_delay.max(initial_delay),
        }
    }

    /// Doubling from one second, capped at five minutes.
    pub fn doubling() -> Self {
        Self::new(Duration::from_secs(1), 2, Duration::from_secs(300))
    }

    /// Returns the delay for the `crash_index`-th consecutive crash (0-based).
    pub fn delay_for(&self, crash_index: u32) -> Duration {
        let factor = self.multiplier.checked_pow(crash_index);
        factor
            .and_then(|f| self.initial_delay.checked_mul(f))
            .map_or(self.max_delay, |d| d.min(self.max_delay))
    }
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self::doubling()
    }
}

/// Counts consecutive crashes within one `run` and hands out the next delay.
#[derive(Debug, Clone)]
pub struct Backoff {
    config: BackoffConfig,
    consecutive_crashes: u32,
}

impl Backoff {
    pub fn new(config: BackoffConfig) -> Self {
        Self {
            config,
            consecutive_crashes: 0,
        }
    }

    /// Records a crash and returns how long to wait before restarting.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.config.delay_for(self.consecutive_crashes);
        self.consecutive_crashes = self.consecutive_crashes.saturating_add(1);
        delay
    }

    /// Forgets previous crashes; the next delay starts from `initial_delay` again.
    pub fn reset(&mut self) {
        self.consecutive_crashes = 0;
    }

    pub fn consecutive_crashes(&self) -> u32 {
        self.consecutive_crashes
    }
}

/// Where the worker goes to wait out a backoff delay.
#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

/// Sleeps on the tokio timer.
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}
