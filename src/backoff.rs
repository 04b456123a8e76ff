//! Reconnection schedule.

use std::time::Duration;

use tracing::warn;

use crate::error::Result;

/// Exponential backoff between reconnection attempts.
///
/// The first attempt runs immediately; attempt `n + 1` waits
/// `initial_delay * 2^(n - 1)`, capped at `max_delay`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// Delay after the first failed attempt.
    pub initial_delay: Duration,
    /// Upper bound for any single delay.
    pub max_delay: Duration,
    /// Total attempts before giving up.
    pub max_attempts: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            max_attempts: 10,
        }
    }
}

impl ReconnectPolicy {
    /// Create a policy.
    pub fn new(initial_delay: Duration, max_delay: Duration, max_attempts: u32) -> Self {
        Self {
            initial_delay,
            max_delay,
            max_attempts,
        }
    }

    /// Delay before retry number `retry` (0 = after the first failure).
    pub fn delay(&self, retry: u32) -> Duration {
        let factor = 2u32.checked_pow(retry).unwrap_or(u32::MAX);
        self.initial_delay
            .checked_mul(factor)
            .map_or(self.max_delay, |d| d.min(self.max_delay))
    }

    /// Run `op` until it succeeds or the attempts run out.
    ///
    /// `op` receives the 1-based attempt number; `sleep` is called between attempts.
    pub fn retry<T>(
        &self,
        mut op: impl FnMut(u32) -> Result<T>,
        mut sleep: impl FnMut(Duration),
    ) -> Option<T> {
        for attempt in 1..=self.max_attempts {
            match op(attempt) {
                Ok(value) => return Some(value),
                Err(e) => warn!(
                    attempt,
                    max_attempts = self.max_attempts,
                    error = %e,
                    "Connection attempt failed"
                ),
            }
            if attempt < self.max_attempts {
                sleep(self.delay(attempt - 1));
            }
        }
        None
    }
}
