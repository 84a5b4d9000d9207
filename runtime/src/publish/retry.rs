//! Exponential backoff for push attempts.

use std::future::Future;
use std::time::Duration;

use rosforge_core::error::{ForgeError, Result};
use rosforge_core::RetryConfig;

/// `attempts` tries; the delay before try `n + 1` is `initial * multiplier^(n - 1)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    attempts: u32,
    initial_delay: Duration,
    multiplier: u32,
}

impl RetryPolicy {
    /// `attempts` must be at least 1; [`RunConfig::validate`](rosforge_core::RunConfig::validate)
    /// enforces this for configured policies.
    pub fn new(attempts: u32, initial_delay: Duration, multiplier: u32) -> Self {
        Self {
            attempts,
            initial_delay,
            multiplier,
        }
    }

    /// Sleeps between consecutive attempts.
    fn delays(&self) -> Vec<Duration> {
        let mut delay = self.initial_delay;
        let mut out = Vec::with_capacity(self.attempts as usize);
        for _ in 1..self.attempts {
            out.push(delay);
            delay = delay.saturating_mul(self.multiplier);
        }
        out
    }

    /// Run `op` until it succeeds, fails with a non-transient error, or
    /// attempts run out. The failing error is returned as is, together with
    /// the number of attempts made. `op` receives the 1-based attempt number.
    pub async fn run<T, F, Fut>(&self, what: &str, mut op: F) -> std::result::Result<T, (ForgeError, u32)>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let delays = self.delays();
        let mut attempt = 1;
        loop {
            match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(e) if attempt < self.attempts && e.is_transient() => {
                    let delay = delays[(attempt - 1) as usize];
                    tracing::warn!(
                        reference = what,
                        attempt,
                        max_attempts = self.attempts,
                        retry_in_ms = delay.as_millis() as u64,
                        error = %e,
                        "Push attempt failed"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err((e, attempt)),
            }
        }
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self::new(config.attempts, config.initial_delay(), config.multiplier)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_secs(1), 2)
    }
}
