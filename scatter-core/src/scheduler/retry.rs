use std::fmt::Display;
use std::time::Duration;

use tracing::debug;

use crate::config::Config;

/// Exponential backoff: attempt `n` (0-based) waits `base * 2^n`, capped at
/// `max_delay`. `max_attempts` counts every try, the first one included.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: usize,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

impl RetryPolicy {
    pub fn from_config(cfg: &Config) -> Self {
        Self {
            max_attempts: cfg.max_retries.max(1),
            base_delay: Duration::from_millis(cfg.retry_delay_ms),
            max_delay: Duration::from_millis(cfg.retry_max_delay_ms.max(cfg.retry_delay_ms)),
        }
    }

    pub fn delay_for(&self, attempt: usize) -> Duration {
        let factor = 1u32 << attempt.min(16);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }

    /// Run `op` until it succeeds, returns an error `retryable` rejects, or
    /// attempts run out. `op` receives the 1-based attempt number.
    pub fn run<T, E, F, R>(&self, what: &str, mut op: F, retryable: R) -> Result<T, E>
    where
        E: Display,
        F: FnMut(usize) -> Result<T, E>,
        R: Fn(&E) -> bool,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 0;
        loop {
            attempt += 1;
            match op(attempt) {
                Ok(v) => return Ok(v),
                Err(e) if attempt < max_attempts && retryable(&e) => {
                    let delay = self.delay_for(attempt - 1);
                    debug!(
                        attempt,
                        max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "{what} failed, retrying"
                    );
                    std::thread::sleep(delay);
                }
                Err(e) => return Err(e),
            }
        }
    }
}
