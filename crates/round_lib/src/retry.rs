use rand::Rng;
use std::thread::sleep;
use std::time::Duration;

use crate::error::{Result, RoundError};

/// Jittered exponential backoff for submissions that never reached the ledger.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: usize,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub jitter_pct: f64,
}

impl RetryPolicy {
    pub fn new(max_attempts: usize, base_delay_ms: u64, max_delay_ms: u64, jitter_pct: f64) -> Self {
        let base_delay_ms = base_delay_ms.max(1);
        Self {
            max_attempts: max_attempts.max(1),
            base_delay_ms,
            max_delay_ms: max_delay_ms.max(base_delay_ms),
            jitter_pct: jitter_pct.clamp(0.0, 1.0),
        }
    }

    pub fn next_delay(&self, attempt: usize) -> Duration {
        let exp = 2_u64.saturating_pow(attempt as u32);
        let delay = self.base_delay_ms.saturating_mul(exp).min(self.max_delay_ms);
        if self.jitter_pct <= 0.0 {
            return Duration::from_millis(delay);
        }
        let spread = (delay as f64 * self.jitter_pct) as i64;
        let delta = rand::thread_rng().gen_range(-spread..=spread);
        Duration::from_millis(delay.saturating_add_signed(delta))
    }

    /// Runs `op` until it succeeds, fails with a non-transient error, or the
    /// attempt budget is spent. `op` receives the zero-based attempt number
    /// and the backoff slept before it.
    pub fn run<T, F>(&self, mut op: F) -> Result<T>
    where
        F: FnMut(usize, Duration) -> Result<T>,
    {
        let mut attempt = 0;
        let mut backoff = Duration::ZERO;
        loop {
            match op(attempt, backoff) {
                Ok(val) => return Ok(val),
                Err(err @ RoundError::TransientIo(_)) => {
                    attempt += 1;
                    if attempt >= self.max_attempts {
                        return Err(err);
                    }
                    backoff = self.next_delay(attempt - 1);
                    tracing::warn!(attempt, backoff_ms = backoff.as_millis() as u64, error = %err, "transient failure, retrying");
                    sleep(backoff);
                }
                Err(err) => return Err(err),
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(5, 250, 5_000, 0.2)
    }
}
