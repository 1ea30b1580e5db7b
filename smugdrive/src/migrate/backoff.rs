use std::time::Duration;

use rand::Rng;

/// Bounded retry schedule for listing pages: `attempts` tries in total,
/// sleeping an exponentially growing (optionally jittered) delay between them.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    attempts: u32,
    base: Duration,
    max: Duration,
    jitter: bool,
}

impl RetryPolicy {
    pub fn new(attempts: u32, base: Duration, max: Duration, jitter: bool) -> Self {
        Self {
            attempts: attempts.max(1),
            base,
            max,
            jitter,
        }
    }

    /// Three attempts, 250ms doubling up to 10s, jittered.
    pub fn page_default() -> Self {
        Self::new(3, Duration::from_millis(250), Duration::from_secs(10), true)
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Whether another try is allowed after `failed_attempts` failures.
    pub fn allows_retry(&self, failed_attempts: u32) -> bool {
        failed_attempts < self.attempts
    }

    pub fn delay(&self, retry: u32) -> Duration {
        self.delay_with_rng(retry, &mut rand::thread_rng())
    }

    pub fn delay_with_rng<R: Rng + ?Sized>(&self, retry: u32, rng: &mut R) -> Duration {
        let base_ms = self.base.as_millis().min(u128::from(u64::MAX)) as u64;
        let max_ms = self.max.as_millis().min(u128::from(u64::MAX)) as u64;
        let ceiling = base_ms.saturating_mul(1u64 << retry.min(16)).min(max_ms);
        if self.jitter && ceiling > 0 {
            Duration::from_millis(rng.gen_range(ceiling / 2..=ceiling))
        } else {
            Duration::from_millis(ceiling)
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::page_default()
    }
}
