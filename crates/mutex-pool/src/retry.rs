//! Waiting for a free slot, layered on top of the non-blocking pool.
//!
//! [`MutexPool::acquire`] never waits. Callers that would rather wait than
//! handle [`PoolError::PoolExhausted`] themselves use these helpers, which
//! retry only on exhaustion and hand every other error straight back.

use std::time::Duration;

use crate::error::{PoolError, Result};
use crate::kernel::KernelMutex;
use crate::pool::{MutexPool, SlotHandle};

/// Exponential backoff between acquire attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    multiplier: u32,
    max_attempts: Option<u32>,
}

impl Default for Backoff {
    /// 50µs doubling up to 10ms, retrying without limit.
    fn default() -> Self {
        Self {
            initial: Duration::from_micros(50),
            max: Duration::from_millis(10),
            multiplier: 2,
            max_attempts: None,
        }
    }
}

impl Backoff {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_initial(mut self, initial: Duration) -> Self {
        self.initial = initial;
        self
    }

    pub fn with_max(mut self, max: Duration) -> Self {
        self.max = max;
        self
    }

    pub fn with_multiplier(mut self, multiplier: u32) -> Self {
        self.multiplier = multiplier.max(1);
        self
    }

    /// Give up after this many failed attempts (at least one).
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = Some(attempts.max(1));
        self
    }

    pub fn max_attempts(&self) -> Option<u32> {
        self.max_attempts
    }

    /// Delay after the `attempt`-th failure, counting from zero.
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = self.multiplier.saturating_pow(attempt);
        self.initial.saturating_mul(factor).min(self.max)
    }

    fn gives_up_after(&self, failures: u32) -> bool {
        self.max_attempts.is_some_and(|max| failures >= max)
    }
}

/// Acquire a slot, sleeping the current thread while the pool is exhausted.
///
/// Not for interrupt context: this blocks.
pub fn acquire_blocking<'p, M: KernelMutex, const N: usize>(
    pool: &'p MutexPool<'_, M, N>,
    backoff: &Backoff,
) -> Result<SlotHandle<'p, M>> {
    let mut failures: u32 = 0;
    loop {
        match pool.acquire() {
            Err(e @ PoolError::PoolExhausted { .. }) => {
                failures = failures.saturating_add(1);
                if backoff.gives_up_after(failures) {
                    return Err(e);
                }
                std::thread::sleep(backoff.delay(failures - 1));
            }
            other => return other,
        }
    }
}

/// Acquire a slot, yielding to the tokio runtime while the pool is exhausted.
pub async fn acquire_async<'p, M: KernelMutex, const N: usize>(
    pool: &'p MutexPool<'_, M, N>,
    backoff: &Backoff,
) -> Result<SlotHandle<'p, M>> {
    let mut failures: u32 = 0;
    loop {
        match pool.acquire() {
            Err(e @ PoolError::PoolExhausted { .. }) => {
                failures = failures.saturating_add(1);
                if backoff.gives_up_after(failures) {
                    return Err(e);
                }
                tokio::time::sleep(backoff.delay(failures - 1)).await;
            }
            other => return other,
        }
    }
}
