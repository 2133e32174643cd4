//! Concurrency stress harness for the static mutex pool.
//!
//! Worker threads loop until a deadline: acquire a slot, check that nobody else
//! owns it, lock its kernel mutex for a moment, unlock, release. Any slot seen
//! with two owners at once is counted as a violation.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use mutex_pool::retry::{Backoff, acquire_blocking};
use mutex_pool::{KernelMutex, MutexPool, PoolError, PoolStats, Timeout};
use serde::Serialize;

#[derive(Debug, Clone)]
pub struct StressConfig {
    pub threads: usize,
    pub duration: Duration,
    /// How long each cycle keeps the kernel mutex locked.
    pub hold: Duration,
    pub backoff: Backoff,
}

impl Default for StressConfig {
    fn default() -> Self {
        Self {
            threads: 8,
            duration: Duration::from_secs(1),
            hold: Duration::from_micros(50),
            backoff: Backoff::new().with_max_attempts(64),
        }
    }
}

/// Outcome of one stress run.
#[derive(Debug, Clone, Serialize)]
pub struct StressReport {
    pub threads: usize,
    pub elapsed_ms: u64,
    /// Completed acquire/lock/unlock/release cycles.
    pub cycles: u64,
    /// Times a slot was handed to a second owner.
    pub violations: u64,
    /// Acquires abandoned after the backoff ran out of attempts.
    pub gave_up: u64,
    pub acquire_errors: u64,
    pub lock_errors: u64,
    pub release_errors: u64,
    pub stats: PoolStats,
    pub quiescent: bool,
}

impl StressReport {
    pub fn is_clean(&self) -> bool {
        self.violations == 0
            && self.acquire_errors == 0
            && self.lock_errors == 0
            && self.release_errors == 0
            && self.quiescent
    }
}

#[derive(Default)]
struct Counters {
    cycles: AtomicU64,
    violations: AtomicU64,
    gave_up: AtomicU64,
    acquire_errors: AtomicU64,
    lock_errors: AtomicU64,
    release_errors: AtomicU64,
}

pub fn run<M: KernelMutex, const N: usize>(
    pool: &MutexPool<'_, M, N>,
    config: &StressConfig,
) -> StressReport {
    let owners: [AtomicBool; N] = std::array::from_fn(|_| AtomicBool::new(false));
    let counters = Counters::default();
    let started = Instant::now();
    let deadline = started + config.duration;

    tracing::info!(
        threads = config.threads,
        capacity = N,
        duration_ms = config.duration.as_millis() as u64,
        "Starting mutex pool stress run"
    );

    thread::scope(|s| {
        for worker in 0..config.threads {
            let (owners, counters) = (&owners, &counters);
            s.spawn(move || {
                worker_loop(pool, config, owners, counters, deadline);
                tracing::debug!(worker, "Stress worker finished");
            });
        }
    });

    let report = StressReport {
        threads: config.threads,
        elapsed_ms: started.elapsed().as_millis() as u64,
        cycles: counters.cycles.load(Ordering::Relaxed),
        violations: counters.violations.load(Ordering::Relaxed),
        gave_up: counters.gave_up.load(Ordering::Relaxed),
        acquire_errors: counters.acquire_errors.load(Ordering::Relaxed),
        lock_errors: counters.lock_errors.load(Ordering::Relaxed),
        release_errors: counters.release_errors.load(Ordering::Relaxed),
        stats: pool.stats(),
        quiescent: pool.is_quiescent(),
    };

    tracing::info!(
        cycles = report.cycles,
        violations = report.violations,
        high_water = report.stats.high_water,
        "Stress run complete"
    );
    report
}

fn worker_loop<M: KernelMutex, const N: usize>(
    pool: &MutexPool<'_, M, N>,
    config: &StressConfig,
    owners: &[AtomicBool; N],
    counters: &Counters,
    deadline: Instant,
) {
    while Instant::now() < deadline {
        let handle = match acquire_blocking(pool, &config.backoff) {
            Ok(handle) => handle,
            Err(PoolError::PoolExhausted { .. }) => {
                counters.gave_up.fetch_add(1, Ordering::Relaxed);
                continue;
            }
            Err(e) => {
                tracing::error!(error = %e, "Unexpected acquire failure");
                counters.acquire_errors.fetch_add(1, Ordering::Relaxed);
                return;
            }
        };

        let index = handle.index();
        if owners[index].swap(true, Ordering::AcqRel) {
            tracing::error!(slot = index, "Slot handed to a second owner");
            counters.violations.fetch_add(1, Ordering::Relaxed);
        }

        if let Err(e) = handle.with_lock(Timeout::Forever, || thread::sleep(config.hold)) {
            tracing::warn!(slot = index, error = %e, "Kernel mutex lock failed");
            counters.lock_errors.fetch_add(1, Ordering::Relaxed);
        }

        owners[index].store(false, Ordering::Release);
        match pool.release(handle) {
            Ok(()) => {
                counters.cycles.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => {
                tracing::error!(slot = index, error = %e, "Release failed");
                counters.release_errors.fetch_add(1, Ordering::Relaxed);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mutex_pool::HostMutex;

    #[test]
    fn short_run_is_clean() {
        let slots = [const { HostMutex::new() }; 2];
        let pool = MutexPool::new(&slots);
        let config = StressConfig {
            threads: 4,
            duration: Duration::from_millis(100),
            hold: Duration::from_micros(10),
            backoff: Backoff::new().with_initial(Duration::from_micros(5)),
        };

        let report = run(&pool, &config);
        assert!(report.is_clean(), "{report:?}");
        assert!(report.cycles > 0);
        assert_eq!(report.stats.in_use, 0);
        assert_eq!(report.stats.acquired_total, report.stats.released_total);
    }

    #[test]
    fn report_with_violation_is_not_clean() {
        let slots = [const { HostMutex::new() }; 1];
        let pool = MutexPool::new(&slots);
        let mut report = run(
            &pool,
            &StressConfig {
                threads: 1,
                duration: Duration::ZERO,
                ..StressConfig::default()
            },
        );
        assert!(report.is_clean());

        report.violations = 1;
        assert!(!report.is_clean());
    }
}
