//! Once-only holder for the process-wide pool.

use crate::error::{PoolError, Result};
use crate::kernel::KernelMutex;
use crate::pool::MutexPool;

/// Explicitly initialized home for a [`MutexPool`], usable as a `static`.
///
/// ```
/// use mutex_pool::{HostMutex, PoolCell};
///
/// static SLOTS: [HostMutex; 2] = [const { HostMutex::new() }; 2];
/// static POOL: PoolCell<'static, HostMutex, 2> = PoolCell::new();
///
/// POOL.initialize(&SLOTS).unwrap();
/// assert!(POOL.initialize(&SLOTS).is_err());
/// let handle = POOL.get().unwrap().acquire().unwrap();
/// POOL.get().unwrap().release(handle).unwrap();
/// ```
pub struct PoolCell<'s, M, const N: usize> {
    pool: spin::Once<MutexPool<'s, M, N>>,
}

impl<'s, M: KernelMutex, const N: usize> PoolCell<'s, M, N> {
    pub const fn new() -> Self {
        Self {
            pool: spin::Once::new(),
        }
    }

    /// Build the pool over `slots`. Only the first call succeeds; concurrent
    /// callers race safely and exactly one of them wins.
    pub fn initialize(&self, slots: &'s [M; N]) -> Result<&MutexPool<'s, M, N>> {
        let mut fresh = false;
        let pool = self.pool.call_once(|| {
            fresh = true;
            MutexPool::new(slots)
        });

        if !fresh {
            return Err(PoolError::AlreadyInitialized);
        }
        tracing::debug!(capacity = N, "Mutex pool initialized");
        Ok(pool)
    }

    pub fn get(&self) -> Result<&MutexPool<'s, M, N>> {
        self.pool.get().ok_or(PoolError::Uninitialized)
    }

    pub fn is_initialized(&self) -> bool {
        self.pool.is_completed()
    }

    /// Empty the cell so it can be initialized again. Test use only.
    ///
    /// Fails without touching the pool while any slot is still owned.
    pub fn teardown(&mut self) -> Result<()> {
        if let Some(pool) = self.pool.get_mut() {
            let in_use = pool.in_use();
            if in_use > 0 {
                return Err(PoolError::SlotsOutstanding { in_use });
            }
        }
        self.pool = spin::Once::new();
        tracing::debug!(capacity = N, "Mutex pool torn down");
        Ok(())
    }
}

impl<M: KernelMutex, const N: usize> Default for PoolCell<'_, M, N> {
    fn default() -> Self {
        Self::new()
    }
}
