//! Scoped locking of a pooled kernel mutex.

use crate::kernel::KernelMutex;

/// A held lock on one slot's kernel mutex.
///
/// Dropping the guard unlocks the mutex, including while unwinding. Use
/// [`SlotGuard::unlock`] to observe the kernel's unlock result instead.
#[must_use = "the mutex is unlocked as soon as the guard is dropped"]
pub struct SlotGuard<'h, M: KernelMutex> {
    mutex: &'h M,
    index: usize,
    locked: bool,
}

impl<'h, M: KernelMutex> SlotGuard<'h, M> {
    pub(crate) fn new(mutex: &'h M, index: usize) -> Self {
        Self {
            mutex,
            index,
            locked: true,
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn mutex(&self) -> &'h M {
        self.mutex
    }

    /// Unlock now, returning whatever the kernel reports.
    pub fn unlock(mut self) -> Result<(), M::Error> {
        self.locked = false;
        self.mutex.unlock()
    }
}

impl<M: KernelMutex> Drop for SlotGuard<'_, M> {
    fn drop(&mut self) {
        if !self.locked {
            return;
        }
        if let Err(e) = self.mutex.unlock() {
            tracing::error!(slot = self.index, error = %e, "Failed to unlock pooled mutex on drop");
        }
    }
}

impl<M: KernelMutex> std::fmt::Debug for SlotGuard<'_, M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SlotGuard")
            .field("index", &self.index)
            .field("locked", &self.locked)
            .finish()
    }
}
