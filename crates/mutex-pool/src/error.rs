use thiserror::Error;

use crate::pool::SlotHandle;

/// Errors reported by the pool itself.
///
/// Failures of the kernel mutex (timeouts, ownership violations) are not
/// wrapped here; they surface as [`KernelMutex::Error`](crate::KernelMutex::Error).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum PoolError {
    #[error("mutex pool already initialized")]
    AlreadyInitialized,

    #[error("mutex pool not initialized")]
    Uninitialized,

    #[error("mutex pool exhausted: all {capacity} slots in use")]
    PoolExhausted { capacity: usize },

    #[error("invalid slot handle {index} for pool of {capacity}")]
    InvalidHandle { index: usize, capacity: usize },

    #[error("slot {index} released while not in use")]
    DoubleRelease { index: usize },

    #[error("cannot tear down mutex pool: {in_use} slots still in use")]
    SlotsOutstanding { in_use: usize },
}

impl PoolError {
    /// Whether retrying the same call later may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, PoolError::PoolExhausted { .. })
    }
}

pub type Result<T> = std::result::Result<T, PoolError>;

/// A rejected [`MutexPool::release`](crate::MutexPool::release).
///
/// Carries the handle back so its slot can still be returned to the pool that
/// issued it.
#[derive(Error)]
#[error("{error}")]
pub struct ReleaseError<'p, M> {
    error: PoolError,
    handle: SlotHandle<'p, M>,
}

impl<'p, M> ReleaseError<'p, M> {
    pub(crate) fn new(error: PoolError, handle: SlotHandle<'p, M>) -> Self {
        Self { error, handle }
    }

    pub fn error(&self) -> PoolError {
        self.error
    }

    pub fn into_handle(self) -> SlotHandle<'p, M> {
        self.handle
    }
}

impl<M> From<ReleaseError<'_, M>> for PoolError {
    fn from(err: ReleaseError<'_, M>) -> Self {
        err.error
    }
}

impl<M> std::fmt::Debug for ReleaseError<'_, M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReleaseError")
            .field("error", &self.error)
            .field("handle", &self.handle)
            .finish()
    }
}
