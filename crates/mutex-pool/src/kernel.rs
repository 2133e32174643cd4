//! The seam between the pool and the kernel's own mutex primitive.

use std::time::Duration;

/// How long a lock attempt may block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Timeout {
    /// Fail immediately if the mutex is held elsewhere.
    NoWait,
    /// Block until the mutex becomes available.
    #[default]
    Forever,
    /// Block for at most this long.
    After(Duration),
}

impl From<Duration> for Timeout {
    fn from(duration: Duration) -> Self {
        if duration.is_zero() {
            Timeout::NoWait
        } else {
            Timeout::After(duration)
        }
    }
}

/// A kernel mutex object that can live in a statically allocated pool.
///
/// Implementations carry the kernel's semantics unchanged: thread ownership,
/// recursion, priority inheritance and timed waits all belong to the kernel.
/// The pool never interprets [`Self::Error`], it only hands it back.
pub trait KernelMutex: Sync {
    type Error: std::error::Error + Send + Sync + 'static;

    fn lock(&self, timeout: Timeout) -> Result<(), Self::Error>;

    fn unlock(&self) -> Result<(), Self::Error>;

    fn try_lock(&self) -> Result<(), Self::Error> {
        self.lock(Timeout::NoWait)
    }
}
