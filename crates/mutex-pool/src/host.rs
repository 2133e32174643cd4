//! Kernel mutex for hosted builds.
//!
//! Mirrors the kernel primitive closely enough to exercise the pool off-target:
//! the owning thread may lock recursively, only the owner may unlock, and a
//! lock attempt reports `Busy` or `TimedOut` instead of panicking.

use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, ThreadId};
use std::time::Instant;

use thiserror::Error;

use crate::kernel::{KernelMutex, Timeout};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum HostMutexError {
    #[error("mutex held by another thread")]
    Busy,
    #[error("timed out waiting for mutex")]
    TimedOut,
    #[error("mutex unlocked by a thread that does not own it")]
    NotOwner,
    #[error("mutex is not locked")]
    NotLocked,
}

#[derive(Debug)]
struct Owner {
    thread: Option<ThreadId>,
    depth: u32,
}

#[derive(Debug)]
pub struct HostMutex {
    owner: Mutex<Owner>,
    released: Condvar,
}

impl HostMutex {
    pub const fn new() -> Self {
        Self {
            owner: Mutex::new(Owner {
                thread: None,
                depth: 0,
            }),
            released: Condvar::new(),
        }
    }

    pub fn is_locked(&self) -> bool {
        self.state().thread.is_some()
    }

    /// Recursion depth of the current owner, zero when unlocked.
    pub fn lock_depth(&self) -> u32 {
        self.state().depth
    }

    // Owner state is only mutated in short sections that cannot panic.
    fn state(&self) -> MutexGuard<'_, Owner> {
        self.owner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for HostMutex {
    fn default() -> Self {
        Self::new()
    }
}

impl KernelMutex for HostMutex {
    type Error = HostMutexError;

    fn lock(&self, timeout: Timeout) -> Result<(), HostMutexError> {
        let me = thread::current().id();
        let deadline = match timeout {
            Timeout::After(d) => Some(Instant::now() + d),
            Timeout::NoWait | Timeout::Forever => None,
        };

        let mut state = self.state();
        loop {
            let current = state.thread;
            match current {
                None => {
                    state.thread = Some(me);
                    state.depth = 1;
                    return Ok(());
                }
                Some(owner) if owner == me => {
                    state.depth += 1;
                    return Ok(());
                }
                Some(_) => {}
            }

            state = match timeout {
                Timeout::NoWait => return Err(HostMutexError::Busy),
                Timeout::Forever => self
                    .released
                    .wait(state)
                    .unwrap_or_else(PoisonError::into_inner),
                Timeout::After(_) => {
                    let now = Instant::now();
                    let Some(remaining) = deadline
                        .and_then(|d| d.checked_duration_since(now))
                        .filter(|r| !r.is_zero())
                    else {
                        return Err(HostMutexError::TimedOut);
                    };
                    self.released
                        .wait_timeout(state, remaining)
                        .unwrap_or_else(PoisonError::into_inner)
                        .0
                }
            };
        }
    }

    fn unlock(&self) -> Result<(), HostMutexError> {
        let mut state = self.state();
        let current = state.thread;
        match current {
            None => Err(HostMutexError::NotLocked),
            Some(owner) if owner != thread::current().id() => Err(HostMutexError::NotOwner),
            Some(_) => {
                state.depth -= 1;
                if state.depth == 0 {
                    state.thread = None;
                    drop(state);
                    self.released.notify_one();
                }
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::mpsc;
    use std::time::Duration;

    #[test]
    fn owner_may_lock_recursively() {
        let m = HostMutex::new();
        m.lock(Timeout::Forever).unwrap();
        m.lock(Timeout::NoWait).unwrap();
        assert_eq!(m.lock_depth(), 2);

        m.unlock().unwrap();
        assert!(m.is_locked());
        m.unlock().unwrap();
        assert!(!m.is_locked());
    }

    #[test]
    fn unlock_of_unlocked_mutex_fails() {
        let m = HostMutex::new();
        assert_eq!(m.unlock(), Err(HostMutexError::NotLocked));
    }

    #[test]
    fn other_thread_sees_busy_and_cannot_unlock() {
        let m = Arc::new(HostMutex::new());
        m.lock(Timeout::Forever).unwrap();

        let other = Arc::clone(&m);
        let (busy, unlock) = thread::spawn(move || (other.try_lock(), other.unlock()))
            .join()
            .unwrap();
        assert_eq!(busy, Err(HostMutexError::Busy));
        assert_eq!(unlock, Err(HostMutexError::NotOwner));

        m.unlock().unwrap();
    }

    #[test]
    fn timed_lock_expires() {
        let m = Arc::new(HostMutex::new());
        m.lock(Timeout::Forever).unwrap();

        let other = Arc::clone(&m);
        let result = thread::spawn(move || {
            other.lock(Timeout::After(Duration::from_millis(20)))
        })
        .join()
        .unwrap();
        assert_eq!(result, Err(HostMutexError::TimedOut));

        m.unlock().unwrap();
    }

    #[test]
    fn waiter_wakes_on_unlock() {
        let m = Arc::new(HostMutex::new());
        m.lock(Timeout::Forever).unwrap();

        let (tx, rx) = mpsc::channel();
        let other = Arc::clone(&m);
        let waiter = thread::spawn(move || {
            tx.send(()).unwrap();
            other.lock(Timeout::Forever).unwrap();
            other.unlock().unwrap();
        });

        rx.recv().unwrap();
        thread::sleep(Duration::from_millis(10));
        m.unlock().unwrap();
        waiter.join().unwrap();
        assert!(!m.is_locked());
    }
}
