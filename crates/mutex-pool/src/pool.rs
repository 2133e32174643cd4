//! Pool of statically allocated kernel mutexes.
//!
//! The pool borrows an array of mutex objects that already exist (placed in the
//! kernel image at build time) and only tracks which slots are owned. Ownership
//! changes happen under a single pool-wide spinlock, never under one of the
//! pooled mutexes, so `acquire` and `release` stay short and never sleep.
//!
//! Slot lifecycle: `Free -> acquire -> Owned -> release -> Free`. Releasing a
//! free slot is reported as [`PoolError::DoubleRelease`].
//!
//! The pool-wide lock spins and does not mask interrupts. An interrupt handler
//! that preempts a thread holding it on the same core spins forever, so either
//! keep `acquire`/`release` out of interrupt context or mask local interrupts
//! around every pool call on that core.

use std::mem;
use std::ops::Deref;
use std::ptr;

use serde::Serialize;

use crate::error::{PoolError, ReleaseError, Result};
use crate::guard::SlotGuard;
use crate::kernel::{KernelMutex, Timeout};

struct Occupancy<const N: usize> {
    in_use: [bool; N],
    count: usize,
    high_water: usize,
    acquired_total: u64,
    released_total: u64,
    exhausted_total: u64,
}

impl<const N: usize> Occupancy<N> {
    const fn new() -> Self {
        Self {
            in_use: [false; N],
            count: 0,
            high_water: 0,
            acquired_total: 0,
            released_total: 0,
            exhausted_total: 0,
        }
    }

    /// Mark the lowest free slot as owned.
    fn claim_lowest(&mut self) -> Option<usize> {
        let Some(index) = self.in_use.iter().position(|used| !used) else {
            self.exhausted_total += 1;
            return None;
        };
        self.in_use[index] = true;
        self.count += 1;
        self.high_water = self.high_water.max(self.count);
        self.acquired_total += 1;
        Some(index)
    }

    fn free(&mut self, index: usize) -> Result<()> {
        if !self.in_use[index] {
            return Err(PoolError::DoubleRelease { index });
        }
        self.in_use[index] = false;
        self.count -= 1;
        self.released_total += 1;
        Ok(())
    }
}

/// Point-in-time view of pool occupancy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    pub capacity: usize,
    pub in_use: usize,
    pub available: usize,
    /// Most slots ever owned at once.
    pub high_water: usize,
    pub acquired_total: u64,
    pub released_total: u64,
    /// Acquire calls that found every slot owned.
    pub exhausted_total: u64,
}

/// Fixed-capacity allocator over `N` pre-constructed kernel mutexes.
///
/// Not interrupt-safe: the occupancy lock is a plain spinlock with no
/// interrupt masking. See the module docs.
pub struct MutexPool<'s, M, const N: usize> {
    slots: &'s [M; N],
    occupancy: spin::Mutex<Occupancy<N>>,
}

impl<'s, M: KernelMutex, const N: usize> MutexPool<'s, M, N> {
    /// Build a pool over `slots` with every slot free.
    ///
    /// `const` so a kernel can place the pool itself in a `static`.
    pub const fn new(slots: &'s [M; N]) -> Self {
        const { assert!(N > 0, "mutex pool capacity must be positive") };
        Self {
            slots,
            occupancy: spin::Mutex::new(Occupancy::new()),
        }
    }

    pub const fn capacity(&self) -> usize {
        N
    }

    /// Claim the lowest-indexed free slot.
    ///
    /// Never waits for a slot to come back: when every slot is owned this
    /// returns [`PoolError::PoolExhausted`] immediately.
    pub fn acquire(&self) -> Result<SlotHandle<'_, M>> {
        let claimed = self.occupancy.lock().claim_lowest();
        let Some(index) = claimed else {
            return Err(PoolError::PoolExhausted { capacity: N });
        };

        tracing::trace!(slot = index, "Acquired pooled mutex");
        Ok(SlotHandle {
            pool: self.id(),
            index,
            mutex: &self.slots[index],
        })
    }

    /// Like [`acquire`](Self::acquire), but the slot releases itself on drop.
    pub fn acquire_owned(&self) -> Result<OwnedSlot<'_, M, N>> {
        let handle = self.acquire()?;
        let index = handle.into_index();
        Ok(OwnedSlot {
            pool: self,
            index,
            mutex: &self.slots[index],
        })
    }

    /// Return a slot to the pool.
    ///
    /// A handle issued by a different pool, even one over the same mutex
    /// array, is rejected as [`PoolError::InvalidHandle`] and handed back
    /// inside the error untouched.
    pub fn release<'h>(
        &self,
        handle: SlotHandle<'h, M>,
    ) -> std::result::Result<(), ReleaseError<'h, M>> {
        if handle.pool != self.id() {
            let error = PoolError::InvalidHandle {
                index: handle.index,
                capacity: N,
            };
            return Err(ReleaseError::new(error, handle));
        }
        if let Err(error) = self.free(handle.index) {
            return Err(ReleaseError::new(error, handle));
        }
        mem::forget(handle);
        Ok(())
    }

    /// Return a slot by raw index, as produced by [`SlotHandle::into_index`].
    pub fn release_index(&self, index: usize) -> Result<()> {
        self.slot(index)?;
        self.free(index)
    }

    /// Lock the kernel mutex behind `handle`.
    ///
    /// Blocking, timeouts and ownership rules are the kernel's; its errors
    /// come back unchanged.
    pub fn with_mutex<'h>(
        &self,
        handle: &'h SlotHandle<'_, M>,
        timeout: Timeout,
    ) -> std::result::Result<SlotGuard<'h, M>, M::Error> {
        handle.lock(timeout)
    }

    pub fn in_use(&self) -> usize {
        self.occupancy.lock().count
    }

    pub fn available(&self) -> usize {
        N - self.in_use()
    }

    pub fn is_quiescent(&self) -> bool {
        self.in_use() == 0
    }

    pub fn is_in_use(&self, index: usize) -> Result<bool> {
        self.slot(index)?;
        Ok(self.occupancy.lock().in_use[index])
    }

    /// Copy of the per-slot "in use" table.
    pub fn occupancy(&self) -> [bool; N] {
        self.occupancy.lock().in_use
    }

    pub fn stats(&self) -> PoolStats {
        let occupancy = self.occupancy.lock();
        PoolStats {
            capacity: N,
            in_use: occupancy.count,
            available: N - occupancy.count,
            high_water: occupancy.high_water,
            acquired_total: occupancy.acquired_total,
            released_total: occupancy.released_total,
            exhausted_total: occupancy.exhausted_total,
        }
    }

    /// The mutex at `index`, whether or not it is currently owned.
    pub fn slot(&self, index: usize) -> Result<&'s M> {
        self.slots.get(index).ok_or(PoolError::InvalidHandle {
            index,
            capacity: N,
        })
    }

    /// Identity stamped into every handle this pool issues. Stable because
    /// outstanding handles borrow the pool.
    fn id(&self) -> usize {
        ptr::from_ref(self).addr()
    }

    fn free(&self, index: usize) -> Result<()> {
        self.occupancy.lock().free(index)?;
        tracing::trace!(slot = index, "Released pooled mutex");
        Ok(())
    }
}

impl<M, const N: usize> std::fmt::Debug for MutexPool<'_, M, N> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MutexPool")
            .field("capacity", &N)
            .field("in_use", &self.occupancy.lock().count)
            .finish()
    }
}

/// Ownership of one pool slot, from `acquire` until `release`.
///
/// Not `Clone`: one slot, one owner. Dropping a handle without releasing it
/// leaves the slot owned for good.
#[must_use = "a slot stays owned until the handle is released"]
pub struct SlotHandle<'p, M> {
    pool: usize,
    index: usize,
    mutex: &'p M,
}

impl<'p, M: KernelMutex> SlotHandle<'p, M> {
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn mutex(&self) -> &'p M {
        self.mutex
    }

    pub fn lock(&self, timeout: Timeout) -> std::result::Result<SlotGuard<'p, M>, M::Error> {
        self.mutex.lock(timeout)?;
        Ok(SlotGuard::new(self.mutex, self.index))
    }

    /// Run `f` with the slot's mutex held.
    pub fn with_lock<R>(
        &self,
        timeout: Timeout,
        f: impl FnOnce() -> R,
    ) -> std::result::Result<R, M::Error> {
        let guard = self.lock(timeout)?;
        let out = f();
        guard.unlock()?;
        Ok(out)
    }

    /// Give up the typed handle, keeping the slot owned under a bare index.
    ///
    /// The index must eventually reach [`MutexPool::release_index`].
    pub fn into_index(self) -> usize {
        let index = self.index;
        mem::forget(self);
        index
    }
}

impl<M> Drop for SlotHandle<'_, M> {
    fn drop(&mut self) {
        tracing::warn!(slot = self.index, "SlotHandle dropped without release - slot leaked");
    }
}

impl<M> std::fmt::Debug for SlotHandle<'_, M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SlotHandle")
            .field("index", &self.index)
            .finish_non_exhaustive()
    }
}

/// A pool slot that returns itself to the pool when dropped.
///
/// Derefs to the kernel mutex, so it stands in wherever a dynamically
/// allocated mutex would.
pub struct OwnedSlot<'p, M: KernelMutex, const N: usize> {
    pool: &'p MutexPool<'p, M, N>,
    index: usize,
    mutex: &'p M,
}

impl<'p, M: KernelMutex, const N: usize> OwnedSlot<'p, M, N> {
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn lock(&self, timeout: Timeout) -> std::result::Result<SlotGuard<'p, M>, M::Error> {
        self.mutex.lock(timeout)?;
        Ok(SlotGuard::new(self.mutex, self.index))
    }

    /// Stop releasing on drop; the caller now owns an explicit handle.
    pub fn into_handle(self) -> SlotHandle<'p, M> {
        let handle = SlotHandle {
            pool: self.pool.id(),
            index: self.index,
            mutex: self.mutex,
        };
        mem::forget(self);
        handle
    }
}

impl<M: KernelMutex, const N: usize> Deref for OwnedSlot<'_, M, N> {
    type Target = M;

    fn deref(&self) -> &M {
        self.mutex
    }
}

impl<M: KernelMutex, const N: usize> Drop for OwnedSlot<'_, M, N> {
    fn drop(&mut self) {
        if let Err(e) = self.pool.release_index(self.index) {
            tracing::error!(slot = self.index, error = %e, "Failed to return owned slot to pool");
        }
    }
}

impl<M: KernelMutex, const N: usize> std::fmt::Debug for OwnedSlot<'_, M, N> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OwnedSlot")
            .field("index", &self.index)
            .finish_non_exhaustive()
    }
}
