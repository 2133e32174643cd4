//! mutex-pool: hands out statically allocated kernel mutexes without a heap.
//!
//! The mutex objects themselves are created ahead of time (a `static` array in a
//! kernel image). [`MutexPool`] only tracks which of them are owned:
//!
//! ```
//! use mutex_pool::{HostMutex, MutexPool, Timeout};
//!
//! static SLOTS: [HostMutex; 4] = [const { HostMutex::new() }; 4];
//!
//! let pool = MutexPool::new(&SLOTS);
//! let handle = pool.acquire().unwrap();
//! {
//!     let _guard = pool.with_mutex(&handle, Timeout::Forever).unwrap();
//!     // critical section
//! }
//! pool.release(handle).unwrap();
//! ```

mod cell;
mod error;
mod guard;
mod host;
mod kernel;
mod pool;

pub mod retry;

pub use cell::PoolCell;
pub use error::{PoolError, ReleaseError, Result};
pub use guard::SlotGuard;
pub use host::{HostMutex, HostMutexError};
pub use kernel::{KernelMutex, Timeout};
pub use pool::{MutexPool, OwnedSlot, PoolStats, SlotHandle};
