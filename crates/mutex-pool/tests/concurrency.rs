use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use mutex_pool::retry::{Backoff, acquire_blocking};
use mutex_pool::{HostMutex, MutexPool, PoolError, Timeout};

const CAPACITY: usize = 4;
const THREADS: usize = 8;

#[test]
fn stress_never_double_allocates() {
    let slots: [HostMutex; CAPACITY] = [const { HostMutex::new() }; CAPACITY];
    let pool = MutexPool::new(&slots);
    let owned: [AtomicBool; CAPACITY] = [const { AtomicBool::new(false) }; CAPACITY];
    let violations = AtomicUsize::new(0);
    let cycles = AtomicUsize::new(0);
    let deadline = Instant::now() + Duration::from_millis(300);

    thread::scope(|s| {
        for _ in 0..THREADS {
            s.spawn(|| {
                while Instant::now() < deadline {
                    let handle = match pool.acquire() {
                        Ok(handle) => handle,
                        Err(PoolError::PoolExhausted { .. }) => {
                            thread::yield_now();
                            continue;
                        }
                        Err(e) => panic!("unexpected acquire error: {e}"),
                    };

                    let index = handle.index();
                    if owned[index].swap(true, Ordering::AcqRel) {
                        violations.fetch_add(1, Ordering::Relaxed);
                    }

                    handle
                        .with_lock(Timeout::Forever, || {
                            thread::sleep(Duration::from_micros(50));
                        })
                        .unwrap();

                    owned[index].store(false, Ordering::Release);
                    pool.release(handle).unwrap();
                    cycles.fetch_add(1, Ordering::Relaxed);
                }
            });
        }
    });

    assert_eq!(violations.load(Ordering::Relaxed), 0);
    assert!(cycles.load(Ordering::Relaxed) > 0);
    assert_eq!(pool.occupancy(), [false; CAPACITY]);
    assert!(slots.iter().all(|m| !m.is_locked()));

    let stats = pool.stats();
    assert_eq!(stats.in_use, 0);
    assert_eq!(stats.acquired_total, stats.released_total);
    assert!(stats.high_water <= CAPACITY);
}

#[test]
fn concurrent_acquires_return_distinct_slots() {
    let slots: [HostMutex; CAPACITY] = [const { HostMutex::new() }; CAPACITY];
    let pool = MutexPool::new(&slots);

    let pool = &pool;
    let mut indices: Vec<usize> = thread::scope(|s| {
        let workers: Vec<_> = (0..THREADS)
            .map(|_| s.spawn(move || pool.acquire().ok().map(|h| h.into_index())))
            .collect();
        workers
            .into_iter()
            .filter_map(|w| w.join().unwrap())
            .collect()
    });

    // Exactly capacity winners, all distinct.
    indices.sort_unstable();
    assert_eq!(indices, (0..CAPACITY).collect::<Vec<_>>());
    assert_eq!(pool.stats().exhausted_total, (THREADS - CAPACITY) as u64);

    for index in indices {
        pool.release_index(index).unwrap();
    }
    assert!(pool.is_quiescent());
}

#[test]
fn waiters_share_a_single_slot() {
    let slots = [const { HostMutex::new() }; 1];
    let pool = MutexPool::new(&slots);
    let inside = AtomicUsize::new(0);
    let backoff = Backoff::new().with_initial(Duration::from_micros(20));

    thread::scope(|s| {
        for _ in 0..4 {
            s.spawn(|| {
                for _ in 0..25 {
                    let handle = acquire_blocking(&pool, &backoff).unwrap();
                    assert_eq!(inside.fetch_add(1, Ordering::AcqRel), 0);
                    thread::sleep(Duration::from_micros(20));
                    inside.fetch_sub(1, Ordering::AcqRel);
                    pool.release(handle).unwrap();
                }
            });
        }
    });

    let stats = pool.stats();
    assert_eq!(stats.acquired_total, 100);
    assert_eq!(stats.high_water, 1);
    assert!(pool.is_quiescent());
}
