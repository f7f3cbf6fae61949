//! Instrumented locks.
//!
//! Thin wrappers over `parking_lot` locks that record how long callers wait
//! for and hold them. The `parking_lot` mutex spins briefly under contention
//! before parking, is not reentrant, and does not poison on unwind.

use log::trace;
use parking_lot::{Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Statistics about lock usage
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct LockStats {
    /// Number of successful lock acquisitions
    pub acquisition_count: u64,

    /// Total time spent waiting for the lock (microseconds)
    pub total_wait_time_us: u64,

    /// Total time the lock was held (microseconds)
    pub total_hold_time_us: u64,

    /// Maximum time spent waiting for the lock (microseconds)
    pub max_wait_time_us: u64,

    /// Maximum time the lock was held (microseconds)
    pub max_hold_time_us: u64,
}

#[derive(Debug, Default)]
struct LockCounters {
    acquisition_count: AtomicU64,
    total_wait_time_us: AtomicU64,
    total_hold_time_us: AtomicU64,
    max_wait_time_us: AtomicU64,
    max_hold_time_us: AtomicU64,
}

impl LockCounters {
    fn record_wait(&self, wait: Duration) {
        let us = micros(wait);
        self.acquisition_count.fetch_add(1, Ordering::Relaxed);
        self.total_wait_time_us.fetch_add(us, Ordering::Relaxed);
        self.max_wait_time_us.fetch_max(us, Ordering::Relaxed);
    }

    fn record_hold(&self, hold: Duration) {
        let us = micros(hold);
        self.total_hold_time_us.fetch_add(us, Ordering::Relaxed);
        self.max_hold_time_us.fetch_max(us, Ordering::Relaxed);
    }

    fn snapshot(&self) -> LockStats {
        LockStats {
            acquisition_count: self.acquisition_count.load(Ordering::Relaxed),
            total_wait_time_us: self.total_wait_time_us.load(Ordering::Relaxed),
            total_hold_time_us: self.total_hold_time_us.load(Ordering::Relaxed),
            max_wait_time_us: self.max_wait_time_us.load(Ordering::Relaxed),
            max_hold_time_us: self.max_hold_time_us.load(Ordering::Relaxed),
        }
    }

    fn reset(&self) {
        self.acquisition_count.store(0, Ordering::Relaxed);
        self.total_wait_time_us.store(0, Ordering::Relaxed);
        self.total_hold_time_us.store(0, Ordering::Relaxed);
        self.max_wait_time_us.store(0, Ordering::Relaxed);
        self.max_hold_time_us.store(0, Ordering::Relaxed);
    }
}

fn micros(d: Duration) -> u64 {
    u64::try_from(d.as_micros()).unwrap_or(u64::MAX)
}

/// A mutex that records wait and hold times.
#[derive(Debug)]
pub struct TrackedMutex<T> {
    mutex: Mutex<T>,
    counters: LockCounters,
    name: String,
}

/// Guard returned by [`TrackedMutex::lock`]; records the hold time on drop.
pub struct TrackedMutexGuard<'a, T> {
    guard: MutexGuard<'a, T>,
    acquired_at: Instant,
    counters: &'a LockCounters,
    name: &'a str,
}

impl<T> TrackedMutex<T> {
    /// Create a new tracked mutex
    pub fn new(value: T) -> Self {
        Self::with_name(value, "unnamed")
    }

    /// Create a new tracked mutex with a name for debugging
    pub fn with_name(value: T, name: impl Into<String>) -> Self {
        Self {
            mutex: Mutex::new(value),
            counters: LockCounters::default(),
            name: name.into(),
        }
    }

    /// Lock the mutex, blocking until it is available.
    pub fn lock(&self) -> TrackedMutexGuard<'_, T> {
        let start = Instant::now();
        let guard = self.mutex.lock();
        self.acquired(guard, start)
    }

    /// Lock the mutex if it is free right now.
    pub fn try_lock(&self) -> Option<TrackedMutexGuard<'_, T>> {
        let start = Instant::now();
        let guard = self.mutex.try_lock()?;
        Some(self.acquired(guard, start))
    }

    fn acquired<'a>(&'a self, guard: MutexGuard<'a, T>, start: Instant) -> TrackedMutexGuard<'a, T> {
        let wait = start.elapsed();
        self.counters.record_wait(wait);
        trace!(
            "Lock acquired: {} (wait time: {:.2}ms)",
            self.name,
            wait.as_secs_f64() * 1000.0
        );
        TrackedMutexGuard {
            guard,
            acquired_at: Instant::now(),
            counters: &self.counters,
            name: &self.name,
        }
    }

    /// Get the statistics for this mutex
    pub fn stats(&self) -> LockStats {
        self.counters.snapshot()
    }

    /// Reset the statistics
    pub fn reset_stats(&self) {
        self.counters.reset();
    }

    /// Get the name of this mutex
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl<T: Default> Default for TrackedMutex<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T> Drop for TrackedMutexGuard<'_, T> {
    fn drop(&mut self) {
        let hold = self.acquired_at.elapsed();
        self.counters.record_hold(hold);
        trace!(
            "Lock released: {} (held for: {:.2}ms)",
            self.name,
            hold.as_secs_f64() * 1000.0
        );
    }
}

impl<T> std::ops::Deref for TrackedMutexGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        &self.guard
    }
}

impl<T> std::ops::DerefMut for TrackedMutexGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.guard
    }
}

/// A reader-writer lock that records wait and hold times for each side.
#[derive(Debug)]
pub struct TrackedRwLock<T> {
    rwlock: RwLock<T>,
    read_counters: LockCounters,
    write_counters: LockCounters,
    name: String,
}

/// Shared guard returned by [`TrackedRwLock::read`].
pub struct TrackedRwLockReadGuard<'a, T> {
    guard: RwLockReadGuard<'a, T>,
    acquired_at: Instant,
    counters: &'a LockCounters,
    name: &'a str,
}

/// Exclusive guard returned by [`TrackedRwLock::write`].
pub struct TrackedRwLockWriteGuard<'a, T> {
    guard: RwLockWriteGuard<'a, T>,
    acquired_at: Instant,
    counters: &'a LockCounters,
    name: &'a str,
}

impl<T> TrackedRwLock<T> {
    /// Create a new tracked read-write lock
    pub fn new(value: T) -> Self {
        Self::with_name(value, "unnamed")
    }

    /// Create a new tracked read-write lock with a name for debugging
    pub fn with_name(value: T, name: impl Into<String>) -> Self {
        Self {
            rwlock: RwLock::new(value),
            read_counters: LockCounters::default(),
            write_counters: LockCounters::default(),
            name: name.into(),
        }
    }

    /// Acquire a shared lock
    pub fn read(&self) -> TrackedRwLockReadGuard<'_, T> {
        let start = Instant::now();
        let guard = self.rwlock.read();
        let wait = start.elapsed();
        self.read_counters.record_wait(wait);
        trace!(
            "Read lock acquired: {} (wait time: {:.2}ms)",
            self.name,
            wait.as_secs_f64() * 1000.0
        );
        TrackedRwLockReadGuard {
            guard,
            acquired_at: Instant::now(),
            counters: &self.read_counters,
            name: &self.name,
        }
    }

    /// Acquire the exclusive lock
    pub fn write(&self) -> TrackedRwLockWriteGuard<'_, T> {
        let start = Instant::now();
        let guard = self.rwlock.write();
        let wait = start.elapsed();
        self.write_counters.record_wait(wait);
        trace!(
            "Write lock acquired: {} (wait time: {:.2}ms)",
            self.name,
            wait.as_secs_f64() * 1000.0
        );
        TrackedRwLockWriteGuard {
            guard,
            acquired_at: Instant::now(),
            counters: &self.write_counters,
            name: &self.name,
        }
    }

    /// Acquire a shared lock if no writer holds or awaits the lock.
    pub fn try_read(&self) -> Option<TrackedRwLockReadGuard<'_, T>> {
        let guard = self.rwlock.try_read()?;
        self.read_counters.record_wait(Duration::ZERO);
        Some(TrackedRwLockReadGuard {
            guard,
            acquired_at: Instant::now(),
            counters: &self.read_counters,
            name: &self.name,
        })
    }

    /// Get the read statistics for this lock
    pub fn read_stats(&self) -> LockStats {
        self.read_counters.snapshot()
    }

    /// Get the write statistics for this lock
    pub fn write_stats(&self) -> LockStats {
        self.write_counters.snapshot()
    }

    /// Reset all statistics
    pub fn reset_stats(&self) {
        self.read_counters.reset();
        self.write_counters.reset();
    }

    /// Get the name of this lock
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl<T: Default> Default for TrackedRwLock<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T> Drop for TrackedRwLockReadGuard<'_, T> {
    fn drop(&mut self) {
        let hold = self.acquired_at.elapsed();
        self.counters.record_hold(hold);
        trace!(
            "Read lock released: {} (held for: {:.2}ms)",
            self.name,
            hold.as_secs_f64() * 1000.0
        );
    }
}

impl<T> std::ops::Deref for TrackedRwLockReadGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        &self.guard
    }
}

impl<T> Drop for TrackedRwLockWriteGuard<'_, T> {
    fn drop(&mut self) {
        let hold = self.acquired_at.elapsed();
        self.counters.record_hold(hold);
        trace!(
            "Write lock released: {} (held for: {:.2}ms)",
            self.name,
            hold.as_secs_f64() * 1000.0
        );
    }
}

impl<T> std::ops::Deref for TrackedRwLockWriteGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        &self.guard
    }
}

impl<T> std::ops::DerefMut for TrackedRwLockWriteGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.guard
    }
}
