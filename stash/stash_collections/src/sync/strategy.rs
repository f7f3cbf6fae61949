//! Synchronization strategies for the containers.
//!
//! A container owns its collection through a [`Guard`]. The guard decides how
//! reads and writes are serialized:
//!
//! - [`Strict`] serializes every access, reads included, behind one mutex.
//!   Submitted writes apply before `submit` returns.
//! - [`Pipelined`] lets reads run concurrently and makes writes exclusive.
//!   Submitted writes are queued and applied later on a [`WorkerPool`], in
//!   submission order. At most one drain task per container waits in the
//!   pool's queue; if the pool can no longer take one, the submitting thread
//!   applies the queue itself. A read or synchronous write first applies whatever
//!   was queued before it, so a caller always observes its own earlier
//!   writes.

use crate::exec::{Job, WorkerPool, WorkerPoolError};
use crate::shield::shielded;
use crate::sync::lock::{LockStats, TrackedMutex, TrackedRwLock};
use log::{trace, warn};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

/// Serialization discipline for a collection of type `C`.
///
/// Implementations must never run two closures against `C` concurrently
/// unless both are reads.
pub trait Guard<C>: Send + Sync {
    /// Run `f` with shared access and return its result.
    fn read<R, F>(&self, f: F) -> R
    where
        F: FnOnce(&C) -> R;

    /// Run `f` with exclusive access, blocking until it has been applied.
    fn write<R, F>(&self, f: F) -> R
    where
        F: FnOnce(&mut C) -> R;

    /// Schedule `write` with exclusive access and pass its result to `after`.
    ///
    /// `after` runs once the exclusive section has been left. Whether the
    /// caller waits for either is up to the strategy.
    fn submit<R, W, A>(&self, write: W, after: A)
    where
        R: Send + 'static,
        W: FnOnce(&mut C) -> R + Send + 'static,
        A: FnOnce(R) + Send + 'static;

    /// Diagnostic name of the guarded collection.
    fn name(&self) -> &str;
}

/// Mutual exclusion for every operation.
pub struct Strict<C> {
    lock: TrackedMutex<C>,
}

impl<C> Strict<C> {
    /// Guard `value`
    pub fn new(value: C) -> Self {
        Self {
            lock: TrackedMutex::new(value),
        }
    }

    /// Guard `value` under a diagnostic name
    pub fn with_name(value: C, name: impl Into<String>) -> Self {
        Self {
            lock: TrackedMutex::with_name(value, name),
        }
    }

    /// Lock statistics
    pub fn stats(&self) -> LockStats {
        self.lock.stats()
    }

    /// Whether another thread currently holds the lock.
    pub fn is_locked(&self) -> bool {
        self.lock.try_lock().is_none()
    }
}

impl<C: Send> Guard<C> for Strict<C> {
    fn read<R, F>(&self, f: F) -> R
    where
        F: FnOnce(&C) -> R,
    {
        let guard = self.lock.lock();
        f(&*guard)
    }

    fn write<R, F>(&self, f: F) -> R
    where
        F: FnOnce(&mut C) -> R,
    {
        let mut guard = self.lock.lock();
        f(&mut *guard)
    }

    fn submit<R, W, A>(&self, write: W, after: A)
    where
        R: Send + 'static,
        W: FnOnce(&mut C) -> R + Send + 'static,
        A: FnOnce(R) + Send + 'static,
    {
        let result = self.write(write);
        after(result);
    }

    fn name(&self) -> &str {
        self.lock.name()
    }
}

impl<C> fmt::Debug for Strict<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Strict")
            .field("name", &self.lock.name())
            .finish()
    }
}

type QueuedWrite<C> = Box<dyn FnOnce(&mut C) -> Job + Send>;

/// Statistics about a pipelined guard
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PipelineStats {
    /// Writes handed to `submit`
    pub writes_submitted: u64,

    /// Submitted writes that have been applied
    pub writes_applied: u64,

    /// Submitted writes still waiting
    pub writes_pending: usize,

    /// Shared-lock usage
    pub reads: LockStats,

    /// Exclusive-lock usage
    pub writes: LockStats,
}

struct PipelineState<C> {
    value: TrackedRwLock<C>,
    queue: Mutex<VecDeque<QueuedWrite<C>>>,
    // Set while a drain task is queued on the executor and has not started.
    drain_scheduled: AtomicBool,
    submitted: AtomicU64,
    applied: AtomicU64,
}

impl<C> PipelineState<C> {
    fn has_queued(&self) -> bool {
        !self.queue.lock().is_empty()
    }

    /// Apply queued writes in order. Caller holds the exclusive lock.
    fn apply_queued(&self, value: &mut C) -> Vec<Job> {
        let mut afters = Vec::new();
        loop {
            let next = self.queue.lock().pop_front();
            let Some(write) = next else {
                break;
            };
            let after = shielded(
                self.value.name(),
                "queued write",
                || Box::new(|| ()) as Job,
                || write(value),
            );
            afters.push(after);
            self.applied.fetch_add(1, Ordering::Release);
        }
        afters
    }

    /// Body of a scheduled drain task.
    fn run_scheduled_drain(&self) {
        // Cleared before draining: a write queued after this point schedules
        // its own drain, and one queued before it is applied below.
        self.drain_scheduled.store(false, Ordering::Release);
        self.drain();
    }

    fn drain(&self) {
        let afters = {
            let mut value = self.value.write();
            self.apply_queued(&mut *value)
        };
        run_afters(afters);
    }
}

fn run_afters(afters: Vec<Job>) {
    for after in afters {
        after();
    }
}

/// Concurrent reads, exclusive writes, optionally deferred writes.
pub struct Pipelined<C> {
    state: Arc<PipelineState<C>>,
    executor: Arc<WorkerPool>,
}

impl<C: Send + Sync + 'static> Pipelined<C> {
    /// Guard `value`, applying deferred writes on `executor`
    pub fn new(value: C, executor: Arc<WorkerPool>) -> Self {
        Self::with_name(value, "unnamed", executor)
    }

    /// Guard `value` under a diagnostic name
    pub fn with_name(value: C, name: impl Into<String>, executor: Arc<WorkerPool>) -> Self {
        Self {
            state: Arc::new(PipelineState {
                value: TrackedRwLock::with_name(value, name),
                queue: Mutex::new(VecDeque::new()),
                drain_scheduled: AtomicBool::new(false),
                submitted: AtomicU64::new(0),
                applied: AtomicU64::new(0),
            }),
            executor,
        }
    }

    /// Apply every queued write now, on the calling thread.
    pub fn flush(&self) {
        self.state.drain();
    }

    /// Statistics for this guard
    pub fn stats(&self) -> PipelineStats {
        PipelineStats {
            writes_submitted: self.state.submitted.load(Ordering::Acquire),
            writes_applied: self.state.applied.load(Ordering::Acquire),
            writes_pending: self.state.queue.lock().len(),
            reads: self.state.value.read_stats(),
            writes: self.state.value.write_stats(),
        }
    }

    /// Hand one drain task to the executor.
    ///
    /// A full queue is waited out, unless the caller is one of the executor's
    /// own workers. When the executor cannot take the task the queue is
    /// drained on the calling thread, so no write is left behind.
    fn schedule_drain(&self) {
        let state = Arc::clone(&self.state);
        let rejected = match self.executor.execute(move || state.run_scheduled_drain()) {
            Ok(()) => {
                trace!("{}: drain scheduled", self.name());
                return;
            }
            Err(WorkerPoolError::QueueFull) if !self.executor.is_worker_thread() => {
                let state = Arc::clone(&self.state);
                match self.executor.execute_blocking(move || state.run_scheduled_drain()) {
                    Ok(()) => return,
                    Err(err) => err,
                }
            }
            Err(err) => err,
        };
        warn!(
            "{}: executor rejected drain ({}); applying writes on the caller",
            self.name(),
            rejected
        );
        self.state.run_scheduled_drain();
    }

    /// The executor that applies deferred writes
    pub fn executor(&self) -> &Arc<WorkerPool> {
        &self.executor
    }
}

impl<C: Send + Sync + 'static> Guard<C> for Pipelined<C> {
    fn read<R, F>(&self, f: F) -> R
    where
        F: FnOnce(&C) -> R,
    {
        if self.state.has_queued() {
            self.state.drain();
        }
        let value = self.state.value.read();
        f(&*value)
    }

    fn write<R, F>(&self, f: F) -> R
    where
        F: FnOnce(&mut C) -> R,
    {
        let (result, afters) = {
            let mut value = self.state.value.write();
            let afters = self.state.apply_queued(&mut *value);
            (f(&mut *value), afters)
        };
        run_afters(afters);
        result
    }

    fn submit<R, W, A>(&self, write: W, after: A)
    where
        R: Send + 'static,
        W: FnOnce(&mut C) -> R + Send + 'static,
        A: FnOnce(R) + Send + 'static,
    {
        let queued: QueuedWrite<C> = Box::new(move |value: &mut C| {
            let result = write(value);
            Box::new(move || after(result)) as Job
        });
        {
            let mut queue = self.state.queue.lock();
            queue.push_back(queued);
            self.state.submitted.fetch_add(1, Ordering::Release);
        }

        if self.state.drain_scheduled.swap(true, Ordering::AcqRel) {
            trace!("{}: write queued behind a scheduled drain", self.name());
            return;
        }
        self.schedule_drain();
    }

    fn name(&self) -> &str {
        self.state.value.name()
    }
}

impl<C> fmt::Debug for Pipelined<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipelined")
            .field("name", &self.state.value.name())
            .field("pending", &self.state.queue.lock().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::{Dispatcher, NotifyQueue, WorkerPoolConfig};
    use std::thread;
    use std::time::Duration;

    fn executor() -> Arc<WorkerPool> {
        Arc::new(WorkerPool::new(2).unwrap())
    }

    #[test]
    fn test_strict_submit_applies_before_returning() {
        let guard = Strict::with_name(Vec::new(), "strict");
        guard.submit(|v: &mut Vec<i32>| v.push(1), |_| {});
        assert_eq!(guard.read(|v| v.clone()), vec![1]);
        assert_eq!(guard.name(), "strict");
        assert!(!guard.is_locked());
    }

    #[test]
    fn test_strict_releases_lock_after_panic() {
        let guard = Arc::new(Strict::new(0));
        let worker = {
            let guard = Arc::clone(&guard);
            thread::spawn(move || {
                guard.write(|_: &mut i32| panic!("inside the lock"));
            })
        };
        assert!(worker.join().is_err());
        assert!(!guard.is_locked());
        assert_eq!(guard.write(|v| {
            *v += 1;
            *v
        }), 1);
    }

    #[test]
    fn test_pipelined_writes_apply_in_order() {
        let guard = Pipelined::new(Vec::new(), executor());
        for i in 0..100 {
            guard.submit(move |v: &mut Vec<i32>| v.push(i), |_| {});
        }
        let seen = guard.read(|v| v.clone());
        assert_eq!(seen, (0..100).collect::<Vec<_>>());

        let stats = guard.stats();
        assert_eq!(stats.writes_submitted, 100);
        assert_eq!(stats.writes_applied, 100);
        assert_eq!(stats.writes_pending, 0);
    }

    #[test]
    fn test_pipelined_sync_write_sees_queued_writes() {
        let guard = Pipelined::new(0u32, executor());
        guard.submit(|v: &mut u32| *v = 10, |_| {});
        let doubled = guard.write(|v| {
            *v *= 2;
            *v
        });
        assert_eq!(doubled, 20);
    }

    #[test]
    fn test_pipelined_after_runs_outside_exclusive_section() {
        let guard = Arc::new(Pipelined::new(0u32, executor()));
        let notify = Arc::new(NotifyQueue::new());
        let observed = Arc::new(Mutex::new(None));

        let reader = Arc::clone(&guard);
        let sink = Arc::clone(&observed);
        let target = Arc::clone(&notify);
        guard.submit(
            |v: &mut u32| {
                *v = 7;
                *v
            },
            move |result| {
                // Would deadlock if still inside the exclusive section.
                let current = reader.read(|v| *v);
                target
                    .dispatch(Box::new(move || {
                        *sink.lock() = Some((result, current));
                    }))
                    .unwrap();
            },
        );

        assert!(notify.run_next(Duration::from_secs(5)));
        assert_eq!(*observed.lock(), Some((7, 7)));
    }

    #[test]
    fn test_pipelined_applies_on_caller_after_executor_shutdown() {
        let pool = executor();
        pool.shutdown();
        let guard = Pipelined::new(Vec::new(), pool);
        let caller = thread::current().id();
        let ran_on = Arc::new(Mutex::new(None));

        let sink = Arc::clone(&ran_on);
        guard.submit(
            |v: &mut Vec<u8>| v.push(1),
            move |_| *sink.lock() = Some(thread::current().id()),
        );
        assert_eq!(guard.stats().writes_pending, 0);
        assert_eq!(*ran_on.lock(), Some(caller));

        guard.flush();
        assert_eq!(guard.read(|v| v.len()), 1);
    }

    #[test]
    fn test_pipelined_burst_schedules_one_drain_at_a_time() {
        let pool = Arc::new(
            WorkerPool::with_config(WorkerPoolConfig {
                worker_threads: 1,
                queue_size: 4,
                thread_name_prefix: "burst".to_string(),
                collect_stats: true,
            })
            .unwrap(),
        );
        let busy = Pipelined::new(Vec::new(), Arc::clone(&pool));
        let quiet = Pipelined::new(0u32, Arc::clone(&pool));
        for n in 0..64 {
            busy.submit(move |v: &mut Vec<i32>| v.push(n), |_| {});
        }

        let notify = Arc::new(NotifyQueue::new());
        let target = Arc::clone(&notify);
        let applied = Arc::new(Mutex::new(None));
        let sink = Arc::clone(&applied);
        quiet.submit(
            |v: &mut u32| {
                *v = 7;
                *v
            },
            move |value| {
                target
                    .dispatch(Box::new(move || *sink.lock() = Some(value)))
                    .unwrap();
            },
        );

        // Nobody touches `quiet` again; only its scheduled drain can apply it.
        assert!(notify.run_next(Duration::from_secs(5)));
        assert_eq!(*applied.lock(), Some(7));
        assert_eq!(busy.read(|v| v.clone()), (0..64).collect::<Vec<_>>());
    }
}
