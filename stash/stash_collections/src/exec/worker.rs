//! Worker pool that applies deferred container writes.
//!
//! Pipelined containers hand their queued writes to a `WorkerPool`. The pool
//! is also a [`Dispatcher`], so it can serve as the notify context for
//! completion callbacks.

use crate::exec::notify::{DispatchError, Dispatcher, Job};
use crate::shield::panic_message;
use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use log::{debug, error, info, trace, warn};
use parking_lot::Mutex;
use serde::Deserialize;
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle, ThreadId};
use std::time::Instant;
use thiserror::Error;

/// Error when submitting work to the pool
#[derive(Error, Debug)]
pub enum WorkerPoolError {
    /// The pool no longer accepts work
    #[error("worker pool is shutting down")]
    ShuttingDown,

    /// The task queue is full
    #[error("worker pool queue is full")]
    QueueFull,

    /// A worker thread could not be started
    #[error("failed to spawn worker thread: {0}")]
    Spawn(#[from] io::Error),
}

/// Configuration for the worker pool
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WorkerPoolConfig {
    /// Number of worker threads
    pub worker_threads: usize,

    /// Maximum number of tasks waiting for a worker
    pub queue_size: usize,

    /// Name prefix for worker threads
    pub thread_name_prefix: String,

    /// Whether to collect performance statistics
    pub collect_stats: bool,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            worker_threads: num_cpus::get(),
            queue_size: 1024,
            thread_name_prefix: "stash-worker".to_string(),
            collect_stats: true,
        }
    }
}

/// Statistics about the worker pool
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct WorkerPoolStats {
    /// Number of tasks accepted
    pub tasks_queued: u64,

    /// Number of tasks that ran to completion
    pub tasks_completed: u64,

    /// Number of tasks that panicked
    pub tasks_panicked: u64,

    /// Total task execution time (microseconds)
    pub total_execution_time_us: u64,

    /// Total time tasks spent queued (microseconds)
    pub total_queue_time_us: u64,

    /// Maximum task execution time (microseconds)
    pub max_execution_time_us: u64,
}

#[derive(Debug, Default)]
struct WorkerCounters {
    tasks_queued: AtomicU64,
    tasks_completed: AtomicU64,
    tasks_panicked: AtomicU64,
    total_execution_time_us: AtomicU64,
    total_queue_time_us: AtomicU64,
    max_execution_time_us: AtomicU64,
}

struct Task {
    job: Job,
    enqueued_at: Instant,
}

/// A fixed set of threads draining a bounded task queue.
///
/// Dropping the pool stops intake; tasks already queued still run.
pub struct WorkerPool {
    sender: Mutex<Option<Sender<Task>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    worker_ids: Vec<ThreadId>,
    counters: Arc<WorkerCounters>,
    config: WorkerPoolConfig,
}

impl WorkerPool {
    /// Create a pool with `threads` workers and default settings otherwise
    pub fn new(threads: usize) -> Result<Self, WorkerPoolError> {
        Self::with_config(WorkerPoolConfig {
            worker_threads: threads,
            ..Default::default()
        })
    }

    /// Create a pool from an explicit configuration
    pub fn with_config(config: WorkerPoolConfig) -> Result<Self, WorkerPoolError> {
        let threads = config.worker_threads.max(1);
        let (sender, receiver) = bounded(config.queue_size.max(1));
        let counters = Arc::new(WorkerCounters::default());

        info!(
            "Creating worker pool with {} workers and queue size {}",
            threads, config.queue_size
        );

        let mut workers = Vec::with_capacity(threads);
        for id in 0..threads {
            let receiver = receiver.clone();
            let counters = Arc::clone(&counters);
            let collect_stats = config.collect_stats;
            let handle = thread::Builder::new()
                .name(format!("{}-{}", config.thread_name_prefix, id))
                .spawn(move || Self::worker_loop(id, receiver, counters, collect_stats))?;
            workers.push(handle);
        }

        let worker_ids = workers.iter().map(|worker| worker.thread().id()).collect();
        Ok(Self {
            sender: Mutex::new(Some(sender)),
            workers: Mutex::new(workers),
            worker_ids,
            counters,
            config,
        })
    }

    fn worker_loop(
        id: usize,
        receiver: Receiver<Task>,
        counters: Arc<WorkerCounters>,
        collect_stats: bool,
    ) {
        debug!("Worker {}: Starting", id);

        // Ends once every sender is gone and the queue is empty.
        for task in receiver.iter() {
            let queue_time = task.enqueued_at.elapsed();
            let exec_start = Instant::now();
            let result = panic::catch_unwind(AssertUnwindSafe(task.job));
            let exec_time = exec_start.elapsed();

            if collect_stats {
                let exec_us = u64::try_from(exec_time.as_micros()).unwrap_or(u64::MAX);
                let queue_us = u64::try_from(queue_time.as_micros()).unwrap_or(u64::MAX);
                counters
                    .total_queue_time_us
                    .fetch_add(queue_us, Ordering::Relaxed);
                counters
                    .total_execution_time_us
                    .fetch_add(exec_us, Ordering::Relaxed);
                counters
                    .max_execution_time_us
                    .fetch_max(exec_us, Ordering::Relaxed);
            }

            match result {
                Ok(()) => {
                    trace!(
                        "Worker {}: Task completed in {:.2}ms",
                        id,
                        exec_time.as_secs_f64() * 1000.0
                    );
                    if collect_stats {
                        counters.tasks_completed.fetch_add(1, Ordering::Relaxed);
                    }
                }
                Err(payload) => {
                    error!(
                        "Worker {}: Task panicked: {}",
                        id,
                        panic_message(payload.as_ref())
                    );
                    if collect_stats {
                        counters.tasks_panicked.fetch_add(1, Ordering::Relaxed);
                    }
                }
            }
        }

        debug!("Worker {}: Shutting down", id);
    }

    /// Queue a task without blocking; fails if the queue is full.
    pub fn execute<F>(&self, f: F) -> Result<(), WorkerPoolError>
    where
        F: FnOnce() + Send + 'static,
    {
        self.try_submit(Box::new(f)).map_err(|(err, _)| err)
    }

    /// Hands the job back when it could not be queued.
    fn try_submit(&self, job: Job) -> Result<(), (WorkerPoolError, Job)> {
        let sender = self.sender.lock();
        let Some(sender) = sender.as_ref() else {
            return Err((WorkerPoolError::ShuttingDown, job));
        };

        match sender.try_send(Task::new(job)) {
            Ok(()) => {
                self.record_queued();
                Ok(())
            }
            Err(TrySendError::Full(task)) => Err((WorkerPoolError::QueueFull, task.job)),
            Err(TrySendError::Disconnected(task)) => {
                Err((WorkerPoolError::ShuttingDown, task.job))
            }
        }
    }

    /// Queue a task, waiting for room in the queue if necessary.
    pub fn execute_blocking<F>(&self, f: F) -> Result<(), WorkerPoolError>
    where
        F: FnOnce() + Send + 'static,
    {
        let sender = self
            .sender
            .lock()
            .clone()
            .ok_or(WorkerPoolError::ShuttingDown)?;

        sender
            .send(Task::new(Box::new(f)))
            .map_err(|_| WorkerPoolError::ShuttingDown)?;
        self.record_queued();
        Ok(())
    }

    fn record_queued(&self) {
        if self.config.collect_stats {
            self.counters.tasks_queued.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Get current statistics for the pool
    pub fn stats(&self) -> WorkerPoolStats {
        let c = &self.counters;
        WorkerPoolStats {
            tasks_queued: c.tasks_queued.load(Ordering::Relaxed),
            tasks_completed: c.tasks_completed.load(Ordering::Relaxed),
            tasks_panicked: c.tasks_panicked.load(Ordering::Relaxed),
            total_execution_time_us: c.total_execution_time_us.load(Ordering::Relaxed),
            total_queue_time_us: c.total_queue_time_us.load(Ordering::Relaxed),
            max_execution_time_us: c.max_execution_time_us.load(Ordering::Relaxed),
        }
    }

    /// Stop accepting tasks. Queued tasks still run.
    pub fn shutdown(&self) {
        if self.sender.lock().take().is_some() {
            info!("Shutting down worker pool");
        }
    }

    /// Stop accepting tasks and wait for the workers to finish the queue.
    pub fn shutdown_and_join(&self) {
        self.shutdown();

        let current = thread::current().id();
        let workers: Vec<_> = self.workers.lock().drain(..).collect();
        for worker in workers {
            if worker.thread().id() == current {
                warn!("shutdown_and_join called from a worker; not joining itself");
                continue;
            }
            if worker.join().is_err() {
                error!("Worker thread panicked during shutdown");
            }
        }

        info!("Worker pool shutdown complete");
    }

    /// Number of worker threads
    pub fn worker_count(&self) -> usize {
        self.workers.lock().len()
    }

    /// Whether the calling thread is one of this pool's workers.
    ///
    /// A worker must not wait for room in its own queue.
    pub fn is_worker_thread(&self) -> bool {
        let current = thread::current().id();
        self.worker_ids.contains(&current)
    }

    /// Whether the pool has stopped accepting tasks
    pub fn is_shutting_down(&self) -> bool {
        self.sender.lock().is_none()
    }

    /// The configuration this pool was built with
    pub fn config(&self) -> &WorkerPoolConfig {
        &self.config
    }
}

impl Task {
    fn new(job: Job) -> Self {
        Self {
            job,
            enqueued_at: Instant::now(),
        }
    }
}

impl Dispatcher for WorkerPool {
    fn dispatch(&self, job: Job) -> Result<(), DispatchError> {
        match self.try_submit(job) {
            Ok(()) => Ok(()),
            Err((WorkerPoolError::QueueFull, job)) if self.is_worker_thread() => {
                // Already on this context; waiting on our own queue could stall it.
                trace!("Worker pool queue full; running notification on this worker");
                if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(job)) {
                    error!(
                        "Notification panicked: {}",
                        panic_message(payload.as_ref())
                    );
                }
                Ok(())
            }
            Err((WorkerPoolError::QueueFull, job)) => {
                debug!("Worker pool queue full; waiting for room");
                self.execute_blocking(job).map_err(|err| {
                    warn!("Dropping notification: {}", err);
                    DispatchError::Closed
                })
            }
            Err((err, _)) => {
                warn!("Dropping notification: {}", err);
                Err(DispatchError::Closed)
            }
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
        debug!("Worker pool dropped - workers exit once the queue is empty");
    }
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("config", &self.config)
            .field("shutting_down", &self.is_shutting_down())
            .finish()
    }
}
