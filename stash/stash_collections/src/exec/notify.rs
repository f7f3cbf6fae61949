//! Notify contexts for write-completion callbacks.
//!
//! A completion never runs inside the container's exclusive section: the
//! write finishes, the lock is released, and only then is the callback posted
//! to the [`Dispatcher`] the caller named.

use crate::shield::panic_message;
use crossbeam_channel::{unbounded, Receiver, Sender};
use log::{error, warn};
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// A unit of work posted to an execution context.
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// Error when posting a job to an execution context
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DispatchError {
    /// The context has stopped accepting jobs; the job was dropped
    #[error("execution context is shut down")]
    Closed,
}

/// An execution context that accepts jobs from any thread.
pub trait Dispatcher: Send + Sync {
    /// Post `job` for execution on this context.
    ///
    /// The job never runs on the calling thread unless the caller already
    /// belongs to this context.
    fn dispatch(&self, job: Job) -> Result<(), DispatchError>;
}

/// A callback bound to the context it must run on.
pub struct Completion<R> {
    target: Arc<dyn Dispatcher>,
    callback: Box<dyn FnOnce(R) + Send + 'static>,
}

impl<R: Send + 'static> Completion<R> {
    /// Run `callback` on `target` once the write has been applied.
    pub fn new(target: Arc<dyn Dispatcher>, callback: impl FnOnce(R) + Send + 'static) -> Self {
        Self {
            target,
            callback: Box::new(callback),
        }
    }

    pub(crate) fn deliver(self, value: R) {
        let callback = self.callback;
        if let Err(err) = self.target.dispatch(Box::new(move || callback(value))) {
            warn!("Completion dropped: {}", err);
        }
    }
}

impl<R> fmt::Debug for Completion<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Completion")
    }
}

/// Deliver `value` to `done` if a completion was requested.
pub(crate) fn notify<R: Send + 'static>(done: Option<Completion<R>>, value: R) {
    if let Some(done) = done {
        done.deliver(value);
    }
}

/// A foreground context: jobs run only on the thread that pumps the queue.
///
/// This plays the role of an application's main loop. Cloned handles share
/// one queue.
#[derive(Clone)]
pub struct NotifyQueue {
    sender: Sender<Job>,
    receiver: Receiver<Job>,
}

impl NotifyQueue {
    /// Create an empty queue
    pub fn new() -> Self {
        let (sender, receiver) = unbounded();
        Self { sender, receiver }
    }

    /// Run every job queued so far on the calling thread.
    ///
    /// Returns the number of jobs run.
    pub fn run_pending(&self) -> usize {
        let mut ran = 0;
        while let Ok(job) = self.receiver.try_recv() {
            Self::run(job);
            ran += 1;
        }
        ran
    }

    /// Wait up to `timeout` for one job and run it.
    ///
    /// Returns `false` if nothing arrived in time.
    pub fn run_next(&self, timeout: Duration) -> bool {
        match self.receiver.recv_timeout(timeout) {
            Ok(job) => {
                Self::run(job);
                true
            }
            Err(_) => false,
        }
    }

    /// Number of jobs waiting to run
    pub fn pending(&self) -> usize {
        self.receiver.len()
    }

    fn run(job: Job) {
        if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(job)) {
            error!(
                "Notification panicked: {}",
                panic_message(payload.as_ref())
            );
        }
    }
}

impl Default for NotifyQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl Dispatcher for NotifyQueue {
    fn dispatch(&self, job: Job) -> Result<(), DispatchError> {
        // The queue owns a receiver, so the channel cannot be disconnected.
        self.sender.send(job).map_err(|_| DispatchError::Closed)
    }
}

impl fmt::Debug for NotifyQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NotifyQueue")
            .field("pending", &self.pending())
            .finish()
    }
}
