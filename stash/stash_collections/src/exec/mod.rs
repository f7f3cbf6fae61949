//! Execution contexts.
//!
//! - [`WorkerPool`] applies the queued writes of pipelined containers
//! - [`NotifyQueue`] is a foreground context pumped by its owner
//! - [`Dispatcher`] and [`Completion`] route write-completion callbacks

pub mod notify;
pub mod worker;

pub use notify::{Completion, DispatchError, Dispatcher, Job, NotifyQueue};
pub use worker::{WorkerPool, WorkerPoolConfig, WorkerPoolError, WorkerPoolStats};
