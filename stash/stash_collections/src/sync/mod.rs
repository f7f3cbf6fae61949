//! Locks and the synchronization strategies built on them.
//!
//! - Instrumented mutex and reader-writer locks
//! - The [`Guard`] strategy trait with its [`Strict`] and [`Pipelined`] implementations

pub mod lock;
pub mod strategy;

pub use lock::{
    LockStats, TrackedMutex, TrackedMutexGuard, TrackedRwLock, TrackedRwLockReadGuard,
    TrackedRwLockWriteGuard,
};
pub use strategy::{Guard, PipelineStats, Pipelined, Strict};
