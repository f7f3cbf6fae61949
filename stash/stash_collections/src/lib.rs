#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

//! # Stash Collections
//!
//! Thread-safe containers whose every operation appears atomic to concurrent
//! callers.
//!
//! This crate provides:
//!
//! - [`SafeVec`], [`SafeMap`] and [`SafeSet`], generic over a synchronization
//!   strategy
//! - The [`Strict`] strategy, one mutex serializing every access
//! - The [`Pipelined`] strategy, concurrent reads with exclusive writes that
//!   may be deferred to a [`WorkerPool`]
//! - Execution contexts for write-completion callbacks
//!
//! ## Choosing a strategy
//!
//! ```
//! use std::sync::Arc;
//! use stash_collections::{PipelinedVec, StrictVec, WorkerPool};
//!
//! let strict: StrictVec<u32> = StrictVec::new();
//! strict.push(1);
//! assert_eq!(strict.snapshot(), vec![1]);
//!
//! let executor = Arc::new(WorkerPool::new(2).unwrap());
//! let pipelined: PipelinedVec<u32> = PipelinedVec::pipelined(executor);
//! pipelined.push(1);
//! // Reads observe every write issued before them.
//! assert_eq!(pipelined.snapshot(), vec![1]);
//! ```

/// Thread-safe sequence, map and set
pub mod collections;

/// Error types
pub mod error;

/// Write executors and notify contexts
pub mod exec;

/// Tracked locks and synchronization strategies
pub mod sync;

mod shield;

use std::collections::{HashMap, HashSet};

// Re-export key types for easier access
pub use collections::{SafeMap, SafeSet, SafeVec};
pub use error::{CollectionError, Result};
pub use exec::{
    Completion, DispatchError, Dispatcher, NotifyQueue, WorkerPool, WorkerPoolConfig,
};
pub use sync::{Guard, Pipelined, Strict};

/// Sequence behind a mutex
pub type StrictVec<T> = SafeVec<T, Strict<Vec<T>>>;

/// Map behind a mutex
pub type StrictMap<K, V> = SafeMap<K, V, Strict<HashMap<K, V>>>;

/// Set behind a mutex
pub type StrictSet<T> = SafeSet<T, Strict<HashSet<T>>>;

/// Sequence behind a reader-writer queue
pub type PipelinedVec<T> = SafeVec<T, Pipelined<Vec<T>>>;

/// Map behind a reader-writer queue
pub type PipelinedMap<K, V> = SafeMap<K, V, Pipelined<HashMap<K, V>>>;
