#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

//! # Stash Reuse
//!
//! A keyed pool of objects waiting to be reused, built on the
//! [`stash_collections`] containers.
//!
//! - Check-in files a payload under an identifier, by default its type name
//! - Check-out hands back the most recent payload filed under an identifier
//! - The whole pool is emptied on demand or when a [`PressureSource`] reports
//!   low memory
//!
//! ```
//! use std::sync::Arc;
//! use stash_reuse::{MemoryPressure, ReusePool};
//!
//! let pressure = Arc::new(MemoryPressure::new());
//! let pool = ReusePool::with_pressure(pressure.clone());
//!
//! pool.check_in(String::from("cell"), Some("row"), "inbox");
//! assert_eq!(pool.check_out_as::<String>("row").as_deref(), Some("cell"));
//!
//! pool.check_in(String::from("cell"), Some("row"), "inbox");
//! pressure.trigger();
//! assert_eq!(pool.available("row"), 0);
//! ```

/// Pooled item wrapper
pub mod item;

/// The reuse pool
pub mod pool;

/// Low-memory signal boundary
pub mod pressure;

pub use item::PooledItem;
pub use pool::{ReusePool, ReuseStats};
pub use pressure::{MemoryPressure, PressureHandler, PressureSource, Subscription, SubscriptionId};
