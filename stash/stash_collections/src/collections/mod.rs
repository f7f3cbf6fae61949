//! Thread-safe containers.
//!
//! Each container is generic over a [`Guard`](crate::sync::Guard) strategy.
//! The same operations are available whether the collection sits behind a
//! [`Strict`](crate::sync::Strict) mutex or a
//! [`Pipelined`](crate::sync::Pipelined) reader-writer queue.
//!
//! Accessors hand out copies. No caller ever holds a reference into the
//! guarded collection.

pub mod map;
pub mod set;
pub mod vec;

pub use map::SafeMap;
pub use set::SafeSet;
pub use vec::SafeVec;

use crate::error::Result;
use crate::exec::notify::notify;
use crate::exec::Completion;
use log::warn;

/// Build the `after` half of an asynchronous write whose precondition may not
/// hold when it is applied. A failed write is a logged no-op; the error still
/// reaches the completion.
pub(crate) fn settle<R: Send + 'static>(
    container: String,
    operation: &'static str,
    done: Option<Completion<Result<R>>>,
) -> impl FnOnce(Result<R>) + Send + 'static {
    move |result| {
        if let Err(err) = &result {
            warn!("{}: {} skipped: {}", container, operation, err);
        }
        notify(done, result);
    }
}
