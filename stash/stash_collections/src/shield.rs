//! Containment of panicking caller callbacks.
//!
//! Predicates, transforms and comparators run inside a container's critical
//! section. A panic there is caught before it leaves the section, logged, and
//! replaced by the operation's fallback value.

use log::error;
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};

/// Run `f`, returning `fallback()` if it panics.
pub(crate) fn shielded<R>(
    container: &str,
    operation: &'static str,
    fallback: impl FnOnce() -> R,
    f: impl FnOnce() -> R,
) -> R {
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(value) => value,
        Err(payload) => {
            error!(
                "{}: callback panicked during {}: {}",
                container,
                operation,
                panic_message(payload.as_ref())
            );
            fallback()
        }
    }
}

/// Best-effort text of a panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        msg
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.as_str()
    } else {
        "<unknown panic>"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shielded_passes_value_through() {
        let value = shielded("test", "op", || 0, || 7);
        assert_eq!(value, 7);
    }

    #[test]
    fn test_shielded_returns_fallback_on_panic() {
        let value: Vec<i32> = shielded("test", "op", Vec::new, || panic!("boom"));
        assert!(value.is_empty());
    }

    #[test]
    fn test_panic_message() {
        let payload = panic::catch_unwind(|| {
            panic!("static message");
        })
        .unwrap_err();
        assert_eq!(panic_message(payload.as_ref()), "static message");

        let payload = panic::catch_unwind(|| {
            panic!("formatted {}", 42);
        })
        .unwrap_err();
        assert_eq!(panic_message(payload.as_ref()), "formatted 42");
    }
}
