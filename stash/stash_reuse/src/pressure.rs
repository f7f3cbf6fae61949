//! Low-memory signal boundary.
//!
//! The host owns the concrete signal. It only has to implement
//! [`PressureSource`]: accept handlers, drop them again, and call them
//! whenever memory runs low, from any thread.

use log::{debug, info};
use stash_collections::{DispatchError, Dispatcher, StrictMap};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Callback run when memory runs low
pub type PressureHandler = Arc<dyn Fn() + Send + Sync>;

/// Handle identifying one registered handler
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

impl SubscriptionId {
    /// Wrap a raw id handed out by a source
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// The raw id
    pub fn raw(&self) -> u64 {
        self.0
    }
}

/// Something that can tell subscribers memory is running low.
pub trait PressureSource: Send + Sync {
    /// Register `handler` and return its id
    fn subscribe(&self, handler: PressureHandler) -> SubscriptionId;

    /// Drop the handler registered under `id`. Unknown ids are ignored.
    fn unsubscribe(&self, id: SubscriptionId);
}

/// A registered handler, unregistered again when dropped.
pub struct Subscription {
    source: Arc<dyn PressureSource>,
    id: SubscriptionId,
}

impl Subscription {
    /// Register `handler` with `source`
    pub fn new(source: Arc<dyn PressureSource>, handler: PressureHandler) -> Self {
        let id = source.subscribe(handler);
        debug!("Subscribed to memory pressure as {}", id.raw());
        Self { source, id }
    }

    /// Id assigned by the source
    pub fn id(&self) -> SubscriptionId {
        self.id
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.source.unsubscribe(self.id);
        debug!("Unsubscribed {} from memory pressure", self.id.raw());
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}

/// Broadcast [`PressureSource`] raised explicitly by the host.
pub struct MemoryPressure {
    handlers: StrictMap<SubscriptionId, PressureHandler>,
    next_id: AtomicU64,
    raised: AtomicU64,
}

impl MemoryPressure {
    /// Create a source with no subscribers
    pub fn new() -> Self {
        Self {
            handlers: StrictMap::with_name("memory-pressure"),
            next_id: AtomicU64::new(1),
            raised: AtomicU64::new(0),
        }
    }

    /// Run every handler on the calling thread.
    ///
    /// Returns the number of handlers run. Handlers may unsubscribe while
    /// running; the set is copied before any of them is called.
    pub fn trigger(&self) -> usize {
        self.raised.fetch_add(1, Ordering::Relaxed);
        let handlers = self.handlers.values();
        info!("Memory pressure raised, notifying {} subscriber(s)", handlers.len());
        for handler in &handlers {
            handler();
        }
        handlers.len()
    }

    /// Run every handler as one job on `target`.
    ///
    /// Fails if `target` no longer accepts jobs; the signal is then not raised.
    pub fn trigger_on(self: &Arc<Self>, target: &dyn Dispatcher) -> Result<(), DispatchError> {
        let source = Arc::clone(self);
        target.dispatch(Box::new(move || {
            source.trigger();
        }))
    }

    /// Number of registered handlers
    pub fn subscribers(&self) -> usize {
        self.handlers.len()
    }

    /// How many times the signal has been raised
    pub fn raised(&self) -> u64 {
        self.raised.load(Ordering::Relaxed)
    }
}

impl Default for MemoryPressure {
    fn default() -> Self {
        Self::new()
    }
}

impl PressureSource for MemoryPressure {
    fn subscribe(&self, handler: PressureHandler) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.handlers.insert(id, handler);
        id
    }

    fn unsubscribe(&self, id: SubscriptionId) {
        self.handlers.remove(&id);
    }
}

impl fmt::Debug for MemoryPressure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryPressure")
            .field("subscribers", &self.subscribers())
            .field("raised", &self.raised())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stash_collections::NotifyQueue;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_subscription_lifecycle() {
        let pressure = Arc::new(MemoryPressure::new());
        let calls = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&calls);
        let subscription = Subscription::new(
            pressure.clone(),
            Arc::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        );
        assert_eq!(pressure.subscribers(), 1);
        assert_eq!(pressure.trigger(), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        drop(subscription);
        assert_eq!(pressure.subscribers(), 0);
        assert_eq!(pressure.trigger(), 0);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(pressure.raised(), 2);
    }

    #[test]
    fn test_trigger_on_dispatcher() {
        let pressure = Arc::new(MemoryPressure::new());
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let _subscription = Subscription::new(
            pressure.clone(),
            Arc::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        );

        let queue = NotifyQueue::new();
        pressure.trigger_on(&queue).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(queue.run_pending(), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
