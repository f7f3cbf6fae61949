//! The object-reuse pool.
//!
//! Items are filed by identifier in a registry of per-identifier lists.
//! Whenever both are locked, the registry is locked first.

use crate::item::PooledItem;
use crate::pressure::{PressureHandler, PressureSource, Subscription};
use log::{debug, info, trace};
use stash_collections::{StrictMap, StrictVec};
use std::any::Any;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

type Registry = StrictMap<String, Arc<StrictVec<PooledItem>>>;

/// Statistics about a reuse pool
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReuseStats {
    /// Items checked in
    pub check_ins: u64,

    /// Items handed back out
    pub check_outs: u64,

    /// Check-outs that found nothing
    pub misses: u64,

    /// Items dropped by `empty_queue`
    pub evicted: u64,

    /// Low-memory signals received
    pub pressure_events: u64,
}

#[derive(Default)]
struct ReuseCounters {
    check_ins: AtomicU64,
    check_outs: AtomicU64,
    misses: AtomicU64,
    evicted: AtomicU64,
    pressure_events: AtomicU64,
}

impl ReuseCounters {
    fn snapshot(&self) -> ReuseStats {
        ReuseStats {
            check_ins: self.check_ins.load(Ordering::Relaxed),
            check_outs: self.check_outs.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evicted: self.evicted.load(Ordering::Relaxed),
            pressure_events: self.pressure_events.load(Ordering::Relaxed),
        }
    }
}

/// Keyed pool of objects waiting to be reused.
///
/// Construct one per process and share the `Arc` with every consumer.
/// Check-out is last in, first out per identifier.
pub struct ReusePool {
    registry: Registry,
    counters: ReuseCounters,
    pressure: Option<Subscription>,
}

impl ReusePool {
    /// Create a pool that is only emptied explicitly
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            registry: StrictMap::with_name("reuse-registry"),
            counters: ReuseCounters::default(),
            pressure: None,
        })
    }

    /// Create a pool that empties itself whenever `source` signals low memory.
    ///
    /// The subscription lasts as long as the pool.
    pub fn with_pressure(source: Arc<dyn PressureSource>) -> Arc<Self> {
        Arc::new_cyclic(|pool: &Weak<Self>| {
            let pool = pool.clone();
            let handler: PressureHandler = Arc::new(move || {
                if let Some(pool) = pool.upgrade() {
                    pool.on_pressure();
                }
            });
            Self {
                registry: StrictMap::with_name("reuse-registry"),
                counters: ReuseCounters::default(),
                pressure: Some(Subscription::new(source, handler)),
            }
        })
    }

    /// File `payload` for reuse.
    ///
    /// Without an explicit identifier the payload's static type name is used
    /// (see [`default_identifier`](crate::item::default_identifier)). An
    /// already boxed `dyn Any` payload is therefore filed under the box type,
    /// not the type inside it; pass an identifier for those.
    pub fn check_in<P: Any + Send>(&self, payload: P, identifier: Option<&str>, group: &str) {
        self.check_in_item(PooledItem::new(payload, identifier, group));
    }

    /// File an already wrapped item under its identifier
    pub fn check_in_item(&self, item: PooledItem) {
        let identifier = item.identifier().to_owned();
        trace!("Checking in {} (group {})", identifier, item.group());

        // List creation and the push share one registry critical section.
        let filed = self.registry.entry_with(
            identifier.clone(),
            || Arc::new(StrictVec::with_name(identifier.clone())),
            move |list| list.push(item),
        );
        if filed.is_some() {
            self.counters.check_ins.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Take the most recently checked-in payload filed under `identifier`
    pub fn check_out(&self, identifier: &str) -> Option<Box<dyn Any + Send>> {
        self.check_out_item(identifier).map(PooledItem::into_payload)
    }

    /// Take the most recently checked-in payload of type `P` filed under
    /// `identifier`. Items of other types are left in place.
    pub fn check_out_as<P: Any + Send>(&self, identifier: &str) -> Option<P> {
        let item = self.take_last(identifier, |item| item.holds::<P>())?;
        item.downcast::<P>().ok()
    }

    /// Take the most recently checked-in item filed under `identifier`
    pub fn check_out_item(&self, identifier: &str) -> Option<PooledItem> {
        self.take_last(identifier, |_| true)
    }

    fn take_last<F>(&self, identifier: &str, predicate: F) -> Option<PooledItem>
    where
        F: FnMut(&PooledItem) -> bool,
    {
        let taken = self
            .registry
            .get(identifier)
            .and_then(|list| list.remove_last_where(predicate));
        match taken {
            Some(item) => {
                trace!("Checked out {}", identifier);
                self.counters.check_outs.fetch_add(1, Ordering::Relaxed);
                Some(item)
            }
            None => {
                self.counters.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Drop every pooled item and every list.
    ///
    /// Returns the number of items dropped.
    pub fn empty_queue(&self) -> usize {
        let lists = self.registry.take_all();
        let mut evicted = 0;
        for list in lists.values() {
            evicted += list.take_all().len();
        }
        self.counters
            .evicted
            .fetch_add(evicted as u64, Ordering::Relaxed);
        debug!(
            "Emptied reuse pool: {} item(s) across {} identifier(s)",
            evicted,
            lists.len()
        );
        evicted
    }

    fn on_pressure(&self) {
        self.counters.pressure_events.fetch_add(1, Ordering::Relaxed);
        let evicted = self.empty_queue();
        info!("Low memory: evicted {} pooled item(s)", evicted);
    }

    /// Number of items filed under `identifier`
    pub fn available(&self, identifier: &str) -> usize {
        self.registry
            .get(identifier)
            .map_or(0, |list| list.len())
    }

    /// Identifiers that have a list, including emptied ones
    pub fn identifiers(&self) -> Vec<String> {
        self.registry.keys()
    }

    /// Whether the pool follows a low-memory signal
    pub fn is_subscribed(&self) -> bool {
        self.pressure.is_some()
    }

    /// Statistics for this pool
    pub fn stats(&self) -> ReuseStats {
        self.counters.snapshot()
    }
}

impl fmt::Debug for ReusePool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReusePool")
            .field("identifiers", &self.registry.len())
            .field("subscribed", &self.is_subscribed())
            .finish()
    }
}
