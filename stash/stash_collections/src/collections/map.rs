//! Thread-safe key-value map.

use crate::exec::notify::notify;
use crate::exec::{Completion, WorkerPool};
use crate::shield::shielded;
use crate::sync::{Guard, Pipelined, Strict};
use std::borrow::Borrow;
use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use std::marker::PhantomData;
use std::mem;
use std::ptr;
use std::sync::Arc;

/// A hash map whose every operation is atomic.
pub struct SafeMap<K, V, G = Strict<HashMap<K, V>>> {
    guard: G,
    _entries: PhantomData<fn() -> (K, V)>,
}

impl<K: Eq + Hash + Send, V: Send> SafeMap<K, V> {
    /// Create an empty map behind a mutex
    pub fn new() -> Self {
        Self::with_guard(Strict::new(HashMap::new()))
    }

    /// Create an empty map with a diagnostic name
    pub fn with_name(name: impl Into<String>) -> Self {
        Self::with_guard(Strict::with_name(HashMap::new(), name))
    }
}

impl<K, V> SafeMap<K, V, Pipelined<HashMap<K, V>>>
where
    K: Eq + Hash + Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    /// Create an empty map whose deferred writes run on `executor`
    pub fn pipelined(executor: Arc<WorkerPool>) -> Self {
        Self::pipelined_from(HashMap::new(), executor)
    }

    /// Adopt `entries` behind a reader-writer queue
    pub fn pipelined_from(entries: HashMap<K, V>, executor: Arc<WorkerPool>) -> Self {
        Self::with_guard(Pipelined::new(entries, executor))
    }

    /// Apply every queued write on the calling thread
    pub fn flush(&self) {
        self.guard.flush();
    }
}

impl<K, V, G> SafeMap<K, V, G>
where
    K: Eq + Hash,
    G: Guard<HashMap<K, V>>,
{
    /// Wrap a guard that already owns the map
    pub fn with_guard(guard: G) -> Self {
        Self {
            guard,
            _entries: PhantomData,
        }
    }

    /// The synchronization strategy
    pub fn guard(&self) -> &G {
        &self.guard
    }

    /// Diagnostic name
    pub fn name(&self) -> &str {
        self.guard.name()
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.guard.read(|entries| entries.len())
    }

    /// Whether the map has no entries
    pub fn is_empty(&self) -> bool {
        self.guard.read(|entries| entries.is_empty())
    }

    /// Copy of the value stored under `key`
    pub fn get<Q>(&self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
        V: Clone,
    {
        self.guard.read(|entries| entries.get(key).cloned())
    }

    /// Whether `key` is present
    pub fn contains_key<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.guard.read(|entries| entries.contains_key(key))
    }

    /// Copies of every key, in no particular order
    pub fn keys(&self) -> Vec<K>
    where
        K: Clone,
    {
        self.guard.read(|entries| entries.keys().cloned().collect())
    }

    /// Copies of every value, in no particular order
    pub fn values(&self) -> Vec<V>
    where
        V: Clone,
    {
        self.guard.read(|entries| entries.values().cloned().collect())
    }

    /// Copy of the whole map
    pub fn snapshot(&self) -> HashMap<K, V>
    where
        K: Clone,
        V: Clone,
    {
        self.guard.read(|entries| entries.clone())
    }

    /// Copies of the entries matching `predicate`
    pub fn filter<F>(&self, mut predicate: F) -> HashMap<K, V>
    where
        K: Clone,
        V: Clone,
        F: FnMut(&K, &V) -> bool,
    {
        self.guard.read(|entries| {
            shielded(self.name(), "filter", HashMap::new, || {
                entries
                    .iter()
                    .filter(|(key, value)| predicate(key, value))
                    .map(|(key, value)| (key.clone(), value.clone()))
                    .collect()
            })
        })
    }

    /// Visit every entry under one critical section.
    ///
    /// `f` must not call back into this map.
    pub fn for_each<F>(&self, mut f: F)
    where
        F: FnMut(&K, &V),
    {
        self.guard.read(|entries| {
            shielded(self.name(), "for_each", || (), || {
                entries.iter().for_each(|(key, value)| f(key, value))
            })
        })
    }

    /// Iterate over the keys present now, locking once per step.
    ///
    /// Entries removed after the iterator was created are skipped. Entries
    /// added after it was created are not visited.
    pub fn iter(&self) -> Iter<'_, K, V, G>
    where
        K: Clone,
    {
        Iter {
            map: self,
            keys: self.keys().into_iter(),
        }
    }

    /// Remove `key` and return its value
    pub fn remove<Q>(&self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.guard.write(|entries| entries.remove(key))
    }

    /// Empty the map and return what it held
    pub fn take_all(&self) -> HashMap<K, V> {
        self.guard.write(mem::take)
    }

    /// Create the value for `key` if absent, then apply `update` to it, all in
    /// one critical section.
    ///
    /// Returns `None` if either callback panicked.
    pub fn entry_with<R, M, U>(&self, key: K, make: M, update: U) -> Option<R>
    where
        M: FnOnce() -> V,
        U: FnOnce(&mut V) -> R,
    {
        self.guard.write(|entries| {
            shielded(self.name(), "entry_with", || None, || {
                Some(update(entries.entry(key).or_insert_with(make)))
            })
        })
    }

    /// Copy of the value under `key`, created by `make` if absent.
    pub fn get_or_insert_with<M>(&self, key: K, make: M) -> Option<V>
    where
        V: Clone,
        M: FnOnce() -> V,
    {
        self.entry_with(key, make, |value| value.clone())
    }
}

impl<K, V, G> SafeMap<K, V, G>
where
    K: Eq + Hash + Send + 'static,
    V: Send + 'static,
    G: Guard<HashMap<K, V>>,
{
    /// Store `value` under `key`
    pub fn insert(&self, key: K, value: V) {
        self.insert_async(key, value, None);
    }

    /// Store `value` under `key` and hand the replaced value to `done`
    pub fn insert_async(&self, key: K, value: V, done: Option<Completion<Option<V>>>) {
        self.guard.submit(
            move |entries: &mut HashMap<K, V>| entries.insert(key, value),
            move |previous| notify(done, previous),
        );
    }

    /// Subscript assignment. `None` is ignored.
    pub fn set(&self, key: K, value: Option<V>) {
        if let Some(value) = value {
            self.insert(key, value);
        }
    }

    /// Remove `key` and hand its value to `done`
    pub fn remove_async(&self, key: K, done: Option<Completion<Option<V>>>) {
        self.guard.submit(
            move |entries: &mut HashMap<K, V>| entries.remove(&key),
            move |removed| notify(done, removed),
        );
    }

    /// Replace the whole contents with `entries`
    pub fn replace_all(&self, entries: HashMap<K, V>) {
        self.guard
            .submit(move |current: &mut HashMap<K, V>| *current = entries, |()| {});
    }

    /// Remove every entry
    pub fn clear(&self) {
        self.clear_async(None);
    }

    /// Remove every entry and report to `done` once applied
    pub fn clear_async(&self, done: Option<Completion<()>>) {
        self.guard.submit(
            |entries: &mut HashMap<K, V>| entries.clear(),
            move |()| notify(done, ()),
        );
    }
}

/// Iterator returned by [`SafeMap::iter`]
pub struct Iter<'a, K, V, G> {
    map: &'a SafeMap<K, V, G>,
    keys: std::vec::IntoIter<K>,
}

impl<K, V, G> Iterator for Iter<'_, K, V, G>
where
    K: Eq + Hash + Clone,
    V: Clone,
    G: Guard<HashMap<K, V>>,
{
    type Item = (K, V);

    fn next(&mut self) -> Option<(K, V)> {
        loop {
            let key = self.keys.next()?;
            if let Some(value) = self.map.get(&key) {
                return Some((key, value));
            }
        }
    }
}

impl<K: Eq + Hash + Send, V: Send> Default for SafeMap<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Eq + Hash + Send, V: Send> From<HashMap<K, V>> for SafeMap<K, V> {
    fn from(entries: HashMap<K, V>) -> Self {
        Self::with_guard(Strict::new(entries))
    }
}

impl<K: Eq + Hash + Send, V: Send> FromIterator<(K, V)> for SafeMap<K, V> {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self::from(iter.into_iter().collect::<HashMap<_, _>>())
    }
}

/// The right-hand side is copied under its own lock first.
impl<K, V, G> PartialEq for SafeMap<K, V, G>
where
    K: Eq + Hash + Clone,
    V: PartialEq + Clone,
    G: Guard<HashMap<K, V>>,
{
    fn eq(&self, other: &Self) -> bool {
        if ptr::eq(self, other) {
            return true;
        }
        let theirs = other.snapshot();
        self.guard.read(|entries| *entries == theirs)
    }
}

impl<K, V, G> fmt::Debug for SafeMap<K, V, G>
where
    K: Eq + Hash + fmt::Debug,
    V: fmt::Debug,
    G: Guard<HashMap<K, V>>,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.guard
            .read(|entries| f.debug_map().entries(entries.iter()).finish())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::NotifyQueue;
    use parking_lot::Mutex;
    use std::time::Duration;

    #[test]
    fn test_basic_operations() {
        let map = SafeMap::with_name("settings");
        map.insert("a".to_string(), 1);
        map.insert("b".to_string(), 2);
        map.set("c".to_string(), Some(3));
        map.set("d".to_string(), None);

        assert_eq!(map.len(), 3);
        assert_eq!(map.get("a"), Some(1));
        assert_eq!(map.get("d"), None);
        assert!(map.contains_key("c"));

        let mut keys = map.keys();
        keys.sort();
        assert_eq!(keys, vec!["a", "b", "c"]);
        let mut values = map.values();
        values.sort();
        assert_eq!(values, vec![1, 2, 3]);

        assert_eq!(map.remove("b"), Some(2));
        assert_eq!(map.remove("b"), None);
        assert_eq!(map.filter(|_, v| *v > 1).len(), 1);

        let mut sum = 0;
        map.for_each(|_, v| sum += v);
        assert_eq!(sum, 4);
    }

    #[test]
    fn test_entry_with_creates_once() {
        let map: SafeMap<&str, Vec<u8>> = SafeMap::new();
        let mut created = 0;
        for n in 0..3 {
            let len = map.entry_with(
                "k",
                || {
                    created += 1;
                    Vec::new()
                },
                |list| {
                    list.push(n);
                    list.len()
                },
            );
            assert_eq!(len, Some(n as usize + 1));
        }
        assert_eq!(created, 1);
        assert_eq!(map.get_or_insert_with("k", Vec::new), Some(vec![0, 1, 2]));
        assert_eq!(map.get_or_insert_with("j", || vec![9]), Some(vec![9]));
    }

    #[test]
    fn test_entry_with_contains_panics() {
        let map: SafeMap<u8, u8> = SafeMap::new();
        let result: Option<()> = map.entry_with(1, || 0, |_| panic!("update failed"));
        assert_eq!(result, None);
        assert!(!map.guard().is_locked());
    }

    #[test]
    fn test_iterator_skips_removed_entries() {
        let map: SafeMap<u32, u32> = (0..4).map(|n| (n, n * n)).collect();
        let mut iter = map.iter();
        let (first, _) = iter.next().unwrap();
        for key in 0..4 {
            if key != first {
                map.remove(&key);
            }
        }
        assert_eq!(iter.next(), None);
    }

    #[test]
    fn test_replace_take_and_equality() {
        let a: SafeMap<u8, char> = [(1, 'x'), (2, 'y')].into_iter().collect();
        let b = SafeMap::new();
        b.replace_all(a.snapshot());
        assert_eq!(a, b);
        assert_eq!(a, a);

        b.insert(3, 'z');
        assert_ne!(a, b);
        assert_eq!(format!("{:?}", SafeMap::from(HashMap::from([(1, 'x')]))), "{1: 'x'}");

        let taken = b.take_all();
        assert_eq!(taken.len(), 3);
        assert!(b.is_empty());
    }

    #[test]
    fn test_pipelined_insert_reports_previous_value() {
        let executor = Arc::new(WorkerPool::new(2).unwrap());
        let map = SafeMap::pipelined(executor);
        let notify = Arc::new(NotifyQueue::new());
        let previous = Arc::new(Mutex::new(Vec::new()));

        map.insert("key", 1);
        let sink = Arc::clone(&previous);
        map.insert_async(
            "key",
            2,
            Some(Completion::new(notify.clone(), move |old| sink.lock().push(old))),
        );
        let sink = Arc::clone(&previous);
        map.remove_async(
            "missing",
            Some(Completion::new(notify.clone(), move |old| sink.lock().push(old))),
        );

        assert!(notify.run_next(Duration::from_secs(5)));
        assert!(notify.run_next(Duration::from_secs(5)));
        let previous = previous.lock();
        assert!(previous.contains(&Some(1)));
        assert!(previous.contains(&None));
        assert_eq!(map.get("key"), Some(2));

        map.clear();
        map.flush();
        assert!(map.is_empty());
    }
}
