//! Thread-safe ordered sequence.

use super::settle;
use crate::error::{CollectionError, Result};
use crate::exec::notify::notify;
use crate::exec::{Completion, WorkerPool};
use crate::shield::shielded;
use crate::sync::{Guard, Pipelined, Strict};
use std::cmp::Ordering;
use std::fmt;
use std::marker::PhantomData;
use std::mem;
use std::ops::AddAssign;
use std::ptr;
use std::sync::Arc;

/// An ordered sequence whose every operation is atomic.
///
/// `G` decides how operations are serialized. The default is a [`Strict`]
/// mutex; see [`SafeVec::pipelined`] for the reader-writer queue.
pub struct SafeVec<T, G = Strict<Vec<T>>> {
    guard: G,
    _items: PhantomData<fn() -> T>,
}

impl<T: Send> SafeVec<T> {
    /// Create an empty sequence behind a mutex
    pub fn new() -> Self {
        Self::with_guard(Strict::new(Vec::new()))
    }

    /// Create an empty sequence with a diagnostic name
    pub fn with_name(name: impl Into<String>) -> Self {
        Self::with_guard(Strict::with_name(Vec::new(), name))
    }
}

impl<T: Send + Sync + 'static> SafeVec<T, Pipelined<Vec<T>>> {
    /// Create an empty sequence whose deferred writes run on `executor`
    pub fn pipelined(executor: Arc<WorkerPool>) -> Self {
        Self::pipelined_from(Vec::new(), executor)
    }

    /// Adopt `items` behind a reader-writer queue
    pub fn pipelined_from(items: Vec<T>, executor: Arc<WorkerPool>) -> Self {
        Self::with_guard(Pipelined::new(items, executor))
    }

    /// Apply every queued write on the calling thread
    pub fn flush(&self) {
        self.guard.flush();
    }
}

impl<T, G: Guard<Vec<T>>> SafeVec<T, G> {
    /// Wrap a guard that already owns the collection
    pub fn with_guard(guard: G) -> Self {
        Self {
            guard,
            _items: PhantomData,
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

    // ----- reads -----

    /// Number of elements
    pub fn len(&self) -> usize {
        self.guard.read(|items| items.len())
    }

    /// Whether the sequence has no elements
    pub fn is_empty(&self) -> bool {
        self.guard.read(|items| items.is_empty())
    }

    /// Copy of the element at `index`, or `None` when out of range.
    pub fn get(&self, index: usize) -> Option<T>
    where
        T: Clone,
    {
        self.guard.read(|items| items.get(index).cloned())
    }

    /// Copy of the first element
    pub fn first(&self) -> Option<T>
    where
        T: Clone,
    {
        self.guard.read(|items| items.first().cloned())
    }

    /// Copy of the last element
    pub fn last(&self) -> Option<T>
    where
        T: Clone,
    {
        self.guard.read(|items| items.last().cloned())
    }

    /// Copy of the whole sequence
    pub fn snapshot(&self) -> Vec<T>
    where
        T: Clone,
    {
        self.guard.read(|items| items.clone())
    }

    /// Whether an element equal to `value` is present
    pub fn contains(&self, value: &T) -> bool
    where
        T: PartialEq,
    {
        self.guard.read(|items| items.contains(value))
    }

    /// Index of the first element equal to `value`
    pub fn index_of(&self, value: &T) -> Option<usize>
    where
        T: PartialEq,
    {
        self.guard
            .read(|items| items.iter().position(|item| item == value))
    }

    /// Index of the first element matching `predicate`.
    pub fn position<F>(&self, mut predicate: F) -> Option<usize>
    where
        F: FnMut(&T) -> bool,
    {
        self.guard.read(|items| {
            shielded(self.name(), "position", || None, || {
                items.iter().position(|item| predicate(item))
            })
        })
    }

    /// Whether any element matches `predicate`
    pub fn contains_where<F>(&self, mut predicate: F) -> bool
    where
        F: FnMut(&T) -> bool,
    {
        self.guard.read(|items| {
            shielded(self.name(), "contains_where", || false, || {
                items.iter().any(|item| predicate(item))
            })
        })
    }

    /// Copy of the first element matching `predicate`
    pub fn first_where<F>(&self, mut predicate: F) -> Option<T>
    where
        T: Clone,
        F: FnMut(&T) -> bool,
    {
        self.guard.read(|items| {
            shielded(self.name(), "first_where", || None, || {
                items.iter().find(|item| predicate(item)).cloned()
            })
        })
    }

    /// Copies of every element matching `predicate`, in order.
    pub fn filter<F>(&self, mut predicate: F) -> Vec<T>
    where
        T: Clone,
        F: FnMut(&T) -> bool,
    {
        self.guard.read(|items| {
            shielded(self.name(), "filter", Vec::new, || {
                items.iter().filter(|item| predicate(item)).cloned().collect()
            })
        })
    }

    /// Transform every element, in order.
    pub fn map<U, F>(&self, f: F) -> Vec<U>
    where
        F: FnMut(&T) -> U,
    {
        self.guard.read(|items| {
            shielded(self.name(), "map", Vec::new, || items.iter().map(f).collect())
        })
    }

    /// Transform every element, dropping the `None` results.
    pub fn filter_map<U, F>(&self, f: F) -> Vec<U>
    where
        F: FnMut(&T) -> Option<U>,
    {
        self.guard.read(|items| {
            shielded(self.name(), "filter_map", Vec::new, || {
                items.iter().filter_map(f).collect()
            })
        })
    }

    /// Visit every element under one critical section.
    ///
    /// `f` must not call back into this sequence.
    pub fn for_each<F>(&self, f: F)
    where
        F: FnMut(&T),
    {
        self.guard.read(|items| {
            shielded(self.name(), "for_each", || (), || items.iter().for_each(f))
        })
    }

    /// Sorted copy of the sequence. The sequence itself is left as is.
    pub fn sorted_by<F>(&self, mut compare: F) -> Vec<T>
    where
        T: Clone,
        F: FnMut(&T, &T) -> Ordering,
    {
        let mut copy = self.snapshot();
        shielded(self.name(), "sorted_by", Vec::new, move || {
            copy.sort_by(|a, b| compare(a, b));
            copy
        })
    }

    /// Cursor iterator that locks once per step.
    ///
    /// Elements inserted or removed by other threads between two steps may be
    /// seen, skipped or repeated.
    pub fn iter(&self) -> Iter<'_, T, G> {
        Iter {
            vec: self,
            cursor: 0,
        }
    }

    // ----- synchronous writes -----

    /// Remove and return the element at `index`
    pub fn remove_at(&self, index: usize) -> Result<T> {
        self.guard.write(|items| remove_at(items, index))
    }

    /// Remove and return the first element
    pub fn remove_first(&self) -> Result<T> {
        self.guard.write(remove_first)
    }

    /// Remove and return the last element
    pub fn remove_last(&self) -> Result<T> {
        self.guard.write(remove_last)
    }

    /// Remove and return the first element matching `predicate`.
    pub fn remove_where<F>(&self, mut predicate: F) -> Option<T>
    where
        F: FnMut(&T) -> bool,
    {
        self.guard.write(|items| {
            shielded(self.name(), "remove_where", || None, || {
                let index = items.iter().position(|item| predicate(item))?;
                Some(items.remove(index))
            })
        })
    }

    /// Remove and return the last element matching `predicate`.
    ///
    /// The match is removed by position within the same critical section.
    pub fn remove_last_where<F>(&self, mut predicate: F) -> Option<T>
    where
        F: FnMut(&T) -> bool,
    {
        self.guard.write(|items| {
            shielded(self.name(), "remove_last_where", || None, || {
                let index = items.iter().rposition(|item| predicate(item))?;
                Some(items.remove(index))
            })
        })
    }

    /// Remove every element equal to `value` and return how many went.
    pub fn remove_item(&self, value: &T) -> usize
    where
        T: PartialEq,
    {
        self.guard.write(|items| {
            let before = items.len();
            items.retain(|item| item != value);
            before - items.len()
        })
    }

    /// Empty the sequence and return what it held
    pub fn take_all(&self) -> Vec<T> {
        self.guard.write(mem::take)
    }

    /// Insert `value` at `index`, waiting until it is applied.
    pub fn try_insert(&self, index: usize, value: T) -> Result<()> {
        self.guard.write(|items| insert_at(items, index, value))
    }

    /// Replace the element at `index` and return the old one.
    pub fn try_set(&self, index: usize, value: T) -> Result<T> {
        self.guard.write(|items| replace_at(items, index, value))
    }
}

impl<T: Send + 'static, G: Guard<Vec<T>>> SafeVec<T, G> {
    // ----- asynchronous writes -----

    /// Append `value`
    pub fn push(&self, value: T) {
        self.push_async(value, None);
    }

    /// Append `value` and report to `done` once applied
    pub fn push_async(&self, value: T, done: Option<Completion<()>>) {
        self.guard
            .submit(move |items: &mut Vec<T>| items.push(value), move |()| {
                notify(done, ())
            });
    }

    /// Append every value of `values`, in order, as one write.
    pub fn extend<I>(&self, values: I)
    where
        I: IntoIterator<Item = T>,
    {
        let extra: Vec<T> = values.into_iter().collect();
        self.guard
            .submit(move |items: &mut Vec<T>| items.extend(extra), |()| {});
    }

    /// Insert `value` at `index`.
    ///
    /// An index past the end at apply time leaves the sequence unchanged.
    pub fn insert(&self, index: usize, value: T) {
        self.insert_async(index, value, None);
    }

    /// Insert `value` at `index` and report the outcome to `done`
    pub fn insert_async(&self, index: usize, value: T, done: Option<Completion<Result<()>>>) {
        let after = settle(self.name().to_owned(), "insert", done);
        self.guard
            .submit(move |items: &mut Vec<T>| insert_at(items, index, value), after);
    }

    /// Subscript assignment. `None` is ignored.
    ///
    /// An index out of range at apply time leaves the sequence unchanged.
    pub fn set(&self, index: usize, value: Option<T>) {
        let Some(value) = value else {
            return;
        };
        let after = settle(self.name().to_owned(), "set", None);
        self.guard.submit(
            move |items: &mut Vec<T>| replace_at(items, index, value).map(drop),
            after,
        );
    }

    /// Remove every element
    pub fn clear(&self) {
        self.clear_async(None);
    }

    /// Remove every element and hand the removed elements to `done`
    pub fn clear_async(&self, done: Option<Completion<Vec<T>>>) {
        self.guard.submit(
            |items: &mut Vec<T>| mem::take(items),
            move |removed| notify(done, removed),
        );
    }

    /// Remove the element at `index` and hand it to `done`
    pub fn remove_at_async(&self, index: usize, done: Option<Completion<Result<T>>>) {
        let after = settle(self.name().to_owned(), "remove_at", done);
        self.guard
            .submit(move |items: &mut Vec<T>| remove_at(items, index), after);
    }

    /// Remove the first element and hand it to `done`
    pub fn remove_first_async(&self, done: Option<Completion<Result<T>>>) {
        let after = settle(self.name().to_owned(), "remove_first", done);
        self.guard.submit(remove_first, after);
    }

    /// Remove the last element and hand it to `done`
    pub fn remove_last_async(&self, done: Option<Completion<Result<T>>>) {
        let after = settle(self.name().to_owned(), "remove_last", done);
        self.guard.submit(remove_last, after);
    }

    /// Remove the first element matching `predicate` and hand it to `done`
    pub fn remove_where_async<F>(&self, mut predicate: F, done: Option<Completion<Option<T>>>)
    where
        F: FnMut(&T) -> bool + Send + 'static,
    {
        let name = self.name().to_owned();
        self.guard.submit(
            move |items: &mut Vec<T>| {
                shielded(&name, "remove_where", || None, || {
                    let index = items.iter().position(|item| predicate(item))?;
                    Some(items.remove(index))
                })
            },
            move |removed| notify(done, removed),
        );
    }

    /// Sort in place as one write
    pub fn sort_by<F>(&self, mut compare: F)
    where
        F: FnMut(&T, &T) -> Ordering + Send + 'static,
    {
        let name = self.name().to_owned();
        self.guard.submit(
            move |items: &mut Vec<T>| {
                shielded(&name, "sort_by", || (), || items.sort_by(|a, b| compare(a, b)))
            },
            |()| {},
        );
    }
}

fn remove_at<T>(items: &mut Vec<T>, index: usize) -> Result<T> {
    if index < items.len() {
        Ok(items.remove(index))
    } else {
        Err(CollectionError::IndexOutOfRange {
            index,
            len: items.len(),
        })
    }
}

fn remove_first<T>(items: &mut Vec<T>) -> Result<T> {
    if items.is_empty() {
        Err(CollectionError::EmptyCollection)
    } else {
        Ok(items.remove(0))
    }
}

fn remove_last<T>(items: &mut Vec<T>) -> Result<T> {
    items.pop().ok_or(CollectionError::EmptyCollection)
}

fn insert_at<T>(items: &mut Vec<T>, index: usize, value: T) -> Result<()> {
    if index <= items.len() {
        items.insert(index, value);
        Ok(())
    } else {
        Err(CollectionError::IndexOutOfRange {
            index,
            len: items.len(),
        })
    }
}

fn replace_at<T>(items: &mut Vec<T>, index: usize, value: T) -> Result<T> {
    let len = items.len();
    match items.get_mut(index) {
        Some(slot) => Ok(mem::replace(slot, value)),
        None => Err(CollectionError::IndexOutOfRange { index, len }),
    }
}

/// Iterator returned by [`SafeVec::iter`]
pub struct Iter<'a, T, G> {
    vec: &'a SafeVec<T, G>,
    cursor: usize,
}

impl<T: Clone, G: Guard<Vec<T>>> Iterator for Iter<'_, T, G> {
    type Item = T;

    fn next(&mut self) -> Option<T> {
        let item = self.vec.get(self.cursor)?;
        self.cursor += 1;
        Some(item)
    }
}

impl<'a, T: Clone, G: Guard<Vec<T>>> IntoIterator for &'a SafeVec<T, G> {
    type Item = T;
    type IntoIter = Iter<'a, T, G>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl<T: Send> Default for SafeVec<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Send> From<Vec<T>> for SafeVec<T> {
    fn from(items: Vec<T>) -> Self {
        Self::with_guard(Strict::new(items))
    }
}

impl<T: Send> FromIterator<T> for SafeVec<T> {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        Self::from(iter.into_iter().collect::<Vec<_>>())
    }
}

/// Appends one element. Sequences go through [`SafeVec::extend`].
impl<T: Send + 'static, G: Guard<Vec<T>>> AddAssign<T> for SafeVec<T, G> {
    fn add_assign(&mut self, rhs: T) {
        self.push(rhs);
    }
}

/// Order-sensitive. The right-hand side is copied under its own lock first,
/// so two container locks are never held at once.
impl<T: PartialEq + Clone, G: Guard<Vec<T>>> PartialEq for SafeVec<T, G> {
    fn eq(&self, other: &Self) -> bool {
        if ptr::eq(self, other) {
            return true;
        }
        let theirs = other.snapshot();
        self.guard.read(|items| *items == theirs)
    }
}

impl<T: Eq + Clone, G: Guard<Vec<T>>> Eq for SafeVec<T, G> {}

impl<T: PartialEq, G: Guard<Vec<T>>> PartialEq<Vec<T>> for SafeVec<T, G> {
    fn eq(&self, other: &Vec<T>) -> bool {
        self.guard.read(|items| items == other)
    }
}

impl<T: fmt::Debug, G: Guard<Vec<T>>> fmt::Debug for SafeVec<T, G> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.guard
            .read(|items| f.debug_list().entries(items.iter()).finish())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::NotifyQueue;
    use parking_lot::Mutex;
    use std::time::Duration;

    fn executor() -> Arc<WorkerPool> {
        Arc::new(WorkerPool::new(2).unwrap())
    }

    #[test]
    fn test_strict_basic_operations() {
        let vec = SafeVec::with_name("numbers");
        assert!(vec.is_empty());

        vec.push(1);
        vec.extend(vec![2, 3, 4]);
        vec.insert(0, 0);
        assert_eq!(vec.snapshot(), vec![0, 1, 2, 3, 4]);
        assert_eq!(vec.len(), 5);
        assert_eq!(vec.first(), Some(0));
        assert_eq!(vec.last(), Some(4));
        assert_eq!(vec.get(2), Some(2));
        assert_eq!(vec.get(9), None);
        assert!(vec.contains(&3));
        assert_eq!(vec.index_of(&3), Some(3));
        assert_eq!(vec.name(), "numbers");
    }

    #[test]
    fn test_subscript_assignment() {
        let vec = SafeVec::from(vec!['a', 'b']);
        vec.set(1, Some('z'));
        vec.set(0, None);
        vec.set(7, Some('x'));
        assert_eq!(vec.snapshot(), vec!['a', 'z']);
        assert_eq!(vec.try_set(0, 'y'), Ok('a'));
        assert_eq!(
            vec.try_set(2, 'q'),
            Err(CollectionError::IndexOutOfRange { index: 2, len: 2 })
        );
    }

    #[test]
    fn test_removals_report_errors() {
        let vec: SafeVec<i32> = SafeVec::new();
        assert_eq!(vec.remove_first(), Err(CollectionError::EmptyCollection));
        assert_eq!(vec.remove_last(), Err(CollectionError::EmptyCollection));
        assert_eq!(
            vec.remove_at(0),
            Err(CollectionError::IndexOutOfRange { index: 0, len: 0 })
        );
        assert_eq!(
            vec.try_insert(1, 5),
            Err(CollectionError::IndexOutOfRange { index: 1, len: 0 })
        );

        vec.extend(vec![1, 2, 3, 2, 1]);
        assert_eq!(vec.remove_first(), Ok(1));
        assert_eq!(vec.remove_last(), Ok(1));
        assert_eq!(vec.remove_at(1), Ok(3));
        assert_eq!(vec.remove_item(&2), 2);
        assert!(vec.is_empty());
    }

    #[test]
    fn test_predicate_operations() {
        let vec: SafeVec<i32> = (1..=6).collect();
        assert_eq!(vec.position(|n| *n > 3), Some(3));
        assert!(vec.contains_where(|n| *n == 6));
        assert_eq!(vec.first_where(|n| n % 2 == 0), Some(2));
        assert_eq!(vec.filter(|n| n % 2 == 0), vec![2, 4, 6]);
        assert_eq!(vec.map(|n| n * 10), vec![10, 20, 30, 40, 50, 60]);
        assert_eq!(
            vec.filter_map(|n| (*n > 4).then(|| n.to_string())),
            vec!["5".to_string(), "6".to_string()]
        );

        let mut total = 0;
        vec.for_each(|n| total += n);
        assert_eq!(total, 21);

        assert_eq!(vec.remove_where(|n| n % 2 == 0), Some(2));
        assert_eq!(vec.remove_last_where(|n| n % 2 == 0), Some(6));
        assert_eq!(vec.snapshot(), vec![1, 3, 4, 5]);
    }

    #[test]
    fn test_panicking_callback_yields_default() {
        let vec: SafeVec<i32> = (1..=3).collect();
        let filtered = vec.filter(|_| panic!("predicate failed"));
        assert!(filtered.is_empty());
        assert_eq!(vec.position(|_| panic!("predicate failed")), None);
        assert_eq!(vec.remove_where(|_| panic!("predicate failed")), None);

        // Lock was released on the way out.
        assert_eq!(vec.len(), 3);
        assert!(!vec.guard().is_locked());
    }

    #[test]
    fn test_sorting() {
        let vec = SafeVec::from(vec![3, 1, 2]);
        assert_eq!(vec.sorted_by(|a, b| b.cmp(a)), vec![3, 2, 1]);
        assert_eq!(vec.snapshot(), vec![3, 1, 2]);

        vec.sort_by(|a, b| a.cmp(b));
        assert_eq!(vec.snapshot(), vec![1, 2, 3]);
    }

    #[test]
    fn test_iterator_steps_through_live_contents() {
        let vec = SafeVec::from(vec![1, 2, 3, 4]);
        let mut iter = vec.iter();
        assert_eq!(iter.next(), Some(1));

        // Removal between steps shifts the remaining elements under the cursor.
        assert_eq!(vec.remove_first(), Ok(1));
        assert_eq!(iter.next(), Some(3));
        assert_eq!(iter.next(), Some(4));
        assert_eq!(iter.next(), None);

        let collected: Vec<i32> = (&vec).into_iter().collect();
        assert_eq!(collected, vec![2, 3, 4]);
    }

    #[test]
    fn test_equality_is_order_sensitive() {
        let a = SafeVec::from(vec![1, 2, 3]);
        let b = SafeVec::from(vec![1, 2, 3]);
        let c = SafeVec::from(vec![3, 2, 1]);
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a, a);
        assert_eq!(a, vec![1, 2, 3]);
    }

    #[test]
    fn test_add_assign_and_debug() {
        let mut vec = SafeVec::from(vec![1]);
        vec += 2;
        vec += 3;
        assert_eq!(format!("{:?}", vec), "[1, 2, 3]");
        assert_eq!(vec.take_all(), vec![1, 2, 3]);
        assert!(vec.is_empty());
    }

    #[test]
    fn test_pipelined_async_removal_on_empty_reports_error() {
        let vec: SafeVec<u32, Pipelined<Vec<u32>>> = SafeVec::pipelined(executor());
        let notify = Arc::new(NotifyQueue::new());
        let outcome = Arc::new(Mutex::new(None));

        let sink = Arc::clone(&outcome);
        vec.remove_last_async(Some(Completion::new(notify.clone(), move |result| {
            *sink.lock() = Some(result);
        })));

        assert!(notify.run_next(Duration::from_secs(5)));
        assert_eq!(*outcome.lock(), Some(Err(CollectionError::EmptyCollection)));
        assert!(vec.is_empty());
    }

    #[test]
    fn test_pipelined_completion_carries_removed_value() {
        let vec = SafeVec::pipelined_from(vec![10, 20, 30], executor());
        let notify = Arc::new(NotifyQueue::new());
        let removed = Arc::new(Mutex::new(Vec::new()));

        for index in [0, 5] {
            let sink = Arc::clone(&removed);
            vec.remove_at_async(
                index,
                Some(Completion::new(notify.clone(), move |result| {
                    sink.lock().push(result);
                })),
            );
        }
        let sink = Arc::clone(&removed);
        vec.remove_where_async(
            |n| *n == 30,
            Some(Completion::new(notify.clone(), move |result: Option<i32>| {
                sink.lock().push(result.ok_or(CollectionError::EmptyCollection));
            })),
        );

        for _ in 0..3 {
            assert!(notify.run_next(Duration::from_secs(5)));
        }
        // Writes apply in order; completions from separate drains may interleave.
        let removed = removed.lock();
        assert_eq!(removed.len(), 3);
        assert!(removed.contains(&Ok(10)));
        assert!(removed.contains(&Err(CollectionError::IndexOutOfRange { index: 5, len: 2 })));
        assert!(removed.contains(&Ok(30)));
        assert_eq!(vec.snapshot(), vec![20]);
    }

    #[test]
    fn test_pipelined_clear_hands_back_contents() {
        let vec = SafeVec::pipelined_from(vec![1, 2], executor());
        vec.push(3);
        let notify = Arc::new(NotifyQueue::new());
        let removed = Arc::new(Mutex::new(None));

        let sink = Arc::clone(&removed);
        vec.clear_async(Some(Completion::new(notify.clone(), move |items| {
            *sink.lock() = Some(items);
        })));

        assert!(notify.run_next(Duration::from_secs(5)));
        assert_eq!(*removed.lock(), Some(vec![1, 2, 3]));
        assert!(vec.is_empty());
    }

    #[test]
    fn test_pipelined_later_write_wins() {
        let vec = SafeVec::pipelined_from(vec![0], executor());
        vec.set(0, Some(1));
        vec.set(0, Some(2));
        vec.push(3);
        vec.clear();
        vec.push(4);
        assert_eq!(vec.snapshot(), vec![4]);
        vec.flush();
        assert_eq!(vec.guard().stats().writes_pending, 0);
    }
}
