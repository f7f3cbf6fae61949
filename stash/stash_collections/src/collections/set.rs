//! Thread-safe set with set algebra.
//!
//! Every algebra operation materializes the other operand first and then
//! computes against the current membership under this set's lock.

use crate::shield::shielded;
use crate::sync::{Guard, Strict};
use std::collections::HashSet;
use std::fmt;
use std::hash::Hash;
use std::marker::PhantomData;
use std::ptr;

/// A hash set whose every operation is atomic.
pub struct SafeSet<T, G = Strict<HashSet<T>>> {
    guard: G,
    _members: PhantomData<fn() -> T>,
}

impl<T: Eq + Hash + Send> SafeSet<T> {
    /// Create an empty set behind a mutex
    pub fn new() -> Self {
        Self::with_guard(Strict::new(HashSet::new()))
    }

    /// Create an empty set with a diagnostic name
    pub fn with_name(name: impl Into<String>) -> Self {
        Self::with_guard(Strict::with_name(HashSet::new(), name))
    }
}

impl<T, G> SafeSet<T, G>
where
    T: Eq + Hash,
    G: Guard<HashSet<T>>,
{
    /// Wrap a guard that already owns the set
    pub fn with_guard(guard: G) -> Self {
        Self {
            guard,
            _members: PhantomData,
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

    /// Number of members
    pub fn len(&self) -> usize {
        self.guard.read(|members| members.len())
    }

    /// Whether the set has no members
    pub fn is_empty(&self) -> bool {
        self.guard.read(|members| members.is_empty())
    }

    /// Whether `value` is a member
    pub fn contains(&self, value: &T) -> bool {
        self.guard.read(|members| members.contains(value))
    }

    /// Copy of an arbitrary member
    pub fn first(&self) -> Option<T>
    where
        T: Clone,
    {
        self.guard.read(|members| members.iter().next().cloned())
    }

    /// Copy of the whole set
    pub fn snapshot(&self) -> HashSet<T>
    where
        T: Clone,
    {
        self.guard.read(|members| members.clone())
    }

    /// Visit every member under one critical section.
    pub fn for_each<F>(&self, f: F)
    where
        F: FnMut(&T),
    {
        self.guard.read(|members| {
            shielded(self.name(), "for_each", || (), || members.iter().for_each(f))
        })
    }

    /// Iterate over the members present now, locking once per step.
    ///
    /// Members removed after the iterator was created are skipped.
    pub fn iter(&self) -> Iter<'_, T, G>
    where
        T: Clone,
    {
        let members: Vec<T> = self.guard.read(|members| members.iter().cloned().collect());
        Iter {
            set: self,
            members: members.into_iter(),
        }
    }

    // ----- writes -----

    /// Add `value`. Returns whether it was not already present.
    pub fn insert(&self, value: T) -> bool {
        self.guard.write(|members| members.insert(value))
    }

    /// Remove `value` and return the stored member
    pub fn remove(&self, value: &T) -> Option<T> {
        self.guard.write(|members| members.take(value))
    }

    /// Remove and return an arbitrary member
    pub fn remove_first(&self) -> Option<T>
    where
        T: Clone,
    {
        self.guard.write(|members| {
            let member = members.iter().next().cloned()?;
            members.take(&member)
        })
    }

    /// Remove every member
    pub fn clear(&self) {
        self.guard.write(|members| members.clear());
    }

    // ----- algebra -----

    /// Members of either set
    pub fn union<I>(&self, other: I) -> HashSet<T>
    where
        T: Clone,
        I: IntoIterator<Item = T>,
    {
        let other: HashSet<T> = other.into_iter().collect();
        self.guard
            .read(|members| members.union(&other).cloned().collect())
    }

    /// Members of both sets
    pub fn intersection<I>(&self, other: I) -> HashSet<T>
    where
        T: Clone,
        I: IntoIterator<Item = T>,
    {
        let other: HashSet<T> = other.into_iter().collect();
        self.guard
            .read(|members| members.intersection(&other).cloned().collect())
    }

    /// Members of this set that are not in `other`
    pub fn difference<I>(&self, other: I) -> HashSet<T>
    where
        T: Clone,
        I: IntoIterator<Item = T>,
    {
        let other: HashSet<T> = other.into_iter().collect();
        self.guard
            .read(|members| members.difference(&other).cloned().collect())
    }

    /// Members of exactly one of the two sets
    pub fn symmetric_difference<I>(&self, other: I) -> HashSet<T>
    where
        T: Clone,
        I: IntoIterator<Item = T>,
    {
        let other: HashSet<T> = other.into_iter().collect();
        self.guard.read(|members| {
            members
                .symmetric_difference(&other)
                .cloned()
                .collect()
        })
    }

    /// Add every member of `other`
    pub fn form_union<I>(&self, other: I)
    where
        I: IntoIterator<Item = T>,
    {
        let other: Vec<T> = other.into_iter().collect();
        self.guard.write(|members| members.extend(other));
    }

    /// Keep only members also in `other`
    pub fn form_intersection<I>(&self, other: I)
    where
        I: IntoIterator<Item = T>,
    {
        let other: HashSet<T> = other.into_iter().collect();
        self.guard
            .write(|members| members.retain(|member| other.contains(member)));
    }

    /// Remove every member of `other`
    pub fn form_difference<I>(&self, other: I)
    where
        I: IntoIterator<Item = T>,
    {
        let other: HashSet<T> = other.into_iter().collect();
        self.guard.write(|members| {
            for member in &other {
                members.remove(member);
            }
        });
    }

    /// Keep members of exactly one of the two sets
    pub fn form_symmetric_difference<I>(&self, other: I)
    where
        I: IntoIterator<Item = T>,
    {
        let other: HashSet<T> = other.into_iter().collect();
        self.guard.write(|members| {
            for member in other {
                if !members.remove(&member) {
                    members.insert(member);
                }
            }
        });
    }

    /// Whether every member is also in `other`
    pub fn is_subset<I>(&self, other: I) -> bool
    where
        I: IntoIterator<Item = T>,
    {
        let other: HashSet<T> = other.into_iter().collect();
        self.guard.read(|members| members.is_subset(&other))
    }

    /// Subset of `other` and not equal to it
    pub fn is_strict_subset<I>(&self, other: I) -> bool
    where
        I: IntoIterator<Item = T>,
    {
        let other: HashSet<T> = other.into_iter().collect();
        self.guard
            .read(|members| members.len() < other.len() && members.is_subset(&other))
    }

    /// Whether every member of `other` is also in this set
    pub fn is_superset<I>(&self, other: I) -> bool
    where
        I: IntoIterator<Item = T>,
    {
        let other: HashSet<T> = other.into_iter().collect();
        self.guard.read(|members| members.is_superset(&other))
    }

    /// Superset of `other` and not equal to it
    pub fn is_strict_superset<I>(&self, other: I) -> bool
    where
        I: IntoIterator<Item = T>,
    {
        let other: HashSet<T> = other.into_iter().collect();
        self.guard
            .read(|members| members.len() > other.len() && members.is_superset(&other))
    }

    /// Whether the two sets share no member
    pub fn is_disjoint<I>(&self, other: I) -> bool
    where
        I: IntoIterator<Item = T>,
    {
        let other: HashSet<T> = other.into_iter().collect();
        self.guard.read(|members| members.is_disjoint(&other))
    }
}

/// Iterator returned by [`SafeSet::iter`]
pub struct Iter<'a, T, G> {
    set: &'a SafeSet<T, G>,
    members: std::vec::IntoIter<T>,
}

impl<T, G> Iterator for Iter<'_, T, G>
where
    T: Eq + Hash + Clone,
    G: Guard<HashSet<T>>,
{
    type Item = T;

    fn next(&mut self) -> Option<T> {
        self.members.by_ref().find(|member| self.set.contains(member))
    }
}

impl<'a, T, G> IntoIterator for &'a SafeSet<T, G>
where
    T: Eq + Hash + Clone,
    G: Guard<HashSet<T>>,
{
    type Item = T;
    type IntoIter = Iter<'a, T, G>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl<T: Eq + Hash + Send> Default for SafeSet<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Eq + Hash + Send> From<HashSet<T>> for SafeSet<T> {
    fn from(members: HashSet<T>) -> Self {
        Self::with_guard(Strict::new(members))
    }
}

impl<T: Eq + Hash + Send> FromIterator<T> for SafeSet<T> {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        Self::from(iter.into_iter().collect::<HashSet<_>>())
    }
}

/// The right-hand side is copied under its own lock first.
impl<T, G> PartialEq for SafeSet<T, G>
where
    T: Eq + Hash + Clone,
    G: Guard<HashSet<T>>,
{
    fn eq(&self, other: &Self) -> bool {
        if ptr::eq(self, other) {
            return true;
        }
        let theirs = other.snapshot();
        self.guard.read(|members| *members == theirs)
    }
}

impl<T, G> fmt::Debug for SafeSet<T, G>
where
    T: Eq + Hash + fmt::Debug,
    G: Guard<HashSet<T>>,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.guard
            .read(|members| f.debug_set().entries(members.iter()).finish())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(values: &[u32]) -> SafeSet<u32> {
        values.iter().copied().collect()
    }

    fn hash(values: &[u32]) -> HashSet<u32> {
        values.iter().copied().collect()
    }

    #[test]
    fn test_membership() {
        let members = SafeSet::with_name("members");
        assert!(members.insert(1));
        assert!(!members.insert(1));
        assert!(members.insert(2));
        assert_eq!(members.len(), 2);
        assert!(members.contains(&2));
        assert_eq!(members.remove(&2), Some(2));
        assert_eq!(members.remove(&2), None);
        assert_eq!(members.first(), Some(1));
        assert_eq!(members.remove_first(), Some(1));
        assert_eq!(members.remove_first(), None);
        assert!(members.is_empty());
    }

    #[test]
    fn test_algebra() {
        let a = set(&[1, 2, 3]);
        let b = set(&[3, 4]);

        assert_eq!(a.union(&b), hash(&[1, 2, 3, 4]));
        assert_eq!(a.intersection(&b), hash(&[3]));
        assert_eq!(a.difference(&b), hash(&[1, 2]));
        assert_eq!(a.symmetric_difference(&b), hash(&[1, 2, 4]));
    }

    #[test]
    fn test_in_place_algebra() {
        let a = set(&[1, 2, 3]);
        a.form_union([4]);
        assert_eq!(a.snapshot(), hash(&[1, 2, 3, 4]));
        a.form_intersection([2, 3, 4, 5]);
        assert_eq!(a.snapshot(), hash(&[2, 3, 4]));
        a.form_difference([4]);
        assert_eq!(a.snapshot(), hash(&[2, 3]));
        a.form_symmetric_difference([3, 9]);
        assert_eq!(a.snapshot(), hash(&[2, 9]));
    }

    #[test]
    fn test_predicates() {
        let small = set(&[1, 2]);
        let large = set(&[1, 2, 3]);

        assert!(small.is_subset(&large));
        assert!(small.is_strict_subset(&large));
        assert!(small.is_subset(&small));
        assert!(!small.is_strict_subset(&small));
        assert!(large.is_superset(&small));
        assert!(large.is_strict_superset(&small));
        assert!(!large.is_strict_superset(&large));
        assert!(small.is_disjoint([7, 8]));
        assert!(!small.is_disjoint(&large));
    }

    #[test]
    fn test_iteration_and_equality() {
        let a = set(&[1, 2, 3]);
        let mut iter = a.iter();
        let first = iter.next().unwrap();
        for value in [1, 2, 3] {
            if value != first {
                a.remove(&value);
            }
        }
        assert_eq!(iter.next(), None);

        assert_eq!(set(&[5, 6]), set(&[6, 5]));
        assert_ne!(set(&[5]), set(&[6]));
        assert_eq!(format!("{:?}", set(&[5])), "{5}");

        let mut seen = 0;
        set(&[1, 2]).for_each(|_| seen += 1);
        assert_eq!(seen, 2);
    }
}
