//! Handle invalidation sets
//!
//! Asynchronous callbacks (timer fires, cross-computer peripheral calls)
//! run on threads that do not own the computer they act on. Before acting
//! they check whether the handle they hold has been torn down. The sets
//! here carry no lock of their own: they live inside the computer
//! registry's lock so that every check is a single short critical section.

use rustc_hash::FxHashSet;
use std::hash::Hash;

/// A set of identities that must no longer be acted upon
#[derive(Debug)]
pub struct InvalidationSet<K> {
    invalid: FxHashSet<K>,
}

impl<K: Eq + Hash> InvalidationSet<K> {
    /// Create an empty set
    pub fn new() -> Self {
        Self {
            invalid: FxHashSet::default(),
        }
    }

    /// Mark one identity as torn down
    pub fn invalidate(&mut self, key: K) {
        self.invalid.insert(key);
    }

    /// Mark many identities as torn down
    pub fn invalidate_all(&mut self, keys: impl IntoIterator<Item = K>) {
        self.invalid.extend(keys);
    }

    /// Has this identity been torn down?
    pub fn is_invalid(&self, key: &K) -> bool {
        self.invalid.contains(key)
    }

    /// Stop tracking an identity (it fired, or it is being reused).
    ///
    /// Returns whether it was present.
    pub fn forget(&mut self, key: &K) -> bool {
        self.invalid.remove(key)
    }

    /// Number of tracked identities
    pub fn len(&self) -> usize {
        self.invalid.len()
    }

    /// Is the set empty?
    pub fn is_empty(&self) -> bool {
        self.invalid.is_empty()
    }
}

impl<K: Eq + Hash> Default for InvalidationSet<K> {
    fn default() -> Self {
        Self::new()
    }
}
