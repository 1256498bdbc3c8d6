//! Registry of live computers
//!
//! Holds every registered computer together with the two invalidation sets
//! and the cross-reference index. All of it sits behind one short-held lock;
//! nothing here ever blocks while the lock is held.

use crate::computer::Computer;
use crate::event::Event;
use crate::handle::{ComputerHandle, TimerId};
use crate::invalidation::InvalidationSet;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use std::sync::Arc;

/// A peripheral on `referencer`, attached at `side`, that points at some
/// other computer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reference {
    /// Computer whose peripheral table holds the reference
    pub referencer: ComputerHandle,
    /// Side the peripheral is attached to
    pub side: String,
}

struct RegistryInner {
    computers: Vec<Arc<Computer>>,
    freed_computers: InvalidationSet<ComputerHandle>,
    freed_timers: InvalidationSet<TimerId>,
    /// target -> peripherals elsewhere that point at it
    references: FxHashMap<ComputerHandle, Vec<Reference>>,
}

/// Registry of all running computers
pub struct ComputerRegistry {
    inner: Mutex<RegistryInner>,
}

impl ComputerRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(RegistryInner {
                computers: Vec::new(),
                freed_computers: InvalidationSet::new(),
                freed_timers: InvalidationSet::new(),
                references: FxHashMap::default(),
            }),
        }
    }

    /// Register a computer.
    ///
    /// A handle that was previously marked freed is forgotten first, so a
    /// fresh instance is never mistaken for a torn-down one.
    pub fn insert(&self, computer: Arc<Computer>) {
        let mut inner = self.inner.lock();
        inner.freed_computers.forget(&computer.handle());
        inner.computers.push(computer);
    }

    /// Mark a computer freed and unregister it in one step.
    ///
    /// The handle stays in the freed set until [`release`](Self::release)
    /// is called once teardown has finished.
    pub fn retire(&self, handle: ComputerHandle) -> Option<Arc<Computer>> {
        let mut inner = self.inner.lock();
        inner.freed_computers.invalidate(handle);
        let index = inner.computers.iter().position(|c| c.handle() == handle)?;
        Some(inner.computers.remove(index))
    }

    /// Drop a fully torn-down computer from the freed set.
    ///
    /// Handles are never reissued, so an unregistered handle already fails
    /// to resolve without the set.
    pub fn release(&self, handle: ComputerHandle) {
        self.inner.lock().freed_computers.forget(&handle);
    }

    /// Resolve a handle to a live computer
    pub fn get(&self, handle: ComputerHandle) -> Option<Arc<Computer>> {
        let inner = self.inner.lock();
        Self::get_locked(&inner, handle)
    }

    fn get_locked(inner: &RegistryInner, handle: ComputerHandle) -> Option<Arc<Computer>> {
        if inner.freed_computers.is_invalid(&handle) {
            return None;
        }
        inner
            .computers
            .iter()
            .find(|c| c.handle() == handle)
            .cloned()
    }

    /// Find the live computer with a user-visible id
    pub fn find(&self, id: u32) -> Option<Arc<Computer>> {
        self.inner
            .lock()
            .computers
            .iter()
            .find(|c| c.id() == id)
            .cloned()
    }

    /// Copy of the current computer list
    pub fn snapshot(&self) -> Vec<Arc<Computer>> {
        self.inner.lock().computers.clone()
    }

    /// Number of registered computers
    pub fn len(&self) -> usize {
        self.inner.lock().computers.len()
    }

    /// Is the registry empty?
    pub fn is_empty(&self) -> bool {
        self.inner.lock().computers.is_empty()
    }

    /// Visit every computer with the lock held.
    ///
    /// `f` must not call back into the registry.
    pub fn for_each(&self, mut f: impl FnMut(&Arc<Computer>)) {
        let inner = self.inner.lock();
        for computer in &inner.computers {
            f(computer);
        }
    }

    /// Queue an event on every computer
    pub fn broadcast(&self, event: &Event) {
        self.for_each(|computer| computer.queue_event(event.clone()));
    }

    /// Record that a computer has been torn down
    pub fn mark_freed(&self, handle: ComputerHandle) {
        self.inner.lock().freed_computers.invalidate(handle);
    }

    /// Is this computer in the middle of being torn down?
    pub fn is_freed(&self, handle: ComputerHandle) -> bool {
        self.inner.lock().freed_computers.is_invalid(&handle)
    }

    /// Number of computers retired but not yet released
    pub fn freed_count(&self) -> usize {
        self.inner.lock().freed_computers.len()
    }

    /// Record that these timers belong to a torn-down computer
    pub fn invalidate_timers(&self, ids: impl IntoIterator<Item = TimerId>) {
        self.inner.lock().freed_timers.invalidate_all(ids);
    }

    /// Was this timer's owner torn down?
    pub fn is_timer_invalid(&self, id: TimerId) -> bool {
        self.inner.lock().freed_timers.is_invalid(&id)
    }

    /// Decide where a fired timer goes.
    ///
    /// An invalidated timer is consumed and dropped. Otherwise the owner is
    /// looked up by handle, all under one acquisition of the lock.
    pub fn resolve_timer(&self, id: TimerId, owner: ComputerHandle) -> Option<Arc<Computer>> {
        let mut inner = self.inner.lock();
        if inner.freed_timers.forget(&id) {
            return None;
        }
        Self::get_locked(&inner, owner)
    }

    /// Record that `referencer` has a peripheral at `side` pointing at `target`
    pub fn add_reference(&self, target: ComputerHandle, referencer: ComputerHandle, side: &str) {
        let mut inner = self.inner.lock();
        let refs = inner.references.entry(target).or_default();
        let reference = Reference {
            referencer,
            side: side.to_string(),
        };
        if !refs.contains(&reference) {
            refs.push(reference);
        }
    }

    /// Forget a single cross-reference
    pub fn remove_reference(&self, target: ComputerHandle, referencer: ComputerHandle, side: &str) {
        let mut inner = self.inner.lock();
        if let Some(refs) = inner.references.get_mut(&target) {
            refs.retain(|r| !(r.referencer == referencer && r.side == side));
            if refs.is_empty() {
                inner.references.remove(&target);
            }
        }
    }

    /// Remove and return everything that points at `target`
    pub fn take_references(&self, target: ComputerHandle) -> Vec<Reference> {
        self.inner
            .lock()
            .references
            .remove(&target)
            .unwrap_or_default()
    }

    /// Peripherals currently pointing at `target`
    pub fn references_to(&self, target: ComputerHandle) -> Vec<Reference> {
        self.inner
            .lock()
            .references
            .get(&target)
            .cloned()
            .unwrap_or_default()
    }
}

impl Default for ComputerRegistry {
    fn default() -> Self {
        Self::new()
    }
}
