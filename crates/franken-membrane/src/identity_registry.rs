//! Identity registry: original ↔ wrapper association.
//!
//! Both directions are keyed weakly: the registry never keeps an original
//! or a wrapper alive.  Object ids are never reused, so a dead entry can
//! only ever be found by an id whose object is gone; such entries are
//! reclaimed by [`IdentityRegistry::sweep`], which also runs amortised on
//! insertion.
//!
//! Shadow backing storage is held weakly as well.  Its wrapper owns it, so
//! it is released together with the wrapper; the entry itself stays until
//! the original dies and records that the original was exposed.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::object_model::{ObjectId, ObjectRef, WeakObjectRef};

const MIN_SWEEP_THRESHOLD: usize = 64;

// ---------------------------------------------------------------------------
// WeakObjectMap
// ---------------------------------------------------------------------------

/// Map keyed weakly by object identity.
#[derive(Debug)]
pub struct WeakObjectMap<V> {
    entries: HashMap<ObjectId, (WeakObjectRef, V)>,
    next_sweep: usize,
}

impl<V> Default for WeakObjectMap<V> {
    fn default() -> Self {
        Self {
            entries: HashMap::new(),
            next_sweep: MIN_SWEEP_THRESHOLD,
        }
    }
}

impl<V> WeakObjectMap<V> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: &ObjectRef, value: V) -> Option<V> {
        if self.entries.len() >= self.next_sweep {
            self.sweep();
            self.next_sweep = MIN_SWEEP_THRESHOLD.max(self.entries.len().saturating_mul(2));
        }
        self.entries
            .insert(key.id(), (key.downgrade(), value))
            .map(|(_, old)| old)
    }

    /// Value for a live key.  A dead key's entry is invisible.
    pub fn get(&self, key: &ObjectRef) -> Option<&V> {
        self.get_by_id(key.id())
    }

    pub fn get_by_id(&self, id: ObjectId) -> Option<&V> {
        self.entries
            .get(&id)
            .filter(|(weak, _)| weak.is_alive())
            .map(|(_, value)| value)
    }

    pub fn contains_key(&self, key: &ObjectRef) -> bool {
        self.get(key).is_some()
    }

    /// Drop entries whose key is gone.  Returns the number removed.
    pub fn sweep(&mut self) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, (weak, _)| weak.is_alive());
        before - self.entries.len()
    }

    /// Entries currently stored, dead ones included.
    pub fn tracked(&self) -> usize {
        self.entries.len()
    }

    pub fn live_len(&self) -> usize {
        self.entries
            .values()
            .filter(|(weak, _)| weak.is_alive())
            .count()
    }

    pub fn live_entries(&self) -> impl Iterator<Item = (ObjectRef, &V)> + '_ {
        self.entries
            .values()
            .filter_map(|(weak, value)| weak.upgrade().map(|key| (key, value)))
    }

    pub fn live_keys(&self) -> Vec<ObjectRef> {
        self.entries
            .values()
            .filter_map(|(weak, _)| weak.upgrade())
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Backing storage
// ---------------------------------------------------------------------------

/// What a wrapper forwards bypassed operations to.
#[derive(Debug, Clone)]
pub enum Backing {
    /// The original itself (direct-target policy).
    Original,
    /// A shadow placeholder owned by the wrapper.
    Shadow(WeakObjectRef),
}

impl Backing {
    pub fn shadow(storage: &ObjectRef) -> Self {
        Self::Shadow(storage.downgrade())
    }

    /// The storage for `original`, or `None` once a shadow was released.
    pub fn resolve(&self, original: &ObjectRef) -> Option<ObjectRef> {
        match self {
            Self::Original => Some(original.clone()),
            Self::Shadow(storage) => storage.upgrade(),
        }
    }
}

// ---------------------------------------------------------------------------
// IdentityRegistry
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryStats {
    pub live_wrappers: usize,
    pub live_backings: usize,
    pub tracked_entries: usize,
}

#[derive(Debug, Default)]
pub struct IdentityRegistry {
    originals_to_wrappers: WeakObjectMap<WeakObjectRef>,
    wrappers_to_originals: WeakObjectMap<WeakObjectRef>,
    originals_to_backing: WeakObjectMap<Backing>,
}

impl IdentityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `original ↔ wrapper`.  Returns `false`, leaving the registry
    /// untouched, if either side is already bound to a different live
    /// counterpart.
    pub fn register(&mut self, original: &ObjectRef, wrapper: &ObjectRef) -> bool {
        if let Some(existing) = self.lookup_wrapper(original)
            && existing != *wrapper
        {
            return false;
        }
        if let Some(existing) = self.lookup_original(wrapper)
            && existing != *original
        {
            return false;
        }
        if self.lookup_original(original).is_some() || self.lookup_wrapper(wrapper).is_some() {
            return false;
        }
        self.originals_to_wrappers
            .insert(original, wrapper.downgrade());
        self.wrappers_to_originals
            .insert(wrapper, original.downgrade());
        true
    }

    pub fn lookup_wrapper(&self, original: &ObjectRef) -> Option<ObjectRef> {
        self.originals_to_wrappers
            .get(original)
            .and_then(WeakObjectRef::upgrade)
    }

    /// The original behind `value` if it is a live wrapper of this registry.
    pub fn lookup_original(&self, value: &ObjectRef) -> Option<ObjectRef> {
        self.wrappers_to_originals
            .get(value)
            .and_then(WeakObjectRef::upgrade)
    }

    pub fn is_wrapper(&self, value: &ObjectRef) -> bool {
        self.lookup_original(value).is_some()
    }

    /// Record the backing storage of `original`.  Returns the previous one.
    pub fn register_backing(&mut self, original: &ObjectRef, backing: Backing) -> Option<Backing> {
        self.originals_to_backing.insert(original, backing)
    }

    pub fn backing_entry(&self, original: &ObjectRef) -> Option<&Backing> {
        self.originals_to_backing.get(original)
    }

    /// The object bypassed operations on `original`'s wrapper act on.
    pub fn backing_of(&self, original: &ObjectRef) -> Option<ObjectRef> {
        self.backing_entry(original)
            .and_then(|backing| backing.resolve(original))
    }

    pub fn sweep(&mut self) -> usize {
        self.originals_to_wrappers.sweep()
            + self.wrappers_to_originals.sweep()
            + self.originals_to_backing.sweep()
    }

    pub fn stats(&self) -> RegistryStats {
        RegistryStats {
            live_wrappers: self.wrappers_to_originals.live_len(),
            live_backings: self
                .originals_to_backing
                .live_entries()
                .filter(|(original, backing)| backing.resolve(original).is_some())
                .count(),
            tracked_entries: self.originals_to_wrappers.tracked()
                + self.wrappers_to_originals.tracked()
                + self.originals_to_backing.tracked(),
        }
    }
}
