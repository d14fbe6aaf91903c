//! Offset-based handle registries.
//!
//! Every host-visible object kind gets a disjoint handle range keyed by a
//! fixed base offset, so a raw `u32` coming back from a plugin identifies
//! both the kind (high nibble) and a dense slot in that kind's registry.
//! Registries index objects without owning them: ownership lives in the
//! scene graph and the per-tick root vector, and each registered object
//! removes its own slot on drop.

use std::any::Any;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, RwLock};

pub const VM_INDEX_BASE: u32 = 0x1000_0000;
pub const NODE_INDEX_BASE: u32 = 0x2000_0000;
pub const MESH_INDEX_BASE: u32 = 0x3000_0000;
pub const MATERIAL_INDEX_BASE: u32 = 0x4000_0000;
pub const SURFACE_INDEX_BASE: u32 = 0x5000_0000;

/// A kind-tagged handle. Plugins only ever see the raw `u32`.
pub struct Handle<K: ?Sized> {
    raw: u32,
    _kind: PhantomData<fn() -> K>,
}

impl<K: ?Sized> Handle<K> {
    pub fn from_raw(raw: u32) -> Handle<K> {
        Handle {
            raw,
            _kind: PhantomData,
        }
    }

    pub fn raw(self) -> u32 {
        self.raw
    }
}

impl<K: ?Sized> Clone for Handle<K> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<K: ?Sized> Copy for Handle<K> {}

impl<K: ?Sized> PartialEq for Handle<K> {
    fn eq(&self, other: &Self) -> bool {
        self.raw == other.raw
    }
}

impl<K: ?Sized> Eq for Handle<K> {}

impl<K: ?Sized> Hash for Handle<K> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.raw.hash(state)
    }
}

impl<K: ?Sized> fmt::Debug for Handle<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Handle({:#x})", self.raw)
    }
}

impl<K: ?Sized> From<u32> for Handle<K> {
    fn from(raw: u32) -> Self {
        Handle::from_raw(raw)
    }
}

/// Dense slot table under a single read/write lock. `add` reuses the first
/// empty slot; a handle stays valid until `remove` (which is idempotent).
pub struct Registry<K> {
    offset: u32,
    slots: RwLock<Vec<Option<Weak<K>>>>,
}

impl<K> Registry<K> {
    pub fn new(offset: u32) -> Arc<Registry<K>> {
        Arc::new(Registry {
            offset,
            slots: RwLock::new(Vec::new()),
        })
    }

    pub fn offset(&self) -> u32 {
        self.offset
    }

    pub fn add(&self, value: &Arc<K>) -> Handle<K> {
        let mut slots = self.slots.write();
        for (i, slot) in slots.iter_mut().enumerate() {
            if slot.is_none() {
                *slot = Some(Arc::downgrade(value));
                return Handle::from_raw(self.offset + i as u32);
            }
        }
        slots.push(Some(Arc::downgrade(value)));
        Handle::from_raw(self.offset + (slots.len() - 1) as u32)
    }

    pub fn remove(&self, key: impl Into<Handle<K>>) {
        let key = key.into().raw();
        if key < self.offset {
            return;
        }
        let slot = (key - self.offset) as usize;
        let mut slots = self.slots.write();
        if slot < slots.len() {
            slots[slot] = None;
        }
    }

    pub fn find(&self, key: impl Into<Handle<K>>) -> Option<Arc<K>> {
        let key = key.into().raw();
        if key < self.offset {
            return None;
        }
        let slot = (key - self.offset) as usize;
        self.slots.read().get(slot)?.as_ref()?.upgrade()
    }

    pub fn count(&self) -> usize {
        self.slots.read().len()
    }
}

/// Per-tick GC roots: freshly created objects are held here until the next
/// `gc` pull, which gives their creator at least one tick to attach them to
/// a permanent owner.
#[derive(Default)]
pub struct HeldResources {
    inner: Mutex<Vec<Arc<dyn Any + Send + Sync>>>,
}

impl HeldResources {
    pub fn hold(&self, resource: Arc<dyn Any + Send + Sync>) {
        self.inner.lock().push(resource);
    }

    pub fn gc(&self) {
        self.inner.lock().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handles_stay_valid_until_removed() {
        let registry: Arc<Registry<String>> = Registry::new(0x2000_0000);
        let a = Arc::new("a".to_string());
        let b = Arc::new("b".to_string());
        let ha = registry.add(&a);
        let hb = registry.add(&b);
        assert_eq!(ha.raw(), 0x2000_0000);
        assert_eq!(hb.raw(), 0x2000_0001);
        assert!(Arc::ptr_eq(&registry.find(ha).unwrap(), &a));
        assert!(Arc::ptr_eq(&registry.find(hb).unwrap(), &b));

        registry.remove(ha);
        assert!(registry.find(ha).is_none());
        assert!(registry.find(hb).is_some());
        // remove is idempotent
        registry.remove(ha);
        registry.remove(0x7777_7777u32);
    }

    #[test]
    fn removed_slots_are_reused_first() {
        let registry: Arc<Registry<u32>> = Registry::new(0x2000_0000);
        let values: Vec<_> = (0u32..3).map(Arc::new).collect();
        let handles: Vec<_> = values.iter().map(|v| registry.add(v)).collect();
        assert_eq!(handles[2].raw(), 0x2000_0002);

        registry.remove(handles[1]);
        let again = Arc::new(9u32);
        assert_eq!(registry.add(&again).raw(), 0x2000_0001);
    }

    #[test]
    fn out_of_range_lookups_return_none() {
        let registry: Arc<Registry<u32>> = Registry::new(0x3000_0000);
        assert!(registry.find(0u32).is_none());
        assert!(registry.find(0x3000_0005u32).is_none());
        assert_eq!(registry.count(), 0);
    }

    #[test]
    fn dropped_objects_vanish_from_lookup() {
        let registry: Arc<Registry<u32>> = Registry::new(0x3000_0000);
        let value = Arc::new(5u32);
        let handle = registry.add(&value);
        drop(value);
        assert!(registry.find(handle).is_none());
    }
}
