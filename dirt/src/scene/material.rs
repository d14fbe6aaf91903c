//! Materials: renderer-selected by tag set, parameterised by uniforms.

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::index::Registry;
use crate::scene::UniformMap;

pub struct Material {
    registry: Arc<Registry<Material>>,
    key: AtomicU32,
    pub tags: RwLock<BTreeSet<String>>,
    pub uniforms: UniformMap,
    pub transparent: AtomicBool,
    pub dirty: AtomicBool,
}

impl Material {
    pub fn create(registry: &Arc<Registry<Material>>) -> Arc<Material> {
        let material = Arc::new(Material {
            registry: registry.clone(),
            key: AtomicU32::new(0),
            tags: RwLock::new(BTreeSet::new()),
            uniforms: RwLock::new(HashMap::new()),
            transparent: AtomicBool::new(false),
            dirty: AtomicBool::new(true),
        });
        let key = registry.add(&material);
        material.key.store(key.raw(), Ordering::Release);
        material
    }

    pub fn key(&self) -> u32 {
        self.key.load(Ordering::Acquire)
    }

    pub fn add_tag(&self, tag: &str) {
        if tag.is_empty() {
            return;
        }
        self.tags.write().insert(tag.to_string());
        self.dirty.store(true, Ordering::Release);
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.read().contains(tag)
    }
}

impl Drop for Material {
    fn drop(&mut self) {
        self.registry.remove(self.key());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::MATERIAL_INDEX_BASE;

    #[test]
    fn tags_deduplicate_and_ignore_empties() {
        let registry = Registry::new(MATERIAL_INDEX_BASE);
        let material = Material::create(&registry);
        material.add_tag("solid");
        material.add_tag("solid");
        material.add_tag("");
        assert!(material.has_tag("solid"));
        assert_eq!(material.tags.read().len(), 1);
    }
}
