//! Meshes: named attribute arrays plus an element (index) vector.

use std::any::Any;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use glam::{Vec2, Vec3, Vec4};
use parking_lot::{Mutex, RwLock};

use crate::index::Registry;

/// Typed element storage. Integer variants are reserved for future use;
/// the plugin API only creates float-backed attributes.
#[derive(Clone, Debug)]
pub enum AttributeData {
    Float(Vec<f32>),
    Vec2(Vec<Vec2>),
    Vec3(Vec<Vec3>),
    Vec4(Vec<Vec4>),
}

pub struct MeshAttribute {
    pub data: AttributeData,
    /// Set on mutation, cleared by the renderer after upload.
    pub dirty: bool,
}

impl MeshAttribute {
    pub fn float() -> MeshAttribute {
        MeshAttribute {
            data: AttributeData::Float(Vec::new()),
            dirty: true,
        }
    }

    pub fn vec2() -> MeshAttribute {
        MeshAttribute {
            data: AttributeData::Vec2(Vec::new()),
            dirty: true,
        }
    }

    pub fn vec3() -> MeshAttribute {
        MeshAttribute {
            data: AttributeData::Vec3(Vec::new()),
            dirty: true,
        }
    }

    pub fn vec4() -> MeshAttribute {
        MeshAttribute {
            data: AttributeData::Vec4(Vec::new()),
            dirty: true,
        }
    }

    pub fn element_size(&self) -> usize {
        match self.data {
            AttributeData::Float(_) => 4,
            AttributeData::Vec2(_) => 8,
            AttributeData::Vec3(_) => 12,
            AttributeData::Vec4(_) => 16,
        }
    }

    /// Number of rows this attribute would present to the renderer.
    pub fn len(&self) -> usize {
        match &self.data {
            AttributeData::Float(v) => v.len(),
            AttributeData::Vec2(v) => v.len(),
            AttributeData::Vec3(v) => v.len(),
            AttributeData::Vec4(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Append raw little-endian element bytes. A trailing partial element
    /// is dropped.
    pub fn push_bytes(&mut self, bytes: &[u8]) {
        let mut floats = bytes
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes(c.try_into().unwrap()));
        let before = self.len();
        match &mut self.data {
            AttributeData::Float(v) => v.extend(&mut floats),
            AttributeData::Vec2(v) => {
                while let (Some(x), Some(y)) = (floats.next(), floats.next()) {
                    v.push(Vec2::new(x, y));
                }
            }
            AttributeData::Vec3(v) => {
                while let (Some(x), Some(y), Some(z)) =
                    (floats.next(), floats.next(), floats.next())
                {
                    v.push(Vec3::new(x, y, z));
                }
            }
            AttributeData::Vec4(v) => {
                while let (Some(x), Some(y), Some(z), Some(w)) =
                    (floats.next(), floats.next(), floats.next(), floats.next())
                {
                    v.push(Vec4::new(x, y, z, w));
                }
            }
        }
        if self.len() != before {
            self.dirty = true;
        }
    }
}

pub struct Mesh {
    registry: Arc<Registry<Mesh>>,
    key: AtomicU32,
    pub attributes: RwLock<HashMap<String, MeshAttribute>>,
    pub elements: RwLock<Vec<u32>>,
    pub renderer_data: Mutex<Option<Arc<dyn Any + Send + Sync>>>,
}

impl Mesh {
    pub fn create(registry: &Arc<Registry<Mesh>>) -> Arc<Mesh> {
        let mesh = Arc::new(Mesh {
            registry: registry.clone(),
            key: AtomicU32::new(0),
            attributes: RwLock::new(HashMap::new()),
            elements: RwLock::new(Vec::new()),
            renderer_data: Mutex::new(None),
        });
        let key = registry.add(&mesh);
        mesh.key.store(key.raw(), Ordering::Release);
        mesh
    }

    pub fn key(&self) -> u32 {
        self.key.load(Ordering::Acquire)
    }

    pub fn add_attribute(&self, name: &str, attribute: MeshAttribute) {
        self.attributes.write().insert(name.to_string(), attribute);
    }

    /// Append element bytes to a named attribute. Returns false when the
    /// attribute does not exist.
    pub fn push_attribute(&self, name: &str, bytes: &[u8]) -> bool {
        let mut attributes = self.attributes.write();
        match attributes.get_mut(name) {
            Some(attribute) => {
                attribute.push_bytes(bytes);
                true
            }
            None => false,
        }
    }

    /// True when any attribute needs a renderer upload.
    pub fn dirty(&self) -> bool {
        self.attributes.read().values().any(|a| a.dirty)
    }
}

impl Drop for Mesh {
    fn drop(&mut self) {
        self.registry.remove(self.key());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::MESH_INDEX_BASE;

    #[test]
    fn push_bytes_decodes_typed_rows() {
        let mut attribute = MeshAttribute::vec3();
        let mut bytes = Vec::new();
        for f in [1.0f32, 2.0, 3.0, 4.0, 5.0, 6.0] {
            bytes.extend_from_slice(&f.to_le_bytes());
        }
        attribute.push_bytes(&bytes);
        assert_eq!(attribute.len(), 2);
        match &attribute.data {
            AttributeData::Vec3(v) => assert_eq!(v[1], Vec3::new(4.0, 5.0, 6.0)),
            _ => unreachable!(),
        }
    }

    #[test]
    fn partial_trailing_elements_are_dropped() {
        let mut attribute = MeshAttribute::vec2();
        attribute.push_bytes(&[0u8; 12]); // one and a half Vec2s
        assert_eq!(attribute.len(), 1);
    }

    #[test]
    fn dirty_aggregates_over_attributes() {
        let registry = Registry::new(MESH_INDEX_BASE);
        let mesh = Mesh::create(&registry);
        assert!(!mesh.dirty());
        mesh.add_attribute("position", MeshAttribute::vec3());
        assert!(mesh.dirty());
        mesh.attributes.write().get_mut("position").unwrap().dirty = false;
        assert!(!mesh.dirty());

        assert!(!mesh.push_attribute("missing", &[]));
    }
}
