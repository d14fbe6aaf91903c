//! Scene graph: transform nodes, renderables and the scene itself.

mod material;
mod mesh;
mod surface;

pub use material::Material;
pub use mesh::{AttributeData, Mesh, MeshAttribute};
pub use surface::{Rect, Surface};

use std::any::Any;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Weak};

use glam::{Mat4, Vec2, Vec3, Vec4};
use parking_lot::RwLock;

use crate::index::Registry;

/// A renderer-visible parameter value.
#[derive(Clone, Debug)]
pub enum Uniform {
    Float(f32),
    Vec2(Vec2),
    Vec3(Vec3),
    Vec4(Vec4),
    Mat4(Mat4),
}

pub type UniformMap = RwLock<HashMap<String, Uniform>>;

pub struct NodeTransform {
    pub position: Vec3,
    pub rotation: Mat4,
    pub scale: Vec3,
    /// Composed world matrix, refreshed by the renderer pass.
    pub world: Mat4,
}

impl Default for NodeTransform {
    fn default() -> Self {
        NodeTransform {
            position: Vec3::ZERO,
            rotation: Mat4::IDENTITY,
            scale: Vec3::ONE,
            world: Mat4::IDENTITY,
        }
    }
}

/// One mesh/material pairing on a renderable node. `renderer_data` is an
/// opaque slot for the renderer's uploaded state.
pub struct Component {
    pub mesh: Arc<Mesh>,
    pub material: Arc<Material>,
    pub renderer_data: Option<Arc<dyn Any + Send + Sync>>,
}

/// State only renderable nodes carry.
pub struct Renderable {
    pub components: RwLock<Vec<Component>>,
    pub uniforms: UniformMap,
}

/// A transform node. Registered in the node registry for its whole life;
/// owned by its parent (or the per-tick root list until attached).
pub struct Node {
    registry: Arc<Registry<Node>>,
    key: AtomicU32,
    pub name: RwLock<String>,
    pub transform: RwLock<NodeTransform>,
    pub children: RwLock<Vec<Arc<Node>>>,
    renderable: Option<Renderable>,
}

impl Node {
    pub fn create(registry: &Arc<Registry<Node>>) -> Arc<Node> {
        Node::build(registry, None)
    }

    pub fn create_renderable(registry: &Arc<Registry<Node>>) -> Arc<Node> {
        let mut uniforms = HashMap::new();
        uniforms.insert("transform".to_string(), Uniform::Mat4(Mat4::IDENTITY));
        Node::build(
            registry,
            Some(Renderable {
                components: RwLock::new(Vec::new()),
                uniforms: RwLock::new(uniforms),
            }),
        )
    }

    fn build(registry: &Arc<Registry<Node>>, renderable: Option<Renderable>) -> Arc<Node> {
        let node = Arc::new(Node {
            registry: registry.clone(),
            key: AtomicU32::new(0),
            name: RwLock::new(String::new()),
            transform: RwLock::new(NodeTransform::default()),
            children: RwLock::new(Vec::new()),
            renderable,
        });
        let key = registry.add(&node);
        node.key.store(key.raw(), Ordering::Release);
        node
    }

    pub fn key(&self) -> u32 {
        self.key.load(Ordering::Acquire)
    }

    pub fn renderable(&self) -> Option<&Renderable> {
        self.renderable.as_ref()
    }
}

impl Drop for Node {
    fn drop(&mut self) {
        self.registry.remove(self.key());
    }
}

/// Scene-wide node names. Entries are weak: a dead node frees its name.
#[derive(Default)]
pub struct NameIndex {
    names: RwLock<HashMap<String, Weak<Node>>>,
}

impl NameIndex {
    fn taken(&self, name: &str) -> bool {
        matches!(self.names.read().get(name), Some(w) if w.upgrade().is_some())
    }

    /// Derive a free name from `base` by suffixing `_1`, `_2`, ... The
    /// counter advances until the name is unused, then stops.
    pub fn unique_name(&self, base: &str) -> String {
        if !self.taken(base) {
            return base.to_string();
        }
        let mut i = 1u32;
        loop {
            let candidate = format!("{base}_{i}");
            if !self.taken(&candidate) {
                return candidate;
            }
            i += 1;
        }
    }

    /// Bind `node` under `name` (uniquified on collision) and return the
    /// name actually used. Any previous name of the node is released.
    pub fn rename(&self, node: &Arc<Node>, name: &str) -> String {
        let previous = node.name.read().clone();
        if previous == name && self.taken(name) {
            return previous;
        }
        let unique = self.unique_name(name);
        let mut names = self.names.write();
        if !previous.is_empty() {
            if let Some(w) = names.get(&previous) {
                if w.as_ptr() == Arc::as_ptr(node) {
                    names.remove(&previous);
                }
            }
        }
        names.insert(unique.clone(), Arc::downgrade(node));
        *node.name.write() = unique.clone();
        unique
    }

    pub fn find(&self, name: &str) -> Option<Arc<Node>> {
        self.names.read().get(name)?.upgrade()
    }
}

struct SceneState {
    width: u32,
    height: u32,
    near: f32,
    far: f32,
    fov_degrees: f32,
    projection: Mat4,
}

/// Owns the root and camera nodes plus the projection parameters.
pub struct Scene {
    pub root: Arc<Node>,
    pub camera: Arc<Node>,
    pub names: NameIndex,
    pub uniforms: UniformMap,
    state: RwLock<SceneState>,
}

impl Scene {
    pub fn new(nodes: &Arc<Registry<Node>>) -> Scene {
        let mut uniforms = HashMap::new();
        uniforms.insert("projection".to_string(), Uniform::Mat4(Mat4::IDENTITY));
        Scene {
            root: Node::create(nodes),
            camera: Node::create(nodes),
            names: NameIndex::default(),
            uniforms: RwLock::new(uniforms),
            state: RwLock::new(SceneState {
                width: 100,
                height: 100,
                near: 1.0,
                far: 1000.0,
                fov_degrees: 60.0,
                projection: Mat4::IDENTITY,
            }),
        }
    }

    pub fn resize(&self, width: u32, height: u32) {
        let mut state = self.state.write();
        if width == state.width && height == state.height {
            return;
        }
        state.width = width;
        state.height = height;
        state.projection = Mat4::perspective_rh_gl(
            state.fov_degrees.to_radians(),
            width.max(1) as f32 / height.max(1) as f32,
            state.near,
            state.far,
        );
        self.uniforms
            .write()
            .insert("projection".to_string(), Uniform::Mat4(state.projection));
    }

    pub fn size(&self) -> (u32, u32) {
        let state = self.state.read();
        (state.width, state.height)
    }

    pub fn projection(&self) -> Mat4 {
        self.state.read().projection
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::NODE_INDEX_BASE;

    fn registry() -> Arc<Registry<Node>> {
        Registry::new(NODE_INDEX_BASE)
    }

    #[test]
    fn nodes_register_on_create_and_vanish_on_drop() {
        let nodes = registry();
        let node = Node::create(&nodes);
        let key = node.key();
        assert_eq!(key, NODE_INDEX_BASE);
        assert!(nodes.find(key).is_some());
        drop(node);
        assert!(nodes.find(key).is_none());
    }

    #[test]
    fn removed_node_slots_are_reused() {
        let nodes = registry();
        let a = Node::create(&nodes);
        let b = Node::create(&nodes);
        let c = Node::create(&nodes);
        assert_eq!(
            [a.key(), b.key(), c.key()],
            [NODE_INDEX_BASE, NODE_INDEX_BASE + 1, NODE_INDEX_BASE + 2]
        );
        drop(b);
        let d = Node::create(&nodes);
        assert_eq!(d.key(), NODE_INDEX_BASE + 1);
    }

    #[test]
    fn colliding_names_get_numeric_suffixes() {
        let nodes = registry();
        let scene = Scene::new(&nodes);
        let a = Node::create(&nodes);
        let b = Node::create(&nodes);
        let c = Node::create(&nodes);
        assert_eq!(scene.names.rename(&a, "lamp"), "lamp");
        assert_eq!(scene.names.rename(&b, "lamp"), "lamp_1");
        assert_eq!(scene.names.rename(&c, "lamp"), "lamp_2");
        assert!(Arc::ptr_eq(&scene.names.find("lamp_1").unwrap(), &b));

        // dropping a holder frees its name for reuse
        drop(b);
        let d = Node::create(&nodes);
        assert_eq!(scene.names.rename(&d, "lamp"), "lamp_1");
    }

    #[test]
    fn resize_recomputes_the_projection() {
        let nodes = registry();
        let scene = Scene::new(&nodes);
        let before = scene.projection();
        scene.resize(640, 480);
        assert_ne!(scene.projection(), before);
        assert_eq!(scene.size(), (640, 480));
    }
}
