//! Node and renderable plugin calls.

use std::sync::Arc;

use glam::{Mat4, Vec3};
use loam::CallValue;
use tracing::warn;

use crate::app::AppShared;
use crate::scene::{Component, Node};

use super::ApiRegistry;

pub(super) fn register(api: &mut ApiRegistry, app: &Arc<AppShared>) {
    {
        let nodes = app.nodes.clone();
        let scene = app.scene.clone();
        let held = app.held.clone();
        let queue = app.main_thread.clone();
        api.insert("createRenderable", move |_args| {
            let node = Node::create_renderable(&nodes);
            held.hold(node.clone());
            let root = scene.root.clone();
            let child = node.clone();
            queue.defer(move || root.children.write().push(child));
            CallValue::U32(node.key())
        });
    }

    {
        let nodes = app.nodes.clone();
        let queue = app.main_thread.clone();
        api.insert("Node_setPosition", move |args| {
            let id = args.get(0);
            let position = Vec3::new(args.get_f32(1), args.get_f32(2), args.get_f32(3));
            let nodes = nodes.clone();
            queue.defer(move || {
                if let Some(node) = nodes.find(id) {
                    node.transform.write().position = position;
                }
            });
            CallValue::Unit
        });
    }

    {
        let nodes = app.nodes.clone();
        let queue = app.main_thread.clone();
        api.insert("Node_rotate", move |args| {
            let id = args.get(0);
            let angle = args.get_f32(1);
            let axis = Vec3::new(args.get_f32(2), args.get_f32(3), args.get_f32(4));
            let axis = axis.normalize_or_zero();
            if axis == Vec3::ZERO {
                warn!("Node_rotate: degenerate axis for node {id:#x}");
                return CallValue::Unit;
            }
            let rotation = Mat4::from_axis_angle(axis, angle);
            let nodes = nodes.clone();
            queue.defer(move || {
                if let Some(node) = nodes.find(id) {
                    let mut transform = node.transform.write();
                    transform.rotation = transform.rotation * rotation;
                }
            });
            CallValue::Unit
        });
    }

    {
        let nodes = app.nodes.clone();
        api.insert("Node_getComponentCount", move |args| {
            let count = nodes
                .find(args.get(0))
                .and_then(|node| node.renderable().map(|r| r.components.read().len()))
                .unwrap_or(0);
            CallValue::U32(count as u32)
        });
    }

    {
        let nodes = app.nodes.clone();
        api.insert("Node_getMesh", move |args| {
            let key = component_key(&nodes, args.get(0), args.get(1), |c| c.mesh.key());
            CallValue::U32(key)
        });
    }

    {
        let nodes = app.nodes.clone();
        api.insert("Node_getMaterial", move |args| {
            let key = component_key(&nodes, args.get(0), args.get(1), |c| c.material.key());
            CallValue::U32(key)
        });
    }

    {
        let nodes = app.nodes.clone();
        let meshes = app.meshes.clone();
        let materials = app.materials.clone();
        let queue = app.main_thread.clone();
        api.insert("Node_addComponent", move |args| {
            let node_id = args.get(0);
            let mesh_id = args.get(1);
            let material_id = args.get(2);
            let nodes = nodes.clone();
            let meshes = meshes.clone();
            let materials = materials.clone();
            queue.defer(move || {
                let node = nodes.find(node_id);
                let mesh = meshes.find(mesh_id);
                let material = materials.find(material_id);
                let (Some(node), Some(mesh), Some(material)) = (node, mesh, material) else {
                    warn!("could not add component to node {node_id:#x}");
                    return;
                };
                let Some(renderable) = node.renderable() else {
                    warn!("node {node_id:#x} is not renderable");
                    return;
                };
                renderable.components.write().push(Component {
                    mesh,
                    material,
                    renderer_data: None,
                });
            });
            CallValue::Unit
        });
    }
}

fn component_key(
    nodes: &crate::index::Registry<Node>,
    node_id: u32,
    index: u32,
    pick: impl Fn(&Component) -> u32,
) -> u32 {
    let Some(node) = nodes.find(node_id) else {
        return 0;
    };
    let Some(renderable) = node.renderable() else {
        return 0;
    };
    let components = renderable.components.read();
    components.get(index as usize).map(&pick).unwrap_or(0)
}
