//! Mesh plugin calls. Attribute and element payloads are copied out of
//! guest RAM on the worker thread, then spliced in on the main thread.

use std::sync::Arc;

use loam::CallValue;
use tracing::warn;

use crate::app::AppShared;
use crate::index::Registry;
use crate::main_thread::MainThreadQueue;
use crate::scene::{Mesh, MeshAttribute};

use super::ApiRegistry;

pub(super) fn register(api: &mut ApiRegistry, app: &Arc<AppShared>) {
    {
        let meshes = app.meshes.clone();
        let held = app.held.clone();
        api.insert("createMesh", move |_args| {
            let mesh = Mesh::create(&meshes);
            held.hold(mesh.clone());
            CallValue::U32(mesh.key())
        });
    }

    attribute_entry(api, app, "Mesh_addAttributeFloat", MeshAttribute::float);
    attribute_entry(api, app, "Mesh_addAttributeVector2", MeshAttribute::vec2);
    attribute_entry(api, app, "Mesh_addAttributeVector3", MeshAttribute::vec3);
    attribute_entry(api, app, "Mesh_addAttributeVector4", MeshAttribute::vec4);

    {
        let meshes = app.meshes.clone();
        let queue = app.main_thread.clone();
        api.insert("Mesh_pushAttribute", move |args| {
            let mesh_id = args.get(0);
            let name = args.get_str(1);
            let Some(bytes) = copy_range(args, 2, 3) else {
                warn!("pushAttribute: invalid data for {name:?} in mesh {mesh_id:#x}");
                return CallValue::Unit;
            };
            let meshes = meshes.clone();
            queue.defer(move || match meshes.find(mesh_id) {
                Some(mesh) => {
                    if !mesh.push_attribute(&name, &bytes) {
                        warn!("pushAttribute: no attribute {name:?} in mesh {mesh_id:#x}");
                    }
                }
                None => warn!("could not find mesh {mesh_id:#x}"),
            });
            CallValue::Unit
        });
    }

    {
        let meshes = app.meshes.clone();
        let queue = app.main_thread.clone();
        api.insert("Mesh_clearElements", move |args| {
            let mesh_id = args.get(0);
            let meshes = meshes.clone();
            queue.defer(move || match meshes.find(mesh_id) {
                Some(mesh) => mesh.elements.write().clear(),
                None => warn!("could not find mesh {mesh_id:#x}"),
            });
            CallValue::Unit
        });
    }

    {
        let meshes = app.meshes.clone();
        let queue = app.main_thread.clone();
        api.insert("Mesh_pushElements", move |args| {
            let mesh_id = args.get(0);
            let Some(bytes) = copy_range(args, 1, 2) else {
                warn!("pushElements: invalid element data for mesh {mesh_id:#x}");
                return CallValue::Unit;
            };
            let elements: Vec<u32> = bytes
                .chunks_exact(4)
                .map(|c| u32::from_le_bytes(c.try_into().unwrap()))
                .collect();
            let meshes = meshes.clone();
            queue.defer(move || match meshes.find(mesh_id) {
                Some(mesh) => mesh.elements.write().extend_from_slice(&elements),
                None => warn!("could not find mesh {mesh_id:#x}"),
            });
            CallValue::Unit
        });
    }
}

fn attribute_entry(
    api: &mut ApiRegistry,
    app: &Arc<AppShared>,
    name: &str,
    make: fn() -> MeshAttribute,
) {
    let meshes: Arc<Registry<Mesh>> = app.meshes.clone();
    let queue: Arc<MainThreadQueue> = app.main_thread.clone();
    api.insert(name, move |args| {
        let mesh_id = args.get(0);
        let attribute = args.get_str(1);
        let meshes = meshes.clone();
        queue.defer(move || match meshes.find(mesh_id) {
            Some(mesh) => mesh.add_attribute(&attribute, make()),
            None => warn!("could not find mesh {mesh_id:#x}"),
        });
        CallValue::Unit
    });
}

/// Non-null, 4-aligned, non-inverted guest pointer pair.
fn valid_range(begin: u32, end: u32) -> bool {
    begin != 0 && end != 0 && begin & 3 == 0 && end & 3 == 0 && end >= begin
}

/// Copy the guest byte range held in arguments `begin`/`end`.
fn copy_range(args: &mut loam::Args<'_>, begin: u32, end: u32) -> Option<Vec<u8>> {
    let begin = args.get(begin);
    let end = args.get(end);
    if !valid_range(begin, end) {
        return None;
    }
    args.vm
        .to_host(begin, (end - begin) as usize)
        .map(<[u8]>::to_vec)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn element_ranges_must_be_aligned_and_ordered() {
        assert!(valid_range(4, 4));
        assert!(valid_range(4, 16));
        assert!(!valid_range(0, 16));
        assert!(!valid_range(4, 0));
        assert!(!valid_range(5, 16), "misaligned begin");
        assert!(!valid_range(4, 18), "misaligned end");
        assert!(!valid_range(16, 4), "inverted range");
    }
}
