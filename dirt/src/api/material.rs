//! Material plugin calls.

use std::sync::Arc;

use loam::CallValue;
use tracing::warn;

use crate::app::AppShared;
use crate::scene::Material;

use super::ApiRegistry;

pub(super) fn register(api: &mut ApiRegistry, app: &Arc<AppShared>) {
    {
        let materials = app.materials.clone();
        let held = app.held.clone();
        api.insert("createMaterial", move |args| {
            let tags = args.get_str(0);
            let material = Material::create(&materials);
            for tag in tags.split_whitespace() {
                material.add_tag(tag);
            }
            held.hold(material.clone());
            CallValue::U32(material.key())
        });
    }

    {
        let materials = app.materials.clone();
        let queue = app.main_thread.clone();
        api.insert("Material_addTag", move |args| {
            let material_id = args.get(0);
            let tag = args.get_str(1);
            if tag.is_empty() {
                return CallValue::Unit;
            }
            let materials = materials.clone();
            queue.defer(move || match materials.find(material_id) {
                Some(material) => material.add_tag(&tag),
                None => warn!("could not find material {material_id:#x}"),
            });
            CallValue::Unit
        });
    }
}
