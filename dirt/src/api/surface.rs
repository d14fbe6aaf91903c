//! Surface plugin calls. Surfaces carry their own lock, so pixel writes
//! run directly on the calling worker.

use std::sync::Arc;

use loam::CallValue;
use tracing::warn;

use crate::app::AppShared;
use crate::index::Registry;
use crate::scene::{Rect, Surface};

use super::ApiRegistry;

fn find(surfaces: &Registry<Surface>, id: u32) -> Option<Arc<Surface>> {
    let surface = surfaces.find(id);
    if surface.is_none() {
        warn!("invalid surface id {id:#x}");
    }
    surface
}

pub(super) fn register(api: &mut ApiRegistry, app: &Arc<AppShared>) {
    {
        let surfaces = app.surfaces.clone();
        let held = app.held.clone();
        api.insert("createSurface", move |args| {
            let surface = Surface::create(&surfaces, args.get(0), args.get(1));
            held.hold(surface.clone());
            CallValue::U32(surface.key())
        });
    }

    {
        let surfaces = app.surfaces.clone();
        api.insert("Surface_resize", move |args| {
            if let Some(surface) = find(&surfaces, args.get(0)) {
                surface.resize(args.get(1), args.get(2));
            }
            CallValue::Unit
        });
    }

    {
        let surfaces = app.surfaces.clone();
        api.insert("Surface_fill", move |args| {
            if let Some(surface) = find(&surfaces, args.get(0)) {
                let (r, g, b, a) = (args.get(1), args.get(2), args.get(3), args.get(4));
                let color =
                    (r & 0xFF) | ((g & 0xFF) << 8) | ((b & 0xFF) << 16) | ((a & 0xFF) << 24);
                surface.fill(color);
            }
            CallValue::Unit
        });
    }

    {
        let surfaces = app.surfaces.clone();
        api.insert("Surface_write", move |args| {
            let id = args.get(0);
            let region = Rect::new(
                args.get_i32(1),
                args.get_i32(2),
                args.get(3),
                args.get(4),
            );
            let ptr = args.get(5);
            let byte_len = (region.width as usize) * (region.height as usize) * 4;
            let Some(bytes) = args.vm.to_host(ptr, byte_len).map(<[u8]>::to_vec) else {
                warn!("Surface_write: invalid pixel data for surface {id:#x}");
                return CallValue::Unit;
            };
            let pixels: Vec<u32> = bytes
                .chunks_exact(4)
                .map(|c| u32::from_le_bytes(c.try_into().unwrap()))
                .collect();
            if let Some(surface) = find(&surfaces, id) {
                surface.write(region, &pixels);
            }
            CallValue::Unit
        });
    }

    {
        let surfaces = app.surfaces.clone();
        api.insert("Surface_width", move |args| {
            let width = find(&surfaces, args.get(0)).map(|s| s.width()).unwrap_or(0);
            CallValue::U32(width)
        });
    }

    {
        let surfaces = app.surfaces.clone();
        api.insert("Surface_height", move |args| {
            let height = find(&surfaces, args.get(0))
                .map(|s| s.height())
                .unwrap_or(0);
            CallValue::U32(height)
        });
    }
}
