//! Host API registrations shared by every VM.
//!
//! Each module contributes the plugin-visible entries for one object
//! family. Calls that mutate the scene graph or renderer-owned state defer
//! a closure to the main thread; pure reads resolve immediately through
//! the registry read locks.

mod material;
mod mesh;
mod model;
mod node;
mod surface;

use std::collections::HashMap;
use std::sync::Arc;

use loam::{Args, CallValue, HostFn};

use crate::app::AppShared;

#[derive(Default)]
pub struct ApiRegistry {
    entries: HashMap<String, HostFn>,
}

impl ApiRegistry {
    pub fn insert(
        &mut self,
        name: &str,
        f: impl Fn(&mut Args<'_>) -> CallValue + Send + Sync + 'static,
    ) {
        self.entries.insert(name.to_string(), Arc::new(f));
    }

    pub(crate) fn clone_entries(&self) -> Vec<(String, HostFn)> {
        self.entries
            .iter()
            .map(|(name, f)| (name.clone(), f.clone()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

pub(crate) fn build(app: &Arc<AppShared>) -> ApiRegistry {
    let mut api = ApiRegistry::default();
    model::register(&mut api, app);
    node::register(&mut api, app);
    mesh::register(&mut api, app);
    material::register(&mut api, app);
    surface::register(&mut api, app);
    api
}
