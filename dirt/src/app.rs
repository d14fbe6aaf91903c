//! The application: registry bundle, phase machine and plugin boot.

use std::fs;
use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use once_cell::sync::OnceCell;
use tracing::{info, warn};

use crate::api::{self, ApiRegistry};
use crate::events::{EventBus, EventId};
use crate::graphics::Graphics;
use crate::index::{
    HeldResources, Registry, MATERIAL_INDEX_BASE, MESH_INDEX_BASE, NODE_INDEX_BASE,
    SURFACE_INDEX_BASE, VM_INDEX_BASE,
};
use crate::main_thread::MainThreadQueue;
use crate::model::{parser, Model};
use crate::scene::{Material, Mesh, Node, Scene, Surface};
use crate::vm::pool::VmPool;
use crate::vm::PluginVm;

/// Everything host-API closures and worker threads reach for: the registry
/// bundle, the model, the scene, the event bus, the deferral queue and the
/// pool. Owned by [`App`], shared via `Arc`.
pub struct AppShared {
    pub vms: Arc<Registry<PluginVm>>,
    pub nodes: Arc<Registry<Node>>,
    pub meshes: Arc<Registry<Mesh>>,
    pub materials: Arc<Registry<Material>>,
    pub surfaces: Arc<Registry<Surface>>,
    pub model: Arc<Model>,
    pub scene: Arc<Scene>,
    pub bus: EventBus,
    pub main_thread: Arc<MainThreadQueue>,
    pub held: Arc<HeldResources>,
    pub pool: VmPool,
    api: OnceCell<ApiRegistry>,
}

impl AppShared {
    fn new() -> Arc<AppShared> {
        let nodes = Registry::new(NODE_INDEX_BASE);
        let shared = Arc::new(AppShared {
            vms: Registry::new(VM_INDEX_BASE),
            scene: Arc::new(Scene::new(&nodes)),
            nodes,
            meshes: Registry::new(MESH_INDEX_BASE),
            materials: Registry::new(MATERIAL_INDEX_BASE),
            surfaces: Registry::new(SURFACE_INDEX_BASE),
            model: Model::new(),
            bus: EventBus::new(),
            main_thread: Arc::new(MainThreadQueue::default()),
            held: Arc::new(HeldResources::default()),
            pool: VmPool::new(),
            api: OnceCell::new(),
        });
        let _ = shared.api.set(api::build(&shared));

        // every Update phase makes the live VMs runnable
        let weak = Arc::downgrade(&shared);
        shared.bus.subscribe(EventId::Update, 0, move |_| {
            if let Some(shared) = weak.upgrade() {
                shared.pool.schedule();
            }
        });
        shared
    }

    pub(crate) fn api(&self) -> &ApiRegistry {
        self.api.get().expect("host API installed at construction")
    }

    /// Boot `argv[0]` from the plugin directory and queue the remaining
    /// arguments as its first message. Returns the VM handle, or zero.
    pub fn boot_vm(self: &Arc<Self>, mut parts: Vec<String>) -> u32 {
        if parts.is_empty() {
            return 0;
        }
        let name = parts.remove(0);
        match self.try_boot_vm(&name, parts) {
            Ok(key) => key,
            Err(err) => {
                warn!("could not boot plugin {name:?}: {err:#}");
                0
            }
        }
    }

    fn try_boot_vm(self: &Arc<Self>, name: &str, parts: Vec<String>) -> anyhow::Result<u32> {
        let dir = self.model.get_string("main.pluginDir", "./plugins");
        let path = Path::new(&dir).join(name).join(format!("{name}.drt"));
        let image =
            fs::read(&path).with_context(|| format!("reading {}", path.display()))?;

        let vm = PluginVm::new(self, name);
        vm.boot(&image).context("loading image")?;
        if !parts.is_empty() {
            vm.message(parts);
        }
        self.pool.add(vm.clone());
        info!("booted plugin {name:?} as vm {:#x}", vm.key());
        Ok(vm.key())
    }

    /// Drop a VM from the pool, its event subscriptions and its handle.
    pub fn release_vm(&self, key: u32) {
        self.pool.release(key);
        self.bus.remove_endpoint(key);
        self.vms.remove(key);
    }
}

pub struct App {
    shared: Arc<AppShared>,
    gfx: Box<dyn Graphics>,
    step: u32,
    last_size: (u32, u32),
}

impl App {
    pub fn new(gfx: Box<dyn Graphics>) -> App {
        App {
            shared: AppShared::new(),
            gfx,
            step: 0,
            last_size: (0, 0),
        }
    }

    pub fn shared(&self) -> &Arc<AppShared> {
        &self.shared
    }

    pub fn model(&self) -> &Arc<Model> {
        &self.shared.model
    }

    pub fn running(&self) -> bool {
        self.gfx.running()
    }

    /// Parse the settings file, emit Boot and start the main plugin with
    /// the `main.args.<i>` argv. Plugin failures are logged, not fatal.
    pub fn boot(&mut self) {
        let settings = self.shared.model.get_string("main.settings", "settings.ini");
        match fs::read_to_string(&settings) {
            Ok(text) => parser::parse(&self.shared.model, &text),
            Err(err) => warn!("could not read settings {settings:?}: {err}"),
        }
        self.shared.bus.emit(EventId::Boot);

        let mut argv = vec![self.shared.model.get_string("main.plugin", "boot.bin")];
        for i in 0.. {
            let arg = self.shared.model.get_string(&format!("main.args.{i}"), "");
            if arg.is_empty() {
                break;
            }
            argv.push(arg);
        }
        if self.shared.boot_vm(argv) == 0 {
            warn!("main plugin did not boot");
        }
    }

    /// One tick: pump the backend, then walk the phase machine. Each phase
    /// event fires only after every VM slice of the previous phase has
    /// completed, with deferred work drained and GC roots dropped between.
    pub fn update(&mut self) {
        self.gfx.poll(&self.shared.bus);
        let size = (self.gfx.width(), self.gfx.height());
        if size != self.last_size {
            self.last_size = size;
            self.shared.scene.resize(size.0, size.1);
            self.shared.bus.emit(EventId::Resize);
        }

        loop {
            if self.shared.pool.wait() {
                return;
            }
            self.shared.main_thread.run();
            self.shared.held.gc();
            match self.step {
                0 => self.shared.bus.emit(EventId::PreUpdate),
                1 => self.shared.bus.emit(EventId::Update),
                2 => self.shared.bus.emit(EventId::Draw),
                3 => self.shared.bus.emit(EventId::PostUpdate),
                _ => {
                    self.step = 0;
                    return;
                }
            }
            self.step += 1;
        }
    }
}
