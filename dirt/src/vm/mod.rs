//! Host-side plugin VMs.
//!
//! A `PluginVm` wraps the interpreter core with the per-VM host state: the
//! file-handle table, the pending-event ring, the message FIFO and the
//! standard API registrations every plugin can import.

pub mod pool;

use std::collections::VecDeque;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Weak};

use bitflags::bitflags;
use parking_lot::{Mutex, MutexGuard, RwLock};
use tracing::{info, warn};

use loam::{Args, CallValue, HostFn};

use crate::app::AppShared;
use crate::events::{CircleBuffer, EventId, MAX_EVENT};
use crate::index::Registry;
use crate::util::{parse_command_line, parse_u32_prefix};

/// Capacity of the pending-event ring; the oldest entry is dropped on
/// overflow.
const EVENT_RING_SIZE: usize = 32;

/// File handles 0..3 are the process stdio streams.
const RESERVED_HANDLES: u32 = 3;

bitflags! {
    /// Newlib-style open(2) flag bits as guests deliver them.
    pub struct GuestOpenFlags: u32 {
        const WRONLY = 0x0001;
        const RDWR   = 0x0002;
        const APPEND = 0x0008;
        const CREAT  = 0x0200;
        const TRUNC  = 0x0400;
        const EXCL   = 0x0800;
    }
}

/// Map the recognised flag combinations onto open options; everything else
/// is refused.
fn open_options(flags: GuestOpenFlags) -> Option<OpenOptions> {
    let masked = flags
        & (GuestOpenFlags::WRONLY
            | GuestOpenFlags::RDWR
            | GuestOpenFlags::APPEND
            | GuestOpenFlags::CREAT
            | GuestOpenFlags::TRUNC);
    let mut options = OpenOptions::new();
    if masked == GuestOpenFlags::empty() {
        options.read(true);
    } else if masked == GuestOpenFlags::WRONLY | GuestOpenFlags::CREAT | GuestOpenFlags::TRUNC {
        options.write(true).create(true).truncate(true);
    } else if masked == GuestOpenFlags::WRONLY | GuestOpenFlags::CREAT | GuestOpenFlags::APPEND {
        options.append(true).create(true);
    } else if masked == GuestOpenFlags::RDWR {
        options.read(true).write(true);
    } else if masked == GuestOpenFlags::RDWR | GuestOpenFlags::CREAT | GuestOpenFlags::TRUNC {
        options.read(true).write(true).create(true).truncate(true);
    } else if masked == GuestOpenFlags::RDWR | GuestOpenFlags::CREAT | GuestOpenFlags::APPEND {
        options.read(true).append(true).create(true);
    } else {
        return None;
    }
    Some(options)
}

pub struct PluginVm {
    registry: Arc<Registry<PluginVm>>,
    key: AtomicU32,
    core: Mutex<loam::Vm>,
    /// Relative guest paths resolve against this directory; the host
    /// process working directory is never changed.
    work_dir: PathBuf,
    files: Mutex<Vec<Option<File>>>,
    events: Mutex<CircleBuffer<u32>>,
    messages: RwLock<VecDeque<Vec<String>>>,
    /// The message most recently popped, served out by `getMessageArg`.
    active_message: Mutex<Vec<String>>,
}

impl PluginVm {
    /// Create a VM wired to the app: the shared host API plus the per-VM
    /// entries, registered in the VM handle range.
    pub fn new(app: &Arc<AppShared>, name: &str) -> Arc<PluginVm> {
        let plugins_dir = app.model.get_string("main.pluginDir", "./plugins");
        let app_weak = Arc::downgrade(app);
        let global_api = app.api().clone_entries();

        let vm = Arc::new_cyclic(|weak: &Weak<PluginVm>| {
            let mut core = loam::Vm::new();
            core.add_api(global_api);
            core.add_api(standard_api(weak.clone(), app_weak));
            PluginVm {
                registry: app.vms.clone(),
                key: AtomicU32::new(0),
                core: Mutex::new(core),
                work_dir: Path::new(&plugins_dir).join(name),
                files: Mutex::new(Vec::new()),
                events: Mutex::new(CircleBuffer::new(EVENT_RING_SIZE)),
                messages: RwLock::new(VecDeque::new()),
                active_message: Mutex::new(Vec::new()),
            }
        });
        let key = app.vms.add(&vm);
        vm.key.store(key.raw(), Ordering::Release);
        vm
    }

    pub fn key(&self) -> u32 {
        self.key.load(Ordering::Acquire)
    }

    /// Direct access to the interpreter core. Held across `run`, so only
    /// lock it from outside a slice.
    pub fn core(&self) -> MutexGuard<'_, loam::Vm> {
        self.core.lock()
    }

    pub fn boot(&self, image: &[u8]) -> Result<(), loam::ImageError> {
        self.core.lock().boot(image, 0)
    }

    /// Execute one time-slice.
    pub fn run(&self) {
        self.core.lock().run();
    }

    pub fn crashed(&self) -> bool {
        self.core.lock().crashed()
    }

    pub fn suspend(&self) -> Vec<u8> {
        self.core.lock().suspend()
    }

    pub fn thaw(&self, data: &[u8]) -> Result<(), loam::ImageError> {
        self.core.lock().thaw(data)
    }

    /// Enqueue a message; the guest drains it with `popMessage`.
    pub fn message(&self, args: Vec<String>) {
        self.messages.write().push_back(args);
    }

    /// Push a pending event onto the ring.
    pub fn event(&self, id: EventId) {
        self.events.lock().push(id as u32);
    }

    fn resolve_path(&self, path: &str) -> PathBuf {
        let p = Path::new(path);
        if p.is_absolute() {
            p.to_path_buf()
        } else {
            self.work_dir.join(p)
        }
    }
}

impl Drop for PluginVm {
    fn drop(&mut self) {
        self.registry.remove(self.key());
    }
}

fn host(f: impl Fn(&mut Args<'_>) -> CallValue + Send + Sync + 'static) -> HostFn {
    Arc::new(f)
}

/// The per-VM API entries. All captures are weak: the closures live inside
/// the interpreter core the `PluginVm` owns.
fn standard_api(vm: Weak<PluginVm>, app: Weak<AppShared>) -> Vec<(String, HostFn)> {
    let mut api: Vec<(String, HostFn)> = Vec::new();
    let mut add = |name: &str, f: HostFn| api.push((name.to_string(), f));

    {
        let vm = vm.clone();
        add(
            "getId",
            host(move |_args| match vm.upgrade() {
                Some(vm) => CallValue::U32(vm.key()),
                None => CallValue::U32(0),
            }),
        );
    }

    add(
        "yield",
        host(|args| {
            args.vm.yield_now();
            CallValue::Unit
        }),
    );

    {
        let vm = vm.clone();
        add(
            "vmOpen",
            host(move |args| {
                let Some(vm) = vm.upgrade() else {
                    return CallValue::I32(-1);
                };
                let path = args.get_str(0);
                let flags = GuestOpenFlags::from_bits_truncate(args.get(1));
                let Some(options) = open_options(flags) else {
                    warn!("vmOpen: invalid file mode {:#x}", flags.bits());
                    return CallValue::I32(-1);
                };
                match options.open(vm.resolve_path(&path)) {
                    Ok(file) => {
                        let mut files = vm.files.lock();
                        files.push(Some(file));
                        CallValue::I32(files.len() as i32 - 1 + RESERVED_HANDLES as i32)
                    }
                    Err(err) => {
                        warn!("vmOpen: {path:?}: {err}");
                        CallValue::I32(-1)
                    }
                }
            }),
        );
    }

    {
        let vm = vm.clone();
        add(
            "vmClose",
            host(move |args| {
                if let Some(vm) = vm.upgrade() {
                    let slot = args.get(0).wrapping_sub(RESERVED_HANDLES) as usize;
                    let mut files = vm.files.lock();
                    if slot < files.len() {
                        files[slot] = None;
                    }
                }
                CallValue::Unit
            }),
        );
    }

    {
        let vm = vm.clone();
        add(
            "vmLSeek",
            host(move |args| {
                let fh = args.get(0);
                let off = args.get_i32(1);
                let whence = args.get_i32(2);
                let Some(vm) = vm.upgrade() else {
                    return CallValue::I32(0);
                };
                if fh < RESERVED_HANDLES {
                    return CallValue::I32(0);
                }
                let slot = (fh - RESERVED_HANDLES) as usize;
                let mut files = vm.files.lock();
                let Some(Some(file)) = files.get_mut(slot) else {
                    return CallValue::I32(0);
                };
                let pos = match whence {
                    0 => SeekFrom::Start(off.max(0) as u64),
                    1 => SeekFrom::Current(off as i64),
                    2 => SeekFrom::End(off as i64),
                    _ => return CallValue::I32(0),
                };
                match file.seek(pos) {
                    Ok(position) => CallValue::I32(position as i32),
                    Err(_) => CallValue::I32(0),
                }
            }),
        );
    }

    {
        let vm = vm.clone();
        add(
            "vmRead",
            host(move |args| {
                let fh = args.get(0);
                let ptr = args.get(1);
                let len = args.get(2) as usize;
                let Some(vm) = vm.upgrade() else {
                    return CallValue::U32(0);
                };
                let Some(buffer) = args.vm.to_host_mut(ptr, len) else {
                    return CallValue::U32(0);
                };
                if fh < RESERVED_HANDLES {
                    if fh == 0 {
                        let n = std::io::stdin().read(buffer).unwrap_or(0);
                        return CallValue::U32(n as u32);
                    }
                    return CallValue::U32(0);
                }
                let slot = (fh - RESERVED_HANDLES) as usize;
                let mut files = vm.files.lock();
                let Some(Some(file)) = files.get_mut(slot) else {
                    return CallValue::U32(0);
                };
                let n = file.read(buffer).unwrap_or(0);
                CallValue::U32(n as u32)
            }),
        );
    }

    {
        let vm = vm.clone();
        add(
            "vmWrite",
            host(move |args| {
                let fh = args.get(0);
                let ptr = args.get(1);
                let len = args.get(2) as usize;
                let Some(vm) = vm.upgrade() else {
                    return CallValue::U32(0);
                };
                let Some(buffer) = args.vm.to_host(ptr, len).map(<[u8]>::to_vec) else {
                    return CallValue::U32(0);
                };
                if fh < RESERVED_HANDLES {
                    let n = match fh {
                        1 => std::io::stdout().write(&buffer).unwrap_or(0),
                        2 => std::io::stderr().write(&buffer).unwrap_or(0),
                        _ => 0,
                    };
                    return CallValue::U32(n as u32);
                }
                let slot = (fh - RESERVED_HANDLES) as usize;
                let mut files = vm.files.lock();
                let Some(Some(file)) = files.get_mut(slot) else {
                    return CallValue::U32(0);
                };
                let n = file.write(&buffer).unwrap_or(0);
                CallValue::U32(n as u32)
            }),
        );
    }

    {
        let vm = vm.clone();
        let app = app.clone();
        add(
            "vmExit",
            host(move |args| {
                let code = args.get_i32(0);
                if let (Some(vm), Some(app)) = (vm.upgrade(), app.upgrade()) {
                    info!("vm {:#x} exited with code {code}", vm.key());
                    app.release_vm(vm.key());
                }
                args.vm.yield_now();
                CallValue::Unit
            }),
        );
    }

    {
        let vm = vm.clone();
        add(
            "pollEvents",
            host(move |_args| {
                let pending = vm.upgrade().and_then(|vm| vm.events.lock().pop());
                CallValue::U32(pending.unwrap_or(MAX_EVENT))
            }),
        );
    }

    {
        let vm = vm.clone();
        let app = app.clone();
        add(
            "enableEvent",
            host(move |args| {
                let Some(id) = EventId::from_u32(args.get(0)) else {
                    return CallValue::Unit;
                };
                if let (Some(vm), Some(app)) = (vm.upgrade(), app.upgrade()) {
                    let endpoint = vm.key();
                    let weak = Arc::downgrade(&vm);
                    app.bus.subscribe(id, endpoint, move |event| {
                        if let Some(vm) = weak.upgrade() {
                            vm.event(event);
                        }
                    });
                }
                CallValue::Unit
            }),
        );
    }

    {
        let vm = vm.clone();
        add(
            "popMessage",
            host(move |_args| {
                let Some(vm) = vm.upgrade() else {
                    return CallValue::U32(0);
                };
                let mut active = vm.active_message.lock();
                active.clear();
                let popped = vm.messages.write().pop_front();
                match popped {
                    Some(message) => {
                        *active = message;
                        CallValue::U32(active.len() as u32)
                    }
                    None => CallValue::U32(0),
                }
            }),
        );
    }

    {
        let vm = vm.clone();
        add(
            "getMessageArg",
            host(move |args| {
                let index = args.get(0) as usize;
                let arg = vm
                    .upgrade()
                    .and_then(|vm| vm.active_message.lock().get(index).cloned())
                    .unwrap_or_default();
                CallValue::Str(arg)
            }),
        );
    }

    {
        let app = app.clone();
        add(
            "vmSystem",
            host(move |args| {
                let Some(app) = app.upgrade() else {
                    return CallValue::U32(0);
                };
                let parts = parse_command_line(&args.get_str(0));
                if parts.is_empty() || parts[0].is_empty() {
                    return CallValue::U32(0);
                }
                // a leading numeric ID of a live VM routes the message;
                // anything else names a plugin to boot
                let vmid = parse_u32_prefix(&parts[0]);
                match app.vms.find(vmid) {
                    Some(target) => {
                        target.message(parts);
                        CallValue::U32(vmid)
                    }
                    None => CallValue::U32(app.boot_vm(parts)),
                }
            }),
        );
    }

    api
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_the_six_documented_open_modes_are_accepted() {
        assert!(open_options(GuestOpenFlags::empty()).is_some());
        assert!(open_options(
            GuestOpenFlags::WRONLY | GuestOpenFlags::CREAT | GuestOpenFlags::TRUNC
        )
        .is_some());
        assert!(open_options(
            GuestOpenFlags::WRONLY | GuestOpenFlags::CREAT | GuestOpenFlags::APPEND
        )
        .is_some());
        assert!(open_options(GuestOpenFlags::RDWR).is_some());
        assert!(open_options(GuestOpenFlags::WRONLY).is_none());
        assert!(open_options(GuestOpenFlags::TRUNC).is_none());
        // EXCL is masked off rather than refused
        assert!(open_options(GuestOpenFlags::RDWR | GuestOpenFlags::EXCL).is_some());
    }
}
