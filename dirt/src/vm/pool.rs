//! Worker pool running VM time-slices.
//!
//! Workers are spawned lazily on the first scheduled Update. The main
//! thread copies the live-VM vector into the shared queue each Update
//! phase; workers drain it from the back, run one slice per VM and track a
//! busy count so the phase machine can wait for quiescence.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{info, warn};

use super::PluginVm;

pub struct VmPool {
    running: Arc<AtomicBool>,
    busy: Arc<AtomicU32>,
    queue: Arc<Mutex<Vec<Arc<PluginVm>>>>,
    vms: Mutex<Vec<Arc<PluginVm>>>,
    workers: Mutex<Vec<thread::JoinHandle<()>>>,
}

impl Default for VmPool {
    fn default() -> Self {
        VmPool::new()
    }
}

impl VmPool {
    pub fn new() -> VmPool {
        VmPool {
            running: Arc::new(AtomicBool::new(true)),
            busy: Arc::new(AtomicU32::new(0)),
            queue: Arc::new(Mutex::new(Vec::new())),
            vms: Mutex::new(Vec::new()),
            workers: Mutex::new(Vec::new()),
        }
    }

    pub fn add(&self, vm: Arc<PluginVm>) {
        self.vms.lock().push(vm);
    }

    /// Drop a VM from the live vector. A slice already queued for it may
    /// still run once; after that the VM is no longer scheduled.
    pub fn release(&self, key: u32) {
        let mut vms = self.vms.lock();
        match vms.iter().position(|vm| vm.key() == key) {
            Some(index) => {
                vms.swap_remove(index);
            }
            None => warn!("release: vm {key:#x} not in pool"),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.vms.lock().is_empty()
    }

    pub fn busy(&self) -> bool {
        self.busy.load(Ordering::Acquire) > 0 || !self.queue.lock().is_empty()
    }

    /// Block until every dispatched slice has completed. The phase machine
    /// only advances once this returns false. Single-threaded wasm builds
    /// cannot sleep, so they report busyness and let the caller retry.
    pub fn wait(&self) -> bool {
        #[cfg(target_family = "wasm")]
        {
            self.busy()
        }
        #[cfg(not(target_family = "wasm"))]
        {
            while self.busy() {
                thread::sleep(Duration::from_millis(1));
            }
            false
        }
    }

    /// Update-phase hook: make every live VM runnable for this tick.
    pub fn schedule(&self) {
        if self.busy() {
            return;
        }
        self.spawn_workers();
        let runnable = self.vms.lock().clone();
        *self.queue.lock() = runnable;
    }

    fn spawn_workers(&self) {
        let mut workers = self.workers.lock();
        if !workers.is_empty() {
            return;
        }
        let count = thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
            .max(1);
        info!("initializing pool with {count} workers");
        for _ in 0..count {
            let running = self.running.clone();
            let busy = self.busy.clone();
            let queue = self.queue.clone();
            workers.push(thread::spawn(move || worker(running, busy, queue)));
        }
    }
}

fn worker(
    running: Arc<AtomicBool>,
    busy: Arc<AtomicU32>,
    queue: Arc<Mutex<Vec<Arc<PluginVm>>>>,
) {
    while running.load(Ordering::Acquire) {
        let vm = {
            let mut queue = queue.lock();
            let vm = queue.pop();
            if vm.is_some() {
                busy.fetch_add(1, Ordering::AcqRel);
            }
            vm
        };
        match vm {
            Some(vm) => {
                vm.run();
                busy.fetch_sub(1, Ordering::AcqRel);
            }
            None => thread::sleep(Duration::from_millis(1)),
        }
    }
}

impl Drop for VmPool {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Release);
        for worker in self.workers.lock().drain(..) {
            let _ = worker.join();
        }
    }
}
