//! The VM core: RAM ownership, import linkage, the host-call ABI and
//! suspend/thaw snapshots.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::cpu::{CpuState, NUM_REGS, PC, SP};
use crate::exec;
use crate::image::{self, ImageError};

/// Default instruction budget of one `run` call.
pub const DEFAULT_SLICE: usize = (32 * 1024 * 1024) / 30;

/// Value returned by a host API function, mapped onto guest R0.
pub enum CallValue {
    Unit,
    I32(i32),
    U32(u32),
    F32(f32),
    Bool(bool),
    /// Materialised in guest RAM via `to_guest`; R0 receives the pointer.
    Str(String),
}

pub type HostFn = Arc<dyn Fn(&mut Args<'_>) -> CallValue + Send + Sync>;

/// View over the guest calling convention during a host call: R0..R3 carry
/// the first four arguments, the rest live in 4-byte stack slots.
pub struct Args<'a> {
    pub vm: &'a mut Vm,
}

impl Args<'_> {
    pub fn get(&mut self, i: u32) -> u32 {
        if i < 4 {
            self.vm.cpu.reg[i as usize]
        } else {
            let sp = self.vm.cpu.reg[SP];
            self.vm.cpu.read32(sp.wrapping_add((i - 4) * 4))
        }
    }

    pub fn get_i32(&mut self, i: u32) -> i32 {
        self.get(i) as i32
    }

    pub fn get_f32(&mut self, i: u32) -> f32 {
        f32::from_bits(self.get(i))
    }

    /// Read argument `i` as a guest C string. Null or out-of-range pointers
    /// yield an empty string.
    pub fn get_str(&mut self, i: u32) -> String {
        let ptr = self.get(i);
        self.vm.read_guest_str(ptr)
    }
}

/// One guest: an isolated CPU plus the API functions linked into it.
pub struct Vm {
    pub(crate) cpu: CpuState,
    api: HashMap<String, HostFn>,
    pub(crate) api_index: Vec<HostFn>,
    /// Instruction budget for the next `run` call.
    pub speed: usize,
}

impl Default for Vm {
    fn default() -> Self {
        Vm::new()
    }
}

impl Vm {
    pub fn new() -> Vm {
        Vm {
            cpu: CpuState::new(),
            api: HashMap::new(),
            api_index: Vec::new(),
            speed: DEFAULT_SLICE,
        }
    }

    /// Register host functions. Later registrations shadow earlier ones at
    /// `link` time, so per-VM overlays go in last.
    pub fn add_api<I>(&mut self, entries: I)
    where
        I: IntoIterator<Item = (String, HostFn)>,
    {
        self.api.extend(entries);
    }

    pub fn cpu(&self) -> &CpuState {
        &self.cpu
    }

    pub fn crashed(&self) -> bool {
        self.cpu.crashed
    }

    pub fn api_count(&self) -> usize {
        self.api_index.len()
    }

    /// Load an image, size and zero RAM, link imports and reset the CPU.
    /// Replaces any prior guest state on this instance.
    pub fn boot(&mut self, image: &[u8], requested_ram: usize) -> Result<(), ImageError> {
        image::validate(image)?;

        let header_ram = image::word(image, 4) as usize;
        let mut ram_size = requested_ram
            .max(header_ram)
            .max(image.len() + image::MIN_HEAP);
        ram_size = (ram_size + 3) & !3;

        let import_count = image::count_imports(image, ram_size);
        let extended_ram_size = ram_size + import_count * 4;
        info!(
            "booting VM: ram {:.2} KiB, {} imports, image {} bytes",
            ram_size as f64 / 1024.0,
            import_count,
            image.len()
        );

        self.cpu.ram = vec![0; extended_ram_size];
        self.cpu.ram[..image.len()].copy_from_slice(image);
        self.cpu.ram_size = ram_size as u32;
        self.cpu.extended_ram_size = extended_ram_size as u32;
        self.cpu.max_ram_addr = extended_ram_size as u32 - 1;

        self.link();
        self.cpu.reset();
        Ok(())
    }

    /// Walk the import table and rewrite resolvable slots into trampoline
    /// addresses. The original key pointer is preserved in the trampoline
    /// word so a snapshot can be re-linked in another process.
    fn link(&mut self) {
        self.api_index.clear();
        let ram_size = self.cpu.ram_size as usize;
        let mut offset = image::IMPORT_TABLE;
        while offset + 4 < ram_size {
            let key_ptr = image::word(&self.cpu.ram, offset);
            if key_ptr == 0 {
                break;
            }
            let key = image::c_string(&self.cpu.ram, key_ptr as usize);
            match self.api.get(&key) {
                Some(func) => {
                    let func = func.clone();
                    let api_ptr = ram_size + self.api_index.len() * 4;
                    self.api_index.push(func);
                    image::put_word(&mut self.cpu.ram, offset, api_ptr as u32);
                    image::put_word(&mut self.cpu.ram, api_ptr, key_ptr);
                    debug!("linked [{key}] at {offset:#x} -> {api_ptr:#x}");
                }
                None => {
                    warn!(
                        "unresolved import #{}: [{key}]",
                        (offset - image::IMPORT_TABLE) / 4
                    );
                }
            }
            offset += 4;
        }
    }

    /// Execute up to `speed` instructions. A crashed CPU is a no-op.
    pub fn exec(&mut self, speed: usize) {
        if self.cpu.crashed {
            return;
        }
        self.cpu.speed = speed;
        let mut executed = 0;
        while executed < self.cpu.speed {
            let op = self.cpu.prefetch[0];
            self.cpu.prefetch[0] = self.cpu.prefetch[1];
            self.cpu.next_pc = self.cpu.reg[PC];
            self.cpu.reg[PC] = self.cpu.reg[PC].wrapping_add(2);
            self.cpu.prefetch_next();
            exec::dispatch(self, op as u16);
            executed += 1;
        }
    }

    pub fn run(&mut self) {
        self.exec(self.speed);
    }

    /// Cooperatively end the current slice. No state is lost.
    pub fn yield_now(&mut self) {
        self.cpu.speed = 0;
    }

    pub(crate) fn host_call(&mut self, index: usize) {
        let func = match self.api_index.get(index) {
            Some(func) => func.clone(),
            None => return,
        };
        let value = (*func)(&mut Args { vm: self });
        match value {
            CallValue::Unit => {}
            CallValue::I32(v) => self.cpu.reg[0] = v as u32,
            CallValue::U32(v) => self.cpu.reg[0] = v,
            CallValue::F32(v) => self.cpu.reg[0] = v.to_bits(),
            CallValue::Bool(v) => self.cpu.reg[0] = v as u32,
            CallValue::Str(s) => {
                let ptr = self.to_guest_str(&s);
                self.cpu.reg[0] = ptr;
            }
        }
    }

    /// Range-checked aliasing view into guest RAM. Never moves memory.
    pub fn to_host(&self, ptr: u32, size: usize) -> Option<&[u8]> {
        let end = (ptr as usize).checked_add(size)?;
        if ptr == 0 || end > self.cpu.ram.len() {
            warn!("to_host: invalid guest pointer {ptr:#x}+{size}");
            return None;
        }
        Some(&self.cpu.ram[ptr as usize..end])
    }

    pub fn to_host_mut(&mut self, ptr: u32, size: usize) -> Option<&mut [u8]> {
        let end = (ptr as usize).checked_add(size)?;
        if ptr == 0 || end > self.cpu.ram.len() {
            warn!("to_host: invalid guest pointer {ptr:#x}+{size}");
            return None;
        }
        Some(&mut self.cpu.ram[ptr as usize..end])
    }

    /// Deliver bytes to the guest by (re)placing them past the trampoline
    /// region, and return the guest pointer. Only the latest payload is
    /// retained.
    pub fn to_guest(&mut self, data: &[u8]) -> u32 {
        let base = self.cpu.extended_ram_size as usize;
        self.cpu.ram.resize(base + data.len(), 0);
        self.cpu.ram[base..].copy_from_slice(data);
        self.cpu.max_ram_addr = self.cpu.ram.len() as u32 - 1;
        base as u32
    }

    pub fn to_guest_str(&mut self, s: &str) -> u32 {
        let mut bytes = Vec::with_capacity(s.len() + 1);
        bytes.extend_from_slice(s.as_bytes());
        bytes.push(0);
        self.to_guest(&bytes)
    }

    pub fn read_guest_str(&self, ptr: u32) -> String {
        if ptr == 0 || ptr >= self.cpu.ram.len() as u32 {
            return String::new();
        }
        image::c_string(&self.cpu.ram, ptr as usize)
    }

    /// Serialise the CPU record followed by the RAM contents.
    pub fn suspend(&self) -> Vec<u8> {
        let cpu = &self.cpu;
        let mut out = Vec::with_capacity(SNAPSHOT_HEADER + cpu.ram.len());
        for reg in &cpu.reg {
            out.extend_from_slice(&reg.to_le_bytes());
        }
        out.push(cpu.n_flag as u8);
        out.push(cpu.z_flag as u8);
        out.push(cpu.c_flag as u8);
        out.push(cpu.v_flag as u8);
        out.push(cpu.crashed as u8);
        out.extend_from_slice(&[0u8; 3]);
        out.extend_from_slice(&cpu.next_pc.to_le_bytes());
        out.extend_from_slice(&cpu.prefetch[0].to_le_bytes());
        out.extend_from_slice(&cpu.prefetch[1].to_le_bytes());
        out.extend_from_slice(&cpu.ram_size.to_le_bytes());
        out.extend_from_slice(&cpu.extended_ram_size.to_le_bytes());
        out.extend_from_slice(&cpu.max_ram_addr.to_le_bytes());
        out.extend_from_slice(&cpu.ram);
        out
    }

    /// Restore a snapshot. Trampoline addresses are process-local, so the
    /// import table is rebuilt from the preserved key pointers and linked
    /// against this process's API registrations.
    pub fn thaw(&mut self, data: &[u8]) -> Result<(), ImageError> {
        if data.len() < SNAPSHOT_HEADER {
            return Err(ImageError::BadSnapshot);
        }
        let mut cpu = CpuState::new();
        for (i, chunk) in data[..NUM_REGS * 4].chunks_exact(4).enumerate() {
            cpu.reg[i] = u32::from_le_bytes(chunk.try_into().unwrap());
        }
        let mut offset = NUM_REGS * 4;
        cpu.n_flag = data[offset] != 0;
        cpu.z_flag = data[offset + 1] != 0;
        cpu.c_flag = data[offset + 2] != 0;
        cpu.v_flag = data[offset + 3] != 0;
        cpu.crashed = data[offset + 4] != 0;
        offset += 8;
        let mut next_word = || {
            let w = image::word(data, offset);
            offset += 4;
            w
        };
        cpu.next_pc = next_word();
        cpu.prefetch[0] = next_word();
        cpu.prefetch[1] = next_word();
        cpu.ram_size = next_word();
        cpu.extended_ram_size = next_word();
        cpu.max_ram_addr = next_word();

        cpu.ram = data[SNAPSHOT_HEADER..].to_vec();
        if cpu.ram.len() != cpu.max_ram_addr as usize + 1
            || cpu.extended_ram_size < cpu.ram_size
            || cpu.ram.len() < cpu.extended_ram_size as usize
        {
            return Err(ImageError::BadSnapshot);
        }
        self.cpu = cpu;

        // put the preserved key pointers back into the import table, then
        // resolve them against the current process
        let ram_size = self.cpu.ram_size;
        let mut slot = image::IMPORT_TABLE;
        while slot + 4 < ram_size as usize {
            let value = image::word(&self.cpu.ram, slot);
            if value == 0 {
                break;
            }
            if value >= ram_size {
                let backup = image::word(&self.cpu.ram, value as usize);
                image::put_word(&mut self.cpu.ram, slot, backup);
            }
            slot += 4;
        }
        self.link();
        Ok(())
    }
}

const SNAPSHOT_HEADER: usize = NUM_REGS * 4 + 8 + 6 * 4;
