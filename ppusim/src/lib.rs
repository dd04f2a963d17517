/// Reference PPU emulation core
///
/// A minimal multi-threaded core that implements every interface the debug
/// server consumes: a lifecycle state machine, PPU threads with register files
/// and pause/step flags, region-based guest memory and a global breakpoint table.

use std::collections::HashSet;
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::JoinHandle;
use std::time::Duration;

use gdbserver::{
    Access, AddressSpace, BreakpointTable, CpuThread, EmulatorState, Lifecycle, PpuRegisters, StopNotifier,
    ThreadRegistry,
};
use thiserror::Error;

pub mod memory;
pub mod thread;

pub use memory::GuestMemory;
pub use thread::PpuThread;

/// First PPU thread id, ids count up from here
pub const PPU_THREAD_BASE_ID: u64 = 0x0100_0000;

pub const STACK_BASE: u32 = 0xd000_0000;

/// `ori r0,r0,0`
pub const NOP: u32 = 0x6000_0000;

#[derive(Error, Debug)]
pub enum SimError {
    #[error("Region at {0:#x} has zero size")]
    EmptyRegion(u32),
    #[error("Region {base:#x}+{size:#x} runs past the end of the address space")]
    RegionOverflow { base: u32, size: u32 },
    #[error("Region {base:#x}+{size:#x} overlaps an existing mapping")]
    RegionOverlap { base: u32, size: u32 },
    #[error("Address {0:#x} is not mapped")]
    Unmapped(u32),
    #[error("At least one PPU thread is required")]
    NoThreads,
    #[error("Failed to spawn executor thread: {0}")]
    Spawn(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, SimError>;

/// An extra mapping on top of main memory and the stack
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegionConfig {
    pub base: u32,
    pub size: u32,
    pub writable: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimConfig {
    pub threads: usize,
    /// Initial program counter, also the base of main memory
    pub entry: u32,
    pub memory_size: u32,
    pub stack_size: u32,
    /// Pause after each instruction, zero runs flat out
    pub cycle_delay: Duration,
    pub regions: Vec<RegionConfig>,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            threads: 1,
            entry: 0x10000,
            memory_size: 0x10000,
            stack_size: 0x10000,
            cycle_delay: Duration::ZERO,
            regions: Vec::new(),
        }
    }
}

/// State shared by the emulator and its executor threads
pub(crate) struct Core {
    state: Mutex<EmulatorState>,
    wake: Condvar,
    memory: GuestMemory,
    breakpoints: Mutex<HashSet<u32>>,
    stop: StopNotifier,
    cycle_delay: Duration,
}

impl Core {
    fn lock_state(&self) -> MutexGuard<'_, EmulatorState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Wake every executor so it re-checks whether it may run
    fn wake_all(&self) {
        let _state = self.lock_state();
        self.wake.notify_all();
    }

    fn has_breakpoint(&self, addr: u32) -> bool {
        self.breakpoints
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(&addr)
    }

    /// Move from `from` to `to`; `None` accepts any current state
    fn transition(&self, from: Option<EmulatorState>, to: EmulatorState) -> bool {
        let mut state = self.lock_state();
        if from.map_or(false, |from| *state != from) {
            return false;
        }
        log::debug!("Emulator {:?} -> {:?}", *state, to);
        *state = to;
        self.wake.notify_all();
        true
    }
}

pub struct Emulator {
    core: Arc<Core>,
    threads: Vec<Arc<PpuThread>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl Emulator {
    /// Map memory, create the threads and park them until `run`
    pub fn new(config: &SimConfig, stop: StopNotifier) -> Result<Self> {
        if config.threads == 0 {
            return Err(SimError::NoThreads);
        }

        let mut memory = GuestMemory::new();
        memory.map(config.entry, config.memory_size, true)?;
        memory.map(STACK_BASE, config.stack_size, true)?;
        for region in &config.regions {
            memory.map(region.base, region.size, region.writable)?;
        }

        let nops: Vec<u8> = std::iter::repeat(NOP.to_be_bytes())
            .take((config.memory_size / 4) as usize)
            .flatten()
            .collect();
        memory.load(config.entry, &nops)?;

        let core = Arc::new(Core {
            state: Mutex::new(EmulatorState::Ready),
            wake: Condvar::new(),
            memory,
            breakpoints: Mutex::new(HashSet::new()),
            stop,
            cycle_delay: config.cycle_delay,
        });

        let stack_slice = config.stack_size / config.threads as u32;
        let threads: Vec<Arc<PpuThread>> = (0..config.threads)
            .map(|i| {
                let mut regs = PpuRegisters {
                    cia: config.entry,
                    ..PpuRegisters::default()
                };
                let stack_top = STACK_BASE as u64 + stack_slice as u64 * (i as u64 + 1);
                regs.gpr[1] = stack_top.saturating_sub(0x10);
                Arc::new(PpuThread::new(PPU_THREAD_BASE_ID + i as u64, core.clone(), regs))
            })
            .collect();

        let emulator = Self {
            core,
            threads,
            workers: Mutex::new(Vec::new()),
        };
        // on error the partially built emulator drops and stops what it spawned
        emulator.spawn_workers()?;
        log::info!(
            "PPU core ready: {} thread(s), entry {:#x}, {:#x} bytes of memory",
            config.threads,
            config.entry,
            config.memory_size
        );
        Ok(emulator)
    }

    fn spawn_workers(&self) -> Result<()> {
        let mut workers = self.workers.lock().unwrap_or_else(|e| e.into_inner());
        for ppu in &self.threads {
            let ppu = ppu.clone();
            let handle = std::thread::Builder::new()
                .name(format!("ppu-{:x}", ppu.id()))
                .spawn(move || thread::run_thread(ppu))?;
            workers.push(handle);
        }
        Ok(())
    }

    pub fn thread(&self, id: u64) -> Option<Arc<PpuThread>> {
        self.threads.iter().find(|t| t.id() == id).cloned()
    }

    pub fn memory(&self) -> &GuestMemory {
        &self.core.memory
    }

    /// Stop emulation and wait for every executor to exit
    pub fn shutdown(&self) {
        self.core.transition(None, EmulatorState::Stopped);
        let workers: Vec<_> = self
            .workers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .drain(..)
            .collect();
        for worker in workers {
            if worker.join().is_err() {
                log::error!("PPU executor thread panicked");
            }
        }
    }
}

impl Drop for Emulator {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl Lifecycle for Emulator {
    fn state(&self) -> EmulatorState {
        *self.core.lock_state()
    }

    fn run(&self) {
        if self.core.transition(Some(EmulatorState::Ready), EmulatorState::Running) {
            log::info!("Emulation started");
        }
    }

    fn pause(&self) {
        self.core.transition(Some(EmulatorState::Running), EmulatorState::Paused);
    }

    fn resume(&self) {
        self.core.transition(Some(EmulatorState::Paused), EmulatorState::Running);
    }

    fn stop(&self) {
        if self.core.transition(None, EmulatorState::Stopped) {
            log::info!("Emulation stopped");
        }
    }
}

impl ThreadRegistry for Emulator {
    fn threads(&self) -> Vec<Arc<dyn CpuThread>> {
        self.threads
            .iter()
            .map(|t| t.clone() as Arc<dyn CpuThread>)
            .collect()
    }
}

impl AddressSpace for Emulator {
    fn is_addr_valid(&self, addr: u32, access: Access) -> bool {
        self.core.memory.is_valid(addr, access)
    }

    fn read_byte(&self, addr: u32) -> u8 {
        self.core.memory.read_u8(addr).unwrap_or(0)
    }

    fn write_byte(&self, addr: u32, value: u8) {
        if !self.core.memory.write_u8(addr, value) {
            log::warn!("Dropped write to {:#x}", addr);
        }
    }
}

impl BreakpointTable for Emulator {
    fn add_breakpoint(&self, addr: u32) {
        self.core
            .breakpoints
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(addr);
    }

    fn remove_breakpoint(&self, addr: u32) {
        self.core
            .breakpoints
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&addr);
    }
}
