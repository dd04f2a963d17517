/// PPU threads and their executor loop
///
/// Every thread runs on its own OS thread. It executes only while the emulator is
/// `Running` and its own debugger pause flag is clear. Each instruction advances
/// the program counter by 4; no instruction has any other effect.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use gdbserver::{CpuThread, EmulatorState, PpuRegisters, ThreadKind};

use crate::Core;

pub struct PpuThread {
    id: u64,
    core: Arc<Core>,
    regs: Mutex<PpuRegisters>,
    dbg_pause: AtomicBool,
    dbg_step: AtomicBool,
}

impl PpuThread {
    pub(crate) fn new(id: u64, core: Arc<Core>, regs: PpuRegisters) -> Self {
        Self {
            id,
            core,
            regs: Mutex::new(regs),
            dbg_pause: AtomicBool::new(false),
            dbg_step: AtomicBool::new(false),
        }
    }

    pub fn is_halted(&self) -> bool {
        self.dbg_pause.load(Ordering::SeqCst)
    }

    /// Stop this thread and report it to the debugger. A pending step is dropped.
    fn halt(&self) {
        self.dbg_step.store(false, Ordering::SeqCst);
        self.dbg_pause.store(true, Ordering::SeqCst);
        self.core.stop.pause_from(self.id);
    }

    /// Block until this thread may execute. `None` once emulation stopped.
    ///
    /// The returned guard keeps the emulator state locked, so a `pause` cannot
    /// complete while an instruction is in flight.
    fn wait_runnable(&self) -> Option<MutexGuard<'_, EmulatorState>> {
        let mut state = self.core.lock_state();
        loop {
            match *state {
                EmulatorState::Stopped => return None,
                EmulatorState::Running if !self.is_halted() => return Some(state),
                _ => state = self.core.wake.wait(state).unwrap_or_else(|e| e.into_inner()),
            }
        }
    }

    /// Execute the instruction at `cia`, or halt in front of it. Returns `true` on halt.
    fn execute(&self, resumed_at: &mut Option<u32>) -> bool {
        let mut regs = self.regs.lock().unwrap_or_else(|e| e.into_inner());
        let cia = regs.cia;

        if resumed_at.take() != Some(cia) && self.core.has_breakpoint(cia) {
            log::debug!("Thread {:x} hit breakpoint at {:#x}", self.id, cia);
            *resumed_at = Some(cia);
            self.halt();
            return true;
        }

        if self.core.memory.read_u32(cia).is_none() {
            log::warn!("Thread {:x} fetched from unmapped address {:#x}", self.id, cia);
            self.halt();
            return true;
        }

        regs.cia = cia.wrapping_add(4);

        if self.dbg_step.swap(false, Ordering::SeqCst) {
            log::debug!("Thread {:x} finished step at {:#x}", self.id, regs.cia);
            self.halt();
            return true;
        }
        false
    }
}

impl CpuThread for PpuThread {
    fn id(&self) -> u64 {
        self.id
    }

    fn kind(&self) -> ThreadKind {
        ThreadKind::Ppu
    }

    fn registers(&self) -> PpuRegisters {
        *self.regs.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn set_registers(&self, regs: &PpuRegisters) {
        *self.regs.lock().unwrap_or_else(|e| e.into_inner()) = *regs;
    }

    fn request_step(&self) {
        self.dbg_step.store(true, Ordering::SeqCst);
    }

    fn clear_pause(&self) {
        self.dbg_pause.store(false, Ordering::SeqCst);
        self.core.wake_all();
    }

    fn notify(&self) {
        self.core.wake_all();
    }
}

/// Executor body for one thread
pub(crate) fn run_thread(thread: Arc<PpuThread>) {
    let core = thread.core.clone();
    log::debug!("Thread {:x} started", thread.id);

    // address of the breakpoint this thread last stopped at, passed over once on resume
    let mut resumed_at: Option<u32> = None;

    while let Some(state) = thread.wait_runnable() {
        let halted = thread.execute(&mut resumed_at);
        drop(state);

        if halted {
            continue;
        }
        if core.cycle_delay.is_zero() {
            // let pause() and the other executors at the state lock
            std::thread::yield_now();
        } else {
            std::thread::sleep(core.cycle_delay);
        }
    }

    log::debug!("Thread {:x} exited", thread.id);
}
