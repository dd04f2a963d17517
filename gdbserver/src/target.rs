/// Interfaces the server consumes from the emulation core
///
/// The core owns threads, pause flags, guest memory and the breakpoint table.
/// The debug server only goes through these thread-safe operations.

use std::sync::Arc;

use crate::registers::PpuRegisters;
use crate::types::{Access, EmulatorState, ThreadKind};

/// An emulated CPU thread
pub trait CpuThread: Send + Sync {
    fn id(&self) -> u64;

    fn kind(&self) -> ThreadKind;

    /// Copy of the register file, only meaningful for PPU threads
    fn registers(&self) -> PpuRegisters;

    fn set_registers(&self, regs: &PpuRegisters);

    /// Arm the single-step flag: halt again after one instruction
    fn request_step(&self);

    /// Drop this thread's debugger pause flag without touching other threads
    fn clear_pause(&self);

    /// Wake the thread if it is waiting for work
    fn notify(&self);
}

/// Emulator run state and global pause control
pub trait Lifecycle: Send + Sync {
    fn state(&self) -> EmulatorState;

    fn is_running(&self) -> bool {
        self.state() == EmulatorState::Running
    }

    fn is_paused(&self) -> bool {
        self.state() == EmulatorState::Paused
    }

    /// Loaded but never started
    fn is_ready(&self) -> bool {
        self.state() == EmulatorState::Ready
    }

    fn is_stopped(&self) -> bool {
        self.state() == EmulatorState::Stopped
    }

    fn run(&self);

    fn pause(&self);

    fn resume(&self);

    fn stop(&self);
}

/// Enumeration of live CPU threads
pub trait ThreadRegistry: Send + Sync {
    fn threads(&self) -> Vec<Arc<dyn CpuThread>>;

    fn find_thread(&self, predicate: &dyn Fn(&dyn CpuThread) -> bool) -> Option<Arc<dyn CpuThread>> {
        self.threads().into_iter().find(|thread| predicate(thread.as_ref()))
    }
}

/// Guest virtual memory
pub trait AddressSpace: Send + Sync {
    /// Whether `addr` is allocated and permits `access`
    fn is_addr_valid(&self, addr: u32, access: Access) -> bool;

    fn read_byte(&self, addr: u32) -> u8;

    fn write_byte(&self, addr: u32, value: u8);
}

/// Global, address-keyed software breakpoint table
pub trait BreakpointTable: Send + Sync {
    fn add_breakpoint(&self, addr: u32);

    fn remove_breakpoint(&self, addr: u32);
}

/// Everything the debug server needs from the emulator
pub trait Target: Lifecycle + ThreadRegistry + AddressSpace + BreakpointTable {}

impl<T> Target for T where T: Lifecycle + ThreadRegistry + AddressSpace + BreakpointTable + ?Sized {}
