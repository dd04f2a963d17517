/// In-memory target used by the unit tests

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crate::events::StopNotifier;
use crate::registers::PpuRegisters;
use crate::target::{AddressSpace, BreakpointTable, CpuThread, Lifecycle, ThreadRegistry};
use crate::types::{Access, EmulatorState, ThreadKind};

pub struct FakeThread {
    id: u64,
    kind: ThreadKind,
    regs: Mutex<PpuRegisters>,
    pub paused: AtomicBool,
    pub step: AtomicBool,
    pub notified: AtomicUsize,
}

impl FakeThread {
    pub fn new(id: u64, kind: ThreadKind) -> Arc<Self> {
        Arc::new(Self {
            id,
            kind,
            regs: Mutex::new(PpuRegisters::default()),
            paused: AtomicBool::new(true),
            step: AtomicBool::new(false),
            notified: AtomicUsize::new(0),
        })
    }
}

impl CpuThread for FakeThread {
    fn id(&self) -> u64 {
        self.id
    }

    fn kind(&self) -> ThreadKind {
        self.kind
    }

    fn registers(&self) -> PpuRegisters {
        *self.regs.lock().unwrap()
    }

    fn set_registers(&self, regs: &PpuRegisters) {
        *self.regs.lock().unwrap() = *regs;
    }

    fn request_step(&self) {
        self.step.store(true, Ordering::SeqCst);
    }

    fn clear_pause(&self) {
        self.paused.store(false, Ordering::SeqCst);
    }

    fn notify(&self) {
        self.notified.fetch_add(1, Ordering::SeqCst);
    }
}

pub struct FakeTarget {
    state: Mutex<EmulatorState>,
    threads: Mutex<Vec<Arc<FakeThread>>>,
    memory: Mutex<HashMap<u32, (u8, bool)>>,
    breakpoints: Mutex<HashSet<u32>>,
    /// When set, resuming immediately halts the first unpaused thread
    auto_stop: Mutex<Option<StopNotifier>>,
    calls: Mutex<Vec<&'static str>>,
}

impl FakeTarget {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(EmulatorState::Paused),
            threads: Mutex::new(Vec::new()),
            memory: Mutex::new(HashMap::new()),
            breakpoints: Mutex::new(HashSet::new()),
            auto_stop: Mutex::new(None),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn with_threads(ids: &[u64]) -> Self {
        let target = Self::new();
        for &id in ids {
            target.add_thread(FakeThread::new(id, ThreadKind::Ppu));
        }
        target
    }

    pub fn add_thread(&self, thread: Arc<FakeThread>) {
        self.threads.lock().unwrap().push(thread);
    }

    pub fn thread(&self, id: u64) -> Arc<FakeThread> {
        self.threads
            .lock()
            .unwrap()
            .iter()
            .find(|t| t.id == id)
            .cloned()
            .expect("no such thread")
    }

    pub fn set_state(&self, state: EmulatorState) {
        *self.state.lock().unwrap() = state;
    }

    pub fn map(&self, addr: u32, bytes: &[u8], writable: bool) {
        let mut memory = self.memory.lock().unwrap();
        for (i, &b) in bytes.iter().enumerate() {
            memory.insert(addr.wrapping_add(i as u32), (b, writable));
        }
    }

    pub fn byte(&self, addr: u32) -> Option<u8> {
        self.memory.lock().unwrap().get(&addr).map(|&(b, _)| b)
    }

    pub fn has_breakpoint(&self, addr: u32) -> bool {
        self.breakpoints.lock().unwrap().contains(&addr)
    }

    pub fn stop_on_resume(&self, stop: StopNotifier) {
        *self.auto_stop.lock().unwrap() = Some(stop);
    }

    pub fn calls(&self) -> Vec<&'static str> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: &'static str) {
        self.calls.lock().unwrap().push(call);
    }

    fn halt_running_thread(&self) {
        let Some(stop) = self.auto_stop.lock().unwrap().clone() else {
            return;
        };
        let threads = self.threads.lock().unwrap().clone();
        if let Some(thread) = threads.iter().find(|t| !t.paused.load(Ordering::SeqCst)) {
            let mut regs = thread.registers();
            regs.cia = regs.cia.wrapping_add(4);
            thread.set_registers(&regs);
            thread.step.store(false, Ordering::SeqCst);
            thread.paused.store(true, Ordering::SeqCst);
            stop.pause_from(thread.id);
        }
    }
}

impl Lifecycle for FakeTarget {
    fn state(&self) -> EmulatorState {
        *self.state.lock().unwrap()
    }

    fn run(&self) {
        self.record("run");
        self.set_state(EmulatorState::Running);
        self.halt_running_thread();
    }

    fn pause(&self) {
        self.record("pause");
        if self.state() == EmulatorState::Running {
            self.set_state(EmulatorState::Paused);
        }
    }

    fn resume(&self) {
        self.record("resume");
        self.set_state(EmulatorState::Running);
        self.halt_running_thread();
    }

    fn stop(&self) {
        self.record("stop");
        self.set_state(EmulatorState::Stopped);
    }
}

impl ThreadRegistry for FakeTarget {
    fn threads(&self) -> Vec<Arc<dyn CpuThread>> {
        self.threads
            .lock()
            .unwrap()
            .iter()
            .map(|t| t.clone() as Arc<dyn CpuThread>)
            .collect()
    }
}

impl AddressSpace for FakeTarget {
    fn is_addr_valid(&self, addr: u32, access: Access) -> bool {
        match self.memory.lock().unwrap().get(&addr) {
            Some(&(_, writable)) => access == Access::Read || writable,
            None => false,
        }
    }

    fn read_byte(&self, addr: u32) -> u8 {
        self.byte(addr).unwrap_or(0)
    }

    fn write_byte(&self, addr: u32, value: u8) {
        if let Some(slot) = self.memory.lock().unwrap().get_mut(&addr) {
            slot.0 = value;
        }
    }
}

impl BreakpointTable for FakeTarget {
    fn add_breakpoint(&self, addr: u32) {
        self.breakpoints.lock().unwrap().insert(addr);
    }

    fn remove_breakpoint(&self, addr: u32) {
        self.breakpoints.lock().unwrap().remove(&addr);
    }
}
