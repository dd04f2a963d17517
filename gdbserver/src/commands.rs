/// RSP command dispatch
///
/// A fixed, ordered table maps command keywords to handlers. Matching is exact and
/// the first entry wins; anything unmatched gets the empty "unsupported" reply.
/// Handlers never fail the session, protocol errors become `Exx` replies.

use std::sync::Arc;

use crate::memory::{self, BreakpointRequest, MemoryError};
use crate::parser::{parse_hex_u32, parse_hex_u64, u64_to_padded_hex};
use crate::registers::{self, RegisterError};
use crate::session::SessionState;
use crate::target::CpuThread;
use crate::types::{Command, Outcome, ThreadKind, ALL_THREADS, PACKET_SIZE, STOP_REPLY};

/// Handler selected by a command keyword
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandKind {
    Interrupt,
    ExtendedMode,
    Reason,
    Supported,
    ThreadInfo,
    CurrentThread,
    ReadRegister,
    WriteRegister,
    ReadMemory,
    WriteMemory,
    ReadAllRegisters,
    WriteAllRegisters,
    SetThread,
    Attached,
    Kill,
    VContSupported,
    VCont,
    RemoveBreakpoint,
    SetBreakpoint,
}

pub const COMMANDS: &[(&str, CommandKind)] = &[
    ("\u{3}", CommandKind::Interrupt),
    ("!", CommandKind::ExtendedMode),
    ("?", CommandKind::Reason),
    ("qSupported", CommandKind::Supported),
    ("qfThreadInfo", CommandKind::ThreadInfo),
    ("qC", CommandKind::CurrentThread),
    ("p", CommandKind::ReadRegister),
    ("P", CommandKind::WriteRegister),
    ("m", CommandKind::ReadMemory),
    ("M", CommandKind::WriteMemory),
    ("g", CommandKind::ReadAllRegisters),
    ("G", CommandKind::WriteAllRegisters),
    ("H", CommandKind::SetThread),
    ("qAttached", CommandKind::Attached),
    ("k", CommandKind::Kill),
    ("vCont?", CommandKind::VContSupported),
    ("vCont", CommandKind::VCont),
    ("z", CommandKind::RemoveBreakpoint),
    ("Z", CommandKind::SetBreakpoint),
];

/// First table entry whose keyword equals `keyword`
pub fn lookup(keyword: &str) -> Option<CommandKind> {
    COMMANDS
        .iter()
        .find(|(name, _)| *name == keyword)
        .map(|&(_, kind)| kind)
}

impl SessionState {
    /// Run the handler for one command
    pub fn dispatch(&mut self, cmd: &Command) -> Outcome {
        let Some(kind) = lookup(&cmd.cmd) else {
            log::warn!("Unknown command received: {:?}, data: {:?}", cmd.cmd, cmd.data);
            return Outcome::unsupported();
        };

        log::trace!("Dispatching {:?} with data {:?}", kind, cmd.data);
        match kind {
            CommandKind::Interrupt => self.cmd_interrupt(),
            CommandKind::ExtendedMode => Outcome::ok(),
            CommandKind::Reason => Outcome::reply(STOP_REPLY),
            CommandKind::Supported => Outcome::reply(format!("PacketSize={}", PACKET_SIZE)),
            CommandKind::ThreadInfo => self.cmd_thread_info(),
            CommandKind::CurrentThread => self.cmd_current_thread(),
            CommandKind::ReadRegister => self.cmd_read_register(&cmd.data),
            CommandKind::WriteRegister => self.cmd_write_register(&cmd.data),
            CommandKind::ReadMemory => self.cmd_read_memory(&cmd.data),
            CommandKind::WriteMemory => self.cmd_write_memory(&cmd.data),
            CommandKind::ReadAllRegisters => self.cmd_read_all_registers(),
            CommandKind::WriteAllRegisters => self.cmd_write_all_registers(&cmd.data),
            CommandKind::SetThread => self.cmd_set_thread(&cmd.data),
            CommandKind::Attached => Outcome::reply("1"),
            CommandKind::Kill => self.cmd_kill(),
            CommandKind::VContSupported => Outcome::reply("vCont;c;s;C;S"),
            CommandKind::VCont => self.cmd_vcont(&cmd.data),
            CommandKind::RemoveBreakpoint => self.cmd_remove_breakpoint(&cmd.data),
            CommandKind::SetBreakpoint => self.cmd_set_breakpoint(&cmd.data),
        }
    }

    fn cmd_interrupt(&mut self) -> Outcome {
        let target = self.target();
        if target.is_running() {
            target.pause();
        }
        self.stop_notifier().interrupt();
        Outcome::reply(STOP_REPLY)
    }

    fn cmd_thread_info(&self) -> Outcome {
        let ids: Vec<String> = self
            .target()
            .threads()
            .iter()
            .filter(|thread| thread.kind() == ThreadKind::Ppu)
            .map(|thread| u64_to_padded_hex(thread.id()))
            .collect();

        if ids.is_empty() {
            return Outcome::reply("l");
        }
        Outcome::reply(format!("m{}l", ids.join(",")))
    }

    fn cmd_current_thread(&self) -> Outcome {
        match self.selected_thread() {
            Some(thread) => Outcome::reply(format!("QC{}", u64_to_padded_hex(thread.id()))),
            None => Outcome::unsupported(),
        }
    }

    /// Resolve the thread for register commands
    fn general_ppu_thread(&mut self) -> Result<Arc<dyn CpuThread>, Outcome> {
        let Some(thread) = self.select_thread(self.general_ops_thread_id()) else {
            return Err(Outcome::error(2));
        };
        if thread.kind() != ThreadKind::Ppu {
            log::warn!("Unimplemented thread type {:?}.", thread.kind());
            return Err(Outcome::unsupported());
        }
        Ok(thread)
    }

    fn cmd_read_register(&mut self, data: &str) -> Outcome {
        let thread = match self.general_ppu_thread() {
            Ok(thread) => thread,
            Err(outcome) => return outcome,
        };

        let value = parse_hex_u32(data).and_then(|id| registers::get_register(&thread.registers(), id));
        match value {
            Some(value) => Outcome::Reply(value),
            None => {
                log::warn!("Wrong register id {:?}.", data);
                Outcome::error(1)
            }
        }
    }

    fn cmd_write_register(&mut self, data: &str) -> Outcome {
        let thread = match self.general_ppu_thread() {
            Ok(thread) => thread,
            Err(outcome) => return outcome,
        };

        let Some((id, value)) = data.split_once('=') else {
            log::warn!("Wrong write_register cmd data {:?}.", data);
            return Outcome::error(2);
        };
        let Some(id) = parse_hex_u32(id) else {
            log::warn!("Wrong write_register cmd data {:?}.", data);
            return Outcome::error(2);
        };

        let mut regs = thread.registers();
        match registers::set_register(&mut regs, id, value) {
            Ok(()) => {
                thread.set_registers(&regs);
                Outcome::ok()
            }
            Err(e @ RegisterError::UnknownRegister(_)) => {
                log::warn!("{}.", e);
                Outcome::error(1)
            }
            Err(e) => {
                log::warn!("{}.", e);
                Outcome::error(2)
            }
        }
    }

    fn cmd_read_memory(&mut self, data: &str) -> Outcome {
        let (addr, len) = match memory::parse_read_request(data) {
            Ok(request) => request,
            Err(e) => {
                log::warn!("{}.", e);
                return Outcome::error(1);
            }
        };

        // a hex-encoded reply must fit in one packet
        let len = len.min((PACKET_SIZE / 2) as u32);
        match memory::read_memory(self.target(), addr, len) {
            Ok(hex) => Outcome::Reply(hex),
            Err(e) => {
                log::debug!("{}", e);
                Outcome::error(1)
            }
        }
    }

    fn cmd_write_memory(&mut self, data: &str) -> Outcome {
        let (addr, bytes) = match memory::parse_write_request(data) {
            Ok(request) => request,
            Err(e) => {
                log::warn!("{}.", e);
                return Outcome::error(2);
            }
        };

        match memory::write_memory(self.target(), addr, &bytes) {
            Ok(()) => Outcome::ok(),
            Err(MemoryError::Unwritable(at)) => {
                log::warn!("Write to {:#x} failed, address is not writable.", at);
                Outcome::error(3)
            }
            Err(e) => {
                log::warn!("{}.", e);
                Outcome::error(2)
            }
        }
    }

    fn cmd_read_all_registers(&mut self) -> Outcome {
        match self.general_ppu_thread() {
            Ok(thread) => Outcome::Reply(registers::read_all_registers(&thread.registers())),
            Err(outcome) => outcome,
        }
    }

    fn cmd_write_all_registers(&mut self, data: &str) -> Outcome {
        let thread = match self.general_ppu_thread() {
            Ok(thread) => thread,
            Err(outcome) => return outcome,
        };

        let mut regs = thread.registers();
        match registers::write_all_registers(&mut regs, data) {
            Ok(()) => {
                thread.set_registers(&regs);
                Outcome::ok()
            }
            Err(e) => {
                log::warn!("{}.", e);
                Outcome::error(1)
            }
        }
    }

    fn cmd_set_thread(&mut self, data: &str) -> Outcome {
        let mut chars = data.chars();
        let Some(op) = chars.next() else {
            return Outcome::unsupported();
        };
        let selector = chars.as_str();

        let id = if selector == "-1" {
            Some(ALL_THREADS)
        } else {
            parse_hex_u64(selector)
        };
        let Some(id) = id else {
            log::warn!("Wrong set_thread cmd data {:?}.", data);
            return Outcome::error(1);
        };

        if self.select_thread(id).is_none() {
            log::warn!(
                "Client asked to use thread {:x} for {}, but no matching thread was found.",
                id,
                if op == 'c' { "continue ops" } else { "general ops" }
            );
            return Outcome::error(1);
        }

        if op == 'c' {
            self.set_continue_ops_thread_id(id);
        } else {
            self.set_general_ops_thread_id(id);
        }
        Outcome::ok()
    }

    fn cmd_kill(&mut self) -> Outcome {
        log::info!("Kill command issued, stopping emulation.");
        self.target().stop();
        Outcome::Terminate
    }

    fn cmd_vcont(&mut self, data: &str) -> Outcome {
        self.set_from_breakpoint(false);

        let step = match data.as_bytes().get(1) {
            Some(b'c') => false,
            Some(b's') => true,
            _ => return Outcome::unsupported(),
        };

        let Some(thread) = self.select_thread(self.continue_ops_thread_id()) else {
            return Outcome::error(1);
        };

        self.stop_notifier().clear();
        if step {
            thread.request_step();
        }
        thread.clear_pause();

        let target = self.target();
        if target.is_ready() {
            // only loaded, never started
            target.run();
        } else if target.is_paused() {
            target.resume();
        } else {
            thread.notify();
        }
        Outcome::WaitForStop
    }

    fn cmd_set_breakpoint(&mut self, data: &str) -> Outcome {
        match memory::parse_set_breakpoint(data) {
            BreakpointRequest::Software(addr) => {
                memory::set_breakpoint(self.target(), addr);
                Outcome::ok()
            }
            BreakpointRequest::Conditional => {
                log::warn!("Received request to set breakpoint with condition, but they are not supported.");
                Outcome::error(1)
            }
            BreakpointRequest::Malformed => {
                log::warn!("Can't parse breakpoint request, data: {:?}.", data);
                Outcome::error(2)
            }
            BreakpointRequest::Unsupported => Outcome::unsupported(),
        }
    }

    fn cmd_remove_breakpoint(&mut self, data: &str) -> Outcome {
        match memory::parse_remove_breakpoint(data) {
            BreakpointRequest::Software(addr) => {
                memory::remove_breakpoint(self.target(), addr);
                Outcome::ok()
            }
            BreakpointRequest::Malformed | BreakpointRequest::Conditional => {
                log::warn!("Can't parse breakpoint remove request, data: {:?}.", data);
                Outcome::error(1)
            }
            BreakpointRequest::Unsupported => Outcome::unsupported(),
        }
    }
}
