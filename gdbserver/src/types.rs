/// GDB Remote Serial Protocol types
///
/// This module defines the wire-level data structures exchanged with the debugger client
/// and the small enums shared with the emulation core.

/// Thread selector meaning "every thread" (`-1` on the wire).
pub const ALL_THREADS: u64 = u64::MAX;

/// Thread selector meaning "any thread" (`0` on the wire).
pub const ANY_THREAD: u64 = 0;

/// Out-of-band break request sent by the client while the target runs.
pub const INTERRUPT: u8 = 0x03;

/// Maximum packet size advertised through `qSupported`.
pub const PACKET_SIZE: usize = 1200;

/// The only stop reason reported to the client (SIGTRAP).
pub const STOP_REPLY: &str = "S05";

/// A single decoded RSP packet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    /// Command keyword, one character unless it starts with `q` or `v`
    pub cmd: String,
    /// Everything after the keyword, including the separator that ended it
    pub data: String,
    /// Checksum declared by the client (already verified)
    pub checksum: u8,
}

impl Command {
    pub fn new(cmd: impl Into<String>, data: impl Into<String>, checksum: u8) -> Self {
        Self {
            cmd: cmd.into(),
            data: data.into(),
            checksum,
        }
    }

    /// The out-of-band interrupt, which bypasses framing entirely
    pub fn interrupt() -> Self {
        Self::new(char::from(INTERRUPT).to_string(), "", 0)
    }

    pub fn is_interrupt(&self) -> bool {
        self.cmd.as_bytes() == [INTERRUPT]
    }
}

/// Coarse lifecycle state of the emulator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmulatorState {
    /// Nothing is executing and nothing will until a new boot
    Stopped,
    /// A program is loaded but has never been started
    Ready,
    Running,
    Paused,
}

/// Kind tag of an emulated CPU thread
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadKind {
    /// Main PowerPC processor thread, the only kind with register support
    Ppu,
    /// Synergistic processor thread
    Spu,
}

/// Kind of access checked against the guest address space
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Access {
    Read,
    Write,
}

/// What the session must do after a command handler ran
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Send this payload and wait for the client's acknowledgment
    Reply(String),
    /// The target was resumed; wait for a stop before replying
    WaitForStop,
    /// Send nothing and end the session
    Terminate,
}

impl Outcome {
    pub fn reply(payload: impl Into<String>) -> Self {
        Outcome::Reply(payload.into())
    }

    /// Empty reply, the RSP convention for "not supported"
    pub fn unsupported() -> Self {
        Outcome::Reply(String::new())
    }

    pub fn ok() -> Self {
        Outcome::reply("OK")
    }

    pub fn error(code: u8) -> Self {
        Outcome::Reply(format!("E{:02X}", code))
    }
}
