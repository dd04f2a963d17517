/// One debugger client's session
///
/// [`SessionState`] holds the per-client thread selection and is driven by the
/// command handlers. [`Session`] wraps it with the connection and runs the
/// receive, dispatch and reply loop, including the wait for a stop while the
/// target executes.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::time::MissedTickBehavior;

use crate::communication::Connection;
use crate::events::StopNotifier;
use crate::parser::PacketError;
use crate::target::{CpuThread, Target};
use crate::types::{Outcome, ThreadKind, ALL_THREADS, ANY_THREAD, INTERRUPT, STOP_REPLY};

#[derive(Error, Debug)]
pub enum SessionError {
    #[error(transparent)]
    Packet(#[from] PacketError),
    #[error("Socket error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Client disconnected")]
    Disconnected,
}

impl SessionError {
    /// The client went away, as opposed to breaking the protocol
    pub fn is_disconnect(&self) -> bool {
        use std::io::ErrorKind;
        let io = match self {
            SessionError::Disconnected => return true,
            SessionError::Io(e) => e,
            SessionError::Packet(PacketError::Io(e)) => e,
            SessionError::Packet(_) => return false,
        };
        matches!(
            io.kind(),
            ErrorKind::UnexpectedEof | ErrorKind::ConnectionReset | ErrorKind::BrokenPipe
        )
    }
}

pub type Result<T> = std::result::Result<T, SessionError>;

/// Thread selection and stop bookkeeping for one client
pub struct SessionState {
    target: Arc<dyn Target>,
    stop: StopNotifier,
    selected_thread: Option<u64>,
    general_ops_thread_id: u64,
    continue_ops_thread_id: u64,
    from_breakpoint: bool,
}

impl SessionState {
    pub fn new(target: Arc<dyn Target>, stop: StopNotifier) -> Self {
        Self {
            target,
            stop,
            selected_thread: None,
            general_ops_thread_id: ANY_THREAD,
            continue_ops_thread_id: ANY_THREAD,
            from_breakpoint: false,
        }
    }

    pub fn target(&self) -> &dyn Target {
        self.target.as_ref()
    }

    pub fn stop_notifier(&self) -> &StopNotifier {
        &self.stop
    }

    pub fn general_ops_thread_id(&self) -> u64 {
        self.general_ops_thread_id
    }

    pub fn set_general_ops_thread_id(&mut self, id: u64) {
        self.general_ops_thread_id = id;
    }

    pub fn continue_ops_thread_id(&self) -> u64 {
        self.continue_ops_thread_id
    }

    pub fn set_continue_ops_thread_id(&mut self, id: u64) {
        self.continue_ops_thread_id = id;
    }

    /// Whether the last stop came from a halting thread rather than an interrupt
    pub fn from_breakpoint(&self) -> bool {
        self.from_breakpoint
    }

    pub fn set_from_breakpoint(&mut self, value: bool) {
        self.from_breakpoint = value;
    }

    pub fn paused(&self) -> bool {
        self.stop.is_paused()
    }

    /// Resolve `id` to a live thread and make it the selected one.
    /// The sentinels pick the first PPU thread. On failure nothing stays selected.
    pub fn select_thread(&mut self, id: u64) -> Option<Arc<dyn CpuThread>> {
        let found = if id == ALL_THREADS || id == ANY_THREAD {
            self.target.find_thread(&|thread: &dyn CpuThread| thread.kind() == ThreadKind::Ppu)
        } else {
            self.target.find_thread(&|thread: &dyn CpuThread| thread.id() == id)
        };

        self.selected_thread = found.as_ref().map(|thread| thread.id());
        if found.is_none() {
            log::warn!("Unable to select thread {:x}! Is the emulator running?", id);
        }
        found
    }

    /// The selected thread, if it is still alive
    pub fn selected_thread(&self) -> Option<Arc<dyn CpuThread>> {
        let id = self.selected_thread?;
        self.target.find_thread(&|thread: &dyn CpuThread| thread.id() == id)
    }

    /// Settle into all-stop after the target halted and build the stop reply
    pub fn finish_stop(&mut self) -> String {
        self.target.pause();

        let paused_by = self.stop.paused_by();
        self.from_breakpoint = paused_by.is_some();
        if let Some(id) = paused_by {
            // the global pause holds it now; leaving its own flag set would
            // keep it halted after the next resume
            if let Some(thread) = self.select_thread(id) {
                thread.clear_pause();
            }
        }
        STOP_REPLY.to_string()
    }
}

/// A connected client
pub struct Session<S> {
    conn: Connection<S>,
    state: SessionState,
    poll_interval: Duration,
}

impl<S: AsyncRead + AsyncWrite + Unpin> Session<S> {
    pub fn new(stream: S, target: Arc<dyn Target>, stop: StopNotifier, poll_interval: Duration) -> Self {
        Self {
            conn: Connection::new(stream),
            state: SessionState::new(target, stop),
            poll_interval,
        }
    }

    /// Serve commands until the client kills the session or goes away
    pub async fn run(&mut self) -> Result<()> {
        if self.state.target().is_running() {
            log::info!("Pausing emulation for the attached debugger");
            self.state.target().pause();
        }

        loop {
            let cmd = self.conn.recv_command().await?;
            log::debug!("RECV: {:?} {:?}", cmd.cmd, cmd.data);

            match self.state.dispatch(&cmd) {
                Outcome::Reply(payload) => self.conn.send_packet(&payload).await?,
                Outcome::WaitForStop => {
                    self.wait_for_stop().await?;
                    let reply = self.state.finish_stop();
                    self.conn.send_packet(&reply).await?;
                }
                Outcome::Terminate => {
                    log::info!("Debug session terminated by the client");
                    return Ok(());
                }
            }
        }
    }

    /// Block until a thread halts, the client interrupts or emulation stops
    async fn wait_for_stop(&mut self) -> Result<()> {
        let stop = self.state.stop_notifier().clone();
        let target = self.state.target.clone();
        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        while !stop.is_paused() {
            tokio::select! {
                _ = stop.notified() => {}
                byte = self.conn.read_byte() => match byte? {
                    Some(INTERRUPT) => {
                        log::debug!("Interrupt requested by the client");
                        if target.is_running() {
                            target.pause();
                        }
                        stop.interrupt();
                    }
                    Some(other) => log::debug!("Ignoring byte {:#04x} received while running", other),
                    None => return Err(SessionError::Disconnected),
                },
                _ = ticker.tick() => {
                    if target.is_stopped() {
                        log::warn!("Emulation stopped while the debugger was waiting");
                        stop.interrupt();
                    }
                }
            }
        }
        Ok(())
    }
}
