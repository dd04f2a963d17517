/// GDB remote debugging server for the PPU
///
/// This crate speaks the GDB Remote Serial Protocol over a TCP or Unix domain
/// socket and translates client requests into operations on an emulation core
/// described by the traits in [`target`].

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;

pub mod commands;
pub mod communication;
pub mod config;
pub mod events;
pub mod memory;
pub mod parser;
pub mod registers;
pub mod session;
pub mod target;
pub mod types;

#[cfg(test)]
mod testing;

pub use communication::{CommunicationError, Listener};
pub use config::{ConfigError, Endpoint, ServerConfig};
pub use events::StopNotifier;
pub use parser::PacketError;
pub use registers::PpuRegisters;
pub use session::{Session, SessionError, SessionState};
pub use target::*;
pub use types::*;

#[derive(Error, Debug)]
pub enum GdbError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("Communication error: {0}")]
    Communication(#[from] CommunicationError),
    #[error("Server task failed: {0}")]
    Task(String),
}

pub type Result<T> = std::result::Result<T, GdbError>;

/// Accepts debugger clients and serves them one at a time
pub struct GdbServer {
    listener: Listener,
    target: Arc<dyn Target>,
    stop: StopNotifier,
    poll_interval: Duration,
}

impl GdbServer {
    /// Bind the configured endpoint. `Ok(None)` when the server is disabled.
    pub async fn bind(config: &ServerConfig, target: Arc<dyn Target>, stop: StopNotifier) -> Result<Option<Self>> {
        let Some(endpoint) = config.endpoint()? else {
            log::info!("GDB server disabled");
            return Ok(None);
        };

        let listener = Listener::bind(&endpoint).await?;
        log::info!("GDB server listening on {}", listener.local_endpoint());
        Ok(Some(Self {
            listener,
            target,
            stop,
            poll_interval: config.poll_interval(),
        }))
    }

    pub fn local_endpoint(&self) -> String {
        self.listener.local_endpoint()
    }

    /// Serve clients until `shutdown` flips to true or its sender goes away
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        loop {
            if *shutdown.borrow() {
                break;
            }

            let (stream, peer) = tokio::select! {
                accepted = self.listener.accept() => match accepted {
                    Ok(client) => client,
                    Err(e) => {
                        log::error!("Failed to accept debugger connection: {}", e);
                        tokio::time::sleep(self.poll_interval).await;
                        continue;
                    }
                },
                _ = shutdown.changed() => break,
            };

            log::info!("Debugger connected from {}", peer);
            let mut session = Session::new(stream, self.target.clone(), self.stop.clone(), self.poll_interval);
            let result = tokio::select! {
                result = session.run() => result,
                _ = shutdown.changed() => break,
            };

            match result {
                Ok(()) => log::info!("Debug session with {} finished", peer),
                Err(e) if e.is_disconnect() => log::info!("Debugger {} disconnected", peer),
                Err(e) => log::error!("Debug session with {} failed: {}", peer, e),
            }
        }

        log::info!("GDB server shutting down");
        Ok(())
    }

    /// Run the accept loop on the current tokio runtime
    pub fn spawn(self) -> ServerHandle {
        let (shutdown, receiver) = watch::channel(false);
        let endpoint = self.local_endpoint();
        let task = tokio::spawn(self.run(receiver));
        ServerHandle {
            shutdown,
            task,
            endpoint,
        }
    }
}

/// Owner of a spawned server task
pub struct ServerHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<Result<()>>,
    endpoint: String,
}

impl ServerHandle {
    pub fn local_endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Ask the server to stop and wait for it. A connected client is dropped.
    pub async fn stop(self) -> Result<()> {
        let _ = self.shutdown.send(true);
        self.task.await.map_err(|e| GdbError::Task(e.to_string()))?
    }
}
