/// Transport layer for the remote serial protocol
///
/// This module owns the listening socket (TCP or Unix domain) and the per-client
/// connection, including the `+`/`-` acknowledgment handshake around each packet.

use std::path::PathBuf;

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
#[cfg(unix)]
use std::os::unix::fs::FileTypeExt;
#[cfg(unix)]
use tokio::net::UnixListener;

use crate::config::Endpoint;
use crate::parser::{encode_packet, read_ack, read_packet, PacketError};
use crate::types::Command;

#[derive(Error, Debug)]
pub enum CommunicationError {
    #[error("Failed to bind {endpoint}: {source}")]
    Bind {
        endpoint: String,
        source: std::io::Error,
    },
    #[error("Unix domain sockets are not supported on this platform: {0:?}")]
    UnsupportedEndpoint(PathBuf),
}

pub type Result<T> = std::result::Result<T, CommunicationError>;

/// A client byte stream, whatever the socket family
pub trait Stream: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> Stream for T {}

enum ListenerKind {
    Tcp(TcpListener),
    #[cfg(unix)]
    Unix { listener: UnixListener, path: PathBuf },
}

/// Listening socket for debugger clients
pub struct Listener {
    kind: ListenerKind,
}

impl Listener {
    pub async fn bind(endpoint: &Endpoint) -> Result<Self> {
        let bind_error = |source| CommunicationError::Bind {
            endpoint: endpoint.to_string(),
            source,
        };

        let kind = match endpoint {
            Endpoint::Tcp(addr) => ListenerKind::Tcp(TcpListener::bind(addr).await.map_err(bind_error)?),
            #[cfg(unix)]
            Endpoint::Unix(path) => {
                // a previous run may have left its socket file behind; other files are left alone
                let stale = std::fs::symlink_metadata(path).map_or(false, |meta| meta.file_type().is_socket());
                if stale {
                    log::debug!("Removing stale socket file {}", path.display());
                    let _ = std::fs::remove_file(path);
                }
                ListenerKind::Unix {
                    listener: UnixListener::bind(path).map_err(bind_error)?,
                    path: path.clone(),
                }
            }
            #[cfg(not(unix))]
            Endpoint::Unix(path) => return Err(CommunicationError::UnsupportedEndpoint(path.clone())),
        };
        Ok(Self { kind })
    }

    /// Wait for the next client; returns the stream and a printable peer name
    pub async fn accept(&self) -> std::io::Result<(Box<dyn Stream>, String)> {
        match &self.kind {
            ListenerKind::Tcp(listener) => {
                let (stream, peer) = listener.accept().await?;
                // every packet waits for an ack, don't let Nagle hold them back
                stream.set_nodelay(true)?;
                Ok((Box::new(stream), peer.to_string()))
            }
            #[cfg(unix)]
            ListenerKind::Unix { listener, path } => {
                let (stream, _) = listener.accept().await?;
                Ok((Box::new(stream), path.display().to_string()))
            }
        }
    }

    /// The address actually bound, with the real port when 0 was requested
    pub fn local_endpoint(&self) -> String {
        match &self.kind {
            ListenerKind::Tcp(listener) => listener
                .local_addr()
                .map(|addr| addr.to_string())
                .unwrap_or_else(|_| "<unknown>".to_string()),
            #[cfg(unix)]
            ListenerKind::Unix { path, .. } => path.display().to_string(),
        }
    }
}

impl Drop for Listener {
    fn drop(&mut self) {
        match &self.kind {
            #[cfg(unix)]
            ListenerKind::Unix { path, .. } => {
                let _ = std::fs::remove_file(path);
            }
            _ => {}
        }
    }
}

/// One connected client
pub struct Connection<S> {
    stream: BufReader<S>,
}

impl<S: AsyncRead + AsyncWrite + Unpin> Connection<S> {
    pub fn new(stream: S) -> Self {
        Self {
            stream: BufReader::new(stream),
        }
    }

    /// Read the next command, NACKing corrupted packets until a good one arrives.
    /// Interrupt bytes are not acknowledged.
    pub async fn recv_command(&mut self) -> std::result::Result<Command, PacketError> {
        loop {
            match read_packet(&mut self.stream).await {
                Ok(cmd) => {
                    if !cmd.is_interrupt() {
                        self.send_raw(b"+").await?;
                    }
                    return Ok(cmd);
                }
                Err(e) if e.is_checksum() => {
                    log::warn!("{}", e);
                    self.send_raw(b"-").await?;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Send a reply packet, resending for as long as the client NACKs it
    pub async fn send_packet(&mut self, payload: &str) -> std::result::Result<(), PacketError> {
        let packet = encode_packet(payload);
        loop {
            log::trace!("SEND: {}", String::from_utf8_lossy(&packet));
            self.send_raw(&packet).await?;
            if read_ack(&mut self.stream).await? {
                return Ok(());
            }
            log::warn!("Client rejected our packet, resending");
        }
    }

    /// Read a single byte; `None` on EOF. Safe to cancel inside `select!`.
    pub async fn read_byte(&mut self) -> std::io::Result<Option<u8>> {
        let mut byte = [0u8; 1];
        match self.stream.read(&mut byte).await? {
            0 => Ok(None),
            _ => Ok(Some(byte[0])),
        }
    }

    async fn send_raw(&mut self, bytes: &[u8]) -> std::io::Result<()> {
        self.stream.write_all(bytes).await?;
        self.stream.flush().await
    }
}
