/// Server configuration
///
/// Where to listen and how often to poll the emulator while the target runs.
/// Loaded from JSON, every field optional.

use std::path::{Path, PathBuf};
use std::time::Duration;

use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const DEFAULT_LISTEN: &str = "127.0.0.1:2345";
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 50;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file {path:?}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("Invalid port in listen address {0:?}")]
    InvalidPort(String),
    #[error("Can't interpret listen address {0:?}")]
    InvalidEndpoint(String),
    #[error("Regex error: {0}")]
    Regex(#[from] regex::Error),
}

pub type Result<T> = std::result::Result<T, ConfigError>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// `host:port`, `:port` or a Unix socket path; empty disables the server
    pub listen: String,
    /// How often a waiting session checks whether emulation stopped on its own
    pub poll_interval_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: DEFAULT_LISTEN.to_string(),
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
        }
    }
}

impl ServerConfig {
    pub fn from_json(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&text)
    }

    pub fn endpoint(&self) -> Result<Option<Endpoint>> {
        Endpoint::parse(&self.listen)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }
}

/// A resolved listen address
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    Tcp(String),
    Unix(PathBuf),
}

impl Endpoint {
    /// Interpret a listen setting. `None` means the server is disabled.
    pub fn parse(listen: &str) -> Result<Option<Self>> {
        let listen = listen.trim();
        if listen.is_empty() {
            return Ok(None);
        }

        let re = Regex::new(r"^(?P<host>[A-Za-z0-9_.\-]*):(?P<port>[0-9]+)$")?;
        if let Some(caps) = re.captures(listen) {
            let port: u16 = caps["port"]
                .parse()
                .map_err(|_| ConfigError::InvalidPort(listen.to_string()))?;
            let host = match &caps["host"] {
                "" => "127.0.0.1",
                host => host,
            };
            return Ok(Some(Endpoint::Tcp(format!("{}:{}", host, port))));
        }

        // anything that looks like host:port but isn't one is a typo, not a socket path
        if listen.contains(':') && !listen.contains('/') {
            return Err(ConfigError::InvalidEndpoint(listen.to_string()));
        }
        Ok(Some(Endpoint::Unix(PathBuf::from(listen))))
    }
}

impl std::fmt::Display for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Endpoint::Tcp(addr) => write!(f, "{}", addr),
            Endpoint::Unix(path) => write!(f, "{}", path.display()),
        }
    }
}
