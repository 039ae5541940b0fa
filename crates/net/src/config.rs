//! Relay configuration
//!
//! Every field has a default, so an empty TOML file is a valid config:
//!
//! ```toml
//! [server]
//! host = "0.0.0.0"
//! port = 25566
//! backlog = 10
//!
//! [client]
//! host = "127.0.0.1"
//! emitter = "alice"
//! family = "ipv4"
//! ```

use std::io;
use std::net::SocketAddr;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::frame::DEFAULT_MAX_FRAME_SIZE;
use crate::packet::UNKNOWN_EMITTER;
use crate::DEFAULT_PORT;

/// Which resolved addresses may be used
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AddressFamily {
    #[default]
    Any,
    Ipv4,
    Ipv6,
}

impl AddressFamily {
    pub fn accepts(self, addr: &SocketAddr) -> bool {
        match self {
            AddressFamily::Any => true,
            AddressFamily::Ipv4 => addr.is_ipv4(),
            AddressFamily::Ipv6 => addr.is_ipv6(),
        }
    }
}

/// Relay server settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub family: AddressFamily,
    /// Listen backlog
    pub backlog: u32,
    /// Largest accepted frame body, in bytes
    pub max_frame_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: DEFAULT_PORT,
            family: AddressFamily::Any,
            backlog: 10,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
        }
    }
}

impl ServerConfig {
    /// Settings for `host:port`, everything else default
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            ..Self::default()
        }
    }

    pub fn addr_string(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Relay client settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub host: String,
    pub port: u16,
    pub family: AddressFamily,
    /// Largest accepted frame body, in bytes
    pub max_frame_size: usize,
    /// Emitter stamped on packets built through the client
    pub emitter: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: DEFAULT_PORT,
            family: AddressFamily::Any,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            emitter: UNKNOWN_EMITTER.to_string(),
        }
    }
}

impl ClientConfig {
    /// Settings for `host:port`, everything else default
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            ..Self::default()
        }
    }

    pub fn with_emitter(mut self, emitter: impl Into<String>) -> Self {
        self.emitter = emitter.into();
        self
    }

    pub fn addr_string(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Config file layout
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub client: ClientConfig,
}

impl Config {
    /// Load a config file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parse config from TOML content
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| Error::Config(e.to_string()))
    }
}

/// Resolve `host:port`, keeping only addresses of the requested family
pub(crate) async fn resolve(host: &str, port: u16, family: AddressFamily) -> io::Result<Vec<SocketAddr>> {
    let addrs: Vec<SocketAddr> = tokio::net::lookup_host((host, port))
        .await?
        .filter(|addr| family.accepts(addr))
        .collect();

    if addrs.is_empty() {
        return Err(io::Error::new(
            io::ErrorKind::AddrNotAvailable,
            format!("no {:?} address for {}:{}", family, host, port),
        ));
    }

    Ok(addrs)
}
