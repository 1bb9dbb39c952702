//! Configuration types for both tunnel hops.
//!
//! [`ProxyConfig`] drives the CONNECT hop, [`ForwarderConfig`] drives the
//! chained forwarder. Durations are carried as whole seconds so the
//! structs round-trip through JSON config files unchanged.

use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr};
use std::path::PathBuf;
use std::time::Duration;

/// Default listen port of the CONNECT hop.
pub const DEFAULT_PROXY_PORT: u16 = 8888;

/// Default listen port of the forwarder hop.
pub const DEFAULT_FORWARD_PORT: u16 = 19484;

/// Default remote proxy port the forwarder dials.
pub const DEFAULT_REMOTE_PORT: u16 = 19483;

const DEFAULT_IDLE_TIMEOUT_SECS: u64 = 5;
const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 30;

/// Certificate material for TLS termination on the client-facing side.
///
/// Both paths are PEM files. There is no partial configuration: either
/// both are present or TLS termination is disabled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TlsFiles {
    /// PEM certificate chain, leaf first
    pub cert_path: PathBuf,
    /// PEM private key (PKCS#8, PKCS#1 or SEC1)
    pub key_path: PathBuf,
}

/// Configuration for the CONNECT proxy hop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyConfig {
    /// Bind address (default: 0.0.0.0)
    #[serde(default = "default_bind_addr")]
    pub bind_addr: IpAddr,

    /// Bind port (0 = OS-assigned ephemeral port)
    #[serde(default = "default_proxy_port")]
    pub bind_port: u16,

    /// Seconds a relay direction may stay silent before it ends.
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,

    /// Seconds allowed for each outbound connect attempt.
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,

    /// Terminate TLS on the client side after the CONNECT reply.
    #[serde(default)]
    pub tls: Option<TlsFiles>,

    /// Maximum concurrent sessions (0 = unlimited).
    #[serde(default)]
    pub max_connections: usize,
}

impl ProxyConfig {
    #[must_use]
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    #[must_use]
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            bind_port: DEFAULT_PROXY_PORT,
            idle_timeout_secs: DEFAULT_IDLE_TIMEOUT_SECS,
            connect_timeout_secs: DEFAULT_CONNECT_TIMEOUT_SECS,
            tls: None,
            max_connections: 0,
        }
    }
}

/// Configuration for the chained forwarder hop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForwarderConfig {
    /// Bind address (default: 0.0.0.0)
    #[serde(default = "default_bind_addr")]
    pub bind_addr: IpAddr,

    /// Bind port (0 = OS-assigned ephemeral port)
    #[serde(default = "default_forward_port")]
    pub bind_port: u16,

    /// Host of the remote CONNECT proxy. Has no default.
    #[serde(default)]
    pub remote_host: String,

    /// Port of the remote CONNECT proxy.
    #[serde(default = "default_remote_port")]
    pub remote_port: u16,

    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,

    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,

    /// Maximum concurrent sessions (0 = unlimited).
    #[serde(default)]
    pub max_connections: usize,
}

impl ForwarderConfig {
    #[must_use]
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    #[must_use]
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

impl Default for ForwarderConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            bind_port: DEFAULT_FORWARD_PORT,
            remote_host: String::new(),
            remote_port: DEFAULT_REMOTE_PORT,
            idle_timeout_secs: DEFAULT_IDLE_TIMEOUT_SECS,
            connect_timeout_secs: DEFAULT_CONNECT_TIMEOUT_SECS,
            max_connections: 0,
        }
    }
}

fn default_bind_addr() -> IpAddr {
    IpAddr::V4(Ipv4Addr::UNSPECIFIED)
}

fn default_proxy_port() -> u16 {
    DEFAULT_PROXY_PORT
}

fn default_forward_port() -> u16 {
    DEFAULT_FORWARD_PORT
}

fn default_remote_port() -> u16 {
    DEFAULT_REMOTE_PORT
}

fn default_idle_timeout_secs() -> u64 {
    DEFAULT_IDLE_TIMEOUT_SECS
}

fn default_connect_timeout_secs() -> u64 {
    DEFAULT_CONNECT_TIMEOUT_SECS
}
