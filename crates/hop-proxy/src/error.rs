//! Error types for the hop-proxy crate.

use thiserror::Error;

/// Reasons a CONNECT request line is rejected.
///
/// A parse failure closes the client connection without writing any
/// reply bytes.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("client closed the connection before sending a request")]
    EmptyRequest,

    #[error("request does not start with CONNECT")]
    NotConnectMethod,

    #[error("malformed CONNECT target: {0}")]
    MalformedTarget(String),
}

/// Errors that can occur in the tunnel.
#[derive(Error, Debug)]
pub enum TunnelError {
    #[error("Listener bind failed on {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Accept failed: {0}")]
    Accept(std::io::Error),

    #[error("CONNECT parse error: {0}")]
    Parse(#[from] ParseError),

    #[error("Dial to {destination} failed: {reason}")]
    Dial { destination: String, reason: String },

    #[error("TLS handshake failed: {0}")]
    TlsHandshake(std::io::Error),

    #[error("TLS configuration error: {0}")]
    TlsConfig(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for tunnel operations.
pub type Result<T> = std::result::Result<T, TunnelError>;
