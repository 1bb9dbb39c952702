//! Outbound connections to tunnel destinations.
//!
//! The dialer is the only place host names are resolved. Every resolved
//! address is tried in order, each attempt bounded by the connect
//! timeout; the last failure is reported.

use crate::connect::Destination;
use crate::error::{Result, TunnelError};
use std::time::Duration;
use tokio::net::{lookup_host, TcpStream};
use tokio::time::timeout;
use tracing::debug;

/// Open a TCP connection to `destination`.
pub async fn dial(destination: &Destination, connect_timeout: Duration) -> Result<TcpStream> {
    let target = (destination.host.as_str(), destination.port);
    let addrs = timeout(connect_timeout, lookup_host(target))
        .await
        .map_err(|_| dial_error(destination, "resolve timed out".to_string()))?
        .map_err(|e| dial_error(destination, format!("resolve failed: {}", e)))?;

    let mut reason = "name resolved to no addresses".to_string();
    for addr in addrs {
        reason = match timeout(connect_timeout, TcpStream::connect(addr)).await {
            Ok(Ok(stream)) => {
                debug!("Connected to {} via {}", destination, addr);
                return Ok(stream);
            }
            Ok(Err(e)) => format!("{}: {}", addr, e),
            Err(_) => format!("{}: timed out after {:?}", addr, connect_timeout),
        };
        debug!("Dial {} attempt failed: {}", destination, reason);
    }
    Err(dial_error(destination, reason))
}

fn dial_error(destination: &Destination, reason: String) -> TunnelError {
    TunnelError::Dial {
        destination: destination.to_string(),
        reason,
    }
}
