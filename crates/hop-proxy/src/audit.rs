//! Audit logging for tunnel sessions.
//!
//! Logs session lifecycle events with structured fields via `tracing`.
//! Relayed payload bytes are never included in audit logs.

use crate::relay::RelayReport;
use tracing::info;

/// Which hop produced the event.
#[derive(Debug, Clone, Copy)]
pub enum HopMode {
    /// CONNECT proxy (dials the requested destination)
    Connect,
    /// Chained forwarder (dials the fixed remote proxy)
    Forward,
}

impl std::fmt::Display for HopMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HopMode::Connect => write!(f, "connect"),
            HopMode::Forward => write!(f, "forward"),
        }
    }
}

/// Log an established tunnel.
pub fn log_opened(mode: HopMode, host: &str, port: u16, tls: bool) {
    info!(
        target: "hop_proxy::audit",
        mode = %mode,
        host = host,
        port = port,
        tls = tls,
        "tunnel opened"
    );
}

/// Log a rejected request (parse failure, connection limit).
pub fn log_rejected(mode: HopMode, peer: &str, reason: &str) {
    info!(
        target: "hop_proxy::audit",
        mode = %mode,
        peer = peer,
        reason = reason,
        "request rejected"
    );
}

/// Log a failed outbound connect.
pub fn log_dial_failed(mode: HopMode, host: &str, port: u16, reason: &str) {
    info!(
        target: "hop_proxy::audit",
        mode = %mode,
        host = host,
        port = port,
        reason = reason,
        "dial failed"
    );
}

/// Log a failed TLS handshake with the client.
pub fn log_tls_failed(host: &str, port: u16, reason: &str) {
    info!(
        target: "hop_proxy::audit",
        mode = "connect",
        host = host,
        port = port,
        reason = reason,
        "tls handshake failed"
    );
}

/// Log a finished tunnel with per-direction accounting.
pub fn log_closed(mode: HopMode, host: &str, port: u16, report: &RelayReport) {
    info!(
        target: "hop_proxy::audit",
        mode = %mode,
        host = host,
        port = port,
        bytes_up = report.client_to_upstream.bytes,
        bytes_down = report.upstream_to_client.bytes,
        end_up = %report.client_to_upstream.end,
        end_down = %report.upstream_to_client.end,
        "tunnel closed"
    );
}
