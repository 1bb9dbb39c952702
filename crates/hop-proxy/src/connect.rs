//! HTTP CONNECT tunnel handler.
//!
//! Handles `CONNECT host:port HTTP/1.1` requests by:
//! 1. Parsing the target from the first read of the connection
//! 2. Dialing the destination (`503 Service Unavailable` on failure)
//! 3. Returning `200 Connection Established` in plaintext
//! 4. Optionally terminating TLS on the client side
//! 5. Relaying bytes bidirectionally until both directions end
//!
//! Only the request line is interpreted. Header lines and anything else
//! that arrived in the first read are discarded.

use crate::audit::{self, HopMode};
use crate::dial::dial;
use crate::error::{ParseError, Result, TunnelError};
use crate::relay::relay;
use crate::tls::TlsTermination;
use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, info};

/// Size of the single read that must contain the request line.
pub const CONNECT_READ_BUFFER_SIZE: usize = 4096;

/// Reply sent once the destination is connected.
pub const CONNECTION_ESTABLISHED: &[u8] = b"HTTP/1.1 200 Connection Established\r\n\r\n";

/// Reply sent when the destination cannot be reached.
pub const SERVICE_UNAVAILABLE: &[u8] = b"HTTP/1.1 503 Service Unavailable\r\n\r\n";

const METHOD: &[u8] = b"CONNECT";

/// Target of a tunnel. Host is an IP literal or a name, resolved only
/// when dialing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Destination {
    pub host: String,
    pub port: u16,
}

impl Destination {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

/// Parse the destination out of the first bytes of a connection.
///
/// Expected format: `CONNECT host:port <ignored>\r\n...`
pub fn parse_connect_request(bytes: &[u8]) -> std::result::Result<Destination, ParseError> {
    if bytes.is_empty() {
        return Err(ParseError::EmptyRequest);
    }
    if !bytes.starts_with(METHOD) {
        return Err(ParseError::NotConnectMethod);
    }

    let line_end = bytes
        .iter()
        .position(|&b| b == b'\r' || b == b'\n')
        .unwrap_or(bytes.len());
    let mut parts = bytes[..line_end]
        .split(u8::is_ascii_whitespace)
        .filter(|token| !token.is_empty());
    if parts.next() != Some(METHOD) {
        return Err(ParseError::NotConnectMethod);
    }
    let target = parts
        .next()
        .ok_or_else(|| ParseError::MalformedTarget("missing host:port".to_string()))?;

    // Only the target has to be text; the rest of the line is ignored.
    let target = std::str::from_utf8(target)
        .map_err(|_| ParseError::MalformedTarget(String::from_utf8_lossy(target).into_owned()))?;
    parse_target(target)
}

fn parse_target(target: &str) -> std::result::Result<Destination, ParseError> {
    let malformed = || ParseError::MalformedTarget(target.to_string());

    let (host, port) = target.rsplit_once(':').ok_or_else(malformed)?;
    let port = port.parse::<u16>().map_err(|_| malformed())?;

    // Bracketed IPv6 literal: [::1]:443
    let host = match host.strip_prefix('[') {
        Some(inner) => inner.strip_suffix(']').ok_or_else(malformed)?,
        None if host.contains(':') => return Err(malformed()),
        None => host,
    };
    if host.is_empty() {
        return Err(malformed());
    }

    Ok(Destination::new(host, port))
}

/// Per-listener settings shared by every CONNECT session.
#[derive(Clone)]
pub struct ConnectCtx {
    pub idle_timeout: Duration,
    pub connect_timeout: Duration,
    pub tls: TlsTermination,
}

/// Run one CONNECT session to completion.
///
/// The client stream is always closed when this returns. Errors are
/// returned only for logging; the client has already seen whatever
/// reply (or silence) the failure calls for.
pub async fn handle_connect(
    mut stream: TcpStream,
    peer: SocketAddr,
    ctx: &ConnectCtx,
) -> Result<()> {
    let mut buf = vec![0u8; CONNECT_READ_BUFFER_SIZE];
    let n = match tokio::time::timeout(ctx.idle_timeout, stream.read(&mut buf)).await {
        Ok(read) => read?,
        Err(_) => {
            audit::log_rejected(HopMode::Connect, &peer.to_string(), "no request before timeout");
            return Err(TunnelError::Io(io::Error::new(
                io::ErrorKind::TimedOut,
                "no CONNECT request received",
            )));
        }
    };

    // Parse failures close the connection without a reply.
    let destination = match parse_connect_request(&buf[..n]) {
        Ok(destination) => destination,
        Err(e) => {
            audit::log_rejected(HopMode::Connect, &peer.to_string(), &e.to_string());
            return Err(e.into());
        }
    };
    info!("Tunneling {} to {}", peer, destination);

    let upstream = match dial(&destination, ctx.connect_timeout).await {
        Ok(upstream) => upstream,
        Err(e) => {
            audit::log_dial_failed(
                HopMode::Connect,
                &destination.host,
                destination.port,
                &e.to_string(),
            );
            if let Err(write_err) = send_reply(&mut stream, SERVICE_UNAVAILABLE).await {
                debug!("Failed to send 503 to {}: {}", peer, write_err);
            }
            if let Err(close_err) = stream.shutdown().await {
                debug!("Failed to close {} after 503: {}", peer, close_err);
            }
            return Err(e);
        }
    };

    send_reply(&mut stream, CONNECTION_ESTABLISHED).await?;

    // The reply above is always plaintext; TLS starts after it.
    let client = match ctx.tls.accept(stream, ctx.connect_timeout).await {
        Ok(client) => client,
        Err(e) => {
            audit::log_tls_failed(&destination.host, destination.port, &e.to_string());
            return Err(e);
        }
    };

    audit::log_opened(
        HopMode::Connect,
        &destination.host,
        destination.port,
        client.is_tls(),
    );
    let report = relay(client, upstream, ctx.idle_timeout).await;
    audit::log_closed(HopMode::Connect, &destination.host, destination.port, &report);

    Ok(())
}

async fn send_reply(stream: &mut TcpStream, reply: &[u8]) -> io::Result<()> {
    stream.write_all(reply).await?;
    stream.flush().await
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_connect_with_port() {
        let dest = parse_connect_request(b"CONNECT example.test:443 HTTP/1.1\r\n\r\n").unwrap();
        assert_eq!(dest, Destination::new("example.test", 443));
    }

    #[test]
    fn test_parse_connect_ip_literal() {
        let dest = parse_connect_request(b"CONNECT 10.1.2.3:8443 HTTP/1.1\r\nHost: x\r\n\r\n")
            .unwrap();
        assert_eq!(dest.host, "10.1.2.3");
        assert_eq!(dest.port, 8443);
    }

    #[test]
    fn test_parse_connect_ipv6_literal() {
        let dest = parse_connect_request(b"CONNECT [::1]:22 HTTP/1.1\r\n\r\n").unwrap();
        assert_eq!(dest, Destination::new("::1", 22));
        assert_eq!(dest.to_string(), "[::1]:22");
    }

    #[test]
    fn test_parse_connect_without_version() {
        let dest = parse_connect_request(b"CONNECT internal:8080\r\n\r\n").unwrap();
        assert_eq!(dest, Destination::new("internal", 8080));
    }

    #[test]
    fn test_parse_rejects_other_methods() {
        assert_eq!(
            parse_connect_request(b"GET / HTTP/1.1\r\n\r\n"),
            Err(ParseError::NotConnectMethod)
        );
        assert_eq!(
            parse_connect_request(b"connect a:1 HTTP/1.1\r\n"),
            Err(ParseError::NotConnectMethod)
        );
        assert_eq!(
            parse_connect_request(b"CONNECTED a:1 HTTP/1.1\r\n"),
            Err(ParseError::NotConnectMethod)
        );
    }

    #[test]
    fn test_parse_rejects_missing_target() {
        assert!(matches!(
            parse_connect_request(b"CONNECT\r\n\r\n"),
            Err(ParseError::MalformedTarget(_))
        ));
    }

    #[test]
    fn test_parse_rejects_bad_ports() {
        for request in [
            &b"CONNECT example.test HTTP/1.1\r\n"[..],
            b"CONNECT example.test:https HTTP/1.1\r\n",
            b"CONNECT example.test:65536 HTTP/1.1\r\n",
            b"CONNECT example.test:-1 HTTP/1.1\r\n",
            b"CONNECT :443 HTTP/1.1\r\n",
            b"CONNECT ::1:443 HTTP/1.1\r\n",
        ] {
            assert!(
                matches!(
                    parse_connect_request(request),
                    Err(ParseError::MalformedTarget(_))
                ),
                "accepted {:?}",
                String::from_utf8_lossy(request)
            );
        }
    }

    #[test]
    fn test_parse_ignores_non_utf8_rest() {
        let request = b"CONNECT example.test:443 HTTP/1.1 \xff\xfe\r\nHost: \x80\r\n\r\n";
        let dest = parse_connect_request(request).unwrap();
        assert_eq!(dest, Destination::new("example.test", 443));
    }

    #[test]
    fn test_parse_rejects_non_utf8_target() {
        assert!(matches!(
            parse_connect_request(b"CONNECT exa\xffmple:443 HTTP/1.1\r\n"),
            Err(ParseError::MalformedTarget(_))
        ));
    }

    #[test]
    fn test_parse_empty_request() {
        assert_eq!(parse_connect_request(b""), Err(ParseError::EmptyRequest));
    }

    #[test]
    fn test_replies_are_exact() {
        assert_eq!(
            CONNECTION_ESTABLISHED,
            b"HTTP/1.1 200 Connection Established\r\n\r\n"
        );
        assert_eq!(SERVICE_UNAVAILABLE, b"HTTP/1.1 503 Service Unavailable\r\n\r\n");
    }
}
