//! Chained forwarder: the local hop.
//!
//! Every accepted connection is relayed, unparsed, to one fixed remote
//! proxy. This hop owes the client no protocol reply, so a failed dial
//! simply closes the client connection.

use crate::audit::{self, HopMode};
use crate::connect::Destination;
use crate::dial::dial;
use crate::error::Result;
use crate::relay::relay;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpStream;
use tracing::info;

/// Per-listener settings shared by every forwarded session.
#[derive(Debug, Clone)]
pub struct ForwardCtx {
    pub remote: Destination,
    pub idle_timeout: Duration,
    pub connect_timeout: Duration,
}

/// Dial the remote proxy and relay until both directions end.
pub async fn handle_forward(client: TcpStream, peer: SocketAddr, ctx: &ForwardCtx) -> Result<()> {
    let upstream = match dial(&ctx.remote, ctx.connect_timeout).await {
        Ok(upstream) => upstream,
        Err(e) => {
            audit::log_dial_failed(
                HopMode::Forward,
                &ctx.remote.host,
                ctx.remote.port,
                &e.to_string(),
            );
            return Err(e);
        }
    };
    info!("Forwarding {} to remote proxy {}", peer, ctx.remote);

    audit::log_opened(HopMode::Forward, &ctx.remote.host, ctx.remote.port, false);
    let report = relay(client, upstream, ctx.idle_timeout).await;
    audit::log_closed(HopMode::Forward, &ctx.remote.host, ctx.remote.port, &report);

    Ok(())
}
