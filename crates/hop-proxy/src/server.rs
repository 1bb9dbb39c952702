//! Tunnel servers: startup and lifecycle for both hops.
//!
//! [`start_proxy`] runs the CONNECT hop, [`start_forwarder`] runs the
//! chained forwarder. Both bind (port 0 = OS-assigned), spawn the accept
//! loop on the current runtime and return a [`TunnelHandle`].

use crate::audit::HopMode;
use crate::config::{ForwarderConfig, ProxyConfig};
use crate::connect::{handle_connect, ConnectCtx, Destination};
use crate::error::{Result, TunnelError};
use crate::forward::{handle_forward, ForwardCtx};
use crate::listener::{accept_loop, bind, SessionHandler};
use crate::tls::TlsTermination;
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio::task::{JoinError, JoinHandle};
use tracing::{info, warn};

/// Handle returned when a tunnel server starts.
///
/// Drop the handle or call [`TunnelHandle::shutdown`] to stop accepting.
/// Sessions already running finish on their own.
pub struct TunnelHandle {
    /// The address the listener is actually bound to
    pub local_addr: SocketAddr,
    shutdown_tx: watch::Sender<bool>,
    accept_task: JoinHandle<Result<()>>,
}

impl TunnelHandle {
    /// Signal the accept loop to stop.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    /// Wait for the accept loop to exit and release the bound address.
    ///
    /// Returns the listener's error if the socket failed rather than
    /// being shut down.
    pub async fn join(self) -> Result<()> {
        let Self {
            shutdown_tx,
            accept_task,
            ..
        } = self;
        let result = settle_accept_task(accept_task.await);
        drop(shutdown_tx);
        result
    }

    /// Serve until `signal` completes, then shut down and wait for the
    /// listener to exit. Returns early if the listening socket fails first.
    pub async fn run_until<F>(mut self, signal: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        tokio::select! {
            finished = &mut self.accept_task => return settle_accept_task(finished),
            () = signal => {}
        }
        self.shutdown();
        self.join().await
    }
}

fn settle_accept_task(finished: std::result::Result<Result<()>, JoinError>) -> Result<()> {
    finished.unwrap_or_else(|e| {
        warn!("Accept loop terminated abnormally: {}", e);
        Err(TunnelError::Accept(io::Error::other(e)))
    })
}

struct ProxySessions {
    ctx: ConnectCtx,
}

impl SessionHandler for ProxySessions {
    fn mode(&self) -> HopMode {
        HopMode::Connect
    }

    async fn handle(&self, stream: TcpStream, peer: SocketAddr) -> Result<()> {
        handle_connect(stream, peer, &self.ctx).await
    }
}

struct ForwardSessions {
    ctx: ForwardCtx,
}

impl SessionHandler for ForwardSessions {
    fn mode(&self) -> HopMode {
        HopMode::Forward
    }

    async fn handle(&self, stream: TcpStream, peer: SocketAddr) -> Result<()> {
        handle_forward(stream, peer, &self.ctx).await
    }
}

/// Start the CONNECT proxy hop.
///
/// TLS material, if configured, is loaded before binding so a bad
/// certificate fails startup instead of every session.
pub async fn start_proxy(config: ProxyConfig) -> Result<TunnelHandle> {
    let tls = TlsTermination::from_files(config.tls.as_ref())?;
    start_proxy_with_tls(config, tls).await
}

/// Start the CONNECT proxy hop with prepared TLS settings.
///
/// `config.tls` is ignored in favour of `tls`.
pub async fn start_proxy_with_tls(
    config: ProxyConfig,
    tls: TlsTermination,
) -> Result<TunnelHandle> {
    let tls_enabled = tls.is_enabled();
    let ctx = ConnectCtx {
        idle_timeout: config.idle_timeout(),
        connect_timeout: config.connect_timeout(),
        tls,
    };
    let bind_addr = SocketAddr::new(config.bind_addr, config.bind_port);
    let handle = spawn_server(bind_addr, ProxySessions { ctx }, config.max_connections).await?;

    info!(
        "HTTPS proxy server started on {} (tls termination: {})",
        handle.local_addr, tls_enabled
    );
    Ok(handle)
}

/// Start the chained forwarder hop.
pub async fn start_forwarder(config: ForwarderConfig) -> Result<TunnelHandle> {
    if config.remote_host.trim().is_empty() {
        return Err(TunnelError::Config(
            "forwarder requires a remote proxy host".to_string(),
        ));
    }

    let ctx = ForwardCtx {
        remote: Destination::new(config.remote_host.trim(), config.remote_port),
        idle_timeout: config.idle_timeout(),
        connect_timeout: config.connect_timeout(),
    };
    let remote = ctx.remote.clone();
    let bind_addr = SocketAddr::new(config.bind_addr, config.bind_port);
    let handle = spawn_server(bind_addr, ForwardSessions { ctx }, config.max_connections).await?;

    info!("Proxy forwarder started on {}", handle.local_addr);
    info!("Forwarding to {}", remote);
    Ok(handle)
}

async fn spawn_server<H: SessionHandler>(
    bind_addr: SocketAddr,
    handler: H,
    max_connections: usize,
) -> Result<TunnelHandle> {
    let listener = bind(bind_addr).await?;
    let local_addr = listener.local_addr().map_err(|e| TunnelError::Bind {
        addr: bind_addr.to_string(),
        source: e,
    })?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let accept_task = tokio::spawn(accept_loop(
        listener,
        Arc::new(handler),
        max_connections,
        shutdown_rx,
    ));

    Ok(TunnelHandle {
        local_addr,
        shutdown_tx,
        accept_task,
    })
}
