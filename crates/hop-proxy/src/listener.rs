//! Transport listener: bind, accept, and dispatch to session handlers.
//!
//! Every accepted connection gets its own task; the accept loop never
//! waits on a handler. Per-connection accept errors are logged and the
//! loop keeps going; resource exhaustion backs off briefly; anything else
//! means the listening socket is broken and ends the loop with an error.
//! The loop also stops when the shutdown channel fires or its sender is
//! dropped, releasing the bound address.

use crate::audit::{self, HopMode};
use crate::error::{Result, TunnelError};
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// Pause before accepting again when the process is out of descriptors
/// or buffers.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Handles one accepted connection from start to close.
pub trait SessionHandler: Send + Sync + 'static {
    /// Which hop this handler serves, for audit records.
    fn mode(&self) -> HopMode;

    /// Run the session. Any error has already been answered on the wire;
    /// the accept loop only logs it.
    fn handle(
        &self,
        stream: TcpStream,
        peer: SocketAddr,
    ) -> impl Future<Output = Result<()>> + Send;
}

/// Bind a listening socket.
pub async fn bind(addr: SocketAddr) -> Result<TcpListener> {
    TcpListener::bind(addr).await.map_err(|e| TunnelError::Bind {
        addr: addr.to_string(),
        source: e,
    })
}

/// How the accept loop reacts to a failed `accept()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum AcceptFailure {
    /// Only the pending connection was lost.
    Connection,
    /// Out of descriptors or buffers; retry after [`ACCEPT_BACKOFF`].
    Exhausted,
    /// The listening socket itself is unusable.
    Fatal,
}

pub(crate) fn classify_accept_error(e: &io::Error) -> AcceptFailure {
    match e.kind() {
        io::ErrorKind::ConnectionAborted
        | io::ErrorKind::ConnectionReset
        | io::ErrorKind::Interrupted
        | io::ErrorKind::WouldBlock
        | io::ErrorKind::TimedOut => return AcceptFailure::Connection,
        io::ErrorKind::OutOfMemory => return AcceptFailure::Exhausted,
        _ => {}
    }
    #[cfg(unix)]
    if let Some(code) = e.raw_os_error() {
        if matches!(
            code,
            libc::EMFILE | libc::ENFILE | libc::ENOBUFS | libc::ENOMEM
        ) {
            return AcceptFailure::Exhausted;
        }
        // Linux reports pending-connection network errors through accept().
        if matches!(
            code,
            libc::EPROTO
                | libc::ENETDOWN
                | libc::ENOPROTOOPT
                | libc::EHOSTDOWN
                | libc::EHOSTUNREACH
                | libc::ENETUNREACH
                | libc::EOPNOTSUPP
                | libc::EPERM
        ) {
            return AcceptFailure::Connection;
        }
    }
    AcceptFailure::Fatal
}

/// Accept loop: dispatch connections until shutdown.
///
/// `max_connections` of 0 means unlimited; over the limit a new
/// connection is dropped as soon as it is accepted. Returns
/// [`TunnelError::Accept`] if the listening socket fails.
pub async fn accept_loop<H: SessionHandler>(
    listener: TcpListener,
    handler: Arc<H>,
    max_connections: usize,
    mut shutdown_rx: watch::Receiver<bool>,
) -> Result<()> {
    let active = Arc::new(AtomicUsize::new(0));

    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, peer)) => {
                        if max_connections > 0 {
                            let current = active.load(Ordering::Relaxed);
                            if current >= max_connections {
                                warn!("Connection limit reached ({}/{}), rejecting {}", current, max_connections, peer);
                                audit::log_rejected(handler.mode(), &peer.to_string(), "connection limit");
                                drop(stream);
                                continue;
                            }
                        }

                        info!("Accepted connection from {}", peer);
                        let guard = ActiveGuard::new(Arc::clone(&active));
                        let handler = Arc::clone(&handler);
                        tokio::spawn(async move {
                            let _guard = guard;
                            if let Err(e) = handler.handle(stream, peer).await {
                                debug!("Session {} ended with error: {}", peer, e);
                            }
                        });
                    }
                    Err(e) => match classify_accept_error(&e) {
                        AcceptFailure::Connection => {
                            debug!("Dropped pending connection: {}", e);
                        }
                        AcceptFailure::Exhausted => {
                            warn!("{}; retrying in {:?}", TunnelError::Accept(e), ACCEPT_BACKOFF);
                            tokio::time::sleep(ACCEPT_BACKOFF).await;
                        }
                        AcceptFailure::Fatal => {
                            error!("Listening socket failed: {}", e);
                            return Err(TunnelError::Accept(e));
                        }
                    },
                }
            }
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    info!("Listener shutting down");
                    return Ok(());
                }
            }
        }
    }
}

/// Counts a live session; decrements on drop, including on panic.
struct ActiveGuard(Arc<AtomicUsize>);

impl ActiveGuard {
    fn new(counter: Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::Relaxed);
        Self(counter)
    }
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::Relaxed);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::sync::Notify;

    /// Echoes one message, then holds the connection until released.
    struct HoldingEcho {
        release: Arc<Notify>,
    }

    impl SessionHandler for HoldingEcho {
        fn mode(&self) -> HopMode {
            HopMode::Forward
        }

        async fn handle(&self, mut stream: TcpStream, _peer: SocketAddr) -> Result<()> {
            let mut buf = [0u8; 4];
            stream.read_exact(&mut buf).await?;
            stream.write_all(&buf).await?;
            self.release.notified().await;
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_bind_error_names_address() {
        let taken = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = taken.local_addr().unwrap();
        match bind(addr).await {
            Err(TunnelError::Bind { addr: reported, .. }) => assert_eq!(reported, addr.to_string()),
            other => panic!("expected bind error, got {:?}", other.map(|_| ())),
        }
    }

    #[tokio::test]
    async fn test_slow_handler_does_not_block_accept() {
        let listener = bind("127.0.0.1:0".parse().unwrap()).await.unwrap();
        let addr = listener.local_addr().unwrap();
        let release = Arc::new(Notify::new());
        let handler = Arc::new(HoldingEcho {
            release: Arc::clone(&release),
        });
        let (tx, rx) = watch::channel(false);
        let task = tokio::spawn(accept_loop(listener, handler, 0, rx));

        let mut first = TcpStream::connect(addr).await.unwrap();
        first.write_all(b"one!").await.unwrap();
        let mut second = TcpStream::connect(addr).await.unwrap();
        second.write_all(b"two!").await.unwrap();

        let mut buf = [0u8; 4];
        second.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"two!");
        first.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"one!");

        release.notify_waiters();
        tx.send(true).unwrap();
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_connection_limit_drops_extra() {
        let listener = bind("127.0.0.1:0".parse().unwrap()).await.unwrap();
        let addr = listener.local_addr().unwrap();
        let release = Arc::new(Notify::new());
        let handler = Arc::new(HoldingEcho {
            release: Arc::clone(&release),
        });
        let (_tx, rx) = watch::channel(false);
        tokio::spawn(accept_loop(listener, handler, 1, rx));

        let mut first = TcpStream::connect(addr).await.unwrap();
        first.write_all(b"keep").await.unwrap();
        let mut buf = [0u8; 4];
        first.read_exact(&mut buf).await.unwrap();

        let mut second = TcpStream::connect(addr).await.unwrap();
        let mut rest = Vec::new();
        let read = tokio::time::timeout(Duration::from_secs(5), second.read_to_end(&mut rest))
            .await
            .unwrap();
        assert!(read.map(|n| n == 0).unwrap_or(true));

        release.notify_waiters();
    }

    #[tokio::test]
    async fn test_dropping_sender_stops_loop() {
        let listener = bind("127.0.0.1:0".parse().unwrap()).await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handler = Arc::new(HoldingEcho {
            release: Arc::new(Notify::new()),
        });
        let (tx, rx) = watch::channel(false);
        let task = tokio::spawn(accept_loop(listener, handler, 0, rx));

        drop(tx);
        tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        // The address is free again.
        assert!(TcpListener::bind(addr).await.is_ok());
    }

    #[test]
    fn test_accept_error_classification() {
        for kind in [
            io::ErrorKind::ConnectionAborted,
            io::ErrorKind::ConnectionReset,
            io::ErrorKind::Interrupted,
        ] {
            assert_eq!(
                classify_accept_error(&io::Error::from(kind)),
                AcceptFailure::Connection,
                "{:?}",
                kind
            );
        }
        assert_eq!(
            classify_accept_error(&io::Error::from(io::ErrorKind::InvalidInput)),
            AcceptFailure::Fatal
        );
    }

    #[cfg(unix)]
    #[test]
    fn test_descriptor_exhaustion_backs_off() {
        for code in [libc::EMFILE, libc::ENFILE, libc::ENOBUFS] {
            assert_eq!(
                classify_accept_error(&io::Error::from_raw_os_error(code)),
                AcceptFailure::Exhausted,
                "errno {}",
                code
            );
        }
        assert_eq!(
            classify_accept_error(&io::Error::from_raw_os_error(libc::EBADF)),
            AcceptFailure::Fatal
        );
        assert_eq!(
            classify_accept_error(&io::Error::from_raw_os_error(libc::ECONNABORTED)),
            AcceptFailure::Connection
        );
    }
}
