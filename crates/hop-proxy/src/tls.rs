//! Optional TLS termination on the client-facing side of a tunnel.
//!
//! [`TlsTermination`] is built once at startup and shared read-only by
//! every session. Without certificate material it is the identity
//! transform and [`TlsTermination::accept`] hands back the plain stream.

use crate::config::TlsFiles;
use crate::error::{Result, TunnelError};
use rustls::pki_types::pem::PemObject;
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use std::io;
use std::path::Path;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;
use tokio_rustls::server::TlsStream;
use tokio_rustls::TlsAcceptor;

/// Server-side TLS settings, or none.
#[derive(Clone, Default)]
pub struct TlsTermination {
    acceptor: Option<TlsAcceptor>,
}

impl TlsTermination {
    /// Pass-through: sessions stay plaintext.
    #[must_use]
    pub fn disabled() -> Self {
        Self { acceptor: None }
    }

    #[must_use]
    pub fn from_server_config(config: Arc<rustls::ServerConfig>) -> Self {
        Self {
            acceptor: Some(TlsAcceptor::from(config)),
        }
    }

    /// Build from optional file paths; `None` disables termination.
    pub fn from_files(files: Option<&TlsFiles>) -> Result<Self> {
        match files {
            Some(files) => Self::from_pem_files(&files.cert_path, &files.key_path),
            None => Ok(Self::disabled()),
        }
    }

    /// Load a PEM certificate chain and private key from disk.
    pub fn from_pem_files(cert_path: &Path, key_path: &Path) -> Result<Self> {
        let cert_pem = std::fs::read(cert_path).map_err(|e| {
            TunnelError::TlsConfig(format!("cannot read {}: {}", cert_path.display(), e))
        })?;
        let key_pem = std::fs::read(key_path).map_err(|e| {
            TunnelError::TlsConfig(format!("cannot read {}: {}", key_path.display(), e))
        })?;
        Self::from_pem(&cert_pem, &key_pem)
    }

    /// Build from in-memory PEM data.
    pub fn from_pem(cert_pem: &[u8], key_pem: &[u8]) -> Result<Self> {
        let certs = CertificateDer::pem_slice_iter(cert_pem)
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| TunnelError::TlsConfig(format!("invalid certificate PEM: {}", e)))?;
        if certs.is_empty() {
            return Err(TunnelError::TlsConfig(
                "no certificates found in PEM data".to_string(),
            ));
        }
        let key = PrivateKeyDer::from_pem_slice(key_pem)
            .map_err(|e| TunnelError::TlsConfig(format!("invalid private key PEM: {}", e)))?;

        // Name the ring provider explicitly so a second provider in the
        // dependency tree cannot make the default ambiguous.
        let config = rustls::ServerConfig::builder_with_provider(Arc::new(
            rustls::crypto::ring::default_provider(),
        ))
        .with_safe_default_protocol_versions()
        .map_err(|e| TunnelError::TlsConfig(format!("TLS config error: {}", e)))?
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(|e| TunnelError::TlsConfig(format!("unusable certificate or key: {}", e)))?;

        Ok(Self::from_server_config(Arc::new(config)))
    }

    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.acceptor.is_some()
    }

    /// Wrap an accepted connection, completing the handshake if enabled.
    ///
    /// A failed or timed-out handshake drops `stream`; it is never retried.
    pub async fn accept(
        &self,
        stream: TcpStream,
        handshake_timeout: Duration,
    ) -> Result<ClientStream> {
        let Some(acceptor) = &self.acceptor else {
            return Ok(ClientStream::Plain(stream));
        };

        match tokio::time::timeout(handshake_timeout, acceptor.accept(stream)).await {
            Ok(Ok(tls)) => Ok(ClientStream::Tls(Box::new(tls))),
            Ok(Err(e)) => Err(TunnelError::TlsHandshake(e)),
            Err(_) => Err(TunnelError::TlsHandshake(io::Error::new(
                io::ErrorKind::TimedOut,
                "handshake timed out",
            ))),
        }
    }
}

impl std::fmt::Debug for TlsTermination {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsTermination")
            .field("enabled", &self.is_enabled())
            .finish()
    }
}

/// Client side of a session after the TLS step.
pub enum ClientStream {
    Plain(TcpStream),
    Tls(Box<TlsStream<TcpStream>>),
}

impl ClientStream {
    #[must_use]
    pub fn is_tls(&self) -> bool {
        matches!(self, ClientStream::Tls(_))
    }
}

impl AsyncRead for ClientStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            ClientStream::Plain(s) => Pin::new(s).poll_read(cx, buf),
            ClientStream::Tls(s) => Pin::new(s.as_mut()).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for ClientStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            ClientStream::Plain(s) => Pin::new(s).poll_write(cx, buf),
            ClientStream::Tls(s) => Pin::new(s.as_mut()).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            ClientStream::Plain(s) => Pin::new(s).poll_flush(cx),
            ClientStream::Tls(s) => Pin::new(s.as_mut()).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            ClientStream::Plain(s) => Pin::new(s).poll_shutdown(cx),
            ClientStream::Tls(s) => Pin::new(s.as_mut()).poll_shutdown(cx),
        }
    }
}
