//! Bidirectional relay between two connected stream endpoints.
//!
//! Each direction runs in its own spawned task and copies one read at a
//! time, writing every chunk in full before issuing the next read. A
//! direction ends on EOF, on an I/O error, or when its source stays
//! silent for longer than the idle timeout. The relay joins both
//! directions before closing the pair, so one side finishing never
//! truncates data still flowing the other way.

use std::fmt;
use std::io;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::task::JoinError;
use tokio::time::timeout;
use tracing::{debug, warn};

/// Size of the per-direction read buffer.
pub const RELAY_BUFFER_SIZE: usize = 4096;

/// How a relay direction ended.
#[derive(Debug)]
pub enum DirectionEnd {
    /// The source performed an orderly close.
    Eof,
    /// The source sent nothing for a whole idle period.
    Idle,
    /// Reading the source or writing the sink failed.
    Error(io::Error),
    /// The direction task panicked or was cancelled.
    Aborted,
}

impl DirectionEnd {
    #[must_use]
    pub fn is_error(&self) -> bool {
        matches!(self, DirectionEnd::Error(_) | DirectionEnd::Aborted)
    }
}

impl fmt::Display for DirectionEnd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DirectionEnd::Eof => write!(f, "eof"),
            DirectionEnd::Idle => write!(f, "idle"),
            DirectionEnd::Error(e) => write!(f, "error: {}", e),
            DirectionEnd::Aborted => write!(f, "aborted"),
        }
    }
}

/// Accounting for one direction of a relay.
#[derive(Debug)]
pub struct DirectionReport {
    /// Bytes written to the sink.
    pub bytes: u64,
    pub end: DirectionEnd,
}

/// Outcome of a finished relay.
#[derive(Debug)]
pub struct RelayReport {
    pub client_to_upstream: DirectionReport,
    pub upstream_to_client: DirectionReport,
}

/// Relay bytes between `client` and `upstream` until both directions end.
///
/// Both endpoints are shut down and dropped before this returns,
/// whichever way the directions ended. Errors are reported in the
/// returned [`RelayReport`] and never propagated.
pub async fn relay<A, B>(client: A, upstream: B, idle_timeout: Duration) -> RelayReport
where
    A: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    B: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (client_rd, client_wr) = tokio::io::split(client);
    let (upstream_rd, upstream_wr) = tokio::io::split(upstream);

    let up = tokio::spawn(forward(client_rd, upstream_wr, idle_timeout));
    let down = tokio::spawn(forward(upstream_rd, client_wr, idle_timeout));

    // Join, not race: the direction that ends first must not cut off the other.
    let (up, down) = tokio::join!(up, down);
    let (up_halves, client_to_upstream) = settle(up, "client->upstream");
    let (down_halves, upstream_to_client) = settle(down, "upstream->client");

    if let (Some((client_rd, upstream_wr)), Some((upstream_rd, client_wr))) =
        (up_halves, down_halves)
    {
        close(client_rd.unsplit(client_wr), idle_timeout).await;
        close(upstream_rd.unsplit(upstream_wr), idle_timeout).await;
    }
    // Otherwise an aborted task already dropped its halves, and dropping
    // the surviving ones here releases both streams.

    RelayReport {
        client_to_upstream,
        upstream_to_client,
    }
}

type Halves<S, D> = (ReadHalf<S>, WriteHalf<D>);

/// Copy `reader` into `writer` until EOF, error, or an idle period.
async fn forward<S, D>(
    mut reader: ReadHalf<S>,
    mut writer: WriteHalf<D>,
    idle_timeout: Duration,
) -> (Halves<S, D>, DirectionReport)
where
    S: AsyncRead + AsyncWrite,
    D: AsyncRead + AsyncWrite,
{
    let mut buf = vec![0u8; RELAY_BUFFER_SIZE];
    let mut bytes: u64 = 0;

    let end = loop {
        let n = match timeout(idle_timeout, reader.read(&mut buf)).await {
            Err(_) => break DirectionEnd::Idle,
            Ok(Ok(0)) => break DirectionEnd::Eof,
            Ok(Ok(n)) => n,
            Ok(Err(e)) => break DirectionEnd::Error(e),
        };
        if let Err(e) = write_chunk(&mut writer, &buf[..n]).await {
            break DirectionEnd::Error(e);
        }
        bytes += n as u64;
    };

    // Propagate a clean half-close so the far side sees the end of data.
    if matches!(end, DirectionEnd::Eof) {
        if let Err(e) = writer.shutdown().await {
            debug!("half-close propagation failed: {}", e);
        }
    }

    ((reader, writer), DirectionReport { bytes, end })
}

async fn write_chunk<W: AsyncWrite + Unpin>(writer: &mut W, chunk: &[u8]) -> io::Result<()> {
    writer.write_all(chunk).await?;
    writer.flush().await
}

fn settle<S, D>(
    joined: std::result::Result<(Halves<S, D>, DirectionReport), JoinError>,
    direction: &str,
) -> (Option<Halves<S, D>>, DirectionReport) {
    match joined {
        Ok((halves, report)) => {
            if let DirectionEnd::Error(ref e) = report.end {
                debug!("relay {} ended with error: {}", direction, e);
            }
            (Some(halves), report)
        }
        Err(e) => {
            warn!("relay {} task aborted: {}", direction, e);
            (
                None,
                DirectionReport {
                    bytes: 0,
                    end: DirectionEnd::Aborted,
                },
            )
        }
    }
}

/// Shut down and drop a stream. Repeated shutdowns are harmless.
async fn close<S: AsyncWrite + Unpin>(mut stream: S, grace: Duration) {
    match timeout(grace, stream.shutdown()).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => debug!("shutdown on close: {}", e),
        Err(_) => debug!("shutdown on close timed out"),
    }
}
