//! TCP connect.

use std::future::Future;
use std::io;
use std::net::SocketAddr;

use futures_util::future::select_ok;
use tokio::net::TcpStream;
use tokio::time::Instant;

use crate::error::{Provider, SniErrorCode, TransportError};
use crate::stream::{Probe, RawStream, StreamHandle};

/// Most addresses a parallel connect may race.
pub const MAX_PARALLEL_ADDRESSES: usize = 64;

/// Run `fut`, giving up at `deadline` when one is set.
pub(crate) async fn with_deadline<F: Future>(
    deadline: Option<Instant>,
    fut: F,
) -> Result<F::Output, tokio::time::error::Elapsed> {
    match deadline {
        Some(deadline) => tokio::time::timeout_at(deadline, fut).await,
        None => Ok(fut.await),
    }
}

fn open_timeout(host: &str, port: u16) -> TransportError {
    TransportError::new(
        Provider::Tcp,
        SniErrorCode::ConnOpenFailed,
        format!("timed out connecting to {host},{port}"),
    )
}

/// Resolve `host` and connect.
///
/// With `parallel` every resolved address is dialed at once and the first
/// success wins; otherwise addresses are tried in order and the last error
/// is returned if none answers.
pub(crate) async fn connect_tcp(
    host: &str,
    port: u16,
    deadline: Option<Instant>,
    parallel: bool,
) -> Result<StreamHandle, TransportError> {
    let addrs: Vec<SocketAddr> = with_deadline(deadline, tokio::net::lookup_host((host, port)))
        .await
        .map_err(|_| open_timeout(host, port))?
        .map_err(|e| TransportError::io_with_code(Provider::Tcp, SniErrorCode::ConnOpenFailed, e))?
        .collect();

    if addrs.is_empty() {
        return Err(TransportError::new(
            Provider::Tcp,
            SniErrorCode::ConnOpenFailed,
            format!("no addresses found for {host}"),
        ));
    }
    if parallel && addrs.len() > MAX_PARALLEL_ADDRESSES {
        return Err(TransportError::new(
            Provider::Tcp,
            SniErrorCode::MultiSubnetTooManyAddresses,
            format!(
                "{host} resolved to {} addresses, at most {MAX_PARALLEL_ADDRESSES} are allowed",
                addrs.len()
            ),
        ));
    }

    tracing::debug!(host = %host, port, addresses = addrs.len(), parallel, "connecting");

    let connect = async {
        if parallel {
            select_ok(addrs.iter().map(|addr| Box::pin(TcpStream::connect(*addr))))
                .await
                .map(|(stream, _pending)| stream)
        } else {
            connect_in_order(&addrs).await
        }
    };

    let stream = with_deadline(deadline, connect)
        .await
        .map_err(|_| open_timeout(host, port))?
        .map_err(|e| TransportError::io_with_code(Provider::Tcp, SniErrorCode::ConnOpenFailed, e))?;

    let (stream, probe) =
        prepare(stream).map_err(|e| TransportError::io(Provider::Tcp, e))?;

    Ok(StreamHandle::new(
        Provider::Tcp,
        host.to_string(),
        RawStream::Tcp(stream),
        Probe::Tcp(probe),
    ))
}

async fn connect_in_order(addrs: &[SocketAddr]) -> io::Result<TcpStream> {
    let mut last_error = None;
    for addr in addrs {
        match TcpStream::connect(addr).await {
            Ok(stream) => return Ok(stream),
            Err(e) => {
                tracing::trace!(%addr, error = %e, "address refused");
                last_error = Some(e);
            }
        }
    }
    Err(last_error.unwrap_or_else(|| io::ErrorKind::NotFound.into()))
}

/// Set TCP_NODELAY and keep a duplicate of the socket for liveness probes.
fn prepare(stream: TcpStream) -> io::Result<(TcpStream, std::net::TcpStream)> {
    stream.set_nodelay(true)?;
    let std_stream = stream.into_std()?;
    let probe = std_stream.try_clone()?;
    Ok((TcpStream::from_std(std_stream)?, probe))
}
