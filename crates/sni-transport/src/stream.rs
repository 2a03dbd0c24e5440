//! Stream-backed transport handle.
//!
//! TCP and named-pipe handles share one implementation: the stream is split
//! into read and write halves, each behind its own async mutex, so one send
//! and one receive can be in flight at the same time. A cancellation token
//! lets [`kill`](TransportHandle::kill) abort both.

use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::task::{Context, Poll};
use std::time::Duration;

use async_trait::async_trait;
use sni_tls::{PreloginShim, TlsConfig, TlsConnector, TlsStream};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, ReadBuf, ReadHalf, WriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{Mutex, MutexGuard};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::{Provider, SniErrorCode, TransportError};
use crate::handle::{AsyncOp, TransportHandle};
use crate::packet::{DEFAULT_BUFFER_SIZE, Packet};

// =============================================================================
// Streams
// =============================================================================

/// The connected socket or pipe, before any TLS.
#[derive(Debug)]
pub(crate) enum RawStream {
    Tcp(TcpStream),
    #[cfg(windows)]
    Pipe(tokio::net::windows::named_pipe::NamedPipeClient),
}

/// The stream actually read and written: raw, or TLS over the raw stream.
#[derive(Debug)]
enum Stream {
    Raw(RawStream),
    Tls(Box<TlsStream<PreloginShim<RawStream>>>),
}

macro_rules! delegate_raw {
    ($self:ident, $inner:ident => $call:expr) => {
        match $self.get_mut() {
            RawStream::Tcp($inner) => $call,
            #[cfg(windows)]
            RawStream::Pipe($inner) => $call,
        }
    };
}

impl AsyncRead for RawStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        delegate_raw!(self, s => Pin::new(s).poll_read(cx, buf))
    }
}

impl AsyncWrite for RawStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        delegate_raw!(self, s => Pin::new(s).poll_write(cx, buf))
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        delegate_raw!(self, s => Pin::new(s).poll_flush(cx))
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        delegate_raw!(self, s => Pin::new(s).poll_shutdown(cx))
    }
}

impl AsyncRead for Stream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Self::Raw(s) => Pin::new(s).poll_read(cx, buf),
            Self::Tls(s) => Pin::new(s.as_mut()).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for Stream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            Self::Raw(s) => Pin::new(s).poll_write(cx, buf),
            Self::Tls(s) => Pin::new(s.as_mut()).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Self::Raw(s) => Pin::new(s).poll_flush(cx),
            Self::Tls(s) => Pin::new(s.as_mut()).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Self::Raw(s) => Pin::new(s).poll_shutdown(cx),
            Self::Tls(s) => Pin::new(s.as_mut()).poll_shutdown(cx),
        }
    }
}

// =============================================================================
// Split stream
// =============================================================================

/// Liveness probe for the endpoint.
#[derive(Debug)]
pub(crate) enum Probe {
    /// Duplicate of the TCP socket, used for non-blocking peeks and forced
    /// shutdown.
    Tcp(std::net::TcpStream),
    /// Named pipes have no out-of-band probe.
    #[cfg_attr(not(windows), allow(dead_code))]
    Pipe,
}

#[derive(Debug)]
struct SplitStream {
    provider: Provider,
    host: String,
    reader: Mutex<Option<ReadHalf<Stream>>>,
    writer: Mutex<Option<WriteHalf<Stream>>>,
    killed: CancellationToken,
    buffer_size: AtomicUsize,
}

impl SplitStream {
    fn new(provider: Provider, host: String, raw: RawStream) -> Self {
        let (reader, writer) = tokio::io::split(Stream::Raw(raw));
        Self {
            provider,
            host,
            reader: Mutex::new(Some(reader)),
            writer: Mutex::new(Some(writer)),
            killed: CancellationToken::new(),
            buffer_size: AtomicUsize::new(DEFAULT_BUFFER_SIZE),
        }
    }

    async fn lock<'a, T>(&self, half: &'a Mutex<T>) -> Result<MutexGuard<'a, T>, TransportError> {
        tokio::select! {
            biased;
            _ = self.killed.cancelled() => Err(TransportError::terminated(self.provider)),
            guard = half.lock() => Ok(guard),
        }
    }

    async fn send(&self, packet: &Packet) -> Result<(), TransportError> {
        let mut guard = self.lock(&self.writer).await?;
        let writer = guard
            .as_mut()
            .ok_or_else(|| TransportError::not_usable(self.provider))?;

        let result = tokio::select! {
            biased;
            _ = self.killed.cancelled() => Err(TransportError::terminated(self.provider)),
            result = packet.write_to_stream_async(writer, self.provider) => result,
        };
        tracing::trace!(provider = %self.provider, len = packet.len(), ok = result.is_ok(), "packet sent");
        result
    }

    async fn receive(&self, timeout: Option<Duration>) -> Result<Packet, TransportError> {
        let mut guard = self.lock(&self.reader).await?;
        let reader = guard
            .as_mut()
            .ok_or_else(|| TransportError::not_usable(self.provider))?;

        let mut packet = Packet::with_capacity(self.buffer_size.load(Ordering::Relaxed));
        let result = match timeout {
            Some(timeout) => tokio::select! {
                biased;
                _ = self.killed.cancelled() => Err(TransportError::terminated(self.provider)),
                result = tokio::time::timeout(
                    timeout,
                    packet.read_from_stream_async(reader, self.provider),
                ) => result.unwrap_or_else(|_| Err(TransportError::timeout(self.provider))),
            },
            None => tokio::select! {
                biased;
                _ = self.killed.cancelled() => Err(TransportError::terminated(self.provider)),
                result = packet.read_from_stream_async(reader, self.provider) => result,
            },
        };

        result.map(|()| {
            tracing::trace!(provider = %self.provider, len = packet.len(), "packet received");
            packet
        })
    }

    /// Lock both halves and put the stream back together.
    async fn unsplit(
        &self,
    ) -> Result<
        (
            MutexGuard<'_, Option<ReadHalf<Stream>>>,
            MutexGuard<'_, Option<WriteHalf<Stream>>>,
            Stream,
        ),
        TransportError,
    > {
        let mut reader = self.lock(&self.reader).await?;
        let mut writer = self.lock(&self.writer).await?;
        match (reader.take(), writer.take()) {
            (Some(r), Some(w)) => Ok((reader, writer, r.unsplit(w))),
            _ => Err(TransportError::not_usable(self.provider)),
        }
    }

    async fn enable_tls(&self, config: &TlsConfig) -> Result<(), TransportError> {
        let connector = TlsConnector::new(config.clone())?;
        let (mut reader, mut writer, stream) = self.unsplit().await?;

        let raw = match stream {
            Stream::Raw(raw) => raw,
            tls @ Stream::Tls(_) => {
                let (r, w) = tokio::io::split(tls);
                *reader = Some(r);
                *writer = Some(w);
                return Err(TransportError::new(
                    Provider::Ssl,
                    SniErrorCode::InvalidParameter,
                    "TLS is already enabled",
                ));
            }
        };

        // On failure the raw stream is gone with the handshake and the halves
        // stay empty, so the handle reports itself unusable.
        let handshake = connector.connect(PreloginShim::new(raw), &self.host);
        let mut tls = tokio::select! {
            biased;
            _ = self.killed.cancelled() => return Err(TransportError::terminated(Provider::Ssl)),
            result = handshake => result?,
        };
        tls.get_mut().0.finish_handshake();

        let (r, w) = tokio::io::split(Stream::Tls(Box::new(tls)));
        *reader = Some(r);
        *writer = Some(w);
        tracing::debug!(host = %self.host, "TLS enabled");
        Ok(())
    }

    async fn disable_tls(&self) -> Result<(), TransportError> {
        let (mut reader, mut writer, stream) = self.unsplit().await?;
        let raw = match stream {
            Stream::Tls(tls) => {
                let (shim, _session) = (*tls).into_inner();
                tracing::debug!(host = %self.host, "TLS disabled");
                Stream::Raw(shim.into_inner())
            }
            raw @ Stream::Raw(_) => raw,
        };
        let (r, w) = tokio::io::split(raw);
        *reader = Some(r);
        *writer = Some(w);
        Ok(())
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.killed.cancel();

        let mut writer = self.writer.lock().await;
        let result = match writer.as_mut() {
            Some(w) => w
                .shutdown()
                .await
                .map_err(|e| TransportError::io(self.provider, e)),
            None => Ok(()),
        };
        writer.take();
        self.reader.lock().await.take();
        result
    }
}

// =============================================================================
// Handle
// =============================================================================

/// Transport handle over a TCP socket or a named pipe.
#[derive(Debug)]
pub struct StreamHandle {
    id: Uuid,
    inner: Arc<SplitStream>,
    probe: Probe,
}

impl StreamHandle {
    pub(crate) fn new(provider: Provider, host: String, raw: RawStream, probe: Probe) -> Self {
        let id = Uuid::new_v4();
        tracing::debug!(connection_id = %id, provider = %provider, host = %host, "transport opened");
        Self {
            id,
            inner: Arc::new(SplitStream::new(provider, host, raw)),
            probe,
        }
    }

    /// Host this handle connected to.
    #[must_use]
    pub fn host(&self) -> &str {
        &self.inner.host
    }
}

#[async_trait]
impl TransportHandle for StreamHandle {
    fn connection_id(&self) -> Uuid {
        self.id
    }

    fn provider(&self) -> Provider {
        self.inner.provider
    }

    async fn send(&self, mut packet: Packet) -> Result<(), TransportError> {
        let result = self.inner.send(&packet).await;
        packet.invoke_completion(result.clone());
        result
    }

    fn send_async(&self, mut packet: Packet, force_callback: bool) -> AsyncOp<()> {
        let inner = Arc::clone(&self.inner);
        AsyncOp::start(
            async move {
                let result = inner.send(&packet).await;
                packet.invoke_completion(result.clone());
                result
            },
            force_callback,
        )
    }

    async fn receive(&self, timeout: Option<Duration>) -> Result<Packet, TransportError> {
        self.inner.receive(timeout).await
    }

    fn receive_async(&self, force_callback: bool) -> AsyncOp<Packet> {
        let inner = Arc::clone(&self.inner);
        AsyncOp::start(async move { inner.receive(None).await }, force_callback)
    }

    async fn enable_tls(&self, config: &TlsConfig) -> Result<(), TransportError> {
        self.inner.enable_tls(config).await
    }

    async fn disable_tls(&self) -> Result<(), TransportError> {
        self.inner.disable_tls().await
    }

    fn check_connection(&self) -> Result<(), TransportError> {
        let provider = self.inner.provider;
        if self.inner.killed.is_cancelled() {
            return Err(TransportError::not_usable(provider));
        }

        match &self.probe {
            Probe::Tcp(socket) => {
                if let Ok(Some(err)) = socket.take_error() {
                    return Err(TransportError::io_with_code(
                        provider,
                        SniErrorCode::ConnNotUsable,
                        err,
                    ));
                }
                let mut byte = [0u8; 1];
                match socket.peek(&mut byte) {
                    Ok(0) => Err(TransportError::terminated(provider)),
                    Ok(_) => Ok(()),
                    Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(()),
                    Err(e) => Err(TransportError::io_with_code(
                        provider,
                        SniErrorCode::ConnNotUsable,
                        e,
                    )),
                }
            }
            Probe::Pipe => Ok(()),
        }
    }

    fn kill(&self) {
        tracing::debug!(connection_id = %self.id, "transport killed");
        self.inner.killed.cancel();
        if let Probe::Tcp(socket) = &self.probe {
            let _ = socket.shutdown(std::net::Shutdown::Both);
        }
    }

    async fn close(&self) -> Result<(), TransportError> {
        tracing::debug!(connection_id = %self.id, "transport closed");
        self.inner.close().await
    }

    fn set_buffer_size(&self, size: usize) {
        self.inner.buffer_size.store(size.max(1), Ordering::Relaxed);
    }
}
