//! Pre-login framing shim for the TLS handshake.
//!
//! The TLS handshake records are carried inside pre-login packets. This shim
//! sits between the TLS engine and the raw transport stream, framing writes
//! and unframing reads until [`PreloginShim::finish_handshake`] flips it into
//! a transparent pass-through. The switch is one-way.

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll, ready};

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

/// Pre-login packet header size.
pub const PRELOGIN_HEADER_SIZE: usize = 8;

/// Packet type for pre-login packets.
const PACKET_TYPE_PRELOGIN: u8 = 0x12;

/// Packet status for end of message.
const PACKET_STATUS_EOM: u8 = 0x01;

/// Stream wrapper that frames TLS handshake traffic in pre-login packets.
///
/// During the handshake it:
/// - buffers outgoing TLS bytes and emits them as one pre-login packet per flush
/// - strips pre-login headers from incoming packets before handing the
///   payload to TLS
///
/// The framing is symmetric, so a test server can wrap its side in the same
/// shim.
#[derive(Debug)]
pub struct PreloginShim<S> {
    stream: S,
    handshake_pending: bool,

    // Read state
    header_buf: [u8; PRELOGIN_HEADER_SIZE],
    header_pos: usize,
    read_remaining: usize,
    scratch: Vec<u8>,

    // Write state
    write_buf: Vec<u8>,
    write_pos: usize,
    header_written: bool,
}

impl<S> PreloginShim<S> {
    /// Wrap a raw stream for the handshake.
    pub fn new(stream: S) -> Self {
        Self {
            stream,
            handshake_pending: true,
            header_buf: [0u8; PRELOGIN_HEADER_SIZE],
            header_pos: 0,
            read_remaining: 0,
            scratch: Vec::new(),
            write_buf: vec![0u8; PRELOGIN_HEADER_SIZE],
            write_pos: PRELOGIN_HEADER_SIZE,
            header_written: false,
        }
    }

    /// Stop framing; every later read and write goes straight to the stream.
    pub fn finish_handshake(&mut self) {
        self.handshake_pending = false;
        self.write_buf = Vec::new();
        self.scratch = Vec::new();
    }

    /// Whether the shim still frames traffic.
    #[must_use]
    pub fn is_handshake_pending(&self) -> bool {
        self.handshake_pending
    }

    /// Get a reference to the underlying stream.
    pub fn get_ref(&self) -> &S {
        &self.stream
    }

    /// Get a mutable reference to the underlying stream.
    pub fn get_mut(&mut self) -> &mut S {
        &mut self.stream
    }

    /// Consume the shim and return the underlying stream.
    pub fn into_inner(self) -> S {
        self.stream
    }
}

impl<S: AsyncRead + Unpin> AsyncRead for PreloginShim<S> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();

        if !this.handshake_pending {
            return Pin::new(&mut this.stream).poll_read(cx, buf);
        }

        loop {
            while this.header_pos < PRELOGIN_HEADER_SIZE {
                let mut header_buf = ReadBuf::new(&mut this.header_buf[this.header_pos..]);
                ready!(Pin::new(&mut this.stream).poll_read(cx, &mut header_buf))?;
                let n = header_buf.filled().len();
                if n == 0 {
                    return Poll::Ready(Ok(()));
                }
                this.header_pos += n;
                if this.header_pos == PRELOGIN_HEADER_SIZE {
                    let packet_type = this.header_buf[0];
                    if packet_type != PACKET_TYPE_PRELOGIN {
                        return Poll::Ready(Err(io::Error::new(
                            io::ErrorKind::InvalidData,
                            format!("expected pre-login packet (0x12), got 0x{packet_type:02X}"),
                        )));
                    }
                    let length =
                        u16::from_be_bytes([this.header_buf[2], this.header_buf[3]]) as usize;
                    this.read_remaining = length.saturating_sub(PRELOGIN_HEADER_SIZE);
                    tracing::trace!(payload = this.read_remaining, "pre-login shim: packet header");
                }
            }

            if this.read_remaining == 0 {
                // Empty packet; move on to the next header.
                this.header_pos = 0;
                continue;
            }

            let max_read = this.read_remaining.min(buf.remaining());
            if max_read == 0 {
                return Poll::Ready(Ok(()));
            }

            this.scratch.resize(max_read, 0);
            let mut scratch = ReadBuf::new(&mut this.scratch[..max_read]);
            ready!(Pin::new(&mut this.stream).poll_read(cx, &mut scratch))?;
            let n = scratch.filled().len();
            if n == 0 {
                return Poll::Ready(Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "connection closed inside a pre-login packet",
                )));
            }
            buf.put_slice(&this.scratch[..n]);
            this.read_remaining -= n;
            if this.read_remaining == 0 {
                this.header_pos = 0;
            }
            return Poll::Ready(Ok(()));
        }
    }
}

impl<S: AsyncWrite + Unpin> AsyncWrite for PreloginShim<S> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();

        if !this.handshake_pending {
            return Pin::new(&mut this.stream).poll_write(cx, buf);
        }

        // Framed on flush
        this.write_buf.extend_from_slice(buf);
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();

        if this.handshake_pending && this.write_buf.len() > PRELOGIN_HEADER_SIZE {
            if !this.header_written {
                let total_length = this.write_buf.len();
                let wire_length = u16::try_from(total_length).map_err(|_| {
                    io::Error::new(
                        io::ErrorKind::InvalidInput,
                        format!("handshake flight of {total_length} bytes exceeds one pre-login packet"),
                    )
                })?;

                this.write_buf[0] = PACKET_TYPE_PRELOGIN;
                this.write_buf[1] = PACKET_STATUS_EOM;
                this.write_buf[2..4].copy_from_slice(&wire_length.to_be_bytes());
                this.write_buf[4] = 0; // SPID
                this.write_buf[5] = 0; // SPID
                this.write_buf[6] = 1; // Packet ID
                this.write_buf[7] = 0; // Window

                this.header_written = true;
                this.write_pos = 0;

                tracing::trace!(length = total_length, "pre-login shim: sending packet");
            }

            while this.write_pos < this.write_buf.len() {
                let n = ready!(
                    Pin::new(&mut this.stream).poll_write(cx, &this.write_buf[this.write_pos..])
                )?;
                if n == 0 {
                    return Poll::Ready(Err(io::ErrorKind::WriteZero.into()));
                }
                this.write_pos += n;
            }

            this.write_buf.truncate(PRELOGIN_HEADER_SIZE);
            this.write_pos = PRELOGIN_HEADER_SIZE;
            this.header_written = false;
        }

        Pin::new(&mut this.stream).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().stream).poll_shutdown(cx)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[tokio::test]
    async fn test_writes_are_framed_on_flush() {
        let mock = tokio_test::io::Builder::new()
            .write(&[0x12, 0x01, 0x00, 0x0B, 0x00, 0x00, 0x01, 0x00, b'a', b'b', b'c'])
            .build();
        let mut shim = PreloginShim::new(mock);

        shim.write_all(b"ab").await.unwrap();
        shim.write_all(b"c").await.unwrap();
        shim.flush().await.unwrap();
    }

    #[tokio::test]
    async fn test_reads_are_unframed() {
        let mock = tokio_test::io::Builder::new()
            .read(&[0x12, 0x01, 0x00, 0x0A])
            .read(&[0x00, 0x00, 0x01, 0x00, b'h', b'i'])
            .read(&[0x12, 0x01, 0x00, 0x09, 0x00, 0x00, 0x01, 0x00, b'!'])
            .build();
        let mut shim = PreloginShim::new(mock);

        let mut out = [0u8; 3];
        shim.read_exact(&mut out).await.unwrap();
        assert_eq!(&out, b"hi!");
    }

    #[tokio::test]
    async fn test_rejects_foreign_packet_type() {
        let mock = tokio_test::io::Builder::new()
            .read(&[0x04, 0x01, 0x00, 0x09, 0x00, 0x00, 0x01, 0x00])
            .build();
        let mut shim = PreloginShim::new(mock);

        let mut out = [0u8; 1];
        let err = shim.read(&mut out).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[tokio::test]
    async fn test_pass_through_after_finish() {
        let mock = tokio_test::io::Builder::new()
            .write(b"raw")
            .read(b"back")
            .build();
        let mut shim = PreloginShim::new(mock);
        shim.finish_handshake();
        assert!(!shim.is_handshake_pending());

        shim.write_all(b"raw").await.unwrap();
        shim.flush().await.unwrap();
        let mut out = [0u8; 4];
        shim.read_exact(&mut out).await.unwrap();
        assert_eq!(&out, b"back");
    }
}
