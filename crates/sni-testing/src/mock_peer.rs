//! Mock SMUX peer.
//!
//! The peer plays the server side of a multiplexed connection. Tests accept
//! the client's TCP connection, then read and write individual frames so
//! every flow-control step is explicit.

use std::net::SocketAddr;
use std::time::Duration;

use bytes::BytesMut;
use sni_protocol::{Frame, FrameFlags, FrameHeader, FrameReassembler, ProtocolError};
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

/// Error type for mock peer operations.
#[derive(Debug, Error)]
pub enum MockPeerError {
    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The client sent bytes that are not a valid frame.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// The client closed the connection.
    #[error("connection closed by client")]
    Closed,

    /// A frame arrived that the test did not expect.
    #[error("unexpected frame: {0}")]
    Unexpected(String),
}

/// Result type for mock peer operations.
pub type Result<T> = std::result::Result<T, MockPeerError>;

/// Listening side of the mock peer.
#[derive(Debug)]
pub struct MockSmuxPeer {
    listener: TcpListener,
    addr: SocketAddr,
}

impl MockSmuxPeer {
    /// Bind to an ephemeral loopback port.
    pub async fn bind() -> Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        Ok(Self { listener, addr })
    }

    /// Get the listening address.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Server spec a client transport can connect to.
    pub fn server_spec(&self) -> String {
        format!("tcp:{},{}", self.addr.ip(), self.addr.port())
    }

    /// Accept the next client connection.
    pub async fn accept(&self) -> Result<PeerConnection> {
        let (stream, peer) = self.listener.accept().await?;
        stream.set_nodelay(true)?;
        tracing::debug!(%peer, "mock peer accepted connection");
        Ok(PeerConnection::new(stream))
    }
}

/// One accepted client connection.
#[derive(Debug)]
pub struct PeerConnection {
    stream: TcpStream,
    reassembler: FrameReassembler,
    read_buf: BytesMut,
}

impl PeerConnection {
    fn new(stream: TcpStream) -> Self {
        Self {
            stream,
            reassembler: FrameReassembler::new(),
            read_buf: BytesMut::with_capacity(8192),
        }
    }

    /// Read the next complete frame.
    pub async fn read_frame(&mut self) -> Result<Frame> {
        loop {
            if let Some(frame) = self.reassembler.next_frame(&mut self.read_buf)? {
                tracing::trace!(
                    session = frame.header.session_id,
                    flags = ?frame.header.flags,
                    seq = frame.header.sequence_number,
                    highwater = frame.header.highwater,
                    "mock peer: frame in"
                );
                return Ok(frame);
            }
            let n = self.stream.read_buf(&mut self.read_buf).await?;
            if n == 0 {
                return Err(MockPeerError::Closed);
            }
        }
    }

    /// Read the next frame, or `None` if nothing arrives within `wait`.
    pub async fn read_frame_timeout(&mut self, wait: Duration) -> Result<Option<Frame>> {
        match tokio::time::timeout(wait, self.read_frame()).await {
            Ok(frame) => frame.map(Some),
            Err(_) => Ok(None),
        }
    }

    /// Read the next frame and require it to carry `flags`.
    pub async fn expect_frame(&mut self, flags: FrameFlags) -> Result<Frame> {
        let frame = self.read_frame().await?;
        if frame.header.flags != flags {
            return Err(MockPeerError::Unexpected(format!(
                "expected {flags:?}, got {:?} for session {}",
                frame.header.flags, frame.header.session_id
            )));
        }
        Ok(frame)
    }

    /// Write one frame with the given header fields.
    pub async fn write_frame(
        &mut self,
        flags: FrameFlags,
        session_id: u16,
        sequence_number: u32,
        highwater: u32,
        payload: &[u8],
    ) -> Result<()> {
        let length = u32::try_from(payload.len())
            .map_err(|_| MockPeerError::Unexpected("payload too large".into()))?;
        let header = FrameHeader::new(flags, session_id, length, sequence_number, highwater);
        let mut wire = BytesMut::with_capacity(header.length as usize);
        header.encode(&mut wire);
        wire.extend_from_slice(payload);
        self.write_raw(&wire).await
    }

    /// Send a DATA frame.
    pub async fn send_data(
        &mut self,
        session_id: u16,
        sequence_number: u32,
        highwater: u32,
        payload: &[u8],
    ) -> Result<()> {
        self.write_frame(FrameFlags::Data, session_id, sequence_number, highwater, payload)
            .await
    }

    /// Send an ACK frame granting credit up to `highwater`.
    pub async fn send_ack(
        &mut self,
        session_id: u16,
        sequence_number: u32,
        highwater: u32,
    ) -> Result<()> {
        self.write_frame(FrameFlags::Ack, session_id, sequence_number, highwater, &[])
            .await
    }

    /// Send a FIN frame.
    pub async fn send_fin(
        &mut self,
        session_id: u16,
        sequence_number: u32,
        highwater: u32,
    ) -> Result<()> {
        self.write_frame(FrameFlags::Fin, session_id, sequence_number, highwater, &[])
            .await
    }

    /// Write raw bytes, bypassing framing.
    pub async fn write_raw(&mut self, bytes: &[u8]) -> Result<()> {
        self.stream.write_all(bytes).await?;
        self.stream.flush().await?;
        Ok(())
    }

    /// Consume the connection and return the socket.
    pub fn into_inner(self) -> TcpStream {
        self.stream
    }
}
