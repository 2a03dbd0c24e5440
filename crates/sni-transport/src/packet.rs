//! Packet buffer.
//!
//! A [`Packet`] is the unit every transport handle sends and receives. It
//! owns a reusable byte buffer, the number of valid bytes in it and a read
//! cursor, plus an optional completion callback that reports the outcome of
//! an asynchronous send.

use std::fmt;
use std::io::{Read, Write};

use bytes::Buf;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{Provider, TransportError};

/// Default receive buffer size, the default login packet size.
pub const DEFAULT_BUFFER_SIZE: usize = 4096;

/// Callback run once with the result of sending a packet.
pub type CompletionCallback = Box<dyn FnOnce(Result<(), TransportError>) + Send + Sync + 'static>;

/// Byte buffer with a length and a read cursor.
///
/// `0 <= offset <= length <= capacity` holds at all times.
#[derive(Default)]
pub struct Packet {
    data: Vec<u8>,
    length: usize,
    offset: usize,
    completion: Option<CompletionCallback>,
}

impl Packet {
    /// Create an empty packet without a buffer.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty packet with `capacity` bytes of buffer.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        let mut packet = Self::new();
        packet.allocate(capacity);
        packet
    }

    /// Create a packet holding a copy of `data`.
    #[must_use]
    pub fn from_slice(data: &[u8]) -> Self {
        let mut packet = Self::new();
        packet.set_data(data);
        packet
    }

    /// Make room for `capacity` bytes and reset length and offset.
    ///
    /// An existing buffer that is already large enough is reused as is.
    pub fn allocate(&mut self, capacity: usize) {
        if self.data.len() < capacity {
            self.data.resize(capacity, 0);
        }
        self.length = 0;
        self.offset = 0;
    }

    /// Buffer capacity.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    /// Number of valid bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.length
    }

    /// Whether the packet holds no data.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    /// Read cursor position.
    #[must_use]
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// The valid bytes, ignoring the read cursor.
    #[must_use]
    pub fn data(&self) -> &[u8] {
        &self.data[..self.length]
    }

    /// Bytes from the read cursor to the end of the data.
    #[must_use]
    pub fn unread(&self) -> &[u8] {
        &self.data[self.offset..self.length]
    }

    /// Replace the contents with a copy of `src`.
    pub fn set_data(&mut self, src: &[u8]) {
        self.allocate(src.len());
        self.data[..src.len()].copy_from_slice(src);
        self.length = src.len();
    }

    /// Copy the valid bytes out.
    #[must_use]
    pub fn get_data(&self) -> Vec<u8> {
        self.data().to_vec()
    }

    /// Copy up to `dst.len()` bytes from the read cursor into `dst`.
    ///
    /// Returns the number of bytes copied, 0 once the packet is exhausted.
    pub fn take_data(&mut self, dst: &mut [u8]) -> usize {
        let n = dst.len().min(self.length - self.offset);
        if n == 0 {
            return 0;
        }
        dst[..n].copy_from_slice(&self.data[self.offset..self.offset + n]);
        self.offset += n;
        n
    }

    /// Append a copy of `src`, growing the buffer when needed.
    pub fn append_data(&mut self, src: &[u8]) {
        let end = self.length + src.len();
        if self.data.len() < end {
            self.data.resize(end, 0);
        }
        self.data[self.length..end].copy_from_slice(src);
        self.length = end;
    }

    /// Append the valid bytes of another packet.
    pub fn append_packet(&mut self, other: &Packet) {
        self.append_data(other.data());
    }

    /// Fill the packet with one read from `reader`.
    ///
    /// A zero-byte read means the peer closed the connection.
    pub fn read_from_stream<R: Read>(
        &mut self,
        reader: &mut R,
        provider: Provider,
    ) -> Result<(), TransportError> {
        self.prepare_read();
        let n = reader
            .read(&mut self.data)
            .map_err(|e| TransportError::io(provider, e))?;
        self.finish_read(n, provider)
    }

    /// Write the valid bytes to `writer` and flush.
    pub fn write_to_stream<W: Write>(
        &self,
        writer: &mut W,
        provider: Provider,
    ) -> Result<(), TransportError> {
        writer
            .write_all(self.data())
            .and_then(|()| writer.flush())
            .map_err(|e| TransportError::io(provider, e))
    }

    /// Async form of [`read_from_stream`](Self::read_from_stream).
    pub async fn read_from_stream_async<R: AsyncRead + Unpin + ?Sized>(
        &mut self,
        reader: &mut R,
        provider: Provider,
    ) -> Result<(), TransportError> {
        self.prepare_read();
        let n = reader
            .read(&mut self.data)
            .await
            .map_err(|e| TransportError::io(provider, e))?;
        self.finish_read(n, provider)
    }

    /// Async form of [`write_to_stream`](Self::write_to_stream).
    pub async fn write_to_stream_async<W: AsyncWrite + Unpin + ?Sized>(
        &self,
        writer: &mut W,
        provider: Provider,
    ) -> Result<(), TransportError> {
        writer
            .write_all(self.data())
            .await
            .map_err(|e| TransportError::io(provider, e))?;
        writer
            .flush()
            .await
            .map_err(|e| TransportError::io(provider, e))
    }

    fn prepare_read(&mut self) {
        let capacity = if self.data.is_empty() {
            DEFAULT_BUFFER_SIZE
        } else {
            self.data.len()
        };
        self.allocate(capacity);
    }

    fn finish_read(&mut self, n: usize, provider: Provider) -> Result<(), TransportError> {
        if n == 0 {
            return Err(TransportError::terminated(provider));
        }
        self.length = n;
        self.offset = 0;
        Ok(())
    }

    /// Register the callback run by [`invoke_completion`](Self::invoke_completion).
    pub fn set_completion<F>(&mut self, callback: F)
    where
        F: FnOnce(Result<(), TransportError>) + Send + Sync + 'static,
    {
        self.completion = Some(Box::new(callback));
    }

    /// Whether a completion callback is registered and has not run.
    #[must_use]
    pub fn has_completion(&self) -> bool {
        self.completion.is_some()
    }

    /// Run the completion callback, if any. Later calls do nothing.
    pub fn invoke_completion(&mut self, result: Result<(), TransportError>) {
        if let Some(callback) = self.completion.take() {
            callback(result);
        }
    }
}

impl Buf for Packet {
    fn remaining(&self) -> usize {
        self.length - self.offset
    }

    fn chunk(&self) -> &[u8] {
        self.unread()
    }

    fn advance(&mut self, cnt: usize) {
        self.offset = (self.offset + cnt).min(self.length);
    }
}

impl From<Vec<u8>> for Packet {
    fn from(data: Vec<u8>) -> Self {
        let length = data.len();
        Self {
            data,
            length,
            offset: 0,
            completion: None,
        }
    }
}

impl fmt::Debug for Packet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Packet")
            .field("capacity", &self.data.len())
            .field("length", &self.length)
            .field("offset", &self.offset)
            .field("has_completion", &self.completion.is_some())
            .finish()
    }
}
