//! Receive-side frame reassembly.
//!
//! Physical reads do not respect frame boundaries: a single read may end in
//! the middle of a header, carry half a payload, or hold several frames back
//! to back. [`FrameReassembler`] keeps the partial state between reads and
//! hands out whole frames.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::ProtocolError;
use crate::header::{DEFAULT_MAX_FRAME_PAYLOAD, FRAME_HEADER_SIZE, FrameHeader};

/// A complete SMUX frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Frame header.
    pub header: FrameHeader,
    /// Frame payload (excluding header).
    pub payload: Bytes,
}

#[derive(Debug)]
enum State {
    AwaitingHeader {
        buf: [u8; FRAME_HEADER_SIZE],
        filled: usize,
    },
    AwaitingBody {
        header: FrameHeader,
        payload: BytesMut,
    },
}

impl State {
    const fn awaiting_header() -> Self {
        Self::AwaitingHeader {
            buf: [0u8; FRAME_HEADER_SIZE],
            filled: 0,
        }
    }
}

/// Connection-wide frame reassembly state machine.
///
/// Call [`next_frame`](Self::next_frame) repeatedly with the current physical
/// packet until it returns `Ok(None)`, then feed it the next packet. Partial
/// headers and partial payloads survive across calls.
#[derive(Debug)]
pub struct FrameReassembler {
    state: State,
    max_payload: usize,
}

impl FrameReassembler {
    /// Create a reassembler with the default payload limit.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: State::awaiting_header(),
            max_payload: DEFAULT_MAX_FRAME_PAYLOAD,
        }
    }

    /// Set the largest payload a single frame may declare.
    #[must_use]
    pub fn with_max_payload(mut self, max_payload: usize) -> Self {
        self.max_payload = max_payload;
        self
    }

    /// Whether no partial header or payload is buffered.
    #[must_use]
    pub fn is_idle(&self) -> bool {
        matches!(self.state, State::AwaitingHeader { filled: 0, .. })
    }

    /// Discard any partial frame.
    pub fn reset(&mut self) {
        self.state = State::awaiting_header();
    }

    /// Consume bytes from `src` until a frame completes or `src` runs dry.
    ///
    /// Returns `Ok(None)` once `src` is exhausted; whatever was consumed is
    /// kept for the next call. On error the state is reset, but the stream
    /// can no longer be trusted.
    pub fn next_frame<B: Buf>(&mut self, src: &mut B) -> Result<Option<Frame>, ProtocolError> {
        loop {
            let header = match &mut self.state {
                State::AwaitingHeader { buf, filled } => {
                    *filled += copy_available(src, &mut buf[*filled..]);
                    if *filled < FRAME_HEADER_SIZE {
                        return Ok(None);
                    }
                    FrameHeader::decode(&mut &buf[..])
                }
                State::AwaitingBody { header, payload } => {
                    let wanted = header.payload_length() - payload.len();
                    let n = wanted.min(src.remaining());
                    payload.put((&mut *src).take(n));
                    if n < wanted {
                        return Ok(None);
                    }

                    let finished = std::mem::replace(&mut self.state, State::awaiting_header());
                    return Ok(match finished {
                        State::AwaitingBody { header, payload } => {
                            tracing::trace!(
                                session_id = header.session_id,
                                flags = ?header.flags,
                                length = header.length,
                                "reassembled SMUX frame"
                            );
                            Some(Frame {
                                header,
                                payload: payload.freeze(),
                            })
                        }
                        State::AwaitingHeader { .. } => None,
                    });
                }
            };

            let header = match header {
                Ok(header) => header,
                Err(e) => {
                    self.reset();
                    return Err(e);
                }
            };

            let size = header.payload_length();
            if size > self.max_payload {
                self.reset();
                return Err(ProtocolError::FrameTooLarge {
                    size,
                    max: self.max_payload,
                });
            }

            if size == 0 {
                self.reset();
                tracing::trace!(
                    session_id = header.session_id,
                    flags = ?header.flags,
                    "reassembled SMUX frame"
                );
                return Ok(Some(Frame {
                    header,
                    payload: Bytes::new(),
                }));
            }

            self.state = State::AwaitingBody {
                header,
                payload: BytesMut::with_capacity(size),
            };
        }
    }
}

impl Default for FrameReassembler {
    fn default() -> Self {
        Self::new()
    }
}

fn copy_available<B: Buf>(src: &mut B, dst: &mut [u8]) -> usize {
    let n = dst.len().min(src.remaining());
    src.copy_to_slice(&mut dst[..n]);
    n
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::header::FrameFlags;

    fn frame_bytes(flags: FrameFlags, session_id: u16, seq: u32, payload: &[u8]) -> Vec<u8> {
        let header = FrameHeader::new(flags, session_id, payload.len() as u32, seq, 4);
        let mut out = header.encode_to_array().to_vec();
        out.extend_from_slice(payload);
        out
    }

    #[test]
    fn test_single_frame_in_one_read() {
        let wire = frame_bytes(FrameFlags::Data, 1, 1, b"abc");
        let mut reassembler = FrameReassembler::new();
        let mut cursor = wire.as_slice();

        let frame = reassembler.next_frame(&mut cursor).unwrap().unwrap();
        assert_eq!(frame.header.session_id, 1);
        assert_eq!(&frame.payload[..], b"abc");
        assert!(reassembler.next_frame(&mut cursor).unwrap().is_none());
        assert!(reassembler.is_idle());
    }

    #[test]
    fn test_header_split_across_reads() {
        let wire = frame_bytes(FrameFlags::Data, 9, 1, b"payload");
        let mut reassembler = FrameReassembler::new();

        let mut first = &wire[..5];
        assert!(reassembler.next_frame(&mut first).unwrap().is_none());
        assert!(!reassembler.is_idle());

        let mut second = &wire[5..12];
        assert!(reassembler.next_frame(&mut second).unwrap().is_none());

        let mut rest = &wire[12..];
        let frame = reassembler.next_frame(&mut rest).unwrap().unwrap();
        assert_eq!(frame.header.session_id, 9);
        assert_eq!(&frame.payload[..], b"payload");
    }

    #[test]
    fn test_body_spans_many_reads() {
        let payload: Vec<u8> = (0..=255u8).collect();
        let wire = frame_bytes(FrameFlags::Data, 2, 1, &payload);
        let mut reassembler = FrameReassembler::new();

        let mut frames = Vec::new();
        for chunk in wire.chunks(7) {
            let mut cursor = chunk;
            while let Some(frame) = reassembler.next_frame(&mut cursor).unwrap() {
                frames.push(frame);
            }
        }

        assert_eq!(frames.len(), 1);
        assert_eq!(&frames[0].payload[..], payload.as_slice());
    }

    #[test]
    fn test_multiple_frames_in_one_read() {
        let mut wire = frame_bytes(FrameFlags::Data, 1, 1, b"one");
        wire.extend(frame_bytes(FrameFlags::Ack, 2, 0, b""));
        wire.extend(frame_bytes(FrameFlags::Data, 3, 1, b"three"));

        let mut reassembler = FrameReassembler::new();
        let mut cursor = wire.as_slice();

        let first = reassembler.next_frame(&mut cursor).unwrap().unwrap();
        let second = reassembler.next_frame(&mut cursor).unwrap().unwrap();
        let third = reassembler.next_frame(&mut cursor).unwrap().unwrap();

        assert_eq!(&first.payload[..], b"one");
        assert_eq!(second.header.flags, FrameFlags::Ack);
        assert!(second.payload.is_empty());
        assert_eq!(third.header.session_id, 3);
        assert!(reassembler.next_frame(&mut cursor).unwrap().is_none());
    }

    #[test]
    fn test_fin_payload_is_consumed() {
        let mut wire = frame_bytes(FrameFlags::Fin, 1, 0, b"junk");
        wire.extend(frame_bytes(FrameFlags::Data, 2, 1, b"ok"));

        let mut reassembler = FrameReassembler::new();
        let mut cursor = wire.as_slice();

        let fin = reassembler.next_frame(&mut cursor).unwrap().unwrap();
        assert_eq!(fin.header.flags, FrameFlags::Fin);
        let data = reassembler.next_frame(&mut cursor).unwrap().unwrap();
        assert_eq!(&data.payload[..], b"ok");
    }

    #[test]
    fn test_oversized_frame_rejected() {
        let wire = frame_bytes(FrameFlags::Data, 1, 1, &[0u8; 64]);
        let mut reassembler = FrameReassembler::new().with_max_payload(32);
        let mut cursor = wire.as_slice();

        let err = reassembler.next_frame(&mut cursor).unwrap_err();
        assert_eq!(err, ProtocolError::FrameTooLarge { size: 64, max: 32 });
        assert!(reassembler.is_idle());
    }

    #[test]
    fn test_malformed_header_resets_state() {
        let mut wire = frame_bytes(FrameFlags::Data, 1, 1, b"x");
        wire[0] = 0xFF;
        let mut reassembler = FrameReassembler::new();
        let mut cursor = wire.as_slice();

        assert!(reassembler.next_frame(&mut cursor).is_err());
        assert!(reassembler.is_idle());
    }
}
