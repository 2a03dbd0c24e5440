//! # sni-protocol
//!
//! Pure implementation of the session multiplexing (SMUX) framing used by
//! MARS connections.
//!
//! Every payload exchanged on a multiplexed connection travels inside a frame
//! that starts with a 16-byte little-endian header:
//!
//! ```text
//! +------+-------+------------+----------+----------+-----------+
//! | 0x53 | flags | session id |  length  | sequence | highwater |
//! |  u8  |  u8   |    u16     |   u32    |   u32    |    u32    |
//! +------+-------+------------+----------+----------+-----------+
//! ```
//!
//! `length` counts the header itself, so the payload is `length - 16` bytes.
//!
//! ## Design Philosophy
//!
//! This crate is intentionally IO-agnostic. It contains no networking logic and
//! makes no assumptions about the async runtime. The reassembly state machine
//! consumes any [`bytes::Buf`], so higher-level crates feed it whatever their
//! physical reads produced.
//!
//! ## Example
//!
//! ```rust
//! use sni_protocol::{FrameFlags, FrameHeader, FrameReassembler};
//!
//! let header = FrameHeader::new(FrameFlags::Data, 7, 5, 1, 4);
//! let mut wire = header.encode_to_array().to_vec();
//! wire.extend_from_slice(b"hello");
//!
//! let mut reassembler = FrameReassembler::new();
//! let mut cursor = wire.as_slice();
//! let frame = reassembler.next_frame(&mut cursor).unwrap().unwrap();
//! assert_eq!(frame.header.session_id, 7);
//! assert_eq!(&frame.payload[..], b"hello");
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod error;
pub mod header;
pub mod reassembly;

pub use error::ProtocolError;
pub use header::{
    DEFAULT_MAX_FRAME_PAYLOAD, FRAME_HEADER_SIZE, FrameFlags, FrameHeader, SMUX_IDENTIFIER,
};
pub use reassembly::{Frame, FrameReassembler};
