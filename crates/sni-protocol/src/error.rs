//! Protocol error types.

use thiserror::Error;

/// Errors raised while decoding SMUX frames.
///
/// Any of these on a live connection is a protocol violation: the peer and
/// the local reassembly state no longer agree on frame boundaries.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum ProtocolError {
    /// Not enough bytes to decode a frame header.
    #[error("incomplete frame header: expected {expected} bytes, got {actual}")]
    IncompleteHeader {
        /// Bytes required.
        expected: usize,
        /// Bytes available.
        actual: usize,
    },

    /// The first header byte is not the SMUX marker.
    #[error("invalid SMUX identifier: 0x{0:02X}")]
    InvalidIdentifier(u8),

    /// The flags byte is not one of SYN, ACK, FIN or DATA.
    #[error("invalid frame flags: 0x{0:02X}")]
    InvalidFlags(u8),

    /// The declared frame length is shorter than the header.
    #[error("frame length {0} is shorter than the frame header")]
    InvalidLength(u32),

    /// The declared payload exceeds the configured maximum.
    #[error("frame payload of {size} bytes exceeds maximum of {max}")]
    FrameTooLarge {
        /// Declared payload size.
        size: usize,
        /// Maximum accepted payload size.
        max: usize,
    },
}
