//! SMUX frame header definitions.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::ProtocolError;

/// SMUX frame header size in bytes.
pub const FRAME_HEADER_SIZE: usize = 16;

/// Marker byte that opens every SMUX frame.
pub const SMUX_IDENTIFIER: u8 = 0x53;

/// Default upper bound on a single frame's payload.
pub const DEFAULT_MAX_FRAME_PAYLOAD: usize = 65535;

/// SMUX frame flags.
///
/// Exactly one flag is set on every frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum FrameFlags {
    /// Opens a session.
    Syn = 0x01,
    /// Grants credit without carrying data.
    Ack = 0x02,
    /// Closes a session.
    Fin = 0x04,
    /// Carries one payload.
    Data = 0x08,
}

impl FrameFlags {
    /// Create frame flags from a raw byte value.
    pub fn from_u8(value: u8) -> Result<Self, ProtocolError> {
        match value {
            0x01 => Ok(Self::Syn),
            0x02 => Ok(Self::Ack),
            0x04 => Ok(Self::Fin),
            0x08 => Ok(Self::Data),
            _ => Err(ProtocolError::InvalidFlags(value)),
        }
    }
}

/// SMUX frame header.
///
/// The SMUX marker byte is implied: it is written by [`encode`](Self::encode)
/// and checked by [`decode`](Self::decode).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    /// Frame kind.
    pub flags: FrameFlags,
    /// Logical session the frame belongs to.
    pub session_id: u16,
    /// Total frame length including this header.
    pub length: u32,
    /// Per-session sequence number.
    pub sequence_number: u32,
    /// Sender's current receive highwater.
    pub highwater: u32,
}

impl FrameHeader {
    /// Create a header for a frame carrying `payload_length` bytes.
    #[must_use]
    pub const fn new(
        flags: FrameFlags,
        session_id: u16,
        payload_length: u32,
        sequence_number: u32,
        highwater: u32,
    ) -> Self {
        Self {
            flags,
            session_id,
            length: payload_length.saturating_add(FRAME_HEADER_SIZE as u32),
            sequence_number,
            highwater,
        }
    }

    /// Parse a frame header from bytes.
    pub fn decode(src: &mut impl Buf) -> Result<Self, ProtocolError> {
        if src.remaining() < FRAME_HEADER_SIZE {
            return Err(ProtocolError::IncompleteHeader {
                expected: FRAME_HEADER_SIZE,
                actual: src.remaining(),
            });
        }

        let identifier = src.get_u8();
        if identifier != SMUX_IDENTIFIER {
            return Err(ProtocolError::InvalidIdentifier(identifier));
        }
        let flags = FrameFlags::from_u8(src.get_u8())?;
        let session_id = src.get_u16_le();
        let length = src.get_u32_le();
        let sequence_number = src.get_u32_le();
        let highwater = src.get_u32_le();

        if (length as usize) < FRAME_HEADER_SIZE {
            return Err(ProtocolError::InvalidLength(length));
        }

        Ok(Self {
            flags,
            session_id,
            length,
            sequence_number,
            highwater,
        })
    }

    /// Encode the frame header to bytes.
    pub fn encode(&self, dst: &mut impl BufMut) {
        dst.put_u8(SMUX_IDENTIFIER);
        dst.put_u8(self.flags as u8);
        dst.put_u16_le(self.session_id);
        dst.put_u32_le(self.length);
        dst.put_u32_le(self.sequence_number);
        dst.put_u32_le(self.highwater);
    }

    /// Encode the frame header into a fixed-size array.
    #[must_use]
    pub fn encode_to_array(&self) -> [u8; FRAME_HEADER_SIZE] {
        let mut out = [0u8; FRAME_HEADER_SIZE];
        self.encode(&mut &mut out[..]);
        out
    }

    /// Encode the frame header to a new `Bytes` buffer.
    #[must_use]
    pub fn encode_to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(FRAME_HEADER_SIZE);
        self.encode(&mut buf);
        buf.freeze()
    }

    /// Get the payload length (total length minus header).
    #[must_use]
    pub const fn payload_length(&self) -> usize {
        (self.length as usize).saturating_sub(FRAME_HEADER_SIZE)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_header_roundtrip() {
        let header = FrameHeader::new(FrameFlags::Data, 3, 100, 17, 21);

        let bytes = header.encode_to_bytes();
        assert_eq!(bytes.len(), FRAME_HEADER_SIZE);

        let mut cursor = bytes.as_ref();
        let decoded = FrameHeader::decode(&mut cursor).unwrap();
        assert_eq!(header, decoded);
        assert_eq!(decoded.length, 116);
        assert_eq!(decoded.payload_length(), 100);
    }

    #[test]
    fn test_wire_layout_is_little_endian() {
        let header = FrameHeader::new(FrameFlags::Ack, 0x0102, 0, 0x0A0B0C0D, 8);
        let bytes = header.encode_to_array();

        assert_eq!(
            bytes,
            [
                0x53, 0x02, 0x02, 0x01, 0x10, 0x00, 0x00, 0x00, 0x0D, 0x0C, 0x0B, 0x0A, 0x08,
                0x00, 0x00, 0x00
            ]
        );
    }

    #[test]
    fn test_decode_rejects_bad_identifier() {
        let mut bytes = FrameHeader::new(FrameFlags::Syn, 1, 0, 0, 4).encode_to_array();
        bytes[0] = 0x54;
        let err = FrameHeader::decode(&mut &bytes[..]).unwrap_err();
        assert_eq!(err, ProtocolError::InvalidIdentifier(0x54));
    }

    #[test]
    fn test_decode_rejects_combined_flags() {
        let mut bytes = FrameHeader::new(FrameFlags::Syn, 1, 0, 0, 4).encode_to_array();
        bytes[1] = 0x03;
        let err = FrameHeader::decode(&mut &bytes[..]).unwrap_err();
        assert_eq!(err, ProtocolError::InvalidFlags(0x03));
    }

    #[test]
    fn test_decode_rejects_short_length() {
        let mut bytes = FrameHeader::new(FrameFlags::Data, 1, 0, 1, 4).encode_to_array();
        bytes[4] = 15;
        let err = FrameHeader::decode(&mut &bytes[..]).unwrap_err();
        assert_eq!(err, ProtocolError::InvalidLength(15));
    }

    #[test]
    fn test_decode_incomplete() {
        let bytes = [SMUX_IDENTIFIER, 0x08, 0x00];
        let err = FrameHeader::decode(&mut &bytes[..]).unwrap_err();
        assert!(matches!(
            err,
            ProtocolError::IncompleteHeader {
                expected: 16,
                actual: 3
            }
        ));
    }

    #[test]
    fn test_flags_from_u8() {
        assert_eq!(FrameFlags::from_u8(0x01).unwrap(), FrameFlags::Syn);
        assert_eq!(FrameFlags::from_u8(0x08).unwrap(), FrameFlags::Data);
        assert!(FrameFlags::from_u8(0x00).is_err());
        assert!(FrameFlags::from_u8(0x10).is_err());
    }

    proptest! {
        #[test]
        fn decode_never_panics(bytes in proptest::collection::vec(any::<u8>(), 0..64)) {
            let mut cursor = bytes.as_slice();
            let _ = FrameHeader::decode(&mut cursor);
        }
    }
}
