//! Frame codec
//!
//! Every frame on the wire starts with a fixed 7-byte header:
//!
//! | Offset | Size | Field          |
//! |--------|------|----------------|
//! | 0      | 2    | declared size  |
//! | 2      | 1    | reserved (0)   |
//! | 3      | 2    | opcode         |
//! | 5      | 2    | sequence index |
//!
//! All fields are big-endian. The declared size excludes the size field
//! itself, so a frame occupies `declared_size + 2` bytes.

use bytes::{BufMut, BytesMut};

use crate::error::ProtocolError;

/// Size of the frame header in bytes
pub const HEADER_SIZE: usize = 7;

/// Bytes of the header not counted by the declared size (the size field)
pub const SIZE_FIELD_LEN: usize = 2;

/// Smallest legal declared size: reserved byte + opcode + sequence
pub const MIN_DECLARED_SIZE: usize = HEADER_SIZE - SIZE_FIELD_LEN;

/// Largest payload that still fits a 16-bit declared size
pub const MAX_PAYLOAD_SIZE: usize = u16::MAX as usize - MIN_DECLARED_SIZE;

#[inline]
fn read_u16(offset: usize, buffer: &[u8]) -> u16 {
    u16::from_be_bytes([buffer[offset], buffer[offset + 1]])
}

/// Read the declared size at `offset`.
///
/// The caller guarantees `offset + 2 <= buffer.len()`.
#[inline]
pub fn decode_size(offset: usize, buffer: &[u8]) -> u16 {
    read_u16(offset, buffer)
}

/// Read the opcode at `offset`, skipping the reserved byte.
///
/// The caller guarantees `offset + 5 <= buffer.len()`.
#[inline]
pub fn decode_opcode(offset: usize, buffer: &[u8]) -> u16 {
    read_u16(offset + 3, buffer)
}

/// Read the sequence index at `offset`.
///
/// The caller guarantees `offset + HEADER_SIZE <= buffer.len()`.
#[inline]
pub fn decode_sequence(offset: usize, buffer: &[u8]) -> u16 {
    read_u16(offset + 5, buffer)
}

/// Number of bytes a frame with the given declared size occupies on the wire
#[inline]
pub fn frame_total_size(declared_size: u16) -> usize {
    declared_size as usize + SIZE_FIELD_LEN
}

/// Decoded frame header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    /// Declared size as read from the wire
    pub declared_size: u16,
    /// Packet opcode
    pub opcode: u16,
    /// Client sequence index
    pub sequence: u16,
}

impl FrameHeader {
    /// Parse the header at `offset`, checking that both the header and the
    /// whole frame lie within the first `n` bytes of `buffer`.
    pub fn parse(buffer: &[u8], offset: usize, n: usize) -> Result<Self, ProtocolError> {
        let end = n.min(buffer.len());
        let available = end.saturating_sub(offset);
        if available < HEADER_SIZE {
            return Err(ProtocolError::TruncatedHeader { offset, available });
        }

        let header = Self {
            declared_size: decode_size(offset, buffer),
            opcode: decode_opcode(offset, buffer),
            sequence: decode_sequence(offset, buffer),
        };

        if (header.declared_size as usize) < MIN_DECLARED_SIZE {
            return Err(ProtocolError::InvalidFrameSize {
                size: header.declared_size as usize,
                min: MIN_DECLARED_SIZE,
            });
        }

        let needed = header.total_size();
        if available < needed {
            return Err(ProtocolError::TruncatedFrame {
                offset,
                needed,
                available,
            });
        }

        Ok(header)
    }

    /// Bytes this frame occupies on the wire
    #[inline]
    pub fn total_size(&self) -> usize {
        frame_total_size(self.declared_size)
    }

    /// Payload length
    #[inline]
    pub fn payload_len(&self) -> usize {
        self.total_size() - HEADER_SIZE
    }
}

/// Append a frame header for a payload of `payload_len` bytes
pub fn encode_header(
    out: &mut BytesMut,
    opcode: u16,
    payload_len: usize,
    sequence: u16,
) -> Result<(), ProtocolError> {
    if payload_len > MAX_PAYLOAD_SIZE {
        return Err(ProtocolError::PayloadTooLarge {
            size: payload_len,
            max: MAX_PAYLOAD_SIZE,
        });
    }
    out.reserve(HEADER_SIZE);
    out.put_u16((payload_len + MIN_DECLARED_SIZE) as u16);
    out.put_u8(0);
    out.put_u16(opcode);
    out.put_u16(sequence);
    Ok(())
}

/// Append a complete frame (header and payload)
pub fn encode_frame(
    out: &mut BytesMut,
    opcode: u16,
    payload: &[u8],
    sequence: u16,
) -> Result<usize, ProtocolError> {
    encode_header(out, opcode, payload.len(), sequence)?;
    out.extend_from_slice(payload);
    Ok(HEADER_SIZE + payload.len())
}
