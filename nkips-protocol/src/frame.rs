//! `PAS2` envelope used for every frame sent to the gateway.
//!
//! Frame layout (6 bytes header + payload + 2 bytes checksum):
//!
//! ```text
//! +-----------+-------+--------------+----------+
//! |   magic   |  len  |   payload    |  crc16   |
//! |  "PAS2\0" | 1 byte| len - 2 bytes|  2 bytes |
//! +-----------+-------+--------------+----------+
//! ```
//!
//! `len` counts the payload plus the checksum. The checksum covers the
//! payload only and is written byte-swapped (see [`crate::crc`]).

use crate::crc::crc16;
use crate::error::ProtocolError;
use bytes::{Buf, BufMut, Bytes, BytesMut};

/// Magic bytes opening every outbound frame: "PAS2" followed by a zero byte.
pub const MAGIC: [u8; 5] = *b"PAS2\0";

/// Size of the fixed frame header in bytes (5 magic + 1 length).
pub const FRAME_HEADER_SIZE: usize = 6;

/// Size of the trailing checksum in bytes.
pub const CHECKSUM_SIZE: usize = 2;

/// Largest payload whose length still fits the one-byte length field.
pub const MAX_PAYLOAD_SIZE: usize = u8::MAX as usize - CHECKSUM_SIZE;

/// A parsed `PAS2` frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Frame payload (an `NK2` message).
    pub payload: Bytes,
}

impl Frame {
    /// Creates a new frame with the given payload.
    pub fn new(payload: impl Into<Bytes>) -> Self {
        Self {
            payload: payload.into(),
        }
    }

    /// Encodes the frame into bytes.
    pub fn encode(&self) -> Result<BytesMut, ProtocolError> {
        let payload_len = self.payload.len();
        if payload_len > MAX_PAYLOAD_SIZE {
            return Err(ProtocolError::FrameTooLarge {
                size: payload_len,
                max: MAX_PAYLOAD_SIZE,
            });
        }

        let mut buf = BytesMut::with_capacity(FRAME_HEADER_SIZE + payload_len + CHECKSUM_SIZE);

        // Magic (5 bytes)
        buf.put_slice(&MAGIC);

        // Length of payload + checksum (1 byte)
        buf.put_u8((payload_len + CHECKSUM_SIZE) as u8);

        // Payload
        buf.put_slice(&self.payload);

        // Checksum (2 bytes)
        buf.put_u16(crc16(&self.payload));

        Ok(buf)
    }

    /// Decodes a frame from bytes.
    ///
    /// Returns `Ok(Some(frame))` if a complete frame was decoded,
    /// `Ok(None)` if more data is needed, or `Err` on protocol errors.
    pub fn decode(buf: &mut BytesMut) -> Result<Option<Self>, ProtocolError> {
        if buf.len() < FRAME_HEADER_SIZE {
            return Ok(None);
        }

        let mut magic = [0u8; 5];
        magic.copy_from_slice(&buf[..MAGIC.len()]);
        if magic != MAGIC {
            return Err(ProtocolError::InvalidMagic(magic));
        }

        let body_len = buf[MAGIC.len()] as usize;
        if body_len < CHECKSUM_SIZE {
            return Err(ProtocolError::Truncated {
                len: FRAME_HEADER_SIZE + body_len,
                min: FRAME_HEADER_SIZE + CHECKSUM_SIZE,
            });
        }

        if buf.len() < FRAME_HEADER_SIZE + body_len {
            return Ok(None);
        }

        // Consume header
        buf.advance(FRAME_HEADER_SIZE);

        let payload = buf.split_to(body_len - CHECKSUM_SIZE).freeze();
        let expected = buf.get_u16();

        let actual = crc16(&payload);
        if actual != expected {
            return Err(ProtocolError::ChecksumMismatch { expected, actual });
        }

        Ok(Some(Self { payload }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const INIT_FRAME: [u8; 23] = [
        0x50, 0x41, 0x53, 0x32, 0x00, 0x11, 0x4e, 0x4b, 0x32, 0x00, 0xfe, 0x02, 0x08, 0x00, 0x00,
        0x00, 0x47, 0xff, 0xff, 0xff, 0xff, 0xc7, 0x08,
    ];

    #[test]
    fn test_encode_matches_device_capture() {
        let frame = Frame::new(Bytes::copy_from_slice(&INIT_FRAME[6..21]));
        let encoded = frame.encode().unwrap();
        assert_eq!(&encoded[..], &INIT_FRAME[..]);
    }

    #[test]
    fn test_frame_roundtrip() {
        let payload = Bytes::from_static(b"NK2\0\xfe\x04\x09\x00\x01\x00\x02\x00\x00\x00\x01\x00");
        let mut buf = Frame::new(payload.clone()).encode().unwrap();

        let decoded = Frame::decode(&mut buf).unwrap().unwrap();
        assert_eq!(decoded.payload, payload);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_checksum_validation() {
        let mut encoded = BytesMut::from(&INIT_FRAME[..]);
        encoded[10] ^= 0x01;

        let result = Frame::decode(&mut encoded);
        assert!(matches!(
            result,
            Err(ProtocolError::ChecksumMismatch {
                expected: 0xC708,
                ..
            })
        ));
    }

    #[test]
    fn test_invalid_magic() {
        let mut buf = BytesMut::from(&b"NK2\0\xfe\x02\x08"[..]);
        let result = Frame::decode(&mut buf);
        assert!(matches!(result, Err(ProtocolError::InvalidMagic(_))));
    }

    #[test]
    fn test_incomplete_frame() {
        let mut buf = BytesMut::from(&INIT_FRAME[..4]);
        assert!(Frame::decode(&mut buf).unwrap().is_none());

        let mut buf = BytesMut::from(&INIT_FRAME[..22]);
        assert!(Frame::decode(&mut buf).unwrap().is_none());
        assert_eq!(buf.len(), 22);
    }

    #[test]
    fn test_length_below_checksum_size() {
        let mut buf = BytesMut::from(&b"PAS2\0\x01\x00"[..]);
        assert!(matches!(
            Frame::decode(&mut buf),
            Err(ProtocolError::Truncated { .. })
        ));
    }

    #[test]
    fn test_frame_too_large() {
        let frame = Frame::new(vec![0u8; MAX_PAYLOAD_SIZE + 1]);
        assert!(matches!(
            frame.encode(),
            Err(ProtocolError::FrameTooLarge { .. })
        ));

        let frame = Frame::new(vec![0u8; MAX_PAYLOAD_SIZE]);
        let encoded = frame.encode().unwrap();
        assert_eq!(encoded[5], u8::MAX);
    }

    #[test]
    fn test_multiple_frames_in_buffer() {
        let mut buf = BytesMut::new();
        buf.extend_from_slice(&Frame::new(&b"first"[..]).encode().unwrap());
        buf.extend_from_slice(&Frame::new(&b"second"[..]).encode().unwrap());

        let first = Frame::decode(&mut buf).unwrap().unwrap();
        assert_eq!(&first.payload[..], b"first");

        let second = Frame::decode(&mut buf).unwrap().unwrap();
        assert_eq!(&second.payload[..], b"second");

        assert!(Frame::decode(&mut buf).unwrap().is_none());
    }
}
