//! Protocol error types.

use thiserror::Error;

/// Errors raised while encoding or decoding router frames.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("invalid magic bytes: expected 'PAS2\\0', got {0:02x?}")]
    InvalidMagic([u8; 5]),

    #[error("unknown frame tag: {0:02x?}")]
    UnknownTag(Vec<u8>),

    #[error("truncated frame: {len} bytes (need at least {min})")]
    Truncated { len: usize, min: usize },

    #[error("frame too large: {size} bytes (max {max})")]
    FrameTooLarge { size: usize, max: usize },

    #[error("checksum mismatch: expected {expected:#06x}, got {actual:#06x}")]
    ChecksumMismatch { expected: u16, actual: u16 },

    #[error("unknown level mask: {0:#x}")]
    UnknownLevelMask(u32),

    #[error("unknown level: {0}")]
    UnknownLevel(String),

    #[error("unknown command type: {0:02x?}")]
    UnknownCommand([u8; 2]),

    #[error("invalid {field} id: {value} (ids are 1-based)")]
    InvalidId { field: &'static str, value: u16 },

    #[error("{field} {raw:#06x} on the wire has no 1-based equivalent")]
    WireIdOutOfRange { field: &'static str, raw: u16 },
}

impl ProtocolError {
    /// Returns whether the error concerns a single malformed inbound frame,
    /// as opposed to a caller mistake when building a command.
    pub fn is_malformed_frame(&self) -> bool {
        !matches!(
            self,
            ProtocolError::InvalidId { .. } | ProtocolError::UnknownLevel(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_protocol_error_display() {
        let err = ProtocolError::InvalidMagic(*b"XXXX\0");
        assert!(err.to_string().contains("magic"));

        let err = ProtocolError::UnknownTag(b"ABC".to_vec());
        assert!(err.to_string().contains("41"));

        let err = ProtocolError::Truncated { len: 7, min: 18 };
        let msg = err.to_string();
        assert!(msg.contains('7') && msg.contains("18"));

        let err = ProtocolError::ChecksumMismatch {
            expected: 0xC708,
            actual: 0x0001,
        };
        let msg = err.to_string();
        assert!(msg.contains("c708"));

        let err = ProtocolError::UnknownLevelMask(0x300);
        assert!(err.to_string().contains("0x300"));

        let err = ProtocolError::InvalidId {
            field: "destination",
            value: 0,
        };
        assert!(err.to_string().contains("destination"));
    }

    #[test]
    fn test_malformed_frame_classification() {
        assert!(ProtocolError::UnknownLevelMask(3).is_malformed_frame());
        assert!(ProtocolError::Truncated { len: 1, min: 2 }.is_malformed_frame());
        assert!(!ProtocolError::InvalidId {
            field: "source",
            value: 0
        }
        .is_malformed_frame());
        assert!(!ProtocolError::UnknownLevel("x".to_string()).is_malformed_frame());
    }
}
