//! Wire format encoding and decoding.
//!
//! Every frame starts with an 8-byte header:
//! ```text
//! ┌──────────┬──────────┐
//! │ Length   │ Command  │
//! │ 4 bytes  │ 4 bytes  │
//! │ uint32 BE│ int32 BE │
//! └──────────┴──────────┘
//! ```
//!
//! followed by `length` payload bytes. There is no request id: the meaning of
//! a frame is positional, defined by the dialogue state both ends agree on.

use crate::error::{KioError, Result};

/// Header size in bytes (fixed, exactly 8).
pub const HEADER_SIZE: usize = 8;

/// Default maximum payload size (64 MiB).
///
/// Data chunks are sent in pieces of at most [`MAX_DATA_CHUNK`], so this
/// leaves room for large stat/list batches.
pub const DEFAULT_MAX_PAYLOAD_SIZE: u32 = 64 * 1024 * 1024;

/// Largest `DATA` payload the application sends in one frame.
pub const MAX_DATA_CHUNK: usize = 14 * 1024 * 1024;

/// Decoded frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    /// Payload length in bytes.
    pub payload_length: u32,
    /// Command, info or message id (see [`super::command`]).
    pub command: i32,
}

impl Header {
    /// Create a new header.
    pub fn new(command: i32, payload_length: u32) -> Self {
        Self {
            payload_length,
            command,
        }
    }

    /// Encode header to bytes (Big Endian).
    ///
    /// # Example
    ///
    /// ```
    /// use kio_dispatch::protocol::Header;
    ///
    /// let bytes = Header::new(67, 5).encode();
    /// assert_eq!(bytes, [0, 0, 0, 5, 0, 0, 0, 67]);
    /// ```
    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        self.encode_into(&mut buf);
        buf
    }

    /// Encode header into an existing buffer.
    ///
    /// # Panics
    ///
    /// Panics if buffer is smaller than `HEADER_SIZE` (8 bytes).
    pub fn encode_into(&self, buf: &mut [u8]) {
        debug_assert!(buf.len() >= HEADER_SIZE);
        buf[0..4].copy_from_slice(&self.payload_length.to_be_bytes());
        buf[4..8].copy_from_slice(&self.command.to_be_bytes());
    }

    /// Decode header from bytes (Big Endian).
    ///
    /// Returns `None` if buffer is too short.
    pub fn decode(buf: &[u8]) -> Option<Self> {
        if buf.len() < HEADER_SIZE {
            return None;
        }
        Some(Self {
            payload_length: u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]),
            command: i32::from_be_bytes([buf[4], buf[5], buf[6], buf[7]]),
        })
    }

    /// Validate the header against the payload limit.
    pub fn validate(&self, max_payload_size: u32) -> Result<()> {
        if self.payload_length > max_payload_size {
            return Err(KioError::Protocol(format!(
                "Payload size {} exceeds maximum {} (command {})",
                self.payload_length, max_payload_size, self.command
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_encode_layout() {
        let header = Header::new(0x0102_0304, 0x0A0B_0C0D);
        let bytes = header.encode();

        assert_eq!(&bytes[0..4], &[0x0A, 0x0B, 0x0C, 0x0D]);
        assert_eq!(&bytes[4..8], &[0x01, 0x02, 0x03, 0x04]);
    }

    #[test]
    fn test_header_decode() {
        let bytes = [0, 0, 1, 0, 0, 0, 0, 100];
        let header = Header::decode(&bytes).unwrap();

        assert_eq!(header.payload_length, 256);
        assert_eq!(header.command, 100);
    }

    #[test]
    fn test_header_negative_command() {
        let header = Header::new(-1, 0);
        let decoded = Header::decode(&header.encode()).unwrap();
        assert_eq!(decoded.command, -1);
    }

    #[test]
    fn test_header_decode_too_short() {
        assert!(Header::decode(&[0, 0, 0]).is_none());
    }

    #[test]
    fn test_validate_payload_limit() {
        let ok = Header::new(100, 1024);
        assert!(ok.validate(1024).is_ok());

        let too_big = Header::new(100, 1025);
        let err = too_big.validate(1024).unwrap_err();
        assert!(matches!(err, KioError::Protocol(_)));
    }
}
