//! Frame struct with typed accessors.
//!
//! A frame is a `(command, payload)` pair. Payload is `bytes::Bytes`, so
//! handing a `DATA` chunk on to a job consumer is zero-copy.
//!
//! # Example
//!
//! ```
//! use kio_dispatch::protocol::{Command, Frame};
//! use bytes::Bytes;
//!
//! let frame = Frame::command(Command::Get, Bytes::from_static(b"payload"));
//! assert_eq!(frame.id(), Command::Get as i32);
//! assert_eq!(frame.payload(), b"payload");
//! ```

use bytes::{BufMut, Bytes, BytesMut};

use super::command::{Command, FrameKind, Info, Message};
use super::wire_format::{Header, HEADER_SIZE};

/// A complete protocol frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Decoded header.
    pub header: Header,
    /// Payload bytes.
    pub payload: Bytes,
}

impl Frame {
    /// Create a new frame from header and payload.
    pub fn new(header: Header, payload: Bytes) -> Self {
        Self { header, payload }
    }

    /// Build a frame for a raw id.
    pub fn from_id(id: i32, payload: Bytes) -> Self {
        Self {
            header: Header::new(id, payload.len() as u32),
            payload,
        }
    }

    /// Application to worker command frame.
    pub fn command(cmd: Command, payload: Bytes) -> Self {
        Self::from_id(cmd as i32, payload)
    }

    /// Worker to application info frame.
    pub fn info(info: Info, payload: Bytes) -> Self {
        Self::from_id(info as i32, payload)
    }

    /// Worker to application message frame.
    pub fn message(msg: Message, payload: Bytes) -> Self {
        Self::from_id(msg as i32, payload)
    }

    /// Raw id on the wire.
    #[inline]
    pub fn id(&self) -> i32 {
        self.header.command
    }

    /// Decoded id.
    #[inline]
    pub fn kind(&self) -> FrameKind {
        FrameKind::from_id(self.header.command)
    }

    /// Get a reference to the payload bytes.
    #[inline]
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Get the payload length.
    #[inline]
    pub fn payload_len(&self) -> usize {
        self.payload.len()
    }

    /// Check whether the frame carries the given command id.
    #[inline]
    pub fn is_command(&self, cmd: Command) -> bool {
        self.header.command == cmd as i32
    }
}

/// Build a complete frame as a contiguous buffer (header + payload).
pub fn build_frame(command: i32, payload: &[u8]) -> Bytes {
    let header = Header::new(command, payload.len() as u32);
    let mut buf = BytesMut::with_capacity(HEADER_SIZE + payload.len());
    buf.put_slice(&header.encode());
    buf.put_slice(payload);
    buf.freeze()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_constructors() {
        let frame = Frame::message(Message::Finished, Bytes::new());
        assert_eq!(frame.id(), 104);
        assert_eq!(frame.kind(), FrameKind::Message(Message::Finished));
        assert_eq!(frame.header.payload_length, 0);

        let frame = Frame::info(Info::MimeType, Bytes::from_static(b"text/html"));
        assert_eq!(frame.kind(), FrameKind::Info(Info::MimeType));
        assert_eq!(frame.payload_len(), 9);
    }

    #[test]
    fn test_is_command() {
        let frame = Frame::command(Command::Stat, Bytes::new());
        assert!(frame.is_command(Command::Stat));
        assert!(!frame.is_command(Command::Get));
    }

    #[test]
    fn test_build_frame() {
        let bytes = build_frame(Command::Special as i32, b"abc");
        assert_eq!(bytes.len(), HEADER_SIZE + 3);

        let header = Header::decode(&bytes).unwrap();
        assert_eq!(header.command, Command::Special as i32);
        assert_eq!(header.payload_length, 3);
        assert_eq!(&bytes[HEADER_SIZE..], b"abc");
    }
}
