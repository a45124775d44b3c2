//! Protocol module - wire format, framing, frame ids and payloads.
//!
//! - 8-byte header encoding/decoding
//! - Frame buffer for accumulating partial reads
//! - Command/info/message id namespaces
//! - Typed payload structs and directory entries

mod command;
mod frame;
mod frame_buffer;
mod payload;
mod wire_format;

pub use command::{Command, FrameKind, Info, Message};
pub use frame::{build_frame, Frame};
pub use frame_buffer::FrameBuffer;
pub use payload::{
    uds, AuthKeyPayload, ChmodArgs, ChownArgs, CopyArgs, DelArgs, ErrorPayload, HostArgs,
    MessageBoxKind, MessageBoxRequest, MetaData, MkdirArgs, OpenArgs, OpenMode, PutArgs,
    RenameArgs, SlaveStatus, SymlinkArgs, UdsEntry, UdsValue,
};
pub use wire_format::{Header, DEFAULT_MAX_PAYLOAD_SIZE, HEADER_SIZE, MAX_DATA_CHUNK};
