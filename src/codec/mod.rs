//! Codec module - payload serialization.
//!
//! Structured frame payloads are MessagePack via [`MsgPackCodec`]. Raw
//! payloads (`DATA`, `WRITE`, `SPECIAL`) are plain `Bytes` and need no codec.

mod msgpack;

pub use msgpack::MsgPackCodec;
