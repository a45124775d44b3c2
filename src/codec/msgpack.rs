//! MsgPack codec using `rmp-serde`.
//!
//! Structs are always written with `to_vec_named` (struct-as-map), so a
//! worker built against a newer payload struct can still read fields it
//! knows and ignore the rest.
//!
//! # Example
//!
//! ```
//! use kio_dispatch::codec::MsgPackCodec;
//! use kio_dispatch::protocol::HostArgs;
//!
//! let args = HostArgs { host: "ftp.example.org".into(), port: 21, ..Default::default() };
//! let bytes = MsgPackCodec::encode_bytes(&args).unwrap();
//! let decoded: HostArgs = MsgPackCodec::decode(&bytes).unwrap();
//! assert_eq!(decoded, args);
//! ```

use bytes::Bytes;

use crate::error::Result;

/// MessagePack codec for structured payloads.
pub struct MsgPackCodec;

impl MsgPackCodec {
    /// Encode a value to MsgPack bytes (struct-as-map).
    #[inline]
    pub fn encode<T: serde::Serialize + ?Sized>(value: &T) -> Result<Vec<u8>> {
        Ok(rmp_serde::to_vec_named(value)?)
    }

    /// Encode straight into a frame payload.
    #[inline]
    pub fn encode_bytes<T: serde::Serialize + ?Sized>(value: &T) -> Result<Bytes> {
        Ok(Bytes::from(Self::encode(value)?))
    }

    /// Decode MsgPack bytes to a value.
    #[inline]
    pub fn decode<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> Result<T> {
        Ok(rmp_serde::from_slice(bytes)?)
    }
}
