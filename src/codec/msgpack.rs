//! MsgPack codec using `rmp-serde`.
//!
//! Each frame's text travels as a single MessagePack `str` value, so the envelope
//! is self-delimiting: the marker byte and length prefix tell the receiver exactly
//! how many bytes belong to the frame.
//!
//! # Example
//!
//! ```
//! use nsocket::codec::MsgPackCodec;
//!
//! let encoded = MsgPackCodec::encode("hello").unwrap();
//! assert_eq!(encoded[0], 0xa5); // fixstr, 5 bytes
//! let decoded: String = MsgPackCodec::decode(&encoded).unwrap();
//! assert_eq!(decoded, "hello");
//! ```

use crate::error::Result;

/// MessagePack codec for the frame envelope.
pub struct MsgPackCodec;

impl MsgPackCodec {
    /// Encode a value to MsgPack bytes.
    ///
    /// Structs are written as maps (`to_vec_named`); strings become `str` values.
    #[inline]
    pub fn encode<T: serde::Serialize + ?Sized>(value: &T) -> Result<Vec<u8>> {
        Ok(rmp_serde::to_vec_named(value)?)
    }

    /// Decode MsgPack bytes to a value.
    #[inline]
    pub fn decode<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> Result<T> {
        Ok(rmp_serde::from_slice(bytes)?)
    }
}
