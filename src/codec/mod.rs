//! Codec module - serialization for command bodies and frame envelopes.
//!
//! - [`JsonCodec`] - command bodies and sync results, via `serde_json`
//! - [`MsgPackCodec`] - the binary envelope that carries each frame's text, via `rmp-serde`
//!
//! # Design
//!
//! Codecs are marker structs with static generic methods rather than trait objects,
//! so the payload type is chosen at the call site (or at handler registration).
//!
//! # Example
//!
//! ```
//! use nsocket::codec::{JsonCodec, MsgPackCodec};
//!
//! let body = JsonCodec::encode(&vec![1, 2, 3]).unwrap();
//! assert_eq!(body, "[1,2,3]");
//!
//! let packed = MsgPackCodec::encode("ping").unwrap();
//! let text: String = MsgPackCodec::decode(&packed).unwrap();
//! assert_eq!(text, "ping");
//! ```

mod json;
mod msgpack;

pub use json::JsonCodec;
pub use msgpack::MsgPackCodec;
