//! Wire format: the MessagePack string envelope and the reserved command ids.
//!
//! Every frame on the wire is one MessagePack `str` value whose content is the
//! frame text (see [`RequestFrame`](super::RequestFrame)). The first byte tells
//! how long the value is:
//! ```text
//! ┌────────────┬──────────────────┬───────────────┐
//! │ Marker     │ Length field     │ Header size   │
//! ├────────────┼──────────────────┼───────────────┤
//! │ 0xa0..0xbf │ low 5 bits       │ 1 byte        │
//! │ 0xd9       │ uint8            │ 2 bytes       │
//! │ 0xda       │ uint16 BE        │ 3 bytes       │
//! │ 0xdb       │ uint32 BE        │ 5 bytes       │
//! └────────────┴──────────────────┴───────────────┘
//! ```
//! Any other marker is a protocol violation.

use bytes::Bytes;
use rmp::Marker;

use crate::codec::MsgPackCodec;
use crate::error::{Result, SocketError};

/// Assigns the server-side identity to a freshly accepted connection. Body: the id.
pub const SET_CONNECTION_ID_COMMAND: &str = "__set_connection_id";

/// Liveness signal sent by every event loop on its heartbeat interval. Body: `null`.
pub const HEARTBEAT_COMMAND: &str = "__heartbeat";

/// Carries a [`SyncResultData`](super::SyncResultData) back to the caller.
pub const SYNC_RESULT_COMMAND: &str = "__syncResult";

/// Reports a failure to process an incoming frame. Body: [`ErrorData`](super::ErrorData).
pub const ERROR_COMMAND: &str = "__error";

/// Default maximum envelope body size (16 MiB).
pub const DEFAULT_MAX_ENVELOPE_SIZE: usize = 16 * 1024 * 1024;

/// Parsed envelope prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnvelopeHeader {
    /// Bytes taken by the marker and length field.
    pub header_len: usize,
    /// Bytes of frame text that follow.
    pub body_len: usize,
}

impl EnvelopeHeader {
    /// Total size of the envelope on the wire.
    #[inline]
    pub fn total_len(&self) -> usize {
        self.header_len + self.body_len
    }

    /// Peek the envelope header at the start of `buf`.
    ///
    /// Returns `Ok(None)` when `buf` does not yet hold the whole header.
    pub fn peek(buf: &[u8]) -> Result<Option<Self>> {
        let Some(&first) = buf.first() else {
            return Ok(None);
        };

        let (header_len, body_len) = match Marker::from_u8(first) {
            Marker::FixStr(len) => (1, len as usize),
            Marker::Str8 => match buf.get(1) {
                Some(&len) => (2, len as usize),
                None => return Ok(None),
            },
            Marker::Str16 => match buf.get(1..3) {
                Some(b) => (3, u16::from_be_bytes([b[0], b[1]]) as usize),
                None => return Ok(None),
            },
            Marker::Str32 => match buf.get(1..5) {
                Some(b) => (5, u32::from_be_bytes([b[0], b[1], b[2], b[3]]) as usize),
                None => return Ok(None),
            },
            other => {
                return Err(SocketError::Protocol(format!(
                    "Unexpected envelope marker {:?} (0x{:02x})",
                    other, first
                )))
            }
        };

        Ok(Some(Self {
            header_len,
            body_len,
        }))
    }
}

/// Pack frame text into its envelope.
pub fn encode_envelope(text: &str) -> Result<Bytes> {
    Ok(Bytes::from(MsgPackCodec::encode(text)?))
}

/// Decode the first complete envelope in `buf`.
///
/// Returns the frame text and the number of bytes consumed, or `Ok(None)` if
/// `buf` holds only part of an envelope.
pub fn decode_envelope(buf: &[u8], max_body: usize) -> Result<Option<(String, usize)>> {
    let Some(header) = EnvelopeHeader::peek(buf)? else {
        return Ok(None);
    };
    if header.body_len > max_body {
        return Err(SocketError::Protocol(format!(
            "Envelope size {} exceeds maximum {}",
            header.body_len, max_body
        )));
    }
    let total = header.total_len();
    if buf.len() < total {
        return Ok(None);
    }
    let text: String = MsgPackCodec::decode(&buf[..total])?;
    Ok(Some((text, total)))
}
