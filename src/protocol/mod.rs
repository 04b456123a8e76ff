//! Protocol module - envelope, frame text, and inbound buffering.
//!
//! This module implements the wire protocol shared by both endpoints:
//! - MessagePack string envelope around each frame
//! - Three-line request frame (`commandId`, `callId`, body)
//! - Frame buffer that compacts and grows while accumulating partial reads
//! - Bodies of the internal reply frames

mod frame;
mod frame_buffer;
mod messages;
mod wire_format;

pub use frame::{validate_command_id, RequestFrame};
pub use frame_buffer::{FrameBuffer, DEFAULT_BUFFER_SIZE};
pub use messages::{ErrorData, SyncResultData, SyncStatus};
pub use wire_format::{
    decode_envelope, encode_envelope, EnvelopeHeader, DEFAULT_MAX_ENVELOPE_SIZE, ERROR_COMMAND,
    HEARTBEAT_COMMAND, SET_CONNECTION_ID_COMMAND, SYNC_RESULT_COMMAND,
};
