//! Request frame: the three-line text carried inside each envelope.
//!
//! ```text
//! <commandId>\r\n<callId or empty>\r\n<body JSON>
//! ```
//!
//! Only the first two `\r\n` separate fields; the body keeps any further
//! line breaks verbatim.
//!
//! # Example
//!
//! ```
//! use nsocket::protocol::RequestFrame;
//!
//! let frame = RequestFrame::new("square", Some(0), "7");
//! assert_eq!(frame.encode_text(), "square\r\n0\r\n7");
//!
//! let parsed = RequestFrame::parse("ping\r\n\r\n{\"id\":\"1\"}").unwrap();
//! assert_eq!(parsed.command_id, "ping");
//! assert_eq!(parsed.call_id, None);
//! ```

use bytes::Bytes;

use super::wire_format::encode_envelope;
use crate::error::{Result, SocketError};

const SEPARATOR: &str = "\r\n";

/// A decoded request frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestFrame {
    /// Command the body is addressed to.
    pub command_id: String,
    /// Correlation id; present only for synchronous calls.
    pub call_id: Option<u64>,
    /// JSON body.
    pub body: String,
}

impl RequestFrame {
    /// Create a new frame.
    pub fn new(command_id: impl Into<String>, call_id: Option<u64>, body: impl Into<String>) -> Self {
        Self {
            command_id: command_id.into(),
            call_id,
            body: body.into(),
        }
    }

    /// Whether the sender waits for a sync result.
    #[inline]
    pub fn is_sync(&self) -> bool {
        self.call_id.is_some()
    }

    /// Render the frame text.
    pub fn encode_text(&self) -> String {
        let call_id = self.call_id.map(|id| id.to_string()).unwrap_or_default();
        let mut text =
            String::with_capacity(self.command_id.len() + call_id.len() + self.body.len() + 4);
        text.push_str(&self.command_id);
        text.push_str(SEPARATOR);
        text.push_str(&call_id);
        text.push_str(SEPARATOR);
        text.push_str(&self.body);
        text
    }

    /// Render the frame text and pack it into its wire envelope.
    pub fn to_envelope(&self) -> Result<Bytes> {
        encode_envelope(&self.encode_text())
    }

    /// Parse frame text.
    pub fn parse(text: &str) -> Result<Self> {
        let mut parts = text.splitn(3, SEPARATOR);
        let (Some(command_id), Some(call_id), Some(body)) = (parts.next(), parts.next(), parts.next())
        else {
            return Err(SocketError::Protocol(format!(
                "Request message must be 3 lines, but got {}",
                text.split(SEPARATOR).count()
            )));
        };

        let call_id = if call_id.is_empty() {
            None
        } else {
            Some(call_id.parse::<u64>().map_err(|e| {
                SocketError::Protocol(format!("Invalid call id '{}': {}", call_id, e))
            })?)
        };

        Ok(Self {
            command_id: command_id.to_string(),
            call_id,
            body: body.to_string(),
        })
    }
}

/// Reject command ids that would break the line-oriented frame layout.
pub fn validate_command_id(command_id: &str) -> Result<()> {
    if command_id.is_empty() {
        return Err(SocketError::Protocol("Command id must not be empty".to_string()));
    }
    if command_id.contains(['\r', '\n']) {
        return Err(SocketError::Protocol(format!(
            "Command id must not contain line breaks: {:?}",
            command_id
        )));
    }
    Ok(())
}
