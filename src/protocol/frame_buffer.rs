//! Inbound buffer for accumulating partial reads.
//!
//! Holds bytes read from a socket until complete envelopes can be decoded.
//! The buffer is a flat `Vec<u8>` with a read cursor (`start`) and a fill
//! cursor (`end`), so the event loop can read straight into the spare tail:
//!
//! ```text
//! ┌──────────┬──────────────────┬─────────────┐
//! │ consumed │ undecoded bytes  │ spare       │
//! └──────────┴──────────────────┴─────────────┘
//! 0        start              end        capacity
//! ```
//!
//! When the spare tail runs out, the buffer first compacts (moves the undecoded
//! bytes to the front); if it is still full, a single envelope is larger than the
//! buffer and the capacity doubles until it fits.
//!
//! # Example
//!
//! ```
//! use nsocket::protocol::{FrameBuffer, RequestFrame};
//!
//! let mut buffer = FrameBuffer::with_capacity(16);
//! let bytes = RequestFrame::new("ping", None, "\"hello, world\"").to_envelope().unwrap();
//!
//! let (head, tail) = bytes.split_at(5);
//! assert!(buffer.push(head).unwrap().is_empty());
//! let messages = buffer.push(tail).unwrap();
//! assert_eq!(messages, vec!["ping\r\n\r\n\"hello, world\"".to_string()]);
//! ```

use tracing::warn;

use super::wire_format::{decode_envelope, EnvelopeHeader, DEFAULT_MAX_ENVELOPE_SIZE};
use crate::error::{Result, SocketError};

/// Default initial capacity (8 KiB).
pub const DEFAULT_BUFFER_SIZE: usize = 8 * 1024;

/// Buffer for accumulating incoming bytes and extracting complete envelopes.
pub struct FrameBuffer {
    buf: Vec<u8>,
    start: usize,
    end: usize,
    max_envelope_size: usize,
}

impl FrameBuffer {
    /// Create a buffer with the default capacity and the default envelope limit.
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_BUFFER_SIZE)
    }

    /// Create a buffer with a custom initial capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        Self::with_capacity_and_max(capacity, DEFAULT_MAX_ENVELOPE_SIZE)
    }

    /// Create a buffer with a custom initial capacity and envelope limit.
    pub fn with_capacity_and_max(capacity: usize, max_envelope_size: usize) -> Self {
        Self {
            buf: vec![0; capacity.max(1)],
            start: 0,
            end: 0,
            max_envelope_size,
        }
    }

    /// Current capacity in bytes.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    /// Number of buffered, not yet decoded bytes.
    #[inline]
    pub fn len(&self) -> usize {
        self.end - self.start
    }

    /// Check if no undecoded bytes are buffered.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    /// Whether the spare tail is exhausted.
    #[inline]
    pub fn is_full(&self) -> bool {
        self.end == self.buf.len()
    }

    /// Writable tail for the next socket read.
    #[inline]
    pub fn spare_mut(&mut self) -> &mut [u8] {
        &mut self.buf[self.end..]
    }

    /// Mark `n` bytes of the spare tail as filled.
    #[inline]
    pub fn advance(&mut self, n: usize) {
        debug_assert!(self.end + n <= self.buf.len());
        self.end += n;
    }

    /// Decode every complete envelope currently buffered.
    ///
    /// Partial trailing bytes stay buffered for the next read.
    pub fn drain_messages(&mut self) -> Result<Vec<String>> {
        let mut messages = Vec::new();
        while let Some((text, used)) =
            decode_envelope(&self.buf[self.start..self.end], self.max_envelope_size)?
        {
            messages.push(text);
            self.start += used;
        }
        if self.start == self.end {
            self.start = 0;
            self.end = 0;
        }
        Ok(messages)
    }

    /// Make room for the next read once the spare tail is exhausted.
    ///
    /// Compacts first; doubles the capacity only when the undecoded bytes
    /// already occupy the whole buffer.
    pub fn reserve_space(&mut self) -> Result<()> {
        if !self.is_full() {
            return Ok(());
        }
        if self.start > 0 {
            self.buf.copy_within(self.start..self.end, 0);
            self.end -= self.start;
            self.start = 0;
            return Ok(());
        }

        // A pending envelope whose header is known tells how far to grow.
        let needed = match EnvelopeHeader::peek(&self.buf[..self.end])? {
            Some(header) => header.total_len(),
            None => self.buf.len() + 1,
        };
        if needed > self.max_envelope_size.saturating_add(5) {
            return Err(SocketError::Protocol(format!(
                "Message size {} exceeds maximum {}",
                needed, self.max_envelope_size
            )));
        }
        let mut capacity = self.buf.len();
        while capacity < needed {
            capacity = capacity.saturating_mul(2);
        }
        warn!(
            capacity = self.buf.len(),
            new_capacity = capacity,
            "Message size larger than buffer's size, will expand it"
        );
        self.buf.resize(capacity, 0);
        Ok(())
    }

    /// Copy `data` in and extract all complete envelopes.
    ///
    /// Convenience wrapper over the spare/advance/drain cycle the event loop uses.
    pub fn push(&mut self, mut data: &[u8]) -> Result<Vec<String>> {
        let mut messages = Vec::new();
        while !data.is_empty() {
            self.reserve_space()?;
            let spare = self.spare_mut();
            let n = spare.len().min(data.len());
            spare[..n].copy_from_slice(&data[..n]);
            self.advance(n);
            data = &data[n..];
            messages.extend(self.drain_messages()?);
        }
        Ok(messages)
    }

    /// Drop all buffered bytes.
    pub fn clear(&mut self) {
        self.start = 0;
        self.end = 0;
    }
}

impl Default for FrameBuffer {
    fn default() -> Self {
        Self::new()
    }
}
