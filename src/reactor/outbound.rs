//! Per-connection outbound queue.
//!
//! Any thread may enqueue encoded envelopes; only the owning event loop drains
//! them into the transport.
//!
//! # Architecture
//!
//! ```text
//! Handler 1 ─┐
//! Caller   2 ─┼─► OutboundSender ─► crossbeam channel ─► OutboundQueue ─► Transport
//! Heartbeat ─┘                                            (event loop)
//! ```
//!
//! A chunk the transport only partly accepted stays at the head of the queue
//! (advanced past the written bytes) and is retried on the next writable event,
//! so bytes of different envelopes never interleave.

use std::collections::VecDeque;
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use bytes::{Buf, Bytes};
use crossbeam_channel::{unbounded, Receiver, Sender, TryRecvError};
use tracing::trace;

use crate::error::{Result, SocketError};
use crate::transport::{InterestCtl, Transport};

/// Producer half; cheap to clone.
#[derive(Clone)]
pub(crate) struct OutboundSender {
    tx: Sender<Bytes>,
    pending: Arc<AtomicUsize>,
}

impl OutboundSender {
    /// Enqueue one encoded envelope.
    pub(crate) fn send(&self, chunk: Bytes) -> Result<()> {
        self.pending.fetch_add(1, Ordering::AcqRel);
        self.tx.send(chunk).map_err(|_| {
            self.pending.fetch_sub(1, Ordering::AcqRel);
            SocketError::ConnectionClosed
        })
    }

    /// Envelopes queued but not yet fully written.
    pub(crate) fn pending_count(&self) -> usize {
        self.pending.load(Ordering::Acquire)
    }
}

/// Consumer half, owned by the event loop.
pub(crate) struct OutboundQueue {
    rx: Receiver<Bytes>,
    head: VecDeque<Bytes>,
    pending: Arc<AtomicUsize>,
}

/// Create a connected sender/queue pair.
pub(crate) fn outbound_queue() -> (OutboundSender, OutboundQueue) {
    let (tx, rx) = unbounded();
    let pending = Arc::new(AtomicUsize::new(0));
    (
        OutboundSender {
            tx,
            pending: pending.clone(),
        },
        OutboundQueue {
            rx,
            head: VecDeque::new(),
            pending,
        },
    )
}

impl OutboundQueue {
    #[cfg(test)]
    pub(crate) fn is_empty(&self) -> bool {
        self.head.is_empty() && self.rx.is_empty()
    }

    /// Write queued envelopes in order until drained or the transport stops
    /// accepting bytes. Returns true when the queue is empty.
    pub(crate) fn flush_into(
        &mut self,
        transport: &mut dyn Transport,
        interest: &mut InterestCtl,
    ) -> io::Result<bool> {
        loop {
            if self.head.is_empty() {
                match self.rx.try_recv() {
                    Ok(chunk) => self.head.push_back(chunk),
                    Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => return Ok(true),
                }
            }
            let Some(chunk) = self.head.front_mut() else {
                continue;
            };

            match transport.write(&chunk[..], interest) {
                Ok(0) => return Ok(false),
                Ok(n) => {
                    chunk.advance(n);
                    if chunk.is_empty() {
                        self.head.pop_front();
                        self.pending.fetch_sub(1, Ordering::AcqRel);
                    } else {
                        trace!(written = n, remaining = chunk.len(), "partial write");
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(false),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
    }
}
