//! Correlation table for synchronous calls.
//!
//! Each call takes a fresh call id, parks a one-shot channel in the table and
//! blocks on it. The `__syncResult` handler completes the entry exactly once;
//! the entry is removed on completion or when the waiting side gives up.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, Sender};
use parking_lot::Mutex;
use tracing::trace;

use crate::protocol::SyncResultData;

/// Per-endpoint table of outstanding sync calls.
pub(crate) struct SyncManager {
    calls: Mutex<HashMap<u64, Sender<SyncResultData>>>,
    next_call_id: AtomicU64,
}

impl SyncManager {
    pub(crate) fn new() -> Self {
        Self {
            calls: Mutex::new(HashMap::new()),
            next_call_id: AtomicU64::new(0),
        }
    }

    /// Allocate a call id and park a waiter for it.
    pub(crate) fn register(&self) -> PendingCall<'_> {
        let call_id = self.next_call_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = bounded(1);
        self.calls.lock().insert(call_id, tx);
        PendingCall {
            manager: self,
            call_id,
            rx,
        }
    }

    /// Deliver a result to its waiter. Returns false if nobody is waiting.
    pub(crate) fn complete(&self, result: SyncResultData) -> bool {
        let waiter = self.calls.lock().remove(&result.call_id);
        match waiter {
            Some(tx) => tx.try_send(result).is_ok(),
            None => false,
        }
    }

    /// Number of calls still waiting for a reply.
    pub(crate) fn pending_count(&self) -> usize {
        self.calls.lock().len()
    }
}

/// A registered call. Dropping it removes the table entry.
pub(crate) struct PendingCall<'a> {
    manager: &'a SyncManager,
    call_id: u64,
    rx: Receiver<SyncResultData>,
}

impl PendingCall<'_> {
    pub(crate) fn call_id(&self) -> u64 {
        self.call_id
    }

    /// Block until the result arrives or `timeout` elapses.
    pub(crate) fn wait(self, timeout: Duration) -> Option<SyncResultData> {
        let result = self.rx.recv_timeout(timeout).ok();
        if result.is_none() {
            trace!(call_id = self.call_id, "sync call gave up waiting");
        }
        result
    }
}

impl Drop for PendingCall<'_> {
    fn drop(&mut self) {
        self.manager.calls.lock().remove(&self.call_id);
    }
}
