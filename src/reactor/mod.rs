//! Reactor module - the event loop threads.
//!
//! A fixed group of loops is started per endpoint; new connections are spread
//! over them round-robin and stay on their loop for life.

mod channel;
mod event_loop;
mod outbound;

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, warn};

pub(crate) use event_loop::{LoopHandle, Task};
pub(crate) use outbound::{outbound_queue, OutboundQueue, OutboundSender};

use crate::error::Result;
use event_loop::EventLoop;

struct LoopThread {
    handle: LoopHandle,
    thread: Mutex<Option<JoinHandle<()>>>,
}

/// Group of event loops with round-robin selection.
pub(crate) struct EventLoopGroup {
    loops: Vec<LoopThread>,
    running: Arc<AtomicBool>,
    next: AtomicUsize,
}

impl EventLoopGroup {
    /// Spawn `count` loops named `{name}-loop-{i}`.
    pub(crate) fn start(name: &str, count: usize, heartbeat_interval: Duration) -> Result<Self> {
        let running = Arc::new(AtomicBool::new(true));
        let mut loops = Vec::with_capacity(count.max(1));
        for i in 0..count.max(1) {
            let (event_loop, handle) = EventLoop::new(running.clone(), heartbeat_interval)?;
            let thread = thread::Builder::new()
                .name(format!("{}-loop-{}", name, i))
                .spawn(move || event_loop.run())?;
            loops.push(LoopThread {
                handle,
                thread: Mutex::new(Some(thread)),
            });
        }
        debug!(loops = loops.len(), "Event loops started");
        Ok(Self {
            loops,
            running,
            next: AtomicUsize::new(0),
        })
    }

    /// Next loop in round-robin order.
    pub(crate) fn select(&self) -> &LoopHandle {
        let i = self.next.fetch_add(1, Ordering::Relaxed) % self.loops.len();
        &self.loops[i].handle
    }

    pub(crate) fn len(&self) -> usize {
        self.loops.len()
    }

    /// Ask every loop to close its channels and exit, then join them.
    pub(crate) fn stop(&self) {
        self.running.store(false, Ordering::Release);
        for event_loop in &self.loops {
            event_loop.handle.wake();
        }
        for event_loop in &self.loops {
            if let Some(thread) = event_loop.thread.lock().take() {
                if thread.join().is_err() {
                    warn!("Event loop thread panicked");
                }
            }
        }
    }
}
