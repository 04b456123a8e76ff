//! Command worker: runs handlers off the event loop threads.
//!
//! Every connection gets a [`Lane`]: an unbounded queue drained by one task on
//! a dedicated tokio runtime, so frames from one connection are handled in the
//! order they were read. Handlers are blocking code and run on the runtime's
//! blocking pool; the lane awaits each one before taking the next frame. A
//! semaphore bounds how many requests are in flight across all lanes.
//!
//! # Architecture
//!
//! ```text
//! Event loop ─► Lane::submit ─► lane task ─┬─► spawn_blocking(handler), awaited
//!            (heartbeat, sync results)    └─► sync: timeout + __syncResult
//!                   └─► spawned directly
//! ```
//!
//! Heartbeats and sync results skip the lane: a handler blocked on a sync call
//! to its own peer would otherwise wait behind itself for the reply.
//!
//! Every sync request is answered exactly once: `SUCCEEDED` with the handler's
//! value, `FAILED` with its error message, or `TIMEOUT` once the declared
//! timeout elapses.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::runtime::{Builder, Handle, Runtime};
use tokio::sync::{mpsc, Semaphore};
use tracing::{debug, trace, warn};

use crate::connection::Connection;
use crate::error::{Result, SocketError};
use crate::handler::{CommandEntry, CommandHandler, SyncCommandHandler};
use crate::protocol::{
    ErrorData, RequestFrame, SyncResultData, ERROR_COMMAND, HEARTBEAT_COMMAND,
    SYNC_RESULT_COMMAND,
};

const SHUTDOWN_GRACE: Duration = Duration::from_secs(1);
const DRAIN_POLL: Duration = Duration::from_millis(10);

/// Cloneable submission side of the worker.
#[derive(Clone)]
pub(crate) struct Dispatcher {
    handle: Handle,
    permits: Arc<Semaphore>,
    max_permits: usize,
    running: Arc<AtomicBool>,
}

impl Dispatcher {
    /// Open the serial lane of one connection.
    ///
    /// The lane task ends once the returned [`Lane`] is dropped and its queue
    /// is empty, or once the worker stops.
    pub(crate) fn lane(&self, connection: Connection) -> Lane {
        let (tx, mut rx) = mpsc::unbounded_channel::<String>();
        let permits = self.permits.clone();
        let running = self.running.clone();
        let conn = connection.clone();
        self.handle.spawn(async move {
            while let Some(message) = rx.recv().await {
                if !running.load(Ordering::Acquire) {
                    break;
                }
                let Ok(_permit) = permits.acquire().await else {
                    break;
                };
                // The worker may have started draining while this lane waited.
                if !running.load(Ordering::Acquire) {
                    break;
                }
                dispatch(message, conn.clone()).await;
            }
            trace!(connection = %conn, "lane finished");
        });
        Lane {
            tx,
            connection,
            dispatcher: self.clone(),
        }
    }

    /// Run one frame outside any lane.
    fn spawn(&self, message: String, connection: Connection) {
        let permits = self.permits.clone();
        self.handle.spawn(async move {
            let Ok(_permit) = permits.acquire_owned().await else {
                return;
            };
            dispatch(message, connection).await;
        });
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    fn in_flight(&self) -> usize {
        self.max_permits.saturating_sub(self.permits.available_permits())
    }
}

/// Per-connection FIFO of decoded frames.
pub(crate) struct Lane {
    tx: mpsc::UnboundedSender<String>,
    connection: Connection,
    dispatcher: Dispatcher,
}

impl Lane {
    /// Queue a frame. Dropped with a debug log once the worker has stopped.
    pub(crate) fn submit(&self, message: String) {
        if !self.dispatcher.is_running() {
            debug!(connection = %self.connection, "Worker stopped, dropping request");
            return;
        }
        if skips_lane(&message) {
            self.dispatcher.spawn(message, self.connection.clone());
            return;
        }
        if self.tx.send(message).is_err() {
            debug!(connection = %self.connection, "Lane closed, dropping request");
        }
    }
}

/// Frames handled as soon as they arrive, regardless of the lane.
fn skips_lane(message: &str) -> bool {
    let command_id = message.split_once("\r\n").map_or(message, |(id, _)| id);
    command_id == HEARTBEAT_COMMAND || command_id == SYNC_RESULT_COMMAND
}

/// Owns the runtime that executes handlers.
pub(crate) struct Worker {
    runtime: Mutex<Option<Runtime>>,
    dispatcher: Dispatcher,
}

impl Worker {
    pub(crate) fn start(
        name: &str,
        worker_threads: usize,
        handler_threads: usize,
        max_concurrent_requests: usize,
    ) -> Result<Self> {
        let runtime = Builder::new_multi_thread()
            .worker_threads(worker_threads.max(1))
            .max_blocking_threads(handler_threads.max(1))
            .thread_name(format!("{}-worker", name))
            .enable_time()
            .build()?;

        let max_permits = max_concurrent_requests.max(1);
        let dispatcher = Dispatcher {
            handle: runtime.handle().clone(),
            permits: Arc::new(Semaphore::new(max_permits)),
            max_permits,
            running: Arc::new(AtomicBool::new(true)),
        };

        Ok(Self {
            runtime: Mutex::new(Some(runtime)),
            dispatcher,
        })
    }

    pub(crate) fn dispatcher(&self) -> Dispatcher {
        self.dispatcher.clone()
    }

    /// Stop admitting requests and wait, up to a grace period, for the ones
    /// already running to finish. Queued frames that have not started are dropped.
    pub(crate) fn drain(&self) {
        self.dispatcher.running.store(false, Ordering::Release);
        let deadline = Instant::now() + SHUTDOWN_GRACE;
        while self.dispatcher.in_flight() > 0 {
            if Instant::now() >= deadline {
                warn!(
                    in_flight = self.dispatcher.in_flight(),
                    "Requests still running after the shutdown grace period"
                );
                return;
            }
            thread::sleep(DRAIN_POLL);
        }
    }

    /// Shut the runtime down. Call [`drain`](Self::drain) first to let
    /// in-flight requests answer.
    pub(crate) fn stop(&self) {
        self.dispatcher.running.store(false, Ordering::Release);
        self.dispatcher.permits.close();
        if let Some(runtime) = self.runtime.lock().take() {
            runtime.shutdown_timeout(SHUTDOWN_GRACE);
        }
    }
}

async fn dispatch(message: String, connection: Connection) {
    let frame = match RequestFrame::parse(&message) {
        Ok(frame) => frame,
        Err(e) => {
            warn!(connection = %connection, error = %e, "Failed to parse a frame");
            report_failure(&connection, None, e);
            return;
        }
    };

    let entry = connection.context().registry.get(&frame.command_id).cloned();
    match entry {
        None => {
            warn!(connection = %connection, command = %frame.command_id, "Command not found");
            let error = SocketError::CommandNotFound(frame.command_id.clone());
            report_failure(&connection, Some(&frame.command_id), error);
        }
        Some(CommandEntry::Command(handler)) => run_command(connection, frame, handler).await,
        Some(CommandEntry::Sync { handler, timeout }) => {
            run_sync_command(connection, frame, handler, timeout).await
        }
    }
}

async fn run_command(connection: Connection, frame: RequestFrame, handler: Arc<dyn CommandHandler>) {
    let RequestFrame {
        command_id, body, ..
    } = frame;
    let conn = connection.clone();
    let outcome = tokio::task::spawn_blocking(move || handler.call(&body, &conn)).await;

    let error = match outcome {
        Ok(Ok(())) => return,
        Ok(Err(e)) => e,
        Err(join) => SocketError::handler(format!("handler panicked: {}", join)),
    };
    warn!(connection = %connection, command = %command_id, error = %error, "Command failed");
    report_failure(&connection, Some(&command_id), error);
}

async fn run_sync_command(
    connection: Connection,
    frame: RequestFrame,
    handler: Arc<dyn SyncCommandHandler>,
    timeout: Duration,
) {
    let RequestFrame {
        command_id,
        call_id,
        body,
    } = frame;
    let Some(call_id) = call_id else {
        let error = SocketError::Protocol(format!("sync command '{}' sent without call id", command_id));
        report_failure(&connection, Some(&command_id), error);
        return;
    };

    let conn = connection.clone();
    let task = tokio::task::spawn_blocking(move || handler.call(&body, &conn));

    let result = match tokio::time::timeout(timeout, task).await {
        Ok(Ok(Ok(value))) => SyncResultData::succeeded(&command_id, call_id, value),
        Ok(Ok(Err(e))) => {
            warn!(connection = %connection, command = %command_id, error = %e, "Sync command failed");
            SyncResultData::failed(&command_id, call_id, e.into_message())
        }
        Ok(Err(join)) => {
            warn!(connection = %connection, command = %command_id, "Sync command panicked");
            SyncResultData::failed(&command_id, call_id, format!("handler panicked: {}", join))
        }
        Err(_) => {
            warn!(
                connection = %connection,
                command = %command_id,
                timeout_ms = timeout.as_millis() as u64,
                "Sync command timed out"
            );
            SyncResultData::timed_out(&command_id, call_id)
        }
    };

    if let Err(e) = connection.send_command(SYNC_RESULT_COMMAND, &result) {
        warn!(connection = %connection, command = %command_id, error = %e, "Sync result not sent");
    }
}

fn report_failure(connection: &Connection, command_id: Option<&str>, error: SocketError) {
    connection.context().listeners.fire_exception(connection, &error);
    // Never answer an error frame with another one.
    if command_id == Some(ERROR_COMMAND) {
        return;
    }
    let data = ErrorData {
        command_id: command_id.map(str::to_owned),
        message: error.to_string(),
    };
    if let Err(e) = connection.send_command(ERROR_COMMAND, &data) {
        debug!(connection = %connection, error = %e, "Error frame not sent");
    }
}
