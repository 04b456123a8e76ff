//! Connection handle.
//!
//! A [`Connection`] is a cheap, cloneable handle to one socket owned by an event
//! loop. Any thread may send on it: frames are encoded on the calling thread,
//! queued, and the owning loop is asked to enable write interest. The socket
//! itself is only ever touched by its loop.
//!
//! # Lifecycle
//!
//! ```text
//! Connecting ──(identity assigned)──► Open ──(close, either side)──► Closed
//!      └──────────────(connect / handshake failure)──────────────────┘
//! ```
//!
//! A server connection gets its identity once the transport is established and
//! sends it to the client in a `__set_connection_id` frame; the client connection
//! becomes open when that frame arrives.
//!
//! # Example
//!
//! ```no_run
//! use nsocket::{Connection, Result};
//!
//! fn greet(connection: &Connection) -> Result<()> {
//!     connection.send_command("ping", &"hello")?;
//!     let squared: i64 = connection.send_sync_command("square", &7)?;
//!     assert_eq!(squared, 49);
//!     Ok(())
//! }
//! ```

use std::any::Any;
use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use mio::Token;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::codec::JsonCodec;
use crate::config::SYNC_NETWORK_MARGIN;
use crate::context::Context;
use crate::error::{Result, SocketError, SyncCommandError};
use crate::protocol::{
    validate_command_id, RequestFrame, SyncStatus, HEARTBEAT_COMMAND, SET_CONNECTION_ID_COMMAND,
};
use crate::reactor::{outbound_queue, LoopHandle, OutboundQueue, OutboundSender, Task};

/// Which side created the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Accepted by a server.
    Server,
    /// Initiated by a client.
    Client,
}

/// Lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnectionState {
    /// Socket or handshake in progress, no identity yet.
    Connecting = 0,
    /// Identity assigned; traffic flows.
    Open = 1,
    /// Torn down.
    Closed = 2,
}

impl ConnectionState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Connecting,
            1 => Self::Open,
            _ => Self::Closed,
        }
    }
}

type Attachment = Arc<dyn Any + Send + Sync>;

struct Inner {
    id: AtomicU64,
    role: Role,
    remote_addr: SocketAddr,
    token: Token,
    state: AtomicU8,
    outbound: OutboundSender,
    loop_handle: LoopHandle,
    context: Arc<Context>,
    attachment: Mutex<Option<Attachment>>,
    last_heartbeat: Mutex<Instant>,
    ready_tx: Sender<bool>,
    ready_rx: Receiver<bool>,
}

/// Handle to one connection.
#[derive(Clone)]
pub struct Connection {
    inner: Arc<Inner>,
}

impl Connection {
    /// Create a handle plus the outbound queue its loop will drain.
    pub(crate) fn new(
        role: Role,
        remote_addr: SocketAddr,
        loop_handle: LoopHandle,
        context: Arc<Context>,
    ) -> (Self, OutboundQueue) {
        let (outbound, queue) = outbound_queue();
        let (ready_tx, ready_rx) = bounded(1);
        let token = loop_handle.next_token();
        let connection = Self {
            inner: Arc::new(Inner {
                id: AtomicU64::new(0),
                role,
                remote_addr,
                token,
                state: AtomicU8::new(ConnectionState::Connecting as u8),
                outbound,
                loop_handle,
                context,
                attachment: Mutex::new(None),
                last_heartbeat: Mutex::new(Instant::now()),
                ready_tx,
                ready_rx,
            }),
        };
        (connection, queue)
    }

    /// Connection id; 0 until the identity is assigned.
    pub fn id(&self) -> u64 {
        self.inner.id.load(Ordering::Acquire)
    }

    /// Which side created this connection.
    pub fn role(&self) -> Role {
        self.inner.role
    }

    /// Peer address.
    pub fn remote_addr(&self) -> SocketAddr {
        self.inner.remote_addr
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.inner.state.load(Ordering::Acquire))
    }

    /// Whether the connection is open for traffic.
    pub fn is_open(&self) -> bool {
        self.state() == ConnectionState::Open
    }

    /// Whether both handles refer to the same connection.
    pub fn same_as(&self, other: &Connection) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Envelopes queued but not yet written to the socket.
    pub fn pending_frames(&self) -> usize {
        self.inner.outbound.pending_count()
    }

    /// Send a fire-and-forget command.
    pub fn send_command<T: Serialize + ?Sized>(&self, command_id: &str, body: &T) -> Result<()> {
        self.write_request(command_id, None, body)
    }

    /// Call a sync command and block until its result arrives.
    ///
    /// Waits for the timeout registered locally for `command_id`, or the
    /// endpoint's default sync timeout, plus a small network margin.
    pub fn send_sync_command<T, R>(&self, command_id: &str, body: &T) -> Result<R>
    where
        T: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let timeout = self
            .inner
            .context
            .registry
            .sync_timeout(command_id)
            .unwrap_or(self.inner.context.default_sync_timeout);
        self.send_sync_command_with_timeout(command_id, body, timeout)
    }

    /// Call a sync command with an explicit timeout.
    pub fn send_sync_command_with_timeout<T, R>(
        &self,
        command_id: &str,
        body: &T,
        timeout: Duration,
    ) -> Result<R>
    where
        T: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let pending = self.inner.context.sync_manager.register();
        self.write_request(command_id, Some(pending.call_id()), body)?;

        let reply = pending
            .wait(timeout + SYNC_NETWORK_MARGIN)
            .ok_or(SyncCommandError::NoResponse)?;

        match reply.status {
            SyncStatus::Succeeded => {
                let value = reply.result.unwrap_or(Value::Null);
                JsonCodec::convert(value)
                    .map_err(|e| SyncCommandError::InvalidResult(e.to_string()).into())
            }
            SyncStatus::Failed => {
                Err(SyncCommandError::Failed(reply.error_message.unwrap_or_default()).into())
            }
            SyncStatus::Timeout => Err(SyncCommandError::Timeout.into()),
        }
    }

    /// Attach a value, replacing any previous one.
    pub fn attach<V: Any + Send + Sync>(&self, value: V) {
        *self.inner.attachment.lock() = Some(Arc::new(value));
    }

    /// The attached value, if one of type `V` is present.
    pub fn attachment<V: Any + Send + Sync>(&self) -> Option<Arc<V>> {
        let attachment = self.inner.attachment.lock().clone()?;
        attachment.downcast::<V>().ok()
    }

    /// Close the connection.
    ///
    /// Idempotent: a second call only logs a warning.
    pub fn close(&self) {
        if !self.transition_to_closed() {
            warn!(connection = %self, "Connection already closed");
            return;
        }
        self.inner.loop_handle.submit(Task::Close(self.inner.token));
        self.finish_close();
    }

    pub(crate) fn context(&self) -> &Arc<Context> {
        &self.inner.context
    }

    pub(crate) fn token(&self) -> Token {
        self.inner.token
    }

    /// Closed by the owning loop (I/O error, EOF, shutdown).
    pub(crate) fn closed_by_loop(&self) {
        if self.transition_to_closed() {
            self.finish_close();
        }
    }

    fn transition_to_closed(&self) -> bool {
        self.inner.state.swap(ConnectionState::Closed as u8, Ordering::AcqRel)
            != ConnectionState::Closed as u8
    }

    fn finish_close(&self) {
        info!(connection = %self, "Connection closed");
        let _ = self.inner.ready_tx.try_send(false);
        self.inner.context.listeners.fire_disconnected(self);
    }

    /// Adopt an identity and open the connection.
    pub(crate) fn mark_open(&self, id: u64) {
        self.inner.id.store(id, Ordering::Release);
        self.touch_heartbeat();
        let opened = self
            .inner
            .state
            .compare_exchange(
                ConnectionState::Connecting as u8,
                ConnectionState::Open as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok();
        if !opened {
            debug!(connection = %self, "Identity assigned to a connection that is not connecting");
            return;
        }
        info!(connection = %self, "Connected");
        self.inner.context.listeners.fire_connected(self);
        let _ = self.inner.ready_tx.try_send(true);
    }

    /// Server side: assign the next id and tell the client about it.
    pub(crate) fn announce_identity(&self) -> Result<()> {
        let id = self.inner.context.next_connection_id();
        self.mark_open(id);
        self.send_command(SET_CONNECTION_ID_COMMAND, &id)
    }

    /// Block until the connection opens, fails, or `timeout` passes.
    pub(crate) fn wait_until_open(&self, timeout: Duration) -> Result<()> {
        match self.inner.ready_rx.recv_timeout(timeout) {
            Ok(true) => Ok(()),
            Ok(false) | Err(RecvTimeoutError::Disconnected) => {
                Err(SocketError::ConnectFailed(self.remote_addr()))
            }
            Err(RecvTimeoutError::Timeout) => Err(SocketError::ConnectTimeout(self.remote_addr())),
        }
    }

    pub(crate) fn touch_heartbeat(&self) {
        *self.inner.last_heartbeat.lock() = Instant::now();
    }

    /// Heartbeat sweep: close if the peer went silent, otherwise send a heartbeat.
    ///
    /// A connection that is not open yet (socket or TLS handshake in progress,
    /// identity not received) is only checked for silence.
    pub(crate) fn heartbeat(&self, interval: Duration) {
        let silent_for = self.inner.last_heartbeat.lock().elapsed();
        if silent_for > interval * 3 {
            warn!(
                connection = %self,
                silent_ms = silent_for.as_millis() as u64,
                "Connection might be dead, closing it"
            );
            self.close();
            return;
        }
        if !self.is_open() {
            return;
        }
        if let Err(e) = self.send_command(HEARTBEAT_COMMAND, &()) {
            debug!(connection = %self, error = %e, "Heartbeat not sent");
        }
    }

    fn write_request<T: Serialize + ?Sized>(
        &self,
        command_id: &str,
        call_id: Option<u64>,
        body: &T,
    ) -> Result<()> {
        if self.state() == ConnectionState::Closed {
            return Err(SocketError::ConnectionClosed);
        }
        validate_command_id(command_id)?;
        let frame = RequestFrame::new(command_id, call_id, JsonCodec::encode(body)?);
        self.inner.outbound.send(frame.to_envelope()?)?;
        self.inner.loop_handle.submit(Task::EnableWrite(self.inner.token));
        Ok(())
    }
}

impl fmt::Display for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Connection{{{}@{}}}", self.id(), self.remote_addr())
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id())
            .field("role", &self.role())
            .field("remote_addr", &self.remote_addr())
            .field("state", &self.state())
            .finish()
    }
}
