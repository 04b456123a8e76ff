//! A single reactor thread.
//!
//! Each loop owns one `mio::Poll` and the table of channels registered with it.
//! Other threads talk to the loop only through its [`LoopHandle`]: they push a
//! [`Task`] onto a channel and wake the poller.
//!
//! One iteration:
//! 1. drain submitted tasks
//! 2. run the heartbeat sweep when the interval has elapsed
//! 3. poll with a bounded timeout
//! 4. for every ready channel: finish connect, flush writes, read
//!
//! A failure on one channel closes that channel only.

use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam_channel::{unbounded, Receiver, Sender};
use mio::net::TcpStream;
use mio::{Events, Poll, Token, Waker};
use tracing::{debug, trace, warn};

use super::channel::{Channel, ChannelStatus};
use super::outbound::OutboundQueue;
use crate::connection::{Connection, ConnectionState};
use crate::error::{Result, SocketError};
use crate::transport::{PlainTransport, Transport};

const WAKE_TOKEN: Token = Token(0);
const POLL_TIMEOUT: Duration = Duration::from_secs(1);
const EVENTS_CAPACITY: usize = 1024;

/// Work submitted to a loop from other threads.
pub(crate) enum Task {
    /// Adopt an accepted socket.
    Register {
        stream: TcpStream,
        connection: Connection,
        outbound: OutboundQueue,
    },
    /// Open an outbound connection.
    Connect {
        addr: SocketAddr,
        connection: Connection,
        outbound: OutboundQueue,
    },
    /// Frames were queued; make sure write interest is on.
    EnableWrite(Token),
    /// Tear down a channel whose connection was closed by the user.
    Close(Token),
}

/// Cross-thread handle to a loop.
#[derive(Clone)]
pub(crate) struct LoopHandle {
    tx: Sender<Task>,
    waker: Arc<Waker>,
    next_token: Arc<AtomicUsize>,
}

impl LoopHandle {
    pub(crate) fn submit(&self, task: Task) {
        if self.tx.send(task).is_err() {
            trace!("event loop is gone, task dropped");
            return;
        }
        self.wake();
    }

    pub(crate) fn wake(&self) {
        if let Err(e) = self.waker.wake() {
            warn!(error = %e, "Failed to wake event loop");
        }
    }

    /// Tokens are never reused; 0 belongs to the waker.
    pub(crate) fn next_token(&self) -> Token {
        Token(self.next_token.fetch_add(1, Ordering::Relaxed))
    }
}

pub(crate) struct EventLoop {
    poll: Poll,
    rx: Receiver<Task>,
    channels: HashMap<Token, Channel>,
    running: Arc<AtomicBool>,
    heartbeat_interval: Duration,
}

impl EventLoop {
    pub(crate) fn new(
        running: Arc<AtomicBool>,
        heartbeat_interval: Duration,
    ) -> io::Result<(Self, LoopHandle)> {
        let poll = Poll::new()?;
        let waker = Arc::new(Waker::new(poll.registry(), WAKE_TOKEN)?);
        let (tx, rx) = unbounded();
        let handle = LoopHandle {
            tx,
            waker,
            next_token: Arc::new(AtomicUsize::new(1)),
        };
        let event_loop = Self {
            poll,
            rx,
            channels: HashMap::new(),
            running,
            heartbeat_interval,
        };
        Ok((event_loop, handle))
    }

    pub(crate) fn run(mut self) {
        let mut events = Events::with_capacity(EVENTS_CAPACITY);
        let mut last_heartbeat = Instant::now();
        debug!("Event loop started");

        while self.running.load(Ordering::Acquire) {
            self.drain_tasks();

            if last_heartbeat.elapsed() >= self.heartbeat_interval {
                last_heartbeat = Instant::now();
                self.heartbeat_sweep();
            }

            let until_heartbeat = self
                .heartbeat_interval
                .saturating_sub(last_heartbeat.elapsed());
            if let Err(e) = self.poll.poll(&mut events, Some(POLL_TIMEOUT.min(until_heartbeat))) {
                if e.kind() != io::ErrorKind::Interrupted {
                    warn!(error = %e, "An error occurred on event loop");
                }
                continue;
            }

            for event in events.iter() {
                let token = event.token();
                if token == WAKE_TOKEN {
                    continue;
                }
                let Some(channel) = self.channels.get_mut(&token) else {
                    trace!(?token, "event for a removed channel");
                    continue;
                };
                let outcome = channel.process(event).and_then(|status| {
                    if status == ChannelStatus::Open {
                        channel.sync_interest(self.poll.registry(), false)?;
                    }
                    Ok(status)
                });
                match outcome {
                    Ok(ChannelStatus::Open) => {}
                    Ok(ChannelStatus::Eof) => {
                        debug!(connection = %channel.connection(), "Peer closed the connection");
                        self.close_channel(token);
                    }
                    Err(e) => {
                        warn!(connection = %channel.connection(), error = %e, "Failed to process a connection");
                        self.close_channel(token);
                    }
                }
            }
        }

        // Frames queued by requests that finished while the loop was stopping.
        self.drain_tasks();
        self.close_all();
        debug!("Event loop stopped");
    }

    fn drain_tasks(&mut self) {
        while let Ok(task) = self.rx.try_recv() {
            match task {
                Task::Register {
                    stream,
                    connection,
                    outbound,
                } => self.register_accepted(stream, connection, outbound),
                Task::Connect {
                    addr,
                    connection,
                    outbound,
                } => self.connect(addr, connection, outbound),
                Task::EnableWrite(token) => {
                    if let Some(channel) = self.channels.get_mut(&token) {
                        channel.want_write();
                        if let Err(e) = channel.sync_interest(self.poll.registry(), true) {
                            warn!(connection = %channel.connection(), error = %e, "Failed to enable write interest");
                            self.close_channel(token);
                        }
                    }
                }
                Task::Close(token) => {
                    if let Some(mut channel) = self.channels.remove(&token) {
                        channel.shutdown(self.poll.registry());
                    }
                }
            }
        }
    }

    fn register_accepted(&mut self, stream: TcpStream, connection: Connection, outbound: OutboundQueue) {
        let token = connection.token();
        let result = build_transport(&connection, stream).and_then(|transport| {
            let mut channel = Channel::accepted(connection.clone(), transport, outbound);
            channel.register(self.poll.registry())?;
            channel.start()?;
            channel.sync_interest(self.poll.registry(), false)?;
            Ok(channel)
        });
        match result {
            Ok(channel) => {
                debug!(remote = %connection.remote_addr(), ?token, "Connection registered");
                self.channels.insert(token, channel);
            }
            Err(e) => {
                warn!(remote = %connection.remote_addr(), error = %e, "Failed to register a connection");
                connection.closed_by_loop();
            }
        }
    }

    fn connect(&mut self, addr: SocketAddr, connection: Connection, outbound: OutboundQueue) {
        let token = connection.token();
        let result = TcpStream::connect(addr)
            .map_err(SocketError::from)
            .and_then(|stream| build_transport(&connection, stream))
            .and_then(|transport| {
                let mut channel = Channel::connecting(connection.clone(), transport, outbound);
                channel.register(self.poll.registry())?;
                Ok(channel)
            });
        match result {
            Ok(channel) => {
                debug!(remote = %addr, ?token, "Connecting");
                self.channels.insert(token, channel);
            }
            Err(e) => {
                warn!(remote = %addr, error = %e, "Failed to start connecting");
                connection.closed_by_loop();
            }
        }
    }

    /// Every live channel is checked for silence, including ones still
    /// connecting or handshaking.
    fn heartbeat_sweep(&mut self) {
        for channel in self.channels.values() {
            let connection = channel.connection();
            if connection.state() != ConnectionState::Closed {
                connection.heartbeat(self.heartbeat_interval);
            }
        }
    }

    fn close_channel(&mut self, token: Token) {
        if let Some(mut channel) = self.channels.remove(&token) {
            channel.shutdown(self.poll.registry());
            channel.connection().closed_by_loop();
        }
    }

    fn close_all(&mut self) {
        let tokens: Vec<Token> = self.channels.keys().copied().collect();
        for token in tokens {
            if let Some(channel) = self.channels.get_mut(&token) {
                channel.flush_before_close();
            }
            self.close_channel(token);
        }
    }
}

fn build_transport(connection: &Connection, stream: TcpStream) -> Result<Box<dyn Transport>> {
    let plain = PlainTransport::new(stream);
    match &connection.context().tls {
        Some(tls) => Ok(Box::new(tls.wrap(plain)?)),
        None => Ok(Box::new(plain)),
    }
}
