//! Client builder, node table, and reconnect logic.
//!
//! A [`SocketClient`] keeps at most one connection per server address (a
//! "node"). [`SocketClient::add_node`] makes a single connection attempt;
//! [`SocketClient::connection`] returns the open connection for an address,
//! reconnecting with the configured [`ReconnectPolicy`] when there is none.
//!
//! # Example
//!
//! ```no_run
//! use nsocket::SocketClient;
//!
//! fn main() -> nsocket::Result<()> {
//!     let client = SocketClient::builder()
//!         .command("pong", |message: String, _connection| {
//!             println!("pong: {}", message);
//!             Ok(())
//!         })
//!         .open()?;
//!
//!     let connection = client.add_node("127.0.0.1:30000")?;
//!     connection.send_command("ping", &"hello")?;
//!     let squared: i64 = connection.send_sync_command("square", &7)?;
//!     assert_eq!(squared, 49);
//!
//!     client.close();
//!     Ok(())
//! }
//! ```

use std::collections::HashMap;
use std::io;
use std::net::{SocketAddr, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::backoff::ReconnectPolicy;
use crate::config::ClientConfig;
use crate::connection::{Connection, ConnectionState, Role};
use crate::endpoint::Endpoint;
use crate::error::{Result, SocketError};
use crate::handler::{Command, CommandRegistry, Listener, ListenerRegistry, SyncCommand};
use crate::reactor::Task;
use crate::transport::{TlsConfig, TlsContext};

/// Fluent configuration for a [`SocketClient`].
pub struct ClientBuilder {
    config: ClientConfig,
    registry: CommandRegistry,
    listeners: ListenerRegistry,
}

impl Default for ClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ClientBuilder {
    /// Builder with [`ClientConfig::default`].
    pub fn new() -> Self {
        Self {
            config: ClientConfig::default(),
            registry: CommandRegistry::new(),
            listeners: ListenerRegistry::new(),
        }
    }

    /// Replace the whole configuration.
    pub fn config(mut self, config: ClientConfig) -> Self {
        self.config = config;
        self
    }

    /// Thread name prefix.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.config.runtime.name = name.into();
        self
    }

    /// Number of event loops.
    pub fn event_loops(mut self, count: usize) -> Self {
        self.config.runtime.event_loops = count;
        self
    }

    /// Number of async worker threads.
    pub fn worker_threads(mut self, count: usize) -> Self {
        self.config.runtime.worker_threads = count;
        self
    }

    /// Upper bound of the handler pool.
    pub fn handler_threads(mut self, count: usize) -> Self {
        self.config.runtime.handler_threads = count;
        self
    }

    /// Requests processed at once.
    pub fn max_concurrent_requests(mut self, count: usize) -> Self {
        self.config.runtime.max_concurrent_requests = count;
        self
    }

    /// Initial inbound buffer size per connection.
    pub fn buffer_size(mut self, size: usize) -> Self {
        self.config.runtime.buffer_size = size;
        self
    }

    /// Largest frame accepted from a peer.
    pub fn max_message_size(mut self, size: usize) -> Self {
        self.config.runtime.max_message_size = size;
        self
    }

    /// Heartbeat period.
    pub fn heartbeat_interval(mut self, interval: Duration) -> Self {
        self.config.runtime.heartbeat_interval = interval;
        self
    }

    /// Timeout for sync calls to commands not registered here.
    pub fn default_sync_timeout(mut self, timeout: Duration) -> Self {
        self.config.runtime.default_sync_timeout = timeout;
        self
    }

    /// Time a new connection has to receive its identity.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.connect_timeout = timeout;
        self
    }

    /// Retry schedule for [`SocketClient::connection`].
    pub fn reconnect(mut self, policy: ReconnectPolicy) -> Self {
        self.config.reconnect = policy;
        self
    }

    /// Connect over TLS.
    pub fn tls(mut self, tls: TlsConfig) -> Self {
        self.config.runtime.tls = Some(tls);
        self
    }

    /// Register a closure as a fire-and-forget command.
    pub fn command<F, T>(mut self, id: &str, handler: F) -> Self
    where
        F: Fn(T, &Connection) -> Result<()> + Send + Sync + 'static,
        T: DeserializeOwned + 'static,
    {
        self.registry.register_command(id, handler);
        self
    }

    /// Register a closure as a sync command.
    pub fn sync_command<F, T, R>(mut self, id: &str, timeout: Duration, handler: F) -> Self
    where
        F: Fn(T, &Connection) -> Result<R> + Send + Sync + 'static,
        T: DeserializeOwned + 'static,
        R: Serialize + 'static,
    {
        self.registry.register_sync_command(id, timeout, handler);
        self
    }

    /// Register a [`Command`] type.
    pub fn register_command<C: Command>(mut self, command: C) -> Self {
        self.registry.register(command);
        self
    }

    /// Register a [`SyncCommand`] type.
    pub fn register_sync_command<C: SyncCommand>(mut self, command: C) -> Self {
        self.registry.register_sync(command);
        self
    }

    /// Add a lifecycle listener.
    pub fn listener(mut self, listener: impl Listener) -> Self {
        self.listeners.register(listener);
        self
    }

    /// Start the client's loops and worker. No connection is made yet.
    pub fn open(mut self) -> Result<SocketClient> {
        let nodes = Arc::new(NodeTable::default());
        self.listeners
            .register(NodeTableListener(Arc::clone(&nodes)));

        let ClientConfig {
            connect_timeout,
            reconnect,
            runtime,
        } = self.config;
        let tls = runtime.tls.as_ref().map(TlsContext::client).transpose()?;
        let endpoint = Endpoint::start(&runtime, self.registry, self.listeners, tls)?;

        info!(name = %runtime.name, "Client started");
        Ok(SocketClient {
            endpoint,
            nodes,
            connect_timeout,
            reconnect,
            reconnect_lock: Mutex::new(()),
            running: AtomicBool::new(true),
        })
    }
}

/// Current connection per server address.
#[derive(Default)]
struct NodeTable {
    nodes: Mutex<HashMap<SocketAddr, Connection>>,
}

impl NodeTable {
    fn get(&self, addr: &SocketAddr) -> Option<Connection> {
        self.nodes.lock().get(addr).cloned()
    }

    fn insert(&self, addr: SocketAddr, connection: Connection) {
        self.nodes.lock().insert(addr, connection);
    }

    /// Remove `connection` only if it is still the entry for its address.
    fn remove_if_same(&self, connection: &Connection) {
        let mut nodes = self.nodes.lock();
        let addr = connection.remote_addr();
        if nodes.get(&addr).is_some_and(|current| current.same_as(connection)) {
            nodes.remove(&addr);
            debug!(%addr, "Node removed");
        }
    }

    fn clear(&self) {
        self.nodes.lock().clear();
    }
}

struct NodeTableListener(Arc<NodeTable>);

impl Listener for NodeTableListener {
    fn on_disconnected(&self, connection: &Connection) {
        self.0.remove_if_same(connection);
    }
}

/// A running client.
///
/// Dropping the client closes it.
pub struct SocketClient {
    endpoint: Endpoint,
    nodes: Arc<NodeTable>,
    connect_timeout: Duration,
    reconnect: ReconnectPolicy,
    reconnect_lock: Mutex<()>,
    running: AtomicBool,
}

impl SocketClient {
    /// Start configuring a client.
    pub fn builder() -> ClientBuilder {
        ClientBuilder::new()
    }

    /// Connect to a server with a single attempt.
    ///
    /// An already open connection to the same address is returned as is.
    pub fn add_node(&self, addr: impl ToSocketAddrs) -> Result<Connection> {
        self.ensure_running()?;
        let addr = resolve(addr)?;
        if let Some(existing) = self.nodes.get(&addr).filter(Connection::is_open) {
            warn!(%addr, "Node already added");
            return Ok(existing);
        }
        self.open_connection(addr)
    }

    /// The open connection to `addr`, reconnecting when there is none.
    ///
    /// Fails with [`SocketError::ReconnectExhausted`] once the policy's
    /// attempts are used up.
    pub fn connection(&self, addr: impl ToSocketAddrs) -> Result<Connection> {
        self.ensure_running()?;
        let addr = resolve(addr)?;
        if let Some(open) = self.nodes.get(&addr).filter(Connection::is_open) {
            return Ok(open);
        }

        let _guard = self.reconnect_lock.lock();
        // Another caller may have reconnected while we waited.
        if let Some(open) = self.nodes.get(&addr).filter(Connection::is_open) {
            return Ok(open);
        }

        self.reconnect
            .retry(
                |attempt| {
                    if attempt > 1 {
                        info!(%addr, attempt, "Reconnecting");
                    }
                    self.ensure_running()?;
                    self.open_connection(addr)
                },
                thread::sleep,
            )
            .ok_or(SocketError::ReconnectExhausted {
                addr,
                attempts: self.reconnect.max_attempts,
            })
    }

    /// Replace a (possibly dead) connection with a fresh one to the same address.
    pub fn reconnect(&self, connection: &Connection) -> Result<Connection> {
        if connection.state() != ConnectionState::Closed {
            connection.close();
        }
        self.connection(connection.remote_addr())
    }

    /// Sync calls still waiting for a result.
    pub fn pending_sync_calls(&self) -> usize {
        self.endpoint.context.sync_manager.pending_count()
    }

    /// Whether [`close`](Self::close) has not been called yet.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Close every connection and stop the client's threads.
    pub fn close(&self) {
        if !self.running.swap(false, Ordering::AcqRel) {
            return;
        }
        self.endpoint.stop();
        self.nodes.clear();
        info!("Client closed");
    }

    fn ensure_running(&self) -> Result<()> {
        if self.is_running() {
            Ok(())
        } else {
            Err(SocketError::NotRunning)
        }
    }

    fn open_connection(&self, addr: SocketAddr) -> Result<Connection> {
        let loop_handle = self.endpoint.loops.select();
        let (connection, outbound) = Connection::new(
            Role::Client,
            addr,
            loop_handle.clone(),
            Arc::clone(&self.endpoint.context),
        );
        loop_handle.submit(Task::Connect {
            addr,
            connection: connection.clone(),
            outbound,
        });

        if let Err(e) = connection.wait_until_open(self.connect_timeout) {
            if connection.state() != ConnectionState::Closed {
                connection.close();
            }
            return Err(e);
        }
        self.nodes.insert(addr, connection.clone());
        Ok(connection)
    }
}

impl Drop for SocketClient {
    fn drop(&mut self) {
        self.close();
    }
}

fn resolve(addr: impl ToSocketAddrs) -> Result<SocketAddr> {
    addr.to_socket_addrs()?.next().ok_or_else(|| {
        io::Error::new(io::ErrorKind::InvalidInput, "address resolved to nothing").into()
    })
}
