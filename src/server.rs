//! Server builder and lifecycle.
//!
//! [`ServerBuilder`] collects configuration, commands, and listeners;
//! [`ServerBuilder::start`] binds the port and brings up:
//! 1. the handler worker
//! 2. the event loop group
//! 3. the acceptor thread, which spreads new sockets over the loops
//!
//! # Example
//!
//! ```no_run
//! use std::time::Duration;
//! use nsocket::SocketServer;
//!
//! fn main() -> nsocket::Result<()> {
//!     let server = SocketServer::builder()
//!         .port(30000)
//!         .command("ping", |message: String, connection| {
//!             connection.send_command("pong", &message)
//!         })
//!         .sync_command("square", Duration::from_secs(5), |n: i64, _connection| Ok(n * n))
//!         .start()?;
//!
//!     println!("listening on {}", server.local_addr());
//!     server.stop();
//!     Ok(())
//! }
//! ```

use std::net::{SocketAddr, TcpListener};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::info;

use crate::acceptor::Acceptor;
use crate::config::ServerConfig;
use crate::connection::Connection;
use crate::endpoint::Endpoint;
use crate::error::Result;
use crate::handler::{Command, CommandRegistry, Listener, ListenerRegistry, SyncCommand};
use crate::transport::{TlsConfig, TlsContext};

/// Fluent configuration for a [`SocketServer`].
pub struct ServerBuilder {
    config: ServerConfig,
    registry: CommandRegistry,
    listeners: ListenerRegistry,
}

impl Default for ServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ServerBuilder {
    /// Builder with [`ServerConfig::default`].
    pub fn new() -> Self {
        Self {
            config: ServerConfig::default(),
            registry: CommandRegistry::new(),
            listeners: ListenerRegistry::new(),
        }
    }

    /// Replace the whole configuration.
    pub fn config(mut self, config: ServerConfig) -> Self {
        self.config = config;
        self
    }

    /// Thread name prefix.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.config.runtime.name = name.into();
        self
    }

    /// Bind host.
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.config.host = host.into();
        self
    }

    /// Bind port; 0 picks an ephemeral port.
    pub fn port(mut self, port: u16) -> Self {
        self.config.port = port;
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

    /// Serve TLS.
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

    /// Bind and start serving.
    pub fn start(self) -> Result<SocketServer> {
        let ServerConfig {
            host,
            port,
            runtime,
        } = self.config;

        let tls = runtime.tls.as_ref().map(TlsContext::server).transpose()?;
        let listener = TcpListener::bind((host.as_str(), port))?;
        let endpoint = Endpoint::start(&runtime, self.registry, self.listeners, tls)?;

        let acceptor = match Acceptor::start(
            &runtime.name,
            listener,
            endpoint.loops.clone(),
            endpoint.context.clone(),
        ) {
            Ok(acceptor) => acceptor,
            Err(e) => {
                endpoint.stop();
                return Err(e);
            }
        };

        info!(local_addr = %acceptor.local_addr(), "Server started");
        Ok(SocketServer {
            endpoint,
            acceptor,
            running: AtomicBool::new(true),
        })
    }
}

/// A running server.
///
/// Dropping the server stops it.
pub struct SocketServer {
    endpoint: Endpoint,
    acceptor: Acceptor,
    running: AtomicBool,
}

impl SocketServer {
    /// Start configuring a server.
    pub fn builder() -> ServerBuilder {
        ServerBuilder::new()
    }

    /// Address the server is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.acceptor.local_addr()
    }

    /// Whether [`stop`](Self::stop) has not been called yet.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Stop accepting, close every connection, and shut the worker down.
    pub fn stop(&self) {
        if !self.running.swap(false, Ordering::AcqRel) {
            return;
        }
        self.acceptor.stop();
        self.endpoint.stop();
        info!(local_addr = %self.local_addr(), "Server stopped");
    }
}

impl Drop for SocketServer {
    fn drop(&mut self) {
        self.stop();
    }
}
