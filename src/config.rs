//! Endpoint configuration.
//!
//! Plain structs with `Default` impls; the builders on
//! [`SocketServer`](crate::SocketServer) and [`SocketClient`](crate::SocketClient)
//! expose a fluent setter for every field.

use std::num::NonZeroUsize;
use std::time::Duration;

use crate::backoff::ReconnectPolicy;
use crate::protocol::{DEFAULT_BUFFER_SIZE, DEFAULT_MAX_ENVELOPE_SIZE};
use crate::transport::TlsConfig;

/// Default bind host.
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// Default bind port.
pub const DEFAULT_PORT: u16 = 30000;

/// Default heartbeat interval. A connection silent for three intervals is closed.
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(10);

/// Default time allowed for a client connection to receive its identity.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Default execution timeout of a sync command.
pub const DEFAULT_SYNC_TIMEOUT: Duration = Duration::from_secs(30);

/// Extra time a sync caller waits beyond the declared timeout.
pub const SYNC_NETWORK_MARGIN: Duration = Duration::from_millis(100);

/// Default number of async worker threads.
pub const DEFAULT_WORKER_THREADS: usize = 1;

/// Default size of the blocking pool that runs handlers.
pub const DEFAULT_HANDLER_THREADS: usize = 512;

/// Default cap on requests being processed at once.
pub const DEFAULT_MAX_CONCURRENT_REQUESTS: usize = 256;

/// Number of event loops a server starts by default: one per CPU.
pub fn default_event_loops() -> usize {
    std::thread::available_parallelism()
        .map(NonZeroUsize::get)
        .unwrap_or(1)
}

/// Settings shared by both endpoint kinds.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Prefix for thread names.
    pub name: String,
    /// Number of reactor threads.
    pub event_loops: usize,
    /// Number of async worker threads that schedule handlers.
    pub worker_threads: usize,
    /// Upper bound of the blocking pool running handlers.
    pub handler_threads: usize,
    /// Requests processed at once; further frames wait for a permit.
    pub max_concurrent_requests: usize,
    /// Initial per-connection inbound buffer size.
    pub buffer_size: usize,
    /// Largest frame a peer may send; a bigger one closes the connection.
    pub max_message_size: usize,
    /// Heartbeat period.
    pub heartbeat_interval: Duration,
    /// Timeout used when calling a sync command this endpoint did not register.
    pub default_sync_timeout: Duration,
    /// TLS settings; plaintext when `None`.
    pub tls: Option<TlsConfig>,
}

impl RuntimeConfig {
    fn named(name: &str, event_loops: usize) -> Self {
        Self {
            name: name.to_string(),
            event_loops,
            worker_threads: DEFAULT_WORKER_THREADS,
            handler_threads: DEFAULT_HANDLER_THREADS,
            max_concurrent_requests: DEFAULT_MAX_CONCURRENT_REQUESTS,
            buffer_size: DEFAULT_BUFFER_SIZE,
            max_message_size: DEFAULT_MAX_ENVELOPE_SIZE,
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            default_sync_timeout: DEFAULT_SYNC_TIMEOUT,
            tls: None,
        }
    }
}

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind host.
    pub host: String,
    /// Bind port; 0 picks an ephemeral port.
    pub port: u16,
    /// Shared runtime settings.
    pub runtime: RuntimeConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            runtime: RuntimeConfig::named("server", default_event_loops()),
        }
    }
}

/// Client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Time allowed for a new connection to receive its identity.
    pub connect_timeout: Duration,
    /// Retry schedule used when a node has to be reconnected.
    pub reconnect: ReconnectPolicy,
    /// Shared runtime settings.
    pub runtime: RuntimeConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            reconnect: ReconnectPolicy::default(),
            runtime: RuntimeConfig::named("client", 1),
        }
    }
}
