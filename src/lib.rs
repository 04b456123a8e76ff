//! # nsocket
//!
//! Command-oriented TCP messaging between a server and its clients.
//!
//! Each frame carries a command id, an optional call id, and a JSON body,
//! wrapped in a MessagePack string envelope. Commands are either
//! fire-and-forget or sync: a sync call blocks the caller until the peer's
//! handler returns, fails, or runs out of time.
//!
//! ## Architecture
//!
//! - **Event loops** (mio): own the sockets, split the byte stream into frames
//! - **Worker** (tokio): runs handlers off the loops, bounded by a semaphore
//! - **Transport**: plain TCP or TLS (rustls), negotiated inside the loops
//! - **Heartbeats**: every connection pings its peer and closes after three
//!   silent intervals
//!
//! ## Example
//!
//! ```no_run
//! use std::time::Duration;
//! use nsocket::{SocketClient, SocketServer};
//!
//! fn main() -> nsocket::Result<()> {
//!     let server = SocketServer::builder()
//!         .port(0)
//!         .sync_command("square", Duration::from_secs(5), |n: i64, _connection| Ok(n * n))
//!         .start()?;
//!
//!     let client = SocketClient::builder().open()?;
//!     let connection = client.add_node(server.local_addr())?;
//!     let squared: i64 = connection.send_sync_command("square", &7)?;
//!     assert_eq!(squared, 49);
//!     Ok(())
//! }
//! ```

pub mod codec;
pub mod config;
pub mod error;
pub mod handler;
pub mod protocol;

mod acceptor;
mod backoff;
mod client;
mod connection;
mod context;
mod endpoint;
mod reactor;
mod server;
mod sync;
mod transport;
mod worker;

pub use backoff::ReconnectPolicy;
pub use client::{ClientBuilder, SocketClient};
pub use config::{ClientConfig, RuntimeConfig, ServerConfig};
pub use connection::{Connection, ConnectionState, Role};
pub use error::{Result, SocketError, SyncCommandError};
pub use handler::{Command, Listener, SyncCommand};
pub use server::{ServerBuilder, SocketServer};
pub use transport::{PemSource, TlsConfig};
