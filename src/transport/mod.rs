//! Transport module - byte channels the event loop reads and writes.
//!
//! Provides:
//! - [`PlainTransport`] - a non-blocking TCP stream
//! - [`TlsTransport`] - rustls session layered over a [`PlainTransport`]
//! - [`TlsConfig`] - certificate material for either side
//!
//! Both transports follow the `std::io` contract: `Ok(0)` from `read` means the
//! peer is gone and `WouldBlock` means nothing more can be done until the socket
//! is ready again. Transports adjust write interest through [`InterestCtl`];
//! read interest is always kept.

mod plain;
mod tls;
mod tls_config;

use std::io;

use mio::net::TcpStream;
use mio::Interest;

pub(crate) use plain::PlainTransport;
pub(crate) use tls::TlsTransport;
pub use tls_config::{PemSource, TlsConfig};
pub(crate) use tls_config::TlsContext;

/// Byte channel driven by an event loop.
pub(crate) trait Transport: Send {
    /// Called once the socket is connected and registered.
    fn begin(&mut self, interest: &mut InterestCtl) -> io::Result<()>;

    /// Read application bytes into `dst`.
    fn read(&mut self, dst: &mut [u8], interest: &mut InterestCtl) -> io::Result<usize>;

    /// Write application bytes from `src`.
    fn write(&mut self, src: &[u8], interest: &mut InterestCtl) -> io::Result<usize>;

    /// Push out transport-level bytes. Returns true when nothing is left pending.
    fn flush(&mut self, interest: &mut InterestCtl) -> io::Result<bool>;

    /// Whether application data may flow.
    fn is_established(&self) -> bool;

    /// Shut the channel down; best effort.
    fn close(&mut self);

    /// The socket to register with the poller.
    fn source(&mut self) -> &mut TcpStream;
}

/// Registered interest of one channel.
///
/// Read interest is permanent; write interest is widened while bytes are
/// pending and narrowed once they are flushed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct InterestCtl {
    writable: bool,
}

impl InterestCtl {
    pub(crate) fn read_only() -> Self {
        Self { writable: false }
    }

    pub(crate) fn read_write() -> Self {
        Self { writable: true }
    }

    pub(crate) fn enable_write(&mut self) {
        self.writable = true;
    }

    pub(crate) fn narrow_to_read(&mut self) {
        self.writable = false;
    }

    #[cfg(test)]
    pub(crate) fn wants_write(&self) -> bool {
        self.writable
    }

    pub(crate) fn to_mio(self) -> Interest {
        if self.writable {
            Interest::READABLE | Interest::WRITABLE
        } else {
            Interest::READABLE
        }
    }
}
