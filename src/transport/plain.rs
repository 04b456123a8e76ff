//! Plaintext TCP transport.

use std::io::{self, Read, Write};
use std::net::Shutdown;

use mio::net::TcpStream;
use tracing::trace;

use super::{InterestCtl, Transport};

/// Non-blocking TCP stream.
pub(crate) struct PlainTransport {
    stream: TcpStream,
    open: bool,
}

impl PlainTransport {
    pub(crate) fn new(stream: TcpStream) -> Self {
        Self { stream, open: false }
    }

    pub(crate) fn stream_mut(&mut self) -> &mut TcpStream {
        &mut self.stream
    }
}

impl Transport for PlainTransport {
    fn begin(&mut self, _interest: &mut InterestCtl) -> io::Result<()> {
        self.open = true;
        Ok(())
    }

    fn read(&mut self, dst: &mut [u8], _interest: &mut InterestCtl) -> io::Result<usize> {
        self.stream.read(dst)
    }

    fn write(&mut self, src: &[u8], _interest: &mut InterestCtl) -> io::Result<usize> {
        self.stream.write(src)
    }

    fn flush(&mut self, _interest: &mut InterestCtl) -> io::Result<bool> {
        Ok(true)
    }

    fn is_established(&self) -> bool {
        self.open
    }

    fn close(&mut self) {
        if self.open {
            self.open = false;
            if let Err(e) = self.stream.shutdown(Shutdown::Both) {
                trace!(error = %e, "socket shutdown failed");
            }
        }
    }

    fn source(&mut self) -> &mut TcpStream {
        &mut self.stream
    }
}
