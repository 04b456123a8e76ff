//! Loop-side state of one connection.

use std::io;

use mio::event::Event;
use mio::{Registry, Token};
use tracing::{debug, trace};

use super::outbound::OutboundQueue;
use crate::connection::{Connection, Role};
use crate::error::Result;
use crate::protocol::FrameBuffer;
use crate::transport::{InterestCtl, Transport};
use crate::worker::Lane;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Connecting,
    Active,
}

/// Result of processing one readiness event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ChannelStatus {
    Open,
    Eof,
}

/// Owned by the event loop; never shared across threads.
pub(crate) struct Channel {
    connection: Connection,
    transport: Box<dyn Transport>,
    inbound: FrameBuffer,
    outbound: OutboundQueue,
    lane: Lane,
    interest: InterestCtl,
    registered: InterestCtl,
    phase: Phase,
    established: bool,
}

impl Channel {
    /// A channel whose socket is still connecting.
    pub(crate) fn connecting(
        connection: Connection,
        transport: Box<dyn Transport>,
        outbound: OutboundQueue,
    ) -> Self {
        Self::new(connection, transport, outbound, Phase::Connecting, InterestCtl::read_write())
    }

    /// A channel over an already connected socket.
    pub(crate) fn accepted(
        connection: Connection,
        transport: Box<dyn Transport>,
        outbound: OutboundQueue,
    ) -> Self {
        Self::new(connection, transport, outbound, Phase::Active, InterestCtl::read_only())
    }

    fn new(
        connection: Connection,
        transport: Box<dyn Transport>,
        outbound: OutboundQueue,
        phase: Phase,
        interest: InterestCtl,
    ) -> Self {
        let context = connection.context();
        let inbound =
            FrameBuffer::with_capacity_and_max(context.buffer_size, context.max_message_size);
        let lane = context.dispatcher.lane(connection.clone());
        Self {
            connection,
            transport,
            inbound,
            outbound,
            lane,
            interest,
            registered: interest,
            phase,
            established: false,
        }
    }

    pub(crate) fn connection(&self) -> &Connection {
        &self.connection
    }

    pub(crate) fn register(&mut self, registry: &Registry) -> io::Result<()> {
        let token = self.connection.token();
        registry.register(self.transport.source(), token, self.interest.to_mio())?;
        self.registered = self.interest;
        Ok(())
    }

    /// Start the transport on an accepted socket.
    pub(crate) fn start(&mut self) -> Result<()> {
        self.transport.begin(&mut self.interest)?;
        self.after_progress()
    }

    /// React to readiness: connect, then write, then read.
    pub(crate) fn process(&mut self, event: &Event) -> Result<ChannelStatus> {
        if self.phase == Phase::Connecting
            && (event.is_writable() || event.is_error() || event.is_write_closed())
        {
            self.finish_connect()?;
        }
        if self.phase == Phase::Active {
            if event.is_writable() {
                self.on_writable()?;
            }
            if event.is_readable() || event.is_read_closed() {
                if self.on_readable()? == ChannelStatus::Eof {
                    return Ok(ChannelStatus::Eof);
                }
            }
            self.after_progress()?;
        }
        Ok(ChannelStatus::Open)
    }

    /// Data was queued from another thread.
    pub(crate) fn want_write(&mut self) {
        self.interest.enable_write();
    }

    /// Re-register when the interest changed, or unconditionally when `force`d
    /// so that current readiness is reported again.
    pub(crate) fn sync_interest(&mut self, registry: &Registry, force: bool) -> io::Result<()> {
        if force || self.interest != self.registered {
            let token: Token = self.connection.token();
            registry.reregister(self.transport.source(), token, self.interest.to_mio())?;
            self.registered = self.interest;
        }
        Ok(())
    }

    /// Best-effort write of whatever is still queued, used when the loop stops.
    pub(crate) fn flush_before_close(&mut self) {
        if self.phase != Phase::Active {
            return;
        }
        if let Err(e) = self.on_writable() {
            trace!(error = %e, "final flush failed");
        }
    }

    pub(crate) fn shutdown(&mut self, registry: &Registry) {
        if let Err(e) = registry.deregister(self.transport.source()) {
            trace!(error = %e, "deregister failed");
        }
        self.transport.close();
    }

    fn finish_connect(&mut self) -> Result<()> {
        let stream = self.transport.source();
        if let Some(err) = stream.take_error()? {
            return Err(err.into());
        }
        match stream.peer_addr() {
            Ok(_) => {}
            Err(e) if e.kind() == io::ErrorKind::NotConnected => return Ok(()),
            Err(e) => return Err(e.into()),
        }
        stream.set_nodelay(true)?;

        debug!(remote = %self.connection.remote_addr(), "Socket connected");
        self.phase = Phase::Active;
        self.interest.narrow_to_read();
        self.transport.begin(&mut self.interest)?;
        Ok(())
    }

    fn on_writable(&mut self) -> Result<()> {
        let queue_drained = if self.transport.is_established() {
            self.outbound
                .flush_into(self.transport.as_mut(), &mut self.interest)?
        } else {
            true
        };
        let transport_drained = self.transport.flush(&mut self.interest)?;

        if queue_drained && transport_drained {
            self.interest.narrow_to_read();
        } else {
            self.interest.enable_write();
        }
        Ok(())
    }

    fn on_readable(&mut self) -> Result<ChannelStatus> {
        loop {
            if self.inbound.is_full() {
                self.dispatch_inbound()?;
                self.inbound.reserve_space()?;
            }
            match self
                .transport
                .read(self.inbound.spare_mut(), &mut self.interest)
            {
                Ok(0) => {
                    self.dispatch_inbound()?;
                    return Ok(ChannelStatus::Eof);
                }
                Ok(n) => {
                    trace!(bytes = n, connection = %self.connection, "read");
                    self.inbound.advance(n);
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
        self.dispatch_inbound()?;
        Ok(ChannelStatus::Open)
    }

    fn dispatch_inbound(&mut self) -> Result<()> {
        for message in self.inbound.drain_messages()? {
            self.lane.submit(message);
        }
        Ok(())
    }

    /// Handle the transition to an established transport.
    fn after_progress(&mut self) -> Result<()> {
        if self.established || !self.transport.is_established() {
            return Ok(());
        }
        self.established = true;
        if self.connection.role() == Role::Server {
            self.connection.announce_identity()?;
        }
        // Frames queued during the handshake.
        self.on_writable()
    }
}
