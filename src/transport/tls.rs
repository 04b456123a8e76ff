//! TLS transport over a plaintext stream.
//!
//! The session moves through
//! `NotStarted -> Handshaking(NeedWrap | NeedUnwrap) -> Established -> Closed`.
//! While handshaking, records the engine produces are flushed as soon as they
//! exist; if the socket refuses them, write interest is widened so the loop
//! comes back. Application bytes are only accepted once established, and
//! decrypted bytes left over from a previous read are handed out before more
//! ciphertext is pulled from the socket.
//!
//! Any engine error (bad certificate, missing client certificate, corrupt
//! record) is fatal for the connection.

use std::io::{self, Read, Write};

use mio::net::TcpStream;
use rustls::{ClientConnection, IoState, ServerConnection};
use tracing::{debug, trace};

use super::{InterestCtl, PlainTransport, Transport};

/// What the handshake is waiting for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakePhase {
    /// Records are queued for the peer.
    NeedWrap,
    /// Waiting for records from the peer.
    NeedUnwrap,
}

/// Session state of a TLS connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TlsState {
    /// Created, not yet connected.
    NotStarted,
    /// Handshake in progress.
    Handshaking(HandshakePhase),
    /// Application data may flow.
    Established,
    /// Closed locally, by the peer, or by an engine error.
    Closed,
}

enum Session {
    Client(ClientConnection),
    Server(ServerConnection),
}

impl Session {
    fn read_tls(&mut self, stream: &mut TcpStream) -> io::Result<usize> {
        match self {
            Session::Client(conn) => conn.read_tls(stream),
            Session::Server(conn) => conn.read_tls(stream),
        }
    }

    fn write_tls(&mut self, stream: &mut TcpStream) -> io::Result<usize> {
        match self {
            Session::Client(conn) => conn.write_tls(stream),
            Session::Server(conn) => conn.write_tls(stream),
        }
    }

    fn process_new_packets(&mut self) -> Result<IoState, rustls::Error> {
        match self {
            Session::Client(conn) => conn.process_new_packets(),
            Session::Server(conn) => conn.process_new_packets(),
        }
    }

    fn reader(&mut self) -> rustls::Reader<'_> {
        match self {
            Session::Client(conn) => conn.reader(),
            Session::Server(conn) => conn.reader(),
        }
    }

    fn writer(&mut self) -> rustls::Writer<'_> {
        match self {
            Session::Client(conn) => conn.writer(),
            Session::Server(conn) => conn.writer(),
        }
    }

    fn wants_write(&self) -> bool {
        match self {
            Session::Client(conn) => conn.wants_write(),
            Session::Server(conn) => conn.wants_write(),
        }
    }

    fn is_handshaking(&self) -> bool {
        match self {
            Session::Client(conn) => conn.is_handshaking(),
            Session::Server(conn) => conn.is_handshaking(),
        }
    }

    fn send_close_notify(&mut self) {
        match self {
            Session::Client(conn) => conn.send_close_notify(),
            Session::Server(conn) => conn.send_close_notify(),
        }
    }

    fn side(&self) -> &'static str {
        match self {
            Session::Client(_) => "client",
            Session::Server(_) => "server",
        }
    }
}

/// TLS session layered over a plaintext stream.
pub(crate) struct TlsTransport {
    inner: PlainTransport,
    session: Session,
    state: TlsState,
    eof: bool,
}

impl TlsTransport {
    pub(crate) fn client(inner: PlainTransport, conn: ClientConnection) -> Self {
        Self::new(inner, Session::Client(conn))
    }

    pub(crate) fn server(inner: PlainTransport, conn: ServerConnection) -> Self {
        Self::new(inner, Session::Server(conn))
    }

    fn new(inner: PlainTransport, session: Session) -> Self {
        Self {
            inner,
            session,
            state: TlsState::NotStarted,
            eof: false,
        }
    }

    #[cfg(test)]
    pub(crate) fn state(&self) -> TlsState {
        self.state
    }

    /// Write queued records to the socket. Returns true when none are left.
    fn flush_records(&mut self) -> io::Result<bool> {
        while self.session.wants_write() {
            match self.session.write_tls(self.inner.stream_mut()) {
                Ok(0) => return Ok(false),
                Ok(n) => trace!(bytes = n, "wrap: records sent"),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(false),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(true)
    }

    fn refresh_state(&mut self) {
        let next = match self.state {
            TlsState::Closed => return,
            _ if !self.session.is_handshaking() => TlsState::Established,
            _ if self.session.wants_write() => TlsState::Handshaking(HandshakePhase::NeedWrap),
            _ => TlsState::Handshaking(HandshakePhase::NeedUnwrap),
        };
        if next != self.state {
            if next == TlsState::Established {
                debug!(side = self.session.side(), "Handshaking finished");
            } else {
                trace!(side = self.session.side(), state = ?next, "handshake step");
            }
            self.state = next;
        }
    }

    /// Pull ciphertext until plaintext is available or the socket is drained.
    fn unwrap_records(&mut self, interest: &mut InterestCtl) -> io::Result<()> {
        loop {
            match self.session.read_tls(self.inner.stream_mut()) {
                Ok(0) => {
                    self.eof = true;
                    break;
                }
                Ok(n) => trace!(bytes = n, "unwrap: records received"),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }

            let io_state = match self.session.process_new_packets() {
                Ok(io_state) => io_state,
                Err(e) => {
                    // The engine queued an alert for the peer.
                    let _ = self.flush_records();
                    self.state = TlsState::Closed;
                    return Err(io::Error::new(io::ErrorKind::InvalidData, e));
                }
            };

            if self.session.wants_write() && !self.flush_records()? {
                interest.enable_write();
            }
            if io_state.plaintext_bytes_to_read() > 0 || io_state.peer_has_closed() {
                break;
            }
        }
        self.refresh_state();
        Ok(())
    }

    fn take_plaintext(&mut self, dst: &mut [u8]) -> io::Result<Option<usize>> {
        match self.session.reader().read(dst) {
            Ok(0) if !dst.is_empty() => {
                debug!(side = self.session.side(), "Peer closed the TLS session");
                self.state = TlsState::Closed;
                Ok(Some(0))
            }
            Ok(n) => Ok(Some(n)),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(None),
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                self.state = TlsState::Closed;
                Ok(Some(0))
            }
            Err(e) => Err(e),
        }
    }
}

impl Transport for TlsTransport {
    fn begin(&mut self, interest: &mut InterestCtl) -> io::Result<()> {
        self.inner.begin(interest)?;
        debug!(side = self.session.side(), "Start handshaking");
        if !self.flush_records()? {
            interest.enable_write();
        }
        self.refresh_state();
        Ok(())
    }

    fn read(&mut self, dst: &mut [u8], interest: &mut InterestCtl) -> io::Result<usize> {
        if self.state == TlsState::Closed {
            return Ok(0);
        }
        if let Some(n) = self.take_plaintext(dst)? {
            return Ok(n);
        }
        self.unwrap_records(interest)?;
        match self.take_plaintext(dst)? {
            Some(n) => Ok(n),
            None if self.eof => {
                self.state = TlsState::Closed;
                Ok(0)
            }
            None => Err(io::ErrorKind::WouldBlock.into()),
        }
    }

    fn write(&mut self, src: &[u8], interest: &mut InterestCtl) -> io::Result<usize> {
        if self.state != TlsState::Established {
            return Err(io::ErrorKind::WouldBlock.into());
        }
        let n = self.session.writer().write(src)?;
        if !self.flush_records()? {
            interest.enable_write();
        }
        if n == 0 && !src.is_empty() {
            return Err(io::ErrorKind::WouldBlock.into());
        }
        Ok(n)
    }

    fn flush(&mut self, interest: &mut InterestCtl) -> io::Result<bool> {
        if self.state == TlsState::Closed {
            return Ok(true);
        }
        let drained = self.flush_records()?;
        if !drained {
            interest.enable_write();
        }
        self.refresh_state();
        Ok(drained)
    }

    fn is_established(&self) -> bool {
        self.state == TlsState::Established
    }

    fn close(&mut self) {
        if self.state == TlsState::Established {
            self.session.send_close_notify();
            if let Err(e) = self.flush_records() {
                trace!(error = %e, "close_notify not delivered");
            }
        }
        self.state = TlsState::Closed;
        self.inner.close();
    }

    fn source(&mut self) -> &mut TcpStream {
        self.inner.source()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{TlsConfig, TlsContext};
    use std::path::PathBuf;
    use std::time::Duration;

    fn fixture(name: &str) -> PathBuf {
        PathBuf::from(env!("CARGO_MANIFEST_DIR"))
            .join("tests/fixtures")
            .join(name)
    }

    fn server_config(require_client_auth: bool) -> TlsConfig {
        TlsConfig::new()
            .cert_chain_file(fixture("server.pem"))
            .private_key_file(fixture("server.key.pem"))
            .trust_roots_file(fixture("ca.pem"))
            .require_client_auth(require_client_auth)
    }

    fn client_config(with_cert: bool) -> TlsConfig {
        let config = TlsConfig::new().trust_roots_file(fixture("ca.pem"));
        if with_cert {
            config
                .cert_chain_file(fixture("client.pem"))
                .private_key_file(fixture("client.key.pem"))
        } else {
            config
        }
    }

    fn socket_pair() -> (TcpStream, TcpStream) {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let client = std::net::TcpStream::connect(listener.local_addr().unwrap()).unwrap();
        let (server, _) = listener.accept().unwrap();
        client.set_nonblocking(true).unwrap();
        server.set_nonblocking(true).unwrap();
        (TcpStream::from_std(client), TcpStream::from_std(server))
    }

    fn pair(server: &TlsConfig, client: &TlsConfig) -> (TlsTransport, TlsTransport) {
        let (c, s) = socket_pair();
        let client = TlsContext::client(client)
            .unwrap()
            .wrap(PlainTransport::new(c))
            .unwrap();
        let server = TlsContext::server(server)
            .unwrap()
            .wrap(PlainTransport::new(s))
            .unwrap();
        (client, server)
    }

    fn drive(client: &mut TlsTransport, server: &mut TlsTransport) -> io::Result<()> {
        let mut interest = InterestCtl::read_only();
        let mut scratch = [0u8; 64];
        client.begin(&mut interest)?;
        server.begin(&mut interest)?;
        for _ in 0..500 {
            if client.is_established() && server.is_established() {
                return Ok(());
            }
            for side in [&mut *client, &mut *server] {
                side.flush(&mut interest)?;
                match side.read(&mut scratch, &mut interest) {
                    Ok(0) => return Err(io::ErrorKind::UnexpectedEof.into()),
                    Ok(_) => {}
                    Err(e) if e.kind() == io::ErrorKind::WouldBlock => {}
                    Err(e) => return Err(e),
                }
            }
            std::thread::sleep(Duration::from_millis(2));
        }
        Err(io::ErrorKind::TimedOut.into())
    }

    #[test]
    fn test_states_before_handshake() {
        let (mut client, mut server) = pair(&server_config(false), &client_config(false));
        assert_eq!(client.state(), TlsState::NotStarted);

        let mut interest = InterestCtl::read_only();
        client.begin(&mut interest).unwrap();
        server.begin(&mut interest).unwrap();
        assert_eq!(client.state(), TlsState::Handshaking(HandshakePhase::NeedUnwrap));
        assert_eq!(server.state(), TlsState::Handshaking(HandshakePhase::NeedUnwrap));

        // No application bytes before the handshake completes.
        let err = client.write(b"early", &mut interest).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::WouldBlock);
    }

    #[test]
    fn test_mutual_handshake_and_data() {
        let (mut client, mut server) = pair(&server_config(true), &client_config(true));
        drive(&mut client, &mut server).unwrap();
        assert_eq!(client.state(), TlsState::Established);
        assert_eq!(server.state(), TlsState::Established);

        let mut interest = InterestCtl::read_only();
        assert_eq!(client.write(b"hello", &mut interest).unwrap(), 5);

        let mut buf = [0u8; 16];
        let mut received = Vec::new();
        for _ in 0..200 {
            match server.read(&mut buf, &mut interest) {
                Ok(n) => {
                    received.extend_from_slice(&buf[..n]);
                    if received.len() >= 5 {
                        break;
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    std::thread::sleep(Duration::from_millis(2))
                }
                Err(e) => panic!("read failed: {}", e),
            }
        }
        assert_eq!(received, b"hello");
    }

    #[test]
    fn test_small_destination_keeps_remaining_plaintext() {
        let (mut client, mut server) = pair(&server_config(false), &client_config(false));
        drive(&mut client, &mut server).unwrap();

        let mut interest = InterestCtl::read_only();
        client.write(b"0123456789", &mut interest).unwrap();

        let mut received = Vec::new();
        let mut buf = [0u8; 3];
        for _ in 0..200 {
            match server.read(&mut buf, &mut interest) {
                Ok(n) => {
                    assert!(n <= 3);
                    received.extend_from_slice(&buf[..n]);
                    if received.len() == 10 {
                        break;
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    std::thread::sleep(Duration::from_millis(2))
                }
                Err(e) => panic!("read failed: {}", e),
            }
        }
        assert_eq!(received, b"0123456789");
    }

    #[test]
    fn test_missing_client_certificate_is_fatal() {
        let (mut client, mut server) = pair(&server_config(true), &client_config(false));
        assert!(drive(&mut client, &mut server).is_err());
        assert!(!server.is_established());
    }

    #[test]
    fn test_close_after_established() {
        let (mut client, mut server) = pair(&server_config(false), &client_config(false));
        drive(&mut client, &mut server).unwrap();
        client.close();
        assert_eq!(client.state(), TlsState::Closed);

        let mut interest = InterestCtl::read_only();
        let mut buf = [0u8; 8];
        let mut saw_close = false;
        for _ in 0..200 {
            match server.read(&mut buf, &mut interest) {
                Ok(0) => {
                    saw_close = true;
                    break;
                }
                Ok(_) => {}
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    std::thread::sleep(Duration::from_millis(2))
                }
                Err(_) => {
                    saw_close = true;
                    break;
                }
            }
        }
        assert!(saw_close);
    }
}
