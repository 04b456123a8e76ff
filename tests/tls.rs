//! TLS tests: mutual authentication over loopback.

use std::io::{self, Read};
use std::net::TcpStream;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use crossbeam_channel::unbounded;
use nsocket::{Connection, SocketClient, SocketError, SocketServer, TlsConfig};

const WAIT: Duration = Duration::from_secs(5);

fn fixture(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests/fixtures")
        .join(name)
}

fn server_tls() -> TlsConfig {
    TlsConfig::new()
        .cert_chain_file(fixture("server.pem"))
        .private_key_file(fixture("server.key.pem"))
        .trust_roots_file(fixture("ca.pem"))
        .require_client_auth(true)
}

fn client_tls() -> TlsConfig {
    TlsConfig::new()
        .trust_roots_file(fixture("ca.pem"))
        .cert_chain_file(fixture("client.pem"))
        .private_key_file(fixture("client.key.pem"))
        .server_name("localhost")
}

fn tls_server(pings: crossbeam_channel::Sender<String>) -> SocketServer {
    SocketServer::builder()
        .port(0)
        .buffer_size(1024)
        .tls(server_tls())
        .command("ping", move |content: String, connection: &Connection| {
            let _ = pings.send(content.clone());
            connection.send_command("pong", &content)
        })
        .sync_command("square", Duration::from_secs(2), |n: i64, _: &Connection| {
            Ok(n * n)
        })
        .start()
        .unwrap()
}

#[test]
fn test_mutual_tls_ping_and_square() {
    let (pings_tx, pings) = unbounded();
    let server = tls_server(pings_tx);

    let (pongs_tx, pongs) = unbounded();
    let client = SocketClient::builder()
        .buffer_size(1024)
        .tls(client_tls())
        .command("pong", move |content: String, _: &Connection| {
            let _ = pongs_tx.send(content);
            Ok(())
        })
        .open()
        .unwrap();

    let connection = client.add_node(server.local_addr()).unwrap();
    assert!(connection.is_open());

    connection.send_command("ping", &"Hello").unwrap();
    assert_eq!(pings.recv_timeout(WAIT).unwrap(), "Hello");
    assert_eq!(pongs.recv_timeout(WAIT).unwrap(), "Hello");

    let squared: i64 = connection
        .send_sync_command_with_timeout("square", &7, Duration::from_secs(2))
        .unwrap();
    assert_eq!(squared, 49);
}

#[test]
fn test_large_message_over_tls() {
    let (pings_tx, _pings) = unbounded();
    let server = tls_server(pings_tx);

    let (pongs_tx, pongs) = unbounded();
    let client = SocketClient::builder()
        .buffer_size(1024)
        .tls(client_tls())
        .command("pong", move |content: String, _: &Connection| {
            let _ = pongs_tx.send(content);
            Ok(())
        })
        .open()
        .unwrap();
    let connection = client.add_node(server.local_addr()).unwrap();

    // Spans several TLS records.
    let content = "y".repeat(100_000);
    connection.send_command("ping", &content).unwrap();
    assert_eq!(pongs.recv_timeout(WAIT).unwrap(), content);
}

#[test]
fn test_client_without_certificate_is_rejected() {
    let (pings_tx, pings) = unbounded();
    let server = tls_server(pings_tx);

    let client = SocketClient::builder()
        .connect_timeout(Duration::from_secs(2))
        .tls(TlsConfig::new().trust_roots_file(fixture("ca.pem")))
        .open()
        .unwrap();

    let result = client.add_node(server.local_addr());
    assert!(
        matches!(
            result,
            Err(SocketError::ConnectFailed(_)) | Err(SocketError::ConnectTimeout(_))
        ),
        "unexpected result: {:?}",
        result
    );
    assert!(pings.recv_timeout(Duration::from_millis(200)).is_err());
}

#[test]
fn test_stalled_handshake_is_closed_by_heartbeat() {
    let (disconnected_tx, disconnected) = unbounded();
    let server = SocketServer::builder()
        .port(0)
        .heartbeat_interval(Duration::from_millis(100))
        .tls(server_tls())
        .listener(OnDisconnect(disconnected_tx))
        .start()
        .unwrap();

    // Connects but never sends a ClientHello.
    let mut raw = TcpStream::connect(server.local_addr()).unwrap();
    raw.set_read_timeout(Some(WAIT)).unwrap();

    let started = Instant::now();
    let mut chunk = [0u8; 64];
    match raw.read(&mut chunk) {
        Ok(0) => {}
        Err(e) if e.kind() == io::ErrorKind::ConnectionReset => {}
        other => panic!("expected the server to close the socket: {:?}", other),
    }
    assert!(started.elapsed() < WAIT);

    let closed = disconnected.recv_timeout(WAIT).unwrap();
    assert_eq!(closed.id(), 0);
}

struct OnDisconnect(crossbeam_channel::Sender<Connection>);

impl nsocket::Listener for OnDisconnect {
    fn on_disconnected(&self, connection: &Connection) {
        let _ = self.0.send(connection.clone());
    }
}

#[test]
fn test_missing_key_fails_at_start() {
    let result = SocketServer::builder()
        .port(0)
        .tls(TlsConfig::new().cert_chain_file(fixture("server.pem")))
        .start();
    assert!(matches!(result, Err(SocketError::TlsConfig(_))));
}

#[test]
fn test_unreadable_pem_fails_at_start() {
    let result = SocketClient::builder()
        .tls(TlsConfig::new().trust_roots_file(fixture("does-not-exist.pem")))
        .open();
    assert!(result.is_err());
}
