//! Integration tests for nsocket.
//!
//! Every test starts a real server on an ephemeral port and talks to it over
//! loopback TCP.

use std::io::Read;
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{unbounded, Receiver, Sender};
use nsocket::protocol::{decode_envelope, RequestFrame, DEFAULT_MAX_ENVELOPE_SIZE};
use nsocket::{
    Connection, ConnectionState, Listener, ReconnectPolicy, SocketClient, SocketError,
    SocketServer, SyncCommand, SyncCommandError,
};
use serde::{Deserialize, Serialize};

const WAIT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Message {
    id: String,
    content: String,
}

/// Forwards lifecycle events into channels.
struct Recorder {
    connected: Sender<Connection>,
    disconnected: Sender<Connection>,
    exceptions: Sender<String>,
}

struct Recorded {
    connected: Receiver<Connection>,
    disconnected: Receiver<Connection>,
    exceptions: Receiver<String>,
}

fn recorder() -> (Recorder, Recorded) {
    let (connected_tx, connected) = unbounded();
    let (disconnected_tx, disconnected) = unbounded();
    let (exceptions_tx, exceptions) = unbounded();
    (
        Recorder {
            connected: connected_tx,
            disconnected: disconnected_tx,
            exceptions: exceptions_tx,
        },
        Recorded {
            connected,
            disconnected,
            exceptions,
        },
    )
}

impl Listener for Recorder {
    fn on_connected(&self, connection: &Connection) {
        let _ = self.connected.send(connection.clone());
    }

    fn on_disconnected(&self, connection: &Connection) {
        let _ = self.disconnected.send(connection.clone());
    }

    fn on_exception(&self, _connection: &Connection, error: &SocketError) {
        let _ = self.exceptions.send(error.to_string());
    }
}

fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + WAIT;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(10));
    }
    condition()
}

struct SquareCommand;

impl SyncCommand for SquareCommand {
    type Data = i64;
    type Output = i64;

    fn apply(&self, n: i64, _connection: &Connection) -> nsocket::Result<i64> {
        Ok(n * n)
    }

    fn timeout(&self) -> Duration {
        Duration::from_secs(2)
    }
}

fn echo_server() -> SocketServer {
    SocketServer::builder()
        .port(0)
        .event_loops(2)
        .buffer_size(1024)
        .command("ping", |message: Message, connection: &Connection| {
            connection.send_command("pong", &message)
        })
        .register_sync_command(SquareCommand)
        .start()
        .unwrap()
}

fn pong_client() -> (SocketClient, Receiver<Message>) {
    let (tx, rx) = unbounded();
    let client = SocketClient::builder()
        .buffer_size(1024)
        .command("pong", move |message: Message, _connection: &Connection| {
            let _ = tx.send(message);
            Ok(())
        })
        .open()
        .unwrap();
    (client, rx)
}

/// Address with nothing listening on it.
fn dead_addr() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap()
}

#[test]
fn test_ping_pong() {
    let server = echo_server();
    let (client, pongs) = pong_client();

    let connection = client.add_node(server.local_addr()).unwrap();
    assert!(connection.is_open());
    assert!(connection.id() >= 1);

    let ping = Message {
        id: "1".to_string(),
        content: "Hello".to_string(),
    };
    connection.send_command("ping", &ping).unwrap();

    let pong = pongs.recv_timeout(WAIT).unwrap();
    assert_eq!(pong, ping);
}

#[test]
fn test_sync_square() {
    let server = echo_server();
    let (client, _pongs) = pong_client();
    let connection = client.add_node(server.local_addr()).unwrap();

    let squared: i64 = connection
        .send_sync_command_with_timeout("square", &7, Duration::from_secs(2))
        .unwrap();
    assert_eq!(squared, 49);
    assert_eq!(client.pending_sync_calls(), 0);
}

#[test]
fn test_concurrent_sync_calls() {
    let server = echo_server();
    let (client, _pongs) = pong_client();
    let connection = client.add_node(server.local_addr()).unwrap();

    let handles: Vec<_> = (0..8i64)
        .map(|t| {
            let connection = connection.clone();
            thread::spawn(move || {
                for i in 0..25i64 {
                    let n = t * 100 + i;
                    let squared: i64 = connection
                        .send_sync_command_with_timeout("square", &n, Duration::from_secs(5))
                        .unwrap();
                    assert_eq!(squared, n * n);
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }
    assert_eq!(client.pending_sync_calls(), 0);
}

#[test]
fn test_sync_timeout() {
    let server = SocketServer::builder()
        .port(0)
        .sync_command(
            "slow",
            Duration::from_millis(100),
            |_: (), _connection: &Connection| {
                thread::sleep(Duration::from_millis(500));
                Ok("late")
            },
        )
        .start()
        .unwrap();
    let (client, _pongs) = pong_client();
    let connection = client.add_node(server.local_addr()).unwrap();

    let started = Instant::now();
    let result: nsocket::Result<String> =
        connection.send_sync_command_with_timeout("slow", &(), Duration::from_secs(2));
    assert!(matches!(
        result,
        Err(SocketError::Sync(SyncCommandError::Timeout))
    ));
    assert!(started.elapsed() < Duration::from_secs(2));
    assert_eq!(client.pending_sync_calls(), 0);
}

#[test]
fn test_sync_failure_carries_message() {
    let server = SocketServer::builder()
        .port(0)
        .sync_command(
            "explode",
            Duration::from_secs(1),
            |_: (), _connection: &Connection| -> nsocket::Result<i64> {
                Err(SocketError::handler("boom"))
            },
        )
        .start()
        .unwrap();
    let (client, _pongs) = pong_client();
    let connection = client.add_node(server.local_addr()).unwrap();

    let result: nsocket::Result<i64> =
        connection.send_sync_command_with_timeout("explode", &(), Duration::from_secs(1));
    match result {
        Err(SocketError::Sync(SyncCommandError::Failed(message))) => assert_eq!(message, "boom"),
        other => panic!("unexpected result: {:?}", other),
    }
}

#[test]
fn test_sync_call_without_reply_gives_no_response() {
    // "ping" is fire-and-forget on the server, so no sync result ever comes back.
    let server = echo_server();
    let (client, pongs) = pong_client();
    let connection = client.add_node(server.local_addr()).unwrap();

    let message = Message {
        id: "2".to_string(),
        content: "no reply".to_string(),
    };
    let result: nsocket::Result<Message> =
        connection.send_sync_command_with_timeout("ping", &message, Duration::from_millis(200));
    assert!(matches!(
        result,
        Err(SocketError::Sync(SyncCommandError::NoResponse))
    ));
    assert_eq!(client.pending_sync_calls(), 0);
    // The command itself still ran.
    assert_eq!(pongs.recv_timeout(WAIT).unwrap(), message);
}

#[test]
fn test_sync_result_of_wrong_type() {
    let server = echo_server();
    let (client, _pongs) = pong_client();
    let connection = client.add_node(server.local_addr()).unwrap();

    let result: nsocket::Result<Vec<String>> =
        connection.send_sync_command_with_timeout("square", &3, Duration::from_secs(2));
    assert!(matches!(
        result,
        Err(SocketError::Sync(SyncCommandError::InvalidResult(_)))
    ));
}

#[test]
fn test_unknown_command_reports_on_both_sides() {
    let (server_listener, server_events) = recorder();
    let server = SocketServer::builder()
        .port(0)
        .listener(server_listener)
        .start()
        .unwrap();

    let (client_listener, client_events) = recorder();
    let client = SocketClient::builder()
        .listener(client_listener)
        .open()
        .unwrap();
    let connection = client.add_node(server.local_addr()).unwrap();

    connection.send_command("nope", &1).unwrap();

    let on_server = server_events.exceptions.recv_timeout(WAIT).unwrap();
    assert!(on_server.contains("nope"), "{}", on_server);
    let on_client = client_events.exceptions.recv_timeout(WAIT).unwrap();
    assert!(on_client.contains("nope"), "{}", on_client);

    // The connection survives.
    assert!(connection.is_open());
}

#[test]
fn test_message_larger_than_buffer() {
    let server = echo_server();
    let (client, pongs) = pong_client();
    let connection = client.add_node(server.local_addr()).unwrap();

    let ping = Message {
        id: "big".to_string(),
        content: "x".repeat(20_000),
    };
    connection.send_command("ping", &ping).unwrap();

    let pong = pongs.recv_timeout(WAIT).unwrap();
    assert_eq!(pong.content.len(), 20_000);
    assert_eq!(pong, ping);
}

#[test]
fn test_many_small_messages() {
    let server = echo_server();
    let (client, pongs) = pong_client();
    let connection = client.add_node(server.local_addr()).unwrap();

    for i in 0..500 {
        let ping = Message {
            id: i.to_string(),
            content: format!("message {}", i),
        };
        connection.send_command("ping", &ping).unwrap();
    }

    // Handled in order on the server, and the pongs in order on the client.
    let mut seen = Vec::new();
    for _ in 0..500 {
        seen.push(pongs.recv_timeout(WAIT).unwrap().id.parse::<usize>().unwrap());
    }
    assert_eq!(seen, (0..500).collect::<Vec<_>>());
}

#[test]
fn test_frames_on_one_connection_are_handled_in_order() {
    let (tx, handled) = unbounded();
    let server = SocketServer::builder()
        .port(0)
        .command("seq", move |n: u32, _connection: &Connection| {
            let _ = tx.send(n);
            Ok(())
        })
        .start()
        .unwrap();
    let (client, _pongs) = pong_client();
    let connection = client.add_node(server.local_addr()).unwrap();

    for n in 0..2000u32 {
        connection.send_command("seq", &n).unwrap();
    }

    let mut seen = Vec::with_capacity(2000);
    for _ in 0..2000 {
        seen.push(handled.recv_timeout(WAIT).unwrap());
    }
    let inversions = seen.windows(2).filter(|pair| pair[0] > pair[1]).count();
    assert_eq!(inversions, 0);
    assert_eq!(seen, (0..2000).collect::<Vec<_>>());
}

#[test]
fn test_handler_can_call_back_its_peer() {
    // The reply to the nested call arrives while the handler still blocks
    // the connection's queue.
    let server = SocketServer::builder()
        .port(0)
        .command("relay", |n: i64, connection: &Connection| {
            let squared: i64 =
                connection.send_sync_command_with_timeout("square", &n, Duration::from_secs(2))?;
            connection.send_command("relayed", &squared)
        })
        .start()
        .unwrap();
    let (tx, relayed) = unbounded();
    let client = SocketClient::builder()
        .register_sync_command(SquareCommand)
        .command("relayed", move |n: i64, _connection: &Connection| {
            let _ = tx.send(n);
            Ok(())
        })
        .open()
        .unwrap();
    let connection = client.add_node(server.local_addr()).unwrap();

    connection.send_command("relay", &9).unwrap();
    assert_eq!(relayed.recv_timeout(WAIT).unwrap(), 81);
}

#[test]
fn test_oversized_message_closes_connection() {
    let server = SocketServer::builder()
        .port(0)
        .max_message_size(1024)
        .register_sync_command(SquareCommand)
        .start()
        .unwrap();
    let (client, _pongs) = pong_client();
    let connection = client.add_node(server.local_addr()).unwrap();

    let squared: i64 = connection
        .send_sync_command_with_timeout("square", &3, Duration::from_secs(2))
        .unwrap();
    assert_eq!(squared, 9);

    let ping = Message {
        id: "huge".to_string(),
        content: "z".repeat(4096),
    };
    connection.send_command("ping", &ping).unwrap();
    assert!(wait_until(|| connection.state() == ConnectionState::Closed));
}

#[test]
fn test_sync_result_is_sent_during_stop() {
    let (started_tx, started) = unbounded();
    let server = SocketServer::builder()
        .port(0)
        .sync_command(
            "slow_square",
            Duration::from_secs(2),
            move |n: i64, _connection: &Connection| {
                let _ = started_tx.send(());
                thread::sleep(Duration::from_millis(300));
                Ok(n * n)
            },
        )
        .start()
        .unwrap();
    let (client, _pongs) = pong_client();
    let connection = client.add_node(server.local_addr()).unwrap();

    let caller = thread::spawn(move || {
        connection.send_sync_command_with_timeout::<_, i64>(
            "slow_square",
            &7,
            Duration::from_secs(2),
        )
    });
    started.recv_timeout(WAIT).unwrap();
    server.stop();

    assert_eq!(caller.join().unwrap().unwrap(), 49);
}

#[test]
fn test_silent_peer_is_closed_by_heartbeat() {
    let (listener, events) = recorder();
    let server = SocketServer::builder()
        .port(0)
        .heartbeat_interval(Duration::from_millis(100))
        .listener(listener)
        .start()
        .unwrap();

    // A raw socket never sends heartbeats back.
    let mut raw = TcpStream::connect(server.local_addr()).unwrap();
    raw.set_read_timeout(Some(WAIT)).unwrap();

    let started = Instant::now();
    let mut received = Vec::new();
    let mut chunk = [0u8; 1024];
    loop {
        match raw.read(&mut chunk) {
            Ok(0) => break,
            Ok(n) => received.extend_from_slice(&chunk[..n]),
            Err(e) => panic!("expected the server to close the socket: {}", e),
        }
    }
    assert!(started.elapsed() < WAIT);

    // The first frame announces the connection id.
    let (text, _) = decode_envelope(&received, DEFAULT_MAX_ENVELOPE_SIZE)
        .unwrap()
        .unwrap();
    let frame = RequestFrame::parse(&text).unwrap();
    assert_eq!(frame.command_id, "__set_connection_id");

    let closed = events.disconnected.recv_timeout(WAIT).unwrap();
    assert_eq!(closed.state(), ConnectionState::Closed);
}

#[test]
fn test_heartbeats_keep_connection_alive() {
    let server = SocketServer::builder()
        .port(0)
        .heartbeat_interval(Duration::from_millis(50))
        .register_sync_command(SquareCommand)
        .start()
        .unwrap();
    let client = SocketClient::builder()
        .heartbeat_interval(Duration::from_millis(50))
        .open()
        .unwrap();
    let connection = client.add_node(server.local_addr()).unwrap();

    thread::sleep(Duration::from_millis(500));
    assert!(connection.is_open());
    let squared: i64 = connection
        .send_sync_command_with_timeout("square", &4, Duration::from_secs(2))
        .unwrap();
    assert_eq!(squared, 16);
}

#[test]
fn test_reconnect_after_server_side_close() {
    let (listener, events) = recorder();
    let server = SocketServer::builder()
        .port(0)
        .listener(listener)
        .register_sync_command(SquareCommand)
        .start()
        .unwrap();
    let client = SocketClient::builder()
        .reconnect(ReconnectPolicy::new(
            Duration::from_millis(20),
            Duration::from_millis(100),
            5,
        ))
        .open()
        .unwrap();

    let first = client.add_node(server.local_addr()).unwrap();
    let server_side = events.connected.recv_timeout(WAIT).unwrap();
    server_side.close();

    assert!(wait_until(|| first.state() == ConnectionState::Closed));
    assert!(matches!(
        first.send_command("square", &1),
        Err(SocketError::ConnectionClosed)
    ));

    let second = client.connection(server.local_addr()).unwrap();
    assert!(second.is_open());
    assert!(!second.same_as(&first));
    assert_ne!(second.id(), first.id());

    let squared: i64 = second
        .send_sync_command_with_timeout("square", &5, Duration::from_secs(2))
        .unwrap();
    assert_eq!(squared, 25);

    // An open node is returned as is.
    let again = client.connection(server.local_addr()).unwrap();
    assert!(again.same_as(&second));
}

#[test]
fn test_reconnect_exhausted() {
    let client = SocketClient::builder()
        .connect_timeout(Duration::from_secs(1))
        .reconnect(ReconnectPolicy::new(
            Duration::from_millis(10),
            Duration::from_millis(20),
            3,
        ))
        .open()
        .unwrap();

    let addr = dead_addr();
    match client.connection(addr) {
        Err(SocketError::ReconnectExhausted {
            addr: failed,
            attempts,
        }) => {
            assert_eq!(failed, addr);
            assert_eq!(attempts, 3);
        }
        other => panic!("unexpected result: {:?}", other),
    }
}

#[test]
fn test_add_node_single_attempt_fails() {
    let client = SocketClient::builder()
        .connect_timeout(Duration::from_secs(1))
        .open()
        .unwrap();
    assert!(matches!(
        client.add_node(dead_addr()),
        Err(SocketError::ConnectFailed(_))
    ));
}

#[test]
fn test_add_node_returns_existing_connection() {
    let server = echo_server();
    let (client, _pongs) = pong_client();

    let first = client.add_node(server.local_addr()).unwrap();
    let second = client.add_node(server.local_addr()).unwrap();
    assert!(first.same_as(&second));
}

#[test]
fn test_attachment_per_connection() {
    let server = SocketServer::builder()
        .port(0)
        .command("login", |name: String, connection: &Connection| {
            connection.attach(name);
            Ok(())
        })
        .sync_command(
            "whoami",
            Duration::from_secs(1),
            |_: (), connection: &Connection| {
                Ok(connection
                    .attachment::<String>()
                    .map(|name| name.as_str().to_owned()))
            },
        )
        .start()
        .unwrap();

    let alice_client = SocketClient::builder().open().unwrap();
    let bob_client = SocketClient::builder().open().unwrap();
    let alice = alice_client.add_node(server.local_addr()).unwrap();
    let bob = bob_client.add_node(server.local_addr()).unwrap();

    let nobody: Option<String> = bob
        .send_sync_command_with_timeout("whoami", &(), Duration::from_secs(1))
        .unwrap();
    assert_eq!(nobody, None);

    alice.send_command("login", &"alice").unwrap();
    bob.send_command("login", &"bob").unwrap();

    assert!(wait_until(|| {
        let name: Option<String> = alice
            .send_sync_command_with_timeout("whoami", &(), Duration::from_secs(1))
            .unwrap();
        name.as_deref() == Some("alice")
    }));
    assert!(wait_until(|| {
        let name: Option<String> = bob
            .send_sync_command_with_timeout("whoami", &(), Duration::from_secs(1))
            .unwrap();
        name.as_deref() == Some("bob")
    }));
}

#[test]
fn test_listeners_see_connect_and_disconnect() {
    let (server_listener, server_events) = recorder();
    let server = SocketServer::builder()
        .port(0)
        .listener(server_listener)
        .start()
        .unwrap();

    let (client_listener, client_events) = recorder();
    let client = SocketClient::builder()
        .listener(client_listener)
        .open()
        .unwrap();
    let connection = client.add_node(server.local_addr()).unwrap();

    let on_server = server_events.connected.recv_timeout(WAIT).unwrap();
    let on_client = client_events.connected.recv_timeout(WAIT).unwrap();
    assert!(on_client.same_as(&connection));
    assert_eq!(on_server.id(), connection.id());

    connection.close();
    // A second close only warns.
    connection.close();

    let closed = client_events.disconnected.recv_timeout(WAIT).unwrap();
    assert!(closed.same_as(&connection));
    let closed = server_events.disconnected.recv_timeout(WAIT).unwrap();
    assert!(closed.same_as(&on_server));

    assert!(client_events
        .disconnected
        .recv_timeout(Duration::from_millis(200))
        .is_err());
}

#[test]
fn test_stop_closes_connections() {
    let server = echo_server();
    let (client, _pongs) = pong_client();
    let connection = client.add_node(server.local_addr()).unwrap();

    server.stop();
    assert!(!server.is_running());
    assert!(wait_until(|| connection.state() == ConnectionState::Closed));
    // Idempotent.
    server.stop();
}

#[test]
fn test_connection_ids_are_unique() {
    let server = echo_server();
    let mut clients = Vec::new();
    let mut ids = Vec::new();
    for _ in 0..3 {
        let client = SocketClient::builder().open().unwrap();
        ids.push(client.add_node(server.local_addr()).unwrap().id());
        clients.push(client);
    }
    ids.sort_unstable();
    ids.dedup();
    assert_eq!(ids.len(), 3);
}
