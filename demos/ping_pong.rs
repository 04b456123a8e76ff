//! Ping/pong - fire-and-forget commands in both directions.
//!
//! This example demonstrates:
//! - Starting a server and a client in one process
//! - Registering typed command handlers with closures
//! - Replying from a handler through the connection it received
//!
//! # Running
//!
//! ```text
//! RUST_LOG=nsocket=debug cargo run --example ping_pong
//! ```

use std::time::Duration;

use crossbeam_channel::bounded;
use nsocket::{Connection, SocketClient, SocketServer};
use serde::{Deserialize, Serialize};
use tracing_subscriber::EnvFilter;

/// Body of both `ping` and `pong`.
#[derive(Serialize, Deserialize, Debug)]
struct Message {
    id: String,
    content: String,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let server = SocketServer::builder()
        .port(0)
        .command("ping", |message: Message, connection: &Connection| {
            println!("server got ping {:?} from {}", message, connection);
            connection.send_command("pong", &message)
        })
        .start()?;

    let (done_tx, done) = bounded(1);
    let client = SocketClient::builder()
        .command("pong", move |message: Message, _: &Connection| {
            println!("client got pong {:?}", message);
            let _ = done_tx.send(());
            Ok(())
        })
        .open()?;

    let connection = client.add_node(server.local_addr())?;
    connection.send_command(
        "ping",
        &Message {
            id: "1".to_string(),
            content: "Hello".to_string(),
        },
    )?;

    done.recv_timeout(Duration::from_secs(5))?;

    client.close();
    server.stop();
    Ok(())
}
