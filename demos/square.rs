//! Square - a sync command implemented as a type.
//!
//! The client blocks on `send_sync_command` until the server's handler returns.
//! The command id `square` is derived from the type name `SquareCommand`.
//!
//! # Running
//!
//! ```text
//! cargo run --example square -- 12
//! ```

use std::time::Duration;

use nsocket::{Connection, SocketClient, SocketServer, SyncCommand};

struct SquareCommand;

impl SyncCommand for SquareCommand {
    type Data = i64;
    type Output = i64;

    fn apply(&self, n: i64, _connection: &Connection) -> nsocket::Result<i64> {
        Ok(n * n)
    }

    fn timeout(&self) -> Duration {
        Duration::from_secs(1)
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let n: i64 = std::env::args()
        .nth(1)
        .map(|arg| arg.parse())
        .transpose()?
        .unwrap_or(7);

    let server = SocketServer::builder()
        .port(0)
        .register_sync_command(SquareCommand)
        .start()?;
    let client = SocketClient::builder().open()?;

    let connection = client.add_node(server.local_addr())?;
    let squared: i64 = connection.send_sync_command("square", &n)?;
    println!("{}^2 = {}", n, squared);

    Ok(())
}
