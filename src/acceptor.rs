//! Accept thread: blocks on `accept` and hands sockets to the event loops.

use std::io;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::connection::{Connection, Role};
use crate::context::Context;
use crate::error::Result;
use crate::reactor::{EventLoopGroup, Task};

const ERROR_PAUSE: Duration = Duration::from_millis(10);
const WAKE_TIMEOUT: Duration = Duration::from_secs(1);

pub(crate) struct Acceptor {
    running: Arc<AtomicBool>,
    local_addr: SocketAddr,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl Acceptor {
    pub(crate) fn start(
        name: &str,
        listener: TcpListener,
        loops: Arc<EventLoopGroup>,
        context: Arc<Context>,
    ) -> Result<Self> {
        let local_addr = listener.local_addr()?;
        let running = Arc::new(AtomicBool::new(true));
        let flag = running.clone();
        let thread = thread::Builder::new()
            .name(format!("{}-acceptor", name))
            .spawn(move || accept_loop(listener, flag, loops, context))?;

        info!(%local_addr, "Listening");
        Ok(Self {
            running,
            local_addr,
            thread: Mutex::new(Some(thread)),
        })
    }

    pub(crate) fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stop accepting. Unblocks the pending `accept` with a throwaway connection.
    pub(crate) fn stop(&self) {
        if !self.running.swap(false, Ordering::AcqRel) {
            return;
        }
        if let Err(e) = TcpStream::connect_timeout(&wake_addr(self.local_addr), WAKE_TIMEOUT) {
            debug!(error = %e, "acceptor wake-up connect failed");
        }
        if let Some(thread) = self.thread.lock().take() {
            if thread.join().is_err() {
                warn!("Acceptor thread panicked");
            }
        }
    }
}

fn wake_addr(local: SocketAddr) -> SocketAddr {
    match local.ip() {
        IpAddr::V4(ip) if ip.is_unspecified() => {
            SocketAddr::new(Ipv4Addr::LOCALHOST.into(), local.port())
        }
        IpAddr::V6(ip) if ip.is_unspecified() => {
            SocketAddr::new(Ipv6Addr::LOCALHOST.into(), local.port())
        }
        _ => local,
    }
}

fn accept_loop(
    listener: TcpListener,
    running: Arc<AtomicBool>,
    loops: Arc<EventLoopGroup>,
    context: Arc<Context>,
) {
    while running.load(Ordering::Acquire) {
        match listener.accept() {
            Ok((stream, peer)) => {
                if !running.load(Ordering::Acquire) {
                    break;
                }
                debug!(%peer, "Accepted");
                if let Err(e) = hand_off(stream, peer, &loops, &context) {
                    warn!(%peer, error = %e, "An error occurred on acceptor");
                }
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                warn!(error = %e, "An error occurred on acceptor");
                thread::sleep(ERROR_PAUSE);
            }
        }
    }
    debug!("Acceptor stopped");
}

fn hand_off(
    stream: TcpStream,
    peer: SocketAddr,
    loops: &EventLoopGroup,
    context: &Arc<Context>,
) -> io::Result<()> {
    stream.set_nonblocking(true)?;
    stream.set_nodelay(true)?;
    let loop_handle = loops.select();
    let (connection, outbound) =
        Connection::new(Role::Server, peer, loop_handle.clone(), context.clone());
    loop_handle.submit(Task::Register {
        stream: mio::net::TcpStream::from_std(stream),
        connection,
        outbound,
    });
    Ok(())
}
