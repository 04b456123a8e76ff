//! Connection lifecycle listeners.

use std::sync::Arc;

use crate::connection::Connection;
use crate::error::SocketError;

/// Observer of connection lifecycle events.
///
/// All methods default to no-ops. Callbacks run on whichever internal thread
/// observes the event (an event loop or a handler thread); keep them short.
pub trait Listener: Send + Sync + 'static {
    /// The connection has its identity and is open for traffic.
    fn on_connected(&self, _connection: &Connection) {}

    /// The connection was closed, by either side.
    fn on_disconnected(&self, _connection: &Connection) {}

    /// Processing a frame from this connection failed.
    fn on_exception(&self, _connection: &Connection, _error: &SocketError) {}
}

/// Ordered set of listeners, fired in registration order.
#[derive(Default, Clone)]
pub struct ListenerRegistry {
    listeners: Vec<Arc<dyn Listener>>,
}

impl ListenerRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a listener.
    pub fn register(&mut self, listener: impl Listener) {
        self.listeners.push(Arc::new(listener));
    }

    /// Add a shared listener.
    pub fn register_shared(&mut self, listener: Arc<dyn Listener>) {
        self.listeners.push(listener);
    }

    /// Number of listeners.
    pub fn len(&self) -> usize {
        self.listeners.len()
    }

    /// Check if no listener is registered.
    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }

    pub(crate) fn fire_connected(&self, connection: &Connection) {
        for listener in &self.listeners {
            listener.on_connected(connection);
        }
    }

    pub(crate) fn fire_disconnected(&self, connection: &Connection) {
        for listener in &self.listeners {
            listener.on_disconnected(connection);
        }
    }

    pub(crate) fn fire_exception(&self, connection: &Connection, error: &SocketError) {
        for listener in &self.listeners {
            listener.on_exception(connection, error);
        }
    }
}
