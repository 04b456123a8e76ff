//! State shared by every connection of one endpoint.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use crate::handler::{CommandRegistry, ListenerRegistry};
use crate::sync::SyncManager;
use crate::transport::TlsContext;
use crate::worker::Dispatcher;

/// Endpoint-wide state. Frozen once the endpoint starts.
pub(crate) struct Context {
    pub(crate) name: String,
    pub(crate) registry: CommandRegistry,
    pub(crate) listeners: ListenerRegistry,
    pub(crate) sync_manager: SyncManager,
    pub(crate) dispatcher: Dispatcher,
    pub(crate) tls: Option<TlsContext>,
    pub(crate) buffer_size: usize,
    pub(crate) max_message_size: usize,
    pub(crate) default_sync_timeout: Duration,
    next_connection_id: AtomicU64,
}

impl Context {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        name: String,
        registry: CommandRegistry,
        listeners: ListenerRegistry,
        dispatcher: Dispatcher,
        tls: Option<TlsContext>,
        buffer_size: usize,
        max_message_size: usize,
        default_sync_timeout: Duration,
    ) -> Self {
        Self {
            name,
            registry,
            listeners,
            sync_manager: SyncManager::new(),
            dispatcher,
            tls,
            buffer_size,
            max_message_size,
            default_sync_timeout,
            next_connection_id: AtomicU64::new(1),
        }
    }

    /// Next server-assigned connection id; ids start at 1.
    pub(crate) fn next_connection_id(&self) -> u64 {
        self.next_connection_id.fetch_add(1, Ordering::Relaxed)
    }
}
