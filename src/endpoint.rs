//! Bring-up and teardown shared by server and client.

use std::sync::Arc;

use tracing::info;

use crate::config::RuntimeConfig;
use crate::context::Context;
use crate::error::Result;
use crate::handler::{register_builtins, CommandRegistry, ListenerRegistry};
use crate::reactor::EventLoopGroup;
use crate::transport::TlsContext;
use crate::worker::Worker;

/// Worker, event loops, and the context their connections share.
pub(crate) struct Endpoint {
    pub(crate) context: Arc<Context>,
    pub(crate) loops: Arc<EventLoopGroup>,
    worker: Worker,
}

impl Endpoint {
    pub(crate) fn start(
        runtime: &RuntimeConfig,
        mut registry: CommandRegistry,
        listeners: ListenerRegistry,
        tls: Option<TlsContext>,
    ) -> Result<Self> {
        register_builtins(&mut registry);

        let worker = Worker::start(
            &runtime.name,
            runtime.worker_threads,
            runtime.handler_threads,
            runtime.max_concurrent_requests,
        )?;
        let context = Arc::new(Context::new(
            runtime.name.clone(),
            registry,
            listeners,
            worker.dispatcher(),
            tls,
            runtime.buffer_size,
            runtime.max_message_size,
            runtime.default_sync_timeout,
        ));
        let loops = match EventLoopGroup::start(
            &runtime.name,
            runtime.event_loops,
            runtime.heartbeat_interval,
        ) {
            Ok(loops) => Arc::new(loops),
            Err(e) => {
                worker.stop();
                return Err(e);
            }
        };

        info!(
            name = %context.name,
            event_loops = loops.len(),
            commands = context.registry.len(),
            tls = context.tls.is_some(),
            "Endpoint started"
        );
        Ok(Self {
            context,
            loops,
            worker,
        })
    }

    /// Let in-flight requests answer, stop the loops (closing every
    /// connection), then shut the worker down.
    pub(crate) fn stop(&self) {
        self.worker.drain();
        self.loops.stop();
        self.worker.stop();
        info!(name = %self.context.name, "Endpoint stopped");
    }
}
