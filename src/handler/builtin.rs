//! Internal commands every endpoint understands.

use tracing::{debug, trace, warn};

use super::registry::{Command, CommandRegistry};
use crate::connection::Connection;
use crate::error::{Result, SocketError};
use crate::protocol::{
    ErrorData, SyncResultData, ERROR_COMMAND, HEARTBEAT_COMMAND, SET_CONNECTION_ID_COMMAND,
    SYNC_RESULT_COMMAND,
};

/// Client side: adopt the identity the server assigned.
struct SetConnectionIdCommand;

impl Command for SetConnectionIdCommand {
    type Data = u64;

    fn execute(&self, id: u64, connection: &Connection) -> Result<()> {
        debug!(connection_id = id, remote = %connection.remote_addr(), "Connection id assigned");
        connection.mark_open(id);
        Ok(())
    }

    fn id(&self) -> String {
        SET_CONNECTION_ID_COMMAND.to_string()
    }
}

struct HeartbeatCommand;

impl Command for HeartbeatCommand {
    type Data = ();

    fn execute(&self, _data: (), connection: &Connection) -> Result<()> {
        trace!(connection = %connection, "Receive heartbeat");
        connection.touch_heartbeat();
        Ok(())
    }

    fn id(&self) -> String {
        HEARTBEAT_COMMAND.to_string()
    }
}

struct SyncResultCommand;

impl Command for SyncResultCommand {
    type Data = SyncResultData;

    fn execute(&self, result: SyncResultData, connection: &Connection) -> Result<()> {
        let call_id = result.call_id;
        if !connection.context().sync_manager.complete(result) {
            debug!(call_id, "Sync result arrived after the caller gave up");
        }
        Ok(())
    }

    fn id(&self) -> String {
        SYNC_RESULT_COMMAND.to_string()
    }
}

struct ErrorCommand;

impl Command for ErrorCommand {
    type Data = ErrorData;

    fn execute(&self, data: ErrorData, connection: &Connection) -> Result<()> {
        warn!(
            connection = %connection,
            command = data.command_id.as_deref().unwrap_or("<unparsed>"),
            message = %data.message,
            "Peer failed to process a frame"
        );
        let error = SocketError::Protocol(format!(
            "Peer failed to process '{}': {}",
            data.command_id.as_deref().unwrap_or("<unparsed>"),
            data.message
        ));
        connection.context().listeners.fire_exception(connection, &error);
        Ok(())
    }

    fn id(&self) -> String {
        ERROR_COMMAND.to_string()
    }
}

/// Register the internal commands.
pub(crate) fn register_builtins(registry: &mut CommandRegistry) {
    registry.register(SetConnectionIdCommand);
    registry.register(HeartbeatCommand);
    registry.register(SyncResultCommand);
    registry.register(ErrorCommand);
}
