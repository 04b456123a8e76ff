//! Handler module - command registration and lifecycle listeners.
//!
//! Provides:
//! - [`CommandRegistry`] - maps command ids to plain or sync handlers
//! - [`Command`] / [`SyncCommand`] - handlers implemented as types
//! - [`Listener`] - connected / disconnected / exception callbacks
//!
//! # Example
//!
//! ```
//! use nsocket::handler::{Command, CommandRegistry};
//! use nsocket::{Connection, Result};
//!
//! struct PingCommand;
//!
//! impl Command for PingCommand {
//!     type Data = String;
//!
//!     fn execute(&self, content: String, connection: &Connection) -> Result<()> {
//!         connection.send_command("pong", &content)
//!     }
//! }
//!
//! let mut registry = CommandRegistry::new();
//! registry.register(PingCommand);
//! assert!(registry.contains("ping"));
//! ```

mod builtin;
mod listener;
mod registry;

pub(crate) use builtin::register_builtins;
pub use listener::{Listener, ListenerRegistry};
pub use registry::{
    command_id_for, derive_command_id, Command, CommandEntry, CommandHandler, CommandRegistry,
    SyncCommand, SyncCommandHandler, TypedCommand, TypedSyncCommand,
};
