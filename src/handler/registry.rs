//! Command registry for dispatching frames by command id.
//!
//! The registry maps command ids to handlers. Plain commands consume a body and
//! return nothing; sync commands return a value that travels back to the caller
//! in a `__syncResult` frame, and carry their own execution timeout.
//!
//! Handlers can be closures (registered with an explicit id) or types implementing
//! [`Command`] / [`SyncCommand`], whose id defaults to the type name with a
//! trailing `Command` removed and the first letter lowercased.
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use nsocket::handler::CommandRegistry;
//!
//! let mut registry = CommandRegistry::new();
//! registry.register_command("log", |line: String, _conn| {
//!     println!("{}", line);
//!     Ok(())
//! });
//! registry.register_sync_command("square", Duration::from_secs(1), |n: i64, _conn| Ok(n * n));
//!
//! assert!(registry.contains("log"));
//! assert_eq!(registry.sync_timeout("square"), Some(Duration::from_secs(1)));
//! ```

use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::warn;

use crate::codec::JsonCodec;
use crate::config::DEFAULT_SYNC_TIMEOUT;
use crate::connection::Connection;
use crate::error::Result;

/// Object-safe handler for fire-and-forget commands.
pub trait CommandHandler: Send + Sync + 'static {
    /// Handle a command with its raw JSON body.
    fn call(&self, body: &str, connection: &Connection) -> Result<()>;
}

/// Object-safe handler for sync commands.
pub trait SyncCommandHandler: Send + Sync + 'static {
    /// Handle a command with its raw JSON body and produce the JSON result.
    fn call(&self, body: &str, connection: &Connection) -> Result<Value>;
}

/// Wrapper that deserializes the body before calling a closure.
pub struct TypedCommand<F, T> {
    handler: F,
    _phantom: PhantomData<fn(T)>,
}

impl<F, T> TypedCommand<F, T>
where
    F: Fn(T, &Connection) -> Result<()> + Send + Sync + 'static,
    T: DeserializeOwned + 'static,
{
    /// Create a new typed command.
    pub fn new(handler: F) -> Self {
        Self {
            handler,
            _phantom: PhantomData,
        }
    }
}

impl<F, T> CommandHandler for TypedCommand<F, T>
where
    F: Fn(T, &Connection) -> Result<()> + Send + Sync + 'static,
    T: DeserializeOwned + 'static,
{
    fn call(&self, body: &str, connection: &Connection) -> Result<()> {
        let data: T = JsonCodec::decode(body)?;
        (self.handler)(data, connection)
    }
}

/// Wrapper that deserializes the body and serializes the result of a closure.
pub struct TypedSyncCommand<F, T, R> {
    handler: F,
    _phantom: PhantomData<fn(T) -> R>,
}

impl<F, T, R> TypedSyncCommand<F, T, R>
where
    F: Fn(T, &Connection) -> Result<R> + Send + Sync + 'static,
    T: DeserializeOwned + 'static,
    R: Serialize + 'static,
{
    /// Create a new typed sync command.
    pub fn new(handler: F) -> Self {
        Self {
            handler,
            _phantom: PhantomData,
        }
    }
}

impl<F, T, R> SyncCommandHandler for TypedSyncCommand<F, T, R>
where
    F: Fn(T, &Connection) -> Result<R> + Send + Sync + 'static,
    T: DeserializeOwned + 'static,
    R: Serialize + 'static,
{
    fn call(&self, body: &str, connection: &Connection) -> Result<Value> {
        let data: T = JsonCodec::decode(body)?;
        let output = (self.handler)(data, connection)?;
        JsonCodec::to_value(&output)
    }
}

/// A command implemented as a type.
pub trait Command: Send + Sync + 'static {
    /// Body type.
    type Data: DeserializeOwned;

    /// Handle one frame.
    fn execute(&self, data: Self::Data, connection: &Connection) -> Result<()>;

    /// Command id; derived from the type name by default.
    fn id(&self) -> String {
        command_id_for::<Self>()
    }
}

/// A sync command implemented as a type.
pub trait SyncCommand: Send + Sync + 'static {
    /// Body type.
    type Data: DeserializeOwned;
    /// Result type.
    type Output: Serialize;

    /// Handle one call and produce its result.
    fn apply(&self, data: Self::Data, connection: &Connection) -> Result<Self::Output>;

    /// How long the handler may run before the caller is told `TIMEOUT`.
    fn timeout(&self) -> Duration {
        DEFAULT_SYNC_TIMEOUT
    }

    /// Command id; derived from the type name by default.
    fn id(&self) -> String {
        command_id_for::<Self>()
    }
}

struct CommandAdapter<C>(C);

impl<C: Command> CommandHandler for CommandAdapter<C> {
    fn call(&self, body: &str, connection: &Connection) -> Result<()> {
        let data: C::Data = JsonCodec::decode(body)?;
        self.0.execute(data, connection)
    }
}

struct SyncCommandAdapter<C>(C);

impl<C: SyncCommand> SyncCommandHandler for SyncCommandAdapter<C> {
    fn call(&self, body: &str, connection: &Connection) -> Result<Value> {
        let data: C::Data = JsonCodec::decode(body)?;
        let output = self.0.apply(data, connection)?;
        JsonCodec::to_value(&output)
    }
}

/// Derive a command id from a type name.
///
/// `my_app::handlers::FooBarCommand` becomes `fooBar`; generic arguments and the
/// module path are ignored.
pub fn derive_command_id(type_name: &str) -> String {
    let base = type_name.split('<').next().unwrap_or(type_name);
    let simple = base.rsplit("::").next().unwrap_or(base);
    let stem = simple.strip_suffix("Command").unwrap_or(simple);
    let mut chars = stem.chars();
    match chars.next() {
        Some(first) => first.to_lowercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Command id derived from `T`'s type name.
pub fn command_id_for<T: ?Sized>() -> String {
    derive_command_id(std::any::type_name::<T>())
}

/// A registered handler.
#[derive(Clone)]
pub enum CommandEntry {
    /// Fire-and-forget command.
    Command(Arc<dyn CommandHandler>),
    /// Command that replies with a sync result.
    Sync {
        /// The handler.
        handler: Arc<dyn SyncCommandHandler>,
        /// Execution timeout.
        timeout: Duration,
    },
}

/// Registry mapping command ids to handlers.
///
/// Filled while building an endpoint, read-only once it is running.
#[derive(Default)]
pub struct CommandRegistry {
    entries: HashMap<String, CommandEntry>,
}

impl CommandRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a closure as a fire-and-forget command.
    pub fn register_command<F, T>(&mut self, id: &str, handler: F)
    where
        F: Fn(T, &Connection) -> Result<()> + Send + Sync + 'static,
        T: DeserializeOwned + 'static,
    {
        self.insert(id.to_string(), CommandEntry::Command(Arc::new(TypedCommand::new(handler))));
    }

    /// Register a closure as a sync command.
    pub fn register_sync_command<F, T, R>(&mut self, id: &str, timeout: Duration, handler: F)
    where
        F: Fn(T, &Connection) -> Result<R> + Send + Sync + 'static,
        T: DeserializeOwned + 'static,
        R: Serialize + 'static,
    {
        self.insert(
            id.to_string(),
            CommandEntry::Sync {
                handler: Arc::new(TypedSyncCommand::new(handler)),
                timeout,
            },
        );
    }

    /// Register a [`Command`] under its own id.
    pub fn register<C: Command>(&mut self, command: C) {
        let id = command.id();
        self.insert(id, CommandEntry::Command(Arc::new(CommandAdapter(command))));
    }

    /// Register a [`SyncCommand`] under its own id.
    pub fn register_sync<C: SyncCommand>(&mut self, command: C) {
        let id = command.id();
        let timeout = command.timeout();
        self.insert(
            id,
            CommandEntry::Sync {
                handler: Arc::new(SyncCommandAdapter(command)),
                timeout,
            },
        );
    }

    fn insert(&mut self, id: String, entry: CommandEntry) {
        if self.entries.insert(id.clone(), entry).is_some() {
            warn!(command = %id, "Command registered twice, the later handler wins");
        }
    }

    /// Look up a handler.
    pub fn get(&self, id: &str) -> Option<&CommandEntry> {
        self.entries.get(id)
    }

    /// Declared timeout of a sync command.
    pub fn sync_timeout(&self, id: &str) -> Option<Duration> {
        match self.entries.get(id) {
            Some(CommandEntry::Sync { timeout, .. }) => Some(*timeout),
            _ => None,
        }
    }

    /// Check whether a command id is registered.
    pub fn contains(&self, id: &str) -> bool {
        self.entries.contains_key(id)
    }

    /// Number of registered commands.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Registered command ids, in no particular order.
    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FooBarCommand;

    impl Command for FooBarCommand {
        type Data = String;

        fn execute(&self, _data: String, _connection: &Connection) -> Result<()> {
            Ok(())
        }
    }

    struct SquareCommand;

    impl SyncCommand for SquareCommand {
        type Data = i64;
        type Output = i64;

        fn apply(&self, n: i64, _connection: &Connection) -> Result<i64> {
            Ok(n * n)
        }

        fn timeout(&self) -> Duration {
            Duration::from_millis(500)
        }
    }

    #[test]
    fn test_derive_command_id() {
        assert_eq!(derive_command_id("app::handlers::FooBarCommand"), "fooBar");
        assert_eq!(derive_command_id("PingCommand"), "ping");
        assert_eq!(derive_command_id("Pong"), "pong");
        assert_eq!(derive_command_id("a::Wrapper<b::InnerCommand>"), "wrapper");
        assert_eq!(derive_command_id("Command"), "");
    }

    #[test]
    fn test_command_id_for_type() {
        assert_eq!(command_id_for::<FooBarCommand>(), "fooBar");
        assert_eq!(FooBarCommand.id(), "fooBar");
        assert_eq!(SquareCommand.id(), "square");
    }

    #[test]
    fn test_register_types() {
        let mut registry = CommandRegistry::new();
        registry.register(FooBarCommand);
        registry.register_sync(SquareCommand);

        assert!(matches!(registry.get("fooBar"), Some(CommandEntry::Command(_))));
        assert_eq!(registry.sync_timeout("square"), Some(Duration::from_millis(500)));
        assert_eq!(registry.sync_timeout("fooBar"), None);
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_register_closures() {
        let mut registry = CommandRegistry::new();
        registry.register_command("log", |_line: String, _conn: &Connection| Ok(()));
        registry.register_sync_command("double", Duration::from_secs(2), |n: i32, _conn: &Connection| {
            Ok(n * 2)
        });

        assert!(registry.contains("log"));
        assert!(registry.contains("double"));
        assert!(!registry.contains("missing"));
        let mut ids: Vec<_> = registry.ids().collect();
        ids.sort_unstable();
        assert_eq!(ids, vec!["double", "log"]);
    }

    #[test]
    fn test_duplicate_registration_replaces() {
        let mut registry = CommandRegistry::new();
        registry.register_command("x", |_: (), _conn: &Connection| Ok(()));
        registry.register_sync_command("x", Duration::from_secs(1), |_: (), _conn: &Connection| Ok(1));
        assert_eq!(registry.len(), 1);
        assert!(registry.sync_timeout("x").is_some());
    }

    #[test]
    fn test_default_sync_timeout() {
        struct EchoCommand;
        impl SyncCommand for EchoCommand {
            type Data = String;
            type Output = String;
            fn apply(&self, data: String, _connection: &Connection) -> Result<String> {
                Ok(data)
            }
        }
        assert_eq!(EchoCommand.timeout(), DEFAULT_SYNC_TIMEOUT);
    }
}
