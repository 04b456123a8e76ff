//! Error types for nsocket.

use std::net::SocketAddr;

use thiserror::Error;

/// Main error type for all nsocket operations.
#[derive(Debug, Error)]
pub enum SocketError {
    /// I/O error on a socket or listener.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error (command bodies).
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// MsgPack serialization error (frame envelope).
    #[error("MsgPack encode error: {0}")]
    MsgPackEncode(#[from] rmp_serde::encode::Error),

    /// MsgPack deserialization error (frame envelope).
    #[error("MsgPack decode error: {0}")]
    MsgPackDecode(#[from] rmp_serde::decode::Error),

    /// Protocol error (malformed frame, bad envelope marker, oversized message).
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// No handler registered for the given command id.
    #[error("Command not found: {0}")]
    CommandNotFound(String),

    /// The connection is closed or was closed while the operation was in flight.
    #[error("Connection closed")]
    ConnectionClosed,

    /// The peer did not complete the connect/handshake sequence in time.
    #[error("Connecting to {0} timed out")]
    ConnectTimeout(SocketAddr),

    /// The connect attempt failed (refused, reset, handshake rejected).
    #[error("Failed to connect to {0}")]
    ConnectFailed(SocketAddr),

    /// TLS engine error.
    #[error("TLS error: {0}")]
    Tls(#[from] rustls::Error),

    /// TLS material could not be loaded or is inconsistent.
    #[error("TLS configuration error: {0}")]
    TlsConfig(String),

    /// The reconnection policy ran out of attempts.
    #[error("Connection to {addr} could not be established after {attempts} attempts")]
    ReconnectExhausted {
        /// Remote address that was retried.
        addr: SocketAddr,
        /// Number of attempts made.
        attempts: u32,
    },

    /// A user command handler failed.
    #[error("Handler error: {0}")]
    Handler(String),

    /// A synchronous command did not produce a usable result.
    #[error(transparent)]
    Sync(#[from] SyncCommandError),

    /// The endpoint has been stopped.
    #[error("Endpoint is not running")]
    NotRunning,
}

impl SocketError {
    /// Build a handler failure from any message.
    pub fn handler(message: impl Into<String>) -> Self {
        Self::Handler(message.into())
    }

    /// The bare failure message, without the variant prefix for handler errors.
    pub(crate) fn into_message(self) -> String {
        match self {
            Self::Handler(message) => message,
            other => other.to_string(),
        }
    }
}

/// Outcome of a synchronous command that did not succeed.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SyncCommandError {
    /// No reply arrived within the declared timeout plus the network margin.
    #[error("A sync command could not return response")]
    NoResponse,

    /// The remote handler failed.
    #[error("A sync command failed: {0}")]
    Failed(String),

    /// The remote handler did not finish within its declared timeout.
    #[error("A sync command was timed out")]
    Timeout,

    /// The reply did not decode into the type the caller expected.
    #[error("A sync command returned an unexpected result: {0}")]
    InvalidResult(String),
}

/// Result type alias using SocketError.
pub type Result<T> = std::result::Result<T, SocketError>;
