//! Error hierarchy for the store, hub, and persistence layers.
//!
//! Errors are categorized by subsystem: store-level RPC failures, hub-level
//! wire protocol failures, and snapshot persistence failures. Configuration
//! errors are passed through from the `config` crate.

use std::time::Duration;

use config::ConfigError;

#[doc(hidden)]
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Store-level failures (RPC dispatch)
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Hub-level failures (wire protocol, transport)
    #[error(transparent)]
    Hub(#[from] HubError),

    /// Snapshot persistence failures
    #[error(transparent)]
    Snapshot(#[from] SnapshotError),

    /// Configuration validation failures
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Unrecoverable failures requiring process termination
    #[error("Fatal error: {0}")]
    Fatal(String),
}

/// Failures surfaced by [`crate::Store::call`].
///
/// Mutations and subscriptions have no failure path visible to the caller;
/// only RPC dispatch can fail.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Call to a name with no registered handler, locally or remotely
    #[error("RPC handler '{0}' not found")]
    HandlerNotFound(String),

    /// Registered handler returned an error or panicked
    #[error("RPC call '{name}' failed: {message}")]
    HandlerExecutionFailed { name: String, message: String },

    /// Forwarded call exceeded its pending lifetime
    #[error("RPC call '{name}' timed out after {timeout:?}")]
    CallTimeout { name: String, timeout: Duration },
}

#[derive(Debug, thiserror::Error)]
pub enum HubError {
    /// Wire message failed to parse or lacked a required field
    #[error("Malformed message: {0}")]
    MalformedMessage(#[from] crate::hub::message::ParseError),

    /// Underlying connection dropped, intentionally or not
    #[error("Transport disconnected")]
    TransportDisconnected,

    /// Target connection is not registered with the hub
    #[error("Connection '{0}' is no longer registered")]
    UnknownConnection(String),

    /// Listener socket could not be bound
    #[error("Failed to bind listener on {addr}: {source}")]
    BindFailed {
        addr: String,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum SnapshotError {
    /// Disk I/O failures during snapshot load/save
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Snapshot file is not valid JSON
    #[error("Snapshot parse failed: {0}")]
    Parse(#[from] serde_json::Error),

    /// Snapshot file root must be a JSON object mapping keys to values
    #[error("Snapshot root is not a JSON object: {path}")]
    InvalidRoot { path: String },
}

// ============== Conversion Implementations ============== //
impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Snapshot(SnapshotError::Io(e))
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Snapshot(SnapshotError::Parse(e))
    }
}
