//! Configuration Sync Error Hierarchy
//!
//! Errors are grouped by how the engine reacts to them:
//! - [`ConnectionError`]: fatal to the start operation, triggers reconnect inside watch loops
//! - [`WatchError`]: fatal to a single watch loop, sibling loops keep running
//! - [`DecodeError`]: the unit of data is dropped and logged
//! - [`Error::NotFound`]: treated as "no remote config"

use std::time::Duration;

use config::ConfigError;

#[doc(hidden)]
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Session establishment or session loss
    #[error(transparent)]
    Connection(#[from] ConnectionError),

    /// Watch registration and signal delivery failures
    #[error(transparent)]
    Watch(#[from] WatchError),

    /// Node payload is not one of the two legal shapes
    #[error(transparent)]
    Decode(#[from] DecodeError),

    /// Node does not exist in the coordination service
    #[error("Node not found: {0}")]
    NotFound(String),

    /// Layered settings could not be loaded
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Settings loaded but violate a rule
    #[error("Invalid config: {0}")]
    InvalidConfig(String),

    /// Backend specific failure that is not connection related
    #[error("Backend error: {0}")]
    Backend(String),

    /// Retry policy exhaustion
    #[error("Retry timeout after {0:?}")]
    RetryTimeout(Duration),

    #[error("Operation cancelled")]
    Cancelled,

    /// Unrecoverable failures requiring process termination
    #[error("Fatal error: {0}")]
    Fatal(String),
}

impl Error {
    /// Connection level failures are the only ones worth a reconnect attempt.
    pub fn is_connection_level(&self) -> bool {
        matches!(self, Error::Connection(_) | Error::RetryTimeout(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound(_))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error("No coordination hosts configured")]
    NoHosts,

    #[error("Failed to connect to [{hosts}]: {reason}")]
    ConnectFailed { hosts: String, reason: String },

    #[error("Connection timeout after {0:?}")]
    Timeout(Duration),

    /// Session expired, closed or the transport went away
    #[error("Session lost: {0}")]
    SessionLost(String),

    #[error("Backend {0} is not compiled into this build")]
    BackendUnavailable(&'static str),
}

#[derive(Debug, thiserror::Error)]
pub enum WatchError {
    #[error("Failed to register watch on {path}: {reason}")]
    Registration { path: String, reason: String },

    #[error("Watch loop on {path} gave up after {attempts} reconnect attempts")]
    RetryBudgetExhausted { path: String, attempts: usize },

    #[error("Signal channel closed")]
    SignalChannelClosed,

    #[error("No watch loop registered for {0}")]
    UnknownPath(String),
}

#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("Payload at {path} is empty")]
    Empty { path: String },

    /// Neither a flat string map nor a list of paths
    #[error("Payload at {path} is neither a key-value object nor a path list: {source}")]
    UnknownShape {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Payload at {path} is not a key-value object: {source}")]
    NotKeyValue {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Indirection at {path} exceeds max depth {max_depth}")]
    TooDeep { path: String, max_depth: usize },
}
