//! XTables Error Hierarchy
//!
//! Errors are grouped by the layer that raises them: key validation, wire
//! framing, the server-side store, the client request engine and the script
//! registry. Everything converges into [`Error`] so callers propagate with `?`.

use std::path::PathBuf;
use std::time::Duration;

use config::ConfigError;
use tokio::task::JoinError;

#[doc(hidden)]
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Malformed hierarchical key or name
    #[error(transparent)]
    Key(#[from] KeyError),

    /// Undecodable or oversized wire frame
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// Server-side tree failures
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Client request lifecycle failures (timeouts, disconnects, rejections)
    #[error(transparent)]
    Client(#[from] ClientError),

    /// Remote script registration and execution failures
    #[error(transparent)]
    Script(#[from] ScriptError),

    /// Configuration sources could not be merged or deserialized
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Semantically invalid configuration values
    #[error("Invalid config: {0}")]
    InvalidConfig(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error("Background task failed: {0}")]
    Join(#[from] JoinError),

    #[error("Failed to send shutdown signal: {0}")]
    SignalSenderClosed(String),

    /// Unrecoverable failures requiring process termination
    #[error("Fatal error: {0}")]
    Fatal(String),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum KeyError {
    #[error("key must not be empty")]
    Empty,

    #[error("key '{0}' contains whitespace")]
    Whitespace(String),

    #[error("key '{0}' must not start or end with '.'")]
    BoundaryDot(String),

    #[error("key '{0}' contains consecutive '.'")]
    ConsecutiveDots(String),

    #[error("key '{0}' has an empty segment")]
    EmptySegment(String),

    #[error("name '{0}' must not contain '.'")]
    DottedName(String),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    /// Frame could not be parsed into id, method, status and payload
    #[error("Malformed message: {reason} (line: {line:?})")]
    MalformedMessage { line: String, reason: &'static str },

    #[error("Frame exceeds maximum length of {max} bytes")]
    FrameTooLong { max: usize },

    /// Underlying stream failure reported by the line codec
    #[error("Transport error: {0}")]
    Transport(String),
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Write attempted on a reserved administrative subtree
    #[error("Key '{0}' is flagged and cannot be modified")]
    FlaggedKey(String),

    #[error("Key '{0}' does not exist")]
    KeyNotFound(String),

    #[error("Key '{0}' already exists")]
    KeyExists(String),

    #[error("Cannot move '{from}' into its own subtree at '{to}'")]
    CyclicRename { from: String, to: String },

    #[error("Invalid tree document: {0}")]
    InvalidTree(String),

    /// Serialization or IO failure while saving or restoring a backup
    #[error("Backup failed for {path:?}: {reason}")]
    Backup { path: PathBuf, reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ClientError {
    /// No correlated response within the deadline
    #[error("Request {id} timed out after {duration:?}")]
    Timeout { id: String, duration: Duration },

    /// Initial connection was not established within the connect timeout
    #[error("Failed to connect to {address} within {timeout:?}")]
    ConnectFailed { address: String, timeout: Duration },

    /// Socket closed or reset while the request was pending
    #[error("Connection lost before a response arrived")]
    ConnectionLost,

    /// Engine was stopped while the request was pending
    #[error("Request cancelled: client is shutting down")]
    Cancelled,

    /// Server explicitly rejected a write (e.g. flagged key)
    #[error("Server flagged the value for key '{0}'")]
    ServerFlaggedValue(String),

    /// Generic `FAIL` response carrying the server's reason
    #[error("Server rejected {method}: {reason}")]
    ServerRejected { method: String, reason: String },

    /// Value was not valid JSON or did not decode into the requested type
    #[error("Failed to decode value for '{key}': {reason}")]
    Decode { key: String, reason: String },

    #[error("Response for request {0} did not match the expected shape")]
    UnexpectedResponse(String),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ScriptError {
    #[error("Script '{0}' is already registered")]
    AlreadyExists(String),

    #[error("Script '{0}' is not registered")]
    NotFound(String),

    #[error("Script '{name}' failed: {message}")]
    Failed { name: String, message: String },
}

impl Error {
    /// Whether the error is a client timeout, used by callers that retry reads
    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::Client(ClientError::Timeout { .. }))
    }

    /// Whether the error means the connection went away mid-request
    pub fn is_connection_lost(&self) -> bool {
        matches!(self, Error::Client(ClientError::ConnectionLost))
    }
}
