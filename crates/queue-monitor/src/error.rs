use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Classification attached to a `connectionError` notification.
///
/// These are never returned as `Err`; the connection controller reports them
/// as [`crate::events::QueueMonitorEvent::ConnectionError`] and then runs its
/// disconnect handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConnectionErrorCode {
    /// Connect attempt did not complete within the connect timeout
    Timeout,
    /// The switch rejected the configured credentials
    InvalidCredentials,
    /// Error reported by the transport after opening
    TransportError,
    /// The transport could not open its socket
    SocketError,
    /// A scheduled reconnect attempt could not be started
    ReconnectError,
    /// Closing the transport during shutdown failed
    CleanupError,
}

impl ConnectionErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionErrorCode::Timeout => "Timeout",
            ConnectionErrorCode::InvalidCredentials => "InvalidCredentials",
            ConnectionErrorCode::TransportError => "TransportError",
            ConnectionErrorCode::SocketError => "SocketError",
            ConnectionErrorCode::ReconnectError => "ReconnectError",
            ConnectionErrorCode::CleanupError => "CleanupError",
        }
    }
}

impl fmt::Display for ConnectionErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Command gateway failures
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CommandError {
    /// The connection is not in the `Connected` state
    #[error("Not connected to the switch")]
    NotConnected,

    /// No response arrived within the allotted time
    #[error("Action timed out after {0:?}")]
    Timeout(Duration),

    /// The transport delivered an empty response
    #[error("Invalid (empty) response to action")]
    InvalidResponse,

    /// The switch answered with an error outcome
    #[error("Remote error: {0}")]
    RemoteError(String),

    /// The transport failed to deliver the action
    #[error("Transport failure: {0}")]
    Transport(String),
}

/// Failures raised by a [`crate::transport::Transport`] implementation
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TransportError {
    #[error("Socket error: {0}")]
    Socket(String),

    #[error("Send failed: {0}")]
    Send(String),

    #[error("Close failed: {0}")]
    Close(String),
}

/// Rejection of a raw payload at the boundary
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ParseError {
    #[error("Missing field '{0}'")]
    MissingField(&'static str),

    #[error("Field '{field}' is not a valid number: '{value}'")]
    InvalidNumber { field: &'static str, value: String },

    #[error("Field '{field}' is not a valid flag: '{value}'")]
    InvalidFlag { field: &'static str, value: String },

    #[error("Event has no discriminant")]
    MissingEventKind,
}

/// Queue monitor errors
#[derive(Error, Debug)]
pub enum QueueMonitorError {
    /// Command gateway errors
    #[error("Command error: {0}")]
    Command(#[from] CommandError),

    /// Transport errors
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// Payload validation errors
    #[error("Parse error: {0}")]
    Parse(#[from] ParseError),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),
}

impl QueueMonitorError {
    /// Create a new Config error
    pub fn config<S: Into<String>>(msg: S) -> Self {
        Self::Config(msg.into())
    }
}

/// Result type for queue monitor operations
pub type Result<T> = std::result::Result<T, QueueMonitorError>;
