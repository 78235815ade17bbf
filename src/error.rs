//! Error types for motorlink.

use std::time::Duration;

use thiserror::Error;

use crate::session::SessionState;

/// Main error type for all session-layer operations.
///
/// Every variant names the peer or the operation involved so a caller can
/// present a specific message without inspecting internal state.
#[derive(Debug, Error)]
pub enum LinkError {
    /// Discovery finished without finding a device on the allow-list.
    #[error("no device named {names:?} found within {timeout:?}")]
    DeviceNotFound {
        /// Names that were accepted.
        names: Vec<String>,
        /// How long the scan ran.
        timeout: Duration,
    },

    /// The transport did not open within the connection timeout.
    #[error("connecting to {peer} timed out after {timeout:?}")]
    ConnectTimeout {
        /// Peer address.
        peer: String,
        /// Configured connection timeout.
        timeout: Duration,
    },

    /// The transport refused to open.
    #[error("connecting to {peer} failed: {reason}")]
    ConnectFailed {
        /// Peer address.
        peer: String,
        /// Underlying cause.
        reason: String,
    },

    /// An outbound command was issued while the session is not `Ready`.
    #[error("{peer} is not connected (session is {state})")]
    NotConnected {
        /// Peer address, or `-` when no device was ever chosen.
        peer: String,
        /// State at the time of the call.
        state: SessionState,
    },

    /// Raw text failed the command grammar check.
    #[error("invalid command {0:?}")]
    InvalidCommand(String),

    /// A command argument is out of range.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The link did not complete a write within the send timeout.
    #[error("sending {command:?} to {peer} timed out after {timeout:?}")]
    SendTimeout {
        /// Peer address.
        peer: String,
        /// Wire text of the command.
        command: String,
        /// Configured send timeout.
        timeout: Duration,
    },

    /// The underlying channel has ended.
    #[error("transport to {peer} is closed")]
    TransportClosed {
        /// Peer address.
        peer: String,
    },

    /// A state change outside the session state machine was requested.
    #[error("session cannot move from {from} to {to}")]
    InvalidTransition {
        /// Current state.
        from: SessionState,
        /// Requested state.
        to: SessionState,
    },

    /// I/O error from a socket operation.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration could not be parsed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Error reported by the Bluetooth stack.
    #[cfg(feature = "ble")]
    #[error("bluetooth error: {0}")]
    Bluetooth(#[from] btleplug::Error),
}

/// Result type alias using LinkError.
pub type Result<T> = std::result::Result<T, LinkError>;
