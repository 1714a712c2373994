//! Error types for the output manager client

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::types::OutputId;

/// Errors returned by the public client operations
#[derive(Debug, Error)]
pub enum EomError {
    /// An argument was out of range or otherwise malformed (caller bug)
    #[error("Invalid parameter: {reason}")]
    InvalidParameter { reason: String },

    /// The output id is not known to this client
    ///
    /// May be transient if discovery has not run yet.
    #[error("No such output device: {id}")]
    NoSuchDevice { id: OutputId },

    /// The transport to the output service could not be established
    #[error("Failed to connect to the output service: {0}")]
    ConnectionFailure(#[source] TransportError),

    /// The request was not transmitted or no reply arrived in time
    #[error("Failed to send {method} to the output service: {source}")]
    SendFailure {
        method: &'static str,
        #[source]
        source: TransportError,
    },

    /// The service replied but rejected the operation
    #[error("The output service rejected {method}")]
    OperationFailure { method: &'static str },

    /// Local allocation for a subscriber record failed
    #[error("Out of memory while registering a callback")]
    OutOfMemory,
}

impl EomError {
    pub(crate) fn invalid(reason: impl Into<String>) -> Self {
        Self::InvalidParameter {
            reason: reason.into(),
        }
    }
}

/// Errors raised by a transport backend
#[derive(Debug, Error)]
pub enum TransportError {
    /// No session is open, or the peer went away
    #[error("Transport is not connected")]
    NotConnected,

    /// No reply arrived before the deadline
    #[error("No reply within {0:?}")]
    Timeout(Duration),

    /// Another peer already owns our bus name
    #[error("Bus name {name} is owned by another peer")]
    NameConflict { name: String },

    /// Failed to connect to the service socket
    #[error("Failed to connect to service socket at {path}: {source}")]
    SocketConnect {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Reading or writing the underlying connection failed
    #[error("Transport I/O failed: {0}")]
    Io(#[from] std::io::Error),

    /// The message bus reported an error
    #[error("Message bus error: {0}")]
    Dbus(#[from] zbus::Error),

    /// Failed to serialize a frame
    #[error("Failed to serialize frame: {0}")]
    Serialize(#[source] serde_json::Error),

    /// The peer sent something the wire contract does not allow
    #[error("Protocol violation: {0}")]
    Protocol(String),

    /// The peer answered the call with an error
    #[error("Service returned error: {message}")]
    Remote { message: String },
}
