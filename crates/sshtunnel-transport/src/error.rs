//! Transport error types

use std::io;
use thiserror::Error;

/// Errors raised while dialing or using a transport
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Failed to load identity {path}: {reason}")]
    Credential { path: String, reason: String },

    #[error("Authentication as {user}@{address} rejected")]
    Authentication { user: String, address: String },

    #[error("Failed to connect to {address}: {reason}")]
    Dial { address: String, reason: String },

    #[error("Handshake with {address} failed: {reason}")]
    Handshake { address: String, reason: String },

    #[error("Failed to open channel to {address}: {reason}")]
    Channel { address: String, reason: String },

    #[error("Failed to listen on remote {address}: {reason}")]
    Listen { address: String, reason: String },

    #[error("Keepalive failed: {0}")]
    Keepalive(String),

    #[error("Transport closed")]
    Closed,

    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl TransportError {
    /// True when the private key could not be read or parsed
    pub fn is_credential(&self) -> bool {
        matches!(self, TransportError::Credential { .. })
    }
}

pub type TransportResult<T> = Result<T, TransportError>;

/// Classification of a failed accept, decided where the error is produced.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AcceptError {
    /// Nothing arrived in time; the listener is still usable
    #[error("Accept timed out")]
    Timeout,

    /// The listener (or the session it lives on) is gone
    #[error("Listener closed")]
    Closed,

    #[error("Accept failed: {0}")]
    Other(String),
}

impl AcceptError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, AcceptError::Timeout)
    }
}

impl From<io::Error> for AcceptError {
    fn from(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => AcceptError::Timeout,
            io::ErrorKind::NotConnected | io::ErrorKind::BrokenPipe | io::ErrorKind::UnexpectedEof => {
                AcceptError::Closed
            }
            _ => AcceptError::Other(err.to_string()),
        }
    }
}
