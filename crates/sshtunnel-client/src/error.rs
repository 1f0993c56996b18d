//! Tunnel error types

use sshtunnel_transport::{HopConfigError, TransportError};
use std::io;
use thiserror::Error;

/// Errors surfaced to the owner of a [`crate::Tunnel`].
///
/// Only configuration-class failures reach callers. Transport failures after
/// construction are absorbed by the keepalive supervisor.
#[derive(Debug, Error)]
pub enum TunnelError {
    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("Failed to listen on remote {addr}: {source}")]
    RemoteListen {
        addr: String,
        #[source]
        source: TransportError,
    },

    #[error("No transport available")]
    TransportUnavailable,

    #[error("Tunnel closed")]
    Closed,
}

impl From<HopConfigError> for TunnelError {
    fn from(err: HopConfigError) -> Self {
        TunnelError::Config(err.to_string())
    }
}

impl TunnelError {
    /// Errors caused by the caller's input rather than by the network
    pub fn is_config(&self) -> bool {
        matches!(self, TunnelError::Config(_) | TunnelError::Bind { .. })
    }
}
