//! Control plane errors

use sshtunnel_client::TunnelError;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum ControlError {
    #[error(transparent)]
    Tunnel(#[from] TunnelError),

    #[error("No relay with id {0}")]
    NotFound(Uuid),

    #[error("Protocol error: {0}")]
    Protocol(String),
}
