//! Control plane for a running tunnel
//!
//! [`TunnelService`] starts, lists and stops relays on one shared
//! [`sshtunnel_client::Tunnel`]. [`ControlServer`] exposes the service over a
//! local socket speaking newline-delimited JSON, and [`ControlClient`] is the
//! other end used by `ssh-tunnel list` and `ssh-tunnel stop`.

pub mod error;
pub mod ipc;
pub mod service;
pub mod table;

pub use error::ControlError;
pub use ipc::{ControlClient, ControlRequest, ControlResponse, ControlServer};
pub use service::{RelayInfo, RelayKind, StartRequest, StartResponse, TunnelService};
pub use table::format_tunnel_table;
