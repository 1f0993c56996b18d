//! SSH tunnel engine
//!
//! A [`Tunnel`] dials an ordered chain of SSH hops, keeps the resulting
//! session alive, and runs forward and reverse relays over it:
//!
//! - [`TransportChain`] dials hop 1 directly and each later hop through the
//!   previous hop's session.
//! - [`KeepaliveSupervisor`] probes the session and redials the whole chain
//!   when it stops answering, forever, until the tunnel is closed.
//! - [`ForwardEngine`] accepts locally and dials the remote through the
//!   current session; [`ReverseEngine`] listens remotely and dials locally.
//! - [`relay`] copies bytes between the two ends of each connection.
//!
//! The engines never dial the chain themselves. They read the current
//! session from a [`TransportSlot`] and treat an absent session as a
//! transient condition.

pub mod active;
pub mod chain;
pub mod error;
pub mod forward;
pub mod keepalive;
pub mod options;
pub mod relay;
pub mod reverse;
pub mod slot;
pub mod tunnel;

pub use active::{ActiveRelays, RelayPermit};
pub use chain::TransportChain;
pub use error::TunnelError;
pub use forward::ForwardEngine;
pub use keepalive::{KeepaliveSupervisor, SupervisorState};
pub use options::TunnelOptions;
pub use relay::{relay, RelayStats};
pub use reverse::ReverseEngine;
pub use slot::TransportSlot;
pub use tunnel::{Tunnel, TunnelStatus};

pub use sshtunnel_transport::{HopConfig, HopDialer, TransportHandle};
