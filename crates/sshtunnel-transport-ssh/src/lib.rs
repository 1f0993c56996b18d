//! SSH transport implementation using russh
//!
//! [`SshDialer`] implements [`sshtunnel_transport::HopDialer`]: it loads the
//! hop's private key, performs the handshake and public-key authentication, and
//! returns an [`SshHandle`]. A hop dialed with a carrier runs its handshake over
//! a `direct-tcpip` channel of the previous session, which is how jump hosts
//! are chained.
//!
//! # Example
//!
//! ```no_run
//! use sshtunnel_transport::{HopConfig, HopDialer};
//! use sshtunnel_transport_ssh::{SshClientOptions, SshDialer};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let dialer = SshDialer::new(SshClientOptions::default());
//!
//! let mut hop = HopConfig::new("bastion.example.com");
//! hop.set_defaults();
//!
//! let session = dialer.connect(&hop, None).await?;
//! let channel = session.open_channel("10.0.0.5:5432").await?;
//! # drop(channel);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod connector;
pub mod handle;
pub mod handler;
pub mod keys;
pub mod listener;
mod session;

pub use config::SshClientOptions;
pub use connector::SshDialer;
pub use handle::SshHandle;
pub use listener::SshListener;
