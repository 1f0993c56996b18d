//! Transport abstraction for SSH tunnel chains
//!
//! The tunnel engine never talks to an SSH library directly. It sees a
//! [`HopDialer`] that produces [`TransportHandle`]s, and through a handle it can
//! open raw channels to remote addresses, ask the remote side to listen, and
//! probe liveness. `sshtunnel-transport-ssh` implements these traits with russh;
//! [`loopback`] implements them in-process for tests and demos.

pub mod addr;
pub mod error;
pub mod hop;
pub mod loopback;

pub use addr::{normalize_bind_addr, split_host_port};
pub use error::{AcceptError, TransportError, TransportResult};
pub use hop::{HopConfig, HopConfigError};

use async_trait::async_trait;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};

/// A bidirectional byte stream: a TCP socket, an SSH channel, an in-memory pipe.
pub trait DuplexStream: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T> DuplexStream for T where T: AsyncRead + AsyncWrite + Unpin + Send {}

/// Owned, type-erased duplex stream
pub type BoxedStream = Box<dyn DuplexStream>;

/// The previous hop of a chain, used to carry the next hop's handshake.
///
/// `stream` is a channel opened through `handle` to the next hop's address.
/// The handle dialed over it takes ownership of both, so closing the outer
/// handle closes the carrier as well.
pub struct Carrier {
    pub stream: BoxedStream,
    pub handle: Arc<dyn TransportHandle>,
}

/// Dials a single hop, either directly over the network or through a carrier.
#[async_trait]
pub trait HopDialer: Send + Sync {
    /// Authenticate to `hop`. With `via == None` this is a direct network dial.
    async fn connect(
        &self,
        hop: &HopConfig,
        via: Option<Carrier>,
    ) -> TransportResult<Arc<dyn TransportHandle>>;
}

/// A live authenticated session.
#[async_trait]
pub trait TransportHandle: Send + Sync {
    /// Address (`host:port`) of the host this session terminates at
    fn peer(&self) -> &str;

    /// Open a raw channel to `address` as seen from the remote host.
    async fn open_channel(&self, address: &str) -> TransportResult<BoxedStream>;

    /// Ask the remote host to listen on `address`.
    async fn listen(&self, address: &str) -> TransportResult<Box<dyn RemoteListener>>;

    /// Lightweight liveness probe.
    async fn send_keepalive(&self) -> TransportResult<()>;

    /// Close the session. Closing twice is a no-op.
    async fn close(&self);

    fn is_closed(&self) -> bool;
}

/// A listener bound on the remote side of a session.
#[async_trait]
pub trait RemoteListener: Send {
    /// The bound address, with the port the remote host actually assigned
    fn address(&self) -> &str;

    /// Wait for the next remote connection. Returns the stream and the
    /// originator's address.
    async fn accept(&mut self) -> Result<(BoxedStream, String), AcceptError>;

    /// Stop listening. Closing twice is a no-op.
    async fn close(&mut self);
}
