//! An authenticated SSH session

use crate::handler::{ClientHandler, ForwardRegistry};
use crate::listener::SshListener;
use crate::session::SessionLock;
use async_trait::async_trait;
use russh::client::Handle;
use russh::Disconnect;
use sshtunnel_transport::{
    split_host_port, BoxedStream, RemoteListener, TransportError, TransportHandle,
    TransportResult,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::debug;

pub(crate) type SharedSession = SessionLock<Handle<ClientHandler>>;

pub struct SshHandle {
    peer: String,
    session: SharedSession,
    forwards: ForwardRegistry,
    /// Bound on any single request to the server
    request_timeout: Duration,
    /// Cancelled by the handler when the session ends on its own
    ended: CancellationToken,
    closed: CancellationToken,
    /// Session this one was dialed through, closed after this one
    carrier: Mutex<Option<Arc<dyn TransportHandle>>>,
}

impl SshHandle {
    pub(crate) fn new(
        peer: String,
        session: Handle<ClientHandler>,
        forwards: ForwardRegistry,
        ended: CancellationToken,
        carrier: Option<Arc<dyn TransportHandle>>,
        request_timeout: Duration,
    ) -> Self {
        Self {
            peer,
            session: SessionLock::new(session),
            forwards,
            request_timeout,
            ended,
            closed: CancellationToken::new(),
            carrier: Mutex::new(carrier),
        }
    }
}

#[async_trait]
impl TransportHandle for SshHandle {
    fn peer(&self) -> &str {
        &self.peer
    }

    async fn open_channel(&self, address: &str) -> TransportResult<BoxedStream> {
        if self.is_closed() {
            return Err(TransportError::Closed);
        }
        let (host, port) = split_host_port(address)?;

        let failed = |reason: String| TransportError::Channel {
            address: address.to_string(),
            reason,
        };

        let session = self.session.shared().await;
        let channel = time::timeout(
            self.request_timeout,
            session.channel_open_direct_tcpip(host, u32::from(port), "127.0.0.1", 0),
        )
        .await
        .map_err(|_| failed(format!("no confirmation within {:?}", self.request_timeout)))?
        .map_err(|e| failed(e.to_string()))?;
        drop(session);

        Ok(Box::new(channel.into_stream()))
    }

    async fn listen(&self, address: &str) -> TransportResult<Box<dyn RemoteListener>> {
        if self.is_closed() {
            return Err(TransportError::Closed);
        }
        let (host, port) = split_host_port(address)?;

        let listener = SshListener::open(
            self.session.clone(),
            self.forwards.clone(),
            self.ended.clone(),
            host,
            port,
            self.request_timeout,
        )
        .await?;
        Ok(Box::new(listener))
    }

    async fn send_keepalive(&self) -> TransportResult<()> {
        if self.is_closed() {
            return Err(TransportError::Closed);
        }
        let session = self.session.shared().await;
        if session.is_closed() {
            return Err(TransportError::Closed);
        }
        session
            .send_keepalive(true)
            .await
            .map_err(|e| TransportError::Keepalive(e.to_string()))
    }

    async fn close(&self) {
        if self.closed.is_cancelled() {
            return;
        }
        self.closed.cancel();
        self.forwards.clear();

        if !self.ended.is_cancelled() {
            let session = self.session.shared().await;
            if let Err(e) = session
                .disconnect(Disconnect::ByApplication, "", "en")
                .await
            {
                debug!(peer = %self.peer, "Failed to disconnect gracefully: {}", e);
            }
        }

        let carrier = self.carrier.lock().await.take();
        if let Some(carrier) = carrier {
            carrier.close().await;
        }
    }

    fn is_closed(&self) -> bool {
        self.closed.is_cancelled() || self.ended.is_cancelled()
    }
}
