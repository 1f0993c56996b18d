//! russh client handler: host key policy and forwarded-channel routing

use russh::client::{self, Msg};
use russh::Channel;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// A `forwarded-tcpip` channel and the address of the remote client
pub(crate) type Incoming = (Channel<Msg>, String);

/// Queues of the listeners registered on one session, keyed by bound port
#[derive(Clone, Default)]
pub(crate) struct ForwardRegistry {
    queues: Arc<Mutex<HashMap<u32, mpsc::UnboundedSender<Incoming>>>>,
}

impl ForwardRegistry {
    pub(crate) fn register(&self, port: u32) -> mpsc::UnboundedReceiver<Incoming> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.lock().insert(port, tx);
        rx
    }

    pub(crate) fn unregister(&self, port: u32) {
        self.lock().remove(&port);
    }

    /// Drop every queue; pending and future `accept`s see a closed listener.
    pub(crate) fn clear(&self) {
        self.lock().clear();
    }

    fn route(&self, port: u32, incoming: Incoming) -> Result<(), Incoming> {
        match self.lock().get(&port) {
            Some(tx) => tx.send(incoming).map_err(|e| e.0),
            None => Err(incoming),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<u32, mpsc::UnboundedSender<Incoming>>> {
        self.queues.lock().unwrap_or_else(|p| p.into_inner())
    }
}

pub(crate) struct ClientHandler {
    peer: String,
    forwards: ForwardRegistry,
    /// Cancelled when russh drops the handler, i.e. when the session ends
    ended: CancellationToken,
}

impl ClientHandler {
    pub(crate) fn new(peer: String, forwards: ForwardRegistry, ended: CancellationToken) -> Self {
        Self {
            peer,
            forwards,
            ended,
        }
    }
}

impl Drop for ClientHandler {
    fn drop(&mut self) {
        debug!(peer = %self.peer, "SSH session ended");
        self.forwards.clear();
        self.ended.cancel();
    }
}

impl client::Handler for ClientHandler {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        server_public_key: &russh::keys::PublicKey,
    ) -> Result<bool, Self::Error> {
        debug!(
            peer = %self.peer,
            fingerprint = %server_public_key.fingerprint(Default::default()),
            "Accepting host key without verification"
        );
        Ok(true)
    }

    async fn server_channel_open_forwarded_tcpip(
        &mut self,
        channel: Channel<Msg>,
        connected_address: &str,
        connected_port: u32,
        originator_address: &str,
        originator_port: u32,
        _session: &mut client::Session,
    ) -> Result<(), Self::Error> {
        let originator = format!("{}:{}", originator_address, originator_port);
        debug!(
            peer = %self.peer,
            bound = %format!("{}:{}", connected_address, connected_port),
            originator = %originator,
            "Forwarded connection"
        );

        if let Err((channel, _)) = self.forwards.route(connected_port, (channel, originator)) {
            warn!(
                peer = %self.peer,
                port = connected_port,
                "No listener for forwarded connection, closing channel"
            );
            let _ = channel.close().await;
        }
        Ok(())
    }
}
