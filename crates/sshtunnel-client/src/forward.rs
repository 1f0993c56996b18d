//! Forward tunnels: local listener, remote destination

use crate::active::{ActiveRelays, RelayPermit};
use crate::error::TunnelError;
use crate::options::TunnelOptions;
use crate::relay::relay;
use crate::slot::TransportSlot;
use sshtunnel_transport::{normalize_bind_addr, AcceptError, TransportHandle};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Accepts local connections and relays each one to a remote address
/// reached through the current transport.
#[derive(Clone)]
pub struct ForwardEngine {
    slot: TransportSlot,
    relays: ActiveRelays,
    options: TunnelOptions,
    /// The tunnel's token; bounds how long a stalled connection may wait
    shutdown: CancellationToken,
}

impl ForwardEngine {
    pub fn new(
        slot: TransportSlot,
        relays: ActiveRelays,
        options: TunnelOptions,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            slot,
            relays,
            options,
            shutdown,
        }
    }

    /// Bind `local` and start relaying to `remote` in the background.
    ///
    /// A bind failure is returned here and never retried. The accept loop
    /// stops admitting connections once `cancel` fires.
    pub async fn start(
        &self,
        cancel: CancellationToken,
        local: &str,
        remote: &str,
    ) -> Result<SocketAddr, TunnelError> {
        let local = normalize_bind_addr(local);
        let listener = TcpListener::bind(&local)
            .await
            .map_err(|source| TunnelError::Bind {
                addr: local.clone(),
                source,
            })?;
        let bound = listener
            .local_addr()
            .map_err(|source| TunnelError::Bind {
                addr: local.clone(),
                source,
            })?;

        info!(local = %bound, remote = %remote, "Forward tunnel listening");

        let permit = self.relays.acquire();
        tokio::spawn(
            self.clone()
                .accept_loop(listener, bound, remote.to_string(), cancel, permit),
        );
        Ok(bound)
    }

    async fn accept_loop(
        self,
        mut listener: TcpListener,
        bound: SocketAddr,
        remote: String,
        cancel: CancellationToken,
        _permit: RelayPermit,
    ) {
        loop {
            let accepted = tokio::select! {
                _ = cancel.cancelled() => break,
                accepted = listener.accept() => accepted,
            };

            match accepted {
                Ok((stream, peer)) => {
                    if cancel.is_cancelled() {
                        break;
                    }
                    debug!(local = %bound, peer = %peer, "Accepted local connection");
                    let permit = self.relays.acquire();
                    tokio::spawn(self.clone().handle_connection(
                        stream,
                        peer,
                        remote.clone(),
                        permit,
                    ));
                }
                Err(e) => match AcceptError::from(e) {
                    AcceptError::Timeout => continue,
                    err => {
                        warn!(local = %bound, "Accept failed, rebuilding listener: {}", err);
                        drop(listener);
                        match self.rebind(bound, &cancel).await {
                            Some(rebound) => listener = rebound,
                            None => break,
                        }
                    }
                },
            }
        }
        info!(local = %bound, remote = %remote, "Forward tunnel stopped");
    }

    /// Bind `addr` again, retrying every `relisten_interval`. `None` once
    /// cancelled.
    async fn rebind(&self, addr: SocketAddr, cancel: &CancellationToken) -> Option<TcpListener> {
        loop {
            match TcpListener::bind(addr).await {
                Ok(listener) => {
                    info!(local = %addr, "Local listener rebuilt");
                    return Some(listener);
                }
                Err(e) => warn!(local = %addr, "Failed to rebind: {}", e),
            }
            tokio::select! {
                _ = cancel.cancelled() => return None,
                _ = time::sleep(self.options.relisten_interval) => {}
            }
        }
    }

    async fn handle_connection(
        self,
        local: TcpStream,
        peer: SocketAddr,
        remote: String,
        _permit: RelayPermit,
    ) {
        let Some(transport) = self.current_transport().await else {
            warn!(peer = %peer, remote = %remote, "No transport available, dropping connection");
            return;
        };

        let channel = match transport.open_channel(&remote).await {
            Ok(channel) => channel,
            Err(e) => {
                warn!(peer = %peer, remote = %remote, "Failed to dial remote: {}", e);
                return;
            }
        };

        let stats = relay(local, channel).await;
        debug!(
            peer = %peer,
            remote = %remote,
            sent = stats.a_to_b,
            received = stats.b_to_a,
            "Forward connection closed"
        );
    }

    /// The current transport, waiting up to `transport_wait` while it is
    /// being re-established.
    async fn current_transport(&self) -> Option<Arc<dyn TransportHandle>> {
        if let Some(transport) = self.slot.usable() {
            return Some(transport);
        }
        debug!("Transport absent, waiting for reconnection");
        time::timeout(
            self.options.transport_wait,
            self.slot.wait_present(&self.shutdown),
        )
        .await
        .ok()
        .flatten()
    }
}
