//! Reverse tunnels: remote listener, local destination

use crate::active::{ActiveRelays, RelayPermit};
use crate::error::TunnelError;
use crate::options::TunnelOptions;
use crate::relay::relay;
use crate::slot::TransportSlot;
use sshtunnel_transport::{
    normalize_bind_addr, split_host_port, AcceptError, BoxedStream, RemoteListener,
};
use tokio::net::TcpStream;
use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Asks the current transport to listen remotely and relays each remote
/// connection to a local address.
///
/// The remote listener lives on a transport session, so when the session is
/// replaced the listener is re-requested from whichever transport is current.
#[derive(Clone)]
pub struct ReverseEngine {
    slot: TransportSlot,
    relays: ActiveRelays,
    options: TunnelOptions,
}

impl ReverseEngine {
    pub fn new(slot: TransportSlot, relays: ActiveRelays, options: TunnelOptions) -> Self {
        Self {
            slot,
            relays,
            options,
        }
    }

    /// Listen on `remote` and start relaying to `local` in the background.
    /// Returns the address the remote side actually bound.
    pub async fn start(
        &self,
        cancel: CancellationToken,
        remote: &str,
        local: &str,
    ) -> Result<String, TunnelError> {
        let remote = normalize_bind_addr(remote);
        let transport = self.slot.usable().ok_or(TunnelError::TransportUnavailable)?;

        let listener = transport
            .listen(&remote)
            .await
            .map_err(|source| TunnelError::RemoteListen {
                addr: remote.clone(),
                source,
            })?;
        let bound = listener.address().to_string();

        // A wildcard port keeps the port it was first given across relistens.
        let relisten_addr = match split_host_port(&remote) {
            Ok((_, 0)) => bound.clone(),
            _ => remote,
        };

        info!(remote = %bound, local = %local, peer = %transport.peer(), "Reverse tunnel listening");

        let permit = self.relays.acquire();
        tokio::spawn(self.clone().accept_loop(
            listener,
            relisten_addr,
            local.to_string(),
            cancel,
            permit,
        ));
        Ok(bound)
    }

    async fn accept_loop(
        self,
        mut listener: Box<dyn RemoteListener>,
        remote: String,
        local: String,
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
                    debug!(remote = %remote, peer = %peer, "Accepted remote connection");
                    let permit = self.relays.acquire();
                    tokio::spawn(handle_connection(stream, peer, local.clone(), permit));
                }
                Err(AcceptError::Timeout) => continue,
                Err(e) => {
                    warn!(remote = %remote, "Remote listener failed: {}", e);
                    listener.close().await;
                    match self.relisten(&remote, &cancel).await {
                        Some(relistened) => listener = relistened,
                        None => {
                            info!(remote = %remote, local = %local, "Reverse tunnel stopped");
                            return;
                        }
                    }
                }
            }
        }

        listener.close().await;
        info!(remote = %remote, local = %local, "Reverse tunnel stopped");
    }

    /// Request a new remote listener from the current transport until one
    /// is granted. Failed attempts are spaced by `relisten_interval`.
    async fn relisten(
        &self,
        remote: &str,
        cancel: &CancellationToken,
    ) -> Option<Box<dyn RemoteListener>> {
        loop {
            let transport = self.slot.wait_present(cancel).await?;

            match transport.listen(remote).await {
                Ok(listener) => {
                    info!(remote = %listener.address(), peer = %transport.peer(), "Remote listener re-established");
                    return Some(listener);
                }
                Err(e) => warn!(remote = %remote, peer = %transport.peer(), "Failed to relisten: {}", e),
            }

            tokio::select! {
                _ = cancel.cancelled() => return None,
                _ = time::sleep(self.options.relisten_interval) => {}
            }
        }
    }
}

async fn handle_connection(remote: BoxedStream, peer: String, local: String, _permit: RelayPermit) {
    let stream = match TcpStream::connect(&local).await {
        Ok(stream) => stream,
        Err(e) => {
            warn!(peer = %peer, local = %local, "Failed to dial local service: {}", e);
            return;
        }
    };

    let stats = relay(remote, stream).await;
    debug!(
        peer = %peer,
        local = %local,
        received = stats.a_to_b,
        sent = stats.b_to_a,
        "Reverse connection closed"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use sshtunnel_transport::{TransportError, TransportHandle, TransportResult};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    /// Grants one listener that dies immediately, then rejects every listen.
    #[derive(Default)]
    struct FlakyHandle {
        listens: AtomicUsize,
    }

    struct DeadListener;

    #[async_trait]
    impl RemoteListener for DeadListener {
        fn address(&self) -> &str {
            "127.0.0.1:7000"
        }

        async fn accept(&mut self) -> Result<(BoxedStream, String), AcceptError> {
            Err(AcceptError::Closed)
        }

        async fn close(&mut self) {}
    }

    #[async_trait]
    impl TransportHandle for FlakyHandle {
        fn peer(&self) -> &str {
            "flaky:22"
        }

        async fn open_channel(&self, _address: &str) -> TransportResult<BoxedStream> {
            Err(TransportError::Closed)
        }

        async fn listen(&self, address: &str) -> TransportResult<Box<dyn RemoteListener>> {
            if self.listens.fetch_add(1, Ordering::SeqCst) == 0 {
                return Ok(Box::new(DeadListener));
            }
            Err(TransportError::Listen {
                address: address.to_string(),
                reason: "administratively prohibited".to_string(),
            })
        }

        async fn send_keepalive(&self) -> TransportResult<()> {
            Ok(())
        }

        async fn close(&self) {}

        fn is_closed(&self) -> bool {
            false
        }
    }

    fn engine(slot: &TransportSlot, relays: &ActiveRelays) -> ReverseEngine {
        ReverseEngine::new(slot.clone(), relays.clone(), TunnelOptions::default())
    }

    #[tokio::test]
    async fn test_reverse_without_transport_is_unavailable() {
        let slot = TransportSlot::new();
        let relays = ActiveRelays::new();

        let result = engine(&slot, &relays)
            .start(CancellationToken::new(), ":7000", "127.0.0.1:80")
            .await;
        assert!(matches!(result, Err(TunnelError::TransportUnavailable)));
        assert_eq!(relays.count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_relisten_attempts_are_spaced() {
        let slot = TransportSlot::new();
        let relays = ActiveRelays::new();
        let handle = Arc::new(FlakyHandle::default());
        slot.install(handle.clone());

        let cancel = CancellationToken::new();
        let bound = engine(&slot, &relays)
            .start(cancel.clone(), ":7000", "127.0.0.1:80")
            .await
            .unwrap();
        assert_eq!(bound, "127.0.0.1:7000");

        // Initial listen, then a failed relisten at t=0, 1, 2, 3, 4, 5.
        time::sleep(Duration::from_millis(5500)).await;
        assert_eq!(handle.listens.load(Ordering::SeqCst), 7);
        assert_eq!(relays.count(), 1);

        cancel.cancel();
        time::timeout(Duration::from_secs(1), relays.wait_idle())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_initial_listen_failure_is_returned() {
        let slot = TransportSlot::new();
        let relays = ActiveRelays::new();
        let handle = Arc::new(FlakyHandle::default());
        handle.listens.store(1, Ordering::SeqCst);
        slot.install(handle);

        let result = engine(&slot, &relays)
            .start(CancellationToken::new(), "0.0.0.0:7000", "127.0.0.1:80")
            .await;
        assert!(matches!(
            result,
            Err(TunnelError::RemoteListen { ref addr, .. }) if addr == "0.0.0.0:7000"
        ));
    }
}
