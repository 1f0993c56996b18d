//! The tunnel aggregate

use crate::active::{ActiveRelays, RelayPermit};
use crate::chain::TransportChain;
use crate::error::TunnelError;
use crate::forward::ForwardEngine;
use crate::keepalive::{KeepaliveSupervisor, SupervisorState};
use crate::options::TunnelOptions;
use crate::reverse::ReverseEngine;
use crate::slot::TransportSlot;
use serde::{Deserialize, Serialize};
use sshtunnel_transport::{HopConfig, HopDialer, TransportHandle};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Snapshot of a tunnel for diagnostics
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TunnelStatus {
    pub supervisor: SupervisorState,
    /// Peer of the current transport, if one is installed
    pub peer: Option<String>,
    pub dial_chain: Vec<String>,
    pub active_relays: usize,
}

/// A dialed hop chain and the relays running over it.
///
/// The chain is kept alive by a background keepalive supervisor. Any number of
/// forward and reverse relays can share it. [`Tunnel::close`] stops every
/// accept loop and closes the transport; [`Tunnel::wait`] returns once every
/// relay has drained.
pub struct Tunnel {
    chain: TransportChain,
    slot: TransportSlot,
    relays: ActiveRelays,
    options: TunnelOptions,
    cancel: CancellationToken,
    state: watch::Receiver<SupervisorState>,
    supervisor: Mutex<Option<JoinHandle<()>>>,
    /// Held from connect to close so `wait` cannot return early
    lifetime: Mutex<Option<RelayPermit>>,
}

impl Tunnel {
    /// Default, validate, and dial `hops`. A failure here is fatal; once
    /// connected, transport failures are retried in the background.
    pub async fn connect(
        mut hops: Vec<HopConfig>,
        dialer: Arc<dyn HopDialer>,
        options: TunnelOptions,
    ) -> Result<Self, TunnelError> {
        if hops.is_empty() {
            return Err(TunnelError::Config("at least one hop is required".to_string()));
        }
        for hop in hops.iter_mut() {
            hop.set_defaults();
            hop.validate()?;
        }

        let chain = TransportChain::new(hops, dialer);
        let handle = chain.dial().await?;

        let slot = TransportSlot::new();
        slot.install(handle);

        let relays = ActiveRelays::new();
        let lifetime = relays.acquire();
        let cancel = CancellationToken::new();

        let supervisor =
            KeepaliveSupervisor::new(chain.clone(), slot.clone(), options.clone(), cancel.clone());
        let state = supervisor.subscribe();
        let supervisor = tokio::spawn(supervisor.run());

        Ok(Self {
            chain,
            slot,
            relays,
            options,
            cancel,
            state,
            supervisor: Mutex::new(Some(supervisor)),
            lifetime: Mutex::new(Some(lifetime)),
        })
    }

    /// Relay connections accepted on `local` to `remote`, as seen from the
    /// last hop. Returns the bound local address.
    pub async fn forward(
        &self,
        cancel: &CancellationToken,
        local: &str,
        remote: &str,
    ) -> Result<SocketAddr, TunnelError> {
        if self.is_closed() {
            return Err(TunnelError::Closed);
        }
        let engine = ForwardEngine::new(
            self.slot.clone(),
            self.relays.clone(),
            self.options.clone(),
            self.cancel.clone(),
        );
        engine.start(self.link(cancel), local, remote).await
    }

    /// Relay connections accepted on `remote` by the last hop to `local`.
    /// Returns the address the remote side bound.
    pub async fn reverse(
        &self,
        cancel: &CancellationToken,
        remote: &str,
        local: &str,
    ) -> Result<String, TunnelError> {
        if self.is_closed() {
            return Err(TunnelError::Closed);
        }
        let engine = ReverseEngine::new(self.slot.clone(), self.relays.clone(), self.options.clone());
        engine.start(self.link(cancel), remote, local).await
    }

    /// A token cancelled by either the caller's token or the tunnel's.
    fn link(&self, caller: &CancellationToken) -> CancellationToken {
        let token = self.cancel.child_token();
        let (caller, linked) = (caller.clone(), token.clone());
        tokio::spawn(async move {
            tokio::select! {
                _ = caller.cancelled() => linked.cancel(),
                _ = linked.cancelled() => {}
            }
        });
        token
    }

    /// Stop admitting connections and close the transport. Relays that
    /// depend on the transport end as their channels fail. Idempotent.
    pub async fn close(&self) {
        if self.cancel.is_cancelled() {
            return;
        }
        self.cancel.cancel();

        let supervisor = lock(&self.supervisor).take();
        if let Some(supervisor) = supervisor {
            let _ = supervisor.await;
        }
        if let Some(transport) = self.slot.take() {
            transport.close().await;
        }

        info!(chain = %self.chain.dial_chain_log().join(", "), "Tunnel closed");
        lock(&self.lifetime).take();
    }

    /// Wait until the tunnel is closed and every relay has drained.
    pub async fn wait(&self) {
        self.relays.wait_idle().await;
    }

    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn hops(&self) -> &[HopConfig] {
        self.chain.hops()
    }

    pub fn options(&self) -> &TunnelOptions {
        &self.options
    }

    /// The current transport, `None` while reconnecting
    pub fn transport(&self) -> Option<Arc<dyn TransportHandle>> {
        self.slot.snapshot()
    }

    pub fn dial_chain_log(&self) -> Vec<String> {
        self.chain.dial_chain_log()
    }

    pub fn state(&self) -> SupervisorState {
        *self.state.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<SupervisorState> {
        self.state.clone()
    }

    /// Accept loops and relay pairs currently running, plus one for the
    /// tunnel itself until it is closed
    pub fn active_relays(&self) -> usize {
        self.relays.count()
    }

    pub fn status(&self) -> TunnelStatus {
        TunnelStatus {
            supervisor: self.state(),
            peer: self.transport().map(|t| t.peer().to_string()),
            dial_chain: self.dial_chain_log(),
            active_relays: self.active_relays(),
        }
    }
}

impl Drop for Tunnel {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|p| p.into_inner())
}
