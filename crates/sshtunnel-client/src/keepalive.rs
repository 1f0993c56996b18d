//! Keepalive supervision and reconnection

use crate::chain::TransportChain;
use crate::options::TunnelOptions;
use crate::slot::TransportSlot;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// Supervisor state, published on a `watch` channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum SupervisorState {
    /// A transport is installed and answering probes
    Healthy,
    /// The transport is absent; `attempt` counts redials since it was lost
    Reconnecting { attempt: u64 },
}

impl SupervisorState {
    pub fn is_healthy(&self) -> bool {
        matches!(self, SupervisorState::Healthy)
    }
}

/// Probes the current transport and replaces it when it stops answering.
///
/// Redials never give up; the loop ends only when `cancel` fires.
pub struct KeepaliveSupervisor {
    chain: TransportChain,
    slot: TransportSlot,
    options: TunnelOptions,
    cancel: CancellationToken,
    state: watch::Sender<SupervisorState>,
}

impl KeepaliveSupervisor {
    pub fn new(
        chain: TransportChain,
        slot: TransportSlot,
        options: TunnelOptions,
        cancel: CancellationToken,
    ) -> Self {
        let (state, _) = watch::channel(SupervisorState::Healthy);
        Self {
            chain,
            slot,
            options,
            cancel,
            state,
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<SupervisorState> {
        self.state.subscribe()
    }

    pub async fn run(self) {
        let mut state = SupervisorState::Healthy;
        loop {
            let next = match state {
                SupervisorState::Healthy => self.probe().await,
                SupervisorState::Reconnecting { attempt } => self.redial(attempt).await,
            };
            match next {
                Some(next) => {
                    if next != state {
                        debug!(from = ?state, to = ?next, "Supervisor state change");
                    }
                    state = next;
                    self.state.send_replace(state);
                }
                None => break,
            }
        }
        debug!("Keepalive supervisor stopped");
    }

    /// Wait one interval, then probe. `None` means cancelled.
    async fn probe(&self) -> Option<SupervisorState> {
        if !self.sleep(self.options.keepalive_interval).await {
            return None;
        }

        let Some(handle) = self.slot.snapshot() else {
            error!("SSH connection is absent, reconnecting");
            return Some(SupervisorState::Reconnecting { attempt: 1 });
        };

        // A keepalive that gets no answer within one interval counts as failed.
        let deadline = self.options.keepalive_interval;
        let result = tokio::select! {
            _ = self.cancel.cancelled() => return None,
            result = time::timeout(deadline, handle.send_keepalive()) => result,
        };
        let result = match result {
            Ok(result) => result.map_err(|e| e.to_string()),
            Err(_) => Err(format!("no keepalive answer within {:?}", deadline)),
        };

        match result {
            Ok(()) => Some(SupervisorState::Healthy),
            Err(e) => {
                error!(peer = %handle.peer(), "SSH connection has been lost: {}", e);
                self.slot.take();
                handle.close().await;
                Some(SupervisorState::Reconnecting { attempt: 1 })
            }
        }
    }

    async fn redial(&self, attempt: u64) -> Option<SupervisorState> {
        let result = tokio::select! {
            _ = self.cancel.cancelled() => return None,
            result = self.chain.dial() => result,
        };

        match result {
            Ok(handle) => {
                if let Some(stale) = self.slot.install(handle) {
                    stale.close().await;
                }
                if self.cancel.is_cancelled() {
                    if let Some(handle) = self.slot.take() {
                        handle.close().await;
                    }
                    return None;
                }
                info!(attempt, "SSH redial success");
                Some(SupervisorState::Healthy)
            }
            Err(e) => {
                error!(attempt, "SSH redial failed: {}", e);
                if !self.sleep(self.options.reconnect_backoff).await {
                    return None;
                }
                Some(SupervisorState::Reconnecting {
                    attempt: attempt + 1,
                })
            }
        }
    }

    /// Sleep unless cancelled first; returns false on cancellation.
    async fn sleep(&self, duration: std::time::Duration) -> bool {
        tokio::select! {
            _ = self.cancel.cancelled() => false,
            _ = time::sleep(duration) => true,
        }
    }
}
