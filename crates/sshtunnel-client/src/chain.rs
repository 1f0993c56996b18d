//! Dialing an ordered chain of hops

use sshtunnel_transport::{
    Carrier, HopConfig, HopDialer, TransportError, TransportHandle, TransportResult,
};
use std::sync::{Arc, Mutex};
use tracing::{debug, info};

/// Dials a fixed hop list, each hop tunnelled through the one before it.
#[derive(Clone)]
pub struct TransportChain {
    hops: Arc<[HopConfig]>,
    dialer: Arc<dyn HopDialer>,
    /// Every hop address dialed successfully, across all dials, in order
    log: Arc<Mutex<Vec<String>>>,
}

impl TransportChain {
    pub fn new(hops: Vec<HopConfig>, dialer: Arc<dyn HopDialer>) -> Self {
        Self {
            hops: hops.into(),
            dialer,
            log: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn hops(&self) -> &[HopConfig] {
        &self.hops
    }

    /// Dial every hop and return the handle of the last one.
    ///
    /// Hop 1 is dialed directly. Each later hop is dialed over a channel
    /// opened through the previous hop's session; the new handle owns that
    /// carrier, so only the outermost handle is returned. On failure the
    /// hops opened so far are closed and the first error is returned.
    pub async fn dial(&self) -> TransportResult<Arc<dyn TransportHandle>> {
        let mut current: Option<Arc<dyn TransportHandle>> = None;
        let mut dialed: Vec<&str> = Vec::with_capacity(self.hops.len());

        for hop in self.hops.iter() {
            match self.dial_hop(hop, current.as_ref()).await {
                Ok(handle) => {
                    dialed.push(hop.address());
                    self.record(hop.address());
                    info!(chain = %dialed.join(" -> "), "SSH dial [{}] success", dialed.join(" -> "));
                    current = Some(handle);
                }
                Err(e) => {
                    debug!(hop = %hop.address(), "Chain dial failed: {}", e);
                    if let Some(partial) = current.take() {
                        partial.close().await;
                    }
                    return Err(e);
                }
            }
        }

        current.ok_or_else(|| TransportError::Dial {
            address: String::new(),
            reason: "empty dial chain".to_string(),
        })
    }

    async fn dial_hop(
        &self,
        hop: &HopConfig,
        prev: Option<&Arc<dyn TransportHandle>>,
    ) -> TransportResult<Arc<dyn TransportHandle>> {
        match prev {
            None => self.dialer.connect(hop, None).await,
            Some(prev) => {
                let stream = prev.open_channel(hop.address()).await?;
                let carrier = Carrier {
                    stream,
                    handle: prev.clone(),
                };
                self.dialer.connect(hop, Some(carrier)).await
            }
        }
    }

    fn record(&self, address: &str) {
        self.log
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push(address.to_string());
    }

    /// Addresses appended by every successful hop dial so far
    pub fn dial_chain_log(&self) -> Vec<String> {
        self.log.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }
}
