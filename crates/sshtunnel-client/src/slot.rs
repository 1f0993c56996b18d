//! The current-transport cell

use sshtunnel_transport::TransportHandle;
use std::sync::Arc;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

type Current = Option<Arc<dyn TransportHandle>>;

/// Holds the one transport handle that is current for a tunnel.
///
/// Readers get a cloned `Arc` snapshot; writers replace the whole value in a
/// single `watch` send, so a handle is either fully installed or absent.
#[derive(Clone)]
pub struct TransportSlot {
    current: Arc<watch::Sender<Current>>,
}

impl Default for TransportSlot {
    fn default() -> Self {
        Self::new()
    }
}

impl TransportSlot {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(None);
        Self {
            current: Arc::new(tx),
        }
    }

    pub fn snapshot(&self) -> Option<Arc<dyn TransportHandle>> {
        self.current.borrow().clone()
    }

    /// Snapshot, skipping a handle that is already known to be dead
    pub fn usable(&self) -> Option<Arc<dyn TransportHandle>> {
        self.snapshot().filter(|handle| !handle.is_closed())
    }

    /// Install `handle` as current and return the one it replaced.
    pub fn install(&self, handle: Arc<dyn TransportHandle>) -> Option<Arc<dyn TransportHandle>> {
        self.current.send_replace(Some(handle))
    }

    /// Mark the transport absent and return what was current.
    pub fn take(&self) -> Option<Arc<dyn TransportHandle>> {
        self.current.send_replace(None)
    }

    pub fn is_present(&self) -> bool {
        self.current.borrow().is_some()
    }

    /// Wait until a live handle is current, or `None` once `cancel` fires.
    pub async fn wait_present(&self, cancel: &CancellationToken) -> Option<Arc<dyn TransportHandle>> {
        let mut rx = self.current.subscribe();
        let present = async move {
            rx.wait_for(|current| current.as_ref().is_some_and(|h| !h.is_closed()))
                .await
                .ok()
                .and_then(|current| current.clone())
        };

        tokio::select! {
            _ = cancel.cancelled() => None,
            handle = present => handle,
        }
    }
}
