//! Relay bookkeeping on top of a shared tunnel

use crate::error::ControlError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sshtunnel_client::{Tunnel, TunnelStatus};
use sshtunnel_transport::normalize_bind_addr;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::info;
use uuid::Uuid;

/// Addresses of a relay to start
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartRequest {
    pub local: String,
    pub remote: String,
}

impl StartRequest {
    pub fn new(local: impl Into<String>, remote: impl Into<String>) -> Self {
        Self {
            local: local.into(),
            remote: remote.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartResponse {
    pub id: Uuid,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelayKind {
    Forward,
    Reverse,
}

impl fmt::Display for RelayKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RelayKind::Forward => write!(f, "forward"),
            RelayKind::Reverse => write!(f, "reverse"),
        }
    }
}

/// A running relay as reported by `list`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayInfo {
    pub id: Uuid,
    pub kind: RelayKind,
    /// Bound address the relay accepts on
    pub listen: String,
    /// Address each accepted connection is relayed to
    pub target: String,
    pub started_at: DateTime<Utc>,
}

impl RelayInfo {
    /// `local -> remote` for forwards, `remote -> local` for reverses
    pub fn description(&self) -> String {
        format!("{} -> {}", self.listen, self.target)
    }
}

struct RelayEntry {
    info: RelayInfo,
    cancel: CancellationToken,
}

/// Starts and tracks relays on one tunnel
pub struct TunnelService {
    tunnel: Arc<Tunnel>,
    relays: RwLock<HashMap<Uuid, RelayEntry>>,
}

impl TunnelService {
    pub fn new(tunnel: Arc<Tunnel>) -> Self {
        Self {
            tunnel,
            relays: RwLock::new(HashMap::new()),
        }
    }

    pub fn tunnel(&self) -> &Arc<Tunnel> {
        &self.tunnel
    }

    /// Start a forward relay: connections to `local` go to `remote`.
    pub async fn start_forward(&self, request: StartRequest) -> Result<StartResponse, ControlError> {
        let local = normalize_bind_addr(&request.local);
        let remote = normalize_bind_addr(&request.remote);

        let cancel = CancellationToken::new();
        let bound = self.tunnel.forward(&cancel, &local, &remote).await?;

        Ok(self
            .register(RelayKind::Forward, bound.to_string(), remote, cancel)
            .await)
    }

    /// Start a reverse relay: connections to `remote` go to `local`.
    pub async fn start_reverse(&self, request: StartRequest) -> Result<StartResponse, ControlError> {
        let local = normalize_bind_addr(&request.local);
        let remote = normalize_bind_addr(&request.remote);

        let cancel = CancellationToken::new();
        let bound = self.tunnel.reverse(&cancel, &remote, &local).await?;

        Ok(self.register(RelayKind::Reverse, bound, local, cancel).await)
    }

    async fn register(
        &self,
        kind: RelayKind,
        listen: String,
        target: String,
        cancel: CancellationToken,
    ) -> StartResponse {
        let info = RelayInfo {
            id: Uuid::new_v4(),
            kind,
            listen,
            target,
            started_at: Utc::now(),
        };
        let id = info.id;
        info!(id = %id, kind = %kind, tunnel = %info.description(), "Relay started");

        self.relays
            .write()
            .await
            .insert(id, RelayEntry { info, cancel });
        StartResponse { id }
    }

    /// Running relays, sorted by id
    pub async fn list(&self) -> Vec<RelayInfo> {
        let mut relays: Vec<RelayInfo> = self
            .relays
            .read()
            .await
            .values()
            .map(|entry| entry.info.clone())
            .collect();
        relays.sort_by_key(|info| info.id);
        relays
    }

    /// Stop admitting connections on one relay. Connections already being
    /// relayed run to completion.
    pub async fn stop(&self, id: Uuid) -> Result<RelayInfo, ControlError> {
        let entry = self
            .relays
            .write()
            .await
            .remove(&id)
            .ok_or(ControlError::NotFound(id))?;
        entry.cancel.cancel();
        info!(id = %id, tunnel = %entry.info.description(), "Relay stopped");
        Ok(entry.info)
    }

    /// Stop every relay
    pub async fn stop_all(&self) {
        let drained: Vec<RelayEntry> = self.relays.write().await.drain().map(|(_, e)| e).collect();
        for entry in drained {
            entry.cancel.cancel();
        }
    }

    pub fn status(&self) -> TunnelStatus {
        self.tunnel.status()
    }
}
