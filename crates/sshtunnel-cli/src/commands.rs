//! Command implementations

use crate::cli::{control_addr, Cli, Commands};
use crate::profile::{default_config_path, ProfileFile, ResolvedProfile};
use anyhow::{Context, Result};
use sshtunnel_client::{HopDialer, Tunnel};
use sshtunnel_control::{
    format_tunnel_table, ControlClient, ControlServer, RelayKind, StartRequest, TunnelService,
};
use sshtunnel_transport_ssh::SshDialer;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

/// The relay a `forward` or `reverse` command starts
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelaySpec {
    pub kind: RelayKind,
    pub local: String,
    pub remote: String,
}

/// A running tunnel with its first relay and optional control socket
pub struct Instance {
    service: Arc<TunnelService>,
    control: Option<(SocketAddr, JoinHandle<()>)>,
    shutdown: CancellationToken,
}

impl Instance {
    /// Dial the profile's chain, start `relay`, and serve the control socket
    /// on `control` when given.
    pub async fn start(
        dialer: Arc<dyn HopDialer>,
        profile: ResolvedProfile,
        relay: RelaySpec,
        control: Option<&str>,
    ) -> Result<Self> {
        info!(env = %profile.env_name, hops = profile.hops.len(), "Connecting tunnel");
        let tunnel = Tunnel::connect(profile.hops, dialer, profile.options)
            .await
            .context("Failed to connect tunnel")?;
        let service = Arc::new(TunnelService::new(Arc::new(tunnel)));

        let request = StartRequest::new(relay.local, relay.remote);
        let started = match relay.kind {
            RelayKind::Forward => service.start_forward(request).await,
            RelayKind::Reverse => service.start_reverse(request).await,
        };
        if let Err(e) = started {
            service.tunnel().close().await;
            return Err(e).context("Failed to start relay");
        }

        let shutdown = CancellationToken::new();
        let control = match control {
            Some(addr) => {
                let server = match ControlServer::bind(addr, service.clone()).await {
                    Ok(server) => server,
                    Err(e) => {
                        service.tunnel().close().await;
                        return Err(e);
                    }
                };
                let bound = server.local_addr()?;
                let task = tokio::spawn(server.serve(shutdown.clone()));
                Some((bound, task))
            }
            None => None,
        };

        info!("\n{}", format_tunnel_table(&service.list().await));

        Ok(Self {
            service,
            control,
            shutdown,
        })
    }

    pub fn service(&self) -> &Arc<TunnelService> {
        &self.service
    }

    pub fn control_addr(&self) -> Option<SocketAddr> {
        self.control.as_ref().map(|(addr, _)| *addr)
    }

    /// Stop the control socket and every relay, close the tunnel, and wait
    /// for live connections to drain.
    pub async fn shutdown(self) {
        self.shutdown.cancel();
        if let Some((_, task)) = self.control {
            let _ = task.await;
        }
        self.service.stop_all().await;

        let tunnel = self.service.tunnel();
        tunnel.close().await;
        tunnel.wait().await;
        info!("Tunnel closed");
    }
}

/// Run the parsed command line to completion.
pub async fn run(cli: Cli) -> Result<()> {
    match cli.command.clone() {
        Commands::Forward {
            local,
            remote,
            port,
        } => {
            let relay = RelaySpec {
                kind: RelayKind::Forward,
                local,
                remote,
            };
            serve(&cli, relay, port).await
        }
        Commands::Reverse {
            remote,
            local,
            port,
        } => {
            let relay = RelaySpec {
                kind: RelayKind::Reverse,
                local,
                remote,
            };
            serve(&cli, relay, port).await
        }
        Commands::List { port } => {
            println!("{}", list(&control_addr(port)).await?);
            Ok(())
        }
        Commands::Stop { port, id } => {
            println!("{}", stop(&control_addr(port), id).await?);
            Ok(())
        }
    }
}

fn load_profile(cli: &Cli) -> Result<ResolvedProfile> {
    let path = match &cli.config {
        Some(path) => path.clone(),
        None => default_config_path()?,
    };
    ProfileFile::load(&path)?.resolve(&cli.env)
}

async fn serve(cli: &Cli, relay: RelaySpec, port: Option<u16>) -> Result<()> {
    let profile = load_profile(cli)?;
    let control = port.map(control_addr);
    let dialer: Arc<dyn HopDialer> = Arc::new(SshDialer::default());

    let instance = Instance::start(dialer, profile, relay, control.as_deref()).await?;

    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for Ctrl+C: {}", e);
    }
    info!("Shutting down");
    instance.shutdown().await;
    Ok(())
}

/// Fetch the relay table of the instance at `addr`.
pub async fn list(addr: &str) -> Result<String> {
    let mut client = ControlClient::connect(addr).await?;
    let relays = client.list().await?;
    Ok(format_tunnel_table(&relays))
}

/// Stop relay `id` on the instance at `addr`.
pub async fn stop(addr: &str, id: Uuid) -> Result<String> {
    let mut client = ControlClient::connect(addr).await?;
    let message = client.stop(id).await?;
    Ok(message.unwrap_or_else(|| format!("stopped {}", id)))
}
