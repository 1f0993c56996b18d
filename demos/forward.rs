//! Forward tunnel example
//!
//! Dials one SSH host and relays `localhost:28080` to port 80 on the far side
//! until Ctrl+C.
//!
//! Usage:
//!   cargo run --example forward -- \
//!     --host 10.11.43.115 \
//!     --user deploy \
//!     --identity ~/.ssh/id_rsa

use sshtunnel_client::{HopConfig, Tunnel, TunnelOptions};
use sshtunnel_transport_ssh::SshDialer;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;

fn arg(args: &[String], name: &str) -> Option<String> {
    args.iter()
        .position(|a| a == name)
        .and_then(|i| args.get(i + 1))
        .cloned()
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let args: Vec<String> = std::env::args().collect();
    let host = arg(&args, "--host").unwrap_or_else(|| "127.0.0.1".to_string());
    let mut hop = HopConfig::new(host);
    if let Some(user) = arg(&args, "--user") {
        hop = hop.with_user(user);
    }
    if let Some(identity) = arg(&args, "--identity") {
        hop = hop.with_identity_file(identity);
    }

    let tunnel = Tunnel::connect(
        vec![hop],
        Arc::new(SshDialer::default()),
        TunnelOptions::default(),
    )
    .await?;

    let local = tunnel
        .forward(&CancellationToken::new(), "localhost:28080", "localhost:80")
        .await?;
    info!("Forwarding {} -> localhost:80", local);

    tokio::signal::ctrl_c().await?;
    tunnel.close().await;
    tunnel.wait().await;
    Ok(())
}
