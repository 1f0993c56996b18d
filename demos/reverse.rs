//! Reverse tunnel example
//!
//! Reaches an inner host through a bastion, asks it to listen on port 28080,
//! and relays every connection to `localhost:8080` on this machine.
//!
//! Usage:
//!   cargo run --example reverse -- \
//!     --bastion bastion.example.com \
//!     --host 10.0.0.5 \
//!     --user deploy

use sshtunnel_client::{HopConfig, Tunnel, TunnelOptions};
use sshtunnel_transport_ssh::SshDialer;
use std::sync::Arc;
use std::time::Duration;
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
    let user = arg(&args, "--user").unwrap_or_else(|| "root".to_string());

    let mut hops = Vec::new();
    if let Some(bastion) = arg(&args, "--bastion") {
        hops.push(HopConfig::new(bastion).with_user(user.clone()));
    }
    let host = arg(&args, "--host").unwrap_or_else(|| "127.0.0.1".to_string());
    hops.push(HopConfig::new(host).with_user(user));

    let options = TunnelOptions::default().with_keepalive_interval(Duration::from_secs(10));
    let tunnel = Tunnel::connect(hops, Arc::new(SshDialer::default()), options).await?;
    info!("Dial chain: {:?}", tunnel.dial_chain_log());

    let remote = tunnel
        .reverse(&CancellationToken::new(), "0.0.0.0:28080", "localhost:8080")
        .await?;
    info!("Remote {} -> localhost:8080", remote);

    tokio::signal::ctrl_c().await?;
    tunnel.close().await;
    tunnel.wait().await;
    Ok(())
}
