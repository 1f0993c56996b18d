//! ssh-tunnel - forward and reverse TCP tunnels over a chain of SSH hops

use anyhow::Result;
use clap::Parser;
use sshtunnel_cli::{init_logging, run, Cli};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.debug);
    run(cli).await
}
