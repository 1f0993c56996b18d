//! Command-line arguments

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use uuid::Uuid;

/// A simple SSH tunneling tool
#[derive(Parser, Debug)]
#[command(name = "ssh-tunnel")]
#[command(about = "Forward and reverse TCP tunnels over a chain of SSH hops", long_about = None)]
#[command(version = env!("GIT_TAG"))]
#[command(long_version = concat!(env!("GIT_TAG"), "\nCommit: ", env!("GIT_HASH"), "\nBuilt: ", env!("BUILD_TIME")))]
pub struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub debug: bool,

    /// Connection profile file (default: ~/.ssh-tunnel.yaml)
    #[arg(long, global = true, env = "SSH_TUNNEL_CONFIG")]
    pub config: Option<PathBuf>,

    /// Environment name used to pick the connection profile
    #[arg(long, global = true, env = "SSH_TUNNEL_ENV", default_value = "")]
    pub env: String,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Commands {
    /// Proxy a locally accessible address to a remote address
    Forward {
        /// Local address to listen on (`:port` listens on all interfaces)
        #[arg(short, long)]
        local: String,
        /// Remote address dialed through the last hop
        #[arg(short, long)]
        remote: String,
        /// Serve the control socket on 127.0.0.1:<PORT>
        #[arg(long)]
        port: Option<u16>,
    },
    /// Proxy a remote address to a local address
    Reverse {
        /// Address the last hop listens on
        #[arg(short, long)]
        remote: String,
        /// Local address each remote connection is relayed to
        #[arg(short, long)]
        local: String,
        /// Serve the control socket on 127.0.0.1:<PORT>
        #[arg(long)]
        port: Option<u16>,
    },
    /// List the relays of a running instance
    List {
        /// Control port of the running instance
        #[arg(long)]
        port: u16,
    },
    /// Stop one relay of a running instance
    Stop {
        /// Control port of the running instance
        #[arg(long)]
        port: u16,
        /// Relay id, as shown by `list`
        id: Uuid,
    },
}

/// Control socket address for `port`
pub fn control_addr(port: u16) -> String {
    format!("127.0.0.1:{}", port)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_forward() {
        let cli = Cli::try_parse_from([
            "ssh-tunnel", "-d", "--env", "prod", "forward", "-l", ":8080", "-r", "10.0.0.5:80",
        ])
        .unwrap();
        assert!(cli.debug);
        assert_eq!(cli.env, "prod");
        assert_eq!(
            cli.command,
            Commands::Forward {
                local: ":8080".to_string(),
                remote: "10.0.0.5:80".to_string(),
                port: None,
            }
        );
    }

    #[test]
    fn test_parse_reverse_with_control_port() {
        let cli = Cli::try_parse_from([
            "ssh-tunnel", "reverse", "-r", ":9000", "-l", "127.0.0.1:3000", "--port", "7070",
        ])
        .unwrap();
        assert_eq!(
            cli.command,
            Commands::Reverse {
                remote: ":9000".to_string(),
                local: "127.0.0.1:3000".to_string(),
                port: Some(7070),
            }
        );
    }

    #[test]
    fn test_forward_requires_both_addresses() {
        assert!(Cli::try_parse_from(["ssh-tunnel", "forward", "-l", ":8080"]).is_err());
    }

    #[test]
    fn test_stop_parses_uuid() {
        let cli = Cli::try_parse_from([
            "ssh-tunnel",
            "stop",
            "--port",
            "7070",
            "00000000-0000-0000-0000-000000000007",
        ])
        .unwrap();
        assert_eq!(
            cli.command,
            Commands::Stop {
                port: 7070,
                id: Uuid::from_u128(7),
            }
        );
        assert!(Cli::try_parse_from(["ssh-tunnel", "stop", "--port", "7070", "nope"]).is_err());
    }
}
