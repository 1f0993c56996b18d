//! Hop dialing: handshake and public-key authentication

use crate::config::SshClientOptions;
use crate::handle::SshHandle;
use crate::handler::{ClientHandler, ForwardRegistry};
use crate::keys::load_identity;
use async_trait::async_trait;
use russh::client::{self, Handle};
use russh::keys::PrivateKeyWithHashAlg;
use sshtunnel_transport::{
    Carrier, HopConfig, HopDialer, TransportError, TransportHandle, TransportResult,
};
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Dials hops with russh
#[derive(Clone)]
pub struct SshDialer {
    options: SshClientOptions,
    config: Arc<client::Config>,
}

impl SshDialer {
    pub fn new(options: SshClientOptions) -> Self {
        let config = options.russh_config();
        Self { options, config }
    }

    async fn authenticate(
        &self,
        session: &mut Handle<ClientHandler>,
        hop: &HopConfig,
    ) -> TransportResult<()> {
        let identity = hop
            .identity_file()
            .ok_or_else(|| TransportError::Credential {
                path: String::new(),
                reason: "no identity file configured".to_string(),
            })?;
        let key = load_identity(identity)?;

        let handshake_failed = |e: russh::Error| TransportError::Handshake {
            address: hop.address().to_string(),
            reason: e.to_string(),
        };

        let rsa_hash = session
            .best_supported_rsa_hash()
            .await
            .map_err(handshake_failed)?
            .flatten();

        let auth = session
            .authenticate_publickey(hop.user(), PrivateKeyWithHashAlg::new(key, rsa_hash))
            .await
            .map_err(handshake_failed)?;

        if !auth.success() {
            return Err(TransportError::Authentication {
                user: hop.user().to_string(),
                address: hop.address().to_string(),
            });
        }
        Ok(())
    }
}

impl Default for SshDialer {
    fn default() -> Self {
        Self::new(SshClientOptions::default())
    }
}

#[async_trait]
impl HopDialer for SshDialer {
    async fn connect(
        &self,
        hop: &HopConfig,
        via: Option<Carrier>,
    ) -> TransportResult<Arc<dyn TransportHandle>> {
        let address = hop.address().to_string();
        let timeout = self.options.connect_timeout;
        let timed_out = || TransportError::Handshake {
            address: address.clone(),
            reason: format!("no response within {:?}", timeout),
        };

        let forwards = ForwardRegistry::default();
        let ended = CancellationToken::new();
        let handler = ClientHandler::new(address.clone(), forwards.clone(), ended.clone());

        let (mut session, carrier) = match via {
            None => {
                let session = time::timeout(timeout, async {
                    let stream = TcpStream::connect(address.as_str()).await.map_err(|e| {
                        TransportError::Dial {
                            address: address.clone(),
                            reason: e.to_string(),
                        }
                    })?;
                    if let Err(e) = stream.set_nodelay(self.options.nodelay) {
                        debug!(peer = %address, "Failed to set TCP_NODELAY: {}", e);
                    }
                    client::connect_stream(self.config.clone(), stream, handler)
                        .await
                        .map_err(|e| TransportError::Handshake {
                            address: address.clone(),
                            reason: e.to_string(),
                        })
                })
                .await
                .map_err(|_| timed_out())??;
                (session, None)
            }
            Some(Carrier { stream, handle }) => {
                debug!(peer = %address, via = %handle.peer(), "Handshake through carrier");
                let session = time::timeout(
                    timeout,
                    client::connect_stream(self.config.clone(), stream, handler),
                )
                .await
                .map_err(|_| timed_out())?
                .map_err(|e| TransportError::Handshake {
                    address: address.clone(),
                    reason: e.to_string(),
                })?;
                (session, Some(handle))
            }
        };

        time::timeout(timeout, self.authenticate(&mut session, hop))
            .await
            .map_err(|_| timed_out())??;

        debug!(peer = %address, user = %hop.user(), "SSH session authenticated");

        Ok(Arc::new(SshHandle::new(
            address,
            session,
            forwards,
            ended,
            carrier,
            self.options.request_timeout,
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::net::TcpListener;

    fn hop(address: &str) -> HopConfig {
        HopConfig::new(address)
            .with_user("tester")
            .with_identity_file("/nonexistent/id_rsa")
    }

    #[tokio::test]
    async fn test_refused_connection_is_dial_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();
        drop(listener);

        let dialer = SshDialer::default();
        let err = dialer.connect(&hop(&address), None).await.err().unwrap();
        assert!(matches!(err, TransportError::Dial { .. }), "got {err}");
    }

    #[tokio::test]
    async fn test_silent_server_times_out() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();
        let _hold = tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(30)).await;
            drop(socket);
        });

        let dialer = SshDialer::new(
            SshClientOptions::default().with_connect_timeout(Duration::from_millis(200)),
        );
        let err = dialer.connect(&hop(&address), None).await.err().unwrap();
        assert!(matches!(err, TransportError::Handshake { .. }), "got {err}");
    }

    #[tokio::test]
    async fn test_non_ssh_peer_is_handshake_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();
        let _serve = tokio::spawn(async move {
            use tokio::io::AsyncWriteExt;
            let (mut socket, _) = listener.accept().await.unwrap();
            let _ = socket.write_all(b"HTTP/1.1 400 Bad Request\r\n\r\n").await;
        });

        let dialer = SshDialer::new(
            SshClientOptions::default().with_connect_timeout(Duration::from_secs(2)),
        );
        let err = dialer.connect(&hop(&address), None).await.err().unwrap();
        assert!(matches!(err, TransportError::Handshake { .. }), "got {err}");
    }
}
