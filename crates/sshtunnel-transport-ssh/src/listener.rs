//! Remote listeners backed by `tcpip-forward`

use crate::handle::SharedSession;
use crate::handler::{ForwardRegistry, Incoming};
use async_trait::async_trait;
use sshtunnel_transport::{AcceptError, BoxedStream, RemoteListener, TransportError, TransportResult};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::debug;

pub struct SshListener {
    session: SharedSession,
    forwards: ForwardRegistry,
    ended: CancellationToken,
    host: String,
    port: u32,
    address: String,
    request_timeout: Duration,
    incoming: mpsc::UnboundedReceiver<Incoming>,
    closed: bool,
}

impl SshListener {
    pub(crate) async fn open(
        session: SharedSession,
        forwards: ForwardRegistry,
        ended: CancellationToken,
        host: String,
        port: u16,
        request_timeout: Duration,
    ) -> TransportResult<Self> {
        let requested = u32::from(port);
        let failed = |reason: String| TransportError::Listen {
            address: join(&host, requested),
            reason,
        };

        // A fixed port can be registered up front so no early channel is lost.
        let early = (requested != 0).then(|| forwards.register(requested));

        let assigned = match session.exclusive(request_timeout).await {
            Some(mut exclusive) => {
                let request = exclusive.tcpip_forward(host.clone(), requested);
                match time::timeout(request_timeout, request).await {
                    Ok(Ok(assigned)) => Ok(assigned),
                    Ok(Err(e)) => Err(e.to_string()),
                    Err(_) => Err(format!("no reply within {:?}", request_timeout)),
                }
            }
            None => Err(format!("session busy for {:?}", request_timeout)),
        };

        let assigned = match assigned {
            Ok(assigned) => assigned,
            Err(reason) => {
                if requested != 0 {
                    forwards.unregister(requested);
                }
                return Err(failed(reason));
            }
        };

        let (port, incoming) = match early {
            Some(incoming) => (requested, incoming),
            None if assigned != 0 => (assigned, forwards.register(assigned)),
            None => return Err(failed("server assigned no port".to_string())),
        };

        let address = join(&host, port);
        debug!(address = %address, "Remote listener bound");

        Ok(Self {
            session,
            forwards,
            ended,
            host,
            port,
            address,
            request_timeout,
            incoming,
            closed: false,
        })
    }
}

fn join(host: &str, port: u32) -> String {
    if host.contains(':') {
        format!("[{}]:{}", host, port)
    } else {
        format!("{}:{}", host, port)
    }
}

#[async_trait]
impl RemoteListener for SshListener {
    fn address(&self) -> &str {
        &self.address
    }

    async fn accept(&mut self) -> Result<(BoxedStream, String), AcceptError> {
        if self.closed {
            return Err(AcceptError::Closed);
        }
        tokio::select! {
            _ = self.ended.cancelled() => Err(AcceptError::Closed),
            incoming = self.incoming.recv() => match incoming {
                Some((channel, originator)) => Ok((Box::new(channel.into_stream()), originator)),
                None => Err(AcceptError::Closed),
            },
        }
    }

    async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.forwards.unregister(self.port);
        self.incoming.close();

        if self.ended.is_cancelled() {
            return;
        }
        let session = self.session.shared().await;
        let result = time::timeout(
            self.request_timeout,
            session.cancel_tcpip_forward(self.host.clone(), self.port),
        )
        .await;
        match result {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                debug!(address = %self.address, "Failed to cancel remote forward: {}", e)
            }
            Err(_) => debug!(address = %self.address, "Remote forward cancel went unanswered"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_join_brackets_ipv6() {
        assert_eq!(join("0.0.0.0", 8080), "0.0.0.0:8080");
        assert_eq!(join("::", 22), "[::]:22");
    }
}
