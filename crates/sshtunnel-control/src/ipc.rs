//! Control socket: newline-delimited JSON over local TCP
//!
//! One request per line, one response per line. A connection may carry any
//! number of requests.

use crate::error::ControlError;
use crate::service::{RelayInfo, StartRequest, TunnelService};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use sshtunnel_client::TunnelStatus;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Longest request or response line accepted, newline included
pub const MAX_LINE_BYTES: usize = 64 * 1024;

/// Request from a CLI to a running instance
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlRequest {
    StartForward { local: String, remote: String },
    StartReverse { local: String, remote: String },
    List,
    Stop { id: Uuid },
    Status,
    Ping,
}

/// Response from a running instance
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlResponse {
    Started { id: Uuid },
    Relays { relays: Vec<RelayInfo> },
    Status { status: TunnelStatus },
    Ok { message: Option<String> },
    Error { message: String },
    Pong,
}

/// Answer one request against `service`.
pub async fn dispatch(service: &TunnelService, request: ControlRequest) -> ControlResponse {
    let result = match request {
        ControlRequest::StartForward { local, remote } => service
            .start_forward(StartRequest { local, remote })
            .await
            .map(|started| ControlResponse::Started { id: started.id }),
        ControlRequest::StartReverse { local, remote } => service
            .start_reverse(StartRequest { local, remote })
            .await
            .map(|started| ControlResponse::Started { id: started.id }),
        ControlRequest::List => Ok(ControlResponse::Relays {
            relays: service.list().await,
        }),
        ControlRequest::Stop { id } => service.stop(id).await.map(|info| ControlResponse::Ok {
            message: Some(format!("stopped {}", info.description())),
        }),
        ControlRequest::Status => Ok(ControlResponse::Status {
            status: service.status(),
        }),
        ControlRequest::Ping => Ok(ControlResponse::Pong),
    };

    result.unwrap_or_else(|e| ControlResponse::Error {
        message: e.to_string(),
    })
}

/// Serves a [`TunnelService`] on a local TCP socket
pub struct ControlServer {
    listener: TcpListener,
    service: Arc<TunnelService>,
}

impl ControlServer {
    pub async fn bind(addr: &str, service: Arc<TunnelService>) -> Result<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("Failed to bind control socket at {}", addr))?;
        Ok(Self { listener, service })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept control connections until `cancel` fires.
    pub async fn serve(self, cancel: CancellationToken) {
        if let Ok(addr) = self.listener.local_addr() {
            info!(addr = %addr, "Control socket listening");
        }
        loop {
            let accepted = tokio::select! {
                _ = cancel.cancelled() => break,
                accepted = self.listener.accept() => accepted,
            };

            match accepted {
                Ok((stream, peer)) => {
                    let service = self.service.clone();
                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(stream, service).await {
                            debug!(peer = %peer, "Control connection ended: {:#}", e);
                        }
                    });
                }
                Err(e) => warn!("Failed to accept control connection: {}", e),
            }
        }
        debug!("Control socket stopped");
    }
}

enum LineRead {
    Eof,
    Line,
    TooLong,
}

/// Read one line into `line`, giving up once [`MAX_LINE_BYTES`] pass with
/// no newline.
async fn read_line_bounded<R>(reader: &mut R, line: &mut Vec<u8>) -> std::io::Result<LineRead>
where
    R: AsyncBufRead + Unpin,
{
    line.clear();
    let n = (&mut *reader)
        .take(MAX_LINE_BYTES as u64)
        .read_until(b'\n', line)
        .await?;
    Ok(match n {
        0 => LineRead::Eof,
        n if n >= MAX_LINE_BYTES && line.last() != Some(&b'\n') => LineRead::TooLong,
        _ => LineRead::Line,
    })
}

async fn write_line<T: Serialize>(stream: &mut TcpStream, message: &T) -> Result<()> {
    let mut json = serde_json::to_vec(message)?;
    json.push(b'\n');
    stream.write_all(&json).await?;
    stream.flush().await?;
    Ok(())
}

async fn handle_connection(stream: TcpStream, service: Arc<TunnelService>) -> Result<()> {
    let mut stream = BufReader::new(stream);
    let mut line = Vec::new();

    loop {
        let read = read_line_bounded(&mut stream, &mut line)
            .await
            .context("Failed to read request")?;
        match read {
            LineRead::Eof => return Ok(()),
            LineRead::TooLong => {
                warn!("Control request over {} bytes, closing connection", MAX_LINE_BYTES);
                let response = ControlResponse::Error {
                    message: ControlError::Protocol(format!(
                        "request exceeds {} bytes",
                        MAX_LINE_BYTES
                    ))
                    .to_string(),
                };
                return write_line(stream.get_mut(), &response)
                    .await
                    .context("Failed to send response");
            }
            LineRead::Line => {}
        }

        let response = match serde_json::from_slice::<ControlRequest>(&line) {
            Ok(request) => {
                debug!(request = ?request, "Control request");
                dispatch(&service, request).await
            }
            Err(e) => ControlResponse::Error {
                message: ControlError::Protocol(e.to_string()).to_string(),
            },
        };

        write_line(stream.get_mut(), &response)
            .await
            .context("Failed to send response")?;
    }
}

/// Client side of the control socket
pub struct ControlClient {
    stream: BufReader<TcpStream>,
}

impl ControlClient {
    pub async fn connect(addr: &str) -> Result<Self> {
        let stream = TcpStream::connect(addr)
            .await
            .with_context(|| format!("Failed to connect to control socket at {}", addr))?;
        Ok(Self {
            stream: BufReader::new(stream),
        })
    }

    /// Send a request and receive a response
    pub async fn request(&mut self, request: &ControlRequest) -> Result<ControlResponse> {
        write_line(self.stream.get_mut(), request)
            .await
            .context("Failed to send request")?;

        let mut response_line = Vec::new();
        let read = read_line_bounded(&mut self.stream, &mut response_line)
            .await
            .context("Failed to read response")?;
        match read {
            LineRead::Eof => {
                return Err(ControlError::Protocol("connection closed".to_string()).into())
            }
            LineRead::TooLong => {
                return Err(ControlError::Protocol(format!(
                    "response exceeds {} bytes",
                    MAX_LINE_BYTES
                ))
                .into())
            }
            LineRead::Line => {}
        }

        let response: ControlResponse =
            serde_json::from_slice(&response_line).context("Failed to parse response")?;
        Ok(response)
    }

    pub async fn list(&mut self) -> Result<Vec<RelayInfo>> {
        match self.request(&ControlRequest::List).await? {
            ControlResponse::Relays { relays } => Ok(relays),
            other => Err(unexpected(other)),
        }
    }

    pub async fn stop(&mut self, id: Uuid) -> Result<Option<String>> {
        match self.request(&ControlRequest::Stop { id }).await? {
            ControlResponse::Ok { message } => Ok(message),
            other => Err(unexpected(other)),
        }
    }

    pub async fn status(&mut self) -> Result<TunnelStatus> {
        match self.request(&ControlRequest::Status).await? {
            ControlResponse::Status { status } => Ok(status),
            other => Err(unexpected(other)),
        }
    }

    pub async fn ping(&mut self) -> Result<()> {
        match self.request(&ControlRequest::Ping).await? {
            ControlResponse::Pong => Ok(()),
            other => Err(unexpected(other)),
        }
    }
}

fn unexpected(response: ControlResponse) -> anyhow::Error {
    match response {
        ControlResponse::Error { message } => anyhow::anyhow!(message),
        other => ControlError::Protocol(format!("unexpected response: {:?}", other)).into(),
    }
}
