//! In-process loopback transport
//!
//! Every "remote host" is the local machine: channels to ordinary addresses are
//! plain TCP connections, remote listeners are local `TcpListener`s. Hop
//! addresses are virtual hosts registered on the [`LoopbackDialer`]; a channel
//! to one of them is an in-memory pipe whose far end echoes, which the dialer
//! uses to push a handshake greeting through the carrier when dialing a jump
//! chain.
//!
//! Closing a handle severs every stream and listener it handed out, the way a
//! dead SSH session takes its channels with it. The dialer records every
//! attempt and can be scripted to fail, which makes the reconnection logic
//! testable without a network.

use crate::error::{AcceptError, TransportError, TransportResult};
use crate::hop::HopConfig;
use crate::{BoxedStream, Carrier, HopDialer, RemoteListener, TransportHandle};
use async_trait::async_trait;
use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tracing::debug;

const GREETING: &[u8] = b"SSH-2.0-loopback\r\n";
const PIPE_CAPACITY: usize = 64 * 1024;

/// A successful dial as seen by the dialer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DialRecord {
    pub id: u64,
    pub address: String,
    pub user: String,
    /// Peer of the carrier session, `None` for a direct dial
    pub via: Option<String>,
}

#[derive(Default)]
struct DialerInner {
    next_id: AtomicU64,
    attempts: AtomicUsize,
    hosts: Mutex<HashSet<String>>,
    failures: Mutex<VecDeque<TransportError>>,
    dials: Mutex<Vec<DialRecord>>,
    handles: Mutex<Vec<Arc<LoopbackHandle>>>,
}

/// Scriptable dialer for the loopback transport
#[derive(Clone, Default)]
pub struct LoopbackDialer {
    inner: Arc<DialerInner>,
}

impl LoopbackDialer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a dialer that knows the given virtual hosts (`host:port`)
    pub fn with_hosts<I, S>(hosts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let dialer = Self::new();
        for host in hosts {
            dialer.add_host(host);
        }
        dialer
    }

    pub fn add_host(&self, host: impl Into<String>) {
        lock(&self.inner.hosts).insert(host.into());
    }

    /// Make the next `n` dials fail with a handshake error
    pub fn fail_next(&self, n: usize) {
        let mut failures = lock(&self.inner.failures);
        for _ in 0..n {
            failures.push_back(TransportError::Handshake {
                address: "loopback".to_string(),
                reason: "scripted failure".to_string(),
            });
        }
    }

    /// Make the next dial fail with `err`
    pub fn push_failure(&self, err: TransportError) {
        lock(&self.inner.failures).push_back(err);
    }

    /// Number of `connect` calls, failed ones included
    pub fn attempts(&self) -> usize {
        self.inner.attempts.load(Ordering::SeqCst)
    }

    pub fn dials(&self) -> Vec<DialRecord> {
        lock(&self.inner.dials).clone()
    }

    /// Every handle produced so far, oldest first
    pub fn handles(&self) -> Vec<Arc<LoopbackHandle>> {
        lock(&self.inner.handles).clone()
    }

    pub fn last_handle(&self) -> Option<Arc<LoopbackHandle>> {
        lock(&self.inner.handles).last().cloned()
    }

    fn is_host(&self, address: &str) -> bool {
        lock(&self.inner.hosts).contains(address)
    }
}

#[async_trait]
impl HopDialer for LoopbackDialer {
    async fn connect(
        &self,
        hop: &HopConfig,
        via: Option<Carrier>,
    ) -> TransportResult<Arc<dyn TransportHandle>> {
        self.inner.attempts.fetch_add(1, Ordering::SeqCst);

        let scripted = lock(&self.inner.failures).pop_front();
        if let Some(err) = scripted {
            return Err(err);
        }

        let address = hop.address().to_string();
        if via.is_none() && !self.is_host(&address) {
            return Err(TransportError::Dial {
                address,
                reason: "unknown loopback host".to_string(),
            });
        }

        let carrier = match via {
            Some(mut carrier) => {
                handshake(&mut carrier.stream, &address).await?;
                Some(carrier)
            }
            None => None,
        };

        let id = self.inner.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let record = DialRecord {
            id,
            address: address.clone(),
            user: hop.user().to_string(),
            via: carrier.as_ref().map(|c| c.handle.peer().to_string()),
        };

        let handle = Arc::new(LoopbackHandle {
            id,
            peer: address,
            dialer: self.clone(),
            carrier: tokio::sync::Mutex::new(carrier),
            shutdown: CancellationToken::new(),
            fail_keepalive: AtomicBool::new(false),
            stall_keepalive: AtomicBool::new(false),
            reject_listens: AtomicBool::new(false),
            keepalives: AtomicU64::new(0),
            channels: Mutex::new(Vec::new()),
        });

        debug!(id, peer = %record.address, via = ?record.via, "Loopback dial");
        lock(&self.inner.dials).push(record);
        lock(&self.inner.handles).push(handle.clone());

        Ok(handle)
    }
}

async fn handshake(stream: &mut BoxedStream, address: &str) -> TransportResult<()> {
    let failed = |reason: String| TransportError::Handshake {
        address: address.to_string(),
        reason,
    };

    stream
        .write_all(GREETING)
        .await
        .map_err(|e| failed(e.to_string()))?;

    let mut reply = [0u8; GREETING.len()];
    stream
        .read_exact(&mut reply)
        .await
        .map_err(|e| failed(e.to_string()))?;

    if reply != GREETING {
        return Err(failed("unexpected greeting".to_string()));
    }
    Ok(())
}

/// A loopback session
pub struct LoopbackHandle {
    id: u64,
    peer: String,
    dialer: LoopbackDialer,
    carrier: tokio::sync::Mutex<Option<Carrier>>,
    shutdown: CancellationToken,
    fail_keepalive: AtomicBool,
    stall_keepalive: AtomicBool,
    reject_listens: AtomicBool,
    keepalives: AtomicU64,
    channels: Mutex<Vec<String>>,
}

impl LoopbackHandle {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Make every following keepalive fail, as if the peer went silent
    pub fn fail_keepalives(&self) {
        self.fail_keepalive.store(true, Ordering::SeqCst);
    }

    /// Make every following keepalive hang until the session is closed, as
    /// if the reply were stuck behind a blocked request
    pub fn stall_keepalives(&self) {
        self.stall_keepalive.store(true, Ordering::SeqCst);
    }

    pub fn reject_listens(&self, reject: bool) {
        self.reject_listens.store(reject, Ordering::SeqCst);
    }

    /// Successful keepalive probes answered so far
    pub fn keepalive_count(&self) -> u64 {
        self.keepalives.load(Ordering::SeqCst)
    }

    /// Addresses of every channel opened through this session
    pub fn channels(&self) -> Vec<String> {
        lock(&self.channels).clone()
    }
}

#[async_trait]
impl TransportHandle for LoopbackHandle {
    fn peer(&self) -> &str {
        &self.peer
    }

    async fn open_channel(&self, address: &str) -> TransportResult<BoxedStream> {
        if self.is_closed() {
            return Err(TransportError::Closed);
        }
        lock(&self.channels).push(address.to_string());

        if self.dialer.is_host(address) {
            let (ours, theirs) = tokio::io::duplex(PIPE_CAPACITY);
            let shutdown = self.shutdown.clone();
            tokio::spawn(async move {
                let (mut read, mut write) = tokio::io::split(theirs);
                tokio::select! {
                    _ = shutdown.cancelled() => {}
                    _ = tokio::io::copy(&mut read, &mut write) => {}
                }
            });
            return Ok(Box::new(ours));
        }

        let stream = TcpStream::connect(address)
            .await
            .map_err(|e| TransportError::Channel {
                address: address.to_string(),
                reason: e.to_string(),
            })?;
        Ok(sever_on_close(stream, self.shutdown.clone()))
    }

    async fn listen(&self, address: &str) -> TransportResult<Box<dyn RemoteListener>> {
        if self.is_closed() {
            return Err(TransportError::Closed);
        }
        if self.reject_listens.load(Ordering::SeqCst) {
            return Err(TransportError::Listen {
                address: address.to_string(),
                reason: "rejected by peer".to_string(),
            });
        }

        let listener = TcpListener::bind(address)
            .await
            .map_err(|e| TransportError::Listen {
                address: address.to_string(),
                reason: e.to_string(),
            })?;
        let bound = listener.local_addr()?.to_string();

        Ok(Box::new(LoopbackListener {
            address: bound,
            listener: Some(listener),
            shutdown: self.shutdown.clone(),
        }))
    }

    async fn send_keepalive(&self) -> TransportResult<()> {
        if self.is_closed() {
            return Err(TransportError::Closed);
        }
        if self.fail_keepalive.load(Ordering::SeqCst) {
            return Err(TransportError::Keepalive("no reply".to_string()));
        }
        if self.stall_keepalive.load(Ordering::SeqCst) {
            self.shutdown.cancelled().await;
            return Err(TransportError::Closed);
        }
        self.keepalives.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn close(&self) {
        if self.shutdown.is_cancelled() {
            return;
        }
        self.shutdown.cancel();

        let carrier = self.carrier.lock().await.take();
        if let Some(carrier) = carrier {
            drop(carrier.stream);
            carrier.handle.close().await;
        }
    }

    fn is_closed(&self) -> bool {
        self.shutdown.is_cancelled()
    }
}

/// A local `TcpListener` standing in for a remote one
pub struct LoopbackListener {
    address: String,
    listener: Option<TcpListener>,
    shutdown: CancellationToken,
}

#[async_trait]
impl RemoteListener for LoopbackListener {
    fn address(&self) -> &str {
        &self.address
    }

    async fn accept(&mut self) -> Result<(BoxedStream, String), AcceptError> {
        let listener = self.listener.as_ref().ok_or(AcceptError::Closed)?;

        tokio::select! {
            _ = self.shutdown.cancelled() => Err(AcceptError::Closed),
            accepted = listener.accept() => {
                let (stream, peer) = accepted?;
                Ok((sever_on_close(stream, self.shutdown.clone()), peer.to_string()))
            }
        }
    }

    async fn close(&mut self) {
        self.listener = None;
    }
}

/// Wrap `io` so that cancelling `shutdown` cuts it off from its user.
fn sever_on_close<S>(io: S, shutdown: CancellationToken) -> BoxedStream
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (ours, mut theirs) = tokio::io::duplex(PIPE_CAPACITY);
    tokio::spawn(async move {
        let mut io = io;
        tokio::select! {
            _ = shutdown.cancelled() => {}
            _ = tokio::io::copy_bidirectional(&mut theirs, &mut io) => {}
        }
    });
    Box::new(ours)
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
