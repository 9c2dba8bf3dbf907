use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::io::AsyncReadExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tokio_util::codec::{FramedRead, FramedWrite};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use crate::codec::{Multipart, MultipartCodec};
use crate::options::SocketOptions;
use crate::stats::{StatsSnapshot, TransportStats};
use crate::TransportError;

const ACCEPT_RETRY: Duration = Duration::from_millis(50);

struct Peer {
    id: u64,
    addr: SocketAddr,
    tx: mpsc::Sender<Multipart>,
}

type PeerList = Arc<Mutex<Vec<Peer>>>;

/// Live count of peers attached to a bound socket.
#[derive(Clone, Debug, Default)]
pub struct PeerGauge(Arc<AtomicUsize>);

impl PeerGauge {
    pub fn get(&self) -> usize {
        self.0.load(Ordering::Relaxed)
    }

    fn set(&self, value: usize) {
        self.0.store(value, Ordering::Relaxed);
    }
}

async fn bind_listener(addr: &str) -> Result<(TcpListener, SocketAddr), TransportError> {
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|source| TransportError::Bind {
            addr: addr.to_string(),
            source,
        })?;
    let local_addr = listener
        .local_addr()
        .map_err(|source| TransportError::Bind {
            addr: addr.to_string(),
            source,
        })?;
    Ok((listener, local_addr))
}

async fn accept_next(
    listener: &TcpListener,
    shutdown: &CancellationToken,
) -> Option<(TcpStream, SocketAddr)> {
    loop {
        let accepted = tokio::select! {
            _ = shutdown.cancelled() => return None,
            accepted = listener.accept() => accepted,
        };
        match accepted {
            Ok((stream, addr)) => {
                let _ = stream.set_nodelay(true);
                return Some((stream, addr));
            }
            Err(err) => {
                warn!(error = %err, "transport accept failed");
                tokio::time::sleep(ACCEPT_RETRY).await;
            }
        }
    }
}

/// Bound fan-out socket. Every connected peer gets a copy of each message.
pub struct PubSocket {
    local_addr: SocketAddr,
    peers: PeerList,
    gauge: PeerGauge,
    stats: Arc<TransportStats>,
    shutdown: CancellationToken,
    tracker: TaskTracker,
    accept_task: JoinHandle<()>,
    linger: Duration,
}

impl PubSocket {
    pub async fn bind(addr: &str, options: SocketOptions) -> Result<Self, TransportError> {
        let (listener, local_addr) = bind_listener(addr).await?;
        let peers: PeerList = Arc::new(Mutex::new(Vec::new()));
        let gauge = PeerGauge::default();
        let shutdown = CancellationToken::new();
        let tracker = TaskTracker::new();
        let linger = options.linger;

        let accept_task = {
            let peers = peers.clone();
            let gauge = gauge.clone();
            let shutdown = shutdown.clone();
            let tracker = tracker.clone();
            tokio::spawn(async move {
                let mut next_id: u64 = 0;
                while let Some((stream, addr)) = accept_next(&listener, &shutdown).await {
                    next_id = next_id.wrapping_add(1);
                    let (tx, rx) = mpsc::channel(options.queue_len());
                    if let Ok(mut guard) = peers.lock() {
                        guard.push(Peer {
                            id: next_id,
                            addr,
                            tx,
                        });
                        gauge.set(guard.len());
                    }
                    debug!(%addr, "subscriber connected");
                    tracker.spawn(run_peer_writer(
                        stream,
                        rx,
                        MultipartCodec::new(options.max_message_bytes),
                        shutdown.clone(),
                        peers.clone(),
                        gauge.clone(),
                        next_id,
                        addr,
                    ));
                }
            })
        };

        info!(%local_addr, "pub socket bound");
        Ok(Self {
            local_addr,
            peers,
            gauge,
            stats: Arc::new(TransportStats::default()),
            shutdown,
            tracker,
            accept_task,
            linger,
        })
    }

    /// Queues `message` for every peer without waiting.
    ///
    /// Returns the number of peers that accepted it. Stats count peer copies:
    /// each accepted copy is sent, each copy that does not fit a peer queue is
    /// dropped, and a message with no peer connected is one dropped copy.
    pub fn send(&self, message: Multipart) -> usize {
        let Ok(mut peers) = self.peers.lock() else {
            self.stats.record_dropped();
            return 0;
        };
        if peers.is_empty() {
            self.stats.record_dropped();
            return 0;
        }

        let mut delivered = 0;
        peers.retain(|peer| match peer.tx.try_send(message.clone()) {
            Ok(()) => {
                delivered += 1;
                self.stats.record_sent();
                true
            }
            Err(TrySendError::Full(_)) => {
                self.stats.record_dropped();
                true
            }
            Err(TrySendError::Closed(_)) => {
                debug!(addr = %peer.addr, "removing closed subscriber");
                false
            }
        });
        self.gauge.set(peers.len());
        delivered
    }

    pub fn peer_count(&self) -> usize {
        self.gauge.get()
    }

    pub fn peer_gauge(&self) -> PeerGauge {
        self.gauge.clone()
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    pub async fn close(self) {
        self.shutdown.cancel();
        let _ = self.accept_task.await;
        self.tracker.close();
        if tokio::time::timeout(self.linger, self.tracker.wait())
            .await
            .is_err()
        {
            warn!(addr = %self.local_addr, "pub socket peers did not flush before linger elapsed");
        }
    }
}

async fn run_peer_writer(
    stream: TcpStream,
    mut rx: mpsc::Receiver<Multipart>,
    codec: MultipartCodec,
    shutdown: CancellationToken,
    peers: PeerList,
    gauge: PeerGauge,
    id: u64,
    addr: SocketAddr,
) {
    let (mut reader, writer) = stream.into_split();
    let mut framed = FramedWrite::new(writer, codec);
    let mut scratch = [0_u8; 64];

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                while let Ok(message) = rx.try_recv() {
                    if framed.send(message).await.is_err() {
                        break;
                    }
                }
                break;
            }
            read = reader.read(&mut scratch) => {
                match read {
                    Ok(0) | Err(_) => break,
                    Ok(_) => continue,
                }
            }
            message = rx.recv() => {
                let Some(message) = message else {
                    break;
                };
                if let Err(err) = framed.send(message).await {
                    warn!(%addr, error = %err, "subscriber write failed");
                    break;
                }
            }
        }
    }

    if let Ok(mut guard) = peers.lock() {
        guard.retain(|peer| peer.id != id);
        gauge.set(guard.len());
    }
    debug!(%addr, "subscriber disconnected");
}

/// Bound fan-in socket. Messages from every connected producer are merged.
pub struct SinkSocket {
    local_addr: SocketAddr,
    rx: mpsc::Receiver<Multipart>,
    stats: Arc<TransportStats>,
    shutdown: CancellationToken,
    tracker: TaskTracker,
    accept_task: JoinHandle<()>,
}

impl SinkSocket {
    pub async fn bind(addr: &str, options: SocketOptions) -> Result<Self, TransportError> {
        let (listener, local_addr) = bind_listener(addr).await?;
        let (tx, rx) = mpsc::channel(options.queue_len());
        let stats = Arc::new(TransportStats::default());
        let shutdown = CancellationToken::new();
        let tracker = TaskTracker::new();

        let accept_task = {
            let stats = stats.clone();
            let shutdown = shutdown.clone();
            let tracker = tracker.clone();
            tokio::spawn(async move {
                while let Some((stream, addr)) = accept_next(&listener, &shutdown).await {
                    debug!(%addr, "producer connected");
                    tracker.spawn(run_producer_reader(
                        stream,
                        tx.clone(),
                        MultipartCodec::new(options.max_message_bytes),
                        stats.clone(),
                        shutdown.clone(),
                        addr,
                    ));
                }
            })
        };

        info!(%local_addr, "sink socket bound");
        Ok(Self {
            local_addr,
            rx,
            stats,
            shutdown,
            tracker,
            accept_task,
        })
    }

    pub async fn recv(&mut self) -> Option<Multipart> {
        self.rx.recv().await
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    pub async fn close(self) {
        self.shutdown.cancel();
        let _ = self.accept_task.await;
        self.tracker.close();
        self.tracker.wait().await;
    }
}

async fn run_producer_reader(
    stream: TcpStream,
    tx: mpsc::Sender<Multipart>,
    codec: MultipartCodec,
    stats: Arc<TransportStats>,
    shutdown: CancellationToken,
    addr: SocketAddr,
) {
    let mut framed = FramedRead::new(stream, codec);
    loop {
        let next = tokio::select! {
            _ = shutdown.cancelled() => break,
            next = framed.next() => next,
        };
        match next {
            Some(Ok(message)) => {
                stats.record_received();
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    sent = tx.send(message) => {
                        if sent.is_err() {
                            break;
                        }
                    }
                }
            }
            Some(Err(err)) => {
                warn!(%addr, error = %err, "corrupt transport frame, closing producer connection");
                break;
            }
            None => break,
        }
    }
    debug!(%addr, "producer disconnected");
}
