use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tokio_util::codec::{FramedRead, FramedWrite};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::codec::{Multipart, MultipartCodec};
use crate::options::{wait_backoff, SocketOptions};
use crate::stats::{StatsSnapshot, TransportStats};

async fn dial(
    addr: &str,
    options: &SocketOptions,
    shutdown: &CancellationToken,
    attempts: &mut u32,
) -> Option<TcpStream> {
    while !shutdown.is_cancelled() {
        let stream = tokio::select! {
            _ = shutdown.cancelled() => return None,
            stream = tokio::time::timeout(options.dial_timeout, TcpStream::connect(addr)) => stream,
        };
        match stream {
            Ok(Ok(stream)) => {
                let _ = stream.set_nodelay(true);
                *attempts = 0;
                info!(%addr, "transport connected");
                return Some(stream);
            }
            Ok(Err(err)) => {
                *attempts = attempts.saturating_add(1);
                warn!(%addr, attempt = *attempts, error = %err, "transport connect failed");
            }
            Err(_) => {
                *attempts = attempts.saturating_add(1);
                warn!(%addr, attempt = *attempts, timeout_ms = options.dial_timeout.as_millis(), "transport connect timeout");
            }
        }
        wait_backoff(shutdown, options, *attempts).await;
    }
    None
}

/// Connecting send-only socket. `send` never waits for the peer.
pub struct PushSocket {
    tx: Option<mpsc::Sender<Multipart>>,
    stats: Arc<TransportStats>,
    connected: Arc<AtomicBool>,
    shutdown: CancellationToken,
    task: JoinHandle<()>,
    linger: Duration,
}

impl PushSocket {
    pub fn connect(addr: impl Into<String>, options: SocketOptions) -> Self {
        let addr = addr.into();
        let (tx, rx) = mpsc::channel(options.queue_len());
        let connected = Arc::new(AtomicBool::new(false));
        let shutdown = CancellationToken::new();
        let linger = options.linger;
        let task = tokio::spawn(run_push(
            addr,
            rx,
            options,
            connected.clone(),
            shutdown.clone(),
        ));

        Self {
            tx: Some(tx),
            stats: Arc::new(TransportStats::default()),
            connected,
            shutdown,
            task,
            linger,
        }
    }

    /// Queues `message`; returns false if it was dropped.
    pub fn send(&self, message: Multipart) -> bool {
        let Some(tx) = &self.tx else {
            self.stats.record_dropped();
            return false;
        };
        match tx.try_send(message) {
            Ok(()) => {
                self.stats.record_sent();
                true
            }
            Err(TrySendError::Full(_)) | Err(TrySendError::Closed(_)) => {
                self.stats.record_dropped();
                false
            }
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Flushes queued messages for at most the linger period, then disconnects.
    pub async fn close(mut self) {
        drop(self.tx.take());
        if tokio::time::timeout(self.linger, &mut self.task)
            .await
            .is_err()
        {
            debug!("push socket linger elapsed, discarding queued messages");
            self.shutdown.cancel();
            let _ = (&mut self.task).await;
        }
    }
}

async fn run_push(
    addr: String,
    mut rx: mpsc::Receiver<Multipart>,
    options: SocketOptions,
    connected: Arc<AtomicBool>,
    shutdown: CancellationToken,
) {
    let mut attempts: u32 = 0;
    while let Some(stream) = dial(&addr, &options, &shutdown, &mut attempts).await {
        connected.store(true, Ordering::Relaxed);
        let mut framed = FramedWrite::new(stream, MultipartCodec::new(options.max_message_bytes));

        let outcome: Result<bool, io::Error> = loop {
            let message = tokio::select! {
                _ = shutdown.cancelled() => break Ok(true),
                message = rx.recv() => message,
            };
            let Some(message) = message else {
                break Ok(true);
            };
            if let Err(err) = framed.send(message).await {
                break Err(err);
            }
        };
        connected.store(false, Ordering::Relaxed);

        match outcome {
            Ok(_) => {
                let _ = framed.close().await;
                debug!(%addr, "push socket closed");
                return;
            }
            Err(err) => {
                attempts = 1;
                warn!(%addr, error = %err, "transport connection error");
                wait_backoff(&shutdown, &options, attempts).await;
            }
        }
    }
}

/// Connecting receive-only socket with a topic prefix filter.
pub struct SubSocket {
    rx: mpsc::Receiver<Multipart>,
    stats: Arc<TransportStats>,
    connected: Arc<AtomicBool>,
    shutdown: CancellationToken,
    task: JoinHandle<()>,
}

impl SubSocket {
    /// An empty `prefix` subscribes to every topic.
    pub fn connect(addr: impl Into<String>, prefix: impl Into<String>, options: SocketOptions) -> Self {
        let (tx, rx) = mpsc::channel(options.queue_len());
        let stats = Arc::new(TransportStats::default());
        let connected = Arc::new(AtomicBool::new(false));
        let shutdown = CancellationToken::new();
        let task = tokio::spawn(run_sub(
            addr.into(),
            prefix.into(),
            tx,
            options,
            stats.clone(),
            connected.clone(),
            shutdown.clone(),
        ));

        Self {
            rx,
            stats,
            connected,
            shutdown,
            task,
        }
    }

    pub async fn recv(&mut self) -> Option<Multipart> {
        self.rx.recv().await
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    pub async fn close(self) {
        self.shutdown.cancel();
        let _ = self.task.await;
    }
}

pub(crate) fn matches_prefix(message: &Multipart, prefix: &str) -> bool {
    message
        .first()
        .map(|topic| topic.starts_with(prefix.as_bytes()))
        .unwrap_or(false)
}

async fn run_sub(
    addr: String,
    prefix: String,
    tx: mpsc::Sender<Multipart>,
    options: SocketOptions,
    stats: Arc<TransportStats>,
    connected: Arc<AtomicBool>,
    shutdown: CancellationToken,
) {
    let mut attempts: u32 = 0;
    while let Some(stream) = dial(&addr, &options, &shutdown, &mut attempts).await {
        connected.store(true, Ordering::Relaxed);
        let mut framed = FramedRead::new(stream, MultipartCodec::new(options.max_message_bytes));

        loop {
            let next = tokio::select! {
                _ = shutdown.cancelled() => {
                    connected.store(false, Ordering::Relaxed);
                    return;
                }
                next = framed.next() => next,
            };
            match next {
                Some(Ok(message)) => {
                    if !matches_prefix(&message, &prefix) {
                        stats.record_filtered();
                        continue;
                    }
                    stats.record_received();
                    tokio::select! {
                        _ = shutdown.cancelled() => {
                            connected.store(false, Ordering::Relaxed);
                            return;
                        }
                        sent = tx.send(message) => {
                            if sent.is_err() {
                                debug!("subscriber consumer dropped");
                                connected.store(false, Ordering::Relaxed);
                                return;
                            }
                        }
                    }
                }
                Some(Err(err)) => {
                    attempts = 1;
                    warn!(%addr, error = %err, "transport connection error");
                    break;
                }
                None => {
                    attempts = 1;
                    info!(%addr, "transport connection closed");
                    break;
                }
            }
        }

        connected.store(false, Ordering::Relaxed);
        wait_backoff(&shutdown, &options, attempts).await;
    }
}
