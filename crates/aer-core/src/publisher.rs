use std::collections::VecDeque;
use std::fmt;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use aer_protocol::{encode, EventBatch, EventKind, Topic};
use aer_transport::{
    Multipart, PubSocket, PushSocket, SocketOptions, StatsSnapshot, TransportError,
};
use tracing::{debug, error, info, warn};

use crate::saver::read_raw_log;
use crate::{DeviceError, DeviceSpec, EventDevice, RoleContext, RoleError, SaverError};

/// Source of event batches driven by a publisher.
pub trait Publishable: Send {
    fn start(&mut self) -> Result<(), DeviceError>;

    /// Batches ready now; an empty vector means nothing was available.
    fn next_batches(&mut self) -> Result<Vec<EventBatch>, DeviceError>;

    fn close(&mut self);
}

pub struct DevicePublishable {
    device: Box<dyn EventDevice>,
    noise_filter: bool,
    bias_file: Option<PathBuf>,
}

impl DevicePublishable {
    pub fn new(device: Box<dyn EventDevice>, spec: &DeviceSpec) -> Self {
        Self {
            device,
            noise_filter: spec.noise_filter,
            bias_file: spec.bias_file.clone(),
        }
    }
}

impl Publishable for DevicePublishable {
    fn start(&mut self) -> Result<(), DeviceError> {
        self.device.enable_noise_filter(self.noise_filter);
        if let Some(path) = &self.bias_file {
            self.device.set_bias_from_json(path)?;
            info!(device = self.device.name(), bias = %path.display(), "bias loaded");
        }
        self.device.start_data_stream()
    }

    fn next_batches(&mut self) -> Result<Vec<EventBatch>, DeviceError> {
        self.device.poll_batches()
    }

    fn close(&mut self) {
        self.device.shutdown();
    }
}

/// Replays batches recorded by the raw saver, one batch per poll.
pub struct ReplayPublishable {
    recorded: Vec<EventBatch>,
    pending: VecDeque<EventBatch>,
    repeat: bool,
}

impl ReplayPublishable {
    pub fn open(path: impl AsRef<Path>, repeat: bool) -> Result<Self, SaverError> {
        let recorded = read_raw_log(path)?
            .into_iter()
            .map(|(_, batch)| batch)
            .collect();
        Ok(Self::from_batches(recorded, repeat))
    }

    pub fn from_batches(recorded: Vec<EventBatch>, repeat: bool) -> Self {
        Self {
            recorded,
            pending: VecDeque::new(),
            repeat,
        }
    }
}

impl Publishable for ReplayPublishable {
    fn start(&mut self) -> Result<(), DeviceError> {
        self.pending = self.recorded.iter().cloned().collect();
        Ok(())
    }

    fn next_batches(&mut self) -> Result<Vec<EventBatch>, DeviceError> {
        if self.pending.is_empty() && self.repeat {
            self.pending = self.recorded.iter().cloned().collect();
        }
        Ok(self.pending.pop_front().into_iter().collect())
    }

    fn close(&mut self) {
        self.pending.clear();
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum PublisherState {
    #[default]
    Initialized,
    Streaming,
    Stopped,
}

impl fmt::Display for PublisherState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Initialized => "INITIALIZED",
            Self::Streaming => "STREAMING",
            Self::Stopped => "STOPPED",
        })
    }
}

/// Where encoded envelopes go: a hub inbound endpoint or a bound point-to-point socket.
pub enum PublisherSink {
    Hub(PushSocket),
    Bound(PubSocket),
}

impl PublisherSink {
    pub fn connect(addr: impl Into<String>, options: SocketOptions) -> Self {
        Self::Hub(PushSocket::connect(addr, options))
    }

    pub async fn bind(addr: &str, options: SocketOptions) -> Result<Self, TransportError> {
        Ok(Self::Bound(PubSocket::bind(addr, options).await?))
    }

    fn send(&self, message: Multipart) -> bool {
        match self {
            Self::Hub(socket) => socket.send(message),
            Self::Bound(socket) => socket.send(message) > 0,
        }
    }

    /// Bound address in point-to-point mode.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        match self {
            Self::Hub(_) => None,
            Self::Bound(socket) => Some(socket.local_addr()),
        }
    }

    pub fn stats(&self) -> StatsSnapshot {
        match self {
            Self::Hub(socket) => socket.stats(),
            Self::Bound(socket) => socket.stats(),
        }
    }

    async fn close(self) {
        match self {
            Self::Hub(socket) => socket.close().await,
            Self::Bound(socket) => socket.close().await,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PublisherReport {
    pub polls: u64,
    pub published: u64,
    pub dropped: u64,
    /// Batches the source produced that could not be encoded.
    pub rejected: u64,
    pub state: PublisherState,
}

pub struct Publisher {
    source: Box<dyn Publishable>,
    master_topic: String,
    sub_id: String,
    poll_interval: Duration,
    state: PublisherState,
}

impl Publisher {
    pub fn new(
        source: Box<dyn Publishable>,
        master_topic: impl Into<String>,
        sub_id: impl Into<String>,
    ) -> Self {
        Self {
            source,
            master_topic: master_topic.into(),
            sub_id: sub_id.into(),
            poll_interval: Duration::from_millis(1),
            state: PublisherState::Initialized,
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn state(&self) -> PublisherState {
        self.state
    }

    pub fn topic(&self, kind: EventKind) -> Topic {
        Topic::new(self.master_topic.clone(), kind).with_sub_id(self.sub_id.clone())
    }

    pub async fn run(
        mut self,
        sink: PublisherSink,
        ctx: RoleContext,
    ) -> Result<PublisherReport, RoleError> {
        let mut report = PublisherReport::default();
        if let Err(err) = self.source.start() {
            error!(error = %err, "failed to start data stream");
            self.stop(&mut report, sink).await;
            return Err(err.into());
        }
        self.state = PublisherState::Streaming;
        info!(master_topic = %self.master_topic, state = %self.state, "publisher started");

        let outcome = loop {
            if ctx.is_cancelled() {
                break Ok(());
            }
            match self.publish_cycle(&sink, &mut report) {
                Ok(0) => {
                    tokio::select! {
                        _ = ctx.cancelled() => break Ok(()),
                        _ = tokio::time::sleep(self.poll_interval) => {}
                    }
                }
                Ok(_) => tokio::task::yield_now().await,
                Err(err) => {
                    error!(error = %err, "device stream failed");
                    break Err(err);
                }
            }
        };

        self.stop(&mut report, sink).await;
        info!(
            published = report.published,
            dropped = report.dropped,
            rejected = report.rejected,
            state = %report.state,
            "publisher stopped"
        );
        outcome.map(|()| report).map_err(RoleError::from)
    }

    /// Polls the source once and sends every non-empty batch.
    fn publish_cycle(
        &mut self,
        sink: &PublisherSink,
        report: &mut PublisherReport,
    ) -> Result<usize, DeviceError> {
        report.polls += 1;
        let mut handled = 0;
        for batch in self.source.next_batches()? {
            if batch.is_empty() {
                continue;
            }
            handled += 1;
            let topic = self.topic(batch.kind());
            match encode(&topic, &batch) {
                Ok(message) => {
                    if sink.send(message) {
                        report.published += 1;
                    } else {
                        report.dropped += 1;
                        debug!(%topic, "batch dropped by transport");
                    }
                }
                Err(err) => {
                    report.rejected += 1;
                    warn!(%topic, error = %err, "batch rejected by encoder");
                }
            }
        }
        Ok(handled)
    }

    async fn stop(&mut self, report: &mut PublisherReport, sink: PublisherSink) {
        self.source.close();
        self.state = PublisherState::Stopped;
        report.state = self.state;
        sink.close().await;
    }
}
