use aer_protocol::{decode, peek_topic, EventBatch, EventKind, Topic};
use aer_transport::{Multipart, SubSocket};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::{RoleContext, RoleError, SaverError};

#[derive(Debug, Error)]
pub enum HandlerError {
    #[error(transparent)]
    Saver(#[from] SaverError),
    #[error("{0}")]
    Failed(String),
}

/// Handler family a topic is dispatched to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Route {
    Polarity,
    Special,
    Frame,
    Imu,
    Spike,
}

impl Route {
    const KEYWORDS: [(&'static str, Route); 5] = [
        ("polarity", Route::Polarity),
        ("special", Route::Special),
        ("frame", Route::Frame),
        ("imu", Route::Imu),
        ("spike", Route::Spike),
    ];

    /// Matches the kind segment of a raw topic against the handler keywords.
    pub fn from_topic(raw: &str) -> Option<Self> {
        let topic = Topic::parse(raw).ok()?;
        Self::for_kind(topic.kind())
    }

    pub fn for_kind(kind: EventKind) -> Option<Self> {
        let segment = kind.as_str();
        Self::KEYWORDS
            .iter()
            .find(|(keyword, _)| segment.contains(keyword))
            .map(|(_, route)| *route)
    }
}

/// Consumer of decoded batches. Handlers the implementor does not care about stay no-ops.
pub trait Subscribable: Send {
    fn on_polarity(&mut self, _topic: &Topic, _batch: &EventBatch) -> Result<(), HandlerError> {
        Ok(())
    }

    fn on_special(&mut self, _topic: &Topic, _batch: &EventBatch) -> Result<(), HandlerError> {
        Ok(())
    }

    fn on_frame(&mut self, _topic: &Topic, _batch: &EventBatch) -> Result<(), HandlerError> {
        Ok(())
    }

    /// Receives both imu6 and imu9 batches.
    fn on_imu(&mut self, _topic: &Topic, _batch: &EventBatch) -> Result<(), HandlerError> {
        Ok(())
    }

    fn on_spike(&mut self, _topic: &Topic, _batch: &EventBatch) -> Result<(), HandlerError> {
        Ok(())
    }

    fn close(&mut self) -> Result<(), HandlerError> {
        Ok(())
    }
}

pub fn dispatch(
    handler: &mut dyn Subscribable,
    route: Route,
    topic: &Topic,
    batch: &EventBatch,
) -> Result<(), HandlerError> {
    match route {
        Route::Polarity => handler.on_polarity(topic, batch),
        Route::Special => handler.on_special(topic, batch),
        Route::Frame => handler.on_frame(topic, batch),
        Route::Imu => handler.on_imu(topic, batch),
        Route::Spike => handler.on_spike(topic, batch),
    }
}

/// Logs one line per received batch.
pub struct LogSubscriber {
    name: String,
    batches: u64,
    records: u64,
}

impl LogSubscriber {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            batches: 0,
            records: 0,
        }
    }

    fn log(&mut self, topic: &Topic, batch: &EventBatch) -> Result<(), HandlerError> {
        self.batches += 1;
        self.records += batch.len() as u64;
        info!(
            %topic,
            count = batch.len(),
            first_ts = batch.first_timestamp().unwrap_or_default(),
            "batch received"
        );
        Ok(())
    }
}

impl Subscribable for LogSubscriber {
    fn on_polarity(&mut self, topic: &Topic, batch: &EventBatch) -> Result<(), HandlerError> {
        self.log(topic, batch)
    }

    fn on_special(&mut self, topic: &Topic, batch: &EventBatch) -> Result<(), HandlerError> {
        self.log(topic, batch)
    }

    fn on_frame(&mut self, topic: &Topic, batch: &EventBatch) -> Result<(), HandlerError> {
        self.log(topic, batch)
    }

    fn on_imu(&mut self, topic: &Topic, batch: &EventBatch) -> Result<(), HandlerError> {
        self.log(topic, batch)
    }

    fn on_spike(&mut self, topic: &Topic, batch: &EventBatch) -> Result<(), HandlerError> {
        self.log(topic, batch)
    }

    fn close(&mut self) -> Result<(), HandlerError> {
        info!(
            subscriber = %self.name,
            batches = self.batches,
            records = self.records,
            "log subscriber closed"
        );
        Ok(())
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SubscriberReport {
    pub received: u64,
    pub decoded: u64,
    pub corrupt: u64,
    pub unrouted: u64,
    pub handler_errors: u64,
    /// Messages discarded by the topic prefix filter.
    pub filtered: u64,
}

pub struct Subscriber {
    socket: SubSocket,
    handler: Box<dyn Subscribable>,
}

impl Subscriber {
    pub fn new(socket: SubSocket, handler: Box<dyn Subscribable>) -> Self {
        Self { socket, handler }
    }

    /// Receives until shutdown; the handler is closed on every exit path.
    pub async fn run(self, ctx: RoleContext) -> Result<SubscriberReport, RoleError> {
        let Self {
            mut socket,
            mut handler,
        } = self;
        let mut report = SubscriberReport::default();

        loop {
            let message = tokio::select! {
                _ = ctx.cancelled() => break,
                message = socket.recv() => message,
            };
            let Some(message) = message else {
                warn!("subscription closed by transport");
                break;
            };
            handle_message(handler.as_mut(), &message, &mut report);
        }

        report.filtered = socket.stats().filtered;
        socket.close().await;
        let closed = handler.close();
        info!(
            received = report.received,
            decoded = report.decoded,
            corrupt = report.corrupt,
            unrouted = report.unrouted,
            "subscriber stopped"
        );
        closed?;
        Ok(report)
    }
}

pub(crate) fn handle_message(
    handler: &mut dyn Subscribable,
    message: &Multipart,
    report: &mut SubscriberReport,
) {
    report.received += 1;
    let Some(route) = peek_topic(message).and_then(Route::from_topic) else {
        report.unrouted += 1;
        debug!(topic = ?peek_topic(message), "no handler for topic");
        return;
    };

    match decode(message) {
        Ok((topic, batch)) => {
            report.decoded += 1;
            if let Err(err) = dispatch(handler, route, &topic, &batch) {
                report.handler_errors += 1;
                warn!(%topic, error = %err, "handler failed");
            }
        }
        Err(err) => {
            report.corrupt += 1;
            warn!(error = %err, "dropping corrupt envelope");
        }
    }
}
