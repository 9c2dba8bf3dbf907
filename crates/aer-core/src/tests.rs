use std::fs;
use std::future::Future;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use aer_config::{HubOptions, PubSuberOptions, RoleKind, SaverOptions};
use aer_protocol::{EventBatch, Frame, FrameShape, PolarityEvent, Topic};
use aer_transport::{PeerGauge, SocketOptions, SubSocket};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;

use super::*;

const WAIT: Duration = Duration::from_secs(5);

fn fast_options() -> SocketOptions {
    SocketOptions {
        reconnect: Duration::from_millis(20),
        reconnect_max: Duration::from_millis(100),
        linger: Duration::from_millis(300),
        ..SocketOptions::default()
    }
}

fn unique_temp_dir(prefix: &str) -> PathBuf {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("clock")
        .as_nanos();
    let dir = std::env::temp_dir().join(format!("{prefix}-{}-{nanos}", std::process::id()));
    fs::create_dir_all(&dir).expect("mkdir");
    dir
}

fn polarity(first_ts: i64, count: usize) -> EventBatch {
    EventBatch::Polarity(
        (0..count)
            .map(|i| PolarityEvent {
                timestamp: first_ts + i as i64,
                x: i as i16,
                y: 3,
                polarity: i % 2 == 1,
            })
            .collect(),
    )
}

struct RunningHub {
    ctx: RoleContext,
    inbound: SocketAddr,
    outbound: SocketAddr,
    subscribers: PeerGauge,
    task: JoinHandle<Result<HubReport, RoleError>>,
}

impl RunningHub {
    async fn start() -> Self {
        let options = HubOptions {
            url: "127.0.0.1".to_string(),
            publisher_port: 0,
            subscriber_port: 0,
            ..HubOptions::default()
        };
        let hub = Hub::bind(&options).await.expect("bind hub");
        let ctx = RoleContext::new(RoleKind::Hub, "Hub");
        Self {
            inbound: hub.inbound_addr(),
            outbound: hub.outbound_addr(),
            subscribers: hub.subscriber_gauge(),
            task: tokio::spawn(hub.run(ctx.clone())),
            ctx,
        }
    }

    async fn wait_for_subscribers(&self, count: usize) {
        wait_until(|| self.subscribers.get() >= count).await;
    }

    async fn stop(self) -> HubReport {
        self.ctx.cancel();
        timeout(WAIT, self.task)
            .await
            .expect("hub stop timeout")
            .expect("hub join")
            .expect("hub run")
    }
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    timeout(WAIT, async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

/// Forwards every batch it handles to the test body.
struct Forward {
    tx: mpsc::UnboundedSender<(String, EventBatch)>,
    closed: Arc<AtomicBool>,
}

impl Forward {
    fn new() -> (Self, mpsc::UnboundedReceiver<(String, EventBatch)>, Arc<AtomicBool>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let closed = Arc::new(AtomicBool::new(false));
        (
            Self {
                tx,
                closed: closed.clone(),
            },
            rx,
            closed,
        )
    }

    fn forward(&mut self, topic: &Topic, batch: &EventBatch) -> Result<(), HandlerError> {
        let _ = self.tx.send((topic.to_string(), batch.clone()));
        Ok(())
    }
}

impl Subscribable for Forward {
    fn on_polarity(&mut self, topic: &Topic, batch: &EventBatch) -> Result<(), HandlerError> {
        self.forward(topic, batch)
    }

    fn on_frame(&mut self, topic: &Topic, batch: &EventBatch) -> Result<(), HandlerError> {
        self.forward(topic, batch)
    }

    fn close(&mut self) -> Result<(), HandlerError> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

fn spawn_role<T, F, Fut>(
    kind: RoleKind,
    name: &str,
    run: F,
) -> (RoleContext, JoinHandle<Result<T, RoleError>>)
where
    T: Send + 'static,
    F: FnOnce(RoleContext) -> Fut,
    Fut: Future<Output = Result<T, RoleError>> + Send + 'static,
{
    let ctx = RoleContext::new(kind, name);
    let task = tokio::spawn(run(ctx.clone()));
    (ctx, task)
}

async fn finish<T>(ctx: RoleContext, task: JoinHandle<Result<T, RoleError>>) -> Result<T, RoleError> {
    ctx.cancel();
    timeout(WAIT, task)
        .await
        .expect("role stop timeout")
        .expect("role join")
}

fn subscribe(
    hub: &RunningHub,
    prefix: &str,
) -> (
    RoleContext,
    JoinHandle<Result<SubscriberReport, RoleError>>,
    mpsc::UnboundedReceiver<(String, EventBatch)>,
    Arc<AtomicBool>,
) {
    let (handler, rx, closed) = Forward::new();
    let socket = SubSocket::connect(hub.outbound.to_string(), prefix, fast_options());
    let (ctx, task) = spawn_role(RoleKind::Subscriber, prefix, move |ctx| {
        Subscriber::new(socket, Box::new(handler)).run(ctx)
    });
    (ctx, task, rx, closed)
}

fn publish(
    inbound: SocketAddr,
    master_topic: &str,
    batches: Vec<EventBatch>,
) -> (RoleContext, JoinHandle<Result<PublisherReport, RoleError>>) {
    let publisher = Publisher::new(
        Box::new(ReplayPublishable::from_batches(batches, false)),
        master_topic,
        "",
    );
    let sink = PublisherSink::connect(inbound.to_string(), fast_options());
    spawn_role(RoleKind::Publisher, "Publisher", move |ctx| {
        publisher.run(sink, ctx)
    })
}

#[tokio::test]
async fn subscriber_receives_only_its_topic() {
    let hub = RunningHub::start().await;
    let (pol_ctx, pol_task, mut pol_rx, pol_closed) = subscribe(&hub, "cam1/polarity");
    let (frame_ctx, frame_task, mut frame_rx, _) = subscribe(&hub, "cam1/frame");
    hub.wait_for_subscribers(2).await;

    let (pub_ctx, pub_task) = publish(hub.inbound, "cam1", vec![polarity(10, 4)]);

    let (topic, batch) = timeout(WAIT, pol_rx.recv())
        .await
        .expect("polarity batch timeout")
        .expect("polarity batch");
    assert_eq!(topic, "cam1/polarity");
    assert_eq!(batch, polarity(10, 4));
    assert_eq!(batch.len(), 4);

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(pol_rx.try_recv().is_err());
    assert!(frame_rx.try_recv().is_err());

    let published = finish(pub_ctx, pub_task).await.expect("publisher");
    assert_eq!(published.published, 1);
    assert_eq!(published.state, PublisherState::Stopped);

    let pol_report = finish(pol_ctx, pol_task).await.expect("subscriber");
    assert_eq!(pol_report.decoded, 1);
    assert_eq!(pol_report.corrupt, 0);
    assert!(pol_closed.load(Ordering::SeqCst));

    let frame_report = finish(frame_ctx, frame_task).await.expect("subscriber");
    assert_eq!(frame_report.received, 0);
    assert_eq!(frame_report.filtered, 1);

    let hub_report = hub.stop().await;
    assert_eq!(hub_report.received, 1);
    assert_eq!(hub_report.forwarded, 1);
}

#[tokio::test]
async fn batches_arrive_in_publish_order() {
    let hub = RunningHub::start().await;
    let (sub_ctx, sub_task, mut rx, _) = subscribe(&hub, "cam1/");
    hub.wait_for_subscribers(1).await;

    let batches = (0..20).map(|i| polarity(i * 100, 2)).collect::<Vec<_>>();
    let (pub_ctx, pub_task) = publish(hub.inbound, "cam1", batches.clone());

    for expected in &batches {
        let (_, batch) = timeout(WAIT, rx.recv())
            .await
            .expect("batch timeout")
            .expect("batch");
        assert_eq!(&batch, expected);
    }

    finish(pub_ctx, pub_task).await.expect("publisher");
    finish(sub_ctx, sub_task).await.expect("subscriber");
    hub.stop().await;
}

#[tokio::test]
async fn hub_without_subscribers_counts_drops() {
    let hub = RunningHub::start().await;
    let (pub_ctx, pub_task) = publish(hub.inbound, "cam1", vec![polarity(0, 1), polarity(1, 1)]);
    tokio::time::sleep(Duration::from_millis(100)).await;

    let published = finish(pub_ctx, pub_task).await.expect("publisher");
    assert_eq!(published.published, 2);

    tokio::time::sleep(Duration::from_millis(200)).await;
    let hub_report = hub.stop().await;
    assert_eq!(hub_report.received, 2);
    assert_eq!(hub_report.forwarded, 0);
    assert_eq!(hub_report.dropped, 2);
}

#[tokio::test]
async fn pubsuber_republishes_under_its_master_topic() {
    let hub = RunningHub::start().await;
    let (sub_ctx, sub_task, mut rx, _) = subscribe(&hub, "cam1-filtered/");

    let options = PubSuberOptions {
        url: "127.0.0.1".to_string(),
        pub_port: hub.inbound.port(),
        sub_port: hub.outbound.port(),
        topic: "cam1/".to_string(),
        master_topic: "cam1-filtered".to_string(),
        ..PubSuberOptions::default()
    };
    let registry = Arc::new(Registry::with_builtins());
    let (ps_ctx, ps_task) = spawn_role(RoleKind::PubSuber, "PubSuber", move |ctx| async move {
        run_pubsuber(options, &registry, ctx).await
    });
    hub.wait_for_subscribers(2).await;

    let (pub_ctx, pub_task) = publish(hub.inbound, "cam1", vec![polarity(5, 3)]);
    let (topic, batch) = timeout(WAIT, rx.recv())
        .await
        .expect("retagged batch timeout")
        .expect("retagged batch");
    assert_eq!(topic, "cam1-filtered/polarity");
    assert_eq!(batch, polarity(5, 3));

    finish(pub_ctx, pub_task).await.expect("publisher");
    let ps_report = finish(ps_ctx, ps_task).await.expect("pubsuber");
    assert_eq!(ps_report.received, 1);
    assert_eq!(ps_report.published, 1);
    finish(sub_ctx, sub_task).await.expect("subscriber");
    hub.stop().await;
}

#[tokio::test]
async fn saver_role_flushes_on_shutdown() {
    let hub = RunningHub::start().await;
    let dir = unique_temp_dir("aer-core-saver-role");
    let path = dir.join("session.aer");
    let options = SaverOptions {
        url: "127.0.0.1".to_string(),
        port: hub.outbound.port(),
        topic: "cam1".to_string(),
        filename: path.display().to_string(),
        backend: aer_config::SaverBackend::Raw,
        ..SaverOptions::default()
    };
    let (saver_ctx, saver_task) =
        spawn_role(RoleKind::Saver, "Saver", move |ctx| run_saver(options, ctx));
    let (watch_ctx, watch_task, mut rx, _) = subscribe(&hub, "cam1");
    hub.wait_for_subscribers(2).await;

    let frame = EventBatch::Frame {
        shape: FrameShape {
            width: 2,
            height: 1,
            channels: 1,
        },
        frames: vec![Frame {
            timestamp: 3,
            pixels: vec![10, 20],
        }],
    };
    let (pub_ctx, pub_task) = publish(hub.inbound, "cam1", vec![polarity(1, 2), frame.clone()]);
    for _ in 0..2 {
        timeout(WAIT, rx.recv())
            .await
            .expect("watch timeout")
            .expect("watch batch");
    }
    finish(pub_ctx, pub_task).await.expect("publisher");
    finish(watch_ctx, watch_task).await.expect("watcher");

    // the saver shares the hub fan-out with the watcher
    tokio::time::sleep(Duration::from_millis(200)).await;
    let report = finish(saver_ctx, saver_task).await.expect("saver");
    assert_eq!(report.decoded, 2);

    let replay = read_raw_log(&path).expect("replay");
    let batches = replay.into_iter().map(|(_, batch)| batch).collect::<Vec<_>>();
    assert_eq!(batches, vec![polarity(1, 2), frame]);

    hub.stop().await;
    let _ = fs::remove_dir_all(dir);
}

#[tokio::test]
async fn bound_publisher_serves_subscribers_directly() {
    let sink = PublisherSink::bind("127.0.0.1:0", fast_options())
        .await
        .expect("bind");
    let addr = sink.local_addr().expect("bound address");
    let gauge = match &sink {
        PublisherSink::Bound(socket) => socket.peer_gauge(),
        PublisherSink::Hub(_) => panic!("expected bound sink"),
    };

    let (handler, mut rx, _) = Forward::new();
    let socket = SubSocket::connect(addr.to_string(), "", fast_options());
    let (sub_ctx, sub_task) = spawn_role(RoleKind::Subscriber, "Subscriber", move |ctx| {
        Subscriber::new(socket, Box::new(handler)).run(ctx)
    });
    wait_until(|| gauge.get() == 1).await;

    let publisher = Publisher::new(
        Box::new(ReplayPublishable::from_batches(vec![polarity(0, 1)], false)),
        "cam2",
        "right",
    );
    let (pub_ctx, pub_task) = spawn_role(RoleKind::Publisher, "Publisher", move |ctx| {
        publisher.run(sink, ctx)
    });

    let (topic, _) = timeout(WAIT, rx.recv())
        .await
        .expect("direct batch timeout")
        .expect("direct batch");
    assert_eq!(topic, "cam2/polarity/right");

    finish(pub_ctx, pub_task).await.expect("publisher");
    finish(sub_ctx, sub_task).await.expect("subscriber");
}

struct FailingSource {
    fail_start: bool,
    polls: u32,
    closed: Arc<AtomicBool>,
}

impl Publishable for FailingSource {
    fn start(&mut self) -> Result<(), DeviceError> {
        if self.fail_start {
            return Err(DeviceError::Stream("no camera attached".to_string()));
        }
        Ok(())
    }

    fn next_batches(&mut self) -> Result<Vec<EventBatch>, DeviceError> {
        self.polls += 1;
        if self.polls > 2 {
            return Err(DeviceError::Stream("usb transfer failed".to_string()));
        }
        Ok(vec![polarity(self.polls as i64, 1), EventBatch::Imu6(Vec::new())])
    }

    fn close(&mut self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

#[tokio::test]
async fn device_failure_stops_the_publisher() {
    for fail_start in [true, false] {
        let closed = Arc::new(AtomicBool::new(false));
        let publisher = Publisher::new(
            Box::new(FailingSource {
                fail_start,
                polls: 0,
                closed: closed.clone(),
            }),
            "cam1",
            "",
        );
        // nothing listens here; sends queue locally
        let sink = PublisherSink::connect("127.0.0.1:9", fast_options());
        let ctx = RoleContext::new(RoleKind::Publisher, "Publisher");
        let err = timeout(WAIT, publisher.run(sink, ctx))
            .await
            .expect("publisher timeout")
            .expect_err("device failure is fatal");
        assert!(matches!(err, RoleError::Device(DeviceError::Stream(_))));
        assert!(closed.load(Ordering::SeqCst));
    }
}

#[tokio::test]
async fn cancelled_subscriber_closes_its_handler() {
    let (handler, _rx, closed) = Forward::new();
    let socket = SubSocket::connect("127.0.0.1:9", "", fast_options());
    let ctx = RoleContext::new(RoleKind::Subscriber, "Subscriber");
    ctx.cancel();
    let report = timeout(WAIT, Subscriber::new(socket, Box::new(handler)).run(ctx))
        .await
        .expect("subscriber timeout")
        .expect("subscriber");
    assert_eq!(report, SubscriberReport::default());
    assert!(closed.load(Ordering::SeqCst));
}

#[tokio::test]
async fn saver_role_rejects_unavailable_backend_before_connecting() {
    let options = SaverOptions {
        filename: "session.h5".to_string(),
        backend: aer_config::SaverBackend::Hdf5,
        ..SaverOptions::default()
    };
    let ctx = RoleContext::new(RoleKind::Saver, "Saver");
    let err = run_saver(options, ctx).await.expect_err("hdf5 unavailable");
    assert!(matches!(
        err,
        RoleError::Saver(SaverError::BackendUnavailable(aer_config::SaverBackend::Hdf5))
    ));
}

#[test]
fn socket_options_follow_transport_config() {
    let cfg = aer_config::TransportConfig {
        queue: 8,
        reconnect: "50ms".to_string(),
        ..aer_config::TransportConfig::default()
    };
    let options = socket_options(&cfg).expect("options");
    assert_eq!(options.queue, 8);
    assert_eq!(options.reconnect, Duration::from_millis(50));
    assert_eq!(options.reconnect_max, Duration::from_secs(5));

    let bad = aer_config::TransportConfig {
        linger: "later".to_string(),
        ..aer_config::TransportConfig::default()
    };
    assert!(socket_options(&bad).is_err());
}

#[test]
fn role_context_span_and_cancel() {
    let ctx = RoleContext::new(RoleKind::Saver, "Saver-main");
    assert_eq!(ctx.name(), "Saver-main");
    assert_eq!(ctx.kind(), RoleKind::Saver);
    let token = ctx.shutdown_token();
    ctx.cancel();
    assert!(token.is_cancelled());
    assert!(ctx.is_cancelled());
}
