use aer_config::{
    ConfigError, CustomClass, HubOptions, OpenMode, PubSuberOptions, PublisherOptions,
    SaverBackend, SaverOptions, SubscriberOptions, TransportConfig, DEFAULT_LAUNCH_PATH,
};
use clap::Args;

#[derive(Args, Debug, Clone, Default)]
pub struct TransportArgs {
    #[arg(long, help = "Per-socket message queue length")]
    queue: Option<usize>,
    #[arg(long = "max-message-bytes", help = "Largest accepted frame in bytes")]
    max_message_bytes: Option<usize>,
    #[arg(long, help = "Initial reconnect backoff, e.g. 200ms")]
    reconnect: Option<String>,
    #[arg(long = "reconnect-max", help = "Reconnect backoff cap, e.g. 5s")]
    reconnect_max: Option<String>,
    #[arg(long, help = "Time to flush queued messages on close, e.g. 1s")]
    linger: Option<String>,
}

impl TransportArgs {
    fn apply(self, cfg: &mut TransportConfig) {
        if let Some(queue) = self.queue {
            cfg.queue = queue;
        }
        if let Some(max) = self.max_message_bytes {
            cfg.max_message_bytes = max;
        }
        if let Some(reconnect) = self.reconnect {
            cfg.reconnect = reconnect;
        }
        if let Some(reconnect_max) = self.reconnect_max {
            cfg.reconnect_max = reconnect_max;
        }
        if let Some(linger) = self.linger {
            cfg.linger = linger;
        }
    }
}

#[derive(Args, Debug, Clone, Default)]
pub struct CustomArgs {
    #[arg(long = "custom-class", help = "Registered class replacing the built-in one")]
    custom_class: Option<String>,
    #[arg(long = "custom-config", help = "JSON config file handed to the custom class")]
    custom_config: Option<String>,
}

impl CustomArgs {
    fn apply(self, custom: &mut CustomClass) {
        if let Some(class) = self.custom_class {
            custom.custom_class = class;
        }
        if let Some(config) = self.custom_config {
            custom.custom_config = config;
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct HubArgs {
    #[arg(long, help = "Instance name used in logs")]
    name: Option<String>,
    #[arg(long, help = "Bind address, e.g. tcp://* or 127.0.0.1")]
    url: Option<String>,
    #[arg(long = "publisher-port", help = "Inbound port publishers connect to")]
    publisher_port: Option<u16>,
    #[arg(long = "subscriber-port", help = "Outbound port subscribers connect to")]
    subscriber_port: Option<u16>,
    #[arg(long = "stats-interval", help = "Counter log interval, e.g. 10s")]
    stats_interval: Option<String>,
    #[command(flatten)]
    transport: TransportArgs,
}

impl HubArgs {
    pub fn into_options(self) -> HubOptions {
        let mut options = HubOptions::default();
        if let Some(name) = self.name {
            options.name = name;
        }
        if let Some(url) = self.url {
            options.url = url;
        }
        if let Some(port) = self.publisher_port {
            options.publisher_port = port;
        }
        if let Some(port) = self.subscriber_port {
            options.subscriber_port = port;
        }
        if let Some(interval) = self.stats_interval {
            options.stats_interval = interval;
        }
        self.transport.apply(&mut options.transport);
        options
    }
}

#[derive(Args, Debug, Clone)]
pub struct PublisherArgs {
    #[arg(long, help = "Instance name used in logs")]
    name: Option<String>,
    #[arg(long, help = "Hub address, or bind address with --bind")]
    url: Option<String>,
    #[arg(long, help = "Hub inbound port, or bind port with --bind")]
    port: Option<u16>,
    #[arg(long = "master-topic", help = "Root of every topic this publisher emits")]
    master_topic: Option<String>,
    #[arg(long = "sub-id", help = "Optional topic suffix distinguishing sources")]
    sub_id: Option<String>,
    #[arg(long, help = "Device type, e.g. synthetic")]
    device: Option<String>,
    #[arg(long = "noise-filter", help = "Enable the device noise filter")]
    noise_filter: bool,
    #[arg(long = "bias-file", help = "JSON bias file applied before streaming")]
    bias_file: Option<String>,
    #[arg(long = "poll-interval", help = "Sleep after an empty poll, e.g. 1ms")]
    poll_interval: Option<String>,
    #[arg(long, help = "Bind a point-to-point endpoint instead of using a hub")]
    bind: bool,
    #[command(flatten)]
    custom: CustomArgs,
    #[command(flatten)]
    transport: TransportArgs,
}

impl PublisherArgs {
    pub fn into_options(self) -> PublisherOptions {
        let mut options = PublisherOptions::default();
        if let Some(name) = self.name {
            options.name = name;
        }
        if let Some(url) = self.url {
            options.url = url;
        }
        if let Some(port) = self.port {
            options.port = port;
        }
        if let Some(master_topic) = self.master_topic {
            options.master_topic = master_topic;
        }
        if let Some(sub_id) = self.sub_id {
            options.sub_id = sub_id;
        }
        if let Some(device) = self.device {
            options.device = device;
        }
        if let Some(interval) = self.poll_interval {
            options.poll_interval = interval;
        }
        options.noise_filter = self.noise_filter;
        options.bias_file = self.bias_file;
        options.bind = self.bind;
        self.custom.apply(&mut options.custom);
        self.transport.apply(&mut options.transport);
        options
    }
}

#[derive(Args, Debug, Clone)]
pub struct SubscriberArgs {
    #[arg(long, help = "Instance name used in logs")]
    name: Option<String>,
    #[arg(long, help = "Hub or publisher address")]
    url: Option<String>,
    #[arg(long, help = "Hub outbound port")]
    port: Option<u16>,
    #[arg(long, help = "Topic prefix to receive (default: everything)")]
    topic: Option<String>,
    #[command(flatten)]
    custom: CustomArgs,
    #[command(flatten)]
    transport: TransportArgs,
}

impl SubscriberArgs {
    pub fn into_options(self) -> SubscriberOptions {
        let mut options = SubscriberOptions::default();
        if let Some(name) = self.name {
            options.name = name;
        }
        if let Some(url) = self.url {
            options.url = url;
        }
        if let Some(port) = self.port {
            options.port = port;
        }
        if let Some(topic) = self.topic {
            options.topic = topic;
        }
        self.custom.apply(&mut options.custom);
        self.transport.apply(&mut options.transport);
        options
    }
}

#[derive(Args, Debug, Clone)]
pub struct SaverArgs {
    #[arg(long, help = "Instance name used in logs")]
    name: Option<String>,
    #[arg(long, help = "Hub or publisher address")]
    url: Option<String>,
    #[arg(long, help = "Hub outbound port")]
    port: Option<u16>,
    #[arg(long, help = "Topic prefix to record (default: everything)")]
    topic: Option<String>,
    #[arg(long, help = "Output file")]
    filename: Option<String>,
    #[arg(long, help = "Open mode: w, a, w- or x")]
    mode: Option<String>,
    #[arg(long, help = "Write one JSON line per batch (default)")]
    jsonl: bool,
    #[arg(long, help = "Write replayable length-prefixed envelopes")]
    raw: bool,
    #[arg(long, help = "Write HDF5 (not available in this build)")]
    hdf5: bool,
    #[arg(long, help = "Write Zarr (not available in this build)")]
    zarr: bool,
    #[command(flatten)]
    transport: TransportArgs,
}

impl SaverArgs {
    pub fn into_options(self) -> Result<SaverOptions, ConfigError> {
        let mut options = SaverOptions::default();
        if let Some(name) = self.name {
            options.name = name;
        }
        if let Some(url) = self.url {
            options.url = url;
        }
        if let Some(port) = self.port {
            options.port = port;
        }
        if let Some(topic) = self.topic {
            options.topic = topic;
        }
        if let Some(filename) = self.filename {
            options.filename = filename;
        }
        if let Some(raw) = self.mode {
            options.mode = OpenMode::parse(&raw).ok_or_else(|| {
                ConfigError::Validation(format!("saver.mode {raw:?} must be one of w, a, w-, x"))
            })?;
        }
        options.select_backend(&[
            (SaverBackend::Jsonl, self.jsonl),
            (SaverBackend::Raw, self.raw),
            (SaverBackend::Hdf5, self.hdf5),
            (SaverBackend::Zarr, self.zarr),
        ])?;
        self.transport.apply(&mut options.transport);
        Ok(options)
    }
}

#[derive(Args, Debug, Clone)]
pub struct PubSuberArgs {
    #[arg(long, help = "Instance name used in logs")]
    name: Option<String>,
    #[arg(long, help = "Hub address")]
    url: Option<String>,
    #[arg(long = "pub-port", help = "Hub inbound port results are published to")]
    pub_port: Option<u16>,
    #[arg(long = "sub-port", help = "Hub outbound port input is read from")]
    sub_port: Option<u16>,
    #[arg(long, help = "Topic prefix to consume")]
    topic: Option<String>,
    #[arg(long = "master-topic", help = "Root of the topics produced")]
    master_topic: Option<String>,
    #[command(flatten)]
    custom: CustomArgs,
    #[command(flatten)]
    transport: TransportArgs,
}

impl PubSuberArgs {
    pub fn into_options(self) -> PubSuberOptions {
        let mut options = PubSuberOptions::default();
        if let Some(name) = self.name {
            options.name = name;
        }
        if let Some(url) = self.url {
            options.url = url;
        }
        if let Some(port) = self.pub_port {
            options.pub_port = port;
        }
        if let Some(port) = self.sub_port {
            options.sub_port = port;
        }
        if let Some(topic) = self.topic {
            options.topic = topic;
        }
        if let Some(master_topic) = self.master_topic {
            options.master_topic = master_topic;
        }
        self.custom.apply(&mut options.custom);
        self.transport.apply(&mut options.transport);
        options
    }
}

#[derive(Args, Debug, Clone)]
pub struct LaunchArgs {
    #[arg(long, default_value = DEFAULT_LAUNCH_PATH, help = "Path to the launch description")]
    pub config: String,
    #[arg(long = "dry-run", help = "Print resolved command lines without spawning")]
    pub dry_run: bool,
}
