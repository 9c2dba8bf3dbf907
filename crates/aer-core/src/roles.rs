use std::path::PathBuf;

use aer_config::{
    load_custom_config, CustomClass, HubOptions, PubSuberOptions, PublisherOptions, SaverOptions,
    SubscriberOptions,
};
use aer_transport::{endpoint, PushSocket, SubSocket};
use serde_json::Value;
use tracing::info;

use crate::{
    open_saver, socket_options, ClassArgs, DeviceSpec, Hub, HubReport, LogSubscriber, Processor,
    PubSuber, PubSuberReport, Publisher, PublisherReport, PublisherSink, Registry, RetagProcessor,
    RoleContext, RoleError, SaverSubscriber, Subscribable, Subscriber, SubscriberReport,
};

pub async fn run_hub(options: &HubOptions, ctx: RoleContext) -> Result<HubReport, RoleError> {
    options.validate()?;
    let hub = Hub::bind(options).await?;
    hub.run(ctx).await
}

pub async fn run_publisher(
    mut options: PublisherOptions,
    registry: &Registry,
    ctx: RoleContext,
) -> Result<PublisherReport, RoleError> {
    options.normalize();
    options.validate()?;
    let transport = socket_options(&options.transport)?;
    let poll_interval = options.poll_interval_duration()?;

    let source = if options.custom.is_set() {
        let args = class_args(&ctx, &options.master_topic, &options.custom)?;
        registry.create_publisher(options.custom.custom_class.trim(), &args)?
    } else {
        registry.create_device_publisher(&DeviceSpec {
            name: options.device.clone(),
            noise_filter: options.noise_filter,
            bias_file: options.bias_file.as_deref().map(PathBuf::from),
        })?
    };

    let addr = endpoint(&options.url, options.port);
    let sink = if options.bind {
        PublisherSink::bind(&addr, transport).await?
    } else {
        info!(%addr, "publishing to hub");
        PublisherSink::connect(addr, transport)
    };
    Publisher::new(source, options.master_topic, options.sub_id)
        .with_poll_interval(poll_interval)
        .run(sink, ctx)
        .await
}

pub async fn run_subscriber(
    options: SubscriberOptions,
    registry: &Registry,
    ctx: RoleContext,
) -> Result<SubscriberReport, RoleError> {
    options.validate()?;
    let transport = socket_options(&options.transport)?;
    let handler: Box<dyn Subscribable> = if options.custom.is_set() {
        let args = class_args(&ctx, "", &options.custom)?;
        registry.create_subscriber(options.custom.custom_class.trim(), &args)?
    } else {
        Box::new(LogSubscriber::new(ctx.name()))
    };

    let socket = SubSocket::connect(
        endpoint(&options.url, options.port),
        options.topic.as_str(),
        transport,
    );
    Subscriber::new(socket, handler).run(ctx).await
}

pub async fn run_saver(
    options: SaverOptions,
    ctx: RoleContext,
) -> Result<SubscriberReport, RoleError> {
    options.validate()?;
    let transport = socket_options(&options.transport)?;
    let saver = open_saver(&options)?;

    let socket = SubSocket::connect(
        endpoint(&options.url, options.port),
        options.topic.as_str(),
        transport,
    );
    Subscriber::new(socket, Box::new(SaverSubscriber::new(saver)))
        .run(ctx)
        .await
}

pub async fn run_pubsuber(
    options: PubSuberOptions,
    registry: &Registry,
    ctx: RoleContext,
) -> Result<PubSuberReport, RoleError> {
    options.validate()?;
    let transport = socket_options(&options.transport)?;
    let processor: Box<dyn Processor> = if options.custom.is_set() {
        let args = class_args(&ctx, &options.master_topic, &options.custom)?;
        registry.create_processor(options.custom.custom_class.trim(), &args)?
    } else {
        Box::new(RetagProcessor::new(options.master_topic.as_str()))
    };

    let input = SubSocket::connect(
        endpoint(&options.url, options.sub_port),
        options.topic.as_str(),
        transport.clone(),
    );
    let output = PushSocket::connect(endpoint(&options.url, options.pub_port), transport);
    PubSuber::new(input, output, processor).run(ctx).await
}

fn class_args(
    ctx: &RoleContext,
    master_topic: &str,
    custom: &CustomClass,
) -> Result<ClassArgs, RoleError> {
    let path = custom.custom_config.trim();
    let config = if path.is_empty() {
        Value::Null
    } else {
        load_custom_config(path)?
    };
    Ok(ClassArgs {
        instance: ctx.name().to_string(),
        master_topic: master_topic.to_string(),
        config,
    })
}
