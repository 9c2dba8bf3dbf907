mod context;
mod device;
mod hub;
mod publisher;
mod pubsuber;
mod registry;
mod roles;
mod saver;
mod subscriber;

use aer_config::ConfigError;
use aer_transport::TransportError;
use thiserror::Error;

pub use context::{socket_options, RoleContext};
pub use device::{DeviceError, DeviceSpec, EventDevice, SyntheticConfig, SyntheticDevice};
pub use hub::{Hub, HubReport};
pub use publisher::{
    DevicePublishable, Publishable, Publisher, PublisherReport, PublisherSink, PublisherState,
    ReplayPublishable,
};
pub use pubsuber::{Processor, PubSuber, PubSuberReport, RetagProcessor};
pub use registry::{ClassArgs, Registry, RegistryError};
pub use roles::{run_hub, run_publisher, run_pubsuber, run_saver, run_subscriber};
pub use saver::{
    open_saver, read_raw_log, JsonlSaver, ManagedSaver, RawSaver, Saver, SaverError,
    SaverSubscriber,
};
pub use subscriber::{
    dispatch, HandlerError, LogSubscriber, Route, Subscribable, Subscriber, SubscriberReport,
};

#[derive(Debug, Error)]
pub enum RoleError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("device failed: {0}")]
    Device(#[from] DeviceError),
    #[error("saver failed: {0}")]
    Saver(#[from] SaverError),
    #[error("handler failed: {0}")]
    Handler(#[from] HandlerError),
    #[error(transparent)]
    Registry(#[from] RegistryError),
}

#[cfg(test)]
mod tests;
