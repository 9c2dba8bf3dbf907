use std::collections::BTreeMap;
use std::path::PathBuf;

use aer_config::SaverOptions;
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

use crate::{
    open_saver, DeviceError, DevicePublishable, DeviceSpec, EventDevice, LogSubscriber, Processor,
    Publishable, ReplayPublishable, RetagProcessor, SaverError, SaverSubscriber, Subscribable,
    SyntheticConfig, SyntheticDevice,
};

/// Publisher class backed by the device registry.
pub const DEVICE_PUBLISHER: &str = "device";

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("no {role} class named {name:?} (available: {available})")]
    UnknownClass {
        role: &'static str,
        name: String,
        available: String,
    },
    #[error("invalid config for {name}: {reason}")]
    InvalidConfig { name: String, reason: String },
    #[error(transparent)]
    Device(#[from] DeviceError),
    #[error(transparent)]
    Saver(#[from] SaverError),
}

/// Construction input for a registered class.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ClassArgs {
    pub instance: String,
    pub master_topic: String,
    pub config: Value,
}

impl ClassArgs {
    fn parse<T: for<'de> Deserialize<'de>>(&self, name: &str) -> Result<T, RegistryError> {
        let config = if self.config.is_null() {
            Value::Object(Default::default())
        } else {
            self.config.clone()
        };
        serde_json::from_value(config).map_err(|err| RegistryError::InvalidConfig {
            name: name.to_string(),
            reason: err.to_string(),
        })
    }
}

type Factory<T> = Box<dyn Fn(&ClassArgs) -> Result<T, RegistryError> + Send + Sync>;
type DeviceFactory =
    Box<dyn Fn(&DeviceSpec) -> Result<Box<dyn EventDevice>, DeviceError> + Send + Sync>;

/// Name-keyed factories for devices and custom role classes.
#[derive(Default)]
pub struct Registry {
    devices: BTreeMap<String, DeviceFactory>,
    publishers: BTreeMap<String, Factory<Box<dyn Publishable>>>,
    subscribers: BTreeMap<String, Factory<Box<dyn Subscribable>>>,
    processors: BTreeMap<String, Factory<Box<dyn Processor>>>,
}

#[derive(Deserialize)]
#[serde(default)]
struct DevicePublisherConfig {
    device: String,
    noise_filter: bool,
    bias_file: Option<PathBuf>,
}

impl Default for DevicePublisherConfig {
    fn default() -> Self {
        Self {
            device: "synthetic".to_string(),
            noise_filter: false,
            bias_file: None,
        }
    }
}

#[derive(Deserialize)]
struct ReplayConfig {
    path: PathBuf,
    #[serde(default)]
    repeat: bool,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct RetagConfig {
    master_topic: Option<String>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register_device("synthetic", |spec| {
            let mut device = SyntheticDevice::new(SyntheticConfig::default());
            device.enable_noise_filter(spec.noise_filter);
            Ok(Box::new(device))
        });
        registry.register_publisher("replay", |args| {
            let config: ReplayConfig = args.parse("replay")?;
            Ok(Box::new(ReplayPublishable::open(
                config.path,
                config.repeat,
            )?))
        });
        registry.register_subscriber("log", |args| {
            Ok(Box::new(LogSubscriber::new(args.instance.clone())))
        });
        registry.register_subscriber("saver", |args| {
            let options: SaverOptions = args.parse("saver")?;
            Ok(Box::new(SaverSubscriber::new(open_saver(&options)?)))
        });
        registry.register_processor("retag", |args| {
            let config: RetagConfig = args.parse("retag")?;
            let root = config
                .master_topic
                .unwrap_or_else(|| args.master_topic.clone());
            Ok(Box::new(RetagProcessor::new(root)))
        });
        registry
    }

    pub fn register_device<F>(&mut self, name: impl Into<String>, factory: F)
    where
        F: Fn(&DeviceSpec) -> Result<Box<dyn EventDevice>, DeviceError> + Send + Sync + 'static,
    {
        self.devices.insert(name.into(), Box::new(factory));
    }

    pub fn register_publisher<F>(&mut self, name: impl Into<String>, factory: F)
    where
        F: Fn(&ClassArgs) -> Result<Box<dyn Publishable>, RegistryError> + Send + Sync + 'static,
    {
        self.publishers.insert(name.into(), Box::new(factory));
    }

    pub fn register_subscriber<F>(&mut self, name: impl Into<String>, factory: F)
    where
        F: Fn(&ClassArgs) -> Result<Box<dyn Subscribable>, RegistryError> + Send + Sync + 'static,
    {
        self.subscribers.insert(name.into(), Box::new(factory));
    }

    pub fn register_processor<F>(&mut self, name: impl Into<String>, factory: F)
    where
        F: Fn(&ClassArgs) -> Result<Box<dyn Processor>, RegistryError> + Send + Sync + 'static,
    {
        self.processors.insert(name.into(), Box::new(factory));
    }

    pub fn create_device(&self, spec: &DeviceSpec) -> Result<Box<dyn EventDevice>, DeviceError> {
        let factory = self
            .devices
            .get(spec.name.as_str())
            .ok_or_else(|| DeviceError::Unsupported {
                name: spec.name.clone(),
                available: available(&self.devices),
            })?;
        factory(spec)
    }

    pub fn create_device_publisher(
        &self,
        spec: &DeviceSpec,
    ) -> Result<Box<dyn Publishable>, RegistryError> {
        let device = self.create_device(spec)?;
        Ok(Box::new(DevicePublishable::new(device, spec)))
    }

    pub fn create_publisher(
        &self,
        name: &str,
        args: &ClassArgs,
    ) -> Result<Box<dyn Publishable>, RegistryError> {
        if let Some(factory) = self.publishers.get(name) {
            return factory(args);
        }
        if name == DEVICE_PUBLISHER {
            let config: DevicePublisherConfig = args.parse(name)?;
            return self.create_device_publisher(&DeviceSpec {
                name: config.device.trim().to_ascii_lowercase(),
                noise_filter: config.noise_filter,
                bias_file: config.bias_file,
            });
        }
        Err(unknown("publisher", name, &self.publishers, Some(DEVICE_PUBLISHER)))
    }

    pub fn create_subscriber(
        &self,
        name: &str,
        args: &ClassArgs,
    ) -> Result<Box<dyn Subscribable>, RegistryError> {
        match self.subscribers.get(name) {
            Some(factory) => factory(args),
            None => Err(unknown("subscriber", name, &self.subscribers, None)),
        }
    }

    pub fn create_processor(
        &self,
        name: &str,
        args: &ClassArgs,
    ) -> Result<Box<dyn Processor>, RegistryError> {
        match self.processors.get(name) {
            Some(factory) => factory(args),
            None => Err(unknown("processor", name, &self.processors, None)),
        }
    }
}

fn available<T>(entries: &BTreeMap<String, T>) -> String {
    let names = entries.keys().map(String::as_str).collect::<Vec<&str>>();
    if names.is_empty() {
        "none".to_string()
    } else {
        names.join(", ")
    }
}

fn unknown<T>(
    role: &'static str,
    name: &str,
    entries: &BTreeMap<String, T>,
    extra: Option<&str>,
) -> RegistryError {
    let mut names = entries.keys().map(String::as_str).collect::<Vec<&str>>();
    names.extend(extra);
    names.sort_unstable();
    RegistryError::UnknownClass {
        role,
        name: name.to_string(),
        available: names.join(", "),
    }
}
