use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const DEFAULT_LAUNCH_PATH: &str = "aer_launch.toml";
pub const DEFAULT_URL: &str = "127.0.0.1";
/// Hub inbound endpoint, publishers connect here.
pub const DEFAULT_PUBLISHER_PORT: u16 = 5100;
/// Hub outbound endpoint, subscribers connect here.
pub const DEFAULT_SUBSCRIBER_PORT: u16 = 5099;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Read(std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(toml::de::Error),
    #[error("failed to parse launch description: {0}")]
    EditParse(toml_edit::TomlError),
    #[error("failed to parse custom config {path}: {reason}")]
    CustomConfig { path: String, reason: String },
    #[error("config validation failed: {0}")]
    Validation(String),
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TransportConfig {
    pub queue: usize,
    pub max_message_bytes: usize,
    pub reconnect: String,
    pub reconnect_max: String,
    pub linger: String,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            queue: 1024,
            max_message_bytes: 64 * 1024 * 1024,
            reconnect: "200ms".to_string(),
            reconnect_max: "5s".to_string(),
            linger: "1s".to_string(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct HubOptions {
    pub name: String,
    pub url: String,
    pub publisher_port: u16,
    pub subscriber_port: u16,
    pub stats_interval: String,
    pub transport: TransportConfig,
}

impl Default for HubOptions {
    fn default() -> Self {
        Self {
            name: "Hub".to_string(),
            url: "tcp://*".to_string(),
            publisher_port: DEFAULT_PUBLISHER_PORT,
            subscriber_port: DEFAULT_SUBSCRIBER_PORT,
            stats_interval: "10s".to_string(),
            transport: TransportConfig::default(),
        }
    }
}

/// Selects a registered implementation instead of the built-in one.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CustomClass {
    pub custom_class: String,
    pub custom_config: String,
}

impl CustomClass {
    pub fn is_set(&self) -> bool {
        !self.custom_class.trim().is_empty()
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PublisherOptions {
    pub name: String,
    pub url: String,
    pub port: u16,
    pub master_topic: String,
    pub sub_id: String,
    pub device: String,
    pub noise_filter: bool,
    pub bias_file: Option<String>,
    pub poll_interval: String,
    /// Bind a point-to-point endpoint instead of connecting to a hub.
    pub bind: bool,
    #[serde(flatten)]
    pub custom: CustomClass,
    pub transport: TransportConfig,
}

impl Default for PublisherOptions {
    fn default() -> Self {
        Self {
            name: "Publisher".to_string(),
            url: DEFAULT_URL.to_string(),
            port: DEFAULT_PUBLISHER_PORT,
            master_topic: String::new(),
            sub_id: String::new(),
            device: String::new(),
            noise_filter: false,
            bias_file: None,
            poll_interval: "1ms".to_string(),
            bind: false,
            custom: CustomClass::default(),
            transport: TransportConfig::default(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SubscriberOptions {
    pub name: String,
    pub url: String,
    pub port: u16,
    /// Topic prefix; empty subscribes to everything.
    pub topic: String,
    #[serde(flatten)]
    pub custom: CustomClass,
    pub transport: TransportConfig,
}

impl Default for SubscriberOptions {
    fn default() -> Self {
        Self {
            name: "Subscriber".to_string(),
            url: DEFAULT_URL.to_string(),
            port: DEFAULT_SUBSCRIBER_PORT,
            topic: String::new(),
            custom: CustomClass::default(),
            transport: TransportConfig::default(),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub enum OpenMode {
    #[serde(rename = "w")]
    Truncate,
    #[default]
    #[serde(rename = "a")]
    Append,
    #[serde(rename = "w-", alias = "x")]
    CreateNew,
}

impl OpenMode {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim() {
            "w" => Some(Self::Truncate),
            "a" => Some(Self::Append),
            "w-" | "x" => Some(Self::CreateNew),
            _ => None,
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Truncate => "w",
            Self::Append => "a",
            Self::CreateNew => "w-",
        }
    }
}

impl fmt::Display for OpenMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SaverBackend {
    #[default]
    Jsonl,
    Raw,
    Hdf5,
    Zarr,
}

impl SaverBackend {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Jsonl => "jsonl",
            Self::Raw => "raw",
            Self::Hdf5 => "hdf5",
            Self::Zarr => "zarr",
        }
    }
}

impl fmt::Display for SaverBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SaverOptions {
    pub name: String,
    pub url: String,
    pub port: u16,
    pub topic: String,
    pub filename: String,
    pub mode: OpenMode,
    pub backend: SaverBackend,
    pub transport: TransportConfig,
}

impl Default for SaverOptions {
    fn default() -> Self {
        Self {
            name: "Saver".to_string(),
            url: DEFAULT_URL.to_string(),
            port: DEFAULT_SUBSCRIBER_PORT,
            topic: String::new(),
            filename: String::new(),
            mode: OpenMode::default(),
            backend: SaverBackend::default(),
            transport: TransportConfig::default(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PubSuberOptions {
    pub name: String,
    pub url: String,
    pub pub_port: u16,
    pub sub_port: u16,
    /// Prefix of the topics to consume.
    pub topic: String,
    /// Root of the topics produced.
    pub master_topic: String,
    #[serde(flatten)]
    pub custom: CustomClass,
    pub transport: TransportConfig,
}

impl Default for PubSuberOptions {
    fn default() -> Self {
        Self {
            name: "PubSuber".to_string(),
            url: DEFAULT_URL.to_string(),
            pub_port: DEFAULT_PUBLISHER_PORT,
            sub_port: DEFAULT_SUBSCRIBER_PORT,
            topic: String::new(),
            master_topic: String::new(),
            custom: CustomClass::default(),
            transport: TransportConfig::default(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LauncherOptions {
    /// Role program; empty means the running executable.
    pub program: String,
    pub startup_grace: String,
    pub stop_timeout: String,
}

impl Default for LauncherOptions {
    fn default() -> Self {
        Self {
            program: String::new(),
            startup_grace: "300ms".to_string(),
            stop_timeout: "3s".to_string(),
        }
    }
}
