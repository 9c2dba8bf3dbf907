use std::time::Duration;

use aer_protocol::EventKind;

use crate::{
    ConfigError, CustomClass, HubOptions, LauncherOptions, PubSuberOptions, PublisherOptions,
    SaverBackend, SaverOptions, SubscriberOptions, TransportConfig,
};

impl TransportConfig {
    pub fn validate(&self, role: &str) -> Result<(), ConfigError> {
        if self.queue == 0 {
            return Err(ConfigError::Validation(format!(
                "{role}.queue must be > 0"
            )));
        }
        if self.max_message_bytes < 16 {
            return Err(ConfigError::Validation(format!(
                "{role}.max_message_bytes must be >= 16"
            )));
        }
        self.reconnect_duration()?;
        self.reconnect_max_duration()?;
        self.linger_duration()?;
        Ok(())
    }

    pub fn reconnect_duration(&self) -> Result<Duration, ConfigError> {
        parse_duration_value("reconnect", &self.reconnect)
    }

    pub fn reconnect_max_duration(&self) -> Result<Duration, ConfigError> {
        parse_duration_value("reconnect_max", &self.reconnect_max)
    }

    pub fn linger_duration(&self) -> Result<Duration, ConfigError> {
        parse_duration_value("linger", &self.linger)
    }
}

impl CustomClass {
    fn validate(&self, role: &str) -> Result<(), ConfigError> {
        if self.is_set() && self.custom_config.trim().is_empty() {
            return Err(ConfigError::Validation(format!(
                "{role}.custom_config must be set when custom_class is used"
            )));
        }
        Ok(())
    }
}

impl HubOptions {
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_url("hub", &self.url)?;
        if self.publisher_port == self.subscriber_port {
            return Err(ConfigError::Validation(format!(
                "hub.publisher_port and hub.subscriber_port must differ (both {})",
                self.publisher_port
            )));
        }
        self.stats_interval_duration()?;
        self.transport.validate("hub")
    }

    pub fn stats_interval_duration(&self) -> Result<Duration, ConfigError> {
        parse_duration_value("hub.stats_interval", &self.stats_interval)
    }
}

impl PublisherOptions {
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_url("publisher", &self.url)?;
        validate_topic_root("publisher.master_topic", &self.master_topic)?;
        validate_sub_id("publisher.sub_id", &self.sub_id)?;
        if !self.custom.is_set() && self.device.trim().is_empty() {
            return Err(ConfigError::Validation(
                "publisher.device must not be empty".to_string(),
            ));
        }
        self.custom.validate("publisher")?;
        self.poll_interval_duration()?;
        self.transport.validate("publisher")
    }

    pub fn normalize(&mut self) {
        self.master_topic = self.master_topic.trim().to_string();
        self.sub_id = self.sub_id.trim().to_string();
        self.device = self.device.trim().to_ascii_lowercase();
        if self
            .bias_file
            .as_deref()
            .map(|path| path.trim().is_empty())
            .unwrap_or(false)
        {
            self.bias_file = None;
        }
    }

    pub fn poll_interval_duration(&self) -> Result<Duration, ConfigError> {
        parse_duration_value("publisher.poll_interval", &self.poll_interval)
    }
}

impl SubscriberOptions {
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_url("subscriber", &self.url)?;
        self.custom.validate("subscriber")?;
        self.transport.validate("subscriber")
    }
}

impl SaverOptions {
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_url("saver", &self.url)?;
        if self.filename.trim().is_empty() {
            return Err(ConfigError::Validation(
                "saver.filename must not be empty".to_string(),
            ));
        }
        self.transport.validate("saver")
    }

    /// Resolves the backend from mutually exclusive flags.
    pub fn select_backend(&mut self, flags: &[(SaverBackend, bool)]) -> Result<(), ConfigError> {
        let chosen = flags
            .iter()
            .filter(|(_, enabled)| *enabled)
            .map(|(backend, _)| *backend)
            .collect::<Vec<SaverBackend>>();
        match chosen.as_slice() {
            [] => Ok(()),
            [backend] => {
                self.backend = *backend;
                Ok(())
            }
            many => Err(ConfigError::Validation(format!(
                "saver backends are mutually exclusive, got {}",
                many.iter()
                    .map(|backend| backend.as_str())
                    .collect::<Vec<&str>>()
                    .join(", ")
            ))),
        }
    }
}

impl PubSuberOptions {
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_url("pubsuber", &self.url)?;
        validate_topic_root("pubsuber.master_topic", &self.master_topic)?;
        let produced = format!("{}/", self.master_topic);
        if produced.starts_with(&self.topic) || self.topic.starts_with(&produced) {
            return Err(ConfigError::Validation(format!(
                "pubsuber.master_topic {:?} would be consumed again by its own topic filter {:?}",
                self.master_topic, self.topic
            )));
        }
        self.custom.validate("pubsuber")?;
        self.transport.validate("pubsuber")
    }
}

impl LauncherOptions {
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.startup_grace_duration()?;
        self.stop_timeout_duration()?;
        Ok(())
    }

    pub fn startup_grace_duration(&self) -> Result<Duration, ConfigError> {
        parse_duration_value("launcher.startup_grace", &self.startup_grace)
    }

    pub fn stop_timeout_duration(&self) -> Result<Duration, ConfigError> {
        parse_duration_value("launcher.stop_timeout", &self.stop_timeout)
    }
}

fn validate_url(role: &str, url: &str) -> Result<(), ConfigError> {
    if url.trim().is_empty() {
        return Err(ConfigError::Validation(format!(
            "{role}.url must not be empty"
        )));
    }
    Ok(())
}

pub(crate) fn validate_topic_root(field: &str, root: &str) -> Result<(), ConfigError> {
    if root.trim().is_empty() {
        return Err(ConfigError::Validation(format!(
            "{field} must not be empty"
        )));
    }
    if !root.is_ascii() || root.starts_with('/') || root.ends_with('/') || root.contains("//") {
        return Err(ConfigError::Validation(format!(
            "{field} must be an ascii '/'-delimited path, got {root:?}"
        )));
    }
    Ok(())
}

/// A sub id naming an event kind would make `<root>/<kind>/<sub_id>` parse as another kind.
pub(crate) fn validate_sub_id(field: &str, sub_id: &str) -> Result<(), ConfigError> {
    if sub_id.contains('/') {
        return Err(ConfigError::Validation(format!(
            "{field} must not contain '/'"
        )));
    }
    if EventKind::parse(sub_id).is_some() {
        let kinds = EventKind::ALL
            .iter()
            .map(|kind| kind.as_str())
            .collect::<Vec<&str>>()
            .join(", ");
        return Err(ConfigError::Validation(format!(
            "{field} {sub_id:?} must not be an event kind ({kinds})"
        )));
    }
    Ok(())
}

fn parse_duration_value(field: &str, raw: &str) -> Result<Duration, ConfigError> {
    humantime::parse_duration(raw).map_err(|err| {
        ConfigError::Validation(format!("{field} must be a valid duration string ({err})"))
    })
}
