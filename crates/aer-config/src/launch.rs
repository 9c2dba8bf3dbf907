use std::fmt;
use std::fs;
use std::path::Path;

use serde::Deserialize;
use toml_edit::{DocumentMut, Item, Value};

use crate::validate::{validate_sub_id, validate_topic_root};
use crate::{ConfigError, LauncherOptions};

pub const LAUNCHER_SECTION: &str = "launcher";
pub const IMPLICIT_HUB_NAME: &str = "DefaultHub";

/// Options consumed by the launcher itself and never rendered as flags.
const RESERVED_OPTIONS: [&str; 2] = ["program", "use_default"];

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RoleKind {
    Hub,
    Publisher,
    Subscriber,
    PubSuber,
    Saver,
}

impl RoleKind {
    /// Role type from the substring of an instance name.
    pub fn detect(instance: &str) -> Option<Self> {
        [
            ("PubSuber", Self::PubSuber),
            ("Publisher", Self::Publisher),
            ("Subscriber", Self::Subscriber),
            ("Saver", Self::Saver),
            ("Hub", Self::Hub),
        ]
        .into_iter()
        .find(|(needle, _)| instance.contains(needle))
        .map(|(_, kind)| kind)
    }

    /// Subcommand of the default role program.
    pub const fn subcommand(self) -> &'static str {
        match self {
            Self::Hub => "hub",
            Self::Publisher => "publisher",
            Self::Subscriber => "subscriber",
            Self::PubSuber => "pubsuber",
            Self::Saver => "saver",
        }
    }
}

impl fmt::Display for RoleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.subcommand())
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum OptionValue {
    String(String),
    Integer(i64),
    Float(f64),
    Bool(bool),
}

impl OptionValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(value) => Some(*value),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct RoleInstance {
    name: String,
    kind: RoleKind,
    options: Vec<(String, OptionValue)>,
    implicit: bool,
}

impl RoleInstance {
    pub fn new(name: impl Into<String>, kind: RoleKind) -> Self {
        Self {
            name: name.into(),
            kind,
            options: Vec::new(),
            implicit: false,
        }
    }

    fn implicit_hub() -> Self {
        Self {
            implicit: true,
            ..Self::new(IMPLICIT_HUB_NAME, RoleKind::Hub)
        }
    }

    pub fn with_option(mut self, key: impl Into<String>, value: OptionValue) -> Self {
        self.options.push((key.into(), value));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> RoleKind {
        self.kind
    }

    pub fn is_implicit(&self) -> bool {
        self.implicit
    }

    pub fn options(&self) -> &[(String, OptionValue)] {
        &self.options
    }

    pub fn get(&self, key: &str) -> Option<&OptionValue> {
        self.options
            .iter()
            .find(|(name, _)| name == key)
            .map(|(_, value)| value)
    }

    fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key)
            .and_then(OptionValue::as_str)
            .map(str::trim)
            .filter(|value| !value.is_empty())
    }

    /// Custom executable replacing the default role program.
    pub fn program(&self) -> Option<&str> {
        self.get_str("program")
    }

    pub fn uses_default(&self) -> bool {
        self.get("use_default")
            .and_then(OptionValue::as_bool)
            .unwrap_or(true)
    }

    /// Options rendered as `--kebab-name value` flags, in declaration order.
    pub fn render_flags(&self) -> Vec<String> {
        let mut flags = Vec::new();
        if self.get("name").is_none() {
            flags.push("--name".to_string());
            flags.push(self.name.clone());
        }

        for (key, value) in &self.options {
            if RESERVED_OPTIONS.contains(&key.as_str()) {
                continue;
            }
            let flag = format!("--{}", key.replace('_', "-"));
            match value {
                OptionValue::Bool(true) => flags.push(flag),
                OptionValue::Bool(false) => {}
                OptionValue::String(raw) => {
                    flags.push(flag);
                    flags.push(raw.clone());
                }
                OptionValue::Integer(raw) => {
                    flags.push(flag);
                    flags.push(raw.to_string());
                }
                OptionValue::Float(raw) => {
                    flags.push(flag);
                    flags.push(raw.to_string());
                }
            }
        }
        flags
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if let Some(program) = self.get("program") {
            if program.as_str().map(str::trim).unwrap_or("").is_empty() {
                return Err(self.invalid("program must be a non-empty string"));
            }
        }
        if let Some(flag) = self.get("use_default") {
            if flag.as_bool().is_none() {
                return Err(self.invalid("use_default must be a boolean"));
            }
        }

        let custom = self.get_str("custom_class").is_some();
        let takes_class = !matches!(self.kind, RoleKind::Hub | RoleKind::Saver);
        if !takes_class && self.program().is_none() {
            if self.get("custom_class").is_some() || self.get("custom_config").is_some() {
                return Err(self.invalid(&format!(
                    "{} roles have no custom_class, use program instead",
                    self.kind
                )));
            }
            if !self.uses_default() {
                return Err(self.invalid("use_default = false requires program"));
            }
        }
        if !self.uses_default() && self.program().is_none() && !custom {
            return Err(self.invalid("use_default = false requires custom_class or program"));
        }
        if custom && self.get_str("custom_config").is_none() {
            return Err(self.invalid("custom_class requires custom_config"));
        }

        match self.kind {
            RoleKind::Publisher => {
                let root = self
                    .get_str("master_topic")
                    .ok_or_else(|| self.invalid("missing required option master_topic"))?;
                validate_topic_root(&format!("{}.master_topic", self.name), root)?;
                if let Some(sub_id) = self.get_str("sub_id") {
                    validate_sub_id(&format!("{}.sub_id", self.name), sub_id)?;
                }
                if !custom && self.program().is_none() && self.get_str("device").is_none() {
                    return Err(self.invalid("missing required option device"));
                }
            }
            RoleKind::PubSuber => {
                let root = self
                    .get_str("master_topic")
                    .ok_or_else(|| self.invalid("missing required option master_topic"))?;
                validate_topic_root(&format!("{}.master_topic", self.name), root)?;
            }
            RoleKind::Saver => {
                if self.get_str("filename").is_none() {
                    return Err(self.invalid("missing required option filename"));
                }
            }
            RoleKind::Hub | RoleKind::Subscriber => {}
        }
        Ok(())
    }

    fn invalid(&self, reason: &str) -> ConfigError {
        ConfigError::Validation(format!("[{}] {}", self.name, reason))
    }
}

#[derive(Deserialize, Default)]
struct LauncherSection {
    #[serde(default)]
    launcher: LauncherOptions,
}

/// Ordered role instances of a launch file. The first role is always a hub.
#[derive(Clone, Debug, PartialEq)]
pub struct LaunchDescription {
    launcher: LauncherOptions,
    roles: Vec<RoleInstance>,
}

impl LaunchDescription {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path.as_ref()).map_err(ConfigError::Read)?;
        Self::parse(&raw)
    }

    pub fn parse(raw: &str) -> Result<Self, ConfigError> {
        let doc = raw.parse::<DocumentMut>().map_err(ConfigError::EditParse)?;
        let section: LauncherSection = toml::from_str(raw).map_err(ConfigError::Parse)?;
        section.launcher.validate()?;

        let mut roles = Vec::new();
        for (name, item) in doc.as_table().iter() {
            if name == LAUNCHER_SECTION {
                continue;
            }
            roles.push(parse_role(name, item)?);
        }

        Self::from_roles(section.launcher, roles)
    }

    pub fn from_roles(
        launcher: LauncherOptions,
        mut roles: Vec<RoleInstance>,
    ) -> Result<Self, ConfigError> {
        for role in &roles {
            role.validate()?;
        }
        if roles.first().map(RoleInstance::kind) != Some(RoleKind::Hub) {
            roles.insert(0, RoleInstance::implicit_hub());
        }
        Ok(Self { launcher, roles })
    }

    pub fn launcher(&self) -> &LauncherOptions {
        &self.launcher
    }

    pub fn roles(&self) -> &[RoleInstance] {
        &self.roles
    }
}

fn parse_role(name: &str, item: &Item) -> Result<RoleInstance, ConfigError> {
    let kind = RoleKind::detect(name).ok_or_else(|| {
        ConfigError::Validation(format!(
            "[{name}] does not name a role (expected Hub, Publisher, Subscriber, PubSuber or Saver)"
        ))
    })?;
    let table = item.as_table_like().ok_or_else(|| {
        ConfigError::Validation(format!("top-level key {name} must be a table"))
    })?;

    let mut role = RoleInstance::new(name, kind);
    for (key, value) in table.iter() {
        let value = value.as_value().ok_or_else(|| {
            ConfigError::Validation(format!("[{name}] {key} must be a scalar option"))
        })?;
        let value = match value {
            Value::String(raw) => OptionValue::String(raw.value().clone()),
            Value::Integer(raw) => OptionValue::Integer(*raw.value()),
            Value::Float(raw) => OptionValue::Float(*raw.value()),
            Value::Boolean(raw) => OptionValue::Bool(*raw.value()),
            Value::Datetime(_) | Value::Array(_) | Value::InlineTable(_) => {
                return Err(ConfigError::Validation(format!(
                    "[{name}] {key} must be a string, number or boolean"
                )));
            }
        };
        role.options.push((key.to_string(), value));
    }
    Ok(role)
}

/// Loads the JSON document handed to a registered custom class.
pub fn load_custom_config(path: impl AsRef<Path>) -> Result<serde_json::Value, ConfigError> {
    let path = path.as_ref();
    let raw = fs::read_to_string(path).map_err(|err| ConfigError::CustomConfig {
        path: path.display().to_string(),
        reason: err.to_string(),
    })?;
    serde_json::from_str(&raw).map_err(|err| ConfigError::CustomConfig {
        path: path.display().to_string(),
        reason: err.to_string(),
    })
}
