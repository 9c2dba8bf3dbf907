use std::fmt;

use crate::{EventKind, ProtocolError};

/// Routing key of the form `<root>/<kind>` or `<root>/<kind>/<sub_id>`.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Topic {
    root: String,
    kind: EventKind,
    sub_id: Option<String>,
}

impl Topic {
    pub fn new(root: impl Into<String>, kind: EventKind) -> Self {
        Self {
            root: root.into(),
            kind,
            sub_id: None,
        }
    }

    pub fn with_sub_id(mut self, sub_id: impl Into<String>) -> Self {
        let sub_id = sub_id.into();
        self.sub_id = if sub_id.is_empty() {
            None
        } else {
            Some(sub_id)
        };
        self
    }

    pub fn parse(raw: &str) -> Result<Self, ProtocolError> {
        if !raw.is_ascii() {
            return Err(ProtocolError::InvalidTopic(raw.to_string()));
        }

        let segments = raw.split('/').collect::<Vec<&str>>();
        if segments.len() < 2 || segments.iter().any(|segment| segment.is_empty()) {
            return Err(ProtocolError::InvalidTopic(raw.to_string()));
        }

        let last = segments.len() - 1;
        if let Some(kind) = EventKind::parse(segments[last]) {
            return Ok(Self {
                root: segments[..last].join("/"),
                kind,
                sub_id: None,
            });
        }

        if segments.len() >= 3 {
            if let Some(kind) = EventKind::parse(segments[last - 1]) {
                return Ok(Self {
                    root: segments[..last - 1].join("/"),
                    kind,
                    sub_id: Some(segments[last].to_string()),
                });
            }
        }

        Err(ProtocolError::InvalidTopic(raw.to_string()))
    }

    pub fn root(&self) -> &str {
        &self.root
    }

    pub fn kind(&self) -> EventKind {
        self.kind
    }

    pub fn sub_id(&self) -> Option<&str> {
        self.sub_id.as_deref()
    }

    /// Re-roots the topic while keeping kind and sub id.
    pub fn with_root(&self, root: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            kind: self.kind,
            sub_id: self.sub_id.clone(),
        }
    }

    /// Key used by savers to group batches of one device/session.
    pub fn identifier(&self) -> String {
        match &self.sub_id {
            Some(sub_id) => format!("{}/{}", self.root, sub_id),
            None => self.root.clone(),
        }
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.sub_id {
            Some(sub_id) => write!(f, "{}/{}/{}", self.root, self.kind, sub_id),
            None => write!(f, "{}/{}", self.root, self.kind),
        }
    }
}
