use aer_config::{ConfigError, RoleKind, TransportConfig};
use aer_transport::SocketOptions;
use tokio_util::sync::CancellationToken;
use tracing::{info_span, Span};

/// Per-process state owned by a role entry point.
#[derive(Clone, Debug)]
pub struct RoleContext {
    kind: RoleKind,
    name: String,
    shutdown: CancellationToken,
}

impl RoleContext {
    pub fn new(kind: RoleKind, name: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn kind(&self) -> RoleKind {
        self.kind
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Requests a graceful stop of the role loop.
    pub fn cancel(&self) {
        self.shutdown.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    pub async fn cancelled(&self) {
        self.shutdown.cancelled().await
    }

    pub fn span(&self) -> Span {
        info_span!("role", role = %self.kind, name = %self.name)
    }
}

pub fn socket_options(cfg: &TransportConfig) -> Result<SocketOptions, ConfigError> {
    Ok(SocketOptions {
        queue: cfg.queue,
        max_message_bytes: cfg.max_message_bytes,
        reconnect: cfg.reconnect_duration()?,
        reconnect_max: cfg.reconnect_max_duration()?,
        linger: cfg.linger_duration()?,
        ..SocketOptions::default()
    })
}
