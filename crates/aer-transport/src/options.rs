use std::cmp;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

#[derive(Clone, Debug)]
pub struct SocketOptions {
    /// Bounded per-peer (or per-socket) message queue.
    pub queue: usize,
    pub max_message_bytes: usize,
    pub reconnect: Duration,
    pub reconnect_max: Duration,
    pub dial_timeout: Duration,
    /// How long `close` keeps flushing queued messages.
    pub linger: Duration,
}

impl Default for SocketOptions {
    fn default() -> Self {
        Self {
            queue: 1024,
            max_message_bytes: 64 * 1024 * 1024,
            reconnect: Duration::from_millis(200),
            reconnect_max: Duration::from_secs(5),
            dial_timeout: Duration::from_secs(5),
            linger: Duration::from_secs(1),
        }
    }
}

impl SocketOptions {
    pub(crate) fn queue_len(&self) -> usize {
        self.queue.max(1)
    }
}

/// Renders `url` + `port` into a socket address string.
///
/// Accepts `tcp://host`, `host` and `*` (any interface).
pub fn endpoint(url: &str, port: u16) -> String {
    let host = url.trim().trim_start_matches("tcp://").trim_end_matches('/');
    let host = match host {
        "" | "*" => "0.0.0.0",
        "localhost" => "127.0.0.1",
        other => other,
    };
    format!("{host}:{port}")
}

pub(crate) async fn wait_backoff(
    shutdown: &CancellationToken,
    options: &SocketOptions,
    attempts: u32,
) {
    if attempts == 0 {
        return;
    }

    let wait = cmp::min(
        options.reconnect.saturating_mul(attempts),
        options.reconnect_max,
    );

    tokio::select! {
        _ = shutdown.cancelled() => {}
        _ = tokio::time::sleep(wait) => {}
    }
}
