mod bound;
mod codec;
mod connect;
mod options;
mod stats;

use thiserror::Error;

pub use bound::{PeerGauge, PubSocket, SinkSocket};
pub use codec::{encode_multipart, Multipart, MultipartCodec, MAX_PARTS};
pub use connect::{PushSocket, SubSocket};
pub use options::{endpoint, SocketOptions};
pub use stats::{StatsSnapshot, TransportStats};

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },
}
