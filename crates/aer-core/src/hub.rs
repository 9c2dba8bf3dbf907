use std::net::SocketAddr;
use std::time::Duration;

use aer_config::HubOptions;
use aer_transport::{endpoint, PeerGauge, PubSocket, SinkSocket};
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};

use crate::{socket_options, RoleContext, RoleError};

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct HubReport {
    pub received: u64,
    /// Messages handed to at least one subscriber.
    pub forwarded: u64,
    pub dropped: u64,
}

/// Fans publisher messages in and forwards them to every subscriber.
pub struct Hub {
    inbound: SinkSocket,
    outbound: PubSocket,
    stats_interval: Duration,
}

impl Hub {
    pub async fn bind(options: &HubOptions) -> Result<Self, RoleError> {
        let transport = socket_options(&options.transport)?;
        let stats_interval = options.stats_interval_duration()?;
        let inbound = SinkSocket::bind(
            &endpoint(&options.url, options.publisher_port),
            transport.clone(),
        )
        .await?;
        let outbound =
            PubSocket::bind(&endpoint(&options.url, options.subscriber_port), transport).await?;
        Ok(Self {
            inbound,
            outbound,
            stats_interval,
        })
    }

    /// Endpoint publishers connect to.
    pub fn inbound_addr(&self) -> SocketAddr {
        self.inbound.local_addr()
    }

    /// Endpoint subscribers connect to.
    pub fn outbound_addr(&self) -> SocketAddr {
        self.outbound.local_addr()
    }

    pub fn subscriber_gauge(&self) -> PeerGauge {
        self.outbound.peer_gauge()
    }

    pub async fn run(self, ctx: RoleContext) -> Result<HubReport, RoleError> {
        let Self {
            mut inbound,
            outbound,
            stats_interval,
        } = self;
        info!(
            inbound = %inbound.local_addr(),
            outbound = %outbound.local_addr(),
            "hub running"
        );

        let mut ticker = tokio::time::interval(stats_interval.max(Duration::from_millis(10)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        ticker.tick().await;

        let mut report = HubReport::default();
        loop {
            tokio::select! {
                _ = ctx.cancelled() => break,
                message = inbound.recv() => {
                    let Some(message) = message else {
                        warn!("hub inbound closed");
                        break;
                    };
                    report.received += 1;
                    if outbound.send(message) > 0 {
                        report.forwarded += 1;
                    } else {
                        report.dropped += 1;
                    }
                }
                _ = ticker.tick() => {
                    info!(
                        received = report.received,
                        forwarded = report.forwarded,
                        dropped = report.dropped,
                        subscribers = outbound.peer_count(),
                        delivery_ratio = outbound.stats().delivery_ratio(),
                        "hub stats"
                    );
                }
            }
        }

        inbound.close().await;
        outbound.close().await;
        info!(
            received = report.received,
            forwarded = report.forwarded,
            dropped = report.dropped,
            "hub stopped"
        );
        Ok(report)
    }
}
