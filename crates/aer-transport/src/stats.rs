use std::sync::atomic::{AtomicU64, Ordering};

/// Delivery counters shared between a socket handle and its tasks.
#[derive(Debug, Default)]
pub struct TransportStats {
    sent: AtomicU64,
    received: AtomicU64,
    dropped: AtomicU64,
    filtered: AtomicU64,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub sent: u64,
    pub received: u64,
    pub dropped: u64,
    pub filtered: u64,
}

impl TransportStats {
    pub(crate) fn record_sent(&self) {
        self.sent.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_received(&self) {
        self.received.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_dropped(&self) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_filtered(&self) {
        self.filtered.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            sent: self.sent.load(Ordering::Relaxed),
            received: self.received.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            filtered: self.filtered.load(Ordering::Relaxed),
        }
    }
}

impl StatsSnapshot {
    /// Fraction of offered messages that were not dropped.
    pub fn delivery_ratio(&self) -> f64 {
        let offered = self.sent + self.dropped;
        if offered == 0 {
            return 1.0;
        }
        self.sent as f64 / offered as f64
    }
}
