use std::sync::atomic::{AtomicU64, Ordering};

/// Process-wide counters describing how the agent itself is doing.
///
/// Shared through [`ModuleContext`](crate::context::ModuleContext) so the
/// scheduler, workers and sinks can record events and the `internal`
/// collector can report them.
#[derive(Debug, Default)]
pub struct RuntimeStats {
    ticks: AtomicU64,
    tick_overruns: AtomicU64,
    dispatch_skips: AtomicU64,
    batches_collected: AtomicU64,
    collection_failures: AtomicU64,
    records_sent: AtomicU64,
    records_dropped: AtomicU64,
    delivery_failures: AtomicU64,
}

/// Plain copy of [`RuntimeStats`] taken at one instant.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub ticks: u64,
    pub tick_overruns: u64,
    pub dispatch_skips: u64,
    pub batches_collected: u64,
    pub collection_failures: u64,
    pub records_sent: u64,
    pub records_dropped: u64,
    pub delivery_failures: u64,
}

impl StatsSnapshot {
    /// Named counters in a stable order, used for metric emission.
    pub fn counters(&self) -> [(&'static str, u64); 8] {
        [
            ("ticks", self.ticks),
            ("tick_overruns", self.tick_overruns),
            ("dispatch_skips", self.dispatch_skips),
            ("batches_collected", self.batches_collected),
            ("collection_failures", self.collection_failures),
            ("records_sent", self.records_sent),
            ("records_dropped", self.records_dropped),
            ("delivery_failures", self.delivery_failures),
        ]
    }
}

impl RuntimeStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_tick(&self, overrun: bool) {
        self.ticks.fetch_add(1, Ordering::Relaxed);
        if overrun {
            self.tick_overruns.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_dispatch_skip(&self) {
        self.dispatch_skips.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_batch(&self) {
        self.batches_collected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_collection_failure(&self) {
        self.collection_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_sent(&self, records: u64) {
        self.records_sent.fetch_add(records, Ordering::Relaxed);
    }

    pub fn record_dropped(&self, records: u64) {
        self.records_dropped.fetch_add(records, Ordering::Relaxed);
    }

    pub fn record_delivery_failure(&self) {
        self.delivery_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            ticks: self.ticks.load(Ordering::Relaxed),
            tick_overruns: self.tick_overruns.load(Ordering::Relaxed),
            dispatch_skips: self.dispatch_skips.load(Ordering::Relaxed),
            batches_collected: self.batches_collected.load(Ordering::Relaxed),
            collection_failures: self.collection_failures.load(Ordering::Relaxed),
            records_sent: self.records_sent.load(Ordering::Relaxed),
            records_dropped: self.records_dropped.load(Ordering::Relaxed),
            delivery_failures: self.delivery_failures.load(Ordering::Relaxed),
        }
    }
}
