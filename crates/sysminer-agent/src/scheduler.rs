use crate::aggregator::ResponseAggregator;
use crate::dispatcher::OutputDispatcher;
use crate::worker::{Dispatch, WorkerPool};
use std::sync::Arc;
use std::time::Duration;
use sysminer_common::stats::RuntimeStats;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// Share of the interval a tick may take before it is reported as overrun.
const OVERRUN_RATIO: f64 = 0.9;

/// What happened during one tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    /// Workers that accepted a poll request.
    pub dispatched: usize,
    /// Workers that were still busy (or gone) and got no request.
    pub skipped: usize,
    pub batches: usize,
    pub metrics: usize,
    pub elapsed: Duration,
    pub overrun: bool,
}

/// Drives collection and delivery on a fixed interval.
pub struct TickScheduler {
    interval: Duration,
    workers: WorkerPool,
    aggregator: ResponseAggregator,
    dispatcher: OutputDispatcher,
    stats: Arc<RuntimeStats>,
}

impl TickScheduler {
    pub fn new(
        interval: Duration,
        workers: WorkerPool,
        aggregator: ResponseAggregator,
        dispatcher: OutputDispatcher,
        stats: Arc<RuntimeStats>,
    ) -> Self {
        Self {
            interval,
            workers,
            aggregator,
            dispatcher,
            stats,
        }
    }

    /// Runs a single tick: request a poll from every idle worker, take
    /// whatever batches are ready and deliver them.
    ///
    /// Batches from workers that are still polling are picked up by a
    /// later tick. Sinks are called even with no batches so they can
    /// flush their retry queues.
    pub async fn tick(&mut self) -> TickReport {
        let start = Instant::now();
        let mut report = TickReport::default();

        for worker in self.workers.iter() {
            match worker.try_request() {
                Dispatch::Sent => report.dispatched += 1,
                Dispatch::Busy => {
                    report.skipped += 1;
                    self.stats.record_dispatch_skip();
                    tracing::warn!(collector = worker.name(), "Collector is falling behind, skipping this tick");
                }
                Dispatch::Stopped => {
                    report.skipped += 1;
                    self.stats.record_dispatch_skip();
                    tracing::warn!(collector = worker.name(), "Collector worker is no longer running");
                }
            }
        }

        let batches = self.aggregator.drain();
        report.batches = batches.len();
        report.metrics = batches.iter().map(|b| b.len()).sum();

        self.dispatcher.dispatch(&batches).await;

        report.elapsed = start.elapsed();
        report.overrun = report.elapsed.as_secs_f64() >= self.interval.as_secs_f64() * OVERRUN_RATIO;
        self.stats.record_tick(report.overrun);
        if report.overrun {
            tracing::warn!(
                elapsed_ms = report.elapsed.as_millis() as u64,
                interval_ms = self.interval.as_millis() as u64,
                "Tick took too long, collection is at risk of falling behind"
            );
        }
        tracing::debug!(
            dispatched = report.dispatched,
            skipped = report.skipped,
            batches = report.batches,
            metrics = report.metrics,
            elapsed_ms = report.elapsed.as_millis() as u64,
            "Tick complete"
        );
        report
    }

    /// Ticks until `cancel` fires, returning the number of ticks run.
    ///
    /// The first tick happens one interval after the call. Ticks missed
    /// while a slow tick was running are skipped rather than replayed.
    /// Cancellation is observed between ticks only.
    pub async fn run(&mut self, cancel: CancellationToken) -> u64 {
        let mut ticker = interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        tracing::info!(
            interval_secs = self.interval.as_secs_f64(),
            collectors = self.workers.len(),
            sinks = self.dispatcher.len(),
            "Starting collection loop"
        );

        let mut ticks = 0u64;
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    self.tick().await;
                    ticks += 1;
                }
            }
        }

        tracing::info!(ticks, "Collection loop stopped");
        ticks
    }

    pub fn into_parts(self) -> (WorkerPool, ResponseAggregator, OutputDispatcher) {
        (self.workers, self.aggregator, self.dispatcher)
    }
}
