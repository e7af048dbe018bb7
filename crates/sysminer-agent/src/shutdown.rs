use crate::aggregator::ResponseAggregator;
use crate::dispatcher::OutputDispatcher;
use crate::worker::WorkerPool;
use std::time::Duration;
use tokio::time::Instant;

/// Outcome of tearing the pipeline down, module names in registration order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShutdownReport {
    /// Modules whose teardown succeeded.
    pub torn_down: Vec<String>,
    /// Modules whose teardown returned an error.
    pub failed: Vec<String>,
    /// Collectors whose worker never returned within the grace period.
    pub leaked: Vec<String>,
}

impl ShutdownReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty() && self.leaked.is_empty()
    }
}

/// Stops workers and releases every module once the scheduler has exited.
pub struct ShutdownCoordinator {
    grace: Duration,
}

impl ShutdownCoordinator {
    pub fn new(grace: Duration) -> Self {
        Self { grace }
    }

    /// Closes all request channels, then the aggregator, then tears down
    /// collectors followed by sinks. A failing teardown never prevents the
    /// remaining ones.
    pub async fn shutdown(
        &self,
        mut workers: WorkerPool,
        mut aggregator: ResponseAggregator,
        dispatcher: OutputDispatcher,
    ) -> ShutdownReport {
        let mut report = ShutdownReport::default();

        workers.close_all();
        aggregator.close();
        let abandoned = aggregator.drain();
        if !abandoned.is_empty() {
            tracing::debug!(batches = abandoned.len(), "Discarding batches collected after the last tick");
        }

        let deadline = Instant::now() + self.grace;
        for (name, collector) in workers.finish_all(deadline).await {
            let Some(mut collector) = collector else {
                report.leaked.push(name);
                continue;
            };
            match collector.teardown() {
                Ok(()) => report.torn_down.push(name),
                Err(e) => {
                    tracing::warn!(collector = %name, error = %format!("{e:#}"), "Collector teardown failed");
                    report.failed.push(name);
                }
            }
        }

        for mut sink in dispatcher.into_sinks() {
            let name = sink.name().to_string();
            match sink.teardown().await {
                Ok(()) => report.torn_down.push(name),
                Err(e) => {
                    tracing::warn!(sink = %name, error = %format!("{e:#}"), "Sink teardown failed");
                    report.failed.push(name);
                }
            }
        }

        tracing::info!(
            torn_down = report.torn_down.len(),
            failed = report.failed.len(),
            leaked = report.leaked.len(),
            "Modules shut down"
        );
        report
    }
}
