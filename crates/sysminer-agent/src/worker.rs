use crate::aggregator::ResponseAggregator;
use crate::error::{AgentError, Result};
use std::sync::mpsc::{sync_channel, Receiver, SyncSender, TrySendError};
use std::sync::Arc;
use std::thread;
use sysminer_collector::Collector;
use sysminer_common::stats::RuntimeStats;
use sysminer_common::types::MetricBatch;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;

/// Outcome of offering a poll request to a worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    /// The worker was idle and picked the request up.
    Sent,
    /// The worker is still busy with an earlier request.
    Busy,
    /// The worker has exited or its request channel was closed.
    Stopped,
}

/// A dedicated OS thread that owns one collector and polls it on request.
///
/// Requests travel over a rendezvous channel: a request is only accepted
/// while the thread is parked waiting for one, so a slow collector can
/// never accumulate a backlog of polls.
pub struct CollectionWorker {
    name: String,
    requests: Option<SyncSender<()>>,
    returned: Option<oneshot::Receiver<Box<dyn Collector>>>,
}

impl CollectionWorker {
    pub fn spawn(
        collector: Box<dyn Collector>,
        results: mpsc::Sender<MetricBatch>,
        stats: Arc<RuntimeStats>,
    ) -> Result<Self> {
        let name = collector.name().to_string();
        let (request_tx, request_rx) = sync_channel(0);
        let (return_tx, return_rx) = oneshot::channel();

        let thread_name = name.clone();
        thread::Builder::new()
            .name(format!("collector-{name}"))
            .spawn(move || run(thread_name, collector, request_rx, results, stats, return_tx))
            .map_err(|source| AgentError::WorkerSpawn {
                name: name.clone(),
                source,
            })?;

        Ok(Self {
            name,
            requests: Some(request_tx),
            returned: Some(return_rx),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Offers one poll request without blocking.
    pub fn try_request(&self) -> Dispatch {
        let Some(requests) = &self.requests else {
            return Dispatch::Stopped;
        };
        match requests.try_send(()) {
            Ok(()) => Dispatch::Sent,
            Err(TrySendError::Full(())) => Dispatch::Busy,
            Err(TrySendError::Disconnected(())) => Dispatch::Stopped,
        }
    }

    /// Closes the request channel. The worker exits once its current poll,
    /// if any, has finished.
    pub fn close(&mut self) {
        self.requests = None;
    }

    /// Waits until `deadline` for the worker to exit and hand its collector
    /// back. Returns `None` if it is still stuck in `poll` or has died.
    pub async fn finish(&mut self, deadline: Instant) -> Option<Box<dyn Collector>> {
        self.close();
        let returned = self.returned.take()?;
        match tokio::time::timeout_at(deadline, returned).await {
            Ok(Ok(collector)) => Some(collector),
            Ok(Err(_)) => {
                tracing::error!(collector = %self.name, "Collection worker exited abnormally");
                None
            }
            Err(_) => {
                tracing::warn!(collector = %self.name, "Collection worker did not stop in time, leaking it");
                None
            }
        }
    }
}

fn run(
    name: String,
    mut collector: Box<dyn Collector>,
    requests: Receiver<()>,
    results: mpsc::Sender<MetricBatch>,
    stats: Arc<RuntimeStats>,
    done: oneshot::Sender<Box<dyn Collector>>,
) {
    tracing::debug!(collector = %name, "Collection worker started");
    while requests.recv().is_ok() {
        match collector.poll() {
            Ok(batch) => {
                stats.record_batch();
                if results.blocking_send(batch).is_err() {
                    tracing::debug!(collector = %name, "Aggregator closed, stopping worker");
                    break;
                }
            }
            Err(e) => {
                stats.record_collection_failure();
                tracing::warn!(collector = %name, error = %format!("{e:#}"), "Collection failed");
            }
        }
    }
    tracing::debug!(collector = %name, "Collection worker stopped");
    // The coordinator may have given up waiting already
    let _ = done.send(collector);
}

/// The workers of every configured collector, in registration order.
pub struct WorkerPool {
    workers: Vec<CollectionWorker>,
}

impl WorkerPool {
    pub fn spawn(
        collectors: Vec<Box<dyn Collector>>,
        aggregator: &ResponseAggregator,
        stats: &Arc<RuntimeStats>,
    ) -> Result<Self> {
        let mut workers = Vec::with_capacity(collectors.len());
        for collector in collectors {
            workers.push(CollectionWorker::spawn(
                collector,
                aggregator.sender(),
                Arc::clone(stats),
            )?);
        }
        Ok(Self { workers })
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &CollectionWorker> {
        self.workers.iter()
    }

    pub fn names(&self) -> Vec<&str> {
        self.workers.iter().map(|w| w.name()).collect()
    }

    pub fn close_all(&mut self) {
        for worker in &mut self.workers {
            worker.close();
        }
    }

    /// Collects every worker's collector back, sharing one deadline.
    /// Leaked workers yield `None` in their slot.
    pub async fn finish_all(&mut self, deadline: Instant) -> Vec<(String, Option<Box<dyn Collector>>)> {
        let mut collectors = Vec::with_capacity(self.workers.len());
        for worker in &mut self.workers {
            let collector = worker.finish(deadline).await;
            collectors.push((worker.name().to_string(), collector));
        }
        collectors
    }
}
