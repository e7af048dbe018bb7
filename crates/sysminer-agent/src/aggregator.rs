use sysminer_common::types::MetricBatch;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TryRecvError;

/// Bounded channel every collection worker publishes its batches to.
///
/// Capacity is twice the number of collectors, so each worker can have one
/// batch in flight while the previous one waits to be drained. A worker
/// that finds the channel full blocks until the next drain.
pub struct ResponseAggregator {
    tx: mpsc::Sender<MetricBatch>,
    rx: mpsc::Receiver<MetricBatch>,
    capacity: usize,
}

impl ResponseAggregator {
    pub fn new(collectors: usize) -> Self {
        let capacity = (collectors * 2).max(1);
        let (tx, rx) = mpsc::channel(capacity);
        Self {
            tx,
            rx,
            capacity,
        }
    }

    /// A publishing handle for one worker.
    pub fn sender(&self) -> mpsc::Sender<MetricBatch> {
        self.tx.clone()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Takes every batch that is ready right now, without waiting for
    /// workers that are still polling.
    pub fn drain(&mut self) -> Vec<MetricBatch> {
        let mut batches = Vec::new();
        loop {
            match self.rx.try_recv() {
                Ok(batch) => batches.push(batch),
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            }
        }
        batches
    }

    /// Refuses further publishes. Workers blocked on a full channel are
    /// released with an error and stop.
    pub fn close(&mut self) {
        self.rx.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capacity_is_twice_the_collectors() {
        assert_eq!(ResponseAggregator::new(3).capacity(), 6);
        assert_eq!(ResponseAggregator::new(0).capacity(), 1);
    }

    #[tokio::test]
    async fn drain_returns_only_what_is_ready() {
        let mut aggregator = ResponseAggregator::new(2);
        assert!(aggregator.drain().is_empty());

        let tx = aggregator.sender();
        tx.send(MetricBatch::new("cpu")).await.unwrap();
        tx.send(MetricBatch::new("memory")).await.unwrap();

        let names: Vec<String> = aggregator.drain().into_iter().map(|b| b.collector).collect();
        assert_eq!(names, ["cpu", "memory"]);
        assert!(aggregator.drain().is_empty());
    }

    #[tokio::test]
    async fn closing_rejects_publishers() {
        let mut aggregator = ResponseAggregator::new(1);
        let tx = aggregator.sender();
        assert!(tx.try_send(MetricBatch::new("cpu")).is_ok());
        aggregator.close();
        aggregator.close();
        assert!(tx.send(MetricBatch::new("cpu")).await.is_err());
    }
}
