use sysminer_common::types::MetricBatch;
use sysminer_sink::Sink;

/// Hands each tick's batches to every sink in registration order.
///
/// Sinks are called one after another on the scheduler task, so a sink's
/// connection and retry queue are only ever touched from one place.
pub struct OutputDispatcher {
    sinks: Vec<Box<dyn Sink>>,
}

impl OutputDispatcher {
    pub fn new(sinks: Vec<Box<dyn Sink>>) -> Self {
        Self { sinks }
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }

    pub fn names(&self) -> Vec<&str> {
        self.sinks.iter().map(|s| s.name()).collect()
    }

    /// Delivers to every sink, returning how many reported an error.
    /// One sink failing never keeps the others from receiving the batches.
    pub async fn dispatch(&mut self, batches: &[MetricBatch]) -> usize {
        let mut failures = 0;
        for sink in &mut self.sinks {
            if let Err(e) = sink.send(batches).await {
                failures += 1;
                tracing::warn!(sink = sink.name(), error = %format!("{e:#}"), "Failed to deliver metrics");
            }
        }
        failures
    }

    pub fn into_sinks(self) -> Vec<Box<dyn Sink>> {
        self.sinks
    }
}
