use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A single point-in-time measurement produced by a collector.
///
/// The name is local to the collector (e.g. `"User"`, `"eth0.rx_bytes"`);
/// sinks qualify it with the collector name and their own prefix.
///
/// # Examples
///
/// ```
/// use sysminer_common::types::Metric;
///
/// let metric = Metric::new("shortterm", 0.42);
/// assert_eq!(metric.name, "shortterm");
/// assert_eq!(metric.value, 0.42);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metric {
    pub name: String,
    pub value: f64,
    pub timestamp: DateTime<Utc>,
}

impl Metric {
    /// Creates a metric stamped with the current time.
    pub fn new(name: impl Into<String>, value: f64) -> Self {
        Self::at(name, value, Utc::now())
    }

    pub fn at(name: impl Into<String>, value: f64, timestamp: DateTime<Utc>) -> Self {
        Self {
            name: name.into(),
            value,
            timestamp,
        }
    }
}

/// Metrics produced by one collector in one poll.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricBatch {
    pub collector: String,
    pub metrics: Vec<Metric>,
}

impl MetricBatch {
    pub fn new(collector: impl Into<String>) -> Self {
        Self {
            collector: collector.into(),
            metrics: Vec::new(),
        }
    }

    pub fn with_metrics(collector: impl Into<String>, metrics: Vec<Metric>) -> Self {
        Self {
            collector: collector.into(),
            metrics,
        }
    }

    pub fn push(&mut self, metric: Metric) {
        self.metrics.push(metric);
    }

    pub fn len(&self) -> usize {
        self.metrics.len()
    }

    pub fn is_empty(&self) -> bool {
        self.metrics.is_empty()
    }

    /// Looks up a metric by its collector-local name.
    pub fn get(&self, name: &str) -> Option<&Metric> {
        self.metrics.iter().find(|m| m.name == name)
    }
}
