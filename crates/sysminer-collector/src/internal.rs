use crate::{proc_path, read_proc_file, Collector, DEFAULT_PROC_PATH};
use anyhow::Result;
use chrono::Utc;
use std::path::PathBuf;
use std::sync::Arc;
use sysminer_common::context::ModuleContext;
use sysminer_common::error::ModuleError;
use sysminer_common::settings::ModuleSettings;
use sysminer_common::stats::{RuntimeStats, StatsSnapshot};
use sysminer_common::types::{Metric, MetricBatch};

pub const NAME: &str = "internal";

/// Memory and thread figures of the agent process itself.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ProcessStatus {
    pub rss_bytes: Option<f64>,
    pub vsize_bytes: Option<f64>,
    pub threads: Option<f64>,
}

/// Parses the fields of `/proc/self/status` the agent reports on.
pub fn parse_status(content: &str) -> ProcessStatus {
    let mut status = ProcessStatus::default();
    for line in content.lines() {
        let Some((key, raw)) = line.split_once(':') else {
            continue;
        };
        let mut columns = raw.split_whitespace();
        let Some(Ok(value)) = columns.next().map(str::parse::<f64>) else {
            continue;
        };
        let value = if columns.next() == Some("kB") {
            value * 1024.0
        } else {
            value
        };
        match key {
            "VmRSS" => status.rss_bytes = Some(value),
            "VmSize" => status.vsize_bytes = Some(value),
            "Threads" => status.threads = Some(value),
            _ => {}
        }
    }
    status
}

/// Reports the agent's own footprint and how its pipeline is behaving.
///
/// Counter metrics are per-poll deltas of [`RuntimeStats`], so like every
/// other rate they only appear from the second poll on.
pub struct InternalCollector {
    proc_path: PathBuf,
    stats: Arc<RuntimeStats>,
    previous: Option<StatsSnapshot>,
}

impl InternalCollector {
    pub fn new() -> Self {
        Self {
            proc_path: PathBuf::from(DEFAULT_PROC_PATH),
            stats: Arc::new(RuntimeStats::new()),
            previous: None,
        }
    }
}

impl Default for InternalCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl Collector for InternalCollector {
    fn name(&self) -> &str {
        NAME
    }

    fn init(&mut self, ctx: &ModuleContext, settings: &ModuleSettings) -> Result<(), ModuleError> {
        self.proc_path = proc_path(settings)?;
        self.stats = Arc::clone(&ctx.stats);
        Ok(())
    }

    fn poll(&mut self) -> Result<MetricBatch> {
        let now = Utc::now();
        let mut batch = MetricBatch::new(NAME);

        match read_proc_file(&self.proc_path, "self/status") {
            Ok(content) => {
                let status = parse_status(&content);
                for (name, value) in [
                    ("process.rss", status.rss_bytes),
                    ("process.vsize", status.vsize_bytes),
                    ("process.threads", status.threads),
                ] {
                    if let Some(value) = value {
                        batch.push(Metric::at(name, value, now));
                    }
                }
            }
            Err(e) => tracing::debug!(error = %e, "Process status unavailable"),
        }

        let current = self.stats.snapshot();
        if let Some(previous) = &self.previous {
            for ((name, value), (_, before)) in current.counters().into_iter().zip(previous.counters()) {
                batch.push(Metric::at(
                    format!("agent.{name}"),
                    value.saturating_sub(before) as f64,
                    now,
                ));
            }
        }
        self.previous = Some(current);

        Ok(batch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    const STATUS: &str = "Name:\tsysminerd\nVmSize:\t  2048 kB\nVmRSS:\t   512 kB\nThreads:\t7\n";

    #[test]
    fn parses_memory_and_threads() {
        let status = parse_status(STATUS);
        assert_eq!(status.vsize_bytes, Some(2048.0 * 1024.0));
        assert_eq!(status.rss_bytes, Some(512.0 * 1024.0));
        assert_eq!(status.threads, Some(7.0));
    }

    #[test]
    fn counters_are_reported_as_deltas_from_second_poll() {
        let dir = crate::testutil::proc_with("self/status", STATUS);
        let ctx = ModuleContext::new(Duration::from_secs(10), "test");
        let settings = ModuleSettings::new().with("proc_path", dir.path().to_str().unwrap());
        let mut collector = InternalCollector::new();
        collector.init(&ctx, &settings).unwrap();

        ctx.stats.record_tick(false);
        let first = collector.poll().unwrap();
        assert!(first.get("agent.ticks").is_none());
        assert_eq!(first.get("process.threads").unwrap().value, 7.0);

        ctx.stats.record_tick(true);
        ctx.stats.record_tick(false);
        ctx.stats.record_dropped(4);
        let second = collector.poll().unwrap();
        assert_eq!(second.get("agent.ticks").unwrap().value, 2.0);
        assert_eq!(second.get("agent.tick_overruns").unwrap().value, 1.0);
        assert_eq!(second.get("agent.records_dropped").unwrap().value, 4.0);
        assert_eq!(second.get("agent.records_sent").unwrap().value, 0.0);
    }

    #[test]
    fn missing_status_file_is_not_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = ModuleContext::new(Duration::from_secs(10), "test");
        let settings = ModuleSettings::new().with("proc_path", dir.path().to_str().unwrap());
        let mut collector = InternalCollector::new();
        collector.init(&ctx, &settings).unwrap();
        assert!(collector.poll().unwrap().is_empty());
    }
}
