use crate::{field_value, proc_path, read_proc_file, Collector, DEFAULT_PROC_PATH};
use anyhow::Result;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::path::PathBuf;
use sysminer_common::context::ModuleContext;
use sysminer_common::error::ModuleError;
use sysminer_common::settings::ModuleSettings;
use sysminer_common::types::{Metric, MetricBatch};

pub const NAME: &str = "cpu";

/// Column names of a `cpu` line in `/proc/stat`, in file order.
const FIELDS: [&str; 10] = [
    "User",
    "Nice",
    "System",
    "Idle",
    "IOWait",
    "IRQ",
    "SoftIRQ",
    "Steal",
    "Guest",
    "GuestNice",
];

/// Raw jiffy counters for one CPU line.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct CpuTimes {
    fields: [f64; 10],
}

impl CpuTimes {
    pub fn from_fields(fields: [f64; 10]) -> Self {
        Self { fields }
    }

    pub fn total(&self) -> f64 {
        self.fields.iter().sum()
    }
}

/// Parses every `cpu*` line of `/proc/stat`, keyed by its label
/// (`"cpu"` for the aggregate, `"cpu0"`, `"cpu1"`, ... per core).
///
/// Kernels that report fewer columns leave the trailing fields at zero.
pub fn parse_proc_stat(content: &str) -> BTreeMap<String, CpuTimes> {
    let mut cpus = BTreeMap::new();
    for line in content.lines() {
        let mut columns = line.split_whitespace();
        let Some(label) = columns.next() else {
            continue;
        };
        if !label.starts_with("cpu") {
            continue;
        }
        let mut times = CpuTimes::default();
        for (slot, column) in times.fields.iter_mut().zip(columns) {
            *slot = field_value(column);
        }
        cpus.insert(label.to_string(), times);
    }
    cpus
}

/// Reports the share of elapsed jiffies spent in each CPU state.
pub struct CpuCollector {
    proc_path: PathBuf,
    previous: Option<BTreeMap<String, CpuTimes>>,
}

impl CpuCollector {
    pub fn new() -> Self {
        Self {
            proc_path: PathBuf::from(DEFAULT_PROC_PATH),
            previous: None,
        }
    }

    /// Diffs `current` against the last snapshot and stores it for the next
    /// call. The first call only primes the snapshot.
    fn sample(&mut self, current: BTreeMap<String, CpuTimes>, now: DateTime<Utc>) -> MetricBatch {
        let mut batch = MetricBatch::new(NAME);

        if let Some(previous) = &self.previous {
            for (cpu, times) in &current {
                let Some(prev) = previous.get(cpu) else {
                    continue;
                };
                let elapsed = times.total() - prev.total();
                if elapsed <= 0.0 {
                    continue;
                }
                for (i, field) in FIELDS.iter().enumerate() {
                    let share = (times.fields[i] - prev.fields[i]) / elapsed * 100.0;
                    let name = if cpu == "cpu" {
                        (*field).to_string()
                    } else {
                        format!("{cpu}.{field}")
                    };
                    batch.push(Metric::at(name, share, now));
                }
            }
        }

        self.previous = Some(current);
        batch
    }
}

impl Default for CpuCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl Collector for CpuCollector {
    fn name(&self) -> &str {
        NAME
    }

    fn init(&mut self, _ctx: &ModuleContext, settings: &ModuleSettings) -> Result<(), ModuleError> {
        self.proc_path = proc_path(settings)?;
        Ok(())
    }

    fn poll(&mut self) -> Result<MetricBatch> {
        let content = read_proc_file(&self.proc_path, "stat")?;
        Ok(self.sample(parse_proc_stat(&content), Utc::now()))
    }

    fn teardown(&mut self) -> Result<()> {
        self.previous = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil;
    use std::time::Duration;

    const FIRST: &str = "cpu  100 0 0 900 0 0 0 0 0 0\n\
                         cpu0 100 0 0 900 0 0 0 0 0 0\n\
                         intr 12345 0 0\n";
    const SECOND: &str = "cpu  150 0 0 1350 0 0 0 0 0 0\n\
                          cpu0 150 0 0 1350 0 0 0 0 0 0\n\
                          intr 12400 0 0\n";

    fn collector_for(dir: &tempfile::TempDir) -> CpuCollector {
        let mut collector = CpuCollector::new();
        let ctx = ModuleContext::new(Duration::from_secs(10), "test");
        let settings = ModuleSettings::new().with("proc_path", dir.path().to_str().unwrap());
        collector.init(&ctx, &settings).unwrap();
        collector
    }

    #[test]
    fn parses_aggregate_and_core_lines() {
        let cpus = parse_proc_stat(FIRST);
        assert_eq!(cpus.len(), 2);
        assert_eq!(cpus["cpu"].total(), 1000.0);
        assert!(!cpus.contains_key("intr"));
    }

    #[test]
    fn short_lines_leave_trailing_fields_zero() {
        let cpus = parse_proc_stat("cpu 1 2 3 4\n");
        assert_eq!(
            cpus["cpu"],
            CpuTimes::from_fields([1.0, 2.0, 3.0, 4.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0])
        );
    }

    #[test]
    fn first_poll_emits_no_metrics() {
        let dir = testutil::proc_with("stat", FIRST);
        let mut collector = collector_for(&dir);
        let batch = collector.poll().unwrap();
        assert_eq!(batch.collector, "cpu");
        assert!(batch.is_empty());
    }

    #[test]
    fn second_poll_reports_share_of_elapsed_jiffies() {
        let dir = testutil::proc_with("stat", FIRST);
        let mut collector = collector_for(&dir);
        collector.poll().unwrap();

        testutil::write(dir.path(), "stat", SECOND);
        let batch = collector.poll().unwrap();

        // user went 100 -> 150 while the total advanced by 500 jiffies
        assert!((batch.get("User").unwrap().value - 10.0).abs() < 1e-9);
        assert!((batch.get("Idle").unwrap().value - 90.0).abs() < 1e-9);
        assert!((batch.get("cpu0.User").unwrap().value - 10.0).abs() < 1e-9);
        assert_eq!(batch.len(), 20);
    }

    #[test]
    fn read_failure_keeps_previous_snapshot() {
        let dir = testutil::proc_with("stat", FIRST);
        let mut collector = collector_for(&dir);
        collector.poll().unwrap();

        std::fs::remove_file(dir.path().join("stat")).unwrap();
        assert!(collector.poll().is_err());

        testutil::write(dir.path(), "stat", SECOND);
        let batch = collector.poll().unwrap();
        assert!((batch.get("User").unwrap().value - 10.0).abs() < 1e-9);
    }

    #[test]
    fn cpu_without_elapsed_jiffies_is_skipped() {
        let mut collector = CpuCollector::new();
        collector.sample(parse_proc_stat(FIRST), Utc::now());
        let batch = collector.sample(parse_proc_stat(FIRST), Utc::now());
        assert!(batch.is_empty());
    }
}
