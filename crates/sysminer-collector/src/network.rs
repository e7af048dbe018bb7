use crate::{field_value, per_second, proc_path, read_proc_file, Collector, DEFAULT_PROC_PATH};
use anyhow::Result;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashSet};
use std::path::PathBuf;
use std::time::Instant;
use sysminer_common::context::ModuleContext;
use sysminer_common::error::ModuleError;
use sysminer_common::settings::ModuleSettings;
use sysminer_common::types::{Metric, MetricBatch};

pub const NAME: &str = "network";

/// Counter columns of `/proc/net/dev`, in file order.
pub const COLUMNS: [&str; 16] = [
    "rx_bytes",
    "rx_packets",
    "rx_errs",
    "rx_drop",
    "rx_fifo",
    "rx_frame",
    "rx_compressed",
    "rx_multicast",
    "tx_bytes",
    "tx_packets",
    "tx_errs",
    "tx_drop",
    "tx_fifo",
    "tx_colls",
    "tx_carrier",
    "tx_compressed",
];

/// Cumulative counters of one interface, indexed like [`COLUMNS`].
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct InterfaceCounters([f64; COLUMNS.len()]);

impl InterfaceCounters {
    #[cfg(test)]
    fn get(&self, column: &str) -> Option<f64> {
        COLUMNS
            .iter()
            .position(|c| *c == column)
            .map(|i| self.0[i])
    }

    fn fields(&self) -> impl Iterator<Item = (&'static str, f64)> + '_ {
        COLUMNS.iter().copied().zip(self.0.iter().copied())
    }
}

/// Parses `/proc/net/dev`. The two header lines and malformed rows are
/// skipped.
pub fn parse_net_dev(content: &str) -> BTreeMap<String, InterfaceCounters> {
    let mut interfaces = BTreeMap::new();
    for line in content.lines() {
        // `eth0:1234` has no space after the colon once counters get large
        let Some((name, counters)) = line.split_once(':') else {
            continue;
        };
        let fields: Vec<&str> = counters.split_whitespace().collect();
        if fields.len() != COLUMNS.len() {
            continue;
        }
        let mut values = [0.0; COLUMNS.len()];
        for (slot, field) in values.iter_mut().zip(fields) {
            *slot = field_value(field);
        }
        interfaces.insert(name.trim().to_string(), InterfaceCounters(values));
    }
    interfaces
}

struct Snapshot {
    taken: Instant,
    interfaces: BTreeMap<String, InterfaceCounters>,
}

/// Per-interface traffic and error counters in units per second.
pub struct NetworkCollector {
    proc_path: PathBuf,
    interfaces: Option<HashSet<String>>,
    previous: Option<Snapshot>,
}

impl NetworkCollector {
    pub fn new() -> Self {
        Self {
            proc_path: PathBuf::from(DEFAULT_PROC_PATH),
            interfaces: None,
            previous: None,
        }
    }

    fn read_counters(&self) -> Result<BTreeMap<String, InterfaceCounters>> {
        let content = read_proc_file(&self.proc_path, "net/dev")?;
        let mut interfaces = parse_net_dev(&content);
        if let Some(wanted) = &self.interfaces {
            interfaces.retain(|name, _| wanted.contains(name));
        }
        Ok(interfaces)
    }

    fn sample(
        &mut self,
        interfaces: BTreeMap<String, InterfaceCounters>,
        taken: Instant,
        now: DateTime<Utc>,
    ) -> MetricBatch {
        let mut batch = MetricBatch::new(NAME);

        if let Some(previous) = &self.previous {
            let elapsed = taken.duration_since(previous.taken).as_secs_f64();
            if elapsed > 0.0 {
                for (name, counters) in &interfaces {
                    // Interfaces that appeared since the last poll have nothing to diff against
                    let Some(prev) = previous.interfaces.get(name) else {
                        continue;
                    };
                    for ((field, current), (_, before)) in counters.fields().zip(prev.fields()) {
                        let rate = per_second(before, current, elapsed);
                        batch.push(Metric::at(format!("{name}.{field}"), rate, now));
                    }
                }
            }
        }

        self.previous = Some(Snapshot { taken, interfaces });
        batch
    }
}

impl Default for NetworkCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl Collector for NetworkCollector {
    fn name(&self) -> &str {
        NAME
    }

    fn init(&mut self, _ctx: &ModuleContext, settings: &ModuleSettings) -> Result<(), ModuleError> {
        self.proc_path = proc_path(settings)?;
        self.interfaces = settings
            .optional_string_array("interfaces")?
            .map(|names| names.into_iter().collect());
        Ok(())
    }

    fn poll(&mut self) -> Result<MetricBatch> {
        let counters = self.read_counters()?;
        Ok(self.sample(counters, Instant::now(), Utc::now()))
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

    const NET_DEV: &str = "\
Inter-|   Receive                                                |  Transmit
 face |bytes    packets errs drop fifo frame compressed multicast|bytes    packets errs drop fifo colls carrier compressed
    lo:  123456    1000    0    0    0     0          0         0   123456    1000    0    0    0     0       0          0
  eth0:1000000    5000    2   17    0     1          0        40   400000    3000    0    3    0     0       0          0
";

    fn counters(rx_bytes: f64, tx_bytes: f64) -> InterfaceCounters {
        let mut values = [0.0; COLUMNS.len()];
        values[0] = rx_bytes;
        values[8] = tx_bytes;
        InterfaceCounters(values)
    }

    fn snapshot(entries: &[(&str, InterfaceCounters)]) -> BTreeMap<String, InterfaceCounters> {
        entries.iter().map(|(n, c)| (n.to_string(), *c)).collect()
    }

    #[test]
    fn parses_every_column() {
        let interfaces = parse_net_dev(NET_DEV);
        assert_eq!(interfaces.len(), 2);

        let eth0 = &interfaces["eth0"];
        assert_eq!(eth0.get("rx_bytes"), Some(1_000_000.0));
        assert_eq!(eth0.get("rx_errs"), Some(2.0));
        assert_eq!(eth0.get("rx_drop"), Some(17.0));
        assert_eq!(eth0.get("rx_frame"), Some(1.0));
        assert_eq!(eth0.get("rx_multicast"), Some(40.0));
        assert_eq!(eth0.get("tx_bytes"), Some(400_000.0));
        assert_eq!(eth0.get("tx_drop"), Some(3.0));
        assert_eq!(eth0.get("tx_carrier"), Some(0.0));
        assert_eq!(eth0.get("nonsense"), None);
    }

    #[test]
    fn first_sample_only_primes_state() {
        let mut collector = NetworkCollector::new();
        let batch = collector.sample(snapshot(&[("eth0", counters(1000.0, 500.0))]), Instant::now(), Utc::now());
        assert!(batch.is_empty());
    }

    #[test]
    fn rates_are_divided_by_elapsed_seconds() {
        let mut collector = NetworkCollector::new();
        let start = Instant::now();
        collector.sample(snapshot(&[("eth0", counters(1000.0, 500.0))]), start, Utc::now());

        let batch = collector.sample(
            snapshot(&[("eth0", counters(3000.0, 900.0))]),
            start + Duration::from_secs(4),
            Utc::now(),
        );

        assert_eq!(batch.get("eth0.rx_bytes").unwrap().value, 500.0);
        assert_eq!(batch.get("eth0.tx_bytes").unwrap().value, 100.0);
        assert_eq!(batch.get("eth0.rx_drop").unwrap().value, 0.0);
        assert_eq!(batch.len(), COLUMNS.len());
    }

    #[test]
    fn new_interfaces_wait_for_a_second_sample() {
        let mut collector = NetworkCollector::new();
        let start = Instant::now();
        collector.sample(snapshot(&[("eth0", counters(0.0, 0.0))]), start, Utc::now());

        let batch = collector.sample(
            snapshot(&[("eth0", counters(10.0, 10.0)), ("wg0", counters(99.0, 99.0))]),
            start + Duration::from_secs(1),
            Utc::now(),
        );
        assert!(batch.get("wg0.rx_bytes").is_none());
        assert_eq!(batch.get("eth0.rx_bytes").unwrap().value, 10.0);
    }

    #[test]
    fn polls_fake_proc_and_honours_interface_filter() {
        let proc = testutil::proc_with("net/dev", NET_DEV);
        let mut collector = NetworkCollector::new();
        let ctx = ModuleContext::new(Duration::from_secs(10), "test");
        let settings = ModuleSettings::new()
            .with("proc_path", proc.path().to_str().unwrap())
            .with("interfaces", vec!["eth0"]);
        collector.init(&ctx, &settings).unwrap();

        assert!(collector.poll().unwrap().is_empty());

        let grown = NET_DEV.replace("  eth0:1000000    5000    2   17", "  eth0:1000000    5000    2   27");
        testutil::write(proc.path(), "net/dev", &grown);
        std::thread::sleep(Duration::from_millis(20));

        let batch = collector.poll().unwrap();
        assert_eq!(batch.len(), COLUMNS.len());
        assert!(batch.get("lo.rx_bytes").is_none());
        assert!(batch.get("eth0.rx_drop").unwrap().value > 0.0);
        assert_eq!(batch.get("eth0.rx_bytes").unwrap().value, 0.0);
    }

    #[test]
    fn missing_proc_file_is_a_poll_error() {
        let proc = tempfile::tempdir().unwrap();
        let mut collector = NetworkCollector::new();
        let ctx = ModuleContext::new(Duration::from_secs(10), "test");
        let settings = ModuleSettings::new().with("proc_path", proc.path().to_str().unwrap());
        collector.init(&ctx, &settings).unwrap();
        assert!(collector.poll().is_err());
    }
}
