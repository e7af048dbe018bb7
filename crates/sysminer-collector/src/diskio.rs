use crate::{field_value, per_second, proc_path, read_proc_file, Collector, DEFAULT_PROC_PATH};
use anyhow::Result;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Instant;
use sysminer_common::context::ModuleContext;
use sysminer_common::error::ModuleError;
use sysminer_common::settings::ModuleSettings;
use sysminer_common::types::{Metric, MetricBatch};

pub const NAME: &str = "diskusage";

/// Bytes per sector as reported by `/proc/diskstats`, independent of the
/// physical sector size.
const SECTOR_SIZE: f64 = 512.0;

/// Cumulative I/O counters of one block device.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct DiskStats {
    pub reads: f64,
    pub reads_merged: f64,
    pub read_sectors: f64,
    pub writes: f64,
    pub writes_merged: f64,
    pub write_sectors: f64,
}

/// Parses `/proc/diskstats`, skipping ramdisks and loop devices.
pub fn parse_diskstats(content: &str) -> BTreeMap<String, DiskStats> {
    let mut stats = BTreeMap::new();
    for line in content.lines() {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() < 14 {
            continue;
        }
        let device = fields[2];
        if device.starts_with("ram") || device.starts_with("loop") {
            continue;
        }
        stats.insert(
            device.to_string(),
            DiskStats {
                reads: field_value(fields[3]),
                reads_merged: field_value(fields[4]),
                read_sectors: field_value(fields[5]),
                writes: field_value(fields[7]),
                writes_merged: field_value(fields[8]),
                write_sectors: field_value(fields[9]),
            },
        );
    }
    stats
}

/// Per-device I/O operations and bytes per second.
pub struct DiskIoCollector {
    proc_path: PathBuf,
    previous: Option<(Instant, BTreeMap<String, DiskStats>)>,
}

impl DiskIoCollector {
    pub fn new() -> Self {
        Self {
            proc_path: PathBuf::from(DEFAULT_PROC_PATH),
            previous: None,
        }
    }

    fn sample(
        &mut self,
        devices: BTreeMap<String, DiskStats>,
        taken: Instant,
        now: DateTime<Utc>,
    ) -> MetricBatch {
        let mut batch = MetricBatch::new(NAME);

        if let Some((previous_at, previous)) = &self.previous {
            let elapsed = taken.duration_since(*previous_at).as_secs_f64();
            for (device, cur) in devices.iter().filter(|_| elapsed > 0.0) {
                let Some(prev) = previous.get(device) else {
                    continue;
                };
                let rates = [
                    ("reads", per_second(prev.reads, cur.reads, elapsed)),
                    ("writes", per_second(prev.writes, cur.writes, elapsed)),
                    ("reads_merged", per_second(prev.reads_merged, cur.reads_merged, elapsed)),
                    ("writes_merged", per_second(prev.writes_merged, cur.writes_merged, elapsed)),
                    (
                        "read_bytes",
                        per_second(prev.read_sectors, cur.read_sectors, elapsed) * SECTOR_SIZE,
                    ),
                    (
                        "write_bytes",
                        per_second(prev.write_sectors, cur.write_sectors, elapsed) * SECTOR_SIZE,
                    ),
                ];
                for (field, rate) in rates {
                    batch.push(Metric::at(format!("{device}.{field}"), rate, now));
                }
            }
        }

        self.previous = Some((taken, devices));
        batch
    }
}

impl Default for DiskIoCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl Collector for DiskIoCollector {
    fn name(&self) -> &str {
        NAME
    }

    fn init(&mut self, _ctx: &ModuleContext, settings: &ModuleSettings) -> Result<(), ModuleError> {
        self.proc_path = proc_path(settings)?;
        Ok(())
    }

    fn poll(&mut self) -> Result<MetricBatch> {
        let content = read_proc_file(&self.proc_path, "diskstats")?;
        Ok(self.sample(parse_diskstats(&content), Instant::now(), Utc::now()))
    }

    fn teardown(&mut self) -> Result<()> {
        self.previous = None;
        Ok(())
    }
}
