use crate::{proc_path, read_proc_file, Collector, DEFAULT_PROC_PATH};
use anyhow::Result;
use chrono::Utc;
use std::collections::HashMap;
use std::path::PathBuf;
use sysminer_common::context::ModuleContext;
use sysminer_common::error::ModuleError;
use sysminer_common::settings::ModuleSettings;
use sysminer_common::types::{Metric, MetricBatch};

pub const NAME: &str = "memory";

/// Fields only some kernels report, emitted when present.
const OPTIONAL_FIELDS: [(&str, &str); 6] = [
    ("HighTotal", "HighTotal"),
    ("HighFree", "HighFree"),
    ("LowTotal", "LowTotal"),
    ("LowFree", "LowFree"),
    ("SReclaimable", "SlabReclaimable"),
    ("SUnreclaim", "SlabUnreclaimable"),
];

/// Parses `/proc/meminfo` into byte values keyed by field name.
pub fn parse_meminfo(content: &str) -> HashMap<String, f64> {
    let mut meminfo = HashMap::new();
    for line in content.lines() {
        let mut columns = line.split_whitespace();
        let (Some(key), Some(raw)) = (columns.next(), columns.next()) else {
            continue;
        };
        let Ok(mut value) = raw.parse::<f64>() else {
            continue;
        };
        if columns.next() == Some("kB") {
            value *= 1024.0;
        }
        meminfo.insert(key.trim_end_matches(':').to_string(), value);
    }
    meminfo
}

pub struct MemoryCollector {
    proc_path: PathBuf,
}

impl MemoryCollector {
    pub fn new() -> Self {
        Self {
            proc_path: PathBuf::from(DEFAULT_PROC_PATH),
        }
    }
}

impl Default for MemoryCollector {
    fn default() -> Self {
        Self::new()
    }
}

/// Builds the memory batch from parsed meminfo values.
pub fn memory_batch(meminfo: &HashMap<String, f64>) -> MetricBatch {
    let now = Utc::now();
    let field = |key: &str| meminfo.get(key).copied().unwrap_or(0.0);

    let total = field("MemTotal");
    let free = field("MemFree");
    let cached = field("Cached");
    let buffers = field("Buffers");
    let used = total - free;
    let buffer_cache = cached + buffers;

    let mut batch = MetricBatch::new(NAME);
    for (name, value) in [
        ("Total", total),
        ("Free", free),
        ("Used", used),
        ("Cached", cached),
        ("Buffer", buffers),
        ("BufferCacheTotal", buffer_cache),
        ("BufferCacheUsed", used - buffer_cache),
        ("BufferCacheFree", free + buffer_cache),
        ("SwapTotal", field("SwapTotal")),
        ("SwapFree", field("SwapFree")),
    ] {
        batch.push(Metric::at(name, value, now));
    }

    for (key, name) in OPTIONAL_FIELDS {
        if let Some(value) = meminfo.get(key) {
            batch.push(Metric::at(name, *value, now));
        }
    }

    batch
}

impl Collector for MemoryCollector {
    fn name(&self) -> &str {
        NAME
    }

    fn init(&mut self, _ctx: &ModuleContext, settings: &ModuleSettings) -> Result<(), ModuleError> {
        self.proc_path = proc_path(settings)?;
        Ok(())
    }

    fn poll(&mut self) -> Result<MetricBatch> {
        let content = read_proc_file(&self.proc_path, "meminfo")?;
        Ok(memory_batch(&parse_meminfo(&content)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MEMINFO: &str = "MemTotal:        1000 kB\n\
                           MemFree:          400 kB\n\
                           Buffers:          100 kB\n\
                           Cached:           200 kB\n\
                           SwapTotal:        512 kB\n\
                           SwapFree:         512 kB\n\
                           SReclaimable:      10 kB\n\
                           HugePages_Total:    0\n";

    #[test]
    fn parse_converts_kilobytes_to_bytes() {
        let meminfo = parse_meminfo(MEMINFO);
        assert_eq!(meminfo["MemTotal"], 1000.0 * 1024.0);
        assert_eq!(meminfo["HugePages_Total"], 0.0);
    }

    #[test]
    fn derived_values_use_buffers_and_cache() {
        let batch = memory_batch(&parse_meminfo(MEMINFO));
        let value = |name: &str| batch.get(name).unwrap().value / 1024.0;

        assert_eq!(value("Used"), 600.0);
        assert_eq!(value("BufferCacheTotal"), 300.0);
        assert_eq!(value("BufferCacheUsed"), 300.0);
        assert_eq!(value("BufferCacheFree"), 700.0);
        assert_eq!(value("SlabReclaimable"), 10.0);
    }

    #[test]
    fn absent_optional_fields_are_not_emitted() {
        let batch = memory_batch(&parse_meminfo(MEMINFO));
        assert!(batch.get("HighTotal").is_none());
        assert!(batch.get("SlabUnreclaimable").is_none());
    }

    #[test]
    fn poll_reads_meminfo_below_proc_path() {
        let dir = crate::testutil::proc_with("meminfo", MEMINFO);
        let mut collector = MemoryCollector::new();
        let ctx = ModuleContext::new(std::time::Duration::from_secs(10), "test");
        let settings = ModuleSettings::new().with("proc_path", dir.path().to_str().unwrap());
        collector.init(&ctx, &settings).unwrap();

        let batch = collector.poll().unwrap();
        assert_eq!(batch.collector, "memory");
        assert_eq!(batch.get("Total").unwrap().value, 1000.0 * 1024.0);
    }
}
