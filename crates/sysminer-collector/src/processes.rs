use crate::{proc_path, Collector, DEFAULT_PROC_PATH};
use anyhow::{Context, Result};
use chrono::Utc;
use std::collections::BTreeMap;
use std::path::PathBuf;
use sysminer_common::context::ModuleContext;
use sysminer_common::error::ModuleError;
use sysminer_common::settings::ModuleSettings;
use sysminer_common::types::{Metric, MetricBatch};

pub const NAME: &str = "processes";

/// Every state bucket reported, including empty ones.
const STATES: [&str; 7] = [
    "Running", "Sleeping", "Blocked", "Zombies", "Stopped", "Paging", "Other",
];

/// Extracts the state character from the contents of `/proc/<pid>/stat`.
///
/// The command name is parenthesised and may itself contain spaces or
/// parentheses, so the state is read after the last `)`.
pub fn parse_state(stat: &str) -> Option<char> {
    let (_, rest) = stat.rsplit_once(')')?;
    rest.trim_start().chars().next()
}

/// Maps a kernel state character to its reporting bucket.
pub fn state_bucket(state: char) -> &'static str {
    match state {
        'R' => "Running",
        'S' => "Sleeping",
        'D' => "Blocked",
        'Z' => "Zombies",
        'T' | 't' => "Stopped",
        'W' => "Paging",
        _ => "Other",
    }
}

/// Counts processes per scheduler state.
pub struct ProcessesCollector {
    proc_path: PathBuf,
}

impl ProcessesCollector {
    pub fn new() -> Self {
        Self {
            proc_path: PathBuf::from(DEFAULT_PROC_PATH),
        }
    }
}

impl Default for ProcessesCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl Collector for ProcessesCollector {
    fn name(&self) -> &str {
        NAME
    }

    fn init(&mut self, _ctx: &ModuleContext, settings: &ModuleSettings) -> Result<(), ModuleError> {
        self.proc_path = proc_path(settings)?;
        Ok(())
    }

    fn poll(&mut self) -> Result<MetricBatch> {
        let entries = std::fs::read_dir(&self.proc_path)
            .with_context(|| format!("failed to list {}", self.proc_path.display()))?;

        let mut counts: BTreeMap<&'static str, u64> = STATES.iter().map(|s| (*s, 0)).collect();
        let mut total = 0u64;

        for entry in entries.flatten() {
            let file_name = entry.file_name();
            let Some(pid) = file_name.to_str().filter(|n| n.chars().all(|c| c.is_ascii_digit())) else {
                continue;
            };
            // Processes routinely exit between listing and reading
            let Ok(stat) = std::fs::read_to_string(entry.path().join("stat")) else {
                continue;
            };
            let Some(state) = parse_state(&stat) else {
                tracing::debug!(pid, "Unparseable process stat");
                continue;
            };
            *counts.entry(state_bucket(state)).or_default() += 1;
            total += 1;
        }

        let now = Utc::now();
        let mut batch = MetricBatch::new(NAME);
        for state in STATES {
            batch.push(Metric::at(state, counts[state] as f64, now));
        }
        batch.push(Metric::at("Total", total as f64, now));
        Ok(batch)
    }
}
