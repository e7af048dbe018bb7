//! Metric collection framework for the sysminer agent.
//!
//! Each [`Collector`] implementation gathers one category of host metrics
//! (CPU, memory, disk, network, load, processes, redis, agent internals)
//! and returns them as a [`MetricBatch`]. The agent runs every collector on
//! its own worker thread, so `poll` is free to block on file or socket I/O.

pub mod cpu;
pub mod disk;
pub mod diskio;
pub mod internal;
pub mod load;
pub mod memory;
pub mod network;
pub mod processes;
pub mod redis;

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use sysminer_common::context::ModuleContext;
use sysminer_common::error::ModuleError;
use sysminer_common::settings::ModuleSettings;
use sysminer_common::types::MetricBatch;

/// Root of the proc filesystem used when a module sets no `proc_path`.
pub const DEFAULT_PROC_PATH: &str = "/proc";

/// A host metric source polled once per scheduler tick.
///
/// Implementations own whatever state they need to turn raw counters into
/// rates. Only one `poll` is ever in flight for a given instance.
pub trait Collector: Send {
    /// Returns the collector name (e.g., `"cpu"`, `"diskspace"`), used for
    /// logging and as the middle segment of emitted metric paths.
    fn name(&self) -> &str;

    /// Reads module settings and acquires resources.
    ///
    /// # Errors
    ///
    /// Returns [`ModuleError::Connect`] for transient connectivity problems
    /// and any other variant for configuration problems.
    fn init(&mut self, ctx: &ModuleContext, settings: &ModuleSettings) -> Result<(), ModuleError>;

    /// Produces this tick's metrics.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying source could not be read. Rate
    /// state is left untouched in that case.
    fn poll(&mut self) -> Result<MetricBatch>;

    /// Releases resources. Calling it on an already released collector is
    /// not an error.
    fn teardown(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Reads the optional `proc_path` setting.
pub fn proc_path(settings: &ModuleSettings) -> Result<PathBuf, ModuleError> {
    Ok(settings
        .optional_string("proc_path")?
        .map_or_else(|| PathBuf::from(DEFAULT_PROC_PATH), PathBuf::from))
}

pub(crate) fn read_proc_file(root: &Path, relative: &str) -> Result<String> {
    let path = root.join(relative);
    std::fs::read_to_string(&path).with_context(|| format!("failed to read {}", path.display()))
}

/// Change per second between two counter readings.
///
/// Counters that went backwards (reset or wrap) yield `0.0` rather than a
/// negative rate.
///
/// # Examples
///
/// ```
/// use sysminer_collector::per_second;
///
/// assert_eq!(per_second(100.0, 150.0, 10.0), 5.0);
/// assert_eq!(per_second(150.0, 100.0, 10.0), 0.0);
/// ```
pub fn per_second(previous: f64, current: f64, elapsed_secs: f64) -> f64 {
    if current < previous {
        return 0.0;
    }
    (current - previous) / elapsed_secs
}

/// Parses a whitespace separated numeric field, treating garbage as zero.
pub(crate) fn field_value(field: &str) -> f64 {
    field.parse().unwrap_or(0.0)
}
