//! Metric delivery framework with pluggable sink support.
//!
//! Each tick the agent hands the drained [`MetricBatch`]es to every
//! configured [`Sink`] in turn. Sinks own their connection state and
//! any retry queue; the agent never calls two sinks concurrently.

pub mod graphite;

use anyhow::Result;
use async_trait::async_trait;
use sysminer_common::context::ModuleContext;
use sysminer_common::error::ModuleError;
use sysminer_common::settings::ModuleSettings;
use sysminer_common::types::MetricBatch;

/// An output destination for collected metrics (e.g., a graphite server).
#[async_trait]
pub trait Sink: Send {
    /// Returns the sink name (e.g., `"graphite"`), used for logging.
    fn name(&self) -> &str;

    /// Validates settings and opens the initial connection.
    ///
    /// # Errors
    ///
    /// Returns [`ModuleError::Connect`] when the destination is unreachable
    /// and any other variant for configuration problems.
    async fn init(&mut self, ctx: &ModuleContext, settings: &ModuleSettings) -> Result<(), ModuleError>;

    /// Delivers one tick's batches. A batch is not guaranteed to hold a
    /// complete tick: slow collectors report on later ticks.
    ///
    /// # Errors
    ///
    /// Returns an error if some records could not be delivered in this call.
    async fn send(&mut self, batches: &[MetricBatch]) -> Result<()>;

    /// Releases the connection. Calling it while disconnected is not an error.
    async fn teardown(&mut self) -> Result<()>;
}
