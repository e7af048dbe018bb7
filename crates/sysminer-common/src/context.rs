use crate::stats::RuntimeStats;
use std::sync::Arc;
use std::time::Duration;

/// Agent-wide values every module receives in `init`.
#[derive(Debug, Clone)]
pub struct ModuleContext {
    /// Tick interval of the scheduler.
    pub interval: Duration,
    /// Host name of the machine being monitored, as configured or detected.
    pub hostname: String,
    pub stats: Arc<RuntimeStats>,
}

impl ModuleContext {
    pub fn new(interval: Duration, hostname: impl Into<String>) -> Self {
        Self {
            interval,
            hostname: hostname.into(),
            stats: Arc::new(RuntimeStats::new()),
        }
    }

    /// Host name with every `.` replaced by `_`, safe to embed in dotted
    /// metric paths.
    ///
    /// # Examples
    ///
    /// ```
    /// use std::time::Duration;
    /// use sysminer_common::context::ModuleContext;
    ///
    /// let ctx = ModuleContext::new(Duration::from_secs(10), "web-01.example.com");
    /// assert_eq!(ctx.sanitized_hostname(), "web-01_example_com");
    /// ```
    pub fn sanitized_hostname(&self) -> String {
        self.hostname.replace('.', "_")
    }
}
