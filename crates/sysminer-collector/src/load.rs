use crate::Collector;
use anyhow::Result;
use chrono::Utc;
use sysinfo::System;
use sysminer_common::context::ModuleContext;
use sysminer_common::error::ModuleError;
use sysminer_common::settings::ModuleSettings;
use sysminer_common::types::{Metric, MetricBatch};

pub const NAME: &str = "loadavg";

pub struct LoadCollector;

impl LoadCollector {
    pub fn new() -> Self {
        Self
    }
}

impl Default for LoadCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl Collector for LoadCollector {
    fn name(&self) -> &str {
        NAME
    }

    fn init(&mut self, _ctx: &ModuleContext, _settings: &ModuleSettings) -> Result<(), ModuleError> {
        Ok(())
    }

    fn poll(&mut self) -> Result<MetricBatch> {
        let now = Utc::now();
        let load_avg = System::load_average();
        let uptime = System::uptime();

        Ok(MetricBatch::with_metrics(
            NAME,
            vec![
                Metric::at("shortterm", load_avg.one, now),
                Metric::at("midterm", load_avg.five, now),
                Metric::at("longterm", load_avg.fifteen, now),
                Metric::at("uptime", uptime as f64, now),
            ],
        ))
    }
}
