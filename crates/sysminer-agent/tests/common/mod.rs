#![allow(dead_code)]

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use sysminer_agent::aggregator::ResponseAggregator;
use sysminer_agent::dispatcher::OutputDispatcher;
use sysminer_agent::scheduler::{TickReport, TickScheduler};
use sysminer_agent::worker::WorkerPool;
use sysminer_collector::Collector;
use sysminer_common::context::ModuleContext;
use sysminer_common::error::ModuleError;
use sysminer_common::settings::ModuleSettings;
use sysminer_common::stats::RuntimeStats;
use sysminer_common::types::{Metric, MetricBatch};
use sysminer_sink::Sink;

/// Shared record of teardown calls, in call order.
pub type Journal = Arc<Mutex<Vec<String>>>;

pub fn journal() -> Journal {
    Arc::new(Mutex::new(Vec::new()))
}

/// Collector emitting one `polls` gauge per poll. When a gate is set,
/// `poll` blocks until the gate opens.
pub struct Ticker {
    pub name: String,
    pub polls: Arc<AtomicUsize>,
    /// Set once `poll` has been entered at least once.
    pub entered: Arc<AtomicBool>,
    pub gate: Option<Arc<AtomicBool>>,
    pub fail_teardown: bool,
    pub journal: Journal,
}

impl Ticker {
    pub fn new(name: &str, journal: &Journal) -> Self {
        Self {
            name: name.to_string(),
            polls: Arc::new(AtomicUsize::new(0)),
            entered: Arc::new(AtomicBool::new(false)),
            gate: None,
            fail_teardown: false,
            journal: Arc::clone(journal),
        }
    }

    pub fn gated(mut self, gate: &Arc<AtomicBool>) -> Self {
        self.gate = Some(Arc::clone(gate));
        self
    }

    pub fn failing_teardown(mut self) -> Self {
        self.fail_teardown = true;
        self
    }
}

impl Collector for Ticker {
    fn name(&self) -> &str {
        &self.name
    }

    fn init(&mut self, _ctx: &ModuleContext, _settings: &ModuleSettings) -> Result<(), ModuleError> {
        Ok(())
    }

    fn poll(&mut self) -> Result<MetricBatch> {
        self.entered.store(true, Ordering::SeqCst);
        if let Some(gate) = &self.gate {
            while !gate.load(Ordering::SeqCst) {
                std::thread::sleep(Duration::from_millis(2));
            }
        }
        let polls = self.polls.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(MetricBatch::with_metrics(
            self.name.clone(),
            vec![Metric::new("polls", polls as f64)],
        ))
    }

    fn teardown(&mut self) -> Result<()> {
        self.journal.lock().unwrap().push(self.name.clone());
        if self.fail_teardown {
            return Err(anyhow!("{} refused to stop", self.name));
        }
        Ok(())
    }
}

/// Sink that keeps every batch it is sent.
pub struct Recorder {
    pub name: String,
    pub received: Arc<Mutex<Vec<MetricBatch>>>,
    pub calls: Arc<AtomicUsize>,
    pub delay: Duration,
    pub fail_send: bool,
    pub fail_teardown: bool,
    pub journal: Journal,
}

impl Recorder {
    pub fn new(name: &str, journal: &Journal) -> Self {
        Self {
            name: name.to_string(),
            received: Arc::new(Mutex::new(Vec::new())),
            calls: Arc::new(AtomicUsize::new(0)),
            delay: Duration::ZERO,
            fail_send: false,
            fail_teardown: false,
            journal: Arc::clone(journal),
        }
    }

    pub fn received(&self) -> Arc<Mutex<Vec<MetricBatch>>> {
        Arc::clone(&self.received)
    }
}

#[async_trait]
impl Sink for Recorder {
    fn name(&self) -> &str {
        &self.name
    }

    async fn init(&mut self, _ctx: &ModuleContext, _settings: &ModuleSettings) -> Result<(), ModuleError> {
        Ok(())
    }

    async fn send(&mut self, batches: &[MetricBatch]) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if self.fail_send {
            return Err(anyhow!("{} is down", self.name));
        }
        self.received.lock().unwrap().extend_from_slice(batches);
        Ok(())
    }

    async fn teardown(&mut self) -> Result<()> {
        self.journal.lock().unwrap().push(self.name.clone());
        if self.fail_teardown {
            return Err(anyhow!("{} refused to close", self.name));
        }
        Ok(())
    }
}

/// Wires collectors and sinks into a scheduler without going through
/// configuration.
pub fn scheduler(
    interval: Duration,
    collectors: Vec<Box<dyn Collector>>,
    sinks: Vec<Box<dyn Sink>>,
) -> (TickScheduler, Arc<RuntimeStats>) {
    let stats = Arc::new(RuntimeStats::new());
    let aggregator = ResponseAggregator::new(collectors.len());
    let workers = WorkerPool::spawn(collectors, &aggregator, &stats).unwrap();
    let scheduler = TickScheduler::new(
        interval,
        workers,
        aggregator,
        OutputDispatcher::new(sinks),
        Arc::clone(&stats),
    );
    (scheduler, stats)
}

/// Ticks until `done` holds for the latest report, failing after a few
/// seconds. Worker threads may need a moment before they accept requests.
pub async fn tick_until<F>(scheduler: &mut TickScheduler, mut done: F) -> Vec<TickReport>
where
    F: FnMut(&TickReport) -> bool,
{
    let mut reports = Vec::new();
    for _ in 0..500 {
        let report = scheduler.tick().await;
        reports.push(report);
        if done(&report) {
            return reports;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached after {} ticks", reports.len());
}
